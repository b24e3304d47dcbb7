use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("rexec {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: rexec");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("REXEC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "protocol: {} v{}",
        rexec_wire::MAGIC,
        rexec_wire::PROTOCOL_VERSION
    );
    println!("discovery_group: {}", rexec_transport::DEFAULT_MULTICAST_GROUP);
    println!("features: peer={}, cli=true", cfg!(feature = "peer"));

    Ok(SUCCESS)
}
