use rexec_peer::{
    connect_with_config, Connection, DiscoveryConfig, ExecMode, LocalNode, ResultPipeBridge,
    SessionConfig,
};
use rexec_pipe::PipeConfig;
use tracing::{info, warn};

use crate::cmd::ExecArgs;
use crate::exit::{
    io_error, peer_error, pipe_error, CliError, CliResult, FAILURE, SUCCESS, USAGE,
};
use crate::output::{print_result, OutputFormat};

pub async fn run(args: ExecArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = load_payload(&args)?;
    let mode = args.exec_mode();
    let network = args.network.to_config();
    let local = LocalNode::new("rexec-cli");

    let discovery = DiscoveryConfig {
        network: network.clone(),
        local,
        ..DiscoveryConfig::default()
    };
    let session = SessionConfig {
        network,
        open_timeout: args.open_timeout,
        command_timeout: args.timeout,
        unattended: !args.interactive,
    };

    let connection = connect_with_config(args.label.as_deref(), args.wait, discovery, session)
        .await
        .map_err(|err| peer_error("connect failed", err))?;
    info!(node = %connection.remote(), mode = %mode, "connected");

    let outcome = match &args.pipe {
        Some(channel) => run_piped(&connection, channel, mode, &payload, format).await,
        None => connection
            .execute(mode, &payload)
            .await
            .map_err(|err| peer_error("exec failed", err))
            .map(|result| {
                print_result(connection.remote(), &result, None, format);
                result.success
            }),
    };

    if let Err(err) = connection.close().await {
        warn!(error = %err, "close failed");
    }

    if outcome? {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

async fn run_piped(
    connection: &Connection,
    channel: &str,
    mode: ExecMode,
    payload: &str,
    format: OutputFormat,
) -> CliResult<bool> {
    let config = PipeConfig::for_channel(channel).map_err(|err| pipe_error("invalid pipe", err))?;
    let bridge = ResultPipeBridge::install(connection, config)
        .await
        .map_err(|err| peer_error("pipe install failed", err))?;
    let run = bridge
        .execute(connection, mode, payload)
        .await
        .map_err(|err| peer_error("exec failed", err))?;
    print_result(connection.remote(), &run.result, Some(&run.entries), format);
    Ok(run.result.success)
}

fn load_payload(args: &ExecArgs) -> CliResult<String> {
    let payload = match (&args.code, &args.file) {
        (Some(code), _) => code.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("cannot read {}", path.display()), err))?,
        (None, None) => return Err(CliError::new(USAGE, "no code given")),
    };
    if payload.trim().is_empty() {
        return Err(CliError::new(USAGE, "code must not be empty"));
    }
    Ok(payload)
}
