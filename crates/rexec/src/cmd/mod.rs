use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use rexec_peer::ExecMode;
use rexec_transport::{MulticastConfig, DEFAULT_MULTICAST_GROUP};

use crate::exit::{io_error, CliResult};
use crate::output::OutputFormat;

pub mod exec;
pub mod mock_node;
pub mod nodes;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List nodes answering on the discovery group.
    Nodes(NodesArgs),
    /// Run code on a discovered node and print its result.
    Exec(ExecArgs),
    /// Serve a stand-in node that evaluates integer arithmetic.
    MockNode(MockNodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Nodes(args) => block_on(nodes::run(args, format)),
        Command::Exec(args) => block_on(exec::run(args, format)),
        Command::MockNode(args) => block_on(mock_node::run(args)),
        Command::Version(args) => version::run(args),
    }
}

fn block_on<F: Future<Output = CliResult<i32>>>(future: F) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;
    runtime.block_on(future)
}

/// Discovery group and socket options shared by every network command.
#[derive(Args, Debug, Clone)]
pub struct NetworkArgs {
    /// Discovery group address. A non-multicast address is bound directly.
    #[arg(long, value_name = "ADDR", default_value_t = DEFAULT_MULTICAST_GROUP, env = "REXEC_GROUP")]
    pub group: SocketAddrV4,
    /// Interface address used for the multicast join.
    #[arg(long, value_name = "IP", default_value_t = Ipv4Addr::UNSPECIFIED)]
    pub interface: Ipv4Addr,
    /// Multicast TTL; 0 keeps traffic on this host.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub ttl: u32,
    /// Reply host advertised to other nodes.
    #[arg(long, value_name = "IP")]
    pub advertise: Option<IpAddr>,
}

impl NetworkArgs {
    pub fn to_config(&self) -> MulticastConfig {
        let mut config = MulticastConfig {
            group: self.group,
            bind_address: self.interface,
            ttl: self.ttl,
            advertise_host: self.advertise,
            ..MulticastConfig::default()
        };
        if self.group.ip().is_loopback() {
            config.unicast_bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        }
        config
    }
}

#[derive(Args, Debug)]
pub struct NodesArgs {
    /// Only report nodes with this label; fails if none answers in time.
    #[arg(long)]
    pub label: Option<String>,
    /// How long to listen for answers (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub wait: Duration,
    /// Interval between discovery pings.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub interval: Duration,
    #[command(flatten)]
    pub network: NetworkArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeArg {
    /// Run a script.
    File,
    /// Run one statement.
    Statement,
    /// Evaluate an expression and report its value.
    Evaluate,
}

impl From<ModeArg> for ExecMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::File => ExecMode::ExecuteFile,
            ModeArg::Statement => ExecMode::ExecuteStatement,
            ModeArg::Evaluate => ExecMode::EvaluateStatement,
        }
    }
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Code to run.
    #[arg(conflicts_with = "file", required_unless_present = "file")]
    pub code: Option<String>,
    /// Send the contents of a local script instead.
    #[arg(long, short = 'f', value_name = "PATH")]
    pub file: Option<PathBuf>,
    /// Execution mode. Defaults to `file` with --file, `evaluate` otherwise.
    #[arg(long, short = 'm')]
    pub mode: Option<ModeArg>,
    /// Label of the node to run on. Default: first node that answers.
    #[arg(long, short = 'l', env = "REXEC_LABEL")]
    pub label: Option<String>,
    /// How long to wait for the node to be discovered.
    #[arg(long, default_value = "3s", value_parser = parse_duration)]
    pub wait: Duration,
    /// Bound on the open handshake.
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub open_timeout: Duration,
    /// How long to wait for the command result.
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub timeout: Duration,
    /// Allow the node to show interactive prompts.
    #[arg(long)]
    pub interactive: bool,
    /// Install a result pipe on this channel and print what the code publishes.
    #[arg(long, value_name = "CHANNEL")]
    pub pipe: Option<String>,
    #[command(flatten)]
    pub network: NetworkArgs,
}

impl ExecArgs {
    pub fn exec_mode(&self) -> ExecMode {
        match (self.mode, &self.file) {
            (Some(mode), _) => mode.into(),
            (None, Some(_)) => ExecMode::ExecuteFile,
            (None, None) => ExecMode::EvaluateStatement,
        }
    }
}

#[derive(Args, Debug)]
pub struct MockNodeArgs {
    /// Label advertised to callers.
    #[arg(long, default_value = "rexec-mock")]
    pub label: String,
    /// Node id. Default: a random UUID.
    #[arg(long)]
    pub id: Option<String>,
    /// Stop after this long instead of waiting for Ctrl-C.
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,
    #[command(flatten)]
    pub network: NetworkArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `500ms`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 2 "), Ok(Duration::from_secs(2)));
    }

    #[test]
    fn rejects_bad_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn loopback_group_keeps_unicast_local() {
        let args = NetworkArgs {
            group: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 47100),
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 0,
            advertise: None,
        };
        let config = args.to_config();
        assert!(!config.is_multicast());
        assert_eq!(config.unicast_bind.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn file_implies_file_mode() {
        let args = ExecArgs {
            code: None,
            file: Some(PathBuf::from("job.py")),
            mode: None,
            label: None,
            wait: Duration::from_secs(1),
            open_timeout: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            interactive: false,
            pipe: None,
            network: NetworkArgs {
                group: DEFAULT_MULTICAST_GROUP,
                interface: Ipv4Addr::UNSPECIFIED,
                ttl: 0,
                advertise: None,
            },
        };
        assert_eq!(args.exec_mode(), ExecMode::ExecuteFile);
    }
}
