mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "rexec", version, about = "Discover scripting nodes and run code on them")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exec_subcommand() {
        let cli = Cli::try_parse_from([
            "rexec",
            "exec",
            "--label",
            "Sandbox",
            "--mode",
            "evaluate",
            "21 * 2",
        ])
        .expect("exec args should parse");

        match cli.command {
            Command::Exec(args) => {
                assert_eq!(args.label.as_deref(), Some("Sandbox"));
                assert_eq!(args.code.as_deref(), Some("21 * 2"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_code_with_file() {
        let err = Cli::try_parse_from([
            "rexec",
            "exec",
            "--file",
            "/tmp/script.py",
            "print(1)",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_nodes_with_global_format() {
        let cli = Cli::try_parse_from(["rexec", "nodes", "--wait", "500ms", "--format", "json"])
            .expect("nodes args should parse");
        assert!(matches!(cli.command, Command::Nodes(_)));
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
    }

    #[test]
    fn parses_mock_node_subcommand() {
        let cli = Cli::try_parse_from([
            "rexec",
            "mock-node",
            "--label",
            "Sandbox",
            "--group",
            "127.0.0.1:47123",
        ])
        .expect("mock-node args should parse");
        assert!(matches!(cli.command, Command::MockNode(_)));
    }
}
