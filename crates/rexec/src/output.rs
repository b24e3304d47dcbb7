use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use rexec_peer::{CommandResult, NodeIdentity};
use rexec_pipe::PipeEntries;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct NodesOutput<'a> {
    count: usize,
    nodes: &'a [NodeIdentity],
}

pub fn print_nodes(nodes: &[NodeIdentity], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = NodesOutput {
                count: nodes.len(),
                nodes,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["LABEL", "ID", "HOST", "PORT"]);
            for node in nodes {
                table.add_row(vec![
                    node.label.clone(),
                    node.id.clone(),
                    node.host.clone(),
                    node.port.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if nodes.is_empty() {
                println!("no nodes found");
            }
            for node in nodes {
                println!("{node}");
            }
        }
        OutputFormat::Raw => {
            for node in nodes {
                println!("{}\t{}\t{}:{}", node.id, node.label, node.host, node.port);
            }
        }
    }
}

#[derive(Serialize)]
struct ResultOutput<'a> {
    node: &'a str,
    #[serde(flatten)]
    result: &'a CommandResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipe: Option<&'a PipeEntries>,
}

pub fn print_result(
    node: &NodeIdentity,
    result: &CommandResult,
    pipe: Option<&PipeEntries>,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = ResultOutput {
                node: &node.id,
                result,
                pipe,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["node".to_string(), node.to_string()])
                .add_row(vec!["command".to_string(), result.command_id.to_string()])
                .add_row(vec!["success".to_string(), result.success.to_string()]);
            if let Some(value) = &result.result {
                table.add_row(vec!["result".to_string(), value.clone()]);
            }
            if let Some(error) = &result.error {
                table.add_row(vec!["error".to_string(), error.clone()]);
            }
            for entry in &result.output {
                table.add_row(vec![entry.kind.to_lowercase(), entry.output.clone()]);
            }
            for (name, value) in pipe.into_iter().flatten() {
                table.add_row(vec![format!("pipe.{name}"), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let status = if result.success { "ok" } else { "failed" };
            println!("command {} on {node}: {status}", result.command_id);
            if !result.output.is_empty() {
                println!("{}", result.output_text());
            }
            if let Some(value) = &result.result {
                println!("=> {value}");
            }
            if let Some(error) = &result.error {
                println!("error: {error}");
            }
            for (name, value) in pipe.into_iter().flatten() {
                println!("{name} = {value}");
            }
        }
        OutputFormat::Raw => {
            let text = match (&result.result, &result.error) {
                (Some(value), _) => value.clone(),
                (None, Some(error)) => error.clone(),
                (None, None) => result.output_text(),
            };
            print_raw(text.as_bytes());
            if !text.ends_with('\n') && !text.is_empty() {
                print_raw(b"\n");
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}
