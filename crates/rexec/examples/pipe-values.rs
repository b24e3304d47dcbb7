//! Publish structured values from remote code through a result pipe.
//!
//! The node must be able to read and write the system temp directory.

use std::time::Duration;

use rexec::peer::{connect, ExecMode, ResultPipeBridge};
use rexec::pipe::PipeConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let label = std::env::args().nth(1);
    let conn = connect(label.as_deref(), Duration::from_secs(3)).await?;

    let bridge = ResultPipeBridge::install(&conn, PipeConfig::for_channel("pipe-values")?).await?;
    let script = [
        bridge.add_call("answer", "6 * 7")?,
        bridge.add_call("greeting", "\"hello\"")?,
    ]
    .join("\n");

    let run = bridge.execute(&conn, ExecMode::ExecuteFile, &script).await?;
    println!("success: {}", run.result.success);
    for (name, value) in &run.entries {
        println!("{name} = {value}");
    }

    conn.close().await?;
    Ok(())
}
