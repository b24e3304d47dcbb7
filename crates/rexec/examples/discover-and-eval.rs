//! Find a node by label and evaluate an expression on it.
//!
//! ```sh
//! cargo run --example discover-and-eval -- Sandbox "21 * 2"
//! ```

use std::time::Duration;

use rexec::peer::{connect, ExecMode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let label = args.next();
    let expr = args.next().unwrap_or_else(|| "1 + 1".to_string());

    let conn = connect(label.as_deref(), Duration::from_secs(3)).await?;
    println!("connected to {}", conn.remote());

    let result = conn.execute(ExecMode::EvaluateStatement, &expr).await?;
    if result.success {
        println!("{expr} = {}", result.result.as_deref().unwrap_or("None"));
    } else {
        println!("{expr} failed:\n{}", result.output_text());
    }

    conn.close().await?;
    Ok(())
}
