use rexec_peer::{DiscoveryConfig, DiscoveryService, LocalNode};
use tracing::debug;

use crate::cmd::NodesArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_nodes, OutputFormat};

pub async fn run(args: NodesArgs, format: OutputFormat) -> CliResult<i32> {
    let config = DiscoveryConfig {
        network: args.network.to_config(),
        local: LocalNode::new("rexec-cli"),
        broadcast_interval: args.interval,
        ..DiscoveryConfig::default()
    };
    let service = DiscoveryService::start(config)
        .await
        .map_err(|err| peer_error("discovery failed to start", err))?;

    let nodes = match &args.label {
        Some(label) => {
            let found = service.wait_for_node(Some(label.as_str()), args.wait).await;
            let nodes = service.list_nodes();
            service.stop().await;
            found.map_err(|err| peer_error("discovery", err))?;
            nodes
                .into_iter()
                .filter(|node| &node.label == label)
                .collect::<Vec<_>>()
        }
        None => {
            tokio::time::sleep(args.wait).await;
            let nodes = service.list_nodes();
            service.stop().await;
            nodes
        }
    };

    debug!(count = nodes.len(), "discovery finished");
    print_nodes(&nodes, format);
    Ok(SUCCESS)
}
