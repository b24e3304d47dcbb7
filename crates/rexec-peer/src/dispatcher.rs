//! Command dispatch and result correlation.
//!
//! Every command gets a fresh id and a oneshot slot in the pending table.
//! The connection's receive task fills the slot when the matching result
//! arrives, in whatever order results come back. A slot is removed when its
//! command completes, times out, or is abandoned; results arriving after
//! that are logged and dropped.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rexec_wire::{Command, CommandResult, ExecMode, NodeIdentity};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionState};
use crate::control::send;
use crate::error::{PeerError, Result};

/// Commands awaiting a result, keyed by command id.
#[derive(Debug, Default)]
pub(crate) struct PendingCommands {
    slots: Mutex<HashMap<u64, oneshot::Sender<CommandResult>>>,
}

/// Removes its slot from the table when dropped.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingCommands,
    command_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.command_id);
    }
}

impl PendingCommands {
    pub(crate) fn register(
        &self,
        command_id: u64,
    ) -> (PendingGuard<'_>, oneshot::Receiver<CommandResult>) {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(command_id, tx);
        (
            PendingGuard {
                pending: self,
                command_id,
            },
            rx,
        )
    }

    /// Hand `result` to its waiting command, if any.
    pub(crate) fn complete(&self, result: CommandResult) {
        let command_id = result.command_id;
        let slot = self.lock().remove(&command_id);
        match slot {
            Some(tx) => {
                if tx.send(result).is_err() {
                    debug!(command_id, "waiter gone; result dropped");
                }
            }
            None => debug!(command_id, "discarding late or unknown result"),
        }
    }

    /// Drop every slot; waiters observe a closed channel.
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn remove(&self, command_id: u64) {
        self.lock().remove(&command_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<CommandResult>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Send `payload` over `connection` and wait for its result.
///
/// Fails with [`PeerError::NotConnected`] without sending anything when the
/// connection is not open, and with [`PeerError::CommandTimeout`] when no
/// result arrives within `timeout`. Timing out does not cancel the remote
/// code. A remote failure is a result with `success == false`.
pub async fn execute(
    connection: &Connection,
    mode: ExecMode,
    payload: &str,
    timeout: Duration,
) -> Result<CommandResult> {
    let shared = connection.shared();
    let state = shared.state();
    if state != ConnectionState::Open {
        return Err(PeerError::NotConnected {
            node: shared.remote.to_string(),
            state,
        });
    }
    if payload.is_empty() {
        return Err(PeerError::InvalidCommand("empty payload".to_string()));
    }

    let command_id = shared.next_command_id();
    let message = shared.origin.command(
        Command {
            connection_id: shared.connection_id.clone(),
            command_id,
            mode,
            payload: payload.to_string(),
            unattended: shared.config.unattended,
        },
        &shared.remote.id,
    );

    let started = Instant::now();
    let (_guard, slot) = shared.pending.register(command_id);
    send(&shared.endpoint, &message, shared.remote_addr).await?;
    debug!(
        node = %shared.remote,
        command_id,
        mode = %mode,
        bytes = payload.len(),
        "command sent"
    );

    match tokio::time::timeout(timeout, slot).await {
        Ok(Ok(result)) => {
            debug!(
                command_id,
                success = result.success,
                elapsed = ?started.elapsed(),
                "command result received"
            );
            Ok(result)
        }
        Ok(Err(_)) => Err(PeerError::NotConnected {
            node: shared.remote.to_string(),
            state: shared.state(),
        }),
        Err(_) => {
            let elapsed = started.elapsed();
            warn!(node = %shared.remote, command_id, elapsed = ?elapsed, "command timed out");
            Err(PeerError::CommandTimeout {
                node: shared.remote.to_string(),
                command_id,
                elapsed,
            })
        }
    }
}

/// Turn a failed result into [`PeerError::RemoteExecution`].
pub(crate) fn check(node: &NodeIdentity, result: CommandResult) -> Result<CommandResult> {
    if result.success {
        return Ok(result);
    }
    let error = result
        .error
        .clone()
        .filter(|error| !error.is_empty())
        .unwrap_or_else(|| result.output_text());
    Err(PeerError::RemoteExecution {
        node: node.to_string(),
        command_id: result.command_id,
        error,
    })
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use rexec_wire::OutputEntry;

    use super::*;

    fn result(command_id: u64, success: bool) -> CommandResult {
        CommandResult {
            connection_id: "c-1".to_string(),
            command_id,
            success,
            output: vec![OutputEntry::new("Error", "boom")],
            result: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn results_match_out_of_order() {
        let pending = PendingCommands::default();
        let (_g1, rx1) = pending.register(1);
        let (_g2, rx2) = pending.register(2);

        pending.complete(result(2, true));
        pending.complete(result(1, false));

        assert_eq!(rx2.await.unwrap().command_id, 2);
        assert_eq!(rx1.await.unwrap().command_id, 1);
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn guard_removes_abandoned_slot() {
        let pending = PendingCommands::default();
        {
            let (_guard, _rx) = pending.register(5);
            assert_eq!(pending.len(), 1);
        }
        assert_eq!(pending.len(), 0);
        pending.complete(result(5, true));
    }

    #[tokio::test]
    async fn clear_wakes_waiters() {
        let pending = PendingCommands::default();
        let (_guard, rx) = pending.register(9);
        pending.clear();
        assert!(rx.await.is_err());
    }

    #[test]
    fn check_prefers_error_text() {
        let node = NodeIdentity::new("n", "", SocketAddr::from(([127, 0, 0, 1], 1)));
        assert!(check(&node, result(1, true)).is_ok());

        match check(&node, result(2, false)) {
            Err(PeerError::RemoteExecution { error, command_id, .. }) => {
                assert_eq!(command_id, 2);
                assert_eq!(error, "Error: boom");
            }
            other => panic!("unexpected: {other:?}"),
        }

        let mut failed = result(3, false);
        failed.error = Some("NameError: x".to_string());
        match check(&node, failed) {
            Err(PeerError::RemoteExecution { error, .. }) => assert_eq!(error, "NameError: x"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
