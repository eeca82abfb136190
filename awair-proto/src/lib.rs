//! Awair BLE provisioning protocol - commands, messages and reassembly
//!
//! The device speaks JSON over two GATT characteristics: commands are
//! written to one, replies arrive as notifications on the other, split into
//! fragments with no framing. This crate has the vocabulary for both
//! directions and the reassembler that turns fragments back into messages.

pub mod ble;
mod command;
mod message;
mod reassembler;

pub use command::{Command, WifiCredentials};
pub use message::{DecodedMessage, JsonObject};
pub use reassembler::{Reassembler, ReassemblyError};

/// What the reassembly task hands to the consumer
pub type Inbound = Result<DecodedMessage, ReassemblyError>;

/// Background reassembly for tokio
#[cfg(feature = "async")]
pub mod async_io {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    /// Capacity of the handoff between the reassembly task and its consumer.
    ///
    /// One slot: the task stalls on the second message until the first is
    /// taken, which stalls fragment intake in turn. The protocol is strictly
    /// half-duplex so nothing is lost by waiting.
    pub const HANDOFF_CAPACITY: usize = 1;

    /// Drive `reassembler` from `fragments` until the transport or the
    /// consumer goes away.
    pub async fn run_reassembly(
        mut fragments: mpsc::Receiver<Vec<u8>>,
        messages: mpsc::Sender<Inbound>,
        mut reassembler: Reassembler,
    ) {
        while let Some(fragment) = fragments.recv().await {
            tracing::trace!(len = fragment.len(), "fragment");
            let item = match reassembler.push(&fragment) {
                Ok(None) => continue,
                Ok(Some(message)) => {
                    tracing::debug!(%message, "decoded");
                    Ok(message)
                }
                Err(e) => {
                    tracing::warn!("{e}");
                    Err(e)
                }
            };
            if messages.send(item).await.is_err() {
                tracing::debug!("message consumer dropped, stopping reassembly");
                return;
            }
        }
        if reassembler.pending_len() > 0 {
            tracing::debug!(
                pending = reassembler.pending_len(),
                "fragment stream closed with an incomplete message"
            );
        }
    }

    /// Spawn [`run_reassembly`] and return the consumer side of the handoff
    pub fn spawn_reassembly(
        fragments: mpsc::Receiver<Vec<u8>>,
        reassembler: Reassembler,
    ) -> (mpsc::Receiver<Inbound>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        let handle = tokio::spawn(run_reassembly(fragments, tx, reassembler));
        (rx, handle)
    }

}
