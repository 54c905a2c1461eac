// ── Outbound command handle ──
//
// Entities never reach into the gateway. They hold a `CommandHandle`,
// which encodes with the session's flags and pushes frames onto the
// gateway's write channel.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use upb_proto::{MessageEncoder, Outbound};

use crate::config::Flags;
use crate::error::CoreError;

/// Capability to queue frames for the PIM. Cheap to clone.
#[derive(Clone)]
pub struct CommandHandle {
    tx: mpsc::UnboundedSender<Outbound>,
    depth: Arc<watch::Sender<usize>>,
    encoder: MessageEncoder,
    flags: Arc<Flags>,
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("encoder", &self.encoder)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl CommandHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Outbound>,
        depth: Arc<watch::Sender<usize>>,
        flags: Arc<Flags>,
    ) -> Self {
        Self {
            tx,
            depth,
            encoder: MessageEncoder::new(flags.tx_count()),
            flags,
        }
    }

    /// A handle wired to a bare channel instead of a gateway. Frames land
    /// on the returned receiver.
    pub fn detached(flags: Flags) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (depth, _) = watch::channel(0);
        (Self::new(tx, Arc::new(depth), Arc::new(flags)), rx)
    }

    pub fn encoder(&self) -> &MessageEncoder {
        &self.encoder
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    /// Queue a frame. Fire-and-forget: the answer (or its absence) shows up
    /// as entity state or a gateway timeout event.
    pub fn send(&self, outbound: Outbound) -> Result<(), CoreError> {
        self.depth.send_modify(|d| *d += 1);
        self.tx.send(outbound).map_err(|_| {
            self.depth.send_modify(|d| *d = d.saturating_sub(1));
            CoreError::Disconnected
        })
    }
}
