//! Coordinator diagnostics
//!
//! A serving endpoint can ask the live coordinator for a dump of its queue
//! depths and in-flight hosts. Requests carry a oneshot reply; when no
//! spider run is active the hub answers directly, so callers never block.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};

/// One dump request, answered with human-readable text
pub struct DiagRequest {
    pub reply: oneshot::Sender<String>,
}

/// Process-wide diagnostics hub
///
/// The scan runner installs the live coordinator's request sender for the
/// duration of a run and clears it afterwards.
#[derive(Clone, Default)]
pub struct Diagnostics {
    slot: Arc<RwLock<Option<mpsc::Sender<DiagRequest>>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn install(&self, sender: mpsc::Sender<DiagRequest>) {
        *self.slot.write().await = Some(sender);
    }

    pub async fn clear(&self) {
        *self.slot.write().await = None;
    }

    /// Request a dump from the live coordinator, or answer for it
    pub async fn dump(&self) -> String {
        let sender = self.slot.read().await.clone();
        let sender = match sender {
            Some(sender) => sender,
            None => return "no spider run active\n".to_string(),
        };
        let (reply, response) = oneshot::channel();
        if sender.send(DiagRequest { reply }).await.is_err() {
            return "spider coordinator gone\n".to_string();
        }
        response
            .await
            .unwrap_or_else(|_| "spider coordinator did not answer\n".to_string())
    }
}
