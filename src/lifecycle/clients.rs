use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use http::Uri;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

/// Identifies one connected client context for the lifetime of its
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

/// One-way notifications pushed to connected clients. Fire-and-forget: no
/// acknowledgment, and a departed client is not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    GenerationActivated { version: String },
    SubmissionSynced { id: String },
}

#[derive(Debug)]
struct ClientState {
    url: Uri,
    controlled_by: Option<Arc<str>>,
    sender: mpsc::UnboundedSender<ClientMessage>,
}

/// Registry of connected client contexts and their notification channels.
#[derive(Debug, Default)]
pub struct ClientHub {
    next_id: AtomicU64,
    clients: Mutex<HashMap<ClientId, ClientState>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, url: Uri) -> (ClientId, mpsc::UnboundedReceiver<ClientMessage>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.clients.lock().insert(
            id,
            ClientState {
                url,
                controlled_by: None,
                sender,
            },
        );
        (id, receiver)
    }

    pub fn disconnect(&self, id: ClientId) {
        self.clients.lock().remove(&id);
    }

    /// Marks every connected client as controlled by `version`, so its
    /// subsequent requests route through that generation. Returns how many
    /// clients were claimed.
    pub fn claim(&self, version: &Arc<str>) -> usize {
        let mut guard = self.clients.lock();
        for state in guard.values_mut() {
            state.controlled_by = Some(version.clone());
        }
        guard.len()
    }

    pub fn broadcast(&self, message: ClientMessage) {
        let guard = self.clients.lock();
        for state in guard.values() {
            // A closed receiver just means the client went away.
            let _ = state.sender.send(message.clone());
        }
    }

    pub fn controlled_by(&self, id: ClientId) -> Option<Arc<str>> {
        self.clients
            .lock()
            .get(&id)
            .and_then(|state| state.controlled_by.clone())
    }

    pub fn client_url(&self, id: ClientId) -> Option<Uri> {
        self.clients.lock().get(&id).map(|state| state.url.clone())
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
