//! Connectivity signal shared between the host environment and the core.

use std::sync::Arc;

use tokio::sync::watch;

/// Online/offline flag. Cloning yields another handle to the same signal.
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the flag, returning the previous value
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.tx.send_replace(online);
        if previous != online {
            log::info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
        previous
    }

    /// Receive notifications on every change
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
