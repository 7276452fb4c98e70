use tokio::sync::watch;

/// Online/offline flag shared between the host platform and the engine.
///
/// The host feeds transitions in (from whatever platform signal it has);
/// the engine watches for offline→online edges to trigger a drain. Cache
/// reads are never routed through here.
#[derive(Clone)]
pub struct ConnectivityGate {
    tx: watch::Sender<bool>,
}

impl ConnectivityGate {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a transition. Setting the same state twice is a no-op for
    /// watchers (the channel deduplicates via `send_if_modified`).
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn edge_transitions_wake_watchers() {
        let gate = ConnectivityGate::new(false);
        let mut rx = gate.watch();
        assert!(!*rx.borrow_and_update());

        gate.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        // Same-state set does not produce a new notification.
        gate.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
