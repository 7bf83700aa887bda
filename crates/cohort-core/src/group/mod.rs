// Group membership contract
// Provides the ordered member view and event-driven notifications for membership changes

pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use cohort_common::{Membership, MembershipEvent, Node};

pub use local::LocalGroup;

/// Trait for handling membership change events
#[async_trait]
pub trait GroupListener: Send + Sync + 'static {
    /// Called when the membership of the group changes
    async fn membership_changed(&self, event: &MembershipEvent);
}

/// Membership view of a group of cluster nodes
pub trait Group: Send + Sync + 'static {
    /// Name of the group (the cluster name)
    fn name(&self) -> &str;

    /// Identity of the local member
    fn local_node(&self) -> &Node;

    /// Current ordered membership snapshot
    fn membership(&self) -> Membership;

    /// Register a listener for membership changes
    fn add_listener(&self, listener: Arc<dyn GroupListener>);

    /// Remove a previously registered listener
    fn remove_listener(&self, listener: &Arc<dyn GroupListener>);

    /// Whether the local node is the designated coordinator
    fn is_coordinator(&self) -> bool {
        self.membership().is_coordinator(self.local_node())
    }

    /// Whether this group can only ever contain the local node
    fn is_local(&self) -> bool {
        false
    }
}

/// Registered group listeners
///
/// Publishing iterates a snapshot, so listeners may add or remove listeners
/// from inside a callback.
#[derive(Default)]
pub struct GroupListeners {
    listeners: RwLock<Vec<Arc<dyn GroupListener>>>,
}

impl GroupListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn GroupListener>) {
        let mut listeners = self.listeners.write();
        listeners.push(listener);
        debug!("Registered group listener, total: {}", listeners.len());
    }

    /// Returns `true` if the listener was registered
    pub fn remove(&self, listener: &Arc<dyn GroupListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        before != listeners.len()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub async fn publish(&self, event: &MembershipEvent) {
        let listeners: Vec<Arc<dyn GroupListener>> = self.listeners.read().clone();
        for listener in listeners {
            listener.membership_changed(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(AtomicUsize);

    #[async_trait]
    impl GroupListener for CountingListener {
        async fn membership_changed(&self, _event: &MembershipEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_publish_and_remove() {
        let listeners = GroupListeners::new();
        let counter = Arc::new(CountingListener(AtomicUsize::new(0)));
        let listener: Arc<dyn GroupListener> = counter.clone();

        listeners.add(listener.clone());
        assert_eq!(listeners.len(), 1);

        let event = MembershipEvent::new(
            Membership::default(),
            Membership::new(vec![Node::new("a")]),
            false,
        );
        listeners.publish(&event).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        assert!(listeners.remove(&listener));
        assert!(!listeners.remove(&listener));
        listeners.publish(&event).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
