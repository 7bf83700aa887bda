use std::sync::Arc;

use cohort_common::{Membership, Node};

use super::{Group, GroupListener, GroupListeners};

/// Single-node group used when clustering is disabled.
///
/// Membership never changes, so listeners are accepted but never invoked.
pub struct LocalGroup {
    name: String,
    node: Node,
    membership: Membership,
    listeners: GroupListeners,
}

impl LocalGroup {
    pub fn new(name: impl Into<String>, node: Node) -> Self {
        Self {
            name: name.into(),
            membership: Membership::new(vec![node.clone()]),
            node,
            listeners: GroupListeners::new(),
        }
    }
}

impl Group for LocalGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_node(&self) -> &Node {
        &self.node
    }

    fn membership(&self) -> Membership {
        self.membership.clone()
    }

    fn add_listener(&self, listener: Arc<dyn GroupListener>) {
        self.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn GroupListener>) {
        self.listeners.remove(listener);
    }

    fn is_local(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_group_is_its_own_coordinator() {
        let group = LocalGroup::new("local", Node::new("solo"));
        assert_eq!(group.name(), "local");
        assert_eq!(group.local_node(), &Node::new("solo"));
        assert_eq!(group.membership().len(), 1);
        assert!(group.is_coordinator());
        assert!(group.is_local());
    }
}
