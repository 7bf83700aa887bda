// Cluster member identity and membership snapshots
// A membership is an ordered, immutable view; index 0 is the coordinator

use std::{collections::HashSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// Identity of a cluster member.
///
/// Equality, hashing and ordering are all derived from the node name, which
/// must be unique within a cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    name: String,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Node {
    fn from(name: &str) -> Self {
        Node::new(name)
    }
}

/// Ordered snapshot of the members of a group.
///
/// Snapshots are replaced wholesale on every membership change and never
/// mutated in place, so cloning one is a reference-count bump.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Membership {
    nodes: Arc<[Node]>,
}

impl Membership {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: nodes.into(),
        }
    }

    /// The member responsible for re-synchronization duties.
    pub fn coordinator(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn is_coordinator(&self, node: &Node) -> bool {
        self.coordinator() == Some(node)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.nodes.contains(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Orders a set of nodes by their position in this membership.
    ///
    /// Nodes that are not members are dropped.
    pub fn order(&self, nodes: &HashSet<Node>) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|node| nodes.contains(*node))
            .cloned()
            .collect()
    }
}

impl From<Vec<Node>> for Membership {
    fn from(nodes: Vec<Node>) -> Self {
        Membership::new(nodes)
    }
}

/// A membership change as delivered to group listeners
#[derive(Clone, Debug)]
pub struct MembershipEvent {
    /// Membership before the change
    pub previous: Membership,
    /// Membership after the change
    pub current: Membership,
    /// Whether the change is the result of a partition merge
    pub merged: bool,
    /// Timestamp of the event in epoch millis
    pub timestamp: i64,
}

impl MembershipEvent {
    pub fn new(previous: Membership, current: Membership, merged: bool) -> Self {
        Self {
            previous,
            current,
            merged,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Nodes present in the current membership but not the previous one
    pub fn joined(&self) -> Vec<Node> {
        self.current
            .nodes()
            .iter()
            .filter(|node| !self.previous.contains(node))
            .cloned()
            .collect()
    }

    /// Nodes present in the previous membership but not the current one
    pub fn left(&self) -> Vec<Node> {
        self.previous
            .nodes()
            .iter()
            .filter(|node| !self.current.contains(node))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(names: &[&str]) -> Membership {
        Membership::new(names.iter().map(|name| Node::new(*name)).collect())
    }

    #[test]
    fn test_coordinator_is_first_member() {
        let members = membership(&["a", "b", "c"]);
        assert_eq!(members.coordinator(), Some(&Node::new("a")));
        assert!(members.is_coordinator(&Node::new("a")));
        assert!(!members.is_coordinator(&Node::new("b")));
        assert_eq!(Membership::default().coordinator(), None);
    }

    #[test]
    fn test_order_follows_membership() {
        let members = membership(&["c", "a", "b"]);
        let set: HashSet<Node> = ["a", "b", "x"].into_iter().map(Node::new).collect();
        assert_eq!(members.order(&set), vec![Node::new("a"), Node::new("b")]);
    }

    #[test]
    fn test_event_joined_and_left() {
        let event = MembershipEvent::new(membership(&["a", "b"]), membership(&["b", "c"]), false);
        assert_eq!(event.joined(), vec![Node::new("c")]);
        assert_eq!(event.left(), vec![Node::new("a")]);
        assert!(event.timestamp > 0);
    }

    #[test]
    fn test_node_serde() {
        let node = Node::new("node-1");
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, r#"{"name":"node-1"}"#);
        assert_eq!(node.to_string(), "node-1");
    }
}
