/// Name used for the local node when none is configured
pub const DEFAULT_NODE_NAME: &str = "localhost";

/// Resolve the host name of this machine, falling back to `localhost`
pub fn local_node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_NODE_NAME.to_string())
}
