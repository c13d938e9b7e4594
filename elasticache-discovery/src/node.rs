use std::fmt::{Display, Formatter};

/// One cache node as listed by the configuration endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub host: String,
    pub ip: String,
    pub port: u16,
}

impl Node {
    /// The `ip:port` form handed to server selectors. The hostname is dropped.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.host, self.ip, self.port)
    }
}

/// A decoded `config get cluster` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Config version from the second line, if it was numeric.
    pub version: Option<u64>,
    pub nodes: Vec<Node>,
}

impl ClusterConfig {
    pub fn endpoints(&self) -> Vec<String> {
        self.nodes.iter().map(Node::endpoint).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
