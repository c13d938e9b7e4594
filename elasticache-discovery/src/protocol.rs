//! Decoder for the `config get cluster` response.
//!
//! A response looks like:
//!
//! ```text
//! CONFIG cluster 0 147
//! 12
//! myCluster.0001.cache.amazonaws.com|10.82.235.120|11211 myCluster.0002.cache.amazonaws.com|10.80.249.27|11211
//!
//! END
//! ```
//!
//! Only the third line carries node data. Reading stops at `END`.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::node::{ClusterConfig, Node};

pub const END: &str = "END";
/// Longest accepted response line, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;
const VERSION_LINE: usize = 2;
const NODE_LINE: usize = 3;
const NODE_SEPARATOR: char = ' ';
const FIELD_SEPARATOR: char = '|';

#[derive(Debug, Default)]
struct RawResponse {
    version: Option<String>,
    nodes: String,
}

async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<String>> where R: AsyncBufRead + Unpin {
    buf.clear();
    let limit = (MAX_LINE_LENGTH + 2) as u64;
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await.map_err(Error::Scanner)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > MAX_LINE_LENGTH {
        let error = io::Error::new(io::ErrorKind::InvalidData, format!("response line longer than {} bytes", MAX_LINE_LENGTH));
        return Err(Error::Scanner(error));
    }
    let line = String::from_utf8(std::mem::take(buf))
        .map_err(|error| Error::Scanner(io::Error::new(io::ErrorKind::InvalidData, error)))?;
    Ok(Some(line))
}

async fn read_response<R>(mut reader: R) -> Result<RawResponse> where R: AsyncBufRead + Unpin {
    let mut response = RawResponse::default();
    let mut buf = Vec::new();
    let mut count = 0usize;
    while let Some(line) = next_line(&mut reader, &mut buf).await? {
        count += 1;
        trace!("discovery response line {}: {}", count, line);
        if line == END {
            break;
        }
        match count {
            VERSION_LINE => response.version = Some(line),
            NODE_LINE => response.nodes = line,
            _ => {}
        }
    }
    Ok(response)
}

/// Reads the response up to `END` and returns the node line. A response that ends
/// before the third line yields an empty node line, which parses to zero nodes.
pub async fn read_node_line<R>(reader: R) -> Result<String> where R: AsyncBufRead + Unpin {
    Ok(read_response(reader).await?.nodes)
}

pub async fn read_cluster_config<R>(reader: R) -> Result<ClusterConfig> where R: AsyncBufRead + Unpin {
    let RawResponse { version, nodes } = read_response(reader).await?;
    let version = version.and_then(|v| v.trim().parse::<u64>().ok());
    let nodes = parse_nodes(&nodes)?;
    Ok(ClusterConfig { version, nodes })
}

pub fn parse_nodes(line: &str) -> Result<Vec<Node>> {
    if line.is_empty() {
        return Ok(Vec::new());
    }
    line.split(NODE_SEPARATOR).map(parse_node).collect()
}

pub fn parse_endpoints(line: &str) -> Result<Vec<String>> {
    let nodes = parse_nodes(line)?;
    Ok(nodes.iter().map(Node::endpoint).collect())
}

fn parse_node(entry: &str) -> Result<Node> {
    let fields = entry.split(FIELD_SEPARATOR).collect::<Vec<_>>();
    let [host, ip, port] = fields.as_slice() else {
        return Err(Error::MalformedResponse(format!(
            "node entry {:?} has {} fields, expected host|ip|port",
            entry,
            fields.len(),
        )));
    };
    if ip.is_empty() {
        return Err(Error::MalformedResponse(format!("node entry {:?} has an empty ip", entry)));
    }
    let port = port.parse::<u16>().map_err(|error| {
        Error::MalformedResponse(format!("node entry {:?} has invalid port {:?}: {}", entry, port, error))
    })?;
    Ok(Node {
        host: host.to_string(),
        ip: ip.to_string(),
        port,
    })
}
