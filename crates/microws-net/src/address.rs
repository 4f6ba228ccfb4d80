//! `ws://<namespace>/<cmd>` call addresses

use microws_proto::{status, Exception};
use std::fmt;
use url::Url;

/// Scheme every call address must use
pub const SCHEME: &str = "ws";

/// A parsed call address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Logical namespace (the URL host)
    pub namespace: String,
    /// Command path, always starting with `/`
    pub cmd: String,
}

impl Address {
    /// Parse `ws://<namespace>/<cmd>`
    ///
    /// A scheme other than `ws` is rejected with status 461, anything else
    /// unparseable with 400.
    pub fn parse(address: &str) -> Result<Self, Exception> {
        let url = Url::parse(address).map_err(|e| {
            Exception::new(status::BAD_REQUEST, format!("Invalid address '{}': {}", address, e))
        })?;

        if url.scheme() != SCHEME {
            return Err(Exception::new(
                status::PROTOCOL_UNACCEPTED,
                format!("Protocol '{}' is not accepted", url.scheme()),
            ));
        }

        let namespace = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                Exception::new(status::BAD_REQUEST, format!("Address '{}' has no namespace", address))
            })?
            .to_string();

        Ok(Self {
            namespace,
            cmd: normalize_cmd(url.path()),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", SCHEME, self.namespace, self.cmd)
    }
}

/// Prefix a command with `/` unless it already has one
pub fn normalize_cmd(cmd: &str) -> String {
    if cmd.starts_with('/') {
        cmd.to_string()
    } else {
        format!("/{}", cmd)
    }
}
