//! Free port detection

use std::io;
use tokio::net::TcpListener;
use tracing::debug;

/// Return `preferred` if it can be bound on `host`, otherwise a free port
///
/// A preferred port of 0 always asks the OS for a free one.
pub async fn detect_port(host: &str, preferred: u16) -> io::Result<u16> {
    if preferred != 0 {
        match TcpListener::bind((host, preferred)).await {
            Ok(listener) => return Ok(listener.local_addr()?.port()),
            Err(e) => debug!("Port {} unavailable on {}: {}", preferred, host, e),
        }
    }
    let listener = TcpListener::bind((host, 0)).await?;
    let port = listener.local_addr()?.port();
    debug!("Detected free port {} on {}", port, host);
    Ok(port)
}
