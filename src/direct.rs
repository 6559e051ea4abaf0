//! Direct-connect resolver used when the connector bypasses the proxy
//! entirely (spec §4.4).

use std::net::SocketAddr;

use crate::error::ConnectError;

/// Resolves `hostname` to a concrete socket address via the host's name
/// resolution facility, requesting TCP stream addresses of any family.
/// The first address returned is used; fails if resolution yields none.
pub async fn resolve(hostname: &str, port: u16) -> Result<SocketAddr, ConnectError> {
    tokio::net::lookup_host((hostname, port))
        .await?
        .next()
        .ok_or(ConnectError::Resolution)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_localhost() {
        let addr = resolve("localhost", 1234).await.unwrap();

        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 1234);
    }
}
