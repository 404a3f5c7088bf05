//! Client stream abstraction for TLS and plain TCP.

use crate::error::ClientError;
use crate::tls::{create_tls_connector, TlsClientConfig};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A byte stream to the server, plain TCP or TLS.
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ClientStream for T {}

pub type BoxedStream = Box<dyn ClientStream>;

/// Opens a TCP connection to `host:port`, upgrading it to TLS when
/// `tls` is set. The whole sequence is bounded by `timeout`.
pub async fn open(
    host: &str,
    port: u16,
    tls: Option<&TlsClientConfig>,
    timeout: Duration,
) -> Result<BoxedStream, ClientError> {
    tokio::time::timeout(timeout, async {
        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true).ok();
        tracing::debug!("TCP connected to {}:{}", host, port);

        let Some(tls) = tls else {
            return Ok::<BoxedStream, ClientError>(Box::new(tcp));
        };

        let (connector, server_name) = create_tls_connector(tls, host)?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
        tracing::debug!("TLS handshake complete");
        Ok::<BoxedStream, ClientError>(Box::new(stream))
    })
    .await
    .map_err(|_| ClientError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_plain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hi").await.unwrap();
        });

        let mut stream = open("127.0.0.1", port, None, Duration::from_secs(5))
            .await
            .unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_refused() {
        // Bind then drop to find a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = open("127.0.0.1", port, None, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }
}
