//! Byte-stream endpoints the host reads from and writes to.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::types::ServiceResult;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected pair of input and output streams.
pub struct Channel {
    reader: BoxedReader,
    writer: BoxedWriter,
    description: String,
}

impl Channel {
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            description: "streams".to_string(),
        }
    }

    /// stdin/stdout. Nothing else may write to stdout once the host runs.
    pub fn stdio() -> Self {
        Self::from_streams(tokio::io::stdin(), tokio::io::stdout()).described("stdio")
    }

    /// Bind `path`, wait for a single client, and use that connection.
    #[cfg(unix)]
    pub async fn accept_unix(path: impl AsRef<std::path::Path>) -> ServiceResult<Self> {
        use tokio::net::UnixListener;

        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        tracing::info!("Waiting for client on {}", path.display());
        let (stream, _addr) = listener.accept().await?;
        tracing::info!("Client connected on {}", path.display());

        let (reader, writer) = stream.into_split();
        Ok(Self::from_streams(reader, writer).described(format!("pipe {}", path.display())))
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn into_parts(self) -> (BoxedReader, BoxedWriter) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_duplex_parts_carry_bytes() {
        let (client, server) = tokio::io::duplex(64);
        let (server_read, server_write) = tokio::io::split(server);
        let channel = Channel::from_streams(server_read, server_write).described("duplex");
        assert_eq!(channel.description(), "duplex");

        let (mut reader, mut writer) = channel.into_parts();
        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        writer.write_all(b"pong").await.unwrap();
        client_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_accept_unix_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqltools.sock");
        std::fs::write(&path, b"stale").unwrap();

        let accept_path = path.clone();
        let server = tokio::spawn(async move { Channel::accept_unix(accept_path).await });

        let mut client = loop {
            match tokio::net::UnixStream::connect(&path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };

        let channel = server.await.unwrap().unwrap();
        let (mut reader, _writer) = channel.into_parts();
        client.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }
}
