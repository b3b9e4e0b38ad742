//! Content-Length message framing.
//!
//! ```text
//! Content-Length: 47\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":"1","method":"version"}
//! ```

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::types::{Message, ServiceError, ServiceResult};

const CONTENT_LENGTH: &str = "content-length";

/// Upper bound on a single frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Parse the body of a frame as a message.
pub fn parse_message(body: &str) -> ServiceResult<Message> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::ParseError("Empty message".to_string()));
    }
    Message::deserialize(trimmed)
}

/// Serialize a message into a complete frame.
pub fn frame_message(message: &Message) -> String {
    let body = message.serialize();
    format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
}

/// Reads framed messages from a byte stream.
pub struct MessageReader<R> {
    reader: BufReader<R>,
    max_frame_size: usize,
    line: String,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_size(reader, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(reader: R, max_frame_size: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_size,
            line: String::new(),
        }
    }

    /// Read the next frame body. `Ok(None)` on EOF at a frame boundary.
    pub async fn read_frame(&mut self) -> ServiceResult<Option<String>> {
        let mut content_length: Option<usize> = None;
        let mut seen_header = false;

        loop {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line).await?;
            if read == 0 {
                if seen_header {
                    return Err(ServiceError::Framing(
                        "unexpected end of stream in frame headers".to_string(),
                    ));
                }
                return Ok(None);
            }

            let header = self.line.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                if seen_header {
                    break;
                }
                // Stray separator between frames.
                continue;
            }
            seen_header = true;

            let Some((name, value)) = header.split_once(':') else {
                return Err(ServiceError::Framing(format!(
                    "malformed header line: {header}"
                )));
            };
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let length = value.trim().parse::<usize>().map_err(|_| {
                    ServiceError::Framing(format!("invalid Content-Length: {}", value.trim()))
                })?;
                content_length = Some(length);
            }
        }

        let length = content_length
            .ok_or_else(|| ServiceError::Framing("missing Content-Length header".to_string()))?;
        if length > self.max_frame_size {
            return Err(ServiceError::Framing(format!(
                "frame of {length} bytes exceeds limit of {} bytes",
                self.max_frame_size
            )));
        }

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ServiceError::Framing(format!("stream ended inside a {length} byte frame"))
            } else {
                ServiceError::Io(e)
            }
        })?;

        String::from_utf8(body)
            .map(Some)
            .map_err(|e| ServiceError::ParseError(format!("frame is not valid UTF-8: {e}")))
    }

    /// Read and parse the next message.
    ///
    /// An `Err(ParseError)` leaves the stream positioned at the next frame;
    /// any other error means the stream is unusable.
    pub async fn read_message(&mut self) -> ServiceResult<Option<Message>> {
        match self.read_frame().await? {
            Some(body) => parse_message(&body).map(Some),
            None => Ok(None),
        }
    }
}

/// Writes framed messages to a byte stream.
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_message(&mut self, message: &Message) -> ServiceResult<()> {
        let frame = frame_message(message);
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> ServiceResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
