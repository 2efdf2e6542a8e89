//! Content-Length framing for a duplex byte stream.
//!
//! Every message travels as:
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```
//! The reader and writer halves are independent so the read side can live on
//! a dedicated thread while writes stay serialised behind a lock.

use std::io::{self, BufRead, Read, Write};

use serde::Serialize;
use serde_json::Value;

use super::error::TransportError;

const CONTENT_LENGTH: &str = "Content-Length";

/// Largest frame body accepted from a server.
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Decodes framed messages from a buffered byte stream.
pub struct FrameReader<R> {
    reader: R,
}

impl<R: BufRead> FrameReader<R> {
    /// Wraps a buffered reader.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads one frame body, blocking until it is complete.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnexpectedEof`] when the stream ends, even
    /// between frames, a header error when the header block is malformed and
    /// [`TransportError::FrameTooLarge`] when the announced length exceeds
    /// [`MAX_CONTENT_LENGTH`].
    pub fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let content_length = self.read_headers()?;
        if content_length > MAX_CONTENT_LENGTH {
            return Err(TransportError::FrameTooLarge {
                length: content_length,
                limit: MAX_CONTENT_LENGTH,
            });
        }
        // The buffer grows with the bytes that actually arrive.
        let mut content = Vec::new();
        (&mut self.reader)
            .take(content_length as u64)
            .read_to_end(&mut content)
            .map_err(eof_aware)?;
        if content.len() < content_length {
            return Err(TransportError::UnexpectedEof);
        }
        Ok(content)
    }

    /// Reads one frame and parses its body as JSON.
    ///
    /// # Errors
    ///
    /// Propagates framing errors and returns [`TransportError::Body`] for
    /// bodies that are not valid JSON.
    pub fn read_message(&mut self) -> Result<Value, TransportError> {
        let body = self.read_frame()?;
        serde_json::from_slice(&body).map_err(TransportError::Body)
    }

    fn read_headers(&mut self) -> Result<usize, TransportError> {
        let mut content_length: Option<usize> = None;

        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line).map_err(eof_aware)?;
            if bytes_read == 0 {
                return Err(TransportError::UnexpectedEof);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                // Blank line ends the header block.
                break;
            }

            if let Some(length) = parse_header(trimmed)? {
                content_length = Some(length);
            }
        }

        content_length.ok_or(TransportError::MissingContentLength)
    }
}

fn parse_header(line: &str) -> Result<Option<usize>, TransportError> {
    let invalid = || TransportError::InvalidHeader {
        line: line.to_owned(),
    };
    let (name, value) = line.split_once(':').ok_or_else(invalid)?;
    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        // Other headers, e.g. Content-Type, carry nothing we use.
        return Ok(None);
    }
    value.trim().parse().map(Some).map_err(|_| invalid())
}

fn eof_aware(error: io::Error) -> TransportError {
    if error.kind() == io::ErrorKind::UnexpectedEof {
        TransportError::UnexpectedEof
    } else {
        TransportError::Io(error)
    }
}

/// Encodes framed messages onto a byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps a writer. Each frame is flushed once written.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one frame containing `body`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if writing or flushing fails.
    pub fn send(&mut self, body: &[u8]) -> Result<(), TransportError> {
        let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes())?;
        self.writer.write_all(body)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Serialises `message` as JSON and writes it as one frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Body`] if serialisation fails and
    /// [`TransportError::Io`] if writing fails.
    pub fn write_message<T: Serialize>(&mut self, message: &T) -> Result<(), TransportError> {
        let body = serde_json::to_vec(message).map_err(TransportError::Body)?;
        self.send(&body)
    }

    /// Mutable access to the underlying stream, bypassing framing.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Consumes the writer, returning the underlying stream.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}
