//! `Content-Length` framed transport over stdio.

use std::io::{BufRead, Read, Write};
use std::sync::{Mutex, PoisonError};

use super::{Message, Request};
use crate::error::{LanternError, Result};

/// Largest message body accepted from the client.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Reads framed requests from a buffered input stream.
pub struct MessageReader<R> {
    input: R,
    header: String,
}

impl<R: BufRead> MessageReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            header: String::with_capacity(64),
        }
    }

    /// Read the next message. Blocks until a full frame arrives.
    ///
    /// Returns `Ok(None)` on a clean end of input. A frame whose body is not a
    /// valid request yields [`LanternError::Json`]; the stream stays usable and
    /// the caller may keep reading.
    pub fn read_message(&mut self) -> Result<Option<Request>> {
        let mut content_length = None;
        let mut saw_header = false;

        loop {
            self.header.clear();
            if self.input.read_line(&mut self.header)? == 0 {
                if saw_header {
                    return Err(LanternError::Protocol(
                        "Unexpected end of input inside message header".into(),
                    ));
                }
                return Ok(None);
            }

            let line = self.header.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if saw_header {
                    break;
                }
                continue;
            }
            saw_header = true;

            if let Some((name, value)) = line.split_once(':')
                && name.trim().eq_ignore_ascii_case("content-length")
            {
                let length = value.trim().parse::<usize>().map_err(|_| {
                    LanternError::Protocol(format!("Invalid Content-Length: {}", value.trim()))
                })?;
                content_length = Some(length);
            }
        }

        let length = content_length
            .ok_or_else(|| LanternError::Protocol("Missing Content-Length header".into()))?;
        if length > MAX_MESSAGE_SIZE {
            // Drain the oversized body so the next frame starts on a header.
            let skipped = std::io::copy(
                &mut (&mut self.input).take(length as u64),
                &mut std::io::sink(),
            )?;
            return Err(LanternError::Protocol(format!(
                "Message of {} bytes exceeds the {} byte limit ({} bytes skipped)",
                length, MAX_MESSAGE_SIZE, skipped
            )));
        }
        let mut body = vec![0u8; length];
        self.input.read_exact(&mut body)?;

        let request = serde_json::from_slice::<Request>(&body)?;
        Ok(Some(request))
    }
}

/// Sink for outgoing protocol messages.
///
/// Shared between the dispatch loop and the Responder thread, so
/// implementations serialize their own writes.
pub trait MessageWriter: Send + Sync {
    fn write(&self, message: &Message) -> Result<()>;
}

/// Writes `Content-Length` framed messages to any byte sink.
pub struct FramedWriter<W> {
    output: Mutex<W>,
}

impl<W: Write + Send> FramedWriter<W> {
    pub fn new(output: W) -> Self {
        Self {
            output: Mutex::new(output),
        }
    }
}

impl<W: Write + Send> MessageWriter for FramedWriter<W> {
    fn write(&self, message: &Message) -> Result<()> {
        let body = serde_json::to_vec(&message.to_json())?;
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        write!(output, "Content-Length: {}\r\n\r\n", body.len())?;
        output.write_all(&body)?;
        output.flush()?;
        Ok(())
    }
}

/// Collects messages in memory.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryWriter {
    messages: Mutex<Vec<serde_json::Value>>,
}

#[cfg(test)]
impl MemoryWriter {
    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.messages.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl MessageWriter for MemoryWriter {
    fn write(&self, message: &Message) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_json());
        Ok(())
    }
}
