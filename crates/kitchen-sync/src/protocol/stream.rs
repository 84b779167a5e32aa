//! Length-free framed command channel over a byte pipe.
//!
//! The codec's array framing is the envelope: there is no separate length
//! prefix. The reader buffers input and retries a whole-value decode until it
//! completes, so a failed decode never consumes partial input.

use std::io::Cursor;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{decode_value, pack, pack_array_length, pack_bytes, CodecError, PackedValue};
use crate::error::{Result, SyncError};

/// How much buffer space to make available before each read.
const READ_CHUNK: usize = 64 * 1024;

/// One decoded command: a name and its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub args: Vec<PackedValue>,
}

impl Command {
    /// Argument at `index`, or a Wire error naming the command.
    pub fn arg(&self, index: usize) -> Result<&PackedValue> {
        self.args.get(index).ok_or_else(|| {
            SyncError::wire(format!(
                "command {} is missing argument {}",
                self.name, index
            ))
        })
    }

    /// Argument at `index` as UTF-8 text.
    pub fn str_arg(&self, index: usize) -> Result<&str> {
        self.arg(index)?.as_str().ok_or_else(|| {
            SyncError::wire(format!(
                "command {} argument {} is not a string",
                self.name, index
            ))
        })
    }

    /// Argument at `index` as an unsigned integer.
    pub fn uint_arg(&self, index: usize) -> Result<u64> {
        self.arg(index)?.as_u64().ok_or_else(|| {
            SyncError::wire(format!(
                "command {} argument {} is not an unsigned integer",
                self.name, index
            ))
        })
    }

    /// Argument at `index` as an array of values (a key tuple, typically).
    pub fn array_arg(&self, index: usize) -> Result<&[PackedValue]> {
        self.arg(index)?.as_array().ok_or_else(|| {
            SyncError::wire(format!(
                "command {} argument {} is not an array",
                self.name, index
            ))
        })
    }
}

/// Bidirectional typed command channel.
pub struct FramedStream<R, W> {
    reader: R,
    writer: W,
    buffer: BytesMut,
}

impl<R, W> FramedStream<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read the next whole value, or `None` on clean EOF at a value boundary.
    pub async fn read_value(&mut self) -> Result<Option<PackedValue>> {
        loop {
            if !self.buffer.is_empty() {
                let mut cursor = Cursor::new(&self.buffer[..]);
                match decode_value(&mut cursor) {
                    Ok(value) => {
                        let consumed = cursor.position() as usize;
                        self.buffer.advance(consumed);
                        return Ok(Some(value));
                    }
                    Err(CodecError::ShortRead) => {} // need more input
                    Err(err) => return Err(SyncError::Codec(err)),
                }
            }
            self.buffer.reserve(READ_CHUNK);
            let read = self.reader.read_buf(&mut self.buffer).await?;
            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(SyncError::ConnectionLost);
            }
        }
    }

    /// Read the next command, or `None` on clean EOF.
    pub async fn read_command(&mut self) -> Result<Option<Command>> {
        let Some(value) = self.read_value().await? else {
            return Ok(None);
        };
        let items = match value {
            PackedValue::Array(items) => items,
            _ => return Err(SyncError::wire("command message is not an array")),
        };
        let mut items = items.into_iter();
        let name = match items.next() {
            Some(PackedValue::Bytes(bytes)) => String::from_utf8(bytes)
                .map_err(|_| SyncError::wire("command name is not UTF-8"))?,
            _ => return Err(SyncError::wire("command message has no name")),
        };
        Ok(Some(Command {
            name,
            args: items.collect(),
        }))
    }

    /// Read a response; the peer disappearing here is always an error.
    pub async fn read_response(&mut self) -> Result<Vec<PackedValue>> {
        match self.read_value().await? {
            Some(PackedValue::Array(values)) => Ok(values),
            Some(_) => Err(SyncError::wire("response message is not an array")),
            None => Err(SyncError::ConnectionLost),
        }
    }

    /// Send one command with its arguments.
    pub async fn write_command(&mut self, name: &str, args: &[PackedValue]) -> Result<()> {
        let mut out = BytesMut::new();
        pack_array_length(&mut out, 1 + args.len());
        pack_bytes(&mut out, name.as_bytes());
        for arg in args {
            pack(&mut out, arg);
        }
        self.writer.write_all(&out).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a response array; an ack is the empty slice.
    pub async fn write_response(&mut self, values: &[PackedValue]) -> Result<()> {
        let mut out = BytesMut::new();
        pack_array_length(&mut out, values.len());
        for value in values {
            pack(&mut out, value);
        }
        self.writer.write_all(&out).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
