//! Destinations for muxed bytes.
//!
//! A [`Target`] only moves bytes: it appends, optionally overwrites bytes it
//! already holds, and hands back its result when sealed. All muxing decisions
//! live in [`crate::Muxer`].

use std::io::{Seek, SeekFrom, Write};

use crate::{Error, Result};

pub trait Target {
    /// What [`Target::seal`] hands back: the file bytes, or the inner writer.
    type Output;

    /// Appends `bytes` at the current end.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Overwrites already written bytes starting at `offset`.
    fn patch(&mut self, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Whether [`Target::patch`] is supported.
    fn can_patch(&self) -> bool;

    /// Number of bytes written so far.
    fn position(&self) -> u64;

    /// Finishes writing and returns the output.
    fn seal(self) -> Result<Self::Output>;
}

/// Collects the whole file in memory.
#[derive(Debug, Default, Clone)]
pub struct BufferTarget {
    buf: Vec<u8>,
}

impl BufferTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl Target for BufferTarget {
    type Output = Vec<u8>;

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn patch(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| Error::InvalidData("patch offset out of range"))?;
        let end = start
            .checked_add(bytes.len())
            .filter(|end| *end <= self.buf.len())
            .ok_or(Error::InvalidData("patch extends past the written bytes"))?;
        self.buf[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn can_patch(&self) -> bool {
        true
    }

    fn position(&self) -> u64 {
        self.buf.len() as u64
    }

    fn seal(self) -> Result<Vec<u8>> {
        Ok(self.buf)
    }
}

/// Append-only sink, e.g. a socket or a pipe.
///
/// Bytes are passed on as soon as the muxer produces them. Patching is not
/// available, so only the in-memory and fragmented modes can write to it.
#[derive(Debug)]
pub struct StreamTarget<W: Write> {
    writer: W,
    position: u64,
}

impl<W: Write> StreamTarget<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            position: 0,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

impl<W: Write> Target for StreamTarget<W> {
    type Output = W;

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn patch(&mut self, _offset: u64, _bytes: &[u8]) -> Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "stream targets cannot patch written bytes",
        )
        .into())
    }

    fn can_patch(&self) -> bool {
        false
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seal(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Writes into a seekable writer such as a [`std::fs::File`].
///
/// Patches seek back, overwrite, and return to the end.
#[derive(Debug)]
pub struct SeekTarget<W: Write + Seek> {
    writer: W,
    start: u64,
    position: u64,
}

impl<W: Write + Seek> SeekTarget<W> {
    /// Output starts at the writer's current position.
    pub fn new(mut writer: W) -> Result<Self> {
        let start = writer.stream_position()?;
        Ok(Self {
            writer,
            start,
            position: 0,
        })
    }
}

impl<W: Write + Seek> Target for SeekTarget<W> {
    type Output = W;

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn patch(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() as u64 > self.position {
            return Err(Error::InvalidData("patch extends past the written bytes"));
        }
        self.writer.seek(SeekFrom::Start(self.start + offset))?;
        self.writer.write_all(bytes)?;
        self.writer
            .seek(SeekFrom::Start(self.start + self.position))?;
        Ok(())
    }

    fn can_patch(&self) -> bool {
        true
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seal(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
