//! In-memory box serialization with back-patched sizes.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::Write;

use crate::error::{CapacityOverflow, SessionStateError};
use crate::mp4box::{BoxType, WriteBox, HEADER_SIZE};
use crate::Result;

#[derive(Debug, Clone, Copy)]
struct OpenBox {
    typ: BoxType,
    start: usize,
    large: bool,
}

/// Serializes nested boxes into a growing buffer.
///
/// Every [`BoxWriter::begin`] reserves a 32-bit size field and pushes the box
/// onto a patch stack; [`BoxWriter::end`] pops it and writes the final size in
/// place. A box that outgrows the 32-bit field is escalated to the 64-bit
/// `largesize` form when it is closed.
///
/// `BoxWriter` implements [`std::io::Write`], so box fields are written with
/// `byteorder`'s [`WriteBytesExt`].
#[derive(Debug)]
pub struct BoxWriter {
    buf: Vec<u8>,
    open: Vec<OpenBox>,
    compact_limit: u64,
}

impl Default for BoxWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxWriter {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            open: Vec::new(),
            compact_limit: u32::MAX as u64,
        }
    }

    /// Lowers the largest size written in the compact header form.
    #[cfg(test)]
    pub(crate) fn with_compact_limit(compact_limit: u64) -> Self {
        Self {
            compact_limit,
            ..Self::new()
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of boxes that were opened but not closed yet.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Opens a box. Its size is filled in by the matching [`Self::end`].
    pub fn begin(&mut self, typ: BoxType) -> Result<()> {
        let start = self.buf.len();
        self.buf.write_u32::<BigEndian>(0)?;
        self.buf.write_u32::<BigEndian>(typ.into())?;
        self.open.push(OpenBox {
            typ,
            start,
            large: false,
        });
        Ok(())
    }

    /// Opens a box that always uses the 64-bit `largesize` header.
    pub fn begin_large(&mut self, typ: BoxType) -> Result<()> {
        let start = self.buf.len();
        self.buf.write_u32::<BigEndian>(1)?;
        self.buf.write_u32::<BigEndian>(typ.into())?;
        self.buf.write_u64::<BigEndian>(0)?;
        self.open.push(OpenBox {
            typ,
            start,
            large: true,
        });
        Ok(())
    }

    /// Opens a full box: a box followed by an 8-bit version and 24-bit flags.
    pub fn begin_full(&mut self, typ: BoxType, version: u8, flags: u32) -> Result<()> {
        self.begin(typ)?;
        self.write_u8(version)?;
        self.write_u24::<BigEndian>(flags)?;
        Ok(())
    }

    /// Closes the innermost open box and returns its total size.
    pub fn end(&mut self) -> Result<u64> {
        let open = self.open.pop().ok_or(SessionStateError::NoOpenBox)?;
        let size = (self.buf.len() - open.start) as u64;

        if open.large {
            BigEndian::write_u64(&mut self.buf[open.start + 8..open.start + 16], size);
            return Ok(size);
        }

        if size <= self.compact_limit {
            BigEndian::write_u32(&mut self.buf[open.start..open.start + 4], size as u32);
            return Ok(size);
        }

        // Splice a largesize field in behind the type code. Boxes nested in this
        // one are already closed, so no other patch point moves.
        let size = size
            .checked_add(8)
            .ok_or(CapacityOverflow::BoxSize(open.typ))?;
        let type_end = open.start + HEADER_SIZE as usize;
        self.buf
            .splice(type_end..type_end, size.to_be_bytes().iter().copied());
        BigEndian::write_u32(&mut self.buf[open.start..open.start + 4], 1);
        log::trace!("escalated {} box to a 64-bit size of {size} bytes", open.typ);
        Ok(size)
    }

    /// Writes a complete box, with `f` producing its payload.
    pub fn write_box<F>(&mut self, typ: BoxType, f: F) -> Result<u64>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.begin(typ)?;
        f(self)?;
        self.end()
    }

    /// Writes a complete full box, with `f` producing the payload after version and flags.
    pub fn write_full_box<F>(&mut self, typ: BoxType, version: u8, flags: u32, f: F) -> Result<u64>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.begin_full(typ, version, flags)?;
        f(self)?;
        self.end()
    }

    /// Writes a child box described by a box struct.
    pub fn write_child<B>(&mut self, child: &B) -> Result<()>
    where
        B: for<'a> WriteBox<&'a mut BoxWriter>,
    {
        child.write_box(self)
    }

    /// Returns the serialized bytes. Fails if a box is still open.
    pub fn into_inner(self) -> Result<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(SessionStateError::UnclosedBox.into());
        }
        Ok(self.buf)
    }
}

impl Write for BoxWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::BoxHeader;
    use crate::Error;

    #[test]
    fn nested_boxes_get_their_sizes() {
        let mut w = BoxWriter::new();
        w.write_box(BoxType::MoovBox, |w| {
            w.write_full_box(BoxType::MvhdBox, 0, 0, |w| {
                w.write_u32::<BigEndian>(7)?;
                Ok(())
            })?;
            w.write_box(BoxType::FreeBox, |_| Ok(()))?;
            Ok(())
        })
        .unwrap();
        let bytes = w.into_inner().unwrap();

        assert_eq!(bytes.len(), 8 + 16 + 8);
        assert_eq!(&bytes[0..8], &[0, 0, 0, 32, b'm', b'o', b'o', b'v']);
        assert_eq!(&bytes[8..16], &[0, 0, 0, 16, b'm', b'v', b'h', b'd']);
        assert_eq!(&bytes[16..24], &[0, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(&bytes[24..32], &[0, 0, 0, 8, b'f', b'r', b'e', b'e']);
    }

    #[test]
    fn oversized_box_escalates_to_largesize() {
        let mut w = BoxWriter::with_compact_limit(16);
        w.write_box(BoxType::MoovBox, |w| {
            w.write_box(BoxType::FreeBox, |w| {
                w.write_all(&[0xAB; 4])?;
                Ok(())
            })?;
            w.write_box(BoxType::MdatBox, |w| {
                w.write_all(&[0xCD; 20])?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();
        let bytes = w.into_inner().unwrap();

        // free stays compact (12 bytes), mdat grows to 8 + 8 + 20, moov wraps both in a large header.
        assert_eq!(bytes.len(), 16 + 12 + 36);
        assert_eq!(&bytes[0..8], &[0, 0, 0, 1, b'm', b'o', b'o', b'v']);
        assert_eq!(u64::from_be_bytes(bytes[8..16].try_into().unwrap()), 64);
        assert_eq!(&bytes[16..20], &[0, 0, 0, 12]);

        let mdat = &bytes[28..];
        let header = BoxHeader::read(&mut &mdat[..]).unwrap();
        assert_eq!(header.name, BoxType::MdatBox);
        assert_eq!(header.size + 8, 36);
        assert_eq!(&mdat[16..], &[0xCD; 20]);
    }

    #[test]
    fn large_header_is_patched() {
        let mut w = BoxWriter::new();
        w.begin_large(BoxType::MdatBox).unwrap();
        w.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(w.end().unwrap(), 19);
        let bytes = w.into_inner().unwrap();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert_eq!(u64::from_be_bytes(bytes[8..16].try_into().unwrap()), 19);
    }

    #[test]
    fn unbalanced_boxes_are_rejected() {
        let mut w = BoxWriter::new();
        assert!(matches!(
            w.end(),
            Err(Error::SessionState(SessionStateError::NoOpenBox))
        ));

        w.begin(BoxType::MoovBox).unwrap();
        assert_eq!(w.depth(), 1);
        assert!(matches!(
            w.into_inner(),
            Err(Error::SessionState(SessionStateError::UnclosedBox))
        ));
    }
}
