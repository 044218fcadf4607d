use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek, Write};

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes, skip_bytes_to, BoxType, BoxWriter, Error, FourCC,
    Mp4Box, ReadBox, Result, TrackKind, WriteBox, HEADER_EXT_SIZE, HEADER_SIZE,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct HdlrBox {
    pub version: u8,
    pub flags: u32,
    pub handler_type: FourCC,
    pub name: String,
}

impl HdlrBox {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            version: 0,
            flags: 0,
            handler_type: kind.into(),
            name: kind.handler_name().to_owned(),
        }
    }
}

impl Mp4Box for HdlrBox {
    fn box_type(&self) -> BoxType {
        BoxType::HdlrBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("handler_type={} name={}", self.handler_type, self.name);
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for HdlrBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        reader.read_u32::<BigEndian>()?; // pre-defined
        let handler = reader.read_u32::<BigEndian>()?;

        skip_bytes(reader, 12)?; // reserved

        let buf_size = size
            .checked_sub(HEADER_SIZE + HEADER_EXT_SIZE + 20)
            .ok_or(Error::InvalidData("hdlr size too small"))?;

        let mut buf = vec![0u8; buf_size as usize];
        reader.read_exact(&mut buf)?;
        if let Some(end) = buf.iter().position(|&b| b == b'\0') {
            buf.truncate(end);
        }
        let handler_string = String::from_utf8(buf).unwrap_or_default();

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            handler_type: From::from(handler),
            name: handler_string,
        })
    }
}

impl WriteBox<&mut BoxWriter> for HdlrBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(0)?; // pre-defined
            w.write_u32::<BigEndian>((&self.handler_type).into())?;
            w.write_all(&[0u8; 12])?; // reserved
            w.write_all(self.name.as_bytes())?;
            w.write_u8(0)?;
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::BoxHeader;
    use std::convert::TryFrom;
    use std::io::Cursor;

    #[test]
    fn test_hdlr() {
        let src_box = HdlrBox::new(TrackKind::Audio);
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len() as u64, HEADER_SIZE + HEADER_EXT_SIZE + 20 + 13);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::HdlrBox);
        let dst_box = HdlrBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
        assert_eq!(
            TrackKind::try_from(&dst_box.handler_type).unwrap(),
            TrackKind::Audio
        );
    }
}
