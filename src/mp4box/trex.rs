use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Mp4Box, ReadBox, Result,
    WriteBox,
};

/// Per-track defaults for samples in movie fragments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TrexBox {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl TrexBox {
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            default_sample_description_index: 1,
            ..Default::default()
        }
    }
}

impl Mp4Box for TrexBox {
    fn box_type(&self) -> BoxType {
        BoxType::TrexBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "track_id={} default_sample_duration={}",
            self.track_id, self.default_sample_duration
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for TrexBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let track_id = reader.read_u32::<BigEndian>()?;
        let default_sample_description_index = reader.read_u32::<BigEndian>()?;
        let default_sample_duration = reader.read_u32::<BigEndian>()?;
        let default_sample_size = reader.read_u32::<BigEndian>()?;
        let default_sample_flags = reader.read_u32::<BigEndian>()?;

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            track_id,
            default_sample_description_index,
            default_sample_duration,
            default_sample_size,
            default_sample_flags,
        })
    }
}

impl WriteBox<&mut BoxWriter> for TrexBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(self.track_id)?;
            w.write_u32::<BigEndian>(self.default_sample_description_index)?;
            w.write_u32::<BigEndian>(self.default_sample_duration)?;
            w.write_u32::<BigEndian>(self.default_sample_size)?;
            w.write_u32::<BigEndian>(self.default_sample_flags)?;
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::BoxHeader;
    use std::io::Cursor;

    #[test]
    fn test_trex() {
        let src_box = TrexBox {
            default_sample_duration: 1000,
            default_sample_flags: 0x0101_0000,
            ..TrexBox::new(2)
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len(), 32);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::TrexBox);
        let dst_box = TrexBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
    }
}
