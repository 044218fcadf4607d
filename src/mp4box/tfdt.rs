use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Error, Mp4Box, ReadBox,
    Result, WriteBox,
};

/// Track fragment decode time: decode time of the first sample of the fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TfdtBox {
    pub version: u8,
    pub flags: u32,
    pub base_media_decode_time: u64,
}

impl TfdtBox {
    /// Always the 64-bit form, so long recordings cannot wrap.
    pub fn new(base_media_decode_time: u64) -> Self {
        Self {
            version: 1,
            flags: 0,
            base_media_decode_time,
        }
    }
}

impl Mp4Box for TfdtBox {
    fn box_type(&self) -> BoxType {
        BoxType::TfdtBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("base_media_decode_time={}", self.base_media_decode_time);
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for TfdtBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let base_media_decode_time = if version == 1 {
            reader.read_u64::<BigEndian>()?
        } else if version == 0 {
            reader.read_u32::<BigEndian>()? as u64
        } else {
            return Err(Error::InvalidData("version must be 0 or 1"));
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            base_media_decode_time,
        })
    }
}

impl WriteBox<&mut BoxWriter> for TfdtBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            if self.version == 1 {
                w.write_u64::<BigEndian>(self.base_media_decode_time)?;
            } else {
                let time = u32::try_from(self.base_media_decode_time)
                    .map_err(|_| Error::InvalidData("tfdt version 0 time exceeds 32 bits"))?;
                w.write_u32::<BigEndian>(time)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}
