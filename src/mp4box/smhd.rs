use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Mp4Box, ReadBox, Result,
    WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SmhdBox {
    pub version: u8,
    pub flags: u32,

    /// 8.8 fixed point stereo balance, 0 is centered.
    pub balance: i16,
}

impl Mp4Box for SmhdBox {
    fn box_type(&self) -> BoxType {
        BoxType::SmhdBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("balance={}", self.balance >> 8);
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for SmhdBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let balance = reader.read_i16::<BigEndian>()?;

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            balance,
        })
    }
}

impl WriteBox<&mut BoxWriter> for SmhdBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_i16::<BigEndian>(self.balance)?;
            w.write_u16::<BigEndian>(0)?; // reserved
            Ok(())
        })?;
        Ok(())
    }
}
