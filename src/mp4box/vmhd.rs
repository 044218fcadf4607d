use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Mp4Box, ReadBox, Result,
    WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmhdBox {
    pub version: u8,
    pub flags: u32,
    pub graphics_mode: u16,
    pub op_color: RgbColor,
}

impl Default for VmhdBox {
    fn default() -> Self {
        Self {
            version: 0,
            // Always 1 for video media headers.
            flags: 1,
            graphics_mode: 0,
            op_color: RgbColor::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RgbColor {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

impl Mp4Box for VmhdBox {
    fn box_type(&self) -> BoxType {
        BoxType::VmhdBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "graphics_mode={} op_color={}{}{}",
            self.graphics_mode, self.op_color.red, self.op_color.green, self.op_color.blue
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for VmhdBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let graphics_mode = reader.read_u16::<BigEndian>()?;
        let op_color = RgbColor {
            red: reader.read_u16::<BigEndian>()?,
            green: reader.read_u16::<BigEndian>()?,
            blue: reader.read_u16::<BigEndian>()?,
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            graphics_mode,
            op_color,
        })
    }
}

impl WriteBox<&mut BoxWriter> for VmhdBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u16::<BigEndian>(self.graphics_mode)?;
            w.write_u16::<BigEndian>(self.op_color.red)?;
            w.write_u16::<BigEndian>(self.op_color.green)?;
            w.write_u16::<BigEndian>(self.op_color.blue)?;
            Ok(())
        })?;
        Ok(())
    }
}
