use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek, Write};

use crate::mp4box::{
    skip_bytes_to, value_u32, BoxHeader, BoxType, Error, FixedPointU16, Result,
    HEADER_SIZE,
};

/// Bytes of fixed fields in front of the child boxes of a visual sample entry.
pub const VISUAL_SAMPLE_ENTRY_SIZE: u64 = 78;

/// Fields shared by every video sample entry (`avc1`, `hvc1`, `vp09`, `av01`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisualSampleEntry {
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,

    #[serde(with = "value_u32")]
    pub horizresolution: FixedPointU16,

    #[serde(with = "value_u32")]
    pub vertresolution: FixedPointU16,
    pub frame_count: u16,
    pub compressorname: String,
    pub depth: u16, // This is usually 24, even for HDR with bit_depth=10
}

impl Default for VisualSampleEntry {
    fn default() -> Self {
        Self {
            data_reference_index: 1,
            width: 0,
            height: 0,
            horizresolution: FixedPointU16::new(0x48),
            vertresolution: FixedPointU16::new(0x48),
            frame_count: 1,
            compressorname: String::new(),
            depth: 0x0018,
        }
    }
}

impl VisualSampleEntry {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub(crate) fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader.read_u32::<BigEndian>()?; // reserved
        reader.read_u16::<BigEndian>()?; // reserved
        let data_reference_index = reader.read_u16::<BigEndian>()?;

        reader.read_u32::<BigEndian>()?; // pre-defined, reserved
        reader.read_u64::<BigEndian>()?; // pre-defined
        reader.read_u32::<BigEndian>()?; // pre-defined
        let width = reader.read_u16::<BigEndian>()?;
        let height = reader.read_u16::<BigEndian>()?;
        let horizresolution = FixedPointU16::new_raw(reader.read_u32::<BigEndian>()?);
        let vertresolution = FixedPointU16::new_raw(reader.read_u32::<BigEndian>()?);
        reader.read_u32::<BigEndian>()?; // reserved
        let frame_count = reader.read_u16::<BigEndian>()?;

        // Pascal string padded to 32 bytes.
        let mut name = [0u8; 32];
        reader.read_exact(&mut name)?;
        let name_len = (name[0] as usize).min(31);
        let compressorname = String::from_utf8_lossy(&name[1..1 + name_len]).into_owned();

        let depth = reader.read_u16::<BigEndian>()?;
        reader.read_i16::<BigEndian>()?; // pre-defined

        Ok(Self {
            data_reference_index,
            width,
            height,
            horizresolution,
            vertresolution,
            frame_count,
            compressorname,
            depth,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(0)?; // reserved
        writer.write_u16::<BigEndian>(0)?; // reserved
        writer.write_u16::<BigEndian>(self.data_reference_index)?;

        writer.write_u32::<BigEndian>(0)?; // pre-defined, reserved
        writer.write_u64::<BigEndian>(0)?; // pre-defined
        writer.write_u32::<BigEndian>(0)?; // pre-defined
        writer.write_u16::<BigEndian>(self.width)?;
        writer.write_u16::<BigEndian>(self.height)?;
        writer.write_u32::<BigEndian>(self.horizresolution.raw_value())?;
        writer.write_u32::<BigEndian>(self.vertresolution.raw_value())?;
        writer.write_u32::<BigEndian>(0)?; // reserved
        writer.write_u16::<BigEndian>(self.frame_count)?;

        let mut name = [0u8; 32];
        let bytes = self.compressorname.as_bytes();
        let name_len = bytes.len().min(31);
        name[0] = name_len as u8;
        name[1..1 + name_len].copy_from_slice(&bytes[..name_len]);
        writer.write_all(&name)?;

        writer.write_u16::<BigEndian>(self.depth)?;
        writer.write_i16::<BigEndian>(-1)?; // pre-defined
        Ok(())
    }
}

/// Walks the child boxes of a sample entry ending at `end` and reads the
/// first one of type `config` with `read`. Other children are skipped.
pub(crate) fn read_config_child<R, T, F>(
    reader: &mut R,
    end: u64,
    parent_size: u64,
    config: BoxType,
    mut read: F,
) -> Result<Option<T>>
where
    R: Read + Seek,
    F: FnMut(&mut R, u64) -> Result<T>,
{
    let mut found = None;
    loop {
        let current = reader.stream_position()?;
        if current + HEADER_SIZE > end {
            break;
        }
        let header = BoxHeader::read(reader)?;
        let BoxHeader { name, size: s } = header;
        if s > parent_size || s < HEADER_SIZE {
            return Err(Error::InvalidData(
                "sample entry contains a box with an invalid size",
            ));
        }
        if name == config && found.is_none() {
            found = Some(read(reader, s)?);
        }
        skip_bytes_to(reader, current + s)?;
    }
    skip_bytes_to(reader, end)?;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_visual_sample_entry_layout() {
        let entry = VisualSampleEntry {
            compressorname: "re_mp4_mux".to_owned(),
            ..VisualSampleEntry::new(1280, 720)
        };
        let mut buf = Vec::new();
        entry.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, VISUAL_SAMPLE_ENTRY_SIZE);

        let parsed = VisualSampleEntry::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, entry);
    }
}
