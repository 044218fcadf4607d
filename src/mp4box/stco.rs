use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};
use std::mem::size_of;

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Error, Mp4Box, ReadBox,
    Result, WriteBox, HEADER_EXT_SIZE, HEADER_SIZE,
};

/// 32-bit chunk offsets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StcoBox {
    pub version: u8,
    pub flags: u32,

    #[serde(skip_serializing)]
    pub entries: Vec<u32>,
}

impl Mp4Box for StcoBox {
    fn box_type(&self) -> BoxType {
        BoxType::StcoBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("entries={}", self.entries.len());
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for StcoBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let header_size = HEADER_SIZE + HEADER_EXT_SIZE;
        let other_size = size_of::<u32>(); // entry_count
        let entry_size = size_of::<u32>(); // chunk_offset
        let entry_count = reader.read_u32::<BigEndian>()?;
        if u64::from(entry_count)
            > size
                .saturating_sub(header_size)
                .saturating_sub(other_size as u64)
                / entry_size as u64
        {
            return Err(Error::InvalidData(
                "stco entry_count indicates more entries than could fit in the box",
            ));
        }
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _i in 0..entry_count {
            let chunk_offset = reader.read_u32::<BigEndian>()?;
            entries.push(chunk_offset);
        }

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            entries,
        })
    }
}

impl WriteBox<&mut BoxWriter> for StcoBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(self.entries.len() as u32)?;
            for chunk_offset in &self.entries {
                w.write_u32::<BigEndian>(*chunk_offset)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

impl std::convert::TryFrom<&Co64Box> for StcoBox {
    type Error = std::num::TryFromIntError;

    fn try_from(co64: &Co64Box) -> std::result::Result<Self, Self::Error> {
        let entries = co64
            .entries
            .iter()
            .copied()
            .map(u32::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            version: 0,
            flags: 0,
            entries,
        })
    }
}

/// 64-bit chunk offsets, used once any offset passes 4 GiB.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Co64Box {
    pub version: u8,
    pub flags: u32,

    #[serde(skip_serializing)]
    pub entries: Vec<u64>,
}

impl Mp4Box for Co64Box {
    fn box_type(&self) -> BoxType {
        BoxType::Co64Box
    }

    fn summary(&self) -> Result<String> {
        let s = format!("entries_count={}", self.entries.len());
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for Co64Box {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let header_size = HEADER_SIZE + HEADER_EXT_SIZE;
        let other_size = size_of::<u32>(); // entry_count
        let entry_size = size_of::<u64>(); // chunk_offset
        let entry_count = reader.read_u32::<BigEndian>()?;
        if u64::from(entry_count)
            > size
                .saturating_sub(header_size)
                .saturating_sub(other_size as u64)
                / entry_size as u64
        {
            return Err(Error::InvalidData(
                "co64 entry_count indicates more entries than could fit in the box",
            ));
        }
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _i in 0..entry_count {
            let chunk_offset = reader.read_u64::<BigEndian>()?;
            entries.push(chunk_offset);
        }

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            entries,
        })
    }
}

impl WriteBox<&mut BoxWriter> for Co64Box {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(self.entries.len() as u32)?;
            for chunk_offset in &self.entries {
                w.write_u64::<BigEndian>(*chunk_offset)?;
            }
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
    fn test_co64_narrows_when_offsets_fit() {
        let co64 = Co64Box {
            entries: vec![48, 1_000_000],
            ..Default::default()
        };
        let stco = StcoBox::try_from(&co64).unwrap();
        assert_eq!(stco.entries, vec![48, 1_000_000]);

        let too_big = Co64Box {
            entries: vec![u32::MAX as u64 + 1],
            ..Default::default()
        };
        assert!(StcoBox::try_from(&too_big).is_err());
    }

    #[test]
    fn test_co64() {
        let src_box = Co64Box {
            entries: vec![267, 1452, u32::MAX as u64 + 9],
            ..Default::default()
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len(), 16 + 3 * 8);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::Co64Box);
        let dst_box = Co64Box::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
    }
}
