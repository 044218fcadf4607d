use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};
use std::mem::size_of;

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Error, Mp4Box, ReadBox,
    Result, WriteBox, HEADER_EXT_SIZE, HEADER_SIZE,
};

/// Sync samples. Absent from the `stbl` when every sample is a sync sample.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StssBox {
    pub version: u8,
    pub flags: u32,

    /// 1-based sample numbers, strictly increasing.
    #[serde(skip_serializing)]
    pub entries: Vec<u32>,
}

impl Mp4Box for StssBox {
    fn box_type(&self) -> BoxType {
        BoxType::StssBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("entries={}", self.entries.len());
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for StssBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let header_size = HEADER_SIZE + HEADER_EXT_SIZE;
        let other_size = size_of::<u32>(); // entry_count
        let entry_size = size_of::<u32>(); // sample_number
        let entry_count = reader.read_u32::<BigEndian>()?;
        if u64::from(entry_count)
            > size
                .saturating_sub(header_size)
                .saturating_sub(other_size as u64)
                / entry_size as u64
        {
            return Err(Error::InvalidData(
                "stss entry_count indicates more entries than could fit in the box",
            ));
        }
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _i in 0..entry_count {
            let sample_number = reader.read_u32::<BigEndian>()?;
            entries.push(sample_number);
        }

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            entries,
        })
    }
}

impl WriteBox<&mut BoxWriter> for StssBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(self.entries.len() as u32)?;
            for sample_number in &self.entries {
                w.write_u32::<BigEndian>(*sample_number)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}
