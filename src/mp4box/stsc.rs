use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};
use std::mem::size_of;

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Error, Mp4Box, ReadBox,
    Result, WriteBox, HEADER_EXT_SIZE, HEADER_SIZE,
};

/// Sample to chunk: runs of chunks sharing a sample count and sample description.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StscBox {
    pub version: u8,
    pub flags: u32,

    #[serde(skip_serializing)]
    pub entries: Vec<StscEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StscEntry {
    /// 1-based index of the first chunk of the run.
    pub first_chunk: u32,
    pub samples_per_chunk: u32,

    /// 1-based index into the `stsd` entries.
    pub sample_description_index: u32,
}

impl Mp4Box for StscBox {
    fn box_type(&self) -> BoxType {
        BoxType::StscBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("entries={}", self.entries.len());
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for StscBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let header_size = HEADER_SIZE + HEADER_EXT_SIZE;
        let other_size = size_of::<u32>(); // entry_count
        let entry_size = size_of::<u32>() * 3; // first_chunk + samples_per_chunk + sample_description_index
        let entry_count = reader.read_u32::<BigEndian>()?;
        if u64::from(entry_count)
            > size
                .saturating_sub(header_size)
                .saturating_sub(other_size as u64)
                / entry_size as u64
        {
            return Err(Error::InvalidData(
                "stsc entry_count indicates more entries than could fit in the box",
            ));
        }
        let mut entries: Vec<StscEntry> = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let entry = StscEntry {
                first_chunk: reader.read_u32::<BigEndian>()?,
                samples_per_chunk: reader.read_u32::<BigEndian>()?,
                sample_description_index: reader.read_u32::<BigEndian>()?,
            };
            if entry.first_chunk == 0 {
                return Err(Error::InvalidData("stsc first_chunk is 1-based"));
            }
            if entries
                .last()
                .is_some_and(|previous| previous.first_chunk >= entry.first_chunk)
            {
                return Err(Error::InvalidData("stsc runs are not increasing"));
            }
            entries.push(entry);
        }

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            entries,
        })
    }
}

impl WriteBox<&mut BoxWriter> for StscBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(self.entries.len() as u32)?;
            for entry in &self.entries {
                w.write_u32::<BigEndian>(entry.first_chunk)?;
                w.write_u32::<BigEndian>(entry.samples_per_chunk)?;
                w.write_u32::<BigEndian>(entry.sample_description_index)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}
