use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};
use std::mem::size_of;

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Error, Mp4Box, ReadBox,
    Result, WriteBox, HEADER_EXT_SIZE, HEADER_SIZE,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StszBox {
    pub version: u8,
    pub flags: u32,

    /// Size shared by every sample, or 0 when sizes are listed in `sample_sizes`.
    pub sample_size: u32,
    pub sample_count: u32,

    #[serde(skip_serializing)]
    pub sample_sizes: Vec<u32>,
}

impl StszBox {
    /// Picks the uniform form when every sample has the same size.
    pub fn from_sizes(sizes: Vec<u32>) -> Self {
        let sample_count = sizes.len() as u32;
        match sizes.first() {
            Some(&first) if first > 0 && sizes.iter().all(|&s| s == first) => Self {
                sample_size: first,
                sample_count,
                ..Default::default()
            },
            _ => Self {
                sample_size: 0,
                sample_count,
                sample_sizes: sizes,
                ..Default::default()
            },
        }
    }

    /// Size of the sample at `index` (0-based).
    pub fn size_of(&self, index: usize) -> Option<u32> {
        if self.sample_size > 0 {
            (index < self.sample_count as usize).then_some(self.sample_size)
        } else {
            self.sample_sizes.get(index).copied()
        }
    }
}

impl Mp4Box for StszBox {
    fn box_type(&self) -> BoxType {
        BoxType::StszBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "sample_size={} sample_count={} sample_sizes={}",
            self.sample_size,
            self.sample_count,
            self.sample_sizes.len()
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for StszBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let header_size = HEADER_SIZE + HEADER_EXT_SIZE;
        let other_size = size_of::<u32>() + size_of::<u32>(); // sample_size + sample_count
        let sample_size = reader.read_u32::<BigEndian>()?;
        let stsz_item_size = if sample_size == 0 {
            size_of::<u32>() // entry_size
        } else {
            0
        };
        let sample_count = reader.read_u32::<BigEndian>()?;
        let mut sample_sizes = Vec::new();
        if sample_size == 0 {
            if u64::from(sample_count)
                > size
                    .saturating_sub(header_size)
                    .saturating_sub(other_size as u64)
                    / stsz_item_size as u64
            {
                return Err(Error::InvalidData(
                    "stsz sample_count indicates more values than could fit in the box",
                ));
            }
            sample_sizes.reserve(sample_count as usize);
            for _ in 0..sample_count {
                let sample_number = reader.read_u32::<BigEndian>()?;
                sample_sizes.push(sample_number);
            }
        }

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            sample_size,
            sample_count,
            sample_sizes,
        })
    }
}

impl WriteBox<&mut BoxWriter> for StszBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(self.sample_size)?;
            w.write_u32::<BigEndian>(self.sample_count)?;
            if self.sample_size == 0 {
                if self.sample_sizes.len() != self.sample_count as usize {
                    return Err(Error::InvalidData(
                        "stsz sample_count does not match the listed sizes",
                    ));
                }
                for size in &self.sample_sizes {
                    w.write_u32::<BigEndian>(*size)?;
                }
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_collapse() {
        let stsz = StszBox::from_sizes(vec![417; 5]);
        assert_eq!(stsz.sample_size, 417);
        assert_eq!(stsz.sample_count, 5);
        assert!(stsz.sample_sizes.is_empty());
        assert_eq!(stsz.size_of(4), Some(417));
        assert_eq!(stsz.size_of(5), None);

        let stsz = StszBox::from_sizes(vec![1, 2, 2]);
        assert_eq!(stsz.sample_size, 0);
        assert_eq!(stsz.size_of(1), Some(2));

        let empty = StszBox::from_sizes(Vec::new());
        assert_eq!(empty.sample_size, 0);
        assert_eq!(empty.sample_count, 0);
    }
}
