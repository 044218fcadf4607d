use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};
use std::mem::size_of;

use crate::error::CapacityOverflow;
use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Error, Mp4Box, ReadBox,
    Result, WriteBox, HEADER_EXT_SIZE, HEADER_SIZE,
};

/// Track fragment run: one contiguous run of samples in the fragment's `mdat`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TrunBox {
    pub version: u8,
    pub flags: u32,
    pub sample_count: u32,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,

    #[serde(skip_serializing)]
    pub sample_durations: Vec<u32>,
    #[serde(skip_serializing)]
    pub sample_sizes: Vec<u32>,
    #[serde(skip_serializing)]
    pub sample_flags: Vec<u32>,
    #[serde(skip_serializing)]
    pub sample_cts: Vec<u32>,
}

impl TrunBox {
    pub const FLAG_DATA_OFFSET: u32 = 0x01;
    pub const FLAG_FIRST_SAMPLE_FLAGS: u32 = 0x04;
    pub const FLAG_SAMPLE_DURATION: u32 = 0x100;
    pub const FLAG_SAMPLE_SIZE: u32 = 0x200;
    pub const FLAG_SAMPLE_FLAGS: u32 = 0x400;
    pub const FLAG_SAMPLE_CTS: u32 = 0x800;

    /// `sample_depends_on = 2`: the sample does not depend on others.
    pub const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;

    /// `sample_depends_on = 1` plus `sample_is_non_sync_sample`.
    pub const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

    /// Run carrying an explicit duration, size and flags for every sample.
    pub fn new(data_offset: i32, durations: Vec<u32>, sizes: Vec<u32>, flags: Vec<u32>) -> Result<Self> {
        if durations.len() != sizes.len() || sizes.len() != flags.len() {
            return Err(Error::InvalidData("trun sample columns differ in length"));
        }
        let sample_count =
            u32::try_from(sizes.len()).map_err(|_| CapacityOverflow::EntryCount(sizes.len()))?;
        Ok(Self {
            version: 0,
            flags: Self::FLAG_DATA_OFFSET
                | Self::FLAG_SAMPLE_DURATION
                | Self::FLAG_SAMPLE_SIZE
                | Self::FLAG_SAMPLE_FLAGS,
            sample_count,
            data_offset: Some(data_offset),
            first_sample_flags: None,
            sample_durations: durations,
            sample_sizes: sizes,
            sample_flags: flags,
            sample_cts: Vec::new(),
        })
    }

    pub fn sample_flags_for(is_sync: bool) -> u32 {
        if is_sync {
            Self::SYNC_SAMPLE_FLAGS
        } else {
            Self::NON_SYNC_SAMPLE_FLAGS
        }
    }

    /// Whether the given per-sample flags mark a sync sample.
    pub fn is_sync(sample_flags: u32) -> bool {
        sample_flags & 0x0001_0000 == 0
    }

    /// Serialized size for a run of `sample_count` samples with the given flags.
    pub fn size_for(flags: u32, sample_count: u32) -> u64 {
        let mut sum = HEADER_SIZE + HEADER_EXT_SIZE + 4;
        if Self::FLAG_DATA_OFFSET & flags > 0 {
            sum += 4;
        }
        if Self::FLAG_FIRST_SAMPLE_FLAGS & flags > 0 {
            sum += 4;
        }
        for flag in [
            Self::FLAG_SAMPLE_DURATION,
            Self::FLAG_SAMPLE_SIZE,
            Self::FLAG_SAMPLE_FLAGS,
            Self::FLAG_SAMPLE_CTS,
        ] {
            if flag & flags > 0 {
                sum += 4 * sample_count as u64;
            }
        }
        sum
    }

    fn check_column(&self, flag: u32, column: &[u32]) -> Result<()> {
        if self.flags & flag > 0 && column.len() != self.sample_count as usize {
            return Err(Error::InvalidData(
                "trun sample column does not match sample_count",
            ));
        }
        Ok(())
    }
}

impl Mp4Box for TrunBox {
    fn box_type(&self) -> BoxType {
        BoxType::TrunBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("sample_size={}", self.sample_count);
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for TrunBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let header_size = HEADER_SIZE + HEADER_EXT_SIZE;
        let other_size = size_of::<u32>() // sample_count
            + if Self::FLAG_DATA_OFFSET & flags > 0 { size_of::<i32>() } else { 0 } // data_offset
            + if Self::FLAG_FIRST_SAMPLE_FLAGS & flags > 0 { size_of::<u32>() } else { 0 }; // first_sample_flags
        let sample_size = if Self::FLAG_SAMPLE_DURATION & flags > 0 { size_of::<u32>() } else { 0 } // sample_duration
            + if Self::FLAG_SAMPLE_SIZE & flags > 0 { size_of::<u32>() } else { 0 } // sample_size
            + if Self::FLAG_SAMPLE_FLAGS & flags > 0 { size_of::<u32>() } else { 0 } // sample_flags
            + if Self::FLAG_SAMPLE_CTS & flags > 0 { size_of::<u32>() } else { 0 }; // sample_composition_time_offset

        let sample_count = reader.read_u32::<BigEndian>()?;

        let data_offset = if Self::FLAG_DATA_OFFSET & flags > 0 {
            Some(reader.read_i32::<BigEndian>()?)
        } else {
            None
        };

        let first_sample_flags = if Self::FLAG_FIRST_SAMPLE_FLAGS & flags > 0 {
            Some(reader.read_u32::<BigEndian>()?)
        } else {
            None
        };

        let mut sample_durations = Vec::new();
        let mut sample_sizes = Vec::new();
        let mut sample_flags = Vec::new();
        let mut sample_cts = Vec::new();
        if u64::from(sample_count) * sample_size as u64
            > size
                .saturating_sub(header_size)
                .saturating_sub(other_size as u64)
        {
            return Err(Error::InvalidData(
                "trun sample_count indicates more values than could fit in the box",
            ));
        }
        if Self::FLAG_SAMPLE_DURATION & flags > 0 {
            sample_durations.reserve(sample_count as usize);
        }
        if Self::FLAG_SAMPLE_SIZE & flags > 0 {
            sample_sizes.reserve(sample_count as usize);
        }
        if Self::FLAG_SAMPLE_FLAGS & flags > 0 {
            sample_flags.reserve(sample_count as usize);
        }
        if Self::FLAG_SAMPLE_CTS & flags > 0 {
            sample_cts.reserve(sample_count as usize);
        }

        for _ in 0..sample_count {
            if Self::FLAG_SAMPLE_DURATION & flags > 0 {
                let duration = reader.read_u32::<BigEndian>()?;
                sample_durations.push(duration);
            }

            if Self::FLAG_SAMPLE_SIZE & flags > 0 {
                let sample_size = reader.read_u32::<BigEndian>()?;
                sample_sizes.push(sample_size);
            }

            if Self::FLAG_SAMPLE_FLAGS & flags > 0 {
                let sample_flag = reader.read_u32::<BigEndian>()?;
                sample_flags.push(sample_flag);
            }

            if Self::FLAG_SAMPLE_CTS & flags > 0 {
                let cts = reader.read_u32::<BigEndian>()?;
                sample_cts.push(cts);
            }
        }

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            sample_count,
            data_offset,
            first_sample_flags,
            sample_durations,
            sample_sizes,
            sample_flags,
            sample_cts,
        })
    }
}

impl WriteBox<&mut BoxWriter> for TrunBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        self.check_column(Self::FLAG_SAMPLE_DURATION, &self.sample_durations)?;
        self.check_column(Self::FLAG_SAMPLE_SIZE, &self.sample_sizes)?;
        self.check_column(Self::FLAG_SAMPLE_FLAGS, &self.sample_flags)?;
        self.check_column(Self::FLAG_SAMPLE_CTS, &self.sample_cts)?;

        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(self.sample_count)?;
            if Self::FLAG_DATA_OFFSET & self.flags > 0 {
                w.write_i32::<BigEndian>(self.data_offset.unwrap_or_default())?;
            }
            if Self::FLAG_FIRST_SAMPLE_FLAGS & self.flags > 0 {
                w.write_u32::<BigEndian>(self.first_sample_flags.unwrap_or_default())?;
            }

            for i in 0..self.sample_count as usize {
                if Self::FLAG_SAMPLE_DURATION & self.flags > 0 {
                    w.write_u32::<BigEndian>(self.sample_durations[i])?;
                }
                if Self::FLAG_SAMPLE_SIZE & self.flags > 0 {
                    w.write_u32::<BigEndian>(self.sample_sizes[i])?;
                }
                if Self::FLAG_SAMPLE_FLAGS & self.flags > 0 {
                    w.write_u32::<BigEndian>(self.sample_flags[i])?;
                }
                if Self::FLAG_SAMPLE_CTS & self.flags > 0 {
                    w.write_u32::<BigEndian>(self.sample_cts[i])?;
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
    use crate::mp4box::BoxHeader;
    use std::io::Cursor;

    #[test]
    fn test_trun() {
        let src_box = TrunBox::new(
            120,
            vec![1000, 1000, 1001],
            vec![5000, 300, 280],
            vec![
                TrunBox::sample_flags_for(true),
                TrunBox::sample_flags_for(false),
                TrunBox::sample_flags_for(false),
            ],
        )
        .unwrap();
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len() as u64, TrunBox::size_for(src_box.flags, 3));

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::TrunBox);
        let dst_box = TrunBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
        assert!(TrunBox::is_sync(dst_box.sample_flags[0]));
        assert!(!TrunBox::is_sync(dst_box.sample_flags[1]));
    }

    #[test]
    fn test_trun_rejects_ragged_columns() {
        assert!(TrunBox::new(0, vec![1, 2], vec![3], vec![0, 0]).is_err());

        let trun = TrunBox {
            flags: TrunBox::FLAG_SAMPLE_SIZE,
            sample_count: 2,
            sample_sizes: vec![1],
            ..Default::default()
        };
        let mut writer = BoxWriter::new();
        assert!(writer.write_child(&trun).is_err());
    }
}
