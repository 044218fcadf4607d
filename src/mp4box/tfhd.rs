use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Mp4Box, ReadBox, Result,
    WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct TfhdBox {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
}

impl TfhdBox {
    pub const FLAG_BASE_DATA_OFFSET: u32 = 0x01;
    pub const FLAG_SAMPLE_DESCRIPTION_INDEX: u32 = 0x02;
    pub const FLAG_DEFAULT_SAMPLE_DURATION: u32 = 0x08;
    pub const FLAG_DEFAULT_SAMPLE_SIZE: u32 = 0x10;
    pub const FLAG_DEFAULT_SAMPLE_FLAGS: u32 = 0x20;
    pub const FLAG_DURATION_IS_EMPTY: u32 = 0x10000;
    pub const FLAG_DEFAULT_BASE_IS_MOOF: u32 = 0x20000;

    /// Header for a fragment whose data offsets are relative to the `moof`.
    pub fn moof_relative(track_id: u32, sample_description_index: u32) -> Self {
        Self {
            version: 0,
            flags: Self::FLAG_DEFAULT_BASE_IS_MOOF | Self::FLAG_SAMPLE_DESCRIPTION_INDEX,
            track_id,
            sample_description_index: Some(sample_description_index),
            ..Default::default()
        }
    }

    /// The flags implied by the optional fields that are present.
    fn effective_flags(&self) -> u32 {
        let optional = [
            (self.base_data_offset.is_some(), Self::FLAG_BASE_DATA_OFFSET),
            (
                self.sample_description_index.is_some(),
                Self::FLAG_SAMPLE_DESCRIPTION_INDEX,
            ),
            (
                self.default_sample_duration.is_some(),
                Self::FLAG_DEFAULT_SAMPLE_DURATION,
            ),
            (self.default_sample_size.is_some(), Self::FLAG_DEFAULT_SAMPLE_SIZE),
            (self.default_sample_flags.is_some(), Self::FLAG_DEFAULT_SAMPLE_FLAGS),
        ];
        optional
            .iter()
            .fold(self.flags, |flags, &(present, flag)| {
                if present {
                    flags | flag
                } else {
                    flags & !flag
                }
            })
    }
}

impl Mp4Box for TfhdBox {
    fn box_type(&self) -> BoxType {
        BoxType::TfhdBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("track_id={}", self.track_id);
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for TfhdBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;
        let track_id = reader.read_u32::<BigEndian>()?;
        let base_data_offset = if Self::FLAG_BASE_DATA_OFFSET & flags > 0 {
            Some(reader.read_u64::<BigEndian>()?)
        } else {
            None
        };
        let sample_description_index = if Self::FLAG_SAMPLE_DESCRIPTION_INDEX & flags > 0 {
            Some(reader.read_u32::<BigEndian>()?)
        } else {
            None
        };
        let default_sample_duration = if Self::FLAG_DEFAULT_SAMPLE_DURATION & flags > 0 {
            Some(reader.read_u32::<BigEndian>()?)
        } else {
            None
        };
        let default_sample_size = if Self::FLAG_DEFAULT_SAMPLE_SIZE & flags > 0 {
            Some(reader.read_u32::<BigEndian>()?)
        } else {
            None
        };
        let default_sample_flags = if Self::FLAG_DEFAULT_SAMPLE_FLAGS & flags > 0 {
            Some(reader.read_u32::<BigEndian>()?)
        } else {
            None
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            track_id,
            base_data_offset,
            sample_description_index,
            default_sample_duration,
            default_sample_size,
            default_sample_flags,
        })
    }
}

impl WriteBox<&mut BoxWriter> for TfhdBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.effective_flags(), |w| {
            w.write_u32::<BigEndian>(self.track_id)?;
            if let Some(base_data_offset) = self.base_data_offset {
                w.write_u64::<BigEndian>(base_data_offset)?;
            }
            for value in [
                self.sample_description_index,
                self.default_sample_duration,
                self.default_sample_size,
                self.default_sample_flags,
            ]
            .into_iter()
            .flatten()
            {
                w.write_u32::<BigEndian>(value)?;
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
    fn test_tfhd_moof_relative() {
        let src_box = TfhdBox::moof_relative(1, 2);
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len(), 20);
        assert_eq!(&buf[9..12], &[0x02, 0x00, 0x02]);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::TfhdBox);
        let dst_box = TfhdBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
    }

    #[test]
    fn test_tfhd_flags_follow_fields() {
        let src_box = TfhdBox {
            track_id: 3,
            base_data_offset: Some(1 << 40),
            default_sample_flags: Some(0x0101_0000),
            ..Default::default()
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        let dst_box = TfhdBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(
            dst_box.flags,
            TfhdBox::FLAG_BASE_DATA_OFFSET | TfhdBox::FLAG_DEFAULT_SAMPLE_FLAGS
        );
        assert_eq!(dst_box.base_data_offset, Some(1 << 40));
        assert_eq!(dst_box.default_sample_flags, Some(0x0101_0000));
    }
}
