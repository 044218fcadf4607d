use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek, Write};

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes, skip_bytes_to, tkhd, value_u32, value_u8, BoxType,
    BoxWriter, Error, FixedPointU16, FixedPointU8, Mp4Box, ReadBox, Result, WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MvhdBox {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,

    #[serde(with = "value_u32")]
    pub rate: FixedPointU16,
    #[serde(with = "value_u8")]
    pub volume: FixedPointU8,

    pub matrix: tkhd::Matrix,

    pub next_track_id: u32,
}

impl Default for MvhdBox {
    fn default() -> Self {
        Self {
            version: 0,
            flags: 0,
            creation_time: 0,
            modification_time: 0,
            timescale: 1000,
            duration: 0,
            rate: FixedPointU16::new(1),
            matrix: tkhd::Matrix::default(),
            volume: FixedPointU8::new(1),
            next_track_id: 1,
        }
    }
}

impl Mp4Box for MvhdBox {
    fn box_type(&self) -> BoxType {
        BoxType::MvhdBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "creation_time={} timescale={} duration={} rate={} volume={}, matrix={}, next_track_id={}",
            self.creation_time,
            self.timescale,
            self.duration,
            self.rate.value(),
            self.volume.value(),
            self.matrix,
            self.next_track_id
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for MvhdBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let (creation_time, modification_time, timescale, duration) = if version == 1 {
            (
                reader.read_u64::<BigEndian>()?,
                reader.read_u64::<BigEndian>()?,
                reader.read_u32::<BigEndian>()?,
                reader.read_u64::<BigEndian>()?,
            )
        } else if version == 0 {
            (
                reader.read_u32::<BigEndian>()? as u64,
                reader.read_u32::<BigEndian>()? as u64,
                reader.read_u32::<BigEndian>()?,
                reader.read_u32::<BigEndian>()? as u64,
            )
        } else {
            return Err(Error::InvalidData("version must be 0 or 1"));
        };
        let rate = FixedPointU16::new_raw(reader.read_u32::<BigEndian>()?);

        let volume = FixedPointU8::new_raw(reader.read_u16::<BigEndian>()?);

        reader.read_u16::<BigEndian>()?; // reserved = 0

        reader.read_u64::<BigEndian>()?; // reserved = 0

        let matrix = tkhd::Matrix::read(reader)?;

        skip_bytes(reader, 24)?; // pre_defined = 0

        let next_track_id = reader.read_u32::<BigEndian>()?;

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
            rate,
            volume,
            matrix,
            next_track_id,
        })
    }
}

impl WriteBox<&mut BoxWriter> for MvhdBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            if self.version == 1 {
                w.write_u64::<BigEndian>(self.creation_time)?;
                w.write_u64::<BigEndian>(self.modification_time)?;
                w.write_u32::<BigEndian>(self.timescale)?;
                w.write_u64::<BigEndian>(self.duration)?;
            } else if self.version == 0 {
                w.write_u32::<BigEndian>(self.creation_time as u32)?;
                w.write_u32::<BigEndian>(self.modification_time as u32)?;
                w.write_u32::<BigEndian>(self.timescale)?;
                w.write_u32::<BigEndian>(self.duration as u32)?;
            } else {
                return Err(Error::InvalidData("version must be 0 or 1"));
            }
            w.write_u32::<BigEndian>(self.rate.raw_value())?;
            w.write_u16::<BigEndian>(self.volume.raw_value())?;
            w.write_u16::<BigEndian>(0)?; // reserved
            w.write_u64::<BigEndian>(0)?; // reserved
            self.matrix.write(w)?;
            w.write_all(&[0u8; 24])?; // pre_defined
            w.write_u32::<BigEndian>(self.next_track_id)?;
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
    fn test_mvhd_versions() {
        for (version, duration) in [(0, 634_634), (1, u32::MAX as u64 + 5)] {
            let src_box = MvhdBox {
                version,
                creation_time: 100,
                modification_time: 200,
                duration,
                next_track_id: 3,
                ..Default::default()
            };
            let mut writer = BoxWriter::new();
            writer.write_child(&src_box).unwrap();
            let buf = writer.into_inner().unwrap();
            assert_eq!(buf.len(), if version == 1 { 120 } else { 108 });

            let mut reader = Cursor::new(&buf);
            let header = BoxHeader::read(&mut reader).unwrap();
            assert_eq!(header.name, BoxType::MvhdBox);
            let dst_box = MvhdBox::read_box(&mut reader, header.size).unwrap();
            assert_eq!(src_box, dst_box);
        }
    }
}
