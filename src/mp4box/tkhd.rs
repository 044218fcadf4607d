use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek, Write};

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, value_u32, value_u8, BoxType, BoxWriter, Error,
    FixedPointU16, FixedPointU8, Mp4Box, ReadBox, Result, WriteBox,
};

pub enum TrackFlag {
    TrackEnabled = 0x000001,
    TrackInMovie = 0x000002,
    // TrackInPreview = 0x000004,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TkhdBox {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub duration: u64,
    pub layer: u16,
    pub alternate_group: u16,

    #[serde(with = "value_u8")]
    pub volume: FixedPointU8,
    pub matrix: Matrix,

    #[serde(with = "value_u32")]
    pub width: FixedPointU16,

    #[serde(with = "value_u32")]
    pub height: FixedPointU16,
}

impl Default for TkhdBox {
    fn default() -> Self {
        Self {
            version: 0,
            flags: TrackFlag::TrackEnabled as u32 | TrackFlag::TrackInMovie as u32,
            creation_time: 0,
            modification_time: 0,
            track_id: 0,
            duration: 0,
            layer: 0,
            alternate_group: 0,
            volume: FixedPointU8::new(1),
            matrix: Matrix::default(),
            width: FixedPointU16::new(0),
            height: FixedPointU16::new(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Matrix {
    pub a: i32,
    pub b: i32,
    pub u: i32,
    pub c: i32,
    pub d: i32,
    pub v: i32,
    pub x: i32,
    pub y: i32,
    pub w: i32,
}

impl std::fmt::Display for Matrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:#x} {:#x} {:#x} {:#x} {:#x} {:#x} {:#x} {:#x} {:#x}",
            self.a, self.b, self.u, self.c, self.d, self.v, self.x, self.y, self.w
        )
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self {
            // unity matrix according to ISO/IEC 14496-12:2005(E)
            a: 0x00010000,
            b: 0,
            u: 0,
            c: 0,
            d: 0x00010000,
            v: 0,
            x: 0,
            y: 0,
            w: 0x40000000,
        }
    }
}

impl Matrix {
    const ONE: i32 = 0x00010000;

    /// Clockwise display rotation in degrees. Only multiples of 90 are representable.
    pub fn rotation(degrees: u16) -> Option<Self> {
        let (a, b, c, d) = match degrees {
            0 => (Self::ONE, 0, 0, Self::ONE),
            90 => (0, Self::ONE, -Self::ONE, 0),
            180 => (-Self::ONE, 0, 0, -Self::ONE),
            270 => (0, -Self::ONE, Self::ONE, 0),
            _ => return None,
        };
        Some(Self {
            a,
            b,
            c,
            d,
            ..Self::default()
        })
    }

    /// The rotation this matrix describes, if it is a pure multiple of 90 degrees.
    pub fn degrees(&self) -> Option<u16> {
        [0, 90, 180, 270]
            .into_iter()
            .find(|degrees| Self::rotation(*degrees).as_ref() == Some(self))
    }

    pub(crate) fn read<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            a: reader.read_i32::<BigEndian>()?,
            b: reader.read_i32::<BigEndian>()?,
            u: reader.read_i32::<BigEndian>()?,
            c: reader.read_i32::<BigEndian>()?,
            d: reader.read_i32::<BigEndian>()?,
            v: reader.read_i32::<BigEndian>()?,
            x: reader.read_i32::<BigEndian>()?,
            y: reader.read_i32::<BigEndian>()?,
            w: reader.read_i32::<BigEndian>()?,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        for value in [
            self.a, self.b, self.u, self.c, self.d, self.v, self.x, self.y, self.w,
        ] {
            writer.write_i32::<BigEndian>(value)?;
        }
        Ok(())
    }
}

impl TkhdBox {
    pub fn set_width(&mut self, width: u16) {
        self.width = FixedPointU16::new(width);
    }

    pub fn set_height(&mut self, height: u16) {
        self.height = FixedPointU16::new(height);
    }
}

impl Mp4Box for TkhdBox {
    fn box_type(&self) -> BoxType {
        BoxType::TkhdBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "creation_time={} track_id={} duration={} layer={} volume={} matrix={} width={} height={}",
            self.creation_time,
            self.track_id,
            self.duration,
            self.layer,
            self.volume.value(),
            self.matrix,
            self.width.value(),
            self.height.value()
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for TkhdBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let (creation_time, modification_time, track_id, _, duration) = if version == 1 {
            (
                reader.read_u64::<BigEndian>()?,
                reader.read_u64::<BigEndian>()?,
                reader.read_u32::<BigEndian>()?,
                reader.read_u32::<BigEndian>()?,
                reader.read_u64::<BigEndian>()?,
            )
        } else if version == 0 {
            (
                reader.read_u32::<BigEndian>()? as u64,
                reader.read_u32::<BigEndian>()? as u64,
                reader.read_u32::<BigEndian>()?,
                reader.read_u32::<BigEndian>()?,
                reader.read_u32::<BigEndian>()? as u64,
            )
        } else {
            return Err(Error::InvalidData("version must be 0 or 1"));
        };
        reader.read_u64::<BigEndian>()?; // reserved
        let layer = reader.read_u16::<BigEndian>()?;
        let alternate_group = reader.read_u16::<BigEndian>()?;
        let volume = FixedPointU8::new_raw(reader.read_u16::<BigEndian>()?);

        reader.read_u16::<BigEndian>()?; // reserved
        let matrix = Matrix::read(reader)?;

        let width = FixedPointU16::new_raw(reader.read_u32::<BigEndian>()?);
        let height = FixedPointU16::new_raw(reader.read_u32::<BigEndian>()?);

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            creation_time,
            modification_time,
            track_id,
            duration,
            layer,
            alternate_group,
            volume,
            matrix,
            width,
            height,
        })
    }
}

impl WriteBox<&mut BoxWriter> for TkhdBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            if self.version == 1 {
                w.write_u64::<BigEndian>(self.creation_time)?;
                w.write_u64::<BigEndian>(self.modification_time)?;
                w.write_u32::<BigEndian>(self.track_id)?;
                w.write_u32::<BigEndian>(0)?; // reserved
                w.write_u64::<BigEndian>(self.duration)?;
            } else if self.version == 0 {
                w.write_u32::<BigEndian>(self.creation_time as u32)?;
                w.write_u32::<BigEndian>(self.modification_time as u32)?;
                w.write_u32::<BigEndian>(self.track_id)?;
                w.write_u32::<BigEndian>(0)?; // reserved
                w.write_u32::<BigEndian>(self.duration as u32)?;
            } else {
                return Err(Error::InvalidData("version must be 0 or 1"));
            }
            w.write_u64::<BigEndian>(0)?; // reserved
            w.write_u16::<BigEndian>(self.layer)?;
            w.write_u16::<BigEndian>(self.alternate_group)?;
            w.write_u16::<BigEndian>(self.volume.raw_value())?;
            w.write_u16::<BigEndian>(0)?; // reserved
            self.matrix.write(w)?;
            w.write_u32::<BigEndian>(self.width.raw_value())?;
            w.write_u32::<BigEndian>(self.height.raw_value())?;
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
    fn test_tkhd_rotated() {
        let mut src_box = TkhdBox {
            track_id: 1,
            duration: 10_000,
            volume: FixedPointU8::new_raw(0),
            matrix: Matrix::rotation(90).unwrap(),
            ..Default::default()
        };
        src_box.set_width(1280);
        src_box.set_height(720);

        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len(), 92);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::TkhdBox);
        let dst_box = TkhdBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
        assert_eq!(dst_box.matrix.degrees(), Some(90));
        assert_eq!(dst_box.width.value(), 1280);
    }

    #[test]
    fn test_rotation_rejects_odd_angles() {
        assert!(Matrix::rotation(45).is_none());
        assert_eq!(Matrix::rotation(0), Some(Matrix::default()));
    }
}
