use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek, Write};

use crate::mp4box::{
    box_start, read_box_header_ext, read_to_end_of_box, skip_box, skip_bytes_to, BoxHeader,
    BoxType, BoxWriter, Error, Mp4Box, ReadBox, Result, WriteBox,
};

/// Data information: where the media data of a track lives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DinfBox {
    pub dref: DrefBox,
}

impl Mp4Box for DinfBox {
    fn box_type(&self) -> BoxType {
        BoxType::DinfBox
    }

    fn summary(&self) -> Result<String> {
        Ok(format!("entries={}", self.dref.data_entries.len()))
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for DinfBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let mut dref = None;

        let mut current = reader.stream_position()?;
        let end = start + size;
        while current < end {
            // Get box header.
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "dinf box contains a box with a larger size than it",
                ));
            }

            match name {
                BoxType::DrefBox => {
                    dref = Some(DrefBox::read_box(reader, s)?);
                }
                _ => {
                    log::warn!("skipping unexpected {name} box inside dinf");
                    skip_box(reader, s)?;
                }
            }

            current = reader.stream_position()?;
        }

        let Some(dref) = dref else {
            return Err(Error::BoxNotFound(BoxType::DrefBox));
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self { dref })
    }
}

impl WriteBox<&mut BoxWriter> for DinfBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| w.write_child(&self.dref))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrefBox {
    pub version: u8,
    pub flags: u32,
    pub data_entries: Vec<UrlBox>,
}

impl Default for DrefBox {
    fn default() -> Self {
        Self {
            version: 0,
            flags: 0,
            data_entries: vec![UrlBox::default()],
        }
    }
}

impl Mp4Box for DrefBox {
    fn box_type(&self) -> BoxType {
        BoxType::DrefBox
    }

    fn summary(&self) -> Result<String> {
        Ok(format!("entries={}", self.data_entries.len()))
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for DrefBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;
        let entry_count = reader.read_u32::<BigEndian>()?;

        let mut data_entries = Vec::new();
        let end = start + size;
        for _ in 0..entry_count {
            if reader.stream_position()? >= end {
                return Err(Error::InvalidData("dref entry count exceeds its size"));
            }
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "dref box contains a box with a larger size than it",
                ));
            }
            match name {
                BoxType::UrlBox => data_entries.push(UrlBox::read_box(reader, s)?),
                _ => skip_box(reader, s)?,
            }
        }

        skip_bytes_to(reader, end)?;

        Ok(Self {
            version,
            flags,
            data_entries,
        })
    }
}

impl WriteBox<&mut BoxWriter> for DrefBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(self.data_entries.len() as u32)?;
            for entry in &self.data_entries {
                w.write_child(entry)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlBox {
    pub version: u8,
    pub flags: u32,
    pub location: String,
}

impl UrlBox {
    /// Media data is in the same file as the box describing it.
    pub const FLAG_SELF_CONTAINED: u32 = 0x01;
}

impl Default for UrlBox {
    fn default() -> Self {
        Self {
            version: 0,
            flags: Self::FLAG_SELF_CONTAINED,
            location: String::new(),
        }
    }
}

impl Mp4Box for UrlBox {
    fn box_type(&self) -> BoxType {
        BoxType::UrlBox
    }

    fn summary(&self) -> Result<String> {
        Ok(format!("location={}", self.location))
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for UrlBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let mut buf = read_to_end_of_box(reader, start, size)?;
        if let Some(end) = buf.iter().position(|&b| b == b'\0') {
            buf.truncate(end);
        }
        let location = String::from_utf8(buf).unwrap_or_default();

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            location,
        })
    }
}

impl WriteBox<&mut BoxWriter> for UrlBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            if !self.location.is_empty() {
                w.write_all(self.location.as_bytes())?;
                w.write_u8(0)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_dinf_self_contained() {
        let src_box = DinfBox::default();
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        // dinf(8) + dref(8 + 4 + 4) + url(8 + 4)
        assert_eq!(buf.len(), 36);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::DinfBox);
        let dst_box = DinfBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
        assert_eq!(dst_box.dref.data_entries[0].flags, UrlBox::FLAG_SELF_CONTAINED);
    }
}
