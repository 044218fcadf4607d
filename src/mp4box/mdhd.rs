use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::char::{decode_utf16, REPLACEMENT_CHARACTER};
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Error, Mp4Box, ReadBox,
    Result, WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MdhdBox {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub language: String,
}

impl Default for MdhdBox {
    fn default() -> Self {
        Self {
            version: 0,
            flags: 0,
            creation_time: 0,
            modification_time: 0,
            timescale: 1000,
            duration: 0,
            language: String::from("und"),
        }
    }
}

impl Mp4Box for MdhdBox {
    fn box_type(&self) -> BoxType {
        BoxType::MdhdBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "creation_time={} timescale={} duration={} language={}",
            self.creation_time, self.timescale, self.duration, self.language
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for MdhdBox {
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
        let language_code = reader.read_u16::<BigEndian>()?;
        let language = language_string(language_code);

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
            language,
        })
    }
}

impl WriteBox<&mut BoxWriter> for MdhdBox {
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
            w.write_u16::<BigEndian>(language_code(&self.language))?;
            w.write_u16::<BigEndian>(0)?; // pre-defined
            Ok(())
        })?;
        Ok(())
    }
}

fn language_string(language: u16) -> String {
    let mut lang: [u16; 3] = [0; 3];

    lang[0] = ((language >> 10) & 0x1F) + 0x60;
    lang[1] = ((language >> 5) & 0x1F) + 0x60;
    lang[2] = ((language) & 0x1F) + 0x60;

    // Decode utf-16 encoded bytes into a string.
    let lang_str = decode_utf16(lang.iter().copied())
        .map(|r| r.unwrap_or(REPLACEMENT_CHARACTER))
        .collect::<String>();

    lang_str
}

/// Packs an ISO-639-2/T code into three 5-bit characters. Anything else becomes `und`.
fn language_code(language: &str) -> u16 {
    let bytes = language.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_lowercase) {
        return language_code("und");
    }
    bytes
        .iter()
        .fold(0u16, |code, b| (code << 5) | (*b as u16 - 0x60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::BoxHeader;
    use std::io::Cursor;

    #[test]
    fn test_mdhd_language() {
        assert_eq!(language_code("und"), 0x55C4);
        assert_eq!(language_string(0x55C4), "und");
        assert_eq!(language_code("Eng!"), 0x55C4);
    }

    #[test]
    fn test_mdhd() {
        let src_box = MdhdBox {
            timescale: 60_000,
            duration: 600_000,
            language: String::from("eng"),
            ..Default::default()
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len(), 32);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::MdhdBox);
        let dst_box = MdhdBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
    }
}
