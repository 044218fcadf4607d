use serde::Serialize;
use std::io::{Read, Seek, Write};

use crate::mp4box::visual::read_config_child;
use crate::mp4box::{
    box_start, read_to_end_of_box, BoxType, BoxWriter, Mp4Box, ReadBox, Result,
    VisualSampleEntry, WriteBox,
};

/// AV1 sample entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Av01Box {
    pub visual: VisualSampleEntry,
    pub av1c: Option<Av1CBox>,
}

impl Mp4Box for Av01Box {
    fn box_type(&self) -> BoxType {
        BoxType::Av01Box
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "data_reference_index={} width={} height={}",
            self.visual.data_reference_index, self.visual.width, self.visual.height
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for Av01Box {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;
        let visual = VisualSampleEntry::read(reader)?;
        let av1c = read_config_child(reader, start + size, size, BoxType::Av1CBox, |r, s| {
            Av1CBox::read_box(r, s)
        })?;
        Ok(Self { visual, av1c })
    }
}

impl WriteBox<&mut BoxWriter> for Av01Box {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            self.visual.write(w)?;
            if let Some(av1c) = &self.av1c {
                w.write_child(av1c)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

/// `AV1CodecConfigurationRecord`.
///
/// The record is written back exactly as received; the decoded fields only
/// feed codec strings and are left at their defaults if the marker byte is wrong.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Av1CBox {
    pub profile: u8,
    pub level: u8,
    pub tier: u8,
    pub bit_depth: u8,
    pub monochrome: bool,
    pub chroma_subsampling_x: u8,
    pub chroma_subsampling_y: u8,
    pub chroma_sample_position: u8,
    pub initial_presentation_delay_present: bool,
    pub initial_presentation_delay_minus_one: u8,
    pub config_obus: Vec<u8>, // Holds the variable-length configOBUs

    #[serde(skip_serializing)]
    pub raw: Vec<u8>,
}

impl Av1CBox {
    pub fn from_raw(raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        let mut this = Self {
            bit_depth: 8,
            ..Default::default()
        };

        if let &[marker_byte, profile_byte, flags_byte, delay_byte, ..] = raw.as_slice() {
            if marker_byte == 0x81 {
                this.profile = (profile_byte & 0xe0) >> 5;
                this.level = profile_byte & 0x1f;
                this.tier = (flags_byte & 0x80) >> 7;
                this.bit_depth = match flags_byte & 0x60 {
                    0x60 => 12,
                    0x40 => 10,
                    _ => 8,
                };
                this.monochrome = flags_byte & 0x10 == 0x10;
                this.chroma_subsampling_x = (flags_byte & 0x08) >> 3;
                this.chroma_subsampling_y = (flags_byte & 0x04) >> 2;
                this.chroma_sample_position = flags_byte & 0x03;
                this.initial_presentation_delay_present = (delay_byte & 0x10) == 0x10;
                if this.initial_presentation_delay_present {
                    this.initial_presentation_delay_minus_one = delay_byte & 0x0f;
                }
                this.config_obus = raw[4..].to_vec();
            } else {
                log::debug!("av1C marker byte is {marker_byte:#04x}, keeping record opaque");
            }
        }

        this.raw = raw;
        this
    }

    /// RFC 6381 codec string, e.g. `av01.0.04M.08`.
    pub fn codec_string(&self) -> String {
        let profile = self.profile;
        let level = self.level;
        let tier = if self.tier == 0 { "M" } else { "H" };
        let bit_depth = self.bit_depth;

        format!("av01.{profile}.{level:02}{tier}.{bit_depth:02}")
    }
}

impl Mp4Box for Av1CBox {
    fn box_type(&self) -> BoxType {
        BoxType::Av1CBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "profile={} level={} bit_depth={}",
            self.profile, self.level, self.bit_depth
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for Av1CBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;
        let raw = read_to_end_of_box(reader, start, size)?;
        Ok(Self::from_raw(raw))
    }
}

impl WriteBox<&mut BoxWriter> for Av1CBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            w.write_all(&self.raw)?;
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
    fn test_av1c_fields() {
        // main profile, level 4 (4.0), main tier, 10 bit, 4:2:0
        let av1c = Av1CBox::from_raw(vec![0x81, 0x04, 0x4C, 0x00]);
        assert_eq!(av1c.profile, 0);
        assert_eq!(av1c.level, 4);
        assert_eq!(av1c.bit_depth, 10);
        assert_eq!(av1c.codec_string(), "av01.0.04M.10");
    }

    #[test]
    fn test_av01() {
        let src_box = Av01Box {
            visual: VisualSampleEntry::new(1920, 1080),
            av1c: Some(Av1CBox::from_raw(vec![0x81, 0x08, 0x0C, 0x00, 0x0A, 0x0B])),
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::Av01Box);
        let dst_box = Av01Box::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
        assert_eq!(dst_box.av1c.unwrap().config_obus, [0x0A, 0x0B]);
    }
}
