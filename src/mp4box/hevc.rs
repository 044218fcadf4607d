use serde::Serialize;
use std::fmt::Write as _;
use std::io::{Read, Seek, Write};

use crate::mp4box::visual::read_config_child;
use crate::mp4box::{
    box_start, read_to_end_of_box, BoxType, BoxWriter, Mp4Box, ReadBox, Result,
    VisualSampleEntry, WriteBox,
};

/// HEVC (h.265) sample entry, stored either as `hvc1` or `hev1`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct HevcBox {
    pub visual: VisualSampleEntry,
    pub hvcc: Option<HvcCBox>,
}

impl HevcBox {
    /// Writes the entry with the given sample entry type (`hvc1` or `hev1`).
    pub fn write_as(&self, writer: &mut BoxWriter, typ: BoxType) -> Result<()> {
        writer.write_box(typ, |w| {
            self.visual.write(w)?;
            if let Some(hvcc) = &self.hvcc {
                w.write_child(hvcc)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

impl Mp4Box for HevcBox {
    fn box_type(&self) -> BoxType {
        BoxType::Hvc1Box
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "data_reference_index={} width={} height={}",
            self.visual.data_reference_index, self.visual.width, self.visual.height
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for HevcBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;
        let visual = VisualSampleEntry::read(reader)?;
        let hvcc = read_config_child(reader, start + size, size, BoxType::HvcCBox, |r, s| {
            HvcCBox::read_box(r, s)
        })?;
        Ok(Self { visual, hvcc })
    }
}

impl WriteBox<&mut BoxWriter> for HevcBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        self.write_as(writer, self.box_type())
    }
}

/// `HEVCDecoderConfigurationRecord`, kept verbatim.
///
/// Only the fixed 13-byte prefix is decoded; the parameter set arrays stay in `raw`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct HvcCBox {
    pub configuration_version: u8,
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_constraint_indicator_flag: u64,
    pub general_level_idc: u8,

    #[serde(skip_serializing)]
    pub raw: Vec<u8>,
}

impl HvcCBox {
    pub fn from_raw(raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        let mut this = Self::default();
        if raw.len() >= 13 {
            this.configuration_version = raw[0];
            this.general_profile_space = raw[1] >> 6;
            this.general_tier_flag = raw[1] & 0x20 != 0;
            this.general_profile_idc = raw[1] & 0x1f;
            this.general_profile_compatibility_flags =
                u32::from_be_bytes([raw[2], raw[3], raw[4], raw[5]]);
            this.general_constraint_indicator_flag = raw[6..12]
                .iter()
                .fold(0u64, |acc, byte| (acc << 8) | *byte as u64);
            this.general_level_idc = raw[12];
        }
        this.raw = raw;
        this
    }

    /// RFC 6381 codec string details following the `hvc1`/`hev1` prefix, e.g. `.1.6.L93.B0`.
    pub fn codec_details(&self) -> String {
        let mut codec = String::new();
        match self.general_profile_space {
            1 => codec.push_str(".A"),
            2 => codec.push_str(".B"),
            3 => codec.push_str(".C"),
            _ => {}
        }
        write!(&mut codec, ".{}", self.general_profile_idc).ok();

        let reversed = self.general_profile_compatibility_flags.reverse_bits();
        write!(&mut codec, ".{reversed:X}").ok();

        if self.general_tier_flag {
            codec.push_str(".H");
        } else {
            codec.push_str(".L");
        }
        write!(&mut codec, "{}", self.general_level_idc).ok();

        // Constraint bytes in order, trailing zero bytes dropped.
        let constraint = &self.general_constraint_indicator_flag.to_be_bytes()[2..];
        let used = constraint
            .iter()
            .rposition(|byte| *byte != 0)
            .map_or(0, |last| last + 1);
        for byte in &constraint[..used] {
            write!(&mut codec, ".{byte:X}").ok();
        }

        codec
    }
}

impl Mp4Box for HvcCBox {
    fn box_type(&self) -> BoxType {
        BoxType::HvcCBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "general_profile_idc={} general_level_idc={}",
            self.general_profile_idc, self.general_level_idc
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for HvcCBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;
        let raw = read_to_end_of_box(reader, start, size)?;
        Ok(Self::from_raw(raw))
    }
}

impl WriteBox<&mut BoxWriter> for HvcCBox {
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

    // Main profile, level 3.1, progressive source flag set; no parameter set arrays.
    const HVCC: [u8; 23] = [
        0x01, 0x01, 0x60, 0x00, 0x00, 0x00, 0xB0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x5D, 0xF0, 0x00,
        0xFC, 0xFD, 0xF8, 0xF8, 0x00, 0x00, 0x0F, 0x00,
    ];

    #[test]
    fn test_hvcc_codec_details() {
        let hvcc = HvcCBox::from_raw(HVCC.to_vec());
        assert_eq!(hvcc.general_profile_idc, 1);
        assert_eq!(hvcc.general_level_idc, 93);
        assert_eq!(hvcc.codec_details(), ".1.6.L93.B0");
    }

    #[test]
    fn test_hev1_round_trip() {
        let src_box = HevcBox {
            visual: VisualSampleEntry::new(1280, 720),
            hvcc: Some(HvcCBox::from_raw(HVCC.to_vec())),
        };
        let mut writer = BoxWriter::new();
        src_box.write_as(&mut writer, BoxType::Hev1Box).unwrap();
        let buf = writer.into_inner().unwrap();

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::Hev1Box);
        let dst_box = HevcBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
    }
}
