use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;
use std::io::{Cursor, Read, Seek, Write};

use crate::mp4box::visual::read_config_child;
use crate::mp4box::{
    box_start, read_to_end_of_box, BoxType, BoxWriter, Mp4Box, ReadBox, Result,
    VisualSampleEntry, WriteBox,
};

/// AVC (h.264) sample entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Avc1Box {
    pub visual: VisualSampleEntry,
    pub avcc: Option<AvcCBox>,
}

impl Mp4Box for Avc1Box {
    fn box_type(&self) -> BoxType {
        BoxType::Avc1Box
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "data_reference_index={} width={} height={} frame_count={}",
            self.visual.data_reference_index,
            self.visual.width,
            self.visual.height,
            self.visual.frame_count
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for Avc1Box {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;
        let visual = VisualSampleEntry::read(reader)?;
        let avcc = read_config_child(reader, start + size, size, BoxType::AvcCBox, |r, s| {
            AvcCBox::read_box(r, s)
        })?;
        Ok(Self { visual, avcc })
    }
}

impl WriteBox<&mut BoxWriter> for Avc1Box {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            self.visual.write(w)?;
            if let Some(avcc) = &self.avcc {
                w.write_child(avcc)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

/// `AVCDecoderConfigurationRecord`, kept byte for byte as the encoder produced it.
///
/// The profile and level fields are decoded for codec strings; the parameter
/// sets are decoded when the record is well formed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AvcCBox {
    pub configuration_version: u8,
    pub avc_profile_indication: u8,
    pub profile_compatibility: u8,
    pub avc_level_indication: u8,
    pub length_size_minus_one: u8,
    pub sequence_parameter_sets: Vec<NalUnit>,
    pub picture_parameter_sets: Vec<NalUnit>,

    #[serde(skip_serializing)]
    pub raw: Vec<u8>,
}

impl AvcCBox {
    pub fn from_raw(raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        let mut this = Self::default();
        if let &[version, profile, compatibility, level, length_size, ..] = raw.as_slice() {
            this.configuration_version = version;
            this.avc_profile_indication = profile;
            this.profile_compatibility = compatibility;
            this.avc_level_indication = level;
            this.length_size_minus_one = length_size & 0x3;
        }
        if let Ok((sps, pps)) = Self::parameter_sets(&raw) {
            this.sequence_parameter_sets = sps;
            this.picture_parameter_sets = pps;
        }
        this.raw = raw;
        this
    }

    fn parameter_sets(raw: &[u8]) -> Result<(Vec<NalUnit>, Vec<NalUnit>)> {
        let mut reader = Cursor::new(raw);
        reader.set_position(5);
        let num_of_spss = reader.read_u8()? & 0x1F;
        let mut sequence_parameter_sets = Vec::with_capacity(num_of_spss as usize);
        for _ in 0..num_of_spss {
            let nal_unit = NalUnit::read(&mut reader)?;
            sequence_parameter_sets.push(nal_unit);
        }
        let num_of_ppss = reader.read_u8()?;
        let mut picture_parameter_sets = Vec::with_capacity(num_of_ppss as usize);
        for _ in 0..num_of_ppss {
            let nal_unit = NalUnit::read(&mut reader)?;
            picture_parameter_sets.push(nal_unit);
        }
        Ok((sequence_parameter_sets, picture_parameter_sets))
    }

    /// RFC 6381 codec string, e.g. `avc1.64001F`.
    pub fn codec_string(&self) -> String {
        let profile = self.avc_profile_indication;
        let constraint = self.profile_compatibility;
        let level = self.avc_level_indication;

        format!("avc1.{profile:02X}{constraint:02X}{level:02X}")
    }
}

impl Mp4Box for AvcCBox {
    fn box_type(&self) -> BoxType {
        BoxType::AvcCBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("avc_profile_indication={}", self.avc_profile_indication);
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for AvcCBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;
        let raw = read_to_end_of_box(reader, start, size)?;
        Ok(Self::from_raw(raw))
    }
}

impl WriteBox<&mut BoxWriter> for AvcCBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            w.write_all(&self.raw)?;
            Ok(())
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct NalUnit {
    pub bytes: Vec<u8>,
}

impl From<&[u8]> for NalUnit {
    fn from(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }
}

impl NalUnit {
    fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let length = reader.read_u16::<BigEndian>()? as usize;
        let mut bytes = vec![0u8; length];
        reader.read_exact(&mut bytes)?;
        Ok(Self { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::BoxHeader;

    const AVCC: [u8; 19] = [
        0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, 0x01, 0x00, 0x04,
        0x68, 0xEB, 0xE3, 0xCB,
    ];

    #[test]
    fn test_avcc_fields() {
        let avcc = AvcCBox::from_raw(AVCC.to_vec());
        assert_eq!(avcc.codec_string(), "avc1.64001F");
        assert_eq!(avcc.length_size_minus_one, 3);
        assert_eq!(avcc.sequence_parameter_sets.len(), 1);
        assert_eq!(avcc.picture_parameter_sets[0].bytes, [0x68, 0xEB, 0xE3, 0xCB]);
    }

    #[test]
    fn test_truncated_avcc_is_kept_verbatim() {
        let avcc = AvcCBox::from_raw(vec![0x01, 0x42]);
        assert_eq!(avcc.raw, [0x01, 0x42]);
        assert!(avcc.sequence_parameter_sets.is_empty());
    }

    #[test]
    fn test_avc1() {
        let src_box = Avc1Box {
            visual: VisualSampleEntry::new(320, 240),
            avcc: Some(AvcCBox::from_raw(AVCC.to_vec())),
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len(), 8 + 78 + 8 + AVCC.len());

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::Avc1Box);
        let dst_box = Avc1Box::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
    }
}
