use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::error::ConfigurationError;
use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, BoxType, BoxWriter, Mp4Box, ReadBox, Result,
    WriteBox,
};

/// `VPCodecConfigurationRecord` (version 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VpccBox {
    pub version: u8,
    pub flags: u32,
    pub profile: u8,
    pub level: u8,
    pub bit_depth: u8,
    pub chroma_subsampling: u8,
    pub video_full_range_flag: bool,
    pub color_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
    pub codec_initialization_data: Vec<u8>,
}

impl Default for VpccBox {
    fn default() -> Self {
        Self {
            version: Self::DEFAULT_VERSION,
            flags: 0,
            profile: 0,
            level: 10,
            bit_depth: Self::DEFAULT_BIT_DEPTH,
            chroma_subsampling: 1,
            video_full_range_flag: false,
            color_primaries: 1,
            transfer_characteristics: 1,
            matrix_coefficients: 1,
            codec_initialization_data: Vec::new(),
        }
    }
}

impl VpccBox {
    pub const DEFAULT_VERSION: u8 = 1;
    pub const DEFAULT_BIT_DEPTH: u8 = 8;

    /// Builds the record from a codec string such as `vp09.00.10.08` or the long
    /// form `vp09.02.10.10.01.09.16.09.01`.
    ///
    /// Fields missing from the short form take the BT.709 4:2:0 defaults.
    pub fn from_codec_string(codec: &str) -> Result<Self> {
        let invalid = || ConfigurationError::InvalidCodecString(codec.to_owned());

        let mut parts = codec.split('.');
        match parts.next() {
            Some("vp09") => {}
            _ => return Err(invalid().into()),
        }
        let fields = parts
            .map(|part| part.parse::<u8>().map_err(|_| invalid()))
            .collect::<std::result::Result<Vec<u8>, _>>()?;

        let mut vpcc = Self::default();
        match fields.as_slice() {
            [] => {}
            [profile, level, bit_depth, rest @ ..] if rest.len() <= 5 => {
                vpcc.profile = *profile;
                vpcc.level = *level;
                vpcc.bit_depth = *bit_depth;
                if let Some(chroma) = rest.first() {
                    vpcc.chroma_subsampling = *chroma;
                }
                if let Some(primaries) = rest.get(1) {
                    vpcc.color_primaries = *primaries;
                }
                if let Some(transfer) = rest.get(2) {
                    vpcc.transfer_characteristics = *transfer;
                }
                if let Some(matrix) = rest.get(3) {
                    vpcc.matrix_coefficients = *matrix;
                }
                if let Some(full_range) = rest.get(4) {
                    vpcc.video_full_range_flag = *full_range == 1;
                }
            }
            _ => return Err(invalid().into()),
        }
        if vpcc.bit_depth > 0x0F || vpcc.chroma_subsampling > 0x07 {
            return Err(invalid().into());
        }
        Ok(vpcc)
    }

    pub fn codec_string(&self) -> String {
        let profile = self.profile;
        let level = self.level;
        let bit_depth = self.bit_depth;

        format!("vp09.{profile:02}.{level:02}.{bit_depth:02}")
    }
}

impl Mp4Box for VpccBox {
    fn box_type(&self) -> BoxType {
        BoxType::VpccBox
    }

    fn summary(&self) -> Result<String> {
        Ok(format!("{self:?}"))
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for VpccBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;
        let (version, flags) = read_box_header_ext(reader)?;

        let profile: u8 = reader.read_u8()?;
        let level: u8 = reader.read_u8()?;
        let (bit_depth, chroma_subsampling, video_full_range_flag) = {
            let b = reader.read_u8()?;
            (b >> 4, (b >> 1) & 0x07, b & 0x01 == 1)
        };
        let color_primaries: u8 = reader.read_u8()?;
        let transfer_characteristics: u8 = reader.read_u8()?;
        let matrix_coefficients: u8 = reader.read_u8()?;
        let codec_initialization_data_size = reader.read_u16::<BigEndian>()?;
        let mut codec_initialization_data = vec![0u8; codec_initialization_data_size as usize];
        reader.read_exact(&mut codec_initialization_data)?;

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            profile,
            level,
            bit_depth,
            chroma_subsampling,
            video_full_range_flag,
            color_primaries,
            transfer_characteristics,
            matrix_coefficients,
            codec_initialization_data,
        })
    }
}

impl WriteBox<&mut BoxWriter> for VpccBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u8(self.profile)?;
            w.write_u8(self.level)?;
            w.write_u8(
                (self.bit_depth << 4)
                    | (self.chroma_subsampling << 1)
                    | self.video_full_range_flag as u8,
            )?;
            w.write_u8(self.color_primaries)?;
            w.write_u8(self.transfer_characteristics)?;
            w.write_u8(self.matrix_coefficients)?;
            let init_size = u16::try_from(self.codec_initialization_data.len())
                .map_err(|_| crate::error::CapacityOverflow::Field("vpcC codecInitializationDataSize"))?;
            w.write_u16::<BigEndian>(init_size)?;
            std::io::Write::write_all(w, &self.codec_initialization_data)?;
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::BoxHeader;
    use crate::Error;
    use std::io::Cursor;

    #[test]
    fn test_vpcc_from_short_codec_string() {
        let vpcc = VpccBox::from_codec_string("vp09.00.10.08").unwrap();
        assert_eq!(vpcc.profile, 0);
        assert_eq!(vpcc.level, 10);
        assert_eq!(vpcc.bit_depth, 8);
        assert_eq!(vpcc.chroma_subsampling, 1);
        assert_eq!(vpcc.codec_string(), "vp09.00.10.08");
    }

    #[test]
    fn test_vpcc_from_long_codec_string() {
        let vpcc = VpccBox::from_codec_string("vp09.02.10.10.01.09.16.09.01").unwrap();
        assert_eq!(vpcc.profile, 2);
        assert_eq!(vpcc.bit_depth, 10);
        assert_eq!(vpcc.color_primaries, 9);
        assert_eq!(vpcc.transfer_characteristics, 16);
        assert!(vpcc.video_full_range_flag);
    }

    #[test]
    fn test_vpcc_rejects_garbage() {
        assert!(matches!(
            VpccBox::from_codec_string("vp09.xx"),
            Err(Error::Configuration(ConfigurationError::InvalidCodecString(_)))
        ));
        assert!(VpccBox::from_codec_string("vp8.00.10.08").is_err());
    }

    #[test]
    fn test_vpcc() {
        let src_box = VpccBox::from_codec_string("vp09.01.31.12.02.01.01.01.00").unwrap();
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len(), 8 + 4 + 8);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::VpccBox);
        let dst_box = VpccBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
    }
}
