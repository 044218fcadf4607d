use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, skip_bytes_to, BoxType, BoxWriter, Error, Mp4Box, ReadBox, Result, WriteBox,
};

const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";

/// Pre-skip written when no `OpusHead` is supplied (80 ms at 48 kHz).
pub const DEFAULT_PRE_SKIP: u16 = 3840;

/// Opus specific box (`OpusSpecificBox`).
///
/// Carries the same fields as the `OpusHead` header from the Ogg mapping,
/// but big-endian and without the magic signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DopsBox {
    pub version: u8,
    pub output_channel_count: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
    pub channel_mapping_family: u8,
    pub stream_count: u8,
    pub coupled_count: u8,
    pub channel_mapping: Vec<u8>,
}

impl DopsBox {
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            version: 0,
            output_channel_count: channels,
            pre_skip: DEFAULT_PRE_SKIP,
            input_sample_rate: sample_rate,
            output_gain: 0,
            channel_mapping_family: 0,
            stream_count: 1,
            coupled_count: channels.saturating_sub(1).min(1),
            channel_mapping: Vec::new(),
        }
    }

    /// Converts an `OpusHead` identification header (as produced by Opus
    /// encoders) into a `dOps` box.
    pub fn from_opus_head(head: &[u8]) -> Result<Self> {
        if head.len() < 19 || &head[..8] != OPUS_HEAD_MAGIC {
            return Err(Error::InvalidData("decoder description is not an OpusHead"));
        }
        let output_channel_count = head[9];
        let pre_skip = LittleEndian::read_u16(&head[10..12]);
        let input_sample_rate = LittleEndian::read_u32(&head[12..16]);
        let output_gain = LittleEndian::read_i16(&head[16..18]);
        let channel_mapping_family = head[18];

        let mut this = Self {
            version: 0,
            output_channel_count,
            pre_skip,
            input_sample_rate,
            output_gain,
            channel_mapping_family,
            stream_count: 1,
            coupled_count: output_channel_count.saturating_sub(1).min(1),
            channel_mapping: Vec::new(),
        };

        if channel_mapping_family != 0 {
            let table_end = 21 + output_channel_count as usize;
            if head.len() < table_end {
                return Err(Error::InvalidData("OpusHead channel mapping table is truncated"));
            }
            this.stream_count = head[19];
            this.coupled_count = head[20];
            this.channel_mapping = head[21..table_end].to_vec();
        }

        Ok(this)
    }
}

impl Mp4Box for DopsBox {
    fn box_type(&self) -> BoxType {
        BoxType::DopsBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "output_channel_count={} pre_skip={} input_sample_rate={}",
            self.output_channel_count, self.pre_skip, self.input_sample_rate
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for DopsBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let version = reader.read_u8()?;
        let output_channel_count = reader.read_u8()?;
        let pre_skip = reader.read_u16::<BigEndian>()?;
        let input_sample_rate = reader.read_u32::<BigEndian>()?;
        let output_gain = reader.read_i16::<BigEndian>()?;
        let channel_mapping_family = reader.read_u8()?;

        let mut stream_count = 1;
        let mut coupled_count = output_channel_count.saturating_sub(1).min(1);
        let mut channel_mapping = Vec::new();
        if channel_mapping_family != 0 {
            stream_count = reader.read_u8()?;
            coupled_count = reader.read_u8()?;
            channel_mapping = vec![0u8; output_channel_count as usize];
            reader.read_exact(&mut channel_mapping)?;
        }

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            output_channel_count,
            pre_skip,
            input_sample_rate,
            output_gain,
            channel_mapping_family,
            stream_count,
            coupled_count,
            channel_mapping,
        })
    }
}

impl WriteBox<&mut BoxWriter> for DopsBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            w.write_u8(self.version)?;
            w.write_u8(self.output_channel_count)?;
            w.write_u16::<BigEndian>(self.pre_skip)?;
            w.write_u32::<BigEndian>(self.input_sample_rate)?;
            w.write_i16::<BigEndian>(self.output_gain)?;
            w.write_u8(self.channel_mapping_family)?;
            if self.channel_mapping_family != 0 {
                w.write_u8(self.stream_count)?;
                w.write_u8(self.coupled_count)?;
                std::io::Write::write_all(w, &self.channel_mapping)?;
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

    fn opus_head(channels: u8, family: u8) -> Vec<u8> {
        let mut head = OPUS_HEAD_MAGIC.to_vec();
        head.push(1); // version
        head.push(channels);
        head.extend_from_slice(&312u16.to_le_bytes());
        head.extend_from_slice(&48000u32.to_le_bytes());
        head.extend_from_slice(&(-256i16).to_le_bytes());
        head.push(family);
        if family != 0 {
            head.push(channels);
            head.push(0);
            head.extend(0..channels);
        }
        head
    }

    #[test]
    fn test_from_opus_head() {
        let dops = DopsBox::from_opus_head(&opus_head(2, 0)).unwrap();
        assert_eq!(dops.version, 0);
        assert_eq!(dops.output_channel_count, 2);
        assert_eq!(dops.pre_skip, 312);
        assert_eq!(dops.input_sample_rate, 48000);
        assert_eq!(dops.output_gain, -256);
        assert!(dops.channel_mapping.is_empty());
    }

    #[test]
    fn test_from_opus_head_rejects_garbage() {
        assert!(DopsBox::from_opus_head(b"OggS").is_err());
        let mut truncated = opus_head(6, 1);
        truncated.truncate(23);
        assert!(DopsBox::from_opus_head(&truncated).is_err());
    }

    #[test]
    fn test_dops() {
        for src_box in [
            DopsBox::new(48000, 2),
            DopsBox::from_opus_head(&opus_head(6, 1)).unwrap(),
        ] {
            let mut writer = BoxWriter::new();
            writer.write_child(&src_box).unwrap();
            let buf = writer.into_inner().unwrap();

            let mut reader = Cursor::new(&buf);
            let header = BoxHeader::read(&mut reader).unwrap();
            assert_eq!(header.name, BoxType::DopsBox);
            let dst_box = DopsBox::read_box(&mut reader, header.size).unwrap();
            assert_eq!(src_box, dst_box);
        }
    }
}
