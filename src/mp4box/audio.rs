use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek, Write};

use crate::mp4box::{value_u32, FixedPointU16, Result};

/// Bytes of fixed fields in front of the child boxes of a (version 0) audio sample entry.
pub const AUDIO_SAMPLE_ENTRY_SIZE: u64 = 28;

/// Fields shared by every audio sample entry (`mp4a`, `Opus`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioSampleEntry {
    pub data_reference_index: u16,
    pub channelcount: u16,
    pub samplesize: u16,

    #[serde(with = "value_u32")]
    pub samplerate: FixedPointU16,
}

impl Default for AudioSampleEntry {
    fn default() -> Self {
        Self {
            data_reference_index: 1,
            channelcount: 2,
            samplesize: 16,
            samplerate: FixedPointU16::new(48000),
        }
    }
}

impl AudioSampleEntry {
    /// Rates above 65535 Hz do not fit the 16.16 field and are written as 0;
    /// the codec configuration carries the real rate.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let samplerate = u16::try_from(sample_rate).unwrap_or(0);
        Self {
            channelcount: channels,
            samplerate: FixedPointU16::new(samplerate),
            ..Default::default()
        }
    }

    pub(crate) fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader.read_u32::<BigEndian>()?; // reserved
        reader.read_u16::<BigEndian>()?; // reserved
        let data_reference_index = reader.read_u16::<BigEndian>()?;
        let version = reader.read_u16::<BigEndian>()?;
        reader.read_u16::<BigEndian>()?; // reserved
        reader.read_u32::<BigEndian>()?; // reserved
        let channelcount = reader.read_u16::<BigEndian>()?;
        let samplesize = reader.read_u16::<BigEndian>()?;
        reader.read_u32::<BigEndian>()?; // pre-defined, reserved
        let samplerate = FixedPointU16::new_raw(reader.read_u32::<BigEndian>()?);

        if version == 1 {
            // Skip QTFF
            reader.read_u64::<BigEndian>()?;
            reader.read_u64::<BigEndian>()?;
        }

        Ok(Self {
            data_reference_index,
            channelcount,
            samplesize,
            samplerate,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(0)?; // reserved
        writer.write_u16::<BigEndian>(0)?; // reserved
        writer.write_u16::<BigEndian>(self.data_reference_index)?;
        writer.write_u64::<BigEndian>(0)?; // version, reserved
        writer.write_u16::<BigEndian>(self.channelcount)?;
        writer.write_u16::<BigEndian>(self.samplesize)?;
        writer.write_u32::<BigEndian>(0)?; // pre-defined, reserved
        writer.write_u32::<BigEndian>(self.samplerate.raw_value())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_audio_sample_entry_layout() {
        let entry = AudioSampleEntry::new(44100, 1);
        let mut buf = Vec::new();
        entry.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, AUDIO_SAMPLE_ENTRY_SIZE);
        assert_eq!(&buf[24..28], &[0xAC, 0x44, 0x00, 0x00]);

        let parsed = AudioSampleEntry::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_high_sample_rate_is_zeroed() {
        let entry = AudioSampleEntry::new(96000, 2);
        assert_eq!(entry.samplerate.raw_value(), 0);
    }
}
