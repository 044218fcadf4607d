use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::visual::read_config_child;
use crate::mp4box::{
    box_start, AudioSampleEntry, BoxType, BoxWriter, DopsBox, Mp4Box, ReadBox, Result, WriteBox,
};

/// Opus sample entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct OpusBox {
    pub audio: AudioSampleEntry,
    pub dops: Option<DopsBox>,
}

impl Mp4Box for OpusBox {
    fn box_type(&self) -> BoxType {
        BoxType::OpusBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "channel_count={} sample_rate={}",
            self.audio.channelcount,
            self.audio.samplerate.value()
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for OpusBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;
        let audio = AudioSampleEntry::read(reader)?;
        let dops = read_config_child(reader, start + size, size, BoxType::DopsBox, |r, s| {
            DopsBox::read_box(r, s)
        })?;
        Ok(Self { audio, dops })
    }
}

impl WriteBox<&mut BoxWriter> for OpusBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            self.audio.write(w)?;
            if let Some(dops) = &self.dops {
                w.write_child(dops)?;
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

    #[test]
    fn test_opus() {
        let src_box = OpusBox {
            audio: AudioSampleEntry::new(48000, 2),
            dops: Some(DopsBox::new(48000, 2)),
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(&buf[4..8], b"Opus");
        assert_eq!(buf.len(), 8 + 28 + 8 + 11);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::OpusBox);
        let dst_box = OpusBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
    }
}
