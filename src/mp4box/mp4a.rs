use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, skip_bytes_to, AudioSampleEntry, BoxHeader, BoxType, BoxWriter, Error, EsdsBox,
    Mp4Box, ReadBox, Result, WriteBox,
};

/// AAC sample entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Mp4aBox {
    pub audio: AudioSampleEntry,
    pub esds: Option<EsdsBox>,
}

impl Mp4aBox {
    pub fn codec_string(&self) -> String {
        self.esds
            .as_ref()
            .map_or_else(|| "mp4a.40.2".to_owned(), EsdsBox::codec_string)
    }
}

impl Mp4Box for Mp4aBox {
    fn box_type(&self) -> BoxType {
        BoxType::Mp4aBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "channel_count={} sample_size={} sample_rate={}",
            self.audio.channelcount,
            self.audio.samplesize,
            self.audio.samplerate.value()
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for Mp4aBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;
        let audio = AudioSampleEntry::read(reader)?;

        // Find esds in mp4a or wave
        let mut esds = None;
        let end = start + size;
        loop {
            let current = reader.stream_position()?;
            if current >= end {
                break;
            }
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "mp4a box contains a box with a larger size than it",
                ));
            }
            if name == BoxType::EsdsBox {
                esds = Some(EsdsBox::read_box(reader, s)?);
                break;
            } else if name == BoxType::WaveBox {
                // Typically contains frma, mp4a, esds, and a terminator atom
            } else {
                // Skip boxes
                let skip_to = current + s;
                skip_bytes_to(reader, skip_to)?;
            }
        }

        skip_bytes_to(reader, end)?;

        Ok(Self { audio, esds })
    }
}

impl WriteBox<&mut BoxWriter> for Mp4aBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            self.audio.write(w)?;
            if let Some(esds) = &self.esds {
                w.write_child(esds)?;
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
    fn test_mp4a() {
        let src_box = Mp4aBox {
            audio: AudioSampleEntry::new(48000, 2),
            esds: Some(EsdsBox::synthesize(48000, 2)),
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::Mp4aBox);
        let dst_box = Mp4aBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
        assert_eq!(dst_box.codec_string(), "mp4a.40.2");
    }

    #[test]
    fn test_mp4a_without_esds() {
        let src_box = Mp4aBox {
            audio: AudioSampleEntry::new(44100, 1),
            esds: None,
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len(), 8 + 28);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        let dst_box = Mp4aBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
    }
}
