use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::error::CapacityOverflow;
use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes_to, Av01Box, Avc1Box, BoxHeader, BoxType,
    BoxWriter, Error, FourCC, HevcBox, Mp4Box, Mp4aBox, OpusBox, ReadBox, Result, TrackKind,
    Vp09Box, WriteBox, HEADER_SIZE,
};

/// Codec dependent contents of one `stsd` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StsdBoxContent {
    /// AV1 video codec
    Av01(Av01Box),

    /// AVC video codec (h.264)
    Avc1(Avc1Box),

    /// HVC1 video codec (h.265)
    ///
    /// hvc1 parameter sets are stored out-of-band in the sample entry
    /// (i.e. below the Sample Description Box (stsd) box)
    Hvc1(HevcBox),

    /// HEV1 video codec (h.265)
    ///
    /// hev1 parameter sets are stored out-of-band in the sample entry and/or in-band in the samples
    /// (i.e. SPS/PPS/VPS NAL units in the bitstream/ mdat box)
    Hev1(HevcBox),

    /// VP9 video codec
    Vp09(Vp09Box),

    /// AAC audio codec
    Mp4a(Mp4aBox),

    /// Opus audio codec
    Opus(OpusBox),

    /// Unrecognized codecs
    Unknown(FourCC),
}

impl Default for StsdBoxContent {
    fn default() -> Self {
        Self::Unknown(FourCC::default())
    }
}

impl StsdBoxContent {
    pub fn kind(&self) -> Option<TrackKind> {
        match self {
            Self::Av01(_) | Self::Avc1(_) | Self::Hev1(_) | Self::Hvc1(_) | Self::Vp09(_) => {
                Some(TrackKind::Video)
            }
            Self::Mp4a(_) | Self::Opus(_) => Some(TrackKind::Audio),
            Self::Unknown(_) => None,
        }
    }

    /// Per color component bit depth.
    ///
    /// Usually 8, but 10 for HDR (for example).
    pub fn bit_depth(&self) -> Option<u8> {
        match self {
            Self::Av01(bx) => bx.av1c.as_ref().map(|av1c| av1c.bit_depth),
            Self::Vp09(bx) => bx.vpcc.as_ref().map(|vpcc| vpcc.bit_depth),
            Self::Avc1(_)
            | Self::Hvc1(_)
            | Self::Hev1(_)
            | Self::Mp4a(_)
            | Self::Opus(_)
            | Self::Unknown(_) => None,
        }
    }

    /// Whether the entry carries its codec configuration box.
    pub fn has_config(&self) -> bool {
        match self {
            Self::Av01(bx) => bx.av1c.is_some(),
            Self::Avc1(bx) => bx.avcc.is_some(),
            Self::Hvc1(bx) | Self::Hev1(bx) => bx.hvcc.is_some(),
            Self::Vp09(bx) => bx.vpcc.is_some(),
            Self::Mp4a(bx) => bx.esds.is_some(),
            Self::Opus(bx) => bx.dops.is_some(),
            Self::Unknown(_) => false,
        }
    }

    /// RFC 6381 codec string, derived from the codec configuration box.
    ///
    /// `None` for unknown entries and for video entries without a configuration.
    pub fn codec_string(&self) -> Option<String> {
        Some(match self {
            Self::Av01(Av01Box { av1c, .. }) => av1c.as_ref()?.codec_string(),
            Self::Avc1(Avc1Box { avcc, .. }) => avcc.as_ref()?.codec_string(),
            Self::Hvc1(HevcBox { hvcc, .. }) => {
                format!("hvc1{}", hvcc.as_ref()?.codec_details())
            }
            Self::Hev1(HevcBox { hvcc, .. }) => {
                format!("hev1{}", hvcc.as_ref()?.codec_details())
            }
            Self::Vp09(Vp09Box { vpcc, .. }) => vpcc.as_ref()?.codec_string(),
            Self::Mp4a(mp4a) => mp4a.codec_string(),
            Self::Opus(_) => "opus".to_owned(),
            Self::Unknown(_) => return None,
        })
    }

    fn write(&self, writer: &mut BoxWriter) -> Result<()> {
        match self {
            Self::Av01(bx) => writer.write_child(bx),
            Self::Avc1(bx) => writer.write_child(bx),
            Self::Hvc1(bx) => bx.write_as(writer, BoxType::Hvc1Box),
            Self::Hev1(bx) => bx.write_as(writer, BoxType::Hev1Box),
            Self::Vp09(bx) => writer.write_child(bx),
            Self::Mp4a(bx) => writer.write_child(bx),
            Self::Opus(bx) => writer.write_child(bx),
            Self::Unknown(_) => Err(Error::InvalidData("cannot write an unknown sample entry")),
        }
    }
}

/// Sample descriptions. Samples refer to `entries` with a 1-based index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct StsdBox {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<StsdBoxContent>,
}

impl StsdBox {
    /// Track kind according to the first recognized entry.
    pub fn kind(&self) -> Option<TrackKind> {
        self.entries.iter().find_map(StsdBoxContent::kind)
    }

    /// Entry for a 1-based sample description index.
    pub fn entry(&self, sample_description_index: u32) -> Option<&StsdBoxContent> {
        let index = (sample_description_index as usize).checked_sub(1)?;
        self.entries.get(index)
    }
}

impl Mp4Box for StsdBox {
    fn box_type(&self) -> BoxType {
        BoxType::StsdBox
    }

    fn summary(&self) -> Result<String> {
        let codecs = self
            .entries
            .iter()
            .map(|entry| entry.codec_string().unwrap_or_else(|| "unknown".to_owned()))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("entries=[{codecs}]"))
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for StsdBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;
        let end = start + size;

        let (version, flags) = read_box_header_ext(reader)?;

        let entry_count = reader.read_u32::<BigEndian>()?;
        if u64::from(entry_count) > size / HEADER_SIZE {
            return Err(Error::InvalidData(
                "stsd entry_count indicates more entries than could fit in the box",
            ));
        }

        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let current = reader.stream_position()?;

            // Get box header.
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size || current + s > end {
                return Err(Error::InvalidData(
                    "stsd box contains a box with a larger size than it",
                ));
            }

            let contents = match name {
                BoxType::Av01Box => StsdBoxContent::Av01(Av01Box::read_box(reader, s)?),
                // According to MPEG-4 part 15, sections 5.4.2.1.2 and 5.4.4 (or the whole 5.4 section in general),
                // the Avc1Box and Avc3Box are identical, but the Avc3Box is used in some cases.
                BoxType::Avc1Box => StsdBoxContent::Avc1(Avc1Box::read_box(reader, s)?),
                BoxType::Hvc1Box => StsdBoxContent::Hvc1(HevcBox::read_box(reader, s)?),
                BoxType::Hev1Box => StsdBoxContent::Hev1(HevcBox::read_box(reader, s)?),
                BoxType::Vp09Box => StsdBoxContent::Vp09(Vp09Box::read_box(reader, s)?),
                BoxType::Mp4aBox => StsdBoxContent::Mp4a(Mp4aBox::read_box(reader, s)?),
                BoxType::OpusBox => StsdBoxContent::Opus(OpusBox::read_box(reader, s)?),
                _ => StsdBoxContent::Unknown(name.into()),
            };
            entries.push(contents);

            skip_bytes_to(reader, current + s)?;
        }

        skip_bytes_to(reader, end)?;

        Ok(Self {
            version,
            flags,
            entries,
        })
    }
}

impl WriteBox<&mut BoxWriter> for StsdBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        let entry_count = u32::try_from(self.entries.len())
            .map_err(|_| CapacityOverflow::EntryCount(self.entries.len()))?;
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(entry_count)?;
            for entry in &self.entries {
                entry.write(w)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::{AudioSampleEntry, DopsBox, VisualSampleEntry, VpccBox};
    use std::io::Cursor;

    #[test]
    fn test_stsd_multiple_entries() {
        let vp09 = |codec: &str| {
            StsdBoxContent::Vp09(Vp09Box {
                visual: VisualSampleEntry::new(640, 360),
                vpcc: Some(VpccBox::from_codec_string(codec).unwrap()),
            })
        };
        let src_box = StsdBox {
            version: 0,
            flags: 0,
            entries: vec![vp09("vp09.00.10.08"), vp09("vp09.00.31.08")],
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::StsdBox);
        let dst_box = StsdBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
        assert_eq!(dst_box.kind(), Some(TrackKind::Video));
        assert_eq!(
            dst_box.entry(2).and_then(StsdBoxContent::codec_string).as_deref(),
            Some("vp09.00.31.08")
        );
        assert!(dst_box.entry(0).is_none());
    }

    #[test]
    fn test_stsd_opus() {
        let src_box = StsdBox {
            version: 0,
            flags: 0,
            entries: vec![StsdBoxContent::Opus(OpusBox {
                audio: AudioSampleEntry::new(48000, 2),
                dops: Some(DopsBox::new(48000, 2)),
            })],
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        let dst_box = StsdBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(dst_box.kind(), Some(TrackKind::Audio));
        assert_eq!(dst_box.entries[0].codec_string().as_deref(), Some("opus"));
    }

    #[test]
    fn test_unknown_entry_cannot_be_written() {
        let stsd = StsdBox {
            entries: vec![StsdBoxContent::default()],
            ..Default::default()
        };
        let mut writer = BoxWriter::new();
        assert!(writer.write_child(&stsd).is_err());
    }
}
