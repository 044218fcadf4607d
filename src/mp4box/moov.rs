use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, skip_box, skip_bytes_to, BoxHeader, BoxType, BoxWriter, Error, Mp4Box, MvexBox,
    MvhdBox, ReadBox, Result, TrakBox, WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MoovBox {
    pub mvhd: MvhdBox,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mvex: Option<MvexBox>,

    #[serde(rename = "trak")]
    pub traks: Vec<TrakBox>,
}

impl Mp4Box for MoovBox {
    fn box_type(&self) -> BoxType {
        BoxType::MoovBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("traks={}", self.traks.len());
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for MoovBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let mut mvhd = None;
        let mut mvex = None;
        let mut traks = Vec::new();

        let mut current = reader.stream_position()?;
        let end = start + size;
        while current < end {
            // Get box header.
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "moov box contains a box with a larger size than it",
                ));
            }

            match name {
                BoxType::MvhdBox => {
                    mvhd = Some(MvhdBox::read_box(reader, s)?);
                }
                BoxType::MvexBox => {
                    mvex = Some(MvexBox::read_box(reader, s)?);
                }
                BoxType::TrakBox => {
                    let trak = TrakBox::read_box(reader, s)?;
                    traks.push(trak);
                }
                _ => {
                    log::debug!("skipping {name} box inside moov");
                    skip_box(reader, s)?;
                }
            }

            current = reader.stream_position()?;
        }

        let Some(mvhd) = mvhd else {
            return Err(Error::BoxNotFound(BoxType::MvhdBox));
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self { mvhd, mvex, traks })
    }
}

impl WriteBox<&mut BoxWriter> for MoovBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            w.write_child(&self.mvhd)?;
            for trak in &self.traks {
                w.write_child(trak)?;
            }
            if let Some(mvex) = &self.mvex {
                w.write_child(mvex)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}
