use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, skip_box, skip_bytes_to, BoxHeader, BoxType, BoxWriter, Error, Mp4Box, ReadBox,
    Result, TrexBox, WriteBox,
};

/// Movie extends: announces that movie fragments follow the `moov`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MvexBox {
    pub trexs: Vec<TrexBox>,
}

impl Mp4Box for MvexBox {
    fn box_type(&self) -> BoxType {
        BoxType::MvexBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("trexs={}", self.trexs.len());
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for MvexBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let mut trexs = Vec::new();

        let mut current = reader.stream_position()?;
        let end = start + size;
        while current < end {
            // Get box header.
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "mvex box contains a box with a larger size than it",
                ));
            }

            match name {
                BoxType::TrexBox => {
                    trexs.push(TrexBox::read_box(reader, s)?);
                }
                _ => {
                    log::debug!("skipping {name} box inside mvex");
                    skip_box(reader, s)?;
                }
            }

            current = reader.stream_position()?;
        }

        if trexs.is_empty() {
            return Err(Error::BoxNotFound(BoxType::TrexBox));
        }

        skip_bytes_to(reader, start + size)?;

        Ok(Self { trexs })
    }
}

impl WriteBox<&mut BoxWriter> for MvexBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            for trex in &self.trexs {
                w.write_child(trex)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}
