use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, skip_box, skip_bytes_to, BoxHeader, BoxType, BoxWriter, Error, MdiaBox, Mp4Box,
    ReadBox, Result, TkhdBox, WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TrakBox {
    pub tkhd: TkhdBox,
    pub mdia: MdiaBox,
}

impl Mp4Box for TrakBox {
    fn box_type(&self) -> BoxType {
        BoxType::TrakBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("track_id={}", self.tkhd.track_id);
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for TrakBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let mut tkhd = None;
        let mut mdia = None;

        let mut current = reader.stream_position()?;
        let end = start + size;
        while current < end {
            // Get box header.
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "trak box contains a box with a larger size than it",
                ));
            }

            match name {
                BoxType::TkhdBox => {
                    tkhd = Some(TkhdBox::read_box(reader, s)?);
                }
                BoxType::MdiaBox => {
                    mdia = Some(MdiaBox::read_box(reader, s)?);
                }
                _ => {
                    log::debug!("skipping {name} box inside trak");
                    skip_box(reader, s)?;
                }
            }

            current = reader.stream_position()?;
        }

        let Some(tkhd) = tkhd else {
            return Err(Error::BoxNotFound(BoxType::TkhdBox));
        };
        let Some(mdia) = mdia else {
            return Err(Error::BoxNotFound(BoxType::MdiaBox));
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self { tkhd, mdia })
    }
}

impl WriteBox<&mut BoxWriter> for TrakBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            w.write_child(&self.tkhd)?;
            w.write_child(&self.mdia)?;
            Ok(())
        })?;
        Ok(())
    }
}
