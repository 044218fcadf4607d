use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, skip_box, skip_bytes_to, BoxHeader, BoxType, BoxWriter, Error, HdlrBox, MdhdBox,
    MinfBox, Mp4Box, ReadBox, Result, WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MdiaBox {
    pub mdhd: MdhdBox,
    pub hdlr: HdlrBox,
    pub minf: MinfBox,
}

impl Mp4Box for MdiaBox {
    fn box_type(&self) -> BoxType {
        BoxType::MdiaBox
    }

    fn summary(&self) -> Result<String> {
        let s = String::new();
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for MdiaBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let mut mdhd = None;
        let mut hdlr = None;
        let mut minf = None;

        let mut current = reader.stream_position()?;
        let end = start + size;
        while current < end {
            // Get box header.
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "mdia box contains a box with a larger size than it",
                ));
            }

            match name {
                BoxType::MdhdBox => {
                    mdhd = Some(MdhdBox::read_box(reader, s)?);
                }
                BoxType::HdlrBox => {
                    hdlr = Some(HdlrBox::read_box(reader, s)?);
                }
                BoxType::MinfBox => {
                    minf = Some(MinfBox::read_box(reader, s)?);
                }
                _ => {
                    log::debug!("skipping {name} box inside mdia");
                    skip_box(reader, s)?;
                }
            }

            current = reader.stream_position()?;
        }

        let Some(mdhd) = mdhd else {
            return Err(Error::BoxNotFound(BoxType::MdhdBox));
        };
        let Some(hdlr) = hdlr else {
            return Err(Error::BoxNotFound(BoxType::HdlrBox));
        };
        let Some(minf) = minf else {
            return Err(Error::BoxNotFound(BoxType::MinfBox));
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self { mdhd, hdlr, minf })
    }
}

impl WriteBox<&mut BoxWriter> for MdiaBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            w.write_child(&self.mdhd)?;
            w.write_child(&self.hdlr)?;
            w.write_child(&self.minf)?;
            Ok(())
        })?;
        Ok(())
    }
}
