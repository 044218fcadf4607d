use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, skip_box, skip_bytes_to, BoxHeader, BoxType, BoxWriter, DinfBox, Error, Mp4Box,
    ReadBox, Result, SmhdBox, StblBox, VmhdBox, WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MinfBox {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vmhd: Option<VmhdBox>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub smhd: Option<SmhdBox>,

    pub dinf: DinfBox,
    pub stbl: StblBox,
}

impl Mp4Box for MinfBox {
    fn box_type(&self) -> BoxType {
        BoxType::MinfBox
    }

    fn summary(&self) -> Result<String> {
        let s = String::new();
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for MinfBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let mut vmhd = None;
        let mut smhd = None;
        let mut dinf = None;
        let mut stbl = None;

        let mut current = reader.stream_position()?;
        let end = start + size;
        while current < end {
            // Get box header.
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "minf box contains a box with a larger size than it",
                ));
            }

            match name {
                BoxType::VmhdBox => {
                    vmhd = Some(VmhdBox::read_box(reader, s)?);
                }
                BoxType::SmhdBox => {
                    smhd = Some(SmhdBox::read_box(reader, s)?);
                }
                BoxType::DinfBox => {
                    dinf = Some(DinfBox::read_box(reader, s)?);
                }
                BoxType::StblBox => {
                    stbl = Some(StblBox::read_box(reader, s)?);
                }
                _ => {
                    log::debug!("skipping {name} box inside minf");
                    skip_box(reader, s)?;
                }
            }

            current = reader.stream_position()?;
        }

        let Some(stbl) = stbl else {
            return Err(Error::BoxNotFound(BoxType::StblBox));
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            vmhd,
            smhd,
            dinf: dinf.unwrap_or_default(),
            stbl,
        })
    }
}

impl WriteBox<&mut BoxWriter> for MinfBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            if let Some(vmhd) = &self.vmhd {
                w.write_child(vmhd)?;
            }
            if let Some(smhd) = &self.smhd {
                w.write_child(smhd)?;
            }
            w.write_child(&self.dinf)?;
            w.write_child(&self.stbl)?;
            Ok(())
        })?;
        Ok(())
    }
}
