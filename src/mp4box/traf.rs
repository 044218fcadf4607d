use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, skip_box, skip_bytes_to, BoxHeader, BoxType, BoxWriter, Error, Mp4Box, ReadBox,
    Result, TfdtBox, TfhdBox, TrunBox, WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TrafBox {
    pub tfhd: TfhdBox,
    pub tfdt: Option<TfdtBox>,
    pub truns: Vec<TrunBox>,
}

impl TrafBox {
    pub fn sample_count(&self) -> u64 {
        self.truns.iter().map(|trun| trun.sample_count as u64).sum()
    }
}

impl Mp4Box for TrafBox {
    fn box_type(&self) -> BoxType {
        BoxType::TrafBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "track_id={} truns={}",
            self.tfhd.track_id,
            self.truns.len()
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for TrafBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let mut tfhd = None;
        let mut tfdt = None;
        let mut truns = Vec::new();

        let mut current = reader.stream_position()?;
        let end = start + size;
        while current < end {
            // Get box header.
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "traf box contains a box with a larger size than it",
                ));
            }

            match name {
                BoxType::TfhdBox => {
                    tfhd = Some(TfhdBox::read_box(reader, s)?);
                }
                BoxType::TfdtBox => {
                    tfdt = Some(TfdtBox::read_box(reader, s)?);
                }
                BoxType::TrunBox => {
                    truns.push(TrunBox::read_box(reader, s)?);
                }
                _ => {
                    log::debug!("skipping {name} box inside traf");
                    skip_box(reader, s)?;
                }
            }

            current = reader.stream_position()?;
        }

        let Some(tfhd) = tfhd else {
            return Err(Error::BoxNotFound(BoxType::TfhdBox));
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self { tfhd, tfdt, truns })
    }
}

impl WriteBox<&mut BoxWriter> for TrafBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            w.write_child(&self.tfhd)?;
            if let Some(tfdt) = &self.tfdt {
                w.write_child(tfdt)?;
            }
            for trun in &self.truns {
                w.write_child(trun)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}
