use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, skip_box, skip_bytes_to, BoxHeader, BoxType, BoxWriter, Co64Box, Error, Mp4Box,
    ReadBox, Result, StcoBox, StscBox, StsdBox, StssBox, StszBox, SttsBox, WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StblBox {
    pub stsd: StsdBox,
    pub stts: SttsBox,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stss: Option<StssBox>,
    pub stsc: StscBox,
    pub stsz: StszBox,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stco: Option<StcoBox>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub co64: Option<Co64Box>,
}

impl StblBox {
    /// Offset of the 1-based chunk `chunk_index`, from whichever offset table is present.
    pub fn chunk_offset(&self, chunk_index: u32) -> Option<u64> {
        let index = (chunk_index as usize).checked_sub(1)?;
        if let Some(stco) = &self.stco {
            stco.entries.get(index).map(|offset| *offset as u64)
        } else if let Some(co64) = &self.co64 {
            co64.entries.get(index).copied()
        } else {
            None
        }
    }

    pub fn chunk_count(&self) -> usize {
        match (&self.stco, &self.co64) {
            (Some(stco), _) => stco.entries.len(),
            (None, Some(co64)) => co64.entries.len(),
            (None, None) => 0,
        }
    }
}

impl Mp4Box for StblBox {
    fn box_type(&self) -> BoxType {
        BoxType::StblBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!(
            "samples={} chunks={} sync_samples={}",
            self.stsz.sample_count,
            self.chunk_count(),
            self.stss
                .as_ref()
                .map_or_else(|| "all".to_owned(), |stss| stss.entries.len().to_string())
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for StblBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let mut stsd = None;
        let mut stts = None;
        let mut stss = None;
        let mut stsc = None;
        let mut stsz = None;
        let mut stco = None;
        let mut co64 = None;

        let mut current = reader.stream_position()?;
        let end = start + size;
        while current < end {
            // Get box header.
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "stbl box contains a box with a larger size than it",
                ));
            }

            match name {
                BoxType::StsdBox => {
                    stsd = Some(StsdBox::read_box(reader, s)?);
                }
                BoxType::SttsBox => {
                    stts = Some(SttsBox::read_box(reader, s)?);
                }
                BoxType::StssBox => {
                    stss = Some(StssBox::read_box(reader, s)?);
                }
                BoxType::StscBox => {
                    stsc = Some(StscBox::read_box(reader, s)?);
                }
                BoxType::StszBox => {
                    stsz = Some(StszBox::read_box(reader, s)?);
                }
                BoxType::StcoBox => {
                    stco = Some(StcoBox::read_box(reader, s)?);
                }
                BoxType::Co64Box => {
                    co64 = Some(Co64Box::read_box(reader, s)?);
                }
                _ => {
                    log::warn!("skipping unsupported {name} box inside stbl");
                    skip_box(reader, s)?;
                }
            }

            current = reader.stream_position()?;
        }

        let Some(stsd) = stsd else {
            return Err(Error::BoxNotFound(BoxType::StsdBox));
        };
        let Some(stts) = stts else {
            return Err(Error::BoxNotFound(BoxType::SttsBox));
        };
        let Some(stsc) = stsc else {
            return Err(Error::BoxNotFound(BoxType::StscBox));
        };
        let Some(stsz) = stsz else {
            return Err(Error::BoxNotFound(BoxType::StszBox));
        };
        if stco.is_none() && co64.is_none() {
            return Err(Error::BoxNotFound(BoxType::StcoBox));
        }

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            stsd,
            stts,
            stss,
            stsc,
            stsz,
            stco,
            co64,
        })
    }
}

impl WriteBox<&mut BoxWriter> for StblBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            w.write_child(&self.stsd)?;
            w.write_child(&self.stts)?;
            if let Some(stss) = &self.stss {
                w.write_child(stss)?;
            }
            w.write_child(&self.stsc)?;
            w.write_child(&self.stsz)?;
            match (&self.stco, &self.co64) {
                (Some(stco), _) => w.write_child(stco)?,
                (None, Some(co64)) => w.write_child(co64)?,
                (None, None) => w.write_child(&StcoBox::default())?,
            }
            Ok(())
        })?;
        Ok(())
    }
}
