use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, skip_box, skip_bytes_to, BoxHeader, BoxType, BoxWriter, Error, MfhdBox, Mp4Box,
    ReadBox, Result, TrafBox, WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MoofBox {
    /// The start position of the box in the stream.
    pub start: u64,

    pub mfhd: MfhdBox,

    #[serde(rename = "traf")]
    pub trafs: Vec<TrafBox>,
}

impl Mp4Box for MoofBox {
    fn box_type(&self) -> BoxType {
        BoxType::MoofBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("trafs={}", self.trafs.len());
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for MoofBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let mut mfhd = None;
        let mut trafs = Vec::new();

        let mut current = reader.stream_position()?;
        let end = start + size;
        while current < end {
            // Get box header.
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "moof box contains a box with a larger size than it",
                ));
            }

            match name {
                BoxType::MfhdBox => {
                    mfhd = Some(MfhdBox::read_box(reader, s)?);
                }
                BoxType::TrafBox => {
                    let traf = TrafBox::read_box(reader, s)?;
                    trafs.push(traf);
                }
                _ => {
                    log::debug!("skipping {name} box inside moof");
                    skip_box(reader, s)?;
                }
            }

            current = reader.stream_position()?;
        }

        let Some(mfhd) = mfhd else {
            return Err(Error::BoxNotFound(BoxType::MfhdBox));
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self { start, mfhd, trafs })
    }
}

impl WriteBox<&mut BoxWriter> for MoofBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            w.write_child(&self.mfhd)?;
            for traf in &self.trafs {
                w.write_child(traf)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::{TfdtBox, TfhdBox, TrunBox};
    use std::io::Cursor;

    #[test]
    fn test_moof() {
        let traf = |track_id| TrafBox {
            tfhd: TfhdBox::moof_relative(track_id, 1),
            tfdt: Some(TfdtBox::new(3000)),
            truns: vec![TrunBox::new(0, vec![1000], vec![42], vec![TrunBox::SYNC_SAMPLE_FLAGS])
                .unwrap()],
        };
        let src_box = MoofBox {
            start: 0,
            mfhd: MfhdBox::new(7),
            trafs: vec![traf(1), traf(2)],
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::MoofBox);
        let dst_box = MoofBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
        assert_eq!(dst_box.trafs[1].sample_count(), 1);
    }
}
