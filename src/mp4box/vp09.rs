use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::visual::read_config_child;
use crate::mp4box::{
    box_start, BoxType, BoxWriter, Mp4Box, ReadBox, Result, VisualSampleEntry, VpccBox, WriteBox,
};

/// VP9 sample entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Vp09Box {
    pub visual: VisualSampleEntry,
    pub vpcc: Option<VpccBox>,
}

impl Mp4Box for Vp09Box {
    fn box_type(&self) -> BoxType {
        BoxType::Vp09Box
    }

    fn summary(&self) -> Result<String> {
        Ok(format!("{self:?}"))
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for Vp09Box {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;
        let visual = VisualSampleEntry::read(reader)?;
        let vpcc = read_config_child(reader, start + size, size, BoxType::VpccBox, |r, s| {
            VpccBox::read_box(r, s)
        })?;
        Ok(Self { visual, vpcc })
    }
}

impl WriteBox<&mut BoxWriter> for Vp09Box {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            self.visual.write(w)?;
            if let Some(vpcc) = &self.vpcc {
                w.write_child(vpcc)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::visual::VISUAL_SAMPLE_ENTRY_SIZE;
    use crate::mp4box::BoxHeader;
    use std::io::Cursor;

    #[test]
    fn test_vp09() {
        let src_box = Vp09Box {
            visual: VisualSampleEntry::new(1280, 720),
            vpcc: Some(VpccBox::from_codec_string("vp09.00.10.08").unwrap()),
        };
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len() as u64, 8 + VISUAL_SAMPLE_ENTRY_SIZE + 20);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::Vp09Box);
        let dst_box = Vp09Box::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
    }
}
