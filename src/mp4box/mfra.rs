use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::error::CapacityOverflow;
use crate::mp4box::{
    box_start, read_box_header_ext, skip_box, skip_bytes_to, BoxHeader, BoxType, BoxWriter,
    Error, Mp4Box, ReadBox, Result, WriteBox, HEADER_EXT_SIZE, HEADER_SIZE,
};

/// Movie fragment random access: per-track tables of sync samples, found by
/// reading the trailing `mfro` at the very end of the file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MfraBox {
    #[serde(rename = "tfra")]
    pub tfras: Vec<TfraBox>,
    pub mfro: MfroBox,
}

impl MfraBox {
    pub fn new(tfras: Vec<TfraBox>) -> Self {
        let mut this = Self {
            tfras,
            mfro: MfroBox::default(),
        };
        this.mfro.size = this.size().try_into().unwrap_or(u32::MAX);
        this
    }

    /// Serialized size of the whole `mfra` box.
    pub fn size(&self) -> u64 {
        HEADER_SIZE + self.tfras.iter().map(TfraBox::size).sum::<u64>() + MfroBox::SIZE
    }
}

impl Mp4Box for MfraBox {
    fn box_type(&self) -> BoxType {
        BoxType::MfraBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("tfras={} size={}", self.tfras.len(), self.mfro.size);
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for MfraBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let mut tfras = Vec::new();
        let mut mfro = None;

        let mut current = reader.stream_position()?;
        let end = start + size;
        while current < end {
            // Get box header.
            let header = BoxHeader::read(reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "mfra box contains a box with a larger size than it",
                ));
            }

            match name {
                BoxType::TfraBox => {
                    tfras.push(TfraBox::read_box(reader, s)?);
                }
                BoxType::MfroBox => {
                    mfro = Some(MfroBox::read_box(reader, s)?);
                }
                _ => {
                    log::debug!("skipping {name} box inside mfra");
                    skip_box(reader, s)?;
                }
            }

            current = reader.stream_position()?;
        }

        let Some(mfro) = mfro else {
            return Err(Error::BoxNotFound(BoxType::MfroBox));
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self { tfras, mfro })
    }
}

impl WriteBox<&mut BoxWriter> for MfraBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        let size = u32::try_from(self.size()).map_err(|_| CapacityOverflow::Field("mfro size"))?;
        writer.write_box(self.box_type(), |w| {
            for tfra in &self.tfras {
                w.write_child(tfra)?;
            }
            w.write_child(&MfroBox { size, ..self.mfro })?;
            Ok(())
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TfraEntry {
    /// Presentation time of the sync sample, in track timescale units.
    pub time: u64,

    /// Offset of the `moof` holding the sample, from the start of the file.
    pub moof_offset: u64,

    /// 1-based index of the `traf` inside the `moof`.
    pub traf_number: u32,

    /// 1-based index of the `trun` inside the `traf`.
    pub trun_number: u32,

    /// 1-based index of the sample inside the `trun`.
    pub sample_number: u32,
}

/// Track fragment random access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TfraBox {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,

    #[serde(skip_serializing)]
    pub entries: Vec<TfraEntry>,
}

impl Default for TfraBox {
    fn default() -> Self {
        Self {
            version: 1,
            flags: 0,
            track_id: 0,
            entries: Vec::new(),
        }
    }
}

/// Written field widths: 4 bytes for each of traf, trun and sample numbers.
const LENGTH_SIZES_ALL_FOUR_BYTES: u32 = 0x3F;

impl TfraBox {
    pub fn new(track_id: u32, entries: Vec<TfraEntry>) -> Self {
        Self {
            track_id,
            entries,
            ..Default::default()
        }
    }

    fn entry_size(&self) -> u64 {
        let time_and_offset = if self.version == 1 { 16 } else { 8 };
        time_and_offset + 12
    }

    pub fn size(&self) -> u64 {
        HEADER_SIZE + HEADER_EXT_SIZE + 12 + self.entries.len() as u64 * self.entry_size()
    }
}

fn read_sized<R: Read>(reader: &mut R, size_bits: u32) -> Result<u32> {
    Ok(match size_bits {
        0 => reader.read_u8()? as u32,
        1 => reader.read_u16::<BigEndian>()? as u32,
        2 => reader.read_u24::<BigEndian>()?,
        _ => reader.read_u32::<BigEndian>()?,
    })
}

impl Mp4Box for TfraBox {
    fn box_type(&self) -> BoxType {
        BoxType::TfraBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("track_id={} entries={}", self.track_id, self.entries.len());
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for TfraBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;
        let track_id = reader.read_u32::<BigEndian>()?;
        let lengths = reader.read_u32::<BigEndian>()?;
        let traf_bits = (lengths >> 4) & 0x3;
        let trun_bits = (lengths >> 2) & 0x3;
        let sample_bits = lengths & 0x3;
        let entry_count = reader.read_u32::<BigEndian>()?;

        let time_and_offset = if version == 1 { 16 } else { 8 };
        let entry_size = time_and_offset + traf_bits + trun_bits + sample_bits + 3;
        if u64::from(entry_count) * entry_size as u64
            > size.saturating_sub(HEADER_SIZE + HEADER_EXT_SIZE + 12)
        {
            return Err(Error::InvalidData(
                "tfra entry_count indicates more entries than could fit in the box",
            ));
        }

        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let (time, moof_offset) = if version == 1 {
                (
                    reader.read_u64::<BigEndian>()?,
                    reader.read_u64::<BigEndian>()?,
                )
            } else {
                (
                    reader.read_u32::<BigEndian>()? as u64,
                    reader.read_u32::<BigEndian>()? as u64,
                )
            };
            entries.push(TfraEntry {
                time,
                moof_offset,
                traf_number: read_sized(reader, traf_bits)?,
                trun_number: read_sized(reader, trun_bits)?,
                sample_number: read_sized(reader, sample_bits)?,
            });
        }

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            track_id,
            entries,
        })
    }
}

impl WriteBox<&mut BoxWriter> for TfraBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        let entry_count = u32::try_from(self.entries.len())
            .map_err(|_| CapacityOverflow::EntryCount(self.entries.len()))?;
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(self.track_id)?;
            w.write_u32::<BigEndian>(LENGTH_SIZES_ALL_FOUR_BYTES)?;
            w.write_u32::<BigEndian>(entry_count)?;
            for entry in &self.entries {
                if self.version == 1 {
                    w.write_u64::<BigEndian>(entry.time)?;
                    w.write_u64::<BigEndian>(entry.moof_offset)?;
                } else {
                    let time = u32::try_from(entry.time)
                        .map_err(|_| CapacityOverflow::Field("tfra time"))?;
                    let moof_offset = u32::try_from(entry.moof_offset)
                        .map_err(|_| CapacityOverflow::Field("tfra moof_offset"))?;
                    w.write_u32::<BigEndian>(time)?;
                    w.write_u32::<BigEndian>(moof_offset)?;
                }
                w.write_u32::<BigEndian>(entry.traf_number)?;
                w.write_u32::<BigEndian>(entry.trun_number)?;
                w.write_u32::<BigEndian>(entry.sample_number)?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

/// Movie fragment random access offset: the size of the enclosing `mfra`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MfroBox {
    pub version: u8,
    pub flags: u32,
    pub size: u32,
}

impl MfroBox {
    pub const SIZE: u64 = HEADER_SIZE + HEADER_EXT_SIZE + 4;
}

impl Mp4Box for MfroBox {
    fn box_type(&self) -> BoxType {
        BoxType::MfroBox
    }

    fn summary(&self) -> Result<String> {
        let s = format!("size={}", self.size);
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for MfroBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;
        let mfra_size = reader.read_u32::<BigEndian>()?;

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            size: mfra_size,
        })
    }
}

impl WriteBox<&mut BoxWriter> for MfroBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            w.write_u32::<BigEndian>(self.size)?;
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_mfra() {
        let src_box = MfraBox::new(vec![
            TfraBox::new(
                1,
                vec![
                    TfraEntry {
                        time: 0,
                        moof_offset: 1024,
                        traf_number: 1,
                        trun_number: 1,
                        sample_number: 1,
                    },
                    TfraEntry {
                        time: 180_000,
                        moof_offset: 250_000,
                        traf_number: 1,
                        trun_number: 1,
                        sample_number: 1,
                    },
                ],
            ),
            TfraBox::new(2, Vec::new()),
        ]);
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len() as u64, src_box.size());

        // The trailing mfro points back to the start of the mfra.
        let mfro_size = u32::from_be_bytes(buf[buf.len() - 4..].try_into().unwrap());
        assert_eq!(mfro_size as usize, buf.len());

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::MfraBox);
        let dst_box = MfraBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
    }

    #[test]
    fn test_tfra_narrow_fields() {
        // version 0, one-byte traf/trun/sample numbers
        let mut buf = vec![0, 0, 0, 0, b't', b'f', b'r', b'a', 0, 0, 0, 0];
        buf.extend_from_slice(&5u32.to_be_bytes()); // track_id
        buf.extend_from_slice(&0u32.to_be_bytes()); // length sizes
        buf.extend_from_slice(&1u32.to_be_bytes()); // entry_count
        buf.extend_from_slice(&90u32.to_be_bytes());
        buf.extend_from_slice(&400u32.to_be_bytes());
        buf.extend_from_slice(&[2, 1, 3]);
        let len = buf.len() as u32;
        buf[..4].copy_from_slice(&len.to_be_bytes());

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        let tfra = TfraBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(tfra.track_id, 5);
        assert_eq!(
            tfra.entries,
            [TfraEntry {
                time: 90,
                moof_offset: 400,
                traf_number: 2,
                trun_number: 1,
                sample_number: 3,
            }]
        );
    }
}
