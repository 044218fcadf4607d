use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek};

use crate::mp4box::{
    box_start, skip_bytes_to, BoxType, BoxWriter, Error, FourCC, Mp4Box, ReadBox, Result,
    WriteBox,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FtypBox {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

impl FtypBox {
    /// Brands for a file with a single `moov` and `mdat`.
    pub fn progressive(extra_brands: &[[u8; 4]]) -> Self {
        let mut compatible_brands: Vec<FourCC> =
            [*b"isom", *b"iso2"].into_iter().map(FourCC::from).collect();
        compatible_brands.extend(extra_brands.iter().copied().map(FourCC::from));
        compatible_brands.push(FourCC::from(*b"mp41"));
        Self {
            major_brand: FourCC::from(*b"isom"),
            minor_version: 0x200,
            compatible_brands,
        }
    }

    /// Brands for a fragmented file (`moov` followed by `moof`/`mdat` pairs).
    pub fn fragmented() -> Self {
        Self {
            major_brand: FourCC::from(*b"iso5"),
            minor_version: 0x200,
            compatible_brands: [*b"iso5", *b"iso6", *b"mp41"]
                .into_iter()
                .map(FourCC::from)
                .collect(),
        }
    }
}

impl Mp4Box for FtypBox {
    fn box_type(&self) -> BoxType {
        BoxType::FtypBox
    }

    fn summary(&self) -> Result<String> {
        let mut compatible_brands = Vec::new();
        for brand in &self.compatible_brands {
            compatible_brands.push(brand.to_string());
        }
        let s = format!(
            "major_brand={} minor_version={} compatible_brands={}",
            self.major_brand,
            self.minor_version,
            compatible_brands.join("-")
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for FtypBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        if size < 16 || size % 4 != 0 {
            return Err(Error::InvalidData("ftyp size too small or not aligned"));
        }
        let brand_count = (size - 16) / 4; // header + major + minor
        let major = reader.read_u32::<BigEndian>()?;
        let minor = reader.read_u32::<BigEndian>()?;

        let mut brands = Vec::new();
        for _ in 0..brand_count {
            let b = reader.read_u32::<BigEndian>()?;
            brands.push(From::from(b));
        }

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            major_brand: From::from(major),
            minor_version: minor,
            compatible_brands: brands,
        })
    }
}

impl WriteBox<&mut BoxWriter> for FtypBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_box(self.box_type(), |w| {
            w.write_u32::<BigEndian>((&self.major_brand).into())?;
            w.write_u32::<BigEndian>(self.minor_version)?;
            for brand in &self.compatible_brands {
                w.write_u32::<BigEndian>(brand.into())?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4box::BoxHeader;
    use std::io::Cursor;

    #[test]
    fn test_ftyp() {
        let src_box = FtypBox::progressive(&[*b"avc1"]);
        let mut writer = BoxWriter::new();
        writer.write_child(&src_box).unwrap();
        let buf = writer.into_inner().unwrap();
        assert_eq!(buf.len(), 8 + 8 + 4 * 4);

        let mut reader = Cursor::new(&buf);
        let header = BoxHeader::read(&mut reader).unwrap();
        assert_eq!(header.name, BoxType::FtypBox);
        assert_eq!(header.size, buf.len() as u64);

        let dst_box = FtypBox::read_box(&mut reader, header.size).unwrap();
        assert_eq!(src_box, dst_box);
        assert_eq!(
            dst_box.summary().unwrap(),
            "major_brand=isom minor_version=512 compatible_brands=isom-iso2-avc1-mp41"
        );
    }
}
