//! All ISO-MP4 boxes (atoms) this crate reads and writes.
//!
//! * [ISO/IEC 14496-12](https://en.wikipedia.org/wiki/MPEG-4_Part_14) - ISO Base Media File Format (QuickTime, MPEG-4, etc)
//! * [ISO/IEC 14496-14](https://en.wikipedia.org/wiki/MPEG-4_Part_14) - MP4 file format
//! * [ISO/IEC 14496-15](https://www.iso.org/standard/83336.html) - NAL unit structured video (avcC, hvcC)
//!
//! * <http://mp4ra.org/#/atoms>
//!
//! Supported Atoms:
//! ```text
//! ftyp
//! moov
//!     mvhd
//!     trak
//!         tkhd
//!         mdia
//!             mdhd
//!             hdlr
//!             minf
//!                 stbl
//!                     stsd
//!                         avc1 (avcC)
//!                         hvc1 / hev1 (hvcC)
//!                         vp09 (vpcC)
//!                         av01 (av1C)
//!                         mp4a (esds)
//!                         Opus (dOps)
//!                     stts
//!                     stsc
//!                     stsz
//!                     stss
//!                     stco
//!                     co64
//!                 dinf
//!                     dref
//!                         url
//!                 smhd
//!                 vmhd
//!     mvex
//!         trex
//! moof
//!     mfhd
//!     traf
//!         tfhd
//!         tfdt
//!         trun
//! mdat
//! mfra
//!     tfra
//!     mfro
//! free
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::convert::TryInto;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::writer::BoxWriter;
use crate::{Error, FixedPointU16, FixedPointU8, FourCC, Result, TrackKind};

pub(crate) mod audio;
pub(crate) mod av01;
pub(crate) mod avc1;
pub(crate) mod dinf;
pub(crate) mod dops;
pub(crate) mod esds;
pub(crate) mod ftyp;
pub(crate) mod hdlr;
pub(crate) mod hevc;
pub(crate) mod mdhd;
pub(crate) mod mdia;
pub(crate) mod mfhd;
pub(crate) mod mfra;
pub(crate) mod minf;
pub(crate) mod moof;
pub(crate) mod moov;
pub(crate) mod mp4a;
pub(crate) mod mvex;
pub(crate) mod mvhd;
pub(crate) mod opus;
pub(crate) mod smhd;
pub(crate) mod stbl;
pub(crate) mod stco;
pub(crate) mod stsc;
pub(crate) mod stsd;
pub(crate) mod stss;
pub(crate) mod stsz;
pub(crate) mod stts;
pub(crate) mod tfdt;
pub(crate) mod tfhd;
pub(crate) mod tkhd;
pub(crate) mod traf;
pub(crate) mod trak;
pub(crate) mod trex;
pub(crate) mod trun;
pub(crate) mod visual;
pub(crate) mod vmhd;
pub(crate) mod vp09;
pub(crate) mod vpcc;

pub use audio::AudioSampleEntry;
pub use av01::{Av01Box, Av1CBox};
pub use avc1::{Avc1Box, AvcCBox};
pub use dinf::{DinfBox, DrefBox, UrlBox};
pub use dops::DopsBox;
pub use esds::EsdsBox;
pub use ftyp::FtypBox;
pub use hdlr::HdlrBox;
pub use hevc::{HevcBox, HvcCBox};
pub use mdhd::MdhdBox;
pub use mdia::MdiaBox;
pub use mfhd::MfhdBox;
pub use mfra::{MfraBox, MfroBox, TfraBox, TfraEntry};
pub use minf::MinfBox;
pub use moof::MoofBox;
pub use moov::MoovBox;
pub use mp4a::Mp4aBox;
pub use mvex::MvexBox;
pub use mvhd::MvhdBox;
pub use opus::OpusBox;
pub use smhd::SmhdBox;
pub use stbl::StblBox;
pub use stco::{Co64Box, StcoBox};
pub use stsc::{StscBox, StscEntry};
pub use stsd::{StsdBox, StsdBoxContent};
pub use stss::StssBox;
pub use stsz::StszBox;
pub use stts::{SttsBox, SttsEntry};
pub use tfdt::TfdtBox;
pub use tfhd::TfhdBox;
pub use tkhd::{Matrix, TkhdBox};
pub use traf::TrafBox;
pub use trak::TrakBox;
pub use trex::TrexBox;
pub use trun::TrunBox;
pub use visual::VisualSampleEntry;
pub use vmhd::VmhdBox;
pub use vp09::Vp09Box;
pub use vpcc::VpccBox;

pub const HEADER_SIZE: u64 = 8;
pub const HEADER_LARGE_SIZE: u64 = 16;
pub const HEADER_EXT_SIZE: u64 = 4;

macro_rules! boxtype {
    ($( $name:ident => $value:expr ),*) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub enum BoxType {
            $( $name, )*
            UnknownBox(u32),
        }

        impl From<u32> for BoxType {
            fn from(t: u32) -> BoxType {
                match t {
                    $( $value => BoxType::$name, )*
                    _ => BoxType::UnknownBox(t),
                }
            }
        }

        impl From<BoxType> for u32 {
            fn from(b: BoxType) -> u32 {
                match b {
                    $( BoxType::$name => $value, )*
                    BoxType::UnknownBox(t) => t,
                }
            }
        }
    }
}

boxtype! {
    FtypBox => 0x66747970,
    MvhdBox => 0x6d766864,
    MfhdBox => 0x6d666864,
    FreeBox => 0x66726565,
    SkipBox => 0x736b6970,
    MdatBox => 0x6d646174,
    MoovBox => 0x6d6f6f76,
    MvexBox => 0x6d766578,
    TrexBox => 0x74726578,
    MoofBox => 0x6d6f6f66,
    TkhdBox => 0x746b6864,
    TfhdBox => 0x74666864,
    TfdtBox => 0x74666474,
    MdiaBox => 0x6d646961,
    MdhdBox => 0x6d646864,
    HdlrBox => 0x68646c72,
    MinfBox => 0x6d696e66,
    VmhdBox => 0x766d6864,
    StblBox => 0x7374626c,
    StsdBox => 0x73747364,
    SttsBox => 0x73747473,
    StssBox => 0x73747373,
    StscBox => 0x73747363,
    StszBox => 0x7374737A,
    StcoBox => 0x7374636F,
    Co64Box => 0x636F3634,
    TrakBox => 0x7472616b,
    TrafBox => 0x74726166,
    TrunBox => 0x7472756E,
    DinfBox => 0x64696e66,
    DrefBox => 0x64726566,
    UrlBox  => 0x75726C20,
    SmhdBox => 0x736d6864,
    Avc1Box => 0x61766331,
    AvcCBox => 0x61766343,
    Av01Box => 0x61763031,
    Av1CBox => 0x61763143,
    Hev1Box => 0x68657631,
    Hvc1Box => 0x68766331,
    HvcCBox => 0x68766343,
    Mp4aBox => 0x6d703461,
    EsdsBox => 0x65736473,
    OpusBox => 0x4f707573,
    DopsBox => 0x644f7073,
    VpccBox => 0x76706343,
    Vp09Box => 0x76703039,
    MfraBox => 0x6d667261,
    TfraBox => 0x74667261,
    MfroBox => 0x6d66726f,
    WaveBox => 0x77617665
}

impl BoxType {
    /// Boxes whose payload is nothing but child boxes.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Self::MoovBox
                | Self::TrakBox
                | Self::MdiaBox
                | Self::MinfBox
                | Self::DinfBox
                | Self::StblBox
                | Self::MvexBox
                | Self::MoofBox
                | Self::TrafBox
                | Self::MfraBox
        )
    }

    /// Bytes between the header and the first child for boxes that carry
    /// fields before their children (full-box header, entry counts, sample entry fields).
    pub fn children_offset(&self) -> Option<u64> {
        match self {
            t if t.is_container() => Some(0),
            Self::StsdBox | Self::DrefBox => Some(HEADER_EXT_SIZE + 4),
            Self::Avc1Box | Self::Hvc1Box | Self::Hev1Box | Self::Vp09Box | Self::Av01Box => {
                Some(visual::VISUAL_SAMPLE_ENTRY_SIZE)
            }
            Self::Mp4aBox | Self::OpusBox => Some(audio::AUDIO_SAMPLE_ENTRY_SIZE),
            _ => None,
        }
    }
}

pub trait Mp4Box: Sized {
    fn box_type(&self) -> BoxType;
    fn summary(&self) -> Result<String>;

    fn to_json(&self) -> Result<String>
    where
        Self: Serialize,
    {
        Ok(serde_json::to_string(&self)?)
    }
}

pub trait ReadBox<T>: Sized {
    fn read_box(_: T, size: u64) -> Result<Self>;
}

pub trait WriteBox<T>: Sized {
    fn write_box(&self, _: T) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    pub name: BoxType,
    pub size: u64,
}

impl BoxHeader {
    pub fn new(name: BoxType, size: u64) -> Self {
        Self { name, size }
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        // Create and read to buf.
        let mut buf = [0u8; 8]; // 8 bytes for box header.
        reader.read_exact(&mut buf)?;

        // Get size.
        #[allow(clippy::unwrap_used)] // [u8; 4] from a slice that is 4 long cannot fail
        let size = u32::from_be_bytes(buf[0..4].try_into().unwrap());

        // Get box type string.
        #[allow(clippy::unwrap_used)] // [u8; 4] from a slice that is 4 long cannot fail
        let typ = u32::from_be_bytes(buf[4..8].try_into().unwrap());

        // Get largesize if size is 1
        if size == 1 {
            reader.read_exact(&mut buf)?;
            let largesize = u64::from_be_bytes(buf);

            Ok(Self {
                name: BoxType::from(typ),

                // Subtract the length of the serialized largesize, as callers assume `size - HEADER_SIZE` is the length
                // of the box data. Disallow `largesize < 16`, or else a largesize of 8 will result in a BoxHeader::size
                // of 0, incorrectly indicating that the box data extends to the end of the stream.
                size: match largesize {
                    0 => 0,
                    1..=15 => return Err(Error::InvalidData("64-bit box size too small")),
                    16..=u64::MAX => largesize - 8,
                },
            })
        } else {
            Ok(Self {
                name: BoxType::from(typ),
                size: size as u64,
            })
        }
    }

    /// Writes the header for a box of `self.size` total bytes (header included).
    ///
    /// The compact form is used whenever the size fits into 32 bits.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<u64> {
        if self.size > u32::MAX as u64 {
            return self.write_large(writer);
        }
        writer.write_u32::<BigEndian>(self.size as u32)?;
        writer.write_u32::<BigEndian>(self.name.into())?;
        Ok(HEADER_SIZE)
    }

    /// Writes the 64-bit `largesize` form regardless of the size.
    pub fn write_large<W: Write>(&self, writer: &mut W) -> Result<u64> {
        writer.write_u32::<BigEndian>(1)?;
        writer.write_u32::<BigEndian>(self.name.into())?;
        writer.write_u64::<BigEndian>(self.size)?;
        Ok(HEADER_LARGE_SIZE)
    }

    /// Length of the header [`Self::write`] produces for a box of `size` bytes of payload.
    pub fn header_len(payload_size: u64) -> u64 {
        if payload_size + HEADER_SIZE > u32::MAX as u64 {
            HEADER_LARGE_SIZE
        } else {
            HEADER_SIZE
        }
    }
}

pub fn read_box_header_ext<R: Read>(reader: &mut R) -> Result<(u8, u32)> {
    let version = reader.read_u8()?;
    let flags = reader.read_u24::<BigEndian>()?;
    Ok((version, flags))
}

pub fn box_start<R: Seek>(seeker: &mut R) -> Result<u64> {
    Ok(seeker.stream_position()? - HEADER_SIZE)
}

pub fn skip_bytes<S: Seek>(seeker: &mut S, size: u64) -> Result<()> {
    seeker.seek(SeekFrom::Current(size as i64))?;
    Ok(())
}

pub fn skip_bytes_to<S: Seek>(seeker: &mut S, pos: u64) -> Result<()> {
    seeker.seek(SeekFrom::Start(pos))?;
    Ok(())
}

pub fn skip_box<S: Seek>(seeker: &mut S, size: u64) -> Result<()> {
    let start = box_start(seeker)?;
    skip_bytes_to(seeker, start + size)?;
    Ok(())
}

/// Reads the remaining payload of a box whose header started at `start`.
pub fn read_to_end_of_box<R: Read + Seek>(reader: &mut R, start: u64, size: u64) -> Result<Vec<u8>> {
    let current = reader.stream_position()?;
    let end = start + size;
    if current > end {
        return Err(Error::InvalidData("box payload overruns its declared size"));
    }
    let mut raw = vec![0u8; (end - current) as usize];
    reader.read_exact(&mut raw)?;
    Ok(raw)
}

mod value_u32 {
    use crate::types::FixedPointU16;
    use serde::{self, Serializer};

    pub fn serialize<S>(fixed: &FixedPointU16, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u16(fixed.value())
    }
}

mod value_u8 {
    use crate::types::FixedPointU8;
    use serde::{self, Serializer};

    pub fn serialize<S>(fixed: &FixedPointU8, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(fixed.value())
    }
}
