use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Cursor, Read, Seek, Write};

use crate::error::CapacityOverflow;
use crate::mp4box::{
    box_start, read_box_header_ext, skip_bytes, skip_bytes_to, BoxType, BoxWriter, Error, Mp4Box,
    ReadBox, Result, WriteBox,
};

/// MPEG-4 audio sampling frequencies, indexed by `samplingFrequencyIndex`.
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC-LC audio object type.
pub const AOT_AAC_LC: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct EsdsBox {
    pub version: u8,
    pub flags: u32,
    pub es_desc: ESDescriptor,
}

impl EsdsBox {
    /// Wraps an encoder-provided `AudioSpecificConfig`.
    pub fn from_audio_specific_config(asc: impl Into<Vec<u8>>) -> Self {
        Self {
            version: 0,
            flags: 0,
            es_desc: ESDescriptor::new(DecoderSpecificDescriptor::from_raw(asc)),
        }
    }

    /// Builds an AAC-LC configuration for the given rate and channel count.
    pub fn synthesize(sample_rate: u32, channels: u16) -> Self {
        Self::from_audio_specific_config(audio_specific_config(AOT_AAC_LC, sample_rate, channels))
    }

    /// RFC 6381 codec string, e.g. `mp4a.40.2`.
    pub fn codec_string(&self) -> String {
        let dec_config = &self.es_desc.dec_config;
        format!(
            "mp4a.{:02x}.{}",
            dec_config.object_type_indication, dec_config.dec_specific.profile
        )
    }
}

impl Mp4Box for EsdsBox {
    fn box_type(&self) -> BoxType {
        BoxType::EsdsBox
    }

    fn summary(&self) -> Result<String> {
        let dec_specific = &self.es_desc.dec_config.dec_specific;
        let s = format!(
            "profile={} freq_index={} chan_conf={}",
            dec_specific.profile, dec_specific.freq_index, dec_specific.chan_conf
        );
        Ok(s)
    }
}

impl<R: Read + Seek> ReadBox<&mut R> for EsdsBox {
    fn read_box(reader: &mut R, size: u64) -> Result<Self> {
        let start = box_start(reader)?;

        let (version, flags) = read_box_header_ext(reader)?;

        let mut es_desc = None;

        let mut current = reader.stream_position()?;
        let end = start + size;
        while current < end {
            let (desc_tag, desc_size) = read_desc(reader)?;
            match desc_tag {
                0x03 => {
                    es_desc = Some(ESDescriptor::read_desc(reader, desc_size)?);
                }
                _ => break,
            }
            current = reader.stream_position()?;
        }

        let Some(es_desc) = es_desc else {
            return Err(Error::InvalidData("ESDescriptor not found"));
        };

        skip_bytes_to(reader, start + size)?;

        Ok(Self {
            version,
            flags,
            es_desc,
        })
    }
}

impl WriteBox<&mut BoxWriter> for EsdsBox {
    fn write_box(&self, writer: &mut BoxWriter) -> Result<()> {
        writer.write_full_box(self.box_type(), self.version, self.flags, |w| {
            self.es_desc.write_desc(w)
        })?;
        Ok(())
    }
}

trait Descriptor: Sized {
    const DESC_TAG: u8;

    fn desc_size(&self) -> u32;
}

trait ReadDesc<T>: Sized {
    fn read_desc(_: T, size: u32) -> Result<Self>;
}

trait WriteDesc<T>: Sized {
    fn write_desc(&self, _: T) -> Result<()>;
}

fn read_desc<R: Read>(reader: &mut R) -> Result<(u8, u32)> {
    let tag = reader.read_u8()?;

    let mut size: u32 = 0;
    for _ in 0..4 {
        let b = reader.read_u8()?;
        size = (size << 7) | (b & 0x7F) as u32;
        if b & 0x80 == 0 {
            break;
        }
    }

    Ok((tag, size))
}

fn size_of_length(size: u32) -> u32 {
    match size {
        0x0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1FFFFF => 3,
        _ => 4,
    }
}

fn write_desc_header<W: Write>(writer: &mut W, tag: u8, size: u32) -> Result<()> {
    if size > 0x0FFF_FFFF {
        return Err(CapacityOverflow::Field("descriptor length").into());
    }
    writer.write_u8(tag)?;

    let len = size_of_length(size);
    for i in (0..len).rev() {
        let mut b = ((size >> (i * 7)) & 0x7F) as u8;
        if i > 0 {
            b |= 0x80;
        }
        writer.write_u8(b)?;
    }

    Ok(())
}

/// Full size of a descriptor: tag, length field and payload.
fn total_size<D: Descriptor>(desc: &D) -> u32 {
    let size = desc.desc_size();
    1 + size_of_length(size) + size
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ESDescriptor {
    pub es_id: u16,

    pub dec_config: DecoderConfigDescriptor,
    pub sl_config: SLConfigDescriptor,
}

impl ESDescriptor {
    pub fn new(dec_specific: DecoderSpecificDescriptor) -> Self {
        Self {
            es_id: 1,
            dec_config: DecoderConfigDescriptor::new(dec_specific),
            sl_config: SLConfigDescriptor::new(),
        }
    }
}

impl Descriptor for ESDescriptor {
    const DESC_TAG: u8 = 0x03;

    fn desc_size(&self) -> u32 {
        3 + total_size(&self.dec_config) + total_size(&self.sl_config)
    }
}

impl<R: Read + Seek> ReadDesc<&mut R> for ESDescriptor {
    fn read_desc(reader: &mut R, size: u32) -> Result<Self> {
        let start = reader.stream_position()?;

        let es_id = reader.read_u16::<BigEndian>()?;
        reader.read_u8()?; // XXX flags must be 0

        let mut dec_config = None;
        let mut sl_config = None;

        let mut current = reader.stream_position()?;
        let end = start + size as u64;
        while current < end {
            let (desc_tag, desc_size) = read_desc(reader)?;
            match desc_tag {
                0x04 => {
                    dec_config = Some(DecoderConfigDescriptor::read_desc(reader, desc_size)?);
                }
                0x06 => {
                    sl_config = Some(SLConfigDescriptor::read_desc(reader, desc_size)?);
                }
                _ => {
                    skip_bytes(reader, desc_size as u64)?;
                }
            }
            current = reader.stream_position()?;
        }

        Ok(Self {
            es_id,
            dec_config: dec_config.unwrap_or_default(),
            sl_config: sl_config.unwrap_or_default(),
        })
    }
}

impl<W: Write> WriteDesc<&mut W> for ESDescriptor {
    fn write_desc(&self, writer: &mut W) -> Result<()> {
        write_desc_header(writer, Self::DESC_TAG, self.desc_size())?;
        writer.write_u16::<BigEndian>(self.es_id)?;
        writer.write_u8(0)?; // no stream dependence, URL or OCR stream

        self.dec_config.write_desc(&mut *writer)?;
        self.sl_config.write_desc(&mut *writer)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DecoderConfigDescriptor {
    pub object_type_indication: u8,
    pub stream_type: u8,
    pub up_stream: u8,
    pub buffer_size_db: u32,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,

    pub dec_specific: DecoderSpecificDescriptor,
}

impl DecoderConfigDescriptor {
    pub fn new(dec_specific: DecoderSpecificDescriptor) -> Self {
        Self {
            object_type_indication: 0x40, // MPEG-4 audio
            stream_type: 0x05,            // audio stream
            up_stream: 0,
            buffer_size_db: 0,
            max_bitrate: 0,
            avg_bitrate: 0,
            dec_specific,
        }
    }
}

impl Descriptor for DecoderConfigDescriptor {
    const DESC_TAG: u8 = 0x04;

    fn desc_size(&self) -> u32 {
        13 + total_size(&self.dec_specific)
    }
}

impl<R: Read + Seek> ReadDesc<&mut R> for DecoderConfigDescriptor {
    fn read_desc(reader: &mut R, size: u32) -> Result<Self> {
        let start = reader.stream_position()?;

        let object_type_indication = reader.read_u8()?;
        let byte_a = reader.read_u8()?;
        let stream_type = (byte_a & 0xFC) >> 2;
        let up_stream = byte_a & 0x02;
        let buffer_size_db = reader.read_u24::<BigEndian>()?;
        let max_bitrate = reader.read_u32::<BigEndian>()?;
        let avg_bitrate = reader.read_u32::<BigEndian>()?;

        let mut dec_specific = None;

        let mut current = reader.stream_position()?;
        let end = start + size as u64;
        while current < end {
            let (desc_tag, desc_size) = read_desc(reader)?;
            match desc_tag {
                0x05 => {
                    dec_specific = Some(DecoderSpecificDescriptor::read_desc(reader, desc_size)?);
                }
                _ => {
                    skip_bytes(reader, desc_size as u64)?;
                }
            }
            current = reader.stream_position()?;
        }

        Ok(Self {
            object_type_indication,
            stream_type,
            up_stream,
            buffer_size_db,
            max_bitrate,
            avg_bitrate,
            dec_specific: dec_specific.unwrap_or_default(),
        })
    }
}

impl<W: Write> WriteDesc<&mut W> for DecoderConfigDescriptor {
    fn write_desc(&self, writer: &mut W) -> Result<()> {
        write_desc_header(writer, Self::DESC_TAG, self.desc_size())?;
        writer.write_u8(self.object_type_indication)?;
        writer.write_u8((self.stream_type << 2) | (self.up_stream & 0x02) | 1)?; // 1 reserved
        writer.write_u24::<BigEndian>(self.buffer_size_db)?;
        writer.write_u32::<BigEndian>(self.max_bitrate)?;
        writer.write_u32::<BigEndian>(self.avg_bitrate)?;

        self.dec_specific.write_desc(&mut *writer)?;
        Ok(())
    }
}

/// `AudioSpecificConfig`. The raw bytes are written back untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DecoderSpecificDescriptor {
    pub profile: u8,
    pub freq_index: u8,
    pub chan_conf: u8,

    #[serde(skip_serializing)]
    pub raw: Vec<u8>,
}

impl DecoderSpecificDescriptor {
    pub fn from_raw(raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        let (profile, freq_index, chan_conf) =
            parse_audio_specific_config(&raw).unwrap_or_default();
        Self {
            profile,
            freq_index,
            chan_conf,
            raw,
        }
    }

    /// Sampling frequency, when it is one of the indexed rates.
    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES.get(self.freq_index as usize).copied()
    }
}

impl Descriptor for DecoderSpecificDescriptor {
    const DESC_TAG: u8 = 0x05;

    fn desc_size(&self) -> u32 {
        self.raw.len() as u32
    }
}

fn get_audio_object_type(byte_a: u8, byte_b: u8) -> u8 {
    let mut profile = byte_a >> 3;
    if profile == 31 {
        profile = 32 + ((byte_a & 7) | (byte_b >> 5));
    }

    profile
}

fn get_chan_conf<R: Read>(
    reader: &mut R,
    byte_b: u8,
    freq_index: u8,
    extended_profile: bool,
) -> Result<u8> {
    let chan_conf;
    if freq_index == 15 {
        // Skip the 24 bit sample rate
        let sample_rate = reader.read_u24::<BigEndian>()?;
        chan_conf = ((sample_rate >> 4) & 0x0F) as u8;
    } else if extended_profile {
        let byte_c = reader.read_u8()?;
        chan_conf = (byte_b & 1) | (byte_c & 0xE0);
    } else {
        chan_conf = (byte_b >> 3) & 0x0F;
    }

    Ok(chan_conf)
}

fn parse_audio_specific_config(raw: &[u8]) -> Result<(u8, u8, u8)> {
    let mut reader = Cursor::new(raw);
    let byte_a = reader.read_u8()?;
    let byte_b = reader.read_u8()?;
    let profile = get_audio_object_type(byte_a, byte_b);
    let freq_index;
    let chan_conf;
    if profile > 31 {
        freq_index = (byte_b >> 1) & 0x0F;
        chan_conf = get_chan_conf(&mut reader, byte_b, freq_index, true)?;
    } else {
        freq_index = ((byte_a & 0x07) << 1) + (byte_b >> 7);
        chan_conf = get_chan_conf(&mut reader, byte_b, freq_index, false)?;
    }
    Ok((profile, freq_index, chan_conf))
}

/// Encodes an `AudioSpecificConfig` with the given object type.
///
/// Rates outside the index table use the explicit 24-bit escape.
pub fn audio_specific_config(object_type: u8, sample_rate: u32, channels: u16) -> Vec<u8> {
    let mut bits: u64 = 0;
    let mut len = 0;
    let mut push = |value: u64, width: u32| {
        bits = (bits << width) | (value & ((1 << width) - 1));
        len += width;
    };

    push(object_type as u64, 5);
    match SAMPLE_RATES.iter().position(|rate| *rate == sample_rate) {
        Some(index) => push(index as u64, 4),
        None => {
            push(15, 4);
            push(sample_rate as u64, 24);
        }
    }
    push(channels.min(15) as u64, 4);
    push(0, 3); // frameLengthFlag, dependsOnCoreCoder, extensionFlag

    let padding = (8 - len % 8) % 8;
    let bits = bits << padding;
    let byte_len = ((len + padding) / 8) as usize;
    bits.to_be_bytes()[8 - byte_len..].to_vec()
}

impl<R: Read + Seek> ReadDesc<&mut R> for DecoderSpecificDescriptor {
    fn read_desc(reader: &mut R, size: u32) -> Result<Self> {
        let mut raw = vec![0u8; size as usize];
        reader.read_exact(&mut raw)?;
        Ok(Self::from_raw(raw))
    }
}

impl<W: Write> WriteDesc<&mut W> for DecoderSpecificDescriptor {
    fn write_desc(&self, writer: &mut W) -> Result<()> {
        write_desc_header(writer, Self::DESC_TAG, self.desc_size())?;
        writer.write_all(&self.raw)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SLConfigDescriptor {}

impl SLConfigDescriptor {
    pub fn new() -> Self {
        Self {}
    }
}

impl Descriptor for SLConfigDescriptor {
    const DESC_TAG: u8 = 0x06;

    fn desc_size(&self) -> u32 {
        1
    }
}

impl<R: Read + Seek> ReadDesc<&mut R> for SLConfigDescriptor {
    fn read_desc(reader: &mut R, _size: u32) -> Result<Self> {
        reader.read_u8()?; // pre-defined

        Ok(Self {})
    }
}

impl<W: Write> WriteDesc<&mut W> for SLConfigDescriptor {
    fn write_desc(&self, writer: &mut W) -> Result<()> {
        write_desc_header(writer, Self::DESC_TAG, self.desc_size())?;
        writer.write_u8(2)?; // pre-defined
        Ok(())
    }
}
