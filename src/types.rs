use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

use crate::error::ConfigurationError;
use crate::mp4box::BoxType;
use crate::{Error, Result};

pub use bytes::Bytes;
pub use num_rational::Ratio;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FixedPointU8(Ratio<u16>);

impl FixedPointU8 {
    pub fn new(val: u8) -> Self {
        Self(Ratio::new_raw(val as u16 * 0x100, 0x100))
    }

    pub fn new_raw(val: u16) -> Self {
        Self(Ratio::new_raw(val, 0x100))
    }

    pub fn value(&self) -> u8 {
        self.0.to_integer() as u8
    }

    pub fn raw_value(&self) -> u16 {
        *self.0.numer()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FixedPointU16(Ratio<u32>);

impl FixedPointU16 {
    pub fn new(val: u16) -> Self {
        Self(Ratio::new_raw(val as u32 * 0x10000, 0x10000))
    }

    pub fn new_raw(val: u32) -> Self {
        Self(Ratio::new_raw(val, 0x10000))
    }

    pub fn value(&self) -> u16 {
        self.0.to_integer() as u16
    }

    pub fn raw_value(&self) -> u32 {
        *self.0.numer()
    }
}

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fourcc: FourCC = From::from(*self);
        write!(f, "{fourcc}")
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fourcc: FourCC = From::from(*self);
        write!(f, "{fourcc}")
    }
}

#[derive(Default, PartialEq, Eq, Clone, Copy, Serialize)]
pub struct FourCC {
    pub value: [u8; 4],
}

impl std::str::FromStr for FourCC {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let [a, b, c, d] = s.as_bytes() {
            Ok(Self {
                value: [*a, *b, *c, *d],
            })
        } else {
            Err(Error::InvalidData("expected exactly four bytes in string"))
        }
    }
}

impl From<u32> for FourCC {
    fn from(number: u32) -> Self {
        Self {
            value: number.to_be_bytes(),
        }
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        (&fourcc).into()
    }
}

impl From<&FourCC> for u32 {
    fn from(fourcc: &FourCC) -> Self {
        Self::from_be_bytes(fourcc.value)
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(value: [u8; 4]) -> Self {
        Self { value }
    }
}

impl From<BoxType> for FourCC {
    fn from(t: BoxType) -> Self {
        let box_num: u32 = Into::into(t);
        From::from(box_num)
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code: u32 = self.into();
        let string = String::from_utf8_lossy(&self.value[..]);
        write!(f, "{string} / {code:#010X}")
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.value[..]))
    }
}

const HANDLER_TYPE_VIDEO_FOURCC: [u8; 4] = [b'v', b'i', b'd', b'e'];
const HANDLER_TYPE_AUDIO_FOURCC: [u8; 4] = [b's', b'o', b'u', b'n'];

/// Track ids start at 1, in declaration order.
pub type TrackId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn handler_name(&self) -> &'static str {
        match self {
            Self::Video => "VideoHandler",
            Self::Audio => "SoundHandler",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Video => "Video",
            Self::Audio => "Audio",
        };
        write!(f, "{s}")
    }
}

impl TryFrom<&FourCC> for TrackKind {
    type Error = Error;
    fn try_from(fourcc: &FourCC) -> Result<Self> {
        match fourcc.value {
            HANDLER_TYPE_VIDEO_FOURCC => Ok(Self::Video),
            HANDLER_TYPE_AUDIO_FOURCC => Ok(Self::Audio),
            _ => Err(Error::InvalidData("unsupported handler type")),
        }
    }
}

impl From<TrackKind> for FourCC {
    fn from(t: TrackKind) -> Self {
        match t {
            TrackKind::Video => HANDLER_TYPE_VIDEO_FOURCC.into(),
            TrackKind::Audio => HANDLER_TYPE_AUDIO_FOURCC.into(),
        }
    }
}

/// The codecs this muxer knows how to describe in a sample entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    Avc,
    Hevc,
    Vp9,
    Av1,
    Aac,
    Opus,
}

impl Codec {
    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Avc | Self::Hevc | Self::Vp9 | Self::Av1 => TrackKind::Video,
            Self::Aac | Self::Opus => TrackKind::Audio,
        }
    }

    /// The sample entry box that describes this codec inside `stsd`.
    pub fn sample_entry_type(&self) -> BoxType {
        match self {
            Self::Avc => BoxType::Avc1Box,
            Self::Hevc => BoxType::Hvc1Box,
            Self::Vp9 => BoxType::Vp09Box,
            Self::Av1 => BoxType::Av01Box,
            Self::Aac => BoxType::Mp4aBox,
            Self::Opus => BoxType::OpusBox,
        }
    }

    /// The codec configuration box nested inside the sample entry.
    pub fn config_box_type(&self) -> BoxType {
        match self {
            Self::Avc => BoxType::AvcCBox,
            Self::Hevc => BoxType::HvcCBox,
            Self::Vp9 => BoxType::VpccBox,
            Self::Av1 => BoxType::Av1CBox,
            Self::Aac => BoxType::EsdsBox,
            Self::Opus => BoxType::DopsBox,
        }
    }

    /// Whether a sample entry can only be written from an encoder-provided description.
    ///
    /// VP9, AAC and Opus configurations can be synthesized from the track parameters.
    pub fn needs_description(&self) -> bool {
        matches!(self, Self::Avc | Self::Hevc | Self::Av1)
    }

    /// Maps a WebCodecs-style codec string (`avc1.64001f`, `vp09.00.40.08`, ...) to a codec.
    pub fn from_codec_string(codec: &str) -> Result<Self> {
        let prefix = codec.split('.').next().unwrap_or_default();
        match prefix {
            "avc1" | "avc3" | "avc" => Ok(Self::Avc),
            "hvc1" | "hev1" | "hevc" => Ok(Self::Hevc),
            "vp09" | "vp9" => Ok(Self::Vp9),
            "av01" | "av1" => Ok(Self::Av1),
            "mp4a" | "aac" => Ok(Self::Aac),
            "opus" => Ok(Self::Opus),
            _ => Err(ConfigurationError::InvalidCodecString(codec.to_owned()).into()),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Avc => "avc",
            Self::Hevc => "hevc",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
            Self::Aac => "aac",
            Self::Opus => "opus",
        };
        write!(f, "{s}")
    }
}

/// Codec identifier plus the opaque initialization bytes produced by an encoder.
///
/// `codec` is a codec string such as `avc1.64001f`; `description` is the raw
/// decoder configuration record (`avcC`, `hvcC`, `av1C` payload, AAC
/// AudioSpecificConfig or `OpusHead`). An empty description asks the muxer to
/// synthesize one where the codec allows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub codec: String,
    pub description: Bytes,
}

impl DecoderConfig {
    pub fn new(codec: impl Into<String>, description: impl Into<Bytes>) -> Self {
        Self {
            codec: codec.into(),
            description: description.into(),
        }
    }

    pub fn codec(&self) -> Result<Codec> {
        Codec::from_codec_string(&self.codec)
    }
}

/// One encoded access unit handed over by an encoder.
///
/// Timestamps and durations are in microseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub track_id: TrackId,
    pub data: Bytes,
    pub timestamp: i64,
    pub duration: i64,
    pub is_keyframe: bool,
    pub decoder_config: Option<DecoderConfig>,
}

impl Chunk {
    pub fn new(
        track_id: TrackId,
        data: impl Into<Bytes>,
        timestamp: i64,
        duration: i64,
        is_keyframe: bool,
    ) -> Self {
        Self {
            track_id,
            data: data.into(),
            timestamp,
            duration,
            is_keyframe,
            decoder_config: None,
        }
    }

    pub fn with_decoder_config(mut self, config: DecoderConfig) -> Self {
        self.decoder_config = Some(config);
        self
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "track {}, timestamp {}µs, duration {}µs, keyframe {}, length {}",
            self.track_id,
            self.timestamp,
            self.duration,
            self.is_keyframe,
            self.data.len()
        )
    }
}

/// Seconds between the MP4 epoch (1904-01-01) and the Unix epoch (1970-01-01).
pub const MP4_EPOCH_OFFSET: u64 = 2_082_844_800;

pub fn creation_time(creation_time: u64) -> u64 {
    // convert from MP4 epoch (1904-01-01) to Unix epoch (1970-01-01)
    if creation_time >= MP4_EPOCH_OFFSET {
        creation_time - MP4_EPOCH_OFFSET
    } else {
        creation_time
    }
}

/// Converts a Unix timestamp (seconds) to the MP4 epoch.
pub fn mp4_time(unix_seconds: u64) -> u64 {
    unix_seconds.saturating_add(MP4_EPOCH_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_strings() {
        assert_eq!(Codec::from_codec_string("avc1.64001f").ok(), Some(Codec::Avc));
        assert_eq!(Codec::from_codec_string("hev1.1.6.L93.B0").ok(), Some(Codec::Hevc));
        assert_eq!(Codec::from_codec_string("vp09.00.40.08").ok(), Some(Codec::Vp9));
        assert_eq!(Codec::from_codec_string("av01.0.04M.08").ok(), Some(Codec::Av1));
        assert_eq!(Codec::from_codec_string("mp4a.40.2").ok(), Some(Codec::Aac));
        assert_eq!(Codec::from_codec_string("opus").ok(), Some(Codec::Opus));
        assert!(matches!(
            Codec::from_codec_string("theora"),
            Err(Error::Configuration(ConfigurationError::InvalidCodecString(_)))
        ));
    }

    #[test]
    fn mp4_epoch_round_trip() {
        assert_eq!(creation_time(mp4_time(1_700_000_000)), 1_700_000_000);
    }
}
