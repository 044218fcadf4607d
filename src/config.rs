//! Session and track configuration.
//!
//! Both structs deserialize from JSON, or can be built in code:
//!
//! ```
//! use re_mp4_mux::{Codec, MuxConfig, MuxMode, TrackConfig};
//!
//! let config = MuxConfig {
//!     mode: MuxMode::Fragmented,
//!     tracks: vec![
//!         TrackConfig::video(Codec::Vp9, 1280, 720),
//!         TrackConfig::audio(Codec::Opus, 48_000, 2),
//!     ],
//!     ..Default::default()
//! };
//! config.validate().unwrap();
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::mp4box::{Matrix, VpccBox};
use crate::types::{Bytes, Codec, TrackId, TrackKind};
use crate::Result;

/// Timescale of the movie header. Track timescales are independent of it.
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Default timescale for video tracks: divisible by 24, 25, 30, 48, 50 and 60.
pub const DEFAULT_VIDEO_TIMESCALE: u32 = 57_600;

pub const DEFAULT_FRAGMENT_DURATION_US: u64 = 1_000_000;
pub const DEFAULT_CHUNK_DURATION_US: u64 = 500_000;

/// How the container is laid out in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuxMode {
    /// Buffer everything and write `ftyp`, `moov`, `mdat` at finalization ("fast start").
    #[default]
    InMemory,

    /// Stream samples into one `mdat` and append `moov` at finalization.
    ///
    /// The `mdat` size is patched in place, so the target must support patching.
    Progressive,

    /// Write an init segment followed by self-contained `moof` + `mdat` pairs.
    Fragmented,
}

impl MuxMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::Progressive => "progressive",
            Self::Fragmented => "fragmented",
        }
    }

    pub(crate) fn needs_patching(&self) -> bool {
        matches!(self, Self::Progressive)
    }
}

impl std::fmt::Display for MuxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do with a first timestamp that is not zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstTimestampBehavior {
    /// Every track must start at 0.
    #[default]
    Strict,

    /// Shift each track by its own first timestamp.
    Offset,

    /// Shift every track by the first timestamp seen on any track.
    CrossTrackOffset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    pub mode: MuxMode,
    pub first_timestamp_behavior: FirstTimestampBehavior,

    /// Target duration of a fragment. A fragment is cut at the first keyframe past it.
    pub fragment_duration_us: u64,

    /// Flush a fragment as soon as its payload reaches this many bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fragment_bytes: Option<u64>,

    /// Longest span of one interleaving chunk in the progressive modes.
    pub chunk_duration_us: u64,

    /// Unix timestamp in seconds written into the movie and track headers. 0 leaves them unset.
    pub creation_time: u64,

    pub tracks: Vec<TrackConfig>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            mode: MuxMode::default(),
            first_timestamp_behavior: FirstTimestampBehavior::default(),
            fragment_duration_us: DEFAULT_FRAGMENT_DURATION_US,
            max_fragment_bytes: None,
            chunk_duration_us: DEFAULT_CHUNK_DURATION_US,
            creation_time: 0,
            tracks: Vec::new(),
        }
    }
}

impl MuxConfig {
    pub fn new(mode: MuxMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_track(mut self, track: TrackConfig) -> Self {
        self.tracks.push(track);
        self
    }

    /// Parses a configuration from JSON and checks the session options.
    ///
    /// An empty `tracks` list is accepted here, tracks may still be added to the muxer.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate_options()?;
        for (index, track) in config.tracks.iter().enumerate() {
            track.validate(track_id_for(index))?;
        }
        Ok(config)
    }

    /// Checks a complete configuration: session options, at least one track, and every track.
    pub fn validate(&self) -> Result<()> {
        self.validate_options()?;
        if self.tracks.is_empty() {
            return Err(ConfigurationError::NoTracks.into());
        }
        for (index, track) in self.tracks.iter().enumerate() {
            track.validate(track_id_for(index))?;
        }
        Ok(())
    }

    pub(crate) fn validate_options(&self) -> Result<()> {
        if self.fragment_duration_us == 0 {
            return Err(ConfigurationError::ZeroFragmentDuration.into());
        }
        if self.chunk_duration_us == 0 {
            return Err(ConfigurationError::ZeroChunkDuration.into());
        }
        Ok(())
    }
}

pub(crate) fn track_id_for(index: usize) -> TrackId {
    index as TrackId + 1
}

/// Parameters of one media track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackConfig {
    pub codec: Codec,

    /// Ticks per second of the track's media timeline.
    ///
    /// Defaults to 57600 for video and to the sample rate for audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timescale: Option<u32>,

    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,

    /// Clockwise display rotation: 0, 90, 180 or 270.
    #[serde(default)]
    pub rotation: u16,

    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub channels: u16,

    /// Full codec string, e.g. `vp09.00.10.08`. Defaults per codec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_string: Option<String>,

    /// Decoder configuration record, if known before the first chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_config: Option<Bytes>,

    /// Reject a non-sync first sample after a decoder config change.
    ///
    /// Always enforced for video; audio tracks can opt out.
    #[serde(default = "default_true")]
    pub require_sync_lead: bool,
}

fn default_true() -> bool {
    true
}

impl TrackConfig {
    pub fn video(codec: Codec, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::new(codec)
        }
    }

    pub fn audio(codec: Codec, sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            ..Self::new(codec)
        }
    }

    fn new(codec: Codec) -> Self {
        Self {
            codec,
            timescale: None,
            width: 0,
            height: 0,
            rotation: 0,
            sample_rate: 0,
            channels: 0,
            codec_string: None,
            codec_config: None,
            require_sync_lead: true,
        }
    }

    pub fn with_timescale(mut self, timescale: u32) -> Self {
        self.timescale = Some(timescale);
        self
    }

    pub fn with_rotation(mut self, rotation: u16) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_codec_string(mut self, codec_string: impl Into<String>) -> Self {
        self.codec_string = Some(codec_string.into());
        self
    }

    pub fn with_codec_config(mut self, codec_config: impl Into<Bytes>) -> Self {
        self.codec_config = Some(codec_config.into());
        self
    }

    pub fn with_require_sync_lead(mut self, require_sync_lead: bool) -> Self {
        self.require_sync_lead = require_sync_lead;
        self
    }

    pub fn kind(&self) -> TrackKind {
        self.codec.kind()
    }

    /// The timescale the track is written with.
    pub fn effective_timescale(&self) -> u32 {
        self.timescale.unwrap_or(match self.kind() {
            TrackKind::Video => DEFAULT_VIDEO_TIMESCALE,
            TrackKind::Audio => self.sample_rate,
        })
    }

    /// The codec string the track is described with.
    pub fn effective_codec_string(&self) -> String {
        self.codec_string
            .clone()
            .unwrap_or_else(|| default_codec_string(self.codec).to_owned())
    }

    /// Whether samples following a decoder config change must be sync samples.
    pub fn sync_lead_required(&self) -> bool {
        self.kind() == TrackKind::Video || self.require_sync_lead
    }

    pub fn validate(&self, track_id: TrackId) -> Result<()> {
        match self.kind() {
            TrackKind::Video => {
                let fits = |v: u32| v > 0 && v <= u16::MAX as u32;
                if !fits(self.width) || !fits(self.height) {
                    return Err(ConfigurationError::InvalidDimensions {
                        track_id,
                        width: self.width,
                        height: self.height,
                    }
                    .into());
                }
                if Matrix::rotation(self.rotation).is_none() {
                    return Err(ConfigurationError::InvalidRotation {
                        track_id,
                        rotation: self.rotation,
                    }
                    .into());
                }
            }
            TrackKind::Audio => {
                if self.sample_rate == 0 || self.channels == 0 {
                    return Err(ConfigurationError::InvalidAudioParameters { track_id }.into());
                }
            }
        }

        if self.effective_timescale() == 0 {
            return Err(ConfigurationError::ZeroTimescale { track_id }.into());
        }

        if let Some(codec_string) = &self.codec_string {
            let found = Codec::from_codec_string(codec_string)?;
            if found != self.codec {
                return Err(ConfigurationError::CodecMismatch {
                    track_id,
                    expected: self.codec,
                    found: codec_string.clone(),
                }
                .into());
            }
            if self.codec == Codec::Vp9 {
                VpccBox::from_codec_string(codec_string)?;
            }
        }
        Ok(())
    }
}

pub fn default_codec_string(codec: Codec) -> &'static str {
    match codec {
        Codec::Vp9 => "vp09.00.10.08",
        Codec::Aac => "mp4a.40.2",
        Codec::Opus => "opus",
        Codec::Avc => "avc1.640028",
        Codec::Hevc => "hvc1.1.6.L93.B0",
        Codec::Av1 => "av01.0.04M.08",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn parse_json_config() {
        let json = r#"{
            "mode": "fragmented",
            "first_timestamp_behavior": "offset",
            "fragment_duration_us": 2000000,
            "tracks": [
                { "codec": "vp9", "width": 1280, "height": 720, "timescale": 60000 },
                { "codec": "aac", "sample_rate": 44100, "channels": 2, "require_sync_lead": false }
            ]
        }"#;
        let config = MuxConfig::from_json(json).unwrap();
        assert_eq!(config.mode, MuxMode::Fragmented);
        assert_eq!(config.first_timestamp_behavior, FirstTimestampBehavior::Offset);
        assert_eq!(config.fragment_duration_us, 2_000_000);
        assert_eq!(config.chunk_duration_us, DEFAULT_CHUNK_DURATION_US);
        assert_eq!(config.tracks[0].effective_timescale(), 60_000);
        assert_eq!(config.tracks[1].effective_timescale(), 44_100);
        assert!(!config.tracks[1].sync_lead_required());
        assert_eq!(config.tracks[1].effective_codec_string(), "mp4a.40.2");
    }

    #[test]
    fn defaults() {
        let video = TrackConfig::video(Codec::Avc, 1920, 1080);
        assert_eq!(video.effective_timescale(), DEFAULT_VIDEO_TIMESCALE);
        assert!(video.with_require_sync_lead(false).sync_lead_required());
        assert_eq!(MuxConfig::default().mode, MuxMode::InMemory);
    }

    #[test]
    fn rejects_bad_tracks() {
        let err = TrackConfig::video(Codec::Vp9, 0, 720).validate(1).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidDimensions { track_id: 1, .. })
        ));

        let err = TrackConfig::video(Codec::Vp9, 640, 480)
            .with_rotation(45)
            .validate(2)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidRotation { rotation: 45, .. })
        ));

        let err = TrackConfig::audio(Codec::Opus, 0, 2).validate(1).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidAudioParameters { .. })
        ));

        let err = TrackConfig::video(Codec::Avc, 640, 480)
            .with_timescale(0)
            .validate(1)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::ZeroTimescale { .. })
        ));

        let err = TrackConfig::video(Codec::Avc, 640, 480)
            .with_codec_string("vp09.00.10.08")
            .validate(1)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::CodecMismatch { .. })
        ));
    }

    #[test]
    fn rejects_empty_session() {
        assert!(matches!(
            MuxConfig::default().validate(),
            Err(Error::Configuration(ConfigurationError::NoTracks))
        ));
        let config = MuxConfig {
            chunk_duration_us: 0,
            ..MuxConfig::default().with_track(TrackConfig::audio(Codec::Aac, 48_000, 2))
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Configuration(ConfigurationError::ZeroChunkDuration))
        ));
    }
}
