use thiserror::Error;

use crate::mp4box::BoxType;
use crate::types::{Codec, TrackId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidData(&'static str),

    #[error("{0} not found")]
    BoxNotFound(BoxType),

    #[error("trak[{0}] not found")]
    TrakNotFound(u32),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("ordering violation: {0}")]
    Ordering(#[from] OrderingViolation),

    #[error("capacity overflow: {0}")]
    CapacityOverflow(#[from] CapacityOverflow),

    #[error("session state error: {0}")]
    SessionState(#[from] SessionStateError),
}

impl Error {
    /// `true` for errors that end a mux session.
    ///
    /// Calls into a session that is already closed or aborted leave it untouched;
    /// everything else aborts it.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, Self::SessionState(_))
    }
}

/// Bad or missing track parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no tracks were declared")]
    NoTracks,

    #[error("track {0} was never declared")]
    UnknownTrack(TrackId),

    #[error("tracks can only be declared before the first chunk")]
    TracksLocked,

    #[error("track {track_id}: timescale must be non-zero")]
    ZeroTimescale { track_id: TrackId },

    #[error("track {track_id}: video dimensions {width}x{height} are invalid")]
    InvalidDimensions {
        track_id: TrackId,
        width: u32,
        height: u32,
    },

    #[error("track {track_id}: rotation {rotation} is not one of 0, 90, 180, 270")]
    InvalidRotation { track_id: TrackId, rotation: u16 },

    #[error("track {track_id}: audio needs a non-zero sample rate and channel count")]
    InvalidAudioParameters { track_id: TrackId },

    #[error("track {track_id}: {codec} samples need a decoder configuration")]
    MissingDecoderConfig { track_id: TrackId, codec: Codec },

    #[error("track {track_id}: decoder config for {found:?} does not match track codec {expected}")]
    CodecMismatch {
        track_id: TrackId,
        expected: Codec,
        found: String,
    },

    #[error("invalid codec string {0:?}")]
    InvalidCodecString(String),

    #[error("track {track_id}: decoder config changed after the init segment was written")]
    ConfigChangeAfterInit { track_id: TrackId },

    #[error("{mode} mode needs a target that can patch written bytes")]
    TargetCannotPatch { mode: &'static str },

    #[error("fragment duration must be non-zero")]
    ZeroFragmentDuration,

    #[error("chunk duration must be non-zero")]
    ZeroChunkDuration,
}

/// A sample that would corrupt the sample tables if it were accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderingViolation {
    #[error("track {track_id}: sample at {timestamp}µs precedes previous sample at {previous}µs")]
    OutOfOrderSample {
        track_id: TrackId,
        previous: i64,
        timestamp: i64,
    },

    #[error("track {track_id}: sample at {timestamp}µs follows a decoder config change but is not a sync sample")]
    NonSyncLeadSample { track_id: TrackId, timestamp: i64 },

    #[error("track {track_id}: first timestamp is {timestamp}µs, expected 0")]
    NonZeroFirstTimestamp { track_id: TrackId, timestamp: i64 },

    #[error("track {track_id}: negative timestamp {timestamp}µs")]
    NegativeTimestamp { track_id: TrackId, timestamp: i64 },

    #[error("track {track_id}: negative duration {duration}µs")]
    NegativeDuration { track_id: TrackId, duration: i64 },
}

/// A value that does not fit into the field the format gives it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityOverflow {
    #[error("{0} box is larger than a 64-bit size can describe")]
    BoxSize(BoxType),

    #[error("sample of {0} bytes does not fit a 32-bit size field")]
    SampleSize(u64),

    #[error("sample duration of {0} ticks does not fit a 32-bit field")]
    SampleDuration(i64),

    #[error("{0} entries exceed the 32-bit entry count")]
    EntryCount(usize),

    #[error("track {0}: fragment data offset exceeds 32 bits")]
    DataOffset(TrackId),

    #[error("{0} does not fit into its header field")]
    Field(&'static str),
}

/// An operation that is not valid in the current session state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionStateError {
    #[error("the session was finalized; no further chunks are accepted")]
    SessionClosed,

    #[error("finalize() was already called")]
    AlreadyFinalized,

    #[error("the session was aborted by an earlier error")]
    Aborted,

    #[error("{operation} is not valid in state {state}")]
    InvalidTransition {
        operation: &'static str,
        state: &'static str,
    },

    #[error("a box was left open when the writer was closed")]
    UnclosedBox,

    #[error("no box is open")]
    NoOpenBox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_violation_display() {
        let err: Error = OrderingViolation::OutOfOrderSample {
            track_id: 1,
            previous: 200,
            timestamp: 100,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "ordering violation: track 1: sample at 100µs precedes previous sample at 200µs"
        );
        assert!(err.is_session_fatal());
    }

    #[test]
    fn misuse_of_a_closed_session_is_not_fatal() {
        assert!(!Error::from(SessionStateError::SessionClosed).is_session_fatal());
        assert!(Error::from(ConfigurationError::NoTracks).is_session_fatal());
        assert!(Error::InvalidData("bad OpusHead").is_session_fatal());
    }
}
