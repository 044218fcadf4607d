//! `re_mp4_mux` is a streaming ISO-MP4 multiplexer.
//!
//! It takes already encoded video and audio chunks from several tracks and
//! wraps them into an MP4 file, either as a regular file with the `moov` first
//! or last, or as a fragmented stream of `moof` + `mdat` pairs.
//!
//! This package follows the MPEG-4 specifications defined in parts:
//!    * ISO/IEC 14496-12 - ISO Base Media File Format (QuickTime, MPEG-4, etc)
//!    * ISO/IEC 14496-14 - MP4 file format
//!    * ISO/IEC 14496-15 - NAL unit structured video
//!
//! The crate also carries a reader ([`read`], [`boxes`]) for the files it writes.

use std::io::Cursor;

mod error;
pub use error::{
    CapacityOverflow, ConfigurationError, Error, OrderingViolation, SessionStateError,
};

pub type Result<T> = std::result::Result<T, Error>;

mod types;
pub use types::*;

mod mp4box;
pub use mp4box::*;

mod writer;
pub use writer::BoxWriter;

mod config;
pub use config::{
    default_codec_string, FirstTimestampBehavior, MuxConfig, MuxMode, TrackConfig,
    DEFAULT_CHUNK_DURATION_US, DEFAULT_FRAGMENT_DURATION_US, DEFAULT_VIDEO_TIMESCALE,
    MOVIE_TIMESCALE,
};

mod target;
pub use target::{BufferTarget, SeekTarget, StreamTarget, Target};

mod sample_table;
pub use sample_table::{ChunkRun, SampleTableBuilder};

mod track;
pub use track::{micros_to_ticks, rescale};

mod muxer;
pub use muxer::{MuxStats, Muxer, SessionState};

mod reader;
pub use reader::{boxes, BoxNode, Mp4, Sample, Track};

/// Parses the contents of a byte slice as MP4 data.
pub fn read(bytes: &[u8]) -> Result<Mp4> {
    let mp4 = reader::Mp4::read(Cursor::new(bytes), bytes.len() as u64)?;
    Ok(mp4)
}

/// Reads the contents of a file as MP4 data.
pub fn read_file(file_path: impl AsRef<std::path::Path>) -> Result<Mp4> {
    let bytes = std::fs::read(file_path)?;
    read(&bytes)
}
