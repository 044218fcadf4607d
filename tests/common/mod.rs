#![allow(dead_code)]

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use re_mp4_mux::{BufferTarget, Chunk, MuxConfig, Muxer};

/// An `avcC` record: High profile, level 3.1, one SPS and one PPS.
pub const AVCC: [u8; 19] = [
    0x01, 0x64, 0x00, 0x1F, 0xFF, // version, profile, compatibility, level, length size
    0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, // one SPS
    0x01, 0x00, 0x04, 0x68, 0xEE, 0x3C, 0x80, // one PPS
];

/// Same as [`AVCC`] at level 4.0.
pub const AVCC_LEVEL_40: [u8; 19] = [
    0x01, 0x64, 0x00, 0x28, 0xFF, //
    0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x28, //
    0x01, 0x00, 0x04, 0x68, 0xEE, 0x3C, 0x80, //
];

/// An `OpusHead`: stereo, 312 samples pre-skip, 48 kHz.
pub const OPUS_HEAD: [u8; 19] = [
    b'O', b'p', b'u', b's', b'H', b'e', b'a', b'd', 1, 2, 0x38, 0x01, 0x80, 0xBB, 0, 0, 0, 0, 0,
];

/// Timestamp of frame `index` at `fps`, rounded to whole microseconds.
pub fn frame_time(index: i64, fps: i64) -> i64 {
    (index * 1_000_000 + fps / 2) / fps
}

/// `count` frames at `fps`, a keyframe every `gop` frames. Payloads encode the frame index.
pub fn video_chunks(track_id: u32, count: i64, fps: i64, gop: i64) -> Vec<Chunk> {
    (0..count)
        .map(|i| {
            let start = frame_time(i, fps);
            let end = frame_time(i + 1, fps);
            let payload = payload_for(track_id, i, 20 + (i % 7) as usize);
            Chunk::new(track_id, payload, start, end - start, i % gop == 0)
        })
        .collect()
}

/// `count` AAC-sized audio frames of 1024 samples at `sample_rate`.
pub fn audio_chunks(track_id: u32, count: i64, sample_rate: i64) -> Vec<Chunk> {
    (0..count)
        .map(|i| {
            let start = i * 1024 * 1_000_000 / sample_rate;
            let end = (i + 1) * 1024 * 1_000_000 / sample_rate;
            let payload = payload_for(track_id, i, 8 + (i % 3) as usize);
            Chunk::new(track_id, payload, start, end - start, true)
        })
        .collect()
}

pub fn payload_for(track_id: u32, index: i64, len: usize) -> Vec<u8> {
    let mut payload = vec![track_id as u8; len];
    payload[..8].copy_from_slice(&index.to_be_bytes());
    payload
}

/// Merges per-track chunk lists by timestamp, keeping each track's order.
pub fn interleave(tracks: Vec<Vec<Chunk>>) -> Vec<Chunk> {
    let mut all: Vec<Chunk> = tracks.into_iter().flatten().collect();
    all.sort_by_key(|chunk| (chunk.timestamp, chunk.track_id));
    all
}

/// Muxes `chunks` into a buffer.
pub fn mux(config: MuxConfig, chunks: impl IntoIterator<Item = Chunk>) -> Vec<u8> {
    let mut muxer = Muxer::new(config, BufferTarget::new()).unwrap();
    for chunk in chunks {
        muxer.add_chunk(chunk).unwrap();
    }
    muxer.finalize().unwrap()
}

/// Top-level box types of a file, in order.
pub fn top_level_types(bytes: &[u8]) -> Vec<String> {
    re_mp4_mux::boxes(bytes)
        .unwrap()
        .iter()
        .map(|node| node.box_type.to_string())
        .collect()
}

/// A writer whose bytes stay readable while a `StreamTarget` owns a clone of it.
#[derive(Clone, Default)]
pub struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl SharedSink {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
