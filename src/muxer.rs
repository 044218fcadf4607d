//! The mux session: owns the tracks, places samples and drives finalization.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{FirstTimestampBehavior, MuxConfig, MuxMode, TrackConfig, MOVIE_TIMESCALE};
use crate::error::{CapacityOverflow, ConfigurationError, OrderingViolation, SessionStateError};
use crate::mp4box::{
    BoxHeader, BoxType, FtypBox, MfhdBox, MfraBox, MoofBox, MoovBox, MvexBox, MvhdBox, TfdtBox,
    TfhdBox, TfraBox, TfraEntry, TrafBox, TrexBox, TrunBox, WriteBox, HEADER_LARGE_SIZE,
};
use crate::target::Target;
use crate::track::{rescale, FragmentRun, SealedChunk, TrackMuxer};
use crate::types::{mp4_time, Chunk, Codec, TrackId, TrackKind};
use crate::writer::BoxWriter;
use crate::Result;

/// Lifecycle of a mux session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// Tracks can be declared; no samples yet.
    Configuring,

    /// Samples are accepted, tracks are fixed.
    Muxing,

    /// `finalize()` is writing the remaining boxes.
    Finalizing,

    /// The output was sealed and handed back.
    Finalized,

    /// An error ended the session, or it was aborted explicitly.
    Aborted,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Configuring => "configuring",
            Self::Muxing => "muxing",
            Self::Finalizing => "finalizing",
            Self::Finalized => "finalized",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Counters of a mux session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MuxStats {
    /// Samples accepted over all tracks.
    pub samples: u64,

    /// Sample payload bytes accepted over all tracks.
    pub payload_bytes: u64,

    /// Bytes handed to the target so far.
    pub bytes_written: u64,

    /// `moof` + `mdat` pairs written.
    pub fragments: u64,
}

/// A streaming MP4 multiplexer writing to a [`Target`].
///
/// ```
/// use re_mp4_mux::{BufferTarget, Chunk, Codec, MuxConfig, Muxer, TrackConfig};
///
/// let config = MuxConfig::default().with_track(TrackConfig::video(Codec::Vp9, 640, 480));
/// let mut muxer = Muxer::new(config, BufferTarget::new())?;
/// for i in 0..30 {
///     let chunk = Chunk::new(1, vec![0u8; 100], i * 33_333, 33_333, i % 10 == 0);
///     muxer.add_chunk(chunk)?;
/// }
/// let bytes = muxer.finalize()?;
///
/// let mp4 = re_mp4_mux::read(&bytes)?;
/// assert_eq!(mp4.tracks()[&1].samples.len(), 30);
/// # Ok::<(), re_mp4_mux::Error>(())
/// ```
pub struct Muxer<T: Target> {
    config: MuxConfig,
    target: Option<T>,
    state: SessionState,
    tracks: Vec<TrackMuxer>,

    track_offsets: Vec<Option<i64>>,
    session_offset: Option<i64>,

    /// In-memory mode: closed chunks waiting for finalization.
    held_chunks: Vec<SealedChunk>,

    /// Progressive mode: position of the `mdat` header and payload bytes written into it.
    mdat_start: Option<u64>,
    mdat_payload: u64,

    init_written: bool,
    sequence_number: u32,
    fragment_start_us: Option<i64>,
    tfra_entries: BTreeMap<TrackId, Vec<TfraEntry>>,

    fragments: u64,
    bytes_written: u64,
}

impl<T: Target> std::fmt::Debug for Muxer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Muxer")
            .field("mode", &self.config.mode)
            .field("state", &self.state)
            .field("tracks", &self.tracks.len())
            .field("stats", &self.stats())
            .finish()
    }
}

fn serialize<B>(bx: &B) -> Result<Vec<u8>>
where
    B: for<'a> WriteBox<&'a mut BoxWriter>,
{
    let mut writer = BoxWriter::new();
    writer.write_child(bx)?;
    writer.into_inner()
}

fn target_mut<T>(target: &mut Option<T>) -> Result<&mut T> {
    target
        .as_mut()
        .ok_or_else(|| SessionStateError::SessionClosed.into())
}

impl<T: Target> Muxer<T> {
    /// Starts a session. Tracks listed in `config` are declared right away.
    pub fn new(config: MuxConfig, target: T) -> Result<Self> {
        config.validate_options()?;
        if config.mode.needs_patching() && !target.can_patch() {
            return Err(ConfigurationError::TargetCannotPatch {
                mode: config.mode.name(),
            }
            .into());
        }

        let tracks = config.tracks.clone();
        let mut muxer = Self {
            config: MuxConfig {
                tracks: Vec::new(),
                ..config
            },
            target: Some(target),
            state: SessionState::Configuring,
            tracks: Vec::new(),
            track_offsets: Vec::new(),
            session_offset: None,
            held_chunks: Vec::new(),
            mdat_start: None,
            mdat_payload: 0,
            init_written: false,
            sequence_number: 0,
            fragment_start_us: None,
            tfra_entries: BTreeMap::new(),
            fragments: 0,
            bytes_written: 0,
        };
        for track in tracks {
            muxer.add_track(track)?;
        }
        log::debug!(
            "mux session created: {} mode, {} track(s)",
            muxer.config.mode,
            muxer.tracks.len()
        );
        Ok(muxer)
    }

    pub fn mode(&self) -> MuxMode {
        self.config.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The target, until the session is finalized.
    pub fn target(&self) -> Option<&T> {
        self.target.as_ref()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Declares a track. Only possible before the first chunk.
    pub fn add_track(&mut self, track: TrackConfig) -> Result<TrackId> {
        let result = self.declare_track(track);
        self.guard(result)
    }

    /// Submits one encoded chunk.
    ///
    /// Any error aborts the session: nothing more is written and the caller has
    /// to start over. Fragments written before the error stay valid.
    pub fn add_chunk(&mut self, chunk: Chunk) -> Result<()> {
        let result = self.push_chunk(chunk);
        self.guard(result)
    }

    /// Writes out what can be written now.
    ///
    /// In fragmented mode this seals the collected samples into a `moof` + `mdat`
    /// pair (preceded by the init segment on first use). In progressive mode it
    /// closes the open chunks and streams them into the `mdat`. In in-memory mode
    /// it only closes the open chunks.
    #[profiling::function]
    pub fn flush_fragment(&mut self) -> Result<()> {
        let result = self.flush();
        self.guard(result)
    }

    /// Writes the remaining boxes and returns the sealed target output.
    #[profiling::function]
    pub fn finalize(&mut self) -> Result<T::Output> {
        match self.state {
            SessionState::Configuring | SessionState::Muxing => {}
            SessionState::Finalized => return Err(SessionStateError::AlreadyFinalized.into()),
            SessionState::Aborted => return Err(SessionStateError::Aborted.into()),
            SessionState::Finalizing => {
                return Err(SessionStateError::InvalidTransition {
                    operation: "finalize",
                    state: self.state.name(),
                }
                .into())
            }
        }
        let result = self.finish();
        self.guard(result)
    }

    /// Ends the session without finalizing it and returns the target.
    ///
    /// In fragmented mode the target holds every fragment flushed so far, each of
    /// them playable.
    pub fn abort(&mut self) -> Option<T> {
        if !matches!(self.state, SessionState::Finalized | SessionState::Aborted) {
            log::debug!("mux session aborted in state {}", self.state);
        }
        self.discard();
        self.state = SessionState::Aborted;
        self.target.take()
    }

    pub fn stats(&self) -> MuxStats {
        MuxStats {
            samples: self.tracks.iter().map(TrackMuxer::sample_count).sum(),
            payload_bytes: self.tracks.iter().map(TrackMuxer::payload_bytes).sum(),
            bytes_written: self
                .target
                .as_ref()
                .map_or(self.bytes_written, |target| target.position()),
            fragments: self.fragments,
        }
    }

    fn guard<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(err) = &result {
            if err.is_session_fatal() && self.state != SessionState::Aborted {
                log::warn!("mux session aborted: {err}");
                self.discard();
                self.state = SessionState::Aborted;
            }
        }
        result
    }

    fn discard(&mut self) {
        self.held_chunks.clear();
        for track in &mut self.tracks {
            track.take_fragment();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Configuring | SessionState::Muxing => Ok(()),
            SessionState::Finalizing | SessionState::Finalized => {
                Err(SessionStateError::SessionClosed.into())
            }
            SessionState::Aborted => Err(SessionStateError::Aborted.into()),
        }
    }

    fn transition(&mut self, to: SessionState) {
        log::debug!("mux session: {} -> {}", self.state, to);
        self.state = to;
    }

    fn declare_track(&mut self, config: TrackConfig) -> Result<TrackId> {
        self.ensure_open()?;
        if self.state != SessionState::Configuring {
            return Err(ConfigurationError::TracksLocked.into());
        }
        let id = crate::config::track_id_for(self.tracks.len());
        let track = TrackMuxer::new(id, config, self.config.mode)?;
        log::debug!(
            "track {id}: {} {}, timescale {}",
            track.kind(),
            track.codec(),
            track.timescale()
        );
        self.tracks.push(track);
        self.track_offsets.push(None);
        Ok(id)
    }

    fn track_index(&self, track_id: TrackId) -> Result<usize> {
        let index = (track_id as usize)
            .checked_sub(1)
            .filter(|index| *index < self.tracks.len())
            .ok_or(ConfigurationError::UnknownTrack(track_id))?;
        Ok(index)
    }

    fn begin_muxing(&mut self) -> Result<()> {
        if self.tracks.is_empty() {
            return Err(ConfigurationError::NoTracks.into());
        }
        self.transition(SessionState::Muxing);
        if self.config.mode == MuxMode::Progressive {
            let ftyp = serialize(&self.ftyp())?;
            let target = target_mut(&mut self.target)?;
            target.write(&ftyp)?;
            let mdat_start = target.position();
            // The size is patched at finalization, so always reserve the 64-bit form.
            let mut header = Vec::new();
            BoxHeader::new(BoxType::MdatBox, HEADER_LARGE_SIZE).write_large(&mut header)?;
            target.write(&header)?;
            self.mdat_start = Some(mdat_start);
        }
        Ok(())
    }

    /// Maps a chunk timestamp onto the session timeline.
    fn session_timestamp(&mut self, index: usize, chunk: &Chunk) -> Result<i64> {
        let offset = match self.config.first_timestamp_behavior {
            FirstTimestampBehavior::Strict => {
                if self.tracks[index].sample_count() == 0 && chunk.timestamp != 0 {
                    return Err(OrderingViolation::NonZeroFirstTimestamp {
                        track_id: chunk.track_id,
                        timestamp: chunk.timestamp,
                    }
                    .into());
                }
                0
            }
            FirstTimestampBehavior::Offset => {
                *self.track_offsets[index].get_or_insert(chunk.timestamp)
            }
            FirstTimestampBehavior::CrossTrackOffset => {
                *self.session_offset.get_or_insert(chunk.timestamp)
            }
        };
        Ok(chunk.timestamp.saturating_sub(offset))
    }

    /// The track whose keyframes cut fragments: the first video track, if any.
    fn drives_fragments(&self, index: usize) -> bool {
        match self.tracks.iter().position(|t| t.kind() == TrackKind::Video) {
            Some(video) => video == index,
            None => true,
        }
    }

    fn push_chunk(&mut self, chunk: Chunk) -> Result<()> {
        self.ensure_open()?;
        if self.state == SessionState::Configuring {
            self.begin_muxing()?;
        }

        let index = self.track_index(chunk.track_id)?;
        let timestamp = self.session_timestamp(index, &chunk)?;
        if let Some(decoder_config) = &chunk.decoder_config {
            self.tracks[index].add_config(decoder_config)?;
        }
        self.tracks[index].check_sample(timestamp, chunk.duration, chunk.is_keyframe)?;

        if self.config.mode == MuxMode::Fragmented
            && chunk.is_keyframe
            && self.drives_fragments(index)
        {
            let elapsed = self
                .fragment_start_us
                .map(|start| timestamp.saturating_sub(start));
            if elapsed.map_or(false, |e| e >= self.config.fragment_duration_us as i64) {
                self.write_fragment()?;
            }
        }

        let sealed = self.tracks[index].add_sample(
            timestamp,
            chunk.duration,
            chunk.is_keyframe,
            chunk.data,
            self.config.chunk_duration_us,
        )?;
        if let Some(sealed) = sealed {
            self.place_chunk(sealed)?;
        }

        if self.config.mode == MuxMode::Fragmented {
            self.fragment_start_us.get_or_insert(timestamp);
            if let Some(max_bytes) = self.config.max_fragment_bytes {
                let pending: u64 = self.tracks.iter().map(TrackMuxer::fragment_bytes).sum();
                if pending >= max_bytes {
                    self.write_fragment()?;
                }
            }
        }
        Ok(())
    }

    fn place_chunk(&mut self, chunk: SealedChunk) -> Result<()> {
        match self.config.mode {
            MuxMode::InMemory => self.held_chunks.push(chunk),
            MuxMode::Progressive => {
                let index = self.track_index(chunk.track_id)?;
                self.tracks[index].place_chunk(chunk.chunk_index, self.mdat_payload);
                let target = target_mut(&mut self.target)?;
                for payload in &chunk.payloads {
                    target.write(payload)?;
                }
                self.mdat_payload += chunk.size;
            }
            MuxMode::Fragmented => {}
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state == SessionState::Configuring {
            return Ok(());
        }
        match self.config.mode {
            MuxMode::Fragmented => self.write_fragment(),
            MuxMode::InMemory | MuxMode::Progressive => self.seal_open_chunks(),
        }
    }

    fn seal_open_chunks(&mut self) -> Result<()> {
        let sealed: Vec<SealedChunk> = self
            .tracks
            .iter_mut()
            .filter_map(TrackMuxer::seal_chunk)
            .collect();
        for chunk in sealed {
            self.place_chunk(chunk)?;
        }
        Ok(())
    }

    fn creation_time(&self) -> u64 {
        match self.config.creation_time {
            0 => 0,
            unix => mp4_time(unix),
        }
    }

    fn ftyp(&self) -> FtypBox {
        match self.config.mode {
            MuxMode::Fragmented => FtypBox::fragmented(),
            MuxMode::InMemory | MuxMode::Progressive => {
                let mut brands: Vec<[u8; 4]> = Vec::new();
                for track in &self.tracks {
                    let brand = match track.codec() {
                        Codec::Avc => *b"avc1",
                        Codec::Av1 => *b"av01",
                        _ => continue,
                    };
                    if !brands.contains(&brand) {
                        brands.push(brand);
                    }
                }
                FtypBox::progressive(&brands)
            }
        }
    }

    fn mvhd(&self, duration: u64) -> MvhdBox {
        let creation_time = self.creation_time();
        MvhdBox {
            version: u8::from(duration > u32::MAX as u64 || creation_time > u32::MAX as u64),
            creation_time,
            modification_time: creation_time,
            timescale: MOVIE_TIMESCALE,
            duration,
            next_track_id: self.tracks.len() as u32 + 1,
            ..Default::default()
        }
    }

    /// `moov` of the progressive modes, with chunk offsets relative to `base_offset`.
    #[profiling::function]
    fn build_moov(&self, base_offset: u64) -> Result<MoovBox> {
        let creation_time = self.creation_time();
        let traks = self
            .tracks
            .iter()
            .map(|track| track.build_trak(base_offset, MOVIE_TIMESCALE, creation_time))
            .collect::<Result<Vec<_>>>()?;
        let duration = self
            .tracks
            .iter()
            .map(|track| rescale(track.current_duration(), track.timescale(), MOVIE_TIMESCALE))
            .max()
            .unwrap_or(0);
        Ok(MoovBox {
            mvhd: self.mvhd(duration),
            mvex: None,
            traks,
        })
    }

    fn finish(&mut self) -> Result<T::Output> {
        if self.tracks.is_empty() {
            return Err(ConfigurationError::NoTracks.into());
        }
        self.check_decoder_configs()?;
        if self.state == SessionState::Configuring {
            self.begin_muxing()?;
        }
        self.transition(SessionState::Finalizing);

        match self.config.mode {
            MuxMode::InMemory => self.finish_in_memory()?,
            MuxMode::Progressive => self.finish_progressive()?,
            MuxMode::Fragmented => self.finish_fragmented()?,
        }

        let target = self
            .target
            .take()
            .ok_or(SessionStateError::SessionClosed)?;
        self.bytes_written = target.position();
        let output = target.seal()?;
        self.transition(SessionState::Finalized);
        log::debug!(
            "mux session finalized: {} samples, {} bytes",
            self.stats().samples,
            self.bytes_written
        );
        Ok(output)
    }

    /// Every sample entry has to carry its codec configuration box before it is described.
    fn check_decoder_configs(&self) -> Result<()> {
        match self.tracks.iter().find(|track| !track.has_decoder_config()) {
            Some(track) => Err(ConfigurationError::MissingDecoderConfig {
                track_id: track.id(),
                codec: track.codec(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn finish_in_memory(&mut self) -> Result<()> {
        self.seal_open_chunks()?;

        // Interleave by start time; ties go to the lower track id.
        let mut chunks = std::mem::take(&mut self.held_chunks);
        chunks.sort_by_key(|chunk| (chunk.start_us, chunk.track_id));
        let mut offset = 0u64;
        for chunk in &chunks {
            let index = self.track_index(chunk.track_id)?;
            self.tracks[index].place_chunk(chunk.chunk_index, offset);
            offset += chunk.size;
        }
        let mdat_payload = offset;

        let ftyp = serialize(&self.ftyp())?;
        let mdat_header_len = BoxHeader::header_len(mdat_payload);

        // Chunk offsets depend on the moov size, which depends on whether offsets
        // need co64. Iterate until the size settles.
        let mut moov_len = 0u64;
        let mut moov = Vec::new();
        for _ in 0..4 {
            let base = ftyp.len() as u64 + moov_len + mdat_header_len;
            moov = serialize(&self.build_moov(base)?)?;
            if moov.len() as u64 == moov_len {
                break;
            }
            moov_len = moov.len() as u64;
        }
        if moov.len() as u64 != moov_len {
            return Err(CapacityOverflow::Field("moov size").into());
        }

        let target = target_mut(&mut self.target)?;
        target.write(&ftyp)?;
        target.write(&moov)?;
        let mut header = Vec::new();
        BoxHeader::new(BoxType::MdatBox, mdat_header_len + mdat_payload).write(&mut header)?;
        target.write(&header)?;
        for chunk in &chunks {
            for payload in &chunk.payloads {
                target.write(payload)?;
            }
        }
        Ok(())
    }

    fn finish_progressive(&mut self) -> Result<()> {
        self.seal_open_chunks()?;
        let mdat_start = self
            .mdat_start
            .ok_or(SessionStateError::InvalidTransition {
                operation: "finalize",
                state: "progressive mdat missing",
            })?;

        let mdat_size = HEADER_LARGE_SIZE + self.mdat_payload;
        let moov = serialize(&self.build_moov(mdat_start + HEADER_LARGE_SIZE)?)?;

        let target = target_mut(&mut self.target)?;
        target.patch(mdat_start + 8, &mdat_size.to_be_bytes())?;
        target.write(&moov)?;
        Ok(())
    }

    fn finish_fragmented(&mut self) -> Result<()> {
        self.write_fragment()?;
        if !self.init_written {
            self.write_init()?;
        }

        let tfras = self
            .tracks
            .iter()
            .map(|track| {
                let entries = self
                    .tfra_entries
                    .remove(&track.id())
                    .unwrap_or_default();
                TfraBox::new(track.id(), entries)
            })
            .collect();
        let mfra = serialize(&MfraBox::new(tfras))?;
        target_mut(&mut self.target)?.write(&mfra)?;
        Ok(())
    }

    fn write_init(&mut self) -> Result<()> {
        self.check_decoder_configs()?;
        let creation_time = self.creation_time();
        let moov = MoovBox {
            mvhd: self.mvhd(0),
            mvex: Some(MvexBox {
                trexs: self.tracks.iter().map(|t| TrexBox::new(t.id())).collect(),
            }),
            traks: self
                .tracks
                .iter()
                .map(|track| track.build_init_trak(creation_time))
                .collect::<Result<Vec<_>>>()?,
        };
        let ftyp = serialize(&self.ftyp())?;
        let moov = serialize(&moov)?;

        let target = target_mut(&mut self.target)?;
        target.write(&ftyp)?;
        target.write(&moov)?;
        for track in &mut self.tracks {
            track.lock_descriptions();
        }
        self.init_written = true;
        log::debug!("init segment written ({} bytes)", ftyp.len() + moov.len());
        Ok(())
    }

    /// Seals the collected samples into one `moof` + `mdat` pair.
    #[profiling::function]
    fn write_fragment(&mut self) -> Result<()> {
        if !self.tracks.iter().any(TrackMuxer::has_fragment_samples) {
            return Ok(());
        }
        if !self.init_written {
            self.write_init()?;
        }

        let runs: Vec<(TrackId, FragmentRun)> = self
            .tracks
            .iter_mut()
            .flat_map(|track| {
                let id = track.id();
                track.take_fragment().into_iter().map(move |run| (id, run))
            })
            .collect();
        let mdat_payload: u64 = runs.iter().map(|(_, run)| run.size()).sum();
        let mdat_header_len = BoxHeader::header_len(mdat_payload);

        self.sequence_number += 1;
        let mut moof = MoofBox {
            start: 0,
            mfhd: MfhdBox::new(self.sequence_number),
            trafs: runs
                .iter()
                .map(|(id, run)| {
                    let (durations, sizes, flags) = run.table.trun_columns();
                    Ok(TrafBox {
                        tfhd: TfhdBox::moof_relative(*id, run.description_index),
                        tfdt: Some(TfdtBox::new(run.base_decode_time)),
                        truns: vec![TrunBox::new(0, durations, sizes, flags)?],
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        // Data offsets are relative to the moof start; the trun size does not
        // depend on their value.
        let moof_len = serialize(&moof)?.len() as u64;
        let mut data_offset = moof_len + mdat_header_len;
        for (traf, (id, run)) in moof.trafs.iter_mut().zip(&runs) {
            let offset = i32::try_from(data_offset).map_err(|_| CapacityOverflow::DataOffset(*id))?;
            for trun in &mut traf.truns {
                trun.data_offset = Some(offset);
            }
            data_offset += run.size();
        }
        let moof_bytes = serialize(&moof)?;

        let target = target_mut(&mut self.target)?;
        let moof_offset = target.position();
        target.write(&moof_bytes)?;
        let mut header = Vec::new();
        BoxHeader::new(BoxType::MdatBox, mdat_header_len + mdat_payload).write(&mut header)?;
        target.write(&header)?;
        for (_, run) in &runs {
            for payload in &run.payloads {
                target.write(payload)?;
            }
        }

        for (traf_number, (id, run)) in runs.iter().enumerate() {
            if let Some(sync) = run.table.first_sync_sample() {
                let (durations, _, _) = run.table.trun_columns();
                let before: u64 = durations[..sync as usize].iter().map(|&d| d as u64).sum();
                self.tfra_entries.entry(*id).or_default().push(TfraEntry {
                    time: run.base_decode_time + before,
                    moof_offset,
                    traf_number: traf_number as u32 + 1,
                    trun_number: 1,
                    sample_number: sync + 1,
                });
            }
        }

        self.fragments += 1;
        self.fragment_start_us = None;
        log::debug!(
            "fragment {} written: {} traf(s), {} payload bytes",
            self.sequence_number,
            runs.len(),
            mdat_payload
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackConfig;
    use crate::target::{BufferTarget, StreamTarget};
    use crate::{Error, FirstTimestampBehavior};

    fn vp9() -> TrackConfig {
        TrackConfig::video(Codec::Vp9, 320, 240).with_timescale(30_000)
    }

    fn frame(i: i64) -> Chunk {
        Chunk::new(1, vec![i as u8; 16], i * 33_333, 33_333, i % 30 == 0)
    }

    #[test]
    fn state_machine() {
        let config = MuxConfig::default().with_track(vp9());
        let mut muxer = Muxer::new(config, BufferTarget::new()).unwrap();
        assert_eq!(muxer.state(), SessionState::Configuring);

        muxer.add_chunk(frame(0)).unwrap();
        assert_eq!(muxer.state(), SessionState::Muxing);
        assert!(matches!(
            muxer.add_track(vp9()),
            Err(Error::Configuration(ConfigurationError::TracksLocked))
        ));
        assert_eq!(muxer.state(), SessionState::Aborted);
        assert!(matches!(
            muxer.add_chunk(frame(1)),
            Err(Error::SessionState(SessionStateError::Aborted))
        ));
    }

    #[test]
    fn closed_session_rejects_chunks() {
        let config = MuxConfig::default().with_track(vp9());
        let mut muxer = Muxer::new(config, BufferTarget::new()).unwrap();
        muxer.add_chunk(frame(0)).unwrap();
        muxer.finalize().unwrap();
        assert_eq!(muxer.state(), SessionState::Finalized);

        assert!(matches!(
            muxer.add_chunk(frame(1)),
            Err(Error::SessionState(SessionStateError::SessionClosed))
        ));
        assert!(matches!(
            muxer.finalize(),
            Err(Error::SessionState(SessionStateError::AlreadyFinalized))
        ));
        // Misuse does not abort a finished session.
        assert_eq!(muxer.state(), SessionState::Finalized);
        assert!(muxer.stats().bytes_written > 0);
    }

    #[test]
    fn no_tracks() {
        let mut muxer = Muxer::new(MuxConfig::default(), BufferTarget::new()).unwrap();
        assert!(matches!(
            muxer.finalize(),
            Err(Error::Configuration(ConfigurationError::NoTracks))
        ));
    }

    #[test]
    fn progressive_needs_patching() {
        let config = MuxConfig::new(MuxMode::Progressive).with_track(vp9());
        let err = Muxer::new(config, StreamTarget::new(Vec::new())).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::TargetCannotPatch {
                mode: "progressive"
            })
        ));
    }

    #[test]
    fn strict_first_timestamp() {
        let config = MuxConfig::default().with_track(vp9());
        let mut muxer = Muxer::new(config, BufferTarget::new()).unwrap();
        let err = muxer.add_chunk(Chunk::new(1, vec![0], 5, 10, true)).unwrap_err();
        assert!(matches!(
            err,
            Error::Ordering(OrderingViolation::NonZeroFirstTimestamp { timestamp: 5, .. })
        ));
    }

    #[test]
    fn offset_first_timestamp() {
        let config = MuxConfig {
            first_timestamp_behavior: FirstTimestampBehavior::Offset,
            ..MuxConfig::default().with_track(vp9())
        };
        let mut muxer = Muxer::new(config, BufferTarget::new()).unwrap();
        muxer.add_chunk(Chunk::new(1, vec![0], 1_000_000, 10, true)).unwrap();
        let err = muxer.add_chunk(Chunk::new(1, vec![0], 999_000, 10, false)).unwrap_err();
        assert!(matches!(
            err,
            Error::Ordering(OrderingViolation::NegativeTimestamp { timestamp: -1000, .. })
        ));
    }

    #[test]
    fn unknown_track() {
        let config = MuxConfig::default().with_track(vp9());
        let mut muxer = Muxer::new(config, BufferTarget::new()).unwrap();
        let err = muxer.add_chunk(Chunk::new(2, vec![0], 0, 10, true)).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnknownTrack(2))
        ));
    }

    #[test]
    fn fragments_cut_at_keyframes() {
        let config = MuxConfig {
            fragment_duration_us: 900_000,
            ..MuxConfig::new(MuxMode::Fragmented).with_track(vp9())
        };
        let mut muxer = Muxer::new(config, BufferTarget::new()).unwrap();
        // Keyframe every 30 frames, just short of a second apart.
        for i in 0..95 {
            muxer.add_chunk(frame(i)).unwrap();
        }
        assert_eq!(muxer.stats().fragments, 3);
        muxer.flush_fragment().unwrap();
        assert_eq!(muxer.stats().fragments, 4);
        // Nothing pending: no empty fragment.
        muxer.flush_fragment().unwrap();
        assert_eq!(muxer.stats().fragments, 4);
        assert_eq!(muxer.stats().samples, 95);
    }

    #[test]
    fn init_segment_needs_every_decoder_config() {
        let config = MuxConfig {
            fragment_duration_us: 900_000,
            ..MuxConfig::new(MuxMode::Fragmented)
                .with_track(vp9())
                .with_track(TrackConfig::video(Codec::Hevc, 320, 240))
        };
        let mut muxer = Muxer::new(config, BufferTarget::new()).unwrap();
        for i in 0..30 {
            muxer.add_chunk(frame(i)).unwrap();
        }
        // Frame 30 cuts the first fragment, which needs the init segment.
        let err = muxer.add_chunk(frame(30)).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingDecoderConfig {
                track_id: 2,
                codec: Codec::Hevc
            })
        ));
        assert_eq!(muxer.state(), SessionState::Aborted);
        assert!(muxer.abort().unwrap().as_bytes().is_empty());
    }

    #[test]
    fn fragments_cut_at_byte_limit() {
        let config = MuxConfig {
            max_fragment_bytes: Some(64),
            ..MuxConfig::new(MuxMode::Fragmented).with_track(vp9())
        };
        let mut muxer = Muxer::new(config, BufferTarget::new()).unwrap();
        for i in 0..8 {
            muxer.add_chunk(frame(i)).unwrap();
        }
        // 16-byte frames: every fourth frame fills a fragment.
        assert_eq!(muxer.stats().fragments, 2);
    }

    #[test]
    fn abort_returns_the_target() {
        let config = MuxConfig::new(MuxMode::Fragmented).with_track(vp9());
        let mut muxer = Muxer::new(config, BufferTarget::new()).unwrap();
        muxer.add_chunk(frame(0)).unwrap();
        muxer.flush_fragment().unwrap();
        let target = muxer.abort().unwrap();
        assert!(!target.as_bytes().is_empty());
        assert_eq!(muxer.state(), SessionState::Aborted);
        assert!(muxer.abort().is_none());
    }
}
