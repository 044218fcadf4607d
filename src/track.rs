//! Per-track muxing state: sample descriptions, timing and sample storage.

use crate::config::{MuxMode, TrackConfig};
use crate::error::{CapacityOverflow, ConfigurationError, OrderingViolation};
use crate::mp4box::{
    Av01Box, Av1CBox, Avc1Box, AvcCBox, AudioSampleEntry, DinfBox, DopsBox, EsdsBox, HdlrBox,
    HevcBox, HvcCBox, Matrix, MdhdBox, MdiaBox, MinfBox, Mp4aBox, OpusBox, SmhdBox, StblBox,
    StsdBox, StsdBoxContent, TkhdBox, TrakBox, VisualSampleEntry, VmhdBox, Vp09Box, VpccBox,
};
use crate::sample_table::SampleTableBuilder;
use crate::types::{Bytes, Codec, DecoderConfig, FixedPointU8, TrackId, TrackKind};
use crate::Result;

/// Converts microseconds to `timescale` ticks, rounding to the nearest tick (halves up).
///
/// Every timestamp is converted on its own, so rounding errors never accumulate
/// beyond one tick.
pub fn micros_to_ticks(micros: i64, timescale: u32) -> i64 {
    let scaled = micros as i128 * timescale as i128 * 2 + 1_000_000;
    let ticks = scaled.div_euclid(2_000_000);
    i64::try_from(ticks).unwrap_or(if ticks < 0 { i64::MIN } else { i64::MAX })
}

/// Rescales `ticks` from one timescale to another, rounding to nearest.
pub fn rescale(ticks: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    let scaled = (ticks as u128 * to as u128 + from as u128 / 2) / from as u128;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

fn duration_ticks(ticks: i64) -> Result<u32> {
    u32::try_from(ticks).map_err(|_| CapacityOverflow::SampleDuration(ticks).into())
}

/// Builds the `stsd` entry for a track from its configuration and an optional
/// encoder-provided decoder config.
///
/// Entries of codecs that need a description but have none are built without
/// their configuration box.
pub fn sample_entry(
    track_id: TrackId,
    config: &TrackConfig,
    decoder: Option<&DecoderConfig>,
) -> Result<StsdBoxContent> {
    let description: Option<Vec<u8>> = decoder
        .map(|decoder| decoder.description.to_vec())
        .filter(|d| !d.is_empty())
        .or_else(|| config.codec_config.as_ref().map(|c| c.to_vec()))
        .filter(|d| !d.is_empty());
    let codec_string = decoder.map_or_else(|| config.effective_codec_string(), |d| d.codec.clone());

    let visual = || VisualSampleEntry::new(config.width as u16, config.height as u16);
    let audio = || AudioSampleEntry::new(config.sample_rate, config.channels);

    Ok(match config.codec {
        Codec::Avc => StsdBoxContent::Avc1(Avc1Box {
            visual: visual(),
            avcc: description.map(AvcCBox::from_raw),
        }),
        Codec::Hevc => {
            let entry = HevcBox {
                visual: visual(),
                hvcc: description.map(HvcCBox::from_raw),
            };
            if codec_string.starts_with("hev1") {
                StsdBoxContent::Hev1(entry)
            } else {
                StsdBoxContent::Hvc1(entry)
            }
        }
        Codec::Av1 => StsdBoxContent::Av01(Av01Box {
            visual: visual(),
            av1c: description.map(Av1CBox::from_raw),
        }),
        Codec::Vp9 => StsdBoxContent::Vp09(Vp09Box {
            visual: visual(),
            vpcc: Some(VpccBox::from_codec_string(&codec_string)?),
        }),
        Codec::Aac => StsdBoxContent::Mp4a(Mp4aBox {
            audio: audio(),
            esds: Some(match description {
                Some(asc) => EsdsBox::from_audio_specific_config(asc),
                None => EsdsBox::synthesize(config.sample_rate, config.channels),
            }),
        }),
        Codec::Opus => {
            let channels = u8::try_from(config.channels)
                .map_err(|_| ConfigurationError::InvalidAudioParameters { track_id })?;
            StsdBoxContent::Opus(OpusBox {
                audio: audio(),
                dops: Some(match description {
                    Some(head) => DopsBox::from_opus_head(&head)?,
                    None => DopsBox::new(config.sample_rate, channels),
                }),
            })
        }
    })
}

/// Samples of a closed chunk, ready to be placed in the `mdat`.
#[derive(Debug)]
pub struct SealedChunk {
    pub track_id: TrackId,

    /// Index of the chunk in the track's sample table.
    pub chunk_index: usize,

    /// Timestamp of the first sample, in microseconds.
    pub start_us: i64,
    pub payloads: Vec<Bytes>,
    pub size: u64,
}

#[derive(Debug)]
struct OpenChunk {
    index: usize,
    description_index: u32,
    start_us: i64,
    payloads: Vec<Bytes>,
    size: u64,
}

/// Samples of one track collected for the next fragment, all sharing one sample description.
#[derive(Debug)]
pub struct FragmentRun {
    pub description_index: u32,

    /// Decode time of the first sample, in track ticks.
    pub base_decode_time: u64,
    pub table: SampleTableBuilder,
    pub payloads: Vec<Bytes>,
}

impl FragmentRun {
    pub fn size(&self) -> u64 {
        self.table.total_size()
    }
}

/// One media track of a mux session.
///
/// Checks ordering and sync-lead rules, converts microseconds to track ticks
/// and stores samples either in chunks (progressive modes) or in fragment runs.
#[derive(Debug)]
pub struct TrackMuxer {
    id: TrackId,
    config: TrackConfig,
    mode: MuxMode,
    timescale: u32,

    descriptions: Vec<StsdBoxContent>,
    descriptions_locked: bool,
    needs_sync_lead: bool,

    last_timestamp_us: Option<i64>,
    last_start_ticks: Option<i64>,
    end_ticks: i64,
    sample_count: u64,
    payload_bytes: u64,

    table: SampleTableBuilder,
    open_chunk: Option<OpenChunk>,
    fragment: Vec<FragmentRun>,
}

impl TrackMuxer {
    pub fn new(id: TrackId, config: TrackConfig, mode: MuxMode) -> Result<Self> {
        config.validate(id)?;
        let description = sample_entry(id, &config, None)?;
        Ok(Self {
            id,
            timescale: config.effective_timescale(),
            config,
            mode,
            descriptions: vec![description],
            descriptions_locked: false,
            needs_sync_lead: true,
            last_timestamp_us: None,
            last_start_ticks: None,
            end_ticks: 0,
            sample_count: 0,
            payload_bytes: 0,
            table: SampleTableBuilder::new(),
            open_chunk: None,
            fragment: Vec::new(),
        })
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.config.kind()
    }

    pub fn codec(&self) -> Codec {
        self.config.codec
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }

    /// Whether the current sample description carries its codec configuration box.
    pub fn has_decoder_config(&self) -> bool {
        self.descriptions
            .last()
            .map_or(false, StsdBoxContent::has_config)
    }

    /// Freezes the sample descriptions once an init segment has described them.
    pub fn lock_descriptions(&mut self) {
        self.descriptions_locked = true;
    }

    /// Duration of the track so far, in track ticks.
    ///
    /// In fragmented mode this is the decode time at the end of the last sample.
    pub fn current_duration(&self) -> u64 {
        match self.mode {
            MuxMode::Fragmented => self.end_ticks.max(0) as u64,
            MuxMode::InMemory | MuxMode::Progressive => self.table.total_duration(),
        }
    }

    /// Records a decoder config carried by a chunk.
    ///
    /// Before the first sample it replaces the track's description. Later, a
    /// config that differs from the current one appends a new description and
    /// requires the next sample to be a sync sample. Returns `true` when a new
    /// description was appended.
    pub fn add_config(&mut self, decoder: &DecoderConfig) -> Result<bool> {
        let found = decoder.codec()?;
        if found != self.codec() {
            return Err(ConfigurationError::CodecMismatch {
                track_id: self.id,
                expected: self.codec(),
                found: decoder.codec.clone(),
            }
            .into());
        }

        let entry = sample_entry(self.id, &self.config, Some(decoder))?;
        if self.descriptions.last() == Some(&entry) {
            return Ok(false);
        }
        if self.descriptions_locked {
            return Err(ConfigurationError::ConfigChangeAfterInit { track_id: self.id }.into());
        }

        if self.sample_count == 0 {
            log::debug!("track {}: decoder config set to {}", self.id, decoder.codec);
            self.descriptions = vec![entry];
            return Ok(false);
        }

        log::debug!(
            "track {}: decoder config changed to {}, sample description {}",
            self.id,
            decoder.codec,
            self.descriptions.len() + 1
        );
        self.descriptions.push(entry);
        self.needs_sync_lead = true;
        Ok(true)
    }

    /// Checks a sample against the track's ordering rules without storing it.
    pub fn check_sample(&self, timestamp_us: i64, duration_us: i64, is_sync: bool) -> Result<()> {
        if timestamp_us < 0 {
            return Err(OrderingViolation::NegativeTimestamp {
                track_id: self.id,
                timestamp: timestamp_us,
            }
            .into());
        }
        if duration_us < 0 {
            return Err(OrderingViolation::NegativeDuration {
                track_id: self.id,
                duration: duration_us,
            }
            .into());
        }
        if self.needs_sync_lead && !is_sync && self.config.sync_lead_required() {
            return Err(OrderingViolation::NonSyncLeadSample {
                track_id: self.id,
                timestamp: timestamp_us,
            }
            .into());
        }
        if let Some(previous) = self.last_timestamp_us {
            if timestamp_us < previous {
                return Err(OrderingViolation::OutOfOrderSample {
                    track_id: self.id,
                    previous,
                    timestamp: timestamp_us,
                }
                .into());
            }
        }
        if !self.has_decoder_config() {
            return Err(ConfigurationError::MissingDecoderConfig {
                track_id: self.id,
                codec: self.codec(),
            }
            .into());
        }
        Ok(())
    }

    /// Accepts one sample. Timestamps are in microseconds on the session timeline.
    ///
    /// In the progressive modes, a chunk that had to be closed to take the sample
    /// is returned for placement in the `mdat`.
    pub fn add_sample(
        &mut self,
        timestamp_us: i64,
        duration_us: i64,
        is_sync: bool,
        payload: Bytes,
        chunk_duration_us: u64,
    ) -> Result<Option<SealedChunk>> {
        self.check_sample(timestamp_us, duration_us, is_sync)?;

        let size = payload.len() as u64;
        let start_ticks = micros_to_ticks(timestamp_us, self.timescale);
        let end_ticks = micros_to_ticks(timestamp_us.saturating_add(duration_us), self.timescale);
        let duration = duration_ticks(end_ticks - start_ticks)?;
        let previous_duration = self
            .last_start_ticks
            .map(|previous| duration_ticks(start_ticks - previous))
            .transpose()?;
        let description_index = self.descriptions.len() as u32;

        let sealed = match self.mode {
            MuxMode::Fragmented => {
                if let (Some(run), Some(previous)) = (self.fragment.last_mut(), previous_duration) {
                    run.table.set_last_duration(previous);
                }
                if self
                    .fragment
                    .last()
                    .map_or(true, |run| run.description_index != description_index)
                {
                    self.fragment.push(FragmentRun {
                        description_index,
                        base_decode_time: start_ticks as u64,
                        table: SampleTableBuilder::new(),
                        payloads: Vec::new(),
                    });
                }
                if let Some(run) = self.fragment.last_mut() {
                    run.table.push_sample(size, duration, is_sync)?;
                    run.payloads.push(payload);
                }
                None
            }
            MuxMode::InMemory | MuxMode::Progressive => {
                let must_seal = self.open_chunk.as_ref().map_or(false, |open| {
                    open.description_index != description_index
                        || timestamp_us.saturating_sub(open.start_us) as u64 >= chunk_duration_us
                });
                let sealed = if must_seal { self.seal_chunk() } else { None };

                if let Some(previous) = previous_duration {
                    self.table.set_last_duration(previous);
                }
                if self.open_chunk.is_none() {
                    self.open_chunk = Some(OpenChunk {
                        index: self.table.open_chunk(description_index),
                        description_index,
                        start_us: timestamp_us,
                        payloads: Vec::new(),
                        size: 0,
                    });
                }
                self.table.push_sample(size, duration, is_sync)?;
                if let Some(open) = &mut self.open_chunk {
                    open.payloads.push(payload);
                    open.size += size;
                }
                sealed
            }
        };

        self.needs_sync_lead = false;
        self.last_timestamp_us = Some(timestamp_us);
        self.last_start_ticks = Some(start_ticks);
        self.end_ticks = end_ticks;
        self.sample_count += 1;
        self.payload_bytes += size;

        log::trace!(
            "track {}: sample {} at {start_ticks}/{} ({size} bytes, sync {is_sync})",
            self.id,
            self.sample_count,
            self.timescale
        );
        Ok(sealed)
    }

    /// Closes the open chunk, if any.
    pub fn seal_chunk(&mut self) -> Option<SealedChunk> {
        let open = self.open_chunk.take()?;
        Some(SealedChunk {
            track_id: self.id,
            chunk_index: open.index,
            start_us: open.start_us,
            payloads: open.payloads,
            size: open.size,
        })
    }

    /// Sets where a sealed chunk landed, relative to the start of the `mdat` payload.
    pub fn place_chunk(&mut self, chunk_index: usize, offset: u64) {
        self.table.set_chunk_offset(chunk_index, offset);
    }

    pub fn has_fragment_samples(&self) -> bool {
        !self.fragment.is_empty()
    }

    pub fn fragment_bytes(&self) -> u64 {
        self.fragment.iter().map(FragmentRun::size).sum()
    }

    /// Hands over the samples collected since the last fragment.
    pub fn take_fragment(&mut self) -> Vec<FragmentRun> {
        std::mem::take(&mut self.fragment)
    }

    pub fn stsd(&self) -> StsdBox {
        StsdBox {
            entries: self.descriptions.clone(),
            ..Default::default()
        }
    }

    /// The complete `trak` for the progressive modes, with chunk offsets shifted by `base_offset`.
    pub fn build_trak(&self, base_offset: u64, movie_timescale: u32, creation_time: u64) -> Result<TrakBox> {
        let stbl = self.table.build(self.stsd(), base_offset)?;
        Ok(self.trak(stbl, self.current_duration(), movie_timescale, creation_time))
    }

    /// The `trak` of an init segment: sample descriptions and empty tables.
    pub fn build_init_trak(&self, creation_time: u64) -> Result<TrakBox> {
        let stbl = SampleTableBuilder::new().build(self.stsd(), 0)?;
        Ok(self.trak(stbl, 0, 0, creation_time))
    }

    fn trak(&self, stbl: StblBox, duration: u64, movie_timescale: u32, creation_time: u64) -> TrakBox {
        let movie_duration = rescale(duration, self.timescale, movie_timescale);
        let version = |value: u64| u8::from(value > u32::MAX as u64 || creation_time > u32::MAX as u64);

        let mut tkhd = TkhdBox {
            version: version(movie_duration),
            creation_time,
            modification_time: creation_time,
            track_id: self.id,
            duration: movie_duration,
            ..Default::default()
        };
        let (vmhd, smhd) = match self.kind() {
            TrackKind::Video => {
                tkhd.volume = FixedPointU8::new(0);
                tkhd.matrix = Matrix::rotation(self.config.rotation).unwrap_or_default();
                tkhd.set_width(self.config.width as u16);
                tkhd.set_height(self.config.height as u16);
                (Some(VmhdBox::default()), None)
            }
            TrackKind::Audio => {
                tkhd.alternate_group = 1;
                (None, Some(SmhdBox::default()))
            }
        };

        TrakBox {
            tkhd,
            mdia: MdiaBox {
                mdhd: MdhdBox {
                    version: version(duration),
                    creation_time,
                    modification_time: creation_time,
                    timescale: self.timescale,
                    duration,
                    ..Default::default()
                },
                hdlr: HdlrBox::new(self.kind()),
                minf: MinfBox {
                    vmhd,
                    smhd,
                    dinf: DinfBox::default(),
                    stbl,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn vp9_track(mode: MuxMode) -> TrackMuxer {
        let config = TrackConfig::video(Codec::Vp9, 1280, 720).with_timescale(60_000);
        TrackMuxer::new(1, config, mode).unwrap()
    }

    #[test]
    fn ticks_round_to_nearest() {
        assert_eq!(micros_to_ticks(0, 90_000), 0);
        assert_eq!(micros_to_ticks(1_000_000, 90_000), 90_000);
        // 16666µs at 60 Hz is 0.99996 frames.
        assert_eq!(micros_to_ticks(16_666, 60), 1);
        // Exactly half a tick rounds up.
        assert_eq!(micros_to_ticks(500_000, 1), 1);
        assert_eq!(micros_to_ticks(499_999, 1), 0);
        assert_eq!(micros_to_ticks(i64::MAX, u32::MAX), i64::MAX);
    }

    #[test]
    fn rescale_rounds() {
        assert_eq!(rescale(600_000, 60_000, 1000), 10_000);
        assert_eq!(rescale(1, 3, 1000), 333);
        assert_eq!(rescale(2, 3, 1000), 667);
        assert_eq!(rescale(5, 0, 1000), 0);
    }

    #[test]
    fn durations_come_from_rounded_starts() {
        let mut track = vp9_track(MuxMode::InMemory);
        // 30 fps expressed in whole microseconds.
        for i in 0..3 {
            let ts = i * 33_333;
            let payload = Bytes::from_static(&[0; 10]);
            track.add_sample(ts, 33_333, i == 0, payload, 500_000).unwrap();
        }
        // Starts are 0, 2000, 4000 ticks; the last sample ends at 99999µs -> 6000 ticks.
        assert_eq!(track.current_duration(), 6000);
        let stbl = track.table.build(track.stsd(), 0).unwrap();
        assert_eq!(stbl.stts.entries.len(), 1);
        assert_eq!(stbl.stts.entries[0].sample_delta, 2000);
    }

    #[test]
    fn rejects_out_of_order_and_non_sync_lead() {
        let mut track = vp9_track(MuxMode::InMemory);
        let err = track.add_sample(0, 10, false, Bytes::new(), 500_000).unwrap_err();
        assert!(matches!(
            err,
            Error::Ordering(OrderingViolation::NonSyncLeadSample { .. })
        ));

        track.add_sample(1000, 10, true, Bytes::new(), 500_000).unwrap();
        // Equal timestamps are allowed.
        track.add_sample(1000, 10, false, Bytes::new(), 500_000).unwrap();
        let err = track.add_sample(999, 10, false, Bytes::new(), 500_000).unwrap_err();
        assert!(matches!(
            err,
            Error::Ordering(OrderingViolation::OutOfOrderSample {
                previous: 1000,
                timestamp: 999,
                ..
            })
        ));

        let err = track.add_sample(2000, -1, false, Bytes::new(), 500_000).unwrap_err();
        assert!(matches!(
            err,
            Error::Ordering(OrderingViolation::NegativeDuration { .. })
        ));
    }

    #[test]
    fn chunks_close_after_chunk_duration() {
        let mut track = vp9_track(MuxMode::Progressive);
        let mut sealed = Vec::new();
        for i in 0..10 {
            let payload = Bytes::from(vec![i as u8; 4]);
            if let Some(chunk) = track.add_sample(i * 100_000, 100_000, i == 0, payload, 250_000).unwrap() {
                sealed.push(chunk);
            }
        }
        sealed.extend(track.seal_chunk());
        let counts: Vec<usize> = sealed.iter().map(|c| c.payloads.len()).collect();
        assert_eq!(counts, vec![3, 3, 3, 1]);
        assert_eq!(sealed[1].start_us, 300_000);
        assert_eq!(sealed[1].size, 12);
    }

    #[test]
    fn config_change_appends_description() {
        let mut track = vp9_track(MuxMode::InMemory);
        // Same codec string as the track: no new description.
        let same = DecoderConfig::new("vp09.00.10.08", Bytes::new());
        assert!(!track.add_config(&same).unwrap());

        // Before the first sample a different config replaces the description.
        let first = DecoderConfig::new("vp09.00.20.08", Bytes::new());
        assert!(!track.add_config(&first).unwrap());
        assert_eq!(track.stsd().entries.len(), 1);

        track.add_sample(0, 10, true, Bytes::new(), 500_000).unwrap();
        let next = DecoderConfig::new("vp09.00.31.08", Bytes::new());
        assert!(track.add_config(&next).unwrap());
        assert_eq!(track.stsd().entries.len(), 2);

        let err = track.add_sample(10, 10, false, Bytes::new(), 500_000).unwrap_err();
        assert!(matches!(
            err,
            Error::Ordering(OrderingViolation::NonSyncLeadSample { .. })
        ));
        let sealed = track.add_sample(10, 10, true, Bytes::new(), 500_000).unwrap();
        assert!(sealed.is_some(), "description change closes the chunk");

        let err = track
            .add_config(&DecoderConfig::new("opus", Bytes::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::CodecMismatch { .. })
        ));
    }

    #[test]
    fn locked_descriptions_reject_changes() {
        let mut track = vp9_track(MuxMode::Fragmented);
        track.lock_descriptions();
        let err = track
            .add_config(&DecoderConfig::new("vp09.01.10.08", Bytes::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::ConfigChangeAfterInit { track_id: 1 })
        ));
    }

    #[test]
    fn avc_needs_a_description() {
        let config = TrackConfig::video(Codec::Avc, 640, 480);
        let mut track = TrackMuxer::new(3, config, MuxMode::InMemory).unwrap();
        let err = track.add_sample(0, 10, true, Bytes::new(), 500_000).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingDecoderConfig {
                track_id: 3,
                codec: Codec::Avc
            })
        ));
    }

    #[test]
    fn audio_sync_lead_is_configurable() {
        let config = TrackConfig::audio(Codec::Aac, 48_000, 2).with_require_sync_lead(false);
        let mut track = TrackMuxer::new(2, config, MuxMode::Fragmented).unwrap();
        track.add_sample(0, 21_333, false, Bytes::from_static(&[1, 2]), 0).unwrap();
        track.add_sample(21_333, 21_333, false, Bytes::from_static(&[3]), 0).unwrap();

        let runs = track.take_fragment();
        assert_eq!(runs.len(), 1);
        let (durations, sizes, _) = runs[0].table.trun_columns();
        assert_eq!(durations, vec![1024, 1024]);
        assert_eq!(sizes, vec![2, 1]);
        assert!(!track.has_fragment_samples());
    }

    #[test]
    fn trak_headers() {
        let config = TrackConfig::video(Codec::Vp9, 1920, 1080)
            .with_timescale(60_000)
            .with_rotation(90);
        let mut track = TrackMuxer::new(1, config, MuxMode::InMemory).unwrap();
        track.add_sample(0, 2_000_000, true, Bytes::from_static(&[0; 8]), 500_000).unwrap();
        track.seal_chunk();

        let trak = track.build_trak(48, 1000, 0).unwrap();
        assert_eq!(trak.tkhd.track_id, 1);
        assert_eq!(trak.tkhd.duration, 2000);
        assert_eq!(trak.tkhd.width.value(), 1920);
        assert_eq!(trak.tkhd.matrix.degrees(), Some(90));
        assert_eq!(trak.mdia.mdhd.timescale, 60_000);
        assert_eq!(trak.mdia.mdhd.duration, 120_000);
        assert!(trak.mdia.minf.vmhd.is_some());
        assert_eq!(trak.mdia.minf.stbl.stco.as_ref().unwrap().entries, vec![48]);
    }
}
