mod common;

use std::io::Cursor;
use std::time::Duration;

use common::{audio_chunks, interleave, mux, top_level_types, video_chunks, AVCC, OPUS_HEAD};
use re_mp4_mux::{
    Chunk, Codec, DecoderConfig, MuxConfig, MuxMode, SeekTarget, StreamTarget, TrackConfig,
    TrackKind,
};

fn av_config(mode: MuxMode) -> MuxConfig {
    MuxConfig::new(mode)
        .with_track(TrackConfig::video(Codec::Vp9, 640, 360).with_timescale(30_000))
        .with_track(TrackConfig::audio(Codec::Aac, 48_000, 2))
}

fn av_chunks() -> Vec<Chunk> {
    // 3 s of 30 fps video and 48 kHz AAC.
    interleave(vec![video_chunks(1, 90, 30, 30), audio_chunks(2, 140, 48_000)])
}

fn check_round_trip(mode: MuxMode) -> Vec<u8> {
    let chunks = av_chunks();
    let bytes = mux(av_config(mode), chunks.clone());
    let mp4 = re_mp4_mux::read(&bytes).unwrap();

    assert_eq!(mp4.tracks().len(), 2);
    assert_eq!(mp4.moov.mvhd.next_track_id, 3);

    let video = &mp4.tracks()[&1];
    assert_eq!(video.kind, Some(TrackKind::Video));
    assert_eq!(video.codec_string().as_deref(), Some("vp09.00.10.08"));
    assert_eq!((video.width, video.height), (640, 360));
    assert_eq!(video.timescale, 30_000);
    assert_eq!(video.samples.len(), 90);
    assert_eq!(video.duration, 90_000);
    assert_eq!(video.sync_sample_numbers(), vec![1, 31, 61]);

    let audio = &mp4.tracks()[&2];
    assert_eq!(audio.kind, Some(TrackKind::Audio));
    assert_eq!(audio.codec_string().as_deref(), Some("mp4a.40.2"));
    assert_eq!(audio.timescale, 48_000);
    assert_eq!(audio.samples.len(), 140);
    assert_eq!(audio.duration, 140 * 1024);
    assert!(audio.samples.iter().all(|s| s.duration == 1024));

    for (track_id, track) in mp4.tracks() {
        let inputs = chunks.iter().filter(|c| c.track_id == *track_id);
        for (sample, chunk) in track.samples.iter().zip(inputs) {
            assert_eq!(track.read_sample(sample.id), Some(&chunk.data[..]));
            assert_eq!(&bytes[sample.range()], &chunk.data[..]);
            assert_eq!(sample.is_sync, chunk.is_keyframe);
        }
    }

    check_with_mp4_crate(&bytes, mode);

    let movie_ms = mp4.moov.mvhd.duration;
    match mode {
        MuxMode::Fragmented => assert_eq!(movie_ms, 0),
        MuxMode::InMemory | MuxMode::Progressive => assert_eq!(movie_ms, 3000),
    }
    bytes
}

/// Parses the file with the `mp4` crate, which shares no code with this one.
fn check_with_mp4_crate(bytes: &[u8], mode: MuxMode) {
    let reader = mp4::Mp4Reader::read_header(Cursor::new(bytes), bytes.len() as u64).unwrap();
    let tracks = reader.tracks();
    assert_eq!(tracks.len(), 2, "{mode}");

    let video = &tracks[&1];
    assert_eq!(video.media_type().unwrap(), mp4::MediaType::VP9);
    assert_eq!(video.timescale(), 30_000);
    assert_eq!(video.sample_count(), 90, "{mode}");

    let audio = &tracks[&2];
    assert_eq!(audio.media_type().unwrap(), mp4::MediaType::AAC);
    assert_eq!(audio.timescale(), 48_000);
    assert_eq!(audio.sample_count(), 140, "{mode}");

    match mode {
        // Fragments leave the track headers without a duration.
        MuxMode::Fragmented => assert_eq!(video.duration(), Duration::ZERO),
        MuxMode::InMemory | MuxMode::Progressive => {
            assert_eq!(video.duration(), Duration::from_secs(3));
            // 140 * 1024 / 48000 s, truncated to whole microseconds.
            assert_eq!(audio.duration(), Duration::from_micros(2_986_666));
        }
    }
}

#[test]
fn in_memory_round_trip() {
    let bytes = check_round_trip(MuxMode::InMemory);
    assert_eq!(top_level_types(&bytes), vec!["ftyp", "moov", "mdat"]);
}

#[test]
fn progressive_round_trip() {
    let bytes = check_round_trip(MuxMode::Progressive);
    assert_eq!(top_level_types(&bytes), vec!["ftyp", "mdat", "moov"]);

    let nodes = re_mp4_mux::boxes(&bytes).unwrap();
    assert_eq!(nodes[1].header_len, 16, "progressive mdat reserves a 64-bit size");
}

#[test]
fn fragmented_round_trip() {
    let bytes = check_round_trip(MuxMode::Fragmented);
    let types = top_level_types(&bytes);
    assert_eq!(&types[..2], &["ftyp", "moov"]);
    assert_eq!(types.last().map(String::as_str), Some("mfra"));
    // One fragment per second of video, each a moof + mdat pair.
    assert_eq!(&types[2..types.len() - 1], &["moof", "mdat"].repeat(3)[..]);

    let mp4 = re_mp4_mux::read(&bytes).unwrap();
    assert!(mp4.is_fragmented());
    assert_eq!(mp4.moofs.len(), 3);
    let sequence: Vec<u32> = mp4.moofs.iter().map(|m| m.mfhd.sequence_number).collect();
    assert_eq!(sequence, vec![1, 2, 3]);

    let mfra = mp4.mfra.as_ref().unwrap();
    let video_index = mfra.tfras.iter().find(|t| t.track_id == 1).unwrap();
    let times: Vec<u64> = video_index.entries.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![0, 30_000, 60_000]);
    for (entry, moof) in video_index.entries.iter().zip(&mp4.moofs) {
        assert_eq!(entry.moof_offset, moof.start);
    }
}

#[test]
fn in_memory_interleaves_chunks() {
    let bytes = mux(av_config(MuxMode::InMemory), av_chunks());
    let mp4 = re_mp4_mux::read(&bytes).unwrap();
    let video = &mp4.tracks()[&1];
    let audio = &mp4.tracks()[&2];

    let first_audio = audio.samples[0].offset;
    let last_video = video.samples.last().unwrap().offset;
    assert!(first_audio < last_video, "tracks are interleaved, not appended");

    // 0.5 s chunks: one stsc row covers every full video chunk.
    let stsc = &mp4.moov.traks[0].mdia.minf.stbl.stsc.entries;
    assert_eq!(stsc[0].samples_per_chunk, 15);
    assert_eq!(mp4.moov.traks[0].mdia.minf.stbl.chunk_count(), 6);
}

#[test]
fn in_memory_mode_writes_to_a_stream() {
    let config = av_config(MuxMode::InMemory);
    let mut muxer = re_mp4_mux::Muxer::new(config, StreamTarget::new(Vec::new())).unwrap();
    for chunk in av_chunks() {
        muxer.add_chunk(chunk).unwrap();
    }
    let bytes = muxer.finalize().unwrap();
    assert_eq!(bytes, mux(av_config(MuxMode::InMemory), av_chunks()));
}

#[test]
fn progressive_mode_writes_to_a_seekable_file() {
    let config = av_config(MuxMode::Progressive);
    let target = SeekTarget::new(std::io::Cursor::new(Vec::new())).unwrap();
    let mut muxer = re_mp4_mux::Muxer::new(config, target).unwrap();
    for chunk in av_chunks() {
        muxer.add_chunk(chunk).unwrap();
    }
    let bytes = muxer.finalize().unwrap().into_inner();
    assert_eq!(bytes, mux(av_config(MuxMode::Progressive), av_chunks()));
}

#[test]
fn avc_and_opus_descriptions() {
    let config = MuxConfig::new(MuxMode::InMemory)
        .with_track(TrackConfig::video(Codec::Avc, 1280, 720).with_rotation(90))
        .with_track(TrackConfig::audio(Codec::Opus, 48_000, 2));

    let mut chunks = interleave(vec![video_chunks(1, 10, 30, 5), audio_chunks(2, 10, 48_000)]);
    for chunk in &mut chunks {
        if chunk.timestamp == 0 {
            chunk.decoder_config = Some(match chunk.track_id {
                1 => DecoderConfig::new("avc1.64001f", AVCC.to_vec()),
                _ => DecoderConfig::new("opus", OPUS_HEAD.to_vec()),
            });
        }
    }
    let bytes = mux(config, chunks);
    let mp4 = re_mp4_mux::read(&bytes).unwrap();

    let video = &mp4.tracks()[&1];
    assert_eq!(video.codec_string().as_deref(), Some("avc1.64001F"));
    assert_eq!(video.rotation, Some(90));
    assert_eq!(video.timescale, re_mp4_mux::DEFAULT_VIDEO_TIMESCALE);

    let audio = &mp4.tracks()[&2];
    assert_eq!(audio.codec_string().as_deref(), Some("opus"));
    let dops = match &audio.stsd.entries[0] {
        re_mp4_mux::StsdBoxContent::Opus(opus) => opus.dops.clone().unwrap(),
        other => panic!("unexpected sample entry {other:?}"),
    };
    assert_eq!(dops.pre_skip, 312);
    assert_eq!(dops.output_channel_count, 2);
}

#[test]
fn config_from_json() {
    let config = MuxConfig::from_json(
        r#"{
            "mode": "fragmented",
            "fragment_duration_us": 500000,
            "tracks": [{ "codec": "vp9", "width": 320, "height": 240, "timescale": 90000 }]
        }"#,
    )
    .unwrap();
    let bytes = mux(config, video_chunks(1, 30, 30, 15));
    let mp4 = re_mp4_mux::read(&bytes).unwrap();
    assert_eq!(mp4.moofs.len(), 2);
    assert_eq!(mp4.tracks()[&1].timescale, 90_000);
    assert_eq!(mp4.tracks()[&1].duration, 90_000);
}
