use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;

use crate::mp4box::{
    skip_box, BoxHeader, BoxType, FtypBox, MfraBox, MoofBox, MoovBox, ReadBox, StblBox, StsdBox,
    TfhdBox, TrafBox, TrakBox, TrexBox, TrunBox, HEADER_LARGE_SIZE, HEADER_SIZE,
};
use crate::types::{TrackId, TrackKind};
use crate::{Error, Result};

/// A parsed MP4 file: its top-level boxes and the samples of every track.
#[derive(Debug)]
pub struct Mp4 {
    pub ftyp: FtypBox,
    pub moov: MoovBox,
    pub moofs: Vec<MoofBox>,
    pub mfra: Option<MfraBox>,
    tracks: BTreeMap<TrackId, Track>,
}

impl Mp4 {
    #[profiling::function]
    pub fn read<R: Read + Seek>(mut reader: R, size: u64) -> Result<Self> {
        let start = reader.stream_position()?;

        let mut ftyp = None;
        let mut moov = None;
        let mut moofs = Vec::new();
        let mut mfra = None;

        let mut current = start;
        while current < size {
            let header = BoxHeader::read(&mut reader)?;
            let BoxHeader { name, size: s } = header;
            if s > size {
                return Err(Error::InvalidData(
                    "file contains a box with a larger size than it",
                ));
            }

            // A zero size box extends to the end of the file.
            if s == 0 {
                break;
            }

            match name {
                BoxType::FtypBox => {
                    ftyp = Some(FtypBox::read_box(&mut reader, s)?);
                }
                BoxType::FreeBox | BoxType::SkipBox | BoxType::MdatBox => {
                    skip_box(&mut reader, s)?;
                }
                BoxType::MoovBox => {
                    moov = Some(MoovBox::read_box(&mut reader, s)?);
                }
                BoxType::MoofBox => {
                    moofs.push(MoofBox::read_box(&mut reader, s)?);
                }
                BoxType::MfraBox => {
                    mfra = Some(MfraBox::read_box(&mut reader, s)?);
                }
                _ => {
                    log::warn!("skipping unknown top-level box {name}");
                    skip_box(&mut reader, s)?;
                }
            }
            current = reader.stream_position()?;
        }

        let ftyp = ftyp.ok_or(Error::BoxNotFound(BoxType::FtypBox))?;
        let moov = moov.ok_or(Error::BoxNotFound(BoxType::MoovBox))?;

        let mut this = Self {
            ftyp,
            moov,
            moofs,
            mfra,
            tracks: BTreeMap::new(),
        };
        this.tracks = this.build_tracks()?;
        this.add_fragment_samples()?;
        this.load_track_data(&mut reader, size)?;
        Ok(this)
    }

    pub fn tracks(&self) -> &BTreeMap<TrackId, Track> {
        &self.tracks
    }

    /// Whether the file carries its samples in movie fragments.
    pub fn is_fragmented(&self) -> bool {
        self.moov.mvex.is_some()
    }

    fn build_tracks(&self) -> Result<BTreeMap<TrackId, Track>> {
        let mut tracks = BTreeMap::new();
        for trak in &self.moov.traks {
            let stbl = &trak.mdia.minf.stbl;
            let track = Track {
                track_id: trak.tkhd.track_id,
                kind: stbl.stsd.kind(),
                width: trak.tkhd.width.value(),
                height: trak.tkhd.height.value(),
                rotation: trak.tkhd.matrix.degrees(),
                timescale: trak.mdia.mdhd.timescale,
                duration: trak.mdia.mdhd.duration,
                stsd: stbl.stsd.clone(),
                samples: samples_from_stbl(stbl, trak.mdia.mdhd.timescale)?,
                data: Vec::new(),
            };
            tracks.insert(track.track_id, track);
        }
        Ok(tracks)
    }

    fn add_fragment_samples(&mut self) -> Result<()> {
        for moof in &self.moofs {
            let mut previous_traf_end = moof.start;
            for traf in &moof.trafs {
                let track_id = traf.tfhd.track_id;
                let track = self
                    .tracks
                    .get_mut(&track_id)
                    .ok_or(Error::TrakNotFound(track_id))?;
                let trex = self
                    .moov
                    .mvex
                    .as_ref()
                    .and_then(|mvex| mvex.trexs.iter().find(|trex| trex.track_id == track_id))
                    .cloned()
                    .unwrap_or_else(|| TrexBox::new(track_id));
                previous_traf_end = add_traf_samples(track, moof, traf, &trex, previous_traf_end)?;
            }
        }
        Ok(())
    }

    fn load_track_data<R: Read + Seek>(&mut self, reader: &mut R, size: u64) -> Result<()> {
        for track in self.tracks.values_mut() {
            let total: u64 = track.samples.iter().map(|sample| sample.size).sum();
            track.data = Vec::with_capacity(total as usize);
            for sample in &mut track.samples {
                if sample.offset.checked_add(sample.size).map_or(true, |end| end > size) {
                    return Err(Error::InvalidData("sample data lies outside of the file"));
                }
                reader.seek(SeekFrom::Start(sample.offset))?;

                let start = track.data.len();
                track.data.resize(start + sample.size as usize, 0);
                reader.read_exact(&mut track.data[start..])?;
                sample.data_start = start;
            }
        }
        Ok(())
    }
}

/// Lays out the samples described by a progressive sample table.
fn samples_from_stbl(stbl: &StblBox, timescale: u32) -> Result<Vec<Sample>> {
    let sample_count = stbl.stsz.sample_count as usize;
    let mut samples = Vec::with_capacity(sample_count);

    let mut durations = stbl
        .stts
        .entries
        .iter()
        .flat_map(|entry| std::iter::repeat(entry.sample_delta).take(entry.sample_count as usize));
    let mut sync_samples = stbl.stss.as_ref().map(|stss| stss.entries.iter().peekable());

    let mut timestamp = 0u64;
    let stsc = &stbl.stsc.entries;
    for chunk_index in 1..=stbl.chunk_count() as u32 {
        if samples.len() >= sample_count {
            break;
        }
        let Some(run) = stsc.iter().rev().find(|entry| entry.first_chunk <= chunk_index) else {
            return Err(Error::InvalidData("stsc does not describe the first chunk"));
        };
        let mut offset = stbl
            .chunk_offset(chunk_index)
            .ok_or(Error::InvalidData("missing chunk offset"))?;

        for _ in 0..run.samples_per_chunk {
            let index = samples.len();
            if index >= sample_count {
                break;
            }
            let size = stbl
                .stsz
                .size_of(index)
                .ok_or(Error::InvalidData("stsz is shorter than its sample count"))?
                as u64;
            let duration = durations
                .next()
                .ok_or(Error::InvalidData("stts covers fewer samples than stsz"))?
                as u64;
            let number = index as u32 + 1;
            let is_sync = match &mut sync_samples {
                Some(entries) => entries.next_if(|&&entry| entry == number).is_some(),
                None => true,
            };

            samples.push(Sample {
                id: index as u32,
                is_sync,
                size,
                offset,
                timestamp,
                duration,
                description_index: run.sample_description_index,
                timescale,
                data_start: 0,
            });
            offset += size;
            timestamp += duration;
        }
    }

    if samples.len() != sample_count {
        return Err(Error::InvalidData("stsc does not cover every sample"));
    }
    Ok(samples)
}

/// Appends the samples of one `traf`. Returns the end of its sample data.
fn add_traf_samples(
    track: &mut Track,
    moof: &MoofBox,
    traf: &TrafBox,
    trex: &TrexBox,
    previous_traf_end: u64,
) -> Result<u64> {
    let tfhd = &traf.tfhd;
    let base_data_offset = if tfhd.flags & TfhdBox::FLAG_BASE_DATA_OFFSET != 0 {
        tfhd.base_data_offset.unwrap_or(moof.start)
    } else if tfhd.flags & TfhdBox::FLAG_DEFAULT_BASE_IS_MOOF != 0 {
        moof.start
    } else {
        previous_traf_end
    };
    let default_duration = tfhd
        .default_sample_duration
        .unwrap_or(trex.default_sample_duration);
    let default_size = tfhd.default_sample_size.unwrap_or(trex.default_sample_size);
    let default_flags = tfhd.default_sample_flags.unwrap_or(trex.default_sample_flags);
    let description_index = tfhd
        .sample_description_index
        .unwrap_or(trex.default_sample_description_index)
        .max(1);

    let mut timestamp = match &traf.tfdt {
        Some(tfdt) => tfdt.base_media_decode_time,
        None => track.samples.last().map_or(0, Sample::end),
    };
    let mut position = base_data_offset;
    for trun in &traf.truns {
        if let Some(data_offset) = trun.data_offset {
            position = base_data_offset
                .checked_add_signed(data_offset as i64)
                .ok_or(Error::InvalidData("trun data offset points before the file"))?;
        }
        for n in 0..trun.sample_count as usize {
            let flags = match trun.sample_flags.get(n) {
                Some(flags) => *flags,
                None if n == 0 => trun.first_sample_flags.unwrap_or(default_flags),
                None => default_flags,
            };
            let size = trun.sample_sizes.get(n).copied().unwrap_or(default_size) as u64;
            let duration = trun
                .sample_durations
                .get(n)
                .copied()
                .unwrap_or(default_duration) as u64;

            track.samples.push(Sample {
                id: track.samples.len() as u32,
                is_sync: TrunBox::is_sync(flags),
                size,
                offset: position,
                timestamp,
                duration,
                description_index,
                timescale: track.timescale,
                data_start: 0,
            });
            position += size;
            timestamp += duration;
        }
    }
    track.duration = track.duration.max(timestamp);
    Ok(position)
}

pub struct Track {
    pub track_id: TrackId,
    pub kind: Option<TrackKind>,
    pub width: u16,
    pub height: u16,

    /// Rotation of the `tkhd` matrix, if it is a plain rotation.
    pub rotation: Option<u16>,
    pub timescale: u32,

    /// In track ticks. For fragmented files, the end of the last fragment sample.
    pub duration: u64,
    pub stsd: StsdBox,
    pub samples: Vec<Sample>,

    /// Sample payloads, back to back in decode order.
    pub data: Vec<u8>,
}

impl Track {
    pub fn duration_ms(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        (self.duration as f64 * 1e3) / self.timescale as f64
    }

    pub fn trak<'a>(&self, mp4: &'a Mp4) -> Result<&'a TrakBox> {
        mp4.moov
            .traks
            .iter()
            .find(|trak| trak.tkhd.track_id == self.track_id)
            .ok_or(Error::TrakNotFound(self.track_id))
    }

    /// Payload of a sample, by its 0-based id.
    pub fn read_sample(&self, sample_id: u32) -> Option<&[u8]> {
        let sample = self.samples.get(sample_id as usize)?;
        self.data.get(sample.data_range())
    }

    /// Codec string of the first sample description.
    pub fn codec_string(&self) -> Option<String> {
        self.stsd.entry(1).and_then(|entry| entry.codec_string())
    }

    /// Codec strings of all sample descriptions, in `stsd` order.
    pub fn codec_strings(&self) -> Vec<Option<String>> {
        self.stsd.entries.iter().map(|entry| entry.codec_string()).collect()
    }

    /// 1-based numbers of the sync samples.
    pub fn sync_sample_numbers(&self) -> Vec<u32> {
        self.samples
            .iter()
            .filter(|sample| sample.is_sync)
            .map(|sample| sample.id + 1)
            .collect()
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("track_id", &self.track_id)
            .field("kind", &self.kind)
            .field("timescale", &self.timescale)
            .field("duration", &self.duration)
            .field("samples", &self.samples.len())
            .field("data.len", &self.data.len())
            .finish()
    }
}

#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub id: u32,
    pub is_sync: bool,
    pub size: u64,

    /// Offset of the payload in the file.
    pub offset: u64,

    /// Decode time, in track ticks.
    pub timestamp: u64,
    pub duration: u64,

    /// 1-based index into the track's `stsd`.
    pub description_index: u32,
    pub timescale: u32,

    data_start: usize,
}

impl Sample {
    /// Byte range of the payload in the file.
    pub fn range(&self) -> Range<usize> {
        self.offset as usize..(self.offset + self.size) as usize
    }

    /// Decode time of the next sample.
    pub fn end(&self) -> u64 {
        self.timestamp + self.duration
    }

    fn data_range(&self) -> Range<usize> {
        self.data_start..self.data_start + self.size as usize
    }

    pub fn timestamp_ms(&self) -> f64 {
        (self.timestamp as f64 * 1e3) / self.timescale as f64
    }

    pub fn duration_ms(&self) -> f64 {
        (self.duration as f64 * 1e3) / self.timescale as f64
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("id", &self.id)
            .field("is_sync", &self.is_sync)
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .field("description_index", &self.description_index)
            .finish()
    }
}

/// One box of a file, as found by [`boxes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxNode {
    pub box_type: BoxType,

    /// Offset of the header in the file.
    pub offset: u64,

    /// Declared size, header included.
    pub size: u64,
    pub header_len: u64,
    pub children: Vec<BoxNode>,
}

impl BoxNode {
    pub fn payload(&self) -> Range<u64> {
        self.offset + self.header_len..self.offset + self.size
    }

    /// First descendant of the given type, depth first.
    pub fn find(&self, box_type: BoxType) -> Option<&Self> {
        self.children.iter().find_map(|child| {
            if child.box_type == box_type {
                Some(child)
            } else {
                child.find(box_type)
            }
        })
    }
}

const MAX_BOX_DEPTH: usize = 16;

/// Walks the box tree of a file.
///
/// Fails unless the top-level boxes tile the file exactly and the children of
/// every container tile their parent's payload exactly.
#[profiling::function]
pub fn boxes(bytes: &[u8]) -> Result<Vec<BoxNode>> {
    walk(bytes, 0, bytes.len() as u64, 0)
}

fn walk(bytes: &[u8], start: u64, end: u64, depth: usize) -> Result<Vec<BoxNode>> {
    if depth > MAX_BOX_DEPTH {
        return Err(Error::InvalidData("boxes are nested too deeply"));
    }
    let mut nodes = Vec::new();
    let mut offset = start;
    while offset < end {
        let mut node = read_node(bytes, offset, end)?;
        if let Some(children_offset) = node.box_type.children_offset() {
            let children_start = node.offset + node.header_len + children_offset;
            let children_end = node.offset + node.size;
            if children_start > children_end {
                return Err(Error::InvalidData("box is too small for its fields"));
            }
            node.children = walk(bytes, children_start, children_end, depth + 1)?;
        }
        offset += node.size;
        nodes.push(node);
    }
    Ok(nodes)
}

fn header_field(bytes: &[u8], at: u64, len: u64, end: u64) -> Result<&[u8]> {
    if at + len > end {
        return Err(Error::InvalidData("box header extends past its parent"));
    }
    bytes
        .get(at as usize..(at + len) as usize)
        .ok_or(Error::InvalidData("box header extends past the data"))
}

fn read_node(bytes: &[u8], offset: u64, end: u64) -> Result<BoxNode> {
    let header = header_field(bytes, offset, HEADER_SIZE, end)?;
    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
    let box_type = BoxType::from(u32::from_be_bytes([header[4], header[5], header[6], header[7]]));

    let (size, header_len) = match size {
        0 => (end - offset, HEADER_SIZE),
        1 => {
            let large = header_field(bytes, offset + HEADER_SIZE, 8, end)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(large);
            (u64::from_be_bytes(buf), HEADER_LARGE_SIZE)
        }
        size => (size, HEADER_SIZE),
    };
    if size < header_len {
        return Err(Error::InvalidData("box size is smaller than its header"));
    }
    if offset.checked_add(size).map_or(true, |box_end| box_end > end) {
        return Err(Error::InvalidData("box extends past its parent"));
    }
    Ok(BoxNode {
        box_type,
        offset,
        size,
        header_len,
        children: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_box(payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        BoxHeader::new(BoxType::FreeBox, HEADER_SIZE + payload.len() as u64)
            .write(&mut buf)
            .unwrap();
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn boxes_tile_the_file() {
        let mut bytes = free_box(&[1, 2, 3]);
        bytes.extend(free_box(&[]));
        let nodes = boxes(&bytes).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].size, 11);
        assert_eq!(nodes[1].offset, 11);
        assert_eq!(nodes[0].payload(), 8..11);
    }

    #[test]
    fn overlong_box_is_rejected() {
        let mut bytes = free_box(&[1, 2, 3]);
        bytes.truncate(10);
        assert!(matches!(boxes(&bytes), Err(Error::InvalidData(_))));
    }

    #[test]
    fn children_must_fit_their_parent() {
        // A moov declaring 16 bytes whose child claims 12.
        let mut bytes = Vec::new();
        BoxHeader::new(BoxType::MoovBox, 16).write(&mut bytes).unwrap();
        BoxHeader::new(BoxType::FreeBox, 12).write(&mut bytes).unwrap();
        assert!(boxes(&bytes).is_err());

        bytes[11] = 8;
        let nodes = boxes(&bytes).unwrap();
        assert_eq!(nodes[0].children.len(), 1);
        assert!(nodes[0].find(BoxType::FreeBox).is_some());
    }

    #[test]
    fn largesize_header() {
        let mut bytes = Vec::new();
        BoxHeader::new(BoxType::MdatBox, 20).write_large(&mut bytes).unwrap();
        bytes.extend_from_slice(&[0; 4]);
        let nodes = boxes(&bytes).unwrap();
        assert_eq!(nodes[0].header_len, HEADER_LARGE_SIZE);
        assert_eq!(nodes[0].size, 20);
    }

    #[test]
    fn missing_moov() {
        let bytes = free_box(&[]);
        let err = Mp4::read(std::io::Cursor::new(&bytes), bytes.len() as u64).unwrap_err();
        assert!(matches!(err, Error::BoxNotFound(BoxType::FtypBox)));
    }
}
