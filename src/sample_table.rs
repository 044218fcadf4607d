//! Accumulates per-sample metadata and turns it into the `stbl` tables.

use crate::error::CapacityOverflow;
use crate::mp4box::{
    Co64Box, StblBox, StcoBox, StscBox, StscEntry, StsdBox, StssBox, StszBox, SttsBox, SttsEntry,
    TrunBox,
};
use crate::Result;

/// A run of samples stored back to back in the media data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRun {
    /// Offset of the first sample, relative to the start of the `mdat` payload.
    pub offset: u64,
    pub sample_count: u32,

    /// 1-based index into `stsd`.
    pub description_index: u32,
}

/// Sample sizes, durations, sync flags and chunk layout of one track.
///
/// Samples are added in decode order and always land in the most recently
/// opened chunk. Durations are in track timescale ticks; the duration of the
/// latest sample can be corrected once the next timestamp is known.
#[derive(Debug, Default, Clone)]
pub struct SampleTableBuilder {
    sizes: Vec<u32>,
    durations: Vec<u32>,

    /// 1-based numbers of the sync samples.
    sync_samples: Vec<u32>,
    chunks: Vec<ChunkRun>,
    total_size: u64,
}

impl SampleTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_count(&self) -> u32 {
        self.sizes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Sum of all sample durations, in ticks.
    pub fn total_duration(&self) -> u64 {
        self.durations.iter().map(|&d| d as u64).sum()
    }

    /// Sum of all sample sizes, in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunks(&self) -> &[ChunkRun] {
        &self.chunks
    }

    /// Starts a new chunk. Returns its 0-based index.
    pub fn open_chunk(&mut self, description_index: u32) -> usize {
        self.chunks.push(ChunkRun {
            offset: 0,
            sample_count: 0,
            description_index,
        });
        self.chunks.len() - 1
    }

    /// Description index of the chunk samples are currently added to.
    pub fn current_description_index(&self) -> Option<u32> {
        self.chunks.last().map(|chunk| chunk.description_index)
    }

    pub fn set_chunk_offset(&mut self, chunk_index: usize, offset: u64) {
        if let Some(chunk) = self.chunks.get_mut(chunk_index) {
            chunk.offset = offset;
        }
    }

    /// Appends a sample to the open chunk, opening one with description 1 if there is none.
    pub fn push_sample(&mut self, size: u64, duration: u32, is_sync: bool) -> Result<()> {
        let size = u32::try_from(size).map_err(|_| CapacityOverflow::SampleSize(size))?;
        if self.chunks.is_empty() {
            self.open_chunk(1);
        }
        let sample_number = self.sizes.len() as u32 + 1;
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.sample_count += 1;
        }
        self.sizes.push(size);
        self.durations.push(duration);
        if is_sync {
            self.sync_samples.push(sample_number);
        }
        self.total_size += size as u64;
        Ok(())
    }

    /// Replaces the duration of the most recent sample.
    pub fn set_last_duration(&mut self, duration: u32) {
        if let Some(last) = self.durations.last_mut() {
            *last = duration;
        }
    }

    /// The `trun` columns of all samples: durations, sizes and sample flags.
    pub fn trun_columns(&self) -> (Vec<u32>, Vec<u32>, Vec<u32>) {
        let mut sync = self.sync_samples.iter().peekable();
        let flags = (1..=self.sizes.len() as u32)
            .map(|number| {
                let is_sync = sync.next_if_eq(&&number).is_some();
                TrunBox::sample_flags_for(is_sync)
            })
            .collect();
        (self.durations.clone(), self.sizes.clone(), flags)
    }

    /// 0-based index of the first sync sample, if any.
    pub fn first_sync_sample(&self) -> Option<u32> {
        self.sync_samples.first().map(|number| number - 1)
    }

    /// Builds the sample table with chunk offsets shifted by `base_offset`.
    ///
    /// `co64` replaces `stco` when an offset does not fit 32 bits. `stss` is
    /// left out when every sample is a sync sample.
    pub fn build(&self, stsd: StsdBox, base_offset: u64) -> Result<StblBox> {
        u32::try_from(self.sizes.len()).map_err(|_| CapacityOverflow::EntryCount(self.sizes.len()))?;

        let offsets: Vec<u64> = self
            .filled_chunks()
            .map(|chunk| {
                base_offset
                    .checked_add(chunk.offset)
                    .ok_or(CapacityOverflow::Field("chunk offset"))
            })
            .collect::<std::result::Result<_, _>>()?;
        let (stco, co64) = if offsets.iter().all(|&o| o <= u32::MAX as u64) {
            let entries = offsets.iter().map(|&o| o as u32).collect();
            (
                Some(StcoBox {
                    entries,
                    ..Default::default()
                }),
                None,
            )
        } else {
            (
                None,
                Some(Co64Box {
                    entries: offsets,
                    ..Default::default()
                }),
            )
        };

        let stss = (self.sync_samples.len() != self.sizes.len()).then(|| StssBox {
            entries: self.sync_samples.clone(),
            ..Default::default()
        });

        Ok(StblBox {
            stsd,
            stts: SttsBox {
                entries: self.time_to_sample(),
                ..Default::default()
            },
            stss,
            stsc: StscBox {
                entries: self.sample_to_chunk(),
                ..Default::default()
            },
            stsz: StszBox::from_sizes(self.sizes.clone()),
            stco,
            co64,
        })
    }

    /// Chunks that received samples. Opened chunks that stayed empty are not written.
    fn filled_chunks(&self) -> impl Iterator<Item = &ChunkRun> {
        self.chunks.iter().filter(|chunk| chunk.sample_count > 0)
    }

    /// Run-length encodes durations. A run never spans a change of sample description.
    fn time_to_sample(&self) -> Vec<SttsEntry> {
        let mut entries: Vec<SttsEntry> = Vec::new();
        let mut durations = self.durations.iter();
        let mut previous_description = None;
        for chunk in self.filled_chunks() {
            let same_description = previous_description == Some(chunk.description_index);
            previous_description = Some(chunk.description_index);
            for (i, &duration) in durations.by_ref().take(chunk.sample_count as usize).enumerate() {
                match entries.last_mut() {
                    Some(last) if last.sample_delta == duration && (i > 0 || same_description) => {
                        last.sample_count += 1;
                    }
                    _ => entries.push(SttsEntry {
                        sample_count: 1,
                        sample_delta: duration,
                    }),
                }
            }
        }
        entries
    }

    /// One entry per run of chunks sharing a sample count and description.
    fn sample_to_chunk(&self) -> Vec<StscEntry> {
        let mut entries: Vec<StscEntry> = Vec::new();
        for (index, chunk) in self.filled_chunks().enumerate() {
            let continues = entries.last().map_or(false, |last| {
                last.samples_per_chunk == chunk.sample_count
                    && last.sample_description_index == chunk.description_index
            });
            if !continues {
                entries.push(StscEntry {
                    first_chunk: index as u32 + 1,
                    samples_per_chunk: chunk.sample_count,
                    sample_description_index: chunk.description_index,
                });
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder_with(chunks: &[(u32, &[(u64, u32, bool)])]) -> SampleTableBuilder {
        let mut builder = SampleTableBuilder::new();
        let mut offset = 0;
        for (description_index, samples) in chunks {
            let index = builder.open_chunk(*description_index);
            builder.set_chunk_offset(index, offset);
            for &(size, duration, is_sync) in *samples {
                builder.push_sample(size, duration, is_sync).unwrap();
                offset += size;
            }
        }
        builder
    }

    #[test]
    fn run_length_encodes_durations_and_chunks() {
        let builder = builder_with(&[
            (1, &[(10, 1000, true), (20, 1000, false), (30, 1000, false)]),
            (1, &[(10, 1000, false), (10, 1000, false), (10, 500, false)]),
            (1, &[(5, 500, true)]),
        ]);
        let stbl = builder.build(StsdBox::default(), 100).unwrap();

        assert_eq!(
            stbl.stts.entries,
            vec![
                SttsEntry {
                    sample_count: 5,
                    sample_delta: 1000
                },
                SttsEntry {
                    sample_count: 2,
                    sample_delta: 500
                },
            ]
        );
        assert_eq!(
            stbl.stsc.entries,
            vec![
                StscEntry {
                    first_chunk: 1,
                    samples_per_chunk: 3,
                    sample_description_index: 1
                },
                StscEntry {
                    first_chunk: 3,
                    samples_per_chunk: 1,
                    sample_description_index: 1
                },
            ]
        );
        assert_eq!(stbl.stsz.sample_count, 7);
        assert_eq!(stbl.stss.unwrap().entries, vec![1, 7]);
        assert_eq!(stbl.stco.unwrap().entries, vec![100, 160, 190]);
        assert!(stbl.co64.is_none());
        assert_eq!(builder.total_duration(), 6000);
        assert_eq!(builder.total_size(), 95);
    }

    #[test]
    fn runs_break_at_description_changes() {
        let builder = builder_with(&[
            (1, &[(8, 40, true), (8, 40, false)]),
            (2, &[(8, 40, true), (8, 40, false)]),
        ]);
        let stbl = builder.build(StsdBox::default(), 0).unwrap();
        assert_eq!(stbl.stts.entries.len(), 2);
        assert_eq!(stbl.stsc.entries.len(), 2);
        assert_eq!(stbl.stsc.entries[1].first_chunk, 2);
        assert_eq!(stbl.stsc.entries[1].sample_description_index, 2);
        // Uniform sizes collapse into stsz's sample_size field.
        assert_eq!(stbl.stsz.sample_size, 8);
    }

    #[test]
    fn all_sync_samples_omit_stss() {
        let builder = builder_with(&[(1, &[(4, 1024, true), (4, 1024, true)])]);
        let stbl = builder.build(StsdBox::default(), 0).unwrap();
        assert!(stbl.stss.is_none());
    }

    #[test]
    fn large_offsets_switch_to_co64() {
        let builder = builder_with(&[(1, &[(4, 1, true)])]);
        let stbl = builder.build(StsdBox::default(), u32::MAX as u64 + 1).unwrap();
        assert!(stbl.stco.is_none());
        assert_eq!(stbl.co64.unwrap().entries, vec![u32::MAX as u64 + 1]);
    }

    #[test]
    fn empty_table_is_valid() {
        let stbl = SampleTableBuilder::new().build(StsdBox::default(), 48).unwrap();
        assert!(stbl.stts.entries.is_empty());
        assert!(stbl.stsc.entries.is_empty());
        assert_eq!(stbl.stsz.sample_count, 0);
        assert!(stbl.stss.is_none());
        assert!(stbl.stco.unwrap().entries.is_empty());
    }

    #[test]
    fn last_duration_is_corrected() {
        let mut builder = builder_with(&[(1, &[(4, 0, true)])]);
        builder.set_last_duration(1500);
        assert_eq!(builder.total_duration(), 1500);

        let (durations, sizes, flags) = builder.trun_columns();
        assert_eq!(durations, vec![1500]);
        assert_eq!(sizes, vec![4]);
        assert_eq!(flags, vec![TrunBox::SYNC_SAMPLE_FLAGS]);
    }

    #[test]
    fn oversized_sample_is_rejected() {
        let mut builder = SampleTableBuilder::new();
        assert!(builder.push_sample(u32::MAX as u64 + 1, 1, true).is_err());
    }
}
