// Per-read streaming mapper.
//
// One mapper owns one read at a time. Raw chunks drain through the event
// detector and normalizer (`process_chunk`), and normalized events drive the
// path search (`map_chunk` → `add_event`). Each event extends a bounded
// population of partial alignment paths through the FM-index, prunes and
// deduplicates them, seeds fresh paths on uncovered k-mer ranges, and feeds
// finished seeds to the tracker until it confirms a reference location.
//
// A mapper is single-threaded and never blocks; the host runs one per
// channel. All buffers are sized at construction and reused across reads, so
// the per-event loop does no heap allocation.

use std::time::Instant;

use crate::event_detector::{EvdtParams, EventDetector};
use crate::fmi::{kmer_fm_ranges, Fmi};
use crate::map_opt::MapOpt;
use crate::normalizer::Normalizer;
use crate::path::{path_order, EventType, PathBuffer, PathLayout};
use crate::pore_model::{PoreModel, ALPH_SIZE};
use crate::range::Range;
use crate::read_buffer::{Chunk, ReadBuffer, ReadLoc};
use crate::seed_tracker::{SeedCluster, SeedTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Inactive,
    Mapping,
    Success,
    Failure,
}

pub struct Mapper<'a, F: Fmi> {
    opts: &'a MapOpt,
    model: &'a PoreModel,
    fmi: &'a F,
    kmer_fmranges: Vec<Range>,
    layout: PathLayout,

    event_detector: EventDetector,
    norm: Normalizer,
    seed_tracker: SeedTracker,

    read: ReadBuffer,
    state: State,
    reset: bool,
    last_chunk: bool,

    // Two path generations, swapped every event. Only prev[0..prev_size)
    // is meaningful.
    prev_paths: Vec<PathBuffer>,
    next_paths: Vec<PathBuffer>,
    prev_size: usize,

    // Scratch reused every event
    kmer_probs: Vec<f32>,
    sources_added: Vec<bool>,

    event_i: u32,
}

impl<'a, F: Fmi> Mapper<'a, F> {
    /// Build a mapper against a model and index that outlive it. Allocates
    /// every buffer the per-event loop will ever need.
    pub fn new(opts: &'a MapOpt, model: &'a PoreModel, fmi: &'a F) -> Result<Self, String> {
        opts.validate()?;
        let layout = PathLayout::new(opts.seed_len)?;

        let prev_paths = (0..opts.max_paths)
            .map(|_| PathBuffer::new(&layout))
            .collect();
        let next_paths = (0..opts.max_paths)
            .map(|_| PathBuffer::new(&layout))
            .collect();

        Ok(Mapper {
            opts,
            model,
            fmi,
            kmer_fmranges: kmer_fm_ranges(model, fmi),
            event_detector: EventDetector::new(EvdtParams::default()),
            norm: Normalizer::new(model.model_mean(), model.model_stdv(), opts.evt_buffer_len),
            seed_tracker: SeedTracker::new(opts),
            read: ReadBuffer::default(),
            state: State::Inactive,
            reset: false,
            last_chunk: false,
            prev_paths,
            next_paths,
            prev_size: 0,
            kmer_probs: vec![0.0; model.kmer_count()],
            sources_added: vec![false; model.kmer_count()],
            event_i: 0,
            layout,
        })
    }

    /// Begin mapping a read from its first chunk. A mapper still MAPPING a
    /// different read lost it (the host moved on); log and start over.
    pub fn new_read(&mut self, chunk: Chunk) {
        if self.state == State::Mapping && self.read.number != chunk.get_number() {
            log::error!("possibly lost read '{}'", self.read.id);
        }

        self.read = ReadBuffer::new(chunk);
        self.prev_size = 0;
        self.event_i = 0;
        self.reset = false;
        self.last_chunk = false;
        self.state = State::Mapping;
        self.seed_tracker.reset();
        self.event_detector.reset();
        self.norm.reset();
        log::debug!("read {} mapping", self.read.id);
    }

    #[inline]
    pub fn get_state(&self) -> State {
        self.state
    }

    #[inline]
    pub fn get_read(&self) -> &ReadBuffer {
        &self.read
    }

    #[inline]
    pub fn get_loc(&self) -> &ReadLoc {
        &self.read.loc
    }

    /// Hand the final location out and return to INACTIVE.
    pub fn pop_loc(&mut self) -> ReadLoc {
        self.state = State::Inactive;
        self.reset = false;
        self.read.loc.clone()
    }

    pub fn deactivate(&mut self) {
        self.state = State::Inactive;
        self.reset = false;
    }

    #[inline]
    pub fn finished(&self) -> bool {
        self.state == State::Success || self.state == State::Failure
    }

    pub fn request_reset(&mut self) {
        self.reset = true;
    }

    pub fn end_reset(&mut self) {
        self.reset = false;
    }

    #[inline]
    pub fn is_resetting(&self) -> bool {
        self.reset
    }

    /// Eject this read if `number` names it. Returns whether it did.
    pub fn end_read(&mut self, number: u32) -> bool {
        self.reset = self.read.number == number;
        self.reset
    }

    /// The host delivered the read's final chunk. Once the normalizer
    /// drains, `map_chunk` ends the read in FAILURE instead of waiting for
    /// signal that will never come.
    pub fn set_last_chunk(&mut self) {
        self.last_chunk = true;
    }

    #[inline]
    pub fn is_chunk_processed(&self) -> bool {
        self.read.chunk_processed
    }

    /// Events were dropped upstream; charge them and restart the paths,
    /// since the window they described is gone.
    fn skip_events(&mut self, n: u32) {
        self.event_i += n;
        self.prev_size = 0;
    }

    /// Accept the next chunk of raw signal. Refuses while the previous chunk
    /// is unprocessed or a reset is pending; hitting the chunk budget forces
    /// FAILURE and consumes the chunk so the host's pipeline drains.
    pub fn swap_chunk(&mut self, chunk: &mut Chunk) -> bool {
        if !self.is_chunk_processed() || self.reset {
            return false;
        }

        if self.opts.max_chunks_proc > 0 && self.read.num_chunks == self.opts.max_chunks_proc {
            log::debug!(
                "read {} hit the {}-chunk budget",
                self.read.id,
                self.opts.max_chunks_proc
            );
            self.state = State::Failure;
            self.reset = true;
            chunk.clear();
            return true;
        }

        self.read.add_chunk(Chunk {
            id: chunk.id.clone(),
            number: chunk.number,
            raw: std::mem::take(&mut chunk.raw),
        })
    }

    /// Drain the pending chunk through the event detector into the
    /// normalizer. Returns the number of events produced. On a full
    /// normalizer, drops everything but the current chunk's events once and
    /// retries; a second refusal abandons the chunk.
    pub fn process_chunk(&mut self) -> u16 {
        if self.read.chunk_processed || self.reset {
            return 0;
        }

        let mut nevents: u16 = 0;
        for i in 0..self.read.chunk.len() {
            let s = self.read.chunk[i];
            if self.event_detector.add_sample(s) {
                let mean = self.event_detector.get_mean();
                if !self.norm.add_event(mean) {
                    let nskip = self.norm.skip_unread(nevents as u32);
                    self.skip_events(nskip);
                    if !self.norm.add_event(mean) {
                        // Abandon the rest of the chunk; already-buffered
                        // events survive and the state machine is untouched
                        log::error!(
                            "read {}: chunk events cannot fit in the normalization buffer",
                            self.read.id
                        );
                        self.read.chunk.clear();
                        self.read.chunk_processed = true;
                        return nevents;
                    }
                }
                nevents += 1;
            }
        }

        self.read.chunk.clear();
        self.read.chunk_processed = true;
        nevents
    }

    /// Map buffered events until one of: the seed tracker confirms a
    /// location (true), the event batch or normalizer runs out (false), or
    /// the wall-clock budget for this batch expires (false, no transition).
    pub fn map_chunk(&mut self) -> bool {
        if self.reset || (self.last_chunk && self.norm.empty()) {
            self.reset = false;
            self.state = State::Failure;
            return true;
        }

        let nevents = self.opts.get_max_events(self.event_i);
        let tlimit_ms = self.opts.evt_timeout * nevents as f32;
        let timer = Instant::now();

        for _ in 0..nevents {
            if self.norm.empty() {
                break;
            }
            let ev = self.norm.pop_event();
            if self.add_event(ev) {
                return true;
            }
            if timer.elapsed().as_secs_f32() * 1000.0 > tlimit_ms {
                log::debug!("read {} ran over its event time budget, yielding", self.read.id);
                return false;
            }
        }

        false
    }

    /// Consume one normalized event. Returns true when the read reached a
    /// terminal state (SUCCESS with a location set, or FAILURE on
    /// reset/budget).
    pub fn add_event(&mut self, event: f32) -> bool {
        if self.reset || self.event_i >= self.opts.max_events_proc {
            self.reset = false;
            self.state = State::Failure;
            return true;
        }

        self.extend_paths(event);
        self.event_i += 1;

        if let Some(cluster) = self.seed_tracker.get_final() {
            self.state = State::Success;
            self.set_ref_loc(&cluster);
            return true;
        }
        false
    }

    /// One generation of the path search: score the event against every
    /// k-mer, extend surviving paths, dedup, seed uncovered ranges, emit
    /// seeds, and promote the new generation.
    fn extend_paths(&mut self, event: f32) {
        let Mapper {
            opts,
            model,
            fmi,
            kmer_fmranges,
            layout,
            seed_tracker,
            prev_paths,
            next_paths,
            prev_size,
            kmer_probs,
            sources_added,
            event_i,
            ..
        } = self;
        let opts: &MapOpt = *opts;
        let model: &PoreModel = *model;
        let fmi: &F = *fmi;
        let event_i = *event_i;
        let max_paths = opts.max_paths;

        for (kmer, p) in kmer_probs.iter_mut().enumerate() {
            *p = model.event_match_prob(event, kmer as u16);
        }

        // Extend the previous generation
        let mut next_n = 0usize;
        'parents: for pi in 0..*prev_size {
            if !prev_paths[pi].is_valid() {
                continue;
            }

            let mut child_found = false;
            let parent = &prev_paths[pi];
            let prev_range = parent.fm_range;
            let prev_kmer = parent.kmer;
            let thresh = opts.get_prob_thresh(prev_range.length());

            // Stay: the pore dwelt on the same k-mer
            if parent.consec_stays < opts.max_consec_stay
                && kmer_probs[prev_kmer as usize] >= thresh
            {
                next_paths[next_n].make_child(
                    parent,
                    prev_range,
                    prev_kmer,
                    kmer_probs[prev_kmer as usize],
                    EventType::Stay,
                    layout,
                );
                child_found = true;
                next_n += 1;
                if next_n == max_paths {
                    break 'parents;
                }
            }

            // Matches: one LF step per base
            for b in 0..ALPH_SIZE {
                let next_kmer = model.get_neighbor(prev_kmer, b);
                if kmer_probs[next_kmer as usize] < thresh {
                    continue;
                }
                let next_range = fmi.get_neighbor(prev_range, b);
                if !next_range.is_valid() {
                    continue;
                }
                next_paths[next_n].make_child(
                    parent,
                    next_range,
                    next_kmer,
                    kmer_probs[next_kmer as usize],
                    EventType::Match,
                    layout,
                );
                child_found = true;
                next_n += 1;
                if next_n == max_paths {
                    break;
                }
            }

            if !child_found && !prev_paths[pi].sa_checked {
                // The path died on this event; it may still seed as a repeat
                update_seeds(
                    opts,
                    layout,
                    fmi,
                    seed_tracker,
                    &mut prev_paths[pi],
                    event_i,
                    true,
                );
            }

            if next_n == max_paths {
                break;
            }
        }

        // Sort, dedup, and seed the gaps each extended k-mer leaves open
        if next_n > 0 {
            let next_size = next_n;
            next_paths[..next_size].sort_unstable_by(path_order);

            let (head, tail) = next_paths.split_at_mut(next_size);
            let mut prev_block_kmer = model.kmer_count() as u32; // sentinel
            let mut unchecked_range = Range::default();

            for i in 0..next_size {
                let source_kmer = head[i].kmer;
                let source_prob = kmer_probs[source_kmer as usize];

                // First path of this k-mer's block: seed the rows of the
                // k-mer's interval below it
                if source_kmer as u32 != prev_block_kmer
                    && next_n < max_paths
                    && source_prob >= opts.get_source_prob()
                {
                    sources_added[source_kmer as usize] = true;

                    let kmer_range = kmer_fmranges[source_kmer as usize];
                    if head[i].fm_range.start > kmer_range.start {
                        tail[next_n - next_size].make_source(
                            Range::new(kmer_range.start, head[i].fm_range.start - 1),
                            source_kmer,
                            source_prob,
                        );
                        next_n += 1;
                    }
                    unchecked_range = Range::new(head[i].fm_range.end + 1, kmer_range.end);
                }
                prev_block_kmer = source_kmer as u32;

                // Paths sharing a range are duplicates; the sort left the
                // best one last
                if i + 1 < next_size && head[i].fm_range == head[i + 1].fm_range {
                    head[i].invalidate();
                    continue;
                }

                // Seed the unchecked rows between this path and the next one
                // of the same k-mer
                if next_n < max_paths && source_prob >= opts.get_source_prob() {
                    let mut source_range = unchecked_range;
                    if i + 1 < next_size && source_kmer == head[i + 1].kmer {
                        source_range.end = head[i + 1].fm_range.start.saturating_sub(1);
                        if unchecked_range.start <= head[i + 1].fm_range.end {
                            unchecked_range.start = head[i + 1].fm_range.end + 1;
                        }
                    }
                    if source_range.is_valid() {
                        tail[next_n - next_size].make_source(
                            source_range,
                            source_kmer,
                            source_prob,
                        );
                        next_n += 1;
                    }
                }

                update_seeds(opts, layout, fmi, seed_tracker, &mut head[i], event_i, false);
            }
        }

        // K-mers no extended path touched fall back to their full interval.
        // Flags clear for every k-mer even once the budget stops insertions.
        for kmer in 0..model.kmer_count() {
            if !sources_added[kmer]
                && next_n < max_paths
                && kmer_probs[kmer] >= opts.get_source_prob()
                && kmer_fmranges[kmer].is_valid()
            {
                next_paths[next_n].make_source(
                    kmer_fmranges[kmer],
                    kmer as u16,
                    kmer_probs[kmer],
                );
                next_n += 1;
            }
            sources_added[kmer] = false;
        }

        std::mem::swap(prev_paths, next_paths);
        *prev_size = next_n;

        log::trace!("event {}: {} paths live", event_i, next_n);
    }

    /// Turn a confirmed cluster into read/reference coordinates. Seed
    /// coordinates address the strand-unified reversed space, so forward
    /// hits flip back before suffix-array translation.
    fn set_ref_loc(&mut self, cluster: &SeedCluster) {
        let k_shift = (self.model.kmer_len() - 1) as u64;
        let fwd = cluster.ref_st > self.fmi.size() / 2;

        let sa_st = if fwd {
            self.fmi.size().saturating_sub(cluster.ref_en + k_shift)
        } else {
            cluster.ref_st
        };

        let rd_len =
            (self.read.raw_len as f32 * self.opts.bp_per_sec / self.opts.samp_per_sec) as u64;
        let rd_st = (self.opts.max_stay_frac * cluster.evt_st as f32) as u64;
        let rd_en = (self.opts.max_stay_frac * (cluster.evt_en + self.opts.seed_len as u32) as f32)
            as u64
            + k_shift;

        match self.fmi.translate_loc(sa_st) {
            Some(loc) => {
                let rf_en = loc.start + (cluster.ref_en - cluster.ref_st) + k_shift;
                let match_count = cluster.total_len as u16 + k_shift as u16;
                self.read.loc.set_mapped(
                    rd_st,
                    rd_en,
                    rd_len,
                    loc.name,
                    loc.start,
                    rf_en,
                    loc.seq_len,
                    match_count,
                    fwd,
                );
            }
            None => {
                log::error!(
                    "read {}: no reference sequence at suffix-array position {}",
                    self.read.id,
                    sa_st
                );
            }
        }
    }
}

/// Emit seeds for a path whose window qualifies: one per suffix-array row of
/// its range, reference coordinates flipped so both strands advance
/// left-to-right.
fn update_seeds<F: Fmi>(
    opts: &MapOpt,
    layout: &PathLayout,
    fmi: &F,
    tracker: &mut SeedTracker,
    path: &mut PathBuffer,
    event_i: u32,
    path_ended: bool,
) {
    if !path.is_seed_valid(opts, layout, path_ended) {
        return;
    }
    path.sa_checked = true;

    for s in path.fm_range.start..=path.fm_range.end {
        let ref_en = fmi.size() - fmi.sa(s) + 1;
        tracker.add_seed(ref_en, path.match_len(), event_i - path_ended as u32);
    }
}
