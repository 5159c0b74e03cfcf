// Partial alignment paths.
//
// A path is one candidate alignment of the most recent events: an FM range,
// the k-mer at its head, and a sliding window of per-event log-probabilities
// plus event types. Paths are pre-allocated by the pool and rewritten in
// place every generation; nothing here allocates after construction.

use std::cmp::Ordering;

use crate::map_opt::MapOpt;
use crate::range::Range;

/// Bits per packed event type.
pub const TYPE_BITS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    Match = 0,
    Stay = 1,
}

pub const NUM_EVENT_TYPES: usize = 2;
const TYPE_MASK: u64 = (1 << TYPE_BITS) - 1;

impl EventType {
    #[inline]
    fn from_bits(bits: u64) -> EventType {
        if bits & TYPE_MASK == 0 {
            EventType::Match
        } else {
            EventType::Stay
        }
    }
}

/// Per-mapper geometry of the packed event-type history.
///
/// The window holds `max_path_len` probabilities but only the last
/// `max_path_len - 1` event types; the head type sits at the top of the
/// bitfield and ages toward bit zero. Every path in one mapper shares this
/// layout; it is a value, not a process global.
#[derive(Debug, Clone)]
pub struct PathLayout {
    pub max_path_len: usize,
    type_adds: [u64; NUM_EVENT_TYPES],
    head_shift: u32,
}

impl PathLayout {
    pub fn new(seed_len: usize) -> Result<Self, String> {
        if seed_len < 2 || TYPE_BITS as usize * (seed_len - 1) > 64 {
            return Err(format!(
                "seed_len {} does not fit the packed type history",
                seed_len
            ));
        }
        let head_shift = ((seed_len - 2) * TYPE_BITS as usize) as u32;
        let mut type_adds = [0u64; NUM_EVENT_TYPES];
        for (t, add) in type_adds.iter_mut().enumerate() {
            *add = (t as u64) << head_shift;
        }
        Ok(PathLayout {
            max_path_len: seed_len,
            type_adds,
            head_shift,
        })
    }

    /// Age the parent's history by one step and stamp the new head type.
    #[inline]
    pub fn pack(&self, parent_types: u64, t: EventType) -> u64 {
        self.type_adds[t as usize] | (parent_types >> TYPE_BITS)
    }

    /// Most recent recorded type.
    #[inline]
    pub fn type_head(&self, event_types: u64) -> EventType {
        EventType::from_bits(event_types >> self.head_shift)
    }

    /// Oldest recorded type (the one shifted out on the next extension).
    #[inline]
    pub fn type_tail(&self, event_types: u64) -> EventType {
        EventType::from_bits(event_types)
    }
}

/// One partial alignment candidate.
///
/// `length == 0` marks an invalidated slot; every consumer skips those.
#[derive(Debug, Clone)]
pub struct PathBuffer {
    pub length: usize,
    pub fm_range: Range,
    pub kmer: u16,
    pub sa_checked: bool,
    pub consec_stays: u8,
    pub event_types: u64,
    pub type_counts: [u8; NUM_EVENT_TYPES],
    pub seed_prob: f32,
    // prob_sums[j] - prob_sums[i] is the summed log-prob of window events
    // i..j. Entry count is max_path_len + 1; owned per path, never aliased.
    prob_sums: Vec<f32>,
}

impl PathBuffer {
    pub fn new(layout: &PathLayout) -> Self {
        PathBuffer {
            length: 0,
            fm_range: Range::default(),
            kmer: 0,
            sa_checked: false,
            consec_stays: 0,
            event_types: 0,
            type_counts: [0; NUM_EVENT_TYPES],
            seed_prob: 0.0,
            prob_sums: vec![0.0; layout.max_path_len + 1],
        }
    }

    /// Fresh path of length 1 anchored at `range`. Counts as one MATCH.
    pub fn make_source(&mut self, range: Range, kmer: u16, prob: f32) {
        self.length = 1;
        self.fm_range = range;
        self.kmer = kmer;
        self.sa_checked = false;
        self.consec_stays = 0;
        self.event_types = 0;
        self.type_counts = [0; NUM_EVENT_TYPES];
        self.type_counts[EventType::Match as usize] = 1;
        self.seed_prob = prob;
        self.prob_sums[0] = 0.0;
        self.prob_sums[1] = prob;
    }

    /// Rewrite this slot as `parent` extended by one event.
    pub fn make_child(
        &mut self,
        parent: &PathBuffer,
        range: Range,
        kmer: u16,
        prob: f32,
        event_type: EventType,
        layout: &PathLayout,
    ) {
        let max_len = layout.max_path_len;
        let saturated = parent.length == max_len;

        self.length = if saturated { max_len } else { parent.length + 1 };
        self.fm_range = range;
        self.kmer = kmer;
        self.sa_checked = parent.sa_checked;
        self.event_types = layout.pack(parent.event_types, event_type);
        self.consec_stays = if event_type == EventType::Stay {
            parent.consec_stays + 1
        } else {
            0
        };

        self.type_counts = parent.type_counts;
        self.type_counts[event_type as usize] += 1;

        if saturated {
            // Slide the window: drop the oldest sum, shift, append
            self.type_counts[layout.type_tail(parent.event_types) as usize] -= 1;
            for i in 0..max_len {
                self.prob_sums[i] = parent.prob_sums[i + 1];
            }
            self.prob_sums[max_len] = self.prob_sums[max_len - 1] + prob;
            self.seed_prob = (self.prob_sums[max_len] - self.prob_sums[0]) / max_len as f32;
        } else {
            self.prob_sums[..=parent.length].copy_from_slice(&parent.prob_sums[..=parent.length]);
            self.prob_sums[self.length] = self.prob_sums[self.length - 1] + prob;
            self.seed_prob = self.prob_sums[self.length] / self.length as f32;
        }
    }

    #[inline]
    pub fn invalidate(&mut self) {
        self.length = 0;
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.length > 0
    }

    /// MATCH events currently in the window.
    #[inline]
    pub fn match_len(&self) -> u8 {
        self.type_counts[EventType::Match as usize]
    }

    #[inline]
    pub fn type_head(&self, layout: &PathLayout) -> EventType {
        layout.type_head(self.event_types)
    }

    #[inline]
    pub fn type_tail(&self, layout: &PathLayout) -> EventType {
        layout.type_tail(self.event_types)
    }

    /// Whether this path may emit seeds. Live paths must have narrowed to a
    /// single row; a path that just died may still seed from a small repeat
    /// range if enough of its window matched.
    pub fn is_seed_valid(&self, opts: &MapOpt, layout: &PathLayout, path_ended: bool) -> bool {
        (self.fm_range.length() == 1
            || (path_ended
                && self.fm_range.length() <= opts.max_rep_copy
                && self.match_len() >= opts.min_rep_len))
            && self.length >= opts.seed_len
            && (path_ended || self.type_head(layout) == EventType::Match)
            && (path_ended
                || self.type_counts[EventType::Stay as usize] as f32
                    <= opts.max_stay_frac * opts.seed_len as f32)
            && self.seed_prob >= opts.min_seed_prob
    }
}

/// Sort order for dedup: ranges lexicographically, ties by ascending
/// seed_prob so the best-scoring duplicate lands last.
#[inline]
pub fn path_order(a: &PathBuffer, b: &PathBuffer) -> Ordering {
    a.fm_range
        .cmp(&b.fm_range)
        .then_with(|| a.seed_prob.total_cmp(&b.seed_prob))
}
