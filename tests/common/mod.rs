// Shared fixtures for integration tests: a naive FM index over a small text,
// a synthetic pore model with well-separated levels, and signal builders.

use bio::data_structures::suffix_array::suffix_array;

use squigmap::fmi::RefLoc;
use squigmap::range::Range;
use squigmap::{Fmi, MapOpt, PoreModel};

pub const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Opt-in logging for debugging test runs (`RUST_LOG=squigmap=debug`).
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Reference FM index built the slow, obvious way: full suffix array (via
/// `bio`), full occurrence table. Fine for references of a few hundred bases.
pub struct NaiveFmi {
    pub text: Vec<u8>,
    sa: Vec<usize>,
    counts: [u64; 4],
    occ: Vec<[u64; 4]>,
}

impl NaiveFmi {
    /// Index the reversal of a chronological base stream: every event
    /// prepends a base to the search pattern, so a read maps when the text
    /// contains its bases reversed.
    pub fn from_read_bases(bases: &[u8]) -> Self {
        let mut text: Vec<u8> = bases.iter().rev().map(|&b| BASES[b as usize]).collect();
        text.push(b'$');

        let sa = suffix_array(&text);
        let n = text.len();

        let mut occ = vec![[0u64; 4]; n + 1];
        for i in 0..n {
            let bwt = text[(sa[i] + n - 1) % n];
            occ[i + 1] = occ[i];
            if let Some(b) = BASES.iter().position(|&c| c == bwt) {
                occ[i + 1][b] += 1;
            }
        }

        let mut counts = [0u64; 4];
        let mut total = 1; // sentinel row sorts first
        for b in 0..4 {
            counts[b] = total;
            total += text.iter().filter(|&&c| c == BASES[b]).count() as u64;
        }

        NaiveFmi {
            text,
            sa,
            counts,
            occ,
        }
    }
}

impl Fmi for NaiveFmi {
    fn size(&self) -> u64 {
        self.sa.len() as u64
    }

    fn get_neighbor(&self, range: Range, base: u8) -> Range {
        let b = base as usize;
        let st = self.counts[b] + self.occ[range.start as usize][b];
        let en = self.counts[b] + self.occ[range.end as usize + 1][b];
        if en == st {
            return Range::default();
        }
        Range::new(st, en - 1)
    }

    fn sa(&self, i: u64) -> u64 {
        self.sa[i as usize] as u64
    }

    fn translate_loc(&self, sa_loc: u64) -> Option<RefLoc> {
        Some(RefLoc {
            name: "ref".to_string(),
            start: sa_loc,
            seq_len: self.size(),
        })
    }
}

pub const LEVEL_BASE: f32 = 80.0;
pub const LEVEL_SPACING: f32 = 6.0;

/// Model whose levels are spaced far enough apart that only the true k-mer
/// scores above the source threshold.
pub fn synth_model(k: usize) -> PoreModel {
    let count = 1usize << (2 * k);
    let levels: Vec<(f32, f32)> = (0..count)
        .map(|i| (LEVEL_BASE + LEVEL_SPACING * i as f32, 2.0))
        .collect();
    PoreModel::new(k, &levels).unwrap()
}

pub fn level_of(kmer: u16) -> f32 {
    LEVEL_BASE + LEVEL_SPACING * kmer as f32
}

/// Options tuned for the small synthetic fixtures.
pub fn pipeline_opts() -> MapOpt {
    let mut opts = MapOpt::default();
    opts.seed_len = 5;
    opts.max_paths = 1024;
    opts.min_aln_len = 20;
    opts.min_mean_conf = 1.0;
    opts.min_top_conf = 1.5;
    opts.min_seed_prob = -3.5;
    opts.evt_buffer_len = 512;
    opts
}

/// Base stream covering every k-mer exactly once (a de Bruijn sequence,
/// found as an Eulerian cycle over (k-1)-mer nodes). Reads built from it
/// sample the model's levels uniformly, so streaming normalization converges
/// on the model's own moments.
pub fn de_bruijn_bases(k: usize) -> Vec<u8> {
    let nodes = 1usize << (2 * (k - 1));
    let mask = nodes - 1;

    let mut next_edge = vec![0u8; nodes];
    let mut stack = vec![0usize];
    let mut cycle = Vec::new();
    while let Some(&v) = stack.last() {
        if next_edge[v] < 4 {
            let b = next_edge[v];
            next_edge[v] += 1;
            stack.push(((v << 2) | b as usize) & mask);
        } else {
            cycle.push(stack.pop().unwrap());
        }
    }
    cycle.reverse();

    let mut bases = Vec::with_capacity(k - 1 + cycle.len() - 1);
    for i in (0..k - 1).rev() {
        bases.push(((cycle[0] >> (2 * i)) & 3) as u8);
    }
    for &v in &cycle[1..] {
        bases.push((v & 3) as u8);
    }
    bases
}

/// Chronological event levels for a base stream.
pub fn event_levels(model: &PoreModel, bases: &[u8]) -> Vec<f32> {
    let k = model.kmer_len();
    let mut kmer = 0u16;
    for &b in &bases[..k] {
        kmer = model.get_neighbor(kmer, b);
    }
    let mut levels = vec![level_of(kmer)];
    for &b in &bases[k..] {
        kmer = model.get_neighbor(kmer, b);
        levels.push(level_of(kmer));
    }
    levels
}

/// Raw signal: one plateau per level with a deterministic wiggle so the
/// event detector sees non-degenerate variance.
pub fn level_signal(levels: &[f32], samples_per_event: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(levels.len() * samples_per_event);
    for &lv in levels {
        for i in 0..samples_per_event {
            let wiggle = if i % 2 == 0 { 0.5 } else { -0.5 };
            out.push(lv + wiggle);
        }
    }
    out
}
