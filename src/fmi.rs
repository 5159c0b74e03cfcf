// FM-index contract consumed by the mapper.
//
// The mapper only ever narrows ranges one base at a time (an LF step), looks
// up suffix-array positions for finished seeds, and translates a position
// back to a named reference sequence. Index construction and serialization
// live with the host; this crate fixes the seam.

use crate::pore_model::PoreModel;
use crate::range::Range;

/// A suffix-array position translated back to a reference sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RefLoc {
    pub name: String,
    pub start: u64,
    /// Total length of the named sequence.
    pub seq_len: u64,
}

pub trait Fmi {
    /// Total indexed length (suffix-array row count).
    fn size(&self) -> u64;

    /// LF step: the range for pattern `bP` given the range for `P`. May
    /// return an invalid range when the extension has no occurrences.
    fn get_neighbor(&self, range: Range, base: u8) -> Range;

    /// Suffix-array lookup for row `i`.
    fn sa(&self, i: u64) -> u64;

    /// Translate a suffix-array position to a named reference location.
    fn translate_loc(&self, sa_loc: u64) -> Option<RefLoc>;
}

/// Full FM range of every k-mer, indexed by packed k-mer.
///
/// Built once per (model, index) pair and shared by all mappers: source paths
/// anchor on these ranges every event. Bases fold oldest-first, so the range
/// matches the pattern a path spells after `k` LF steps.
pub fn kmer_fm_ranges<F: Fmi>(model: &PoreModel, fmi: &F) -> Vec<Range> {
    let k = model.kmer_len();
    let mut ranges = Vec::with_capacity(model.kmer_count());
    for kmer in 0..model.kmer_count() {
        let mut range = Range::new(0, fmi.size() - 1);
        for i in 0..k {
            range = fmi.get_neighbor(range, model.kmer_base(kmer as u16, i));
            if !range.is_valid() {
                break;
            }
        }
        ranges.push(range);
    }
    ranges
}
