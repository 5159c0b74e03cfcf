// Per-read signal bookkeeping and the mapped-location record.
//
// The host hands raw signal over in chunks; `ReadBuffer` owns the chunk
// currently being processed plus the read's counters, and `ReadLoc` carries
// the final answer back out. No file formats here; `ReadLoc`'s `Display` is
// a tab-separated line for host-side logging.

use std::fmt;

/// One chunk of raw samples from the sequencer, tagged with its read.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub id: String,
    pub number: u32,
    pub raw: Vec<f32>,
}

impl Chunk {
    pub fn new(id: &str, number: u32, raw: Vec<f32>) -> Self {
        Chunk {
            id: id.to_string(),
            number,
            raw,
        }
    }

    pub fn clear(&mut self) {
        self.raw.clear();
    }

    pub fn get_id(&self) -> &str {
        &self.id
    }

    pub fn get_number(&self) -> u32 {
        self.number
    }
}

/// Signal state for the read currently owned by a mapper.
#[derive(Debug, Clone, Default)]
pub struct ReadBuffer {
    pub id: String,
    pub number: u32,
    pub raw_len: u64,
    pub num_chunks: u32,
    pub chunk: Vec<f32>,
    pub chunk_processed: bool,
    pub loc: ReadLoc,
}

impl ReadBuffer {
    /// Start a read from its first chunk.
    pub fn new(chunk: Chunk) -> Self {
        let raw_len = chunk.raw.len() as u64;
        ReadBuffer {
            id: chunk.id,
            number: chunk.number,
            raw_len,
            num_chunks: 1,
            chunk: chunk.raw,
            chunk_processed: false,
            loc: ReadLoc::default(),
        }
    }

    /// Accept the next chunk. Refuses while the previous one is pending.
    pub fn add_chunk(&mut self, chunk: Chunk) -> bool {
        if !self.chunk_processed {
            log::debug!(
                "read {} refused chunk {}: previous chunk still pending",
                self.id,
                chunk.number
            );
            return false;
        }
        self.raw_len += chunk.raw.len() as u64;
        self.num_chunks += 1;
        self.chunk = chunk.raw;
        self.chunk_processed = false;
        true
    }
}

/// Where a read mapped, in read and reference coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadLoc {
    pub rd_st: u64,
    pub rd_en: u64,
    pub rd_len: u64,
    pub rf_name: String,
    pub rf_st: u64,
    pub rf_en: u64,
    pub rf_len: u64,
    pub match_count: u16,
    pub fwd: bool,
    mapped: bool,
}

impl ReadLoc {
    #[allow(clippy::too_many_arguments)]
    pub fn set_mapped(
        &mut self,
        rd_st: u64,
        rd_en: u64,
        rd_len: u64,
        rf_name: String,
        rf_st: u64,
        rf_en: u64,
        rf_len: u64,
        match_count: u16,
        fwd: bool,
    ) {
        self.rd_st = rd_st;
        self.rd_en = rd_en;
        self.rd_len = rd_len;
        self.rf_name = rf_name;
        self.rf_st = rf_st;
        self.rf_en = rf_en;
        self.rf_len = rf_len;
        self.match_count = match_count;
        self.fwd = fwd;
        self.mapped = true;
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub fn clear(&mut self) {
        *self = ReadLoc::default();
    }
}

impl fmt::Display for ReadLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mapped {
            write!(
                f,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                self.rd_len,
                self.rd_st,
                self.rd_en,
                if self.fwd { '+' } else { '-' },
                self.rf_name,
                self.rf_len,
                self.rf_st,
                self.rf_en,
                self.match_count
            )
        } else {
            write!(f, "{}\t*\t*\t*\t*\t*\t*\t*\t*", self.rd_len)
        }
    }
}
