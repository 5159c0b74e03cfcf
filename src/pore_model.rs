// Pore k-mer model: expected current level per k-mer plus the Gaussian
// emission math the per-event search scores against.
//
// K-mers are packed two bits per base with the first (oldest) base in the
// high bits, so shifting a new base into the low bits advances the window by
// one position. All per-kmer terms of the log-density are precomputed at
// construction; `event_match_prob` is two multiplies and a subtract.

pub const ALPH_SIZE: u8 = 4;
pub const BASE_CHARS: [u8; 4] = [b'A', b'C', b'G', b'T'];

#[derive(Debug, Clone)]
pub struct PoreModel {
    k: usize,
    kmer_count: usize,
    kmer_mask: u16,

    lv_means: Vec<f32>,
    lv_vars_x2: Vec<f32>,      // 2 * sigma^2 per kmer
    lognorm_denoms: Vec<f32>,  // ln(sqrt(2 * pi * sigma^2)) per kmer

    model_mean: f32,
    model_stdv: f32,
}

impl PoreModel {
    /// Build a model from per-kmer `(level_mean, level_stdv)` pairs, indexed
    /// by packed k-mer. `levels.len()` must equal `4^k`.
    pub fn new(k: usize, levels: &[(f32, f32)]) -> Result<Self, String> {
        if k == 0 || k > 8 {
            return Err(format!("kmer length must be in [1, 8], got {}", k));
        }
        let kmer_count = 1usize << (2 * k);
        if levels.len() != kmer_count {
            return Err(format!(
                "expected {} kmer levels for k={}, got {}",
                kmer_count,
                k,
                levels.len()
            ));
        }
        if let Some((i, _)) = levels.iter().enumerate().find(|(_, l)| l.1 <= 0.0) {
            return Err(format!("non-positive level stdv for kmer {}", i));
        }

        let mut lv_means = Vec::with_capacity(kmer_count);
        let mut lv_vars_x2 = Vec::with_capacity(kmer_count);
        let mut lognorm_denoms = Vec::with_capacity(kmer_count);

        let mut mean_sum = 0.0f64;
        for &(mean, stdv) in levels {
            lv_means.push(mean);
            lv_vars_x2.push(2.0 * stdv * stdv);
            lognorm_denoms.push((2.0 * std::f32::consts::PI * stdv * stdv).sqrt().ln());
            mean_sum += mean as f64;
        }
        let model_mean = (mean_sum / kmer_count as f64) as f32;
        let var_sum: f64 = lv_means
            .iter()
            .map(|m| {
                let d = (*m - model_mean) as f64;
                d * d
            })
            .sum();
        let model_stdv = (var_sum / kmer_count as f64).sqrt() as f32;

        Ok(PoreModel {
            k,
            kmer_count,
            kmer_mask: (kmer_count - 1) as u16,
            lv_means,
            lv_vars_x2,
            lognorm_denoms,
            model_mean,
            model_stdv,
        })
    }

    #[inline]
    pub fn kmer_len(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn kmer_count(&self) -> usize {
        self.kmer_count
    }

    #[inline]
    pub fn model_mean(&self) -> f32 {
        self.model_mean
    }

    #[inline]
    pub fn model_stdv(&self) -> f32 {
        self.model_stdv
    }

    /// Log-density of observing normalized event level `ev` from `kmer`.
    #[inline(always)]
    pub fn event_match_prob(&self, ev: f32, kmer: u16) -> f32 {
        let d = ev - self.lv_means[kmer as usize];
        -(d * d) / self.lv_vars_x2[kmer as usize] - self.lognorm_denoms[kmer as usize]
    }

    /// K-mer one step forward in time: drop the oldest base, shift `base`
    /// into the low bits.
    #[inline(always)]
    pub fn get_neighbor(&self, kmer: u16, base: u8) -> u16 {
        ((((kmer as u32) << 2) | base as u32) & self.kmer_mask as u32) as u16
    }

    /// Base `i` of `kmer` in chronological order (`i = 0` is the oldest).
    #[inline]
    pub fn kmer_base(&self, kmer: u16, i: usize) -> u8 {
        ((kmer >> (2 * (self.k - 1 - i))) & 0x3) as u8
    }

    /// Packed k-mer for an ACGT string slice of length `k`.
    pub fn str_to_kmer(&self, s: &[u8]) -> Result<u16, String> {
        if s.len() != self.k {
            return Err(format!("expected {} bases, got {}", self.k, s.len()));
        }
        let mut kmer = 0u32;
        for &c in s {
            let b: u32 = match c.to_ascii_uppercase() {
                b'A' => 0,
                b'C' => 1,
                b'G' => 2,
                b'T' => 3,
                _ => return Err(format!("invalid base '{}'", c as char)),
            };
            kmer = (kmer << 2) | b;
        }
        Ok(kmer as u16)
    }

    pub fn kmer_to_str(&self, kmer: u16) -> String {
        (0..self.k)
            .map(|i| BASE_CHARS[self.kmer_base(kmer, i) as usize] as char)
            .collect()
    }

    /// Offline normalization: shift/scale `means` in place so the slice's
    /// empirical mean and stdv match the model's.
    pub fn normalize(&self, means: &mut [f32]) {
        if means.is_empty() {
            return;
        }
        let n = means.len() as f64;
        let mean: f64 = means.iter().map(|&m| m as f64).sum::<f64>() / n;
        let var: f64 = means
            .iter()
            .map(|&m| {
                let d = m as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let stdv = var.sqrt().max(1e-6);

        let scale = self.model_stdv as f64 / stdv;
        let shift = self.model_mean as f64 - scale * mean;
        for m in means.iter_mut() {
            *m = (scale * *m as f64 + shift) as f32;
        }
    }
}
