// Streaming normalization of event means against the pore model.
//
// Holds the last `cap` raw event means in a ring and maps each popped event
// by the affine transform that matches the ring's empirical moments to the
// model's. The window statistics include recently popped events until they
// are overwritten, so the transform stays stable between pops.
//
// Backpressure: `add_event` refuses rather than overwrite unread events; the
// mapper reacts with `skip_unread` and accounts for the dropped events.

#[derive(Debug, Clone)]
pub struct Normalizer {
    target_mean: f32,
    target_stdv: f32,

    events: Vec<f32>,
    // Virtual monotonic cursors; the ring slot for event i is i % cap.
    wr: u64,
    rd: u64,

    // Moments over the stored window (the last min(wr, cap) events added)
    sum: f64,
    sumsq: f64,
}

impl Normalizer {
    pub fn new(target_mean: f32, target_stdv: f32, cap: usize) -> Self {
        Normalizer {
            target_mean,
            target_stdv,
            events: vec![0.0; cap.max(1)],
            wr: 0,
            rd: 0,
            sum: 0.0,
            sumsq: 0.0,
        }
    }

    #[inline]
    fn cap(&self) -> u64 {
        self.events.len() as u64
    }

    /// Unread events currently buffered.
    #[inline]
    pub fn unread_size(&self) -> u32 {
        (self.wr - self.rd) as u32
    }

    #[inline]
    pub fn empty(&self) -> bool {
        self.rd == self.wr
    }

    /// Buffer one raw event mean. Returns false (and stores nothing) when
    /// every slot holds an unread event.
    pub fn add_event(&mut self, mean: f32) -> bool {
        if self.wr - self.rd == self.cap() {
            return false;
        }
        let idx = (self.wr % self.cap()) as usize;
        if self.wr >= self.cap() {
            let old = self.events[idx] as f64;
            self.sum -= old;
            self.sumsq -= old * old;
        }
        self.events[idx] = mean;
        self.sum += mean as f64;
        self.sumsq += (mean as f64) * (mean as f64);
        self.wr += 1;
        true
    }

    /// Pop the next unread event, normalized into model space. Callers must
    /// check `empty()` first; popping an empty buffer repeats the oldest slot.
    pub fn pop_event(&mut self) -> f32 {
        let n = self.wr.min(self.cap()).max(1) as f64;
        let mean = self.sum / n;
        let var = (self.sumsq / n - mean * mean).max(0.0);
        let stdv = var.sqrt().max(1e-6);

        let scale = self.target_stdv as f64 / stdv;
        let shift = self.target_mean as f64 - scale * mean;

        let idx = (self.rd % self.cap()) as usize;
        let out = (scale * self.events[idx] as f64 + shift) as f32;
        if self.rd < self.wr {
            self.rd += 1;
        }
        out
    }

    /// Drop unread events, keeping the `keep` most recent. Returns how many
    /// were dropped; the caller charges them against its event index.
    pub fn skip_unread(&mut self, keep: u32) -> u32 {
        let unread = self.wr - self.rd;
        if unread <= keep as u64 {
            return 0;
        }
        let skipped = unread - keep as u64;
        self.rd += skipped;
        skipped as u32
    }

    pub fn reset(&mut self) {
        self.wr = 0;
        self.rd = 0;
        self.sum = 0.0;
        self.sumsq = 0.0;
        for e in self.events.iter_mut() {
            *e = 0.0;
        }
    }
}
