// Streaming event detection over raw current samples.
//
// Segmentation runs two Welch t-statistics over sliding windows (a short one
// for sharp level changes, a long one for slow drifts) and turns local maxima
// of those statistics into event boundaries. All statistics come from a small
// ring of cumulative sums, so one sample costs O(1) and detection state
// survives across chunk boundaries.
//
// A boundary is the peak position of a t-statistic that rose above its
// detector's threshold and then fell by `peak_height`. The short detector
// masks the long one while it is tracking a qualifying peak, so one level
// change yields one boundary.

/// Tuning for the two-window segmenter.
#[derive(Debug, Clone, Copy)]
pub struct EvdtParams {
    pub window_length1: usize,
    pub window_length2: usize,
    pub threshold1: f32,
    pub threshold2: f32,
    pub peak_height: f32,
}

impl Default for EvdtParams {
    fn default() -> Self {
        EvdtParams {
            window_length1: 3,
            window_length2: 6,
            threshold1: 1.4,
            threshold2: 9.0,
            peak_height: 0.2,
        }
    }
}

/// One detected event: a run of samples between two boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Event {
    pub mean: f32,
    pub stdv: f32,
    pub start: u64,
    pub length: u32,
}

/// Peak tracker over one t-statistic stream.
///
/// Phase 1 (no candidate): track the running minimum; a rise of `peak_height`
/// above it opens a candidate peak. Phase 2 (candidate open): the maximum and
/// its position follow the stream; once the statistic falls `peak_height`
/// below a maximum that cleared `threshold`, and half a window has passed,
/// the maximum's position is emitted as a boundary.
#[derive(Debug, Clone)]
struct PeakDetector {
    threshold: f32,
    window_length: u64,
    masked_to: u64,
    peak_pos: Option<u64>,
    peak_value: f32,
    // Cumulative sums snapshotted at peak_pos, so the event ending there can
    // be summarized long after the ring has moved on.
    peak_sum: f64,
    peak_sumsq: f64,
    valid_peak: bool,
}

impl PeakDetector {
    fn new(threshold: f32, window_length: usize) -> Self {
        PeakDetector {
            threshold,
            window_length: window_length as u64,
            masked_to: 0,
            peak_pos: None,
            peak_value: f32::MAX,
            peak_sum: 0.0,
            peak_sumsq: 0.0,
            valid_peak: false,
        }
    }

    fn clear_peak(&mut self) {
        self.peak_pos = None;
        self.peak_value = f32::MAX;
        self.valid_peak = false;
    }

    /// Whether this detector currently tracks a peak that will fire.
    fn has_qualifying_peak(&self) -> bool {
        self.peak_pos.is_some() && self.peak_value > self.threshold
    }

    /// Advance by one t-statistic value at boundary position `pos`.
    /// `snap` is the cumulative (sum, sum-of-squares) through sample
    /// `pos - 1`. Returns an emitted boundary with its snapshot.
    fn step(
        &mut self,
        pos: u64,
        value: f32,
        snap: (f64, f64),
        peak_height: f32,
    ) -> Option<(u64, f64, f64)> {
        if pos <= self.masked_to {
            return None;
        }

        match self.peak_pos {
            None => {
                if value < self.peak_value {
                    // Deeper minimum, keep waiting
                    self.peak_value = value;
                } else if value - self.peak_value > peak_height {
                    self.peak_value = value;
                    self.peak_pos = Some(pos);
                    self.peak_sum = snap.0;
                    self.peak_sumsq = snap.1;
                }
                None
            }
            Some(p) => {
                if value > self.peak_value {
                    self.peak_value = value;
                    self.peak_pos = Some(pos);
                    self.peak_sum = snap.0;
                    self.peak_sumsq = snap.1;
                }
                if self.peak_value - value > peak_height && self.peak_value > self.threshold {
                    self.valid_peak = true;
                }
                if self.valid_peak && pos - self.peak_pos.unwrap_or(p) > self.window_length / 2 {
                    let out = (
                        self.peak_pos.unwrap_or(p),
                        self.peak_sum,
                        self.peak_sumsq,
                    );
                    self.peak_pos = None;
                    self.peak_value = value;
                    self.valid_peak = false;
                    return Some(out);
                }
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventDetector {
    params: EvdtParams,
    buf_len: usize,
    sum: Vec<f64>,
    sumsq: Vec<f64>,
    t: u64, // samples consumed

    evt_st: u64,
    evt_st_sum: f64,
    evt_st_sumsq: f64,

    short_det: PeakDetector,
    long_det: PeakDetector,
    event: Event, // last completed event
}

impl EventDetector {
    pub fn new(params: EvdtParams) -> Self {
        // Ring must hold both windows of the long statistic plus the lagged
        // boundary position.
        let buf_len = 2 * params.window_length2 + 2;
        EventDetector {
            params,
            buf_len,
            sum: vec![0.0; buf_len],
            sumsq: vec![0.0; buf_len],
            t: 0,
            evt_st: 0,
            evt_st_sum: 0.0,
            evt_st_sumsq: 0.0,
            short_det: PeakDetector::new(params.threshold1, params.window_length1),
            long_det: PeakDetector::new(params.threshold2, params.window_length2),
            event: Event::default(),
        }
    }

    pub fn reset(&mut self) {
        self.t = 0;
        self.evt_st = 0;
        self.evt_st_sum = 0.0;
        self.evt_st_sumsq = 0.0;
        self.short_det = PeakDetector::new(self.params.threshold1, self.params.window_length1);
        self.long_det = PeakDetector::new(self.params.threshold2, self.params.window_length2);
        self.event = Event::default();
    }

    /// Cumulative sums through sample `i` (`i < 0` means "before the first
    /// sample"). Only valid for `i` within the ring's history.
    #[inline]
    fn cum(&self, i: i64) -> (f64, f64) {
        if i < 0 {
            (0.0, 0.0)
        } else {
            let idx = (i as u64 % self.buf_len as u64) as usize;
            (self.sum[idx], self.sumsq[idx])
        }
    }

    /// Welch t-statistic comparing the `w` samples before boundary `p`
    /// against the `w` samples after it.
    fn tstat(&self, p: u64, w: u64) -> f32 {
        let (s_lo, ss_lo) = self.cum(p as i64 - w as i64 - 1);
        let (s_mid, ss_mid) = self.cum(p as i64 - 1);
        let (s_hi, ss_hi) = self.cum((p + w) as i64 - 1);

        let n = w as f64;
        let m1 = (s_mid - s_lo) / n;
        let m2 = (s_hi - s_mid) / n;
        let v1 = ((ss_mid - ss_lo) / n - m1 * m1).max(1e-10);
        let v2 = ((ss_hi - ss_mid) / n - m2 * m2).max(1e-10);

        ((m1 - m2).abs() / (v1 / n + v2 / n).sqrt()) as f32
    }

    /// Consume one raw sample. Returns true when an event was completed;
    /// `get_mean`/`get_event` then describe it.
    pub fn add_sample(&mut self, s: f32) -> bool {
        let pos = (self.t % self.buf_len as u64) as usize;
        let (ps, pss) = if self.t == 0 {
            (0.0, 0.0)
        } else {
            self.cum(self.t as i64 - 1)
        };
        self.sum[pos] = ps + s as f64;
        self.sumsq[pos] = pss + (s as f64) * (s as f64);
        self.t += 1;

        let w1 = self.params.window_length1 as u64;
        let w2 = self.params.window_length2 as u64;
        let mut boundary = None;

        if self.t >= 2 * w1 {
            let p = self.t - w1;
            let stat = self.tstat(p, w1);
            let snap = self.cum(p as i64 - 1);
            boundary = self
                .short_det
                .step(p, stat, snap, self.params.peak_height);

            // A qualifying short peak owns this transition
            if self.short_det.has_qualifying_peak() {
                if let Some(sp) = self.short_det.peak_pos {
                    self.long_det.masked_to = sp + w1;
                    self.long_det.clear_peak();
                }
            }
        }

        if boundary.is_none() && self.t >= 2 * w2 {
            let p = self.t - w2;
            let stat = self.tstat(p, w2);
            let snap = self.cum(p as i64 - 1);
            boundary = self
                .long_det
                .step(p, stat, snap, self.params.peak_height);
        }

        match boundary {
            Some((bp, bsum, bsumsq)) if bp > self.evt_st => {
                let len = bp - self.evt_st;
                let mean = (bsum - self.evt_st_sum) / len as f64;
                let var = ((bsumsq - self.evt_st_sumsq) / len as f64 - mean * mean).max(0.0);
                self.event = Event {
                    mean: mean as f32,
                    stdv: var.sqrt() as f32,
                    start: self.evt_st,
                    length: len as u32,
                };
                self.evt_st = bp;
                self.evt_st_sum = bsum;
                self.evt_st_sumsq = bsumsq;
                true
            }
            _ => false,
        }
    }

    /// Mean of the last completed event.
    #[inline]
    pub fn get_mean(&self) -> f32 {
        self.event.mean
    }

    #[inline]
    pub fn get_event(&self) -> Event {
        self.event
    }

    /// Convenience for offline use: feed a slice, collect completed events.
    pub fn add_samples(&mut self, samples: &[f32]) -> Vec<Event> {
        let mut events = Vec::new();
        for &s in samples {
            if self.add_sample(s) {
                events.push(self.event);
            }
        }
        events
    }
}
