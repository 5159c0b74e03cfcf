// Incremental clustering of seeds along the reference.
//
// Every seed the extender emits lands here. Seeds belonging to one true
// alignment advance the reference roughly in step with the event index, so
// they collapse into a single cluster; background hits scatter into many
// weak clusters. Mapping succeeds when the best cluster dominates.

use crate::map_opt::MapOpt;

/// Active clusters are capped; the weakest is evicted on overflow.
const MAX_CLUSTERS: usize = 1024;

/// One cluster of geometrically consistent seeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedCluster {
    pub ref_st: u64,
    pub ref_en: u64,
    pub evt_st: u32,
    pub evt_en: u32,
    /// Matched reference length accumulated by this cluster.
    pub total_len: u32,
    pub seed_count: u32,
}

impl SeedCluster {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.total_len > 0
    }
}

#[derive(Debug, Clone)]
pub struct SeedTracker {
    seed_len: u64,
    min_mean_conf: f32,
    min_top_conf: f32,
    min_aln_len: u32,
    clusters: Vec<SeedCluster>,
}

impl SeedTracker {
    pub fn new(opts: &MapOpt) -> Self {
        SeedTracker {
            seed_len: opts.seed_len as u64,
            min_mean_conf: opts.min_mean_conf,
            min_top_conf: opts.min_top_conf,
            min_aln_len: opts.min_aln_len,
            clusters: Vec::with_capacity(64),
        }
    }

    pub fn reset(&mut self) {
        self.clusters.clear();
    }

    /// Whether `(ref_en, evt_en)` plausibly continues `c`. One event advances
    /// the reference by at most one position (MATCH) and possibly none
    /// (STAY), so reference gain can never outrun elapsed events; one seed
    /// window of slack covers overlapping emission on both sides.
    #[inline]
    fn fits(&self, c: &SeedCluster, ref_en: u64, evt_en: u32) -> bool {
        let dr = ref_en as i64 - c.ref_en as i64;
        let de = evt_en.saturating_sub(c.evt_en) as i64;
        let slack = self.seed_len as i64;
        dr >= -slack && dr <= de + slack
    }

    /// Ingest one seed. Extends the strongest fitting cluster or starts a
    /// new one; returns a copy of the cluster that absorbed the seed.
    pub fn add_seed(&mut self, ref_en: u64, match_len: u8, evt_en: u32) -> SeedCluster {
        let mut target: Option<usize> = None;
        for (i, c) in self.clusters.iter().enumerate() {
            if self.fits(c, ref_en, evt_en)
                && target.map_or(true, |t| c.total_len > self.clusters[t].total_len)
            {
                target = Some(i);
            }
        }

        match target {
            Some(i) => {
                let c = &mut self.clusters[i];
                let dr = ref_en as i64 - c.ref_en as i64;
                let gain = dr.clamp(0, match_len as i64) as u32;
                let seed_st = ref_en.saturating_sub(match_len.saturating_sub(1) as u64);

                c.ref_st = c.ref_st.min(seed_st);
                c.ref_en = c.ref_en.max(ref_en);
                c.evt_en = c.evt_en.max(evt_en);
                c.total_len += gain;
                c.seed_count += 1;
                c.clone()
            }
            None => {
                let cluster = SeedCluster {
                    ref_st: ref_en.saturating_sub(match_len.saturating_sub(1) as u64),
                    ref_en,
                    evt_st: evt_en,
                    evt_en,
                    total_len: match_len as u32,
                    seed_count: 1,
                };
                if self.clusters.len() == MAX_CLUSTERS {
                    self.evict_weakest(&cluster);
                } else {
                    self.clusters.push(cluster.clone());
                }
                cluster
            }
        }
    }

    /// Replace the weakest cluster with the newcomer unless the newcomer is
    /// itself the weakest.
    fn evict_weakest(&mut self, newcomer: &SeedCluster) {
        if let Some((i, weakest)) = self
            .clusters
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.total_len)
        {
            if weakest.total_len < newcomer.total_len {
                log::trace!(
                    "evicting cluster ref=[{}, {}] len={} for newcomer len={}",
                    weakest.ref_st,
                    weakest.ref_en,
                    weakest.total_len,
                    newcomer.total_len
                );
                self.clusters[i] = newcomer.clone();
            }
        }
    }

    /// The winning cluster, if the confidence gates pass: long enough, ahead
    /// of the population mean, and ahead of the runner-up.
    pub fn get_final(&self) -> Option<SeedCluster> {
        let best = self.clusters.iter().max_by_key(|c| c.total_len)?;
        if best.total_len < self.min_aln_len {
            return None;
        }

        if self.clusters.len() > 1 {
            let total: u64 = self.clusters.iter().map(|c| c.total_len as u64).sum();
            let mean_len = total as f32 / self.clusters.len() as f32;
            if (best.total_len as f32) < self.min_mean_conf * mean_len {
                return None;
            }

            let second = self
                .clusters
                .iter()
                .filter(|c| !std::ptr::eq(*c, best))
                .map(|c| c.total_len)
                .max()
                .unwrap_or(0);
            if second > 0 && (best.total_len as f32) < self.min_top_conf * second as f32 {
                return None;
            }
        }

        log::debug!(
            "cluster confirmed: ref=[{}, {}] evt=[{}, {}] len={} seeds={} ({} clusters active)",
            best.ref_st,
            best.ref_en,
            best.evt_st,
            best.evt_en,
            best.total_len,
            best.seed_count,
            self.clusters.len()
        );
        Some(best.clone())
    }

    #[cfg(test)]
    pub(crate) fn cluster_count(&self) -> usize {
        self.clusters.len()
    }
}
