//! Decoy (ring member) selection using a gamma distribution.
//!
//! Ages are drawn from the Miller et al. spend-time distribution and mapped
//! onto global output indices using the average time between outputs over
//! the sampled range, so recent outputs are preferred the way real spends
//! are. Ages that fall outside the range are replaced by a uniform draw.

use rand::Rng;

use oxen_types::constants::RING_SIZE;

use crate::TxError;

/// Gamma distribution shape parameter (Miller et al.).
const GAMMA_SHAPE: f64 = 19.28;

/// Gamma distribution scale parameter (1 / 1.61).
const GAMMA_SCALE: f64 = 1.0 / 1.61;

/// Recent spend window in seconds.
const RECENT_SPEND_WINDOW: f64 = 1800.0;

/// Average time between blocks in seconds.
const DIFFICULTY_TARGET: f64 = 120.0;

/// Selects decoy global indices from `[min_index, max_index]`.
#[derive(Debug, Clone)]
pub struct DecoySelector {
    min_index: u64,
    max_index: u64,
    /// Average seconds per output across the range.
    average_output_time: f64,
}

impl DecoySelector {
    /// `chain_height` spreads the range over wall-clock time; zero falls back
    /// to one output per block.
    pub fn new(min_index: u64, max_index: u64, chain_height: u64) -> Result<Self, TxError> {
        if max_index < min_index {
            return Err(TxError::DecoySelection(format!("empty output range [{min_index}, {max_index}]")));
        }
        let outputs = (max_index - min_index + 1) as f64;
        let blocks = if chain_height == 0 { outputs } else { chain_height as f64 };
        Ok(Self { min_index, max_index, average_output_time: blocks * DIFFICULTY_TARGET / outputs })
    }

    pub fn range_len(&self) -> u64 {
        self.max_index - self.min_index + 1
    }

    /// `ring_size - 1` distinct decoy indices, none equal to `real_index`.
    pub fn pick_decoys(&self, real_index: u64, ring_size: usize) -> Result<Vec<u64>, TxError> {
        self.pick_decoys_avoiding(real_index, ring_size, &[])
    }

    /// As [`pick_decoys`](Self::pick_decoys), never returning an index in `avoid`.
    pub fn pick_decoys_avoiding(&self, real_index: u64, ring_size: usize, avoid: &[u64]) -> Result<Vec<u64>, TxError> {
        let num_decoys = ring_size.saturating_sub(1);
        let range = self.min_index..=self.max_index;
        let in_range = range.contains(&real_index);
        let mut blocked: Vec<u64> = avoid.iter().copied().filter(|i| range.contains(i) && *i != real_index).collect();
        blocked.sort_unstable();
        blocked.dedup();
        let distinct = self.range_len().saturating_sub(u64::from(in_range) + blocked.len() as u64);
        if distinct < num_decoys as u64 {
            return Err(TxError::DecoySelection(format!(
                "need {num_decoys} decoys but only {distinct} outputs are available"
            )));
        }

        let mut rng = rand::thread_rng();
        let mut decoys = Vec::with_capacity(num_decoys);
        let max_attempts = num_decoys * 100 + 100;
        let mut attempts = 0;
        while decoys.len() < num_decoys {
            attempts += 1;
            // Past the budget, uniform draws still terminate on small ranges.
            let idx = if attempts > max_attempts {
                rng.gen_range(self.min_index..=self.max_index)
            } else {
                self.sample_output_index(&mut rng)
            };
            if idx == real_index || decoys.contains(&idx) || blocked.binary_search(&idx).is_ok() {
                continue;
            }
            decoys.push(idx);
        }
        Ok(decoys)
    }

    /// Sorted ring containing `real_index` exactly once, and its position.
    pub fn build_ring(&self, real_index: u64, ring_size: usize) -> Result<(Vec<u64>, usize), TxError> {
        self.build_ring_avoiding(real_index, ring_size, &[])
    }

    pub fn build_ring_avoiding(
        &self,
        real_index: u64,
        ring_size: usize,
        avoid: &[u64],
    ) -> Result<(Vec<u64>, usize), TxError> {
        let mut ring = self.pick_decoys_avoiding(real_index, ring_size, avoid)?;
        ring.push(real_index);
        ring.sort_unstable();
        let real_pos = ring
            .iter()
            .position(|&x| x == real_index)
            .ok_or_else(|| TxError::DecoySelection("real output missing from ring".into()))?;
        Ok((ring, real_pos))
    }

    /// Ring of the default protocol size.
    pub fn default_ring(&self, real_index: u64) -> Result<(Vec<u64>, usize), TxError> {
        self.build_ring(real_index, RING_SIZE)
    }

    /// Default-size ring that leaves out every index in `avoid`.
    pub fn default_ring_avoiding(&self, real_index: u64, avoid: &[u64]) -> Result<(Vec<u64>, usize), TxError> {
        self.build_ring_avoiding(real_index, RING_SIZE, avoid)
    }

    fn sample_output_index<R: Rng>(&self, rng: &mut R) -> u64 {
        let y = gamma_sample(GAMMA_SHAPE, GAMMA_SCALE, rng).exp();
        let time_offset = if y > RECENT_SPEND_WINDOW {
            y - RECENT_SPEND_WINDOW
        } else {
            rng.gen::<f64>() * RECENT_SPEND_WINDOW
        };
        let output_offset = (time_offset / self.average_output_time) as u64;
        if output_offset >= self.range_len() {
            return rng.gen_range(self.min_index..=self.max_index);
        }
        self.max_index - output_offset
    }
}

/// Absolute ring indices to the relative offsets stored in inputs.
pub fn absolute_to_relative(indices: &[u64]) -> Vec<u64> {
    let mut prev = 0;
    indices
        .iter()
        .map(|&i| {
            let rel = i - prev;
            prev = i;
            rel
        })
        .collect()
}

pub fn relative_to_absolute(offsets: &[u64]) -> Vec<u64> {
    let mut acc = 0u64;
    offsets
        .iter()
        .map(|&o| {
            acc += o;
            acc
        })
        .collect()
}

// ─── Gamma Distribution Sampler (Marsaglia & Tsang) ──────────────────────────

/// Sample from Gamma(shape, scale).
pub fn gamma_sample<R: Rng>(shape: f64, scale: f64, rng: &mut R) -> f64 {
    if shape < 1.0 {
        let g = gamma_sample(shape + 1.0, 1.0, rng);
        let u: f64 = rng.gen();
        return g * u.powf(1.0 / shape) * scale;
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    loop {
        let x = standard_normal(rng);
        let v = 1.0 + c * x;
        if v <= 0.0 {
            continue;
        }

        let v = v * v * v;
        let u: f64 = rng.gen();
        let x2 = x * x;

        if u < 1.0 - 0.0331 * x2 * x2 {
            return d * v * scale;
        }
        if u.ln() < 0.5 * x2 + d * (1.0 - v + v.ln()) {
            return d * v * scale;
        }
    }
}

/// Box-Muller.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_sorted_and_contains_real_once() {
        let sel = DecoySelector::new(0, 20_000, 10_000).unwrap();
        for real in [0, 7_777, 20_000] {
            let (ring, pos) = sel.default_ring(real).unwrap();
            assert_eq!(ring.len(), RING_SIZE);
            assert_eq!(ring[pos], real);
            assert!(ring.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(ring.iter().filter(|&&i| i == real).count(), 1);
        }
    }

    #[test]
    fn decoys_stay_in_range() {
        let sel = DecoySelector::new(100, 400, 300).unwrap();
        let decoys = sel.pick_decoys(250, 11).unwrap();
        assert_eq!(decoys.len(), 10);
        assert!(decoys.iter().all(|d| (100..=400).contains(d)));
        assert!(!decoys.contains(&250));
    }

    #[test]
    fn tiny_range_still_fills() {
        let sel = DecoySelector::new(0, 9, 0).unwrap();
        let (ring, pos) = sel.default_ring(4).unwrap();
        assert_eq!(ring, (0..10).collect::<Vec<_>>());
        assert_eq!(pos, 4);
    }

    #[test]
    fn too_few_outputs() {
        let sel = DecoySelector::new(0, 5, 0).unwrap();
        assert!(sel.default_ring(3).is_err());
        assert!(DecoySelector::new(5, 4, 0).is_err());
    }

    #[test]
    fn avoided_indices_never_appear() {
        let sel = DecoySelector::new(0, 14, 0).unwrap();
        let avoid = [10, 11, 12, 13];
        for _ in 0..20 {
            let (ring, pos) = sel.default_ring_avoiding(14, &avoid).unwrap();
            assert_eq!(ring[pos], 14);
            assert!(ring.iter().all(|i| !avoid.contains(i)));
        }
        // 15 outputs, the real one and 4 avoided leave 10 for 9 decoys; one
        // more avoided still fits, two more do not.
        assert!(sel.default_ring_avoiding(14, &[9, 10, 11, 12, 13]).is_ok());
        assert!(sel.default_ring_avoiding(14, &[8, 9, 10, 11, 12, 13]).is_err());
    }

    #[test]
    fn relative_offsets_sum_to_real() {
        let abs = vec![3, 10, 11, 500];
        let rel = absolute_to_relative(&abs);
        assert_eq!(rel, vec![3, 7, 1, 489]);
        assert_eq!(rel.iter().sum::<u64>(), 500);
        assert_eq!(relative_to_absolute(&rel), abs);
    }

    #[test]
    fn gamma_samples_positive() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            assert!(gamma_sample(GAMMA_SHAPE, GAMMA_SCALE, &mut rng) > 0.0);
            assert!(gamma_sample(1.0, 2.0, &mut rng) > 0.0);
        }
    }
}
