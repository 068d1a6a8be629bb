//! Tournament selection with rank-biased weights.

use gf_types::{config_error, GfResult};
use rand::seq::index;
use rand::Rng;

/// Picks members of a scored population by drawing a random subset of size
/// `k` and choosing within it with geometric rank weights `p(1-p)^j`.
#[derive(Debug, Clone, PartialEq)]
pub struct TournamentSelector {
    k_frac: f64,
    p: f64,
}

impl TournamentSelector {
    pub fn new(k_frac: f64, p: f64) -> GfResult<Self> {
        if !(k_frac > 0.0 && k_frac <= 1.0) {
            return Err(config_error!("k_frac must lie in (0, 1], got {k_frac}"));
        }
        if !(p > 0.0 && p <= 1.0) {
            return Err(config_error!("p must lie in (0, 1], got {p}"));
        }
        Ok(Self { k_frac, p })
    }

    pub fn k_frac(&self) -> f64 {
        self.k_frac
    }

    pub fn p(&self) -> f64 {
        self.p
    }

    /// Tournament size for a pool of `len` members.
    pub fn subset_size(&self, len: usize) -> GfResult<usize> {
        let k = (len as f64 * self.k_frac).floor() as usize;
        if k == 0 {
            return Err(config_error!(
                "k_frac {} is too small for a pool of {len}",
                self.k_frac
            ));
        }
        Ok(k)
    }

    /// Normalized selection weights for sorted subset positions `0..k`.
    pub fn weights(&self, k: usize) -> Vec<f64> {
        let raw: Vec<f64> = (0..k)
            .map(|j| self.p * (1.0 - self.p).powi(j as i32))
            .collect();
        let norm: f64 = raw.iter().sum();
        raw.into_iter().map(|w| w / norm).collect()
    }

    /// Draw `n` indices into `fitness` (lower is better). Draws are
    /// independent, so the same index may appear more than once.
    pub fn select<R: Rng + ?Sized>(
        &self,
        fitness: &[f64],
        n: usize,
        rng: &mut R,
    ) -> GfResult<Vec<usize>> {
        let k = self.subset_size(fitness.len())?;
        let cumulative: Vec<f64> = self
            .weights(k)
            .iter()
            .scan(0.0, |acc, w| {
                *acc += w;
                Some(*acc)
            })
            .collect();

        let mut choices = Vec::with_capacity(n);
        for _ in 0..n {
            let mut pool = index::sample(rng, fitness.len(), k).into_vec();
            pool.sort_by(|a, b| fitness[*a].total_cmp(&fitness[*b]).then(a.cmp(b)));

            let xi: f64 = rng.gen();
            let position = cumulative
                .iter()
                .position(|c| xi <= *c)
                .unwrap_or(k - 1);
            choices.push(pool[position]);
        }
        Ok(choices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sorted_fitness(len: usize) -> Vec<f64> {
        (0..len).map(|i| i as f64 * 0.5).collect()
    }

    #[test]
    fn weights_are_normalized() {
        for &p in &[0.05, 0.3, 0.5, 0.9, 0.999, 1.0] {
            let selector = TournamentSelector::new(0.5, p).unwrap();
            for k in 1..40 {
                let sum: f64 = selector.weights(k).iter().sum();
                assert!((sum - 1.0).abs() < 1e-12, "p={p} k={k} sum={sum}");
            }
        }
    }

    #[test]
    fn weights_decrease_with_rank() {
        let selector = TournamentSelector::new(0.2, 0.9).unwrap();
        let w = selector.weights(5);
        assert!(w.windows(2).all(|pair| pair[0] > pair[1]));
    }

    #[test]
    fn k_zero_is_a_configuration_error() {
        let selector = TournamentSelector::new(0.1, 0.9).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(selector.select(&sorted_fitness(5), 1, &mut rng).is_err());
        assert!(TournamentSelector::new(0.0, 0.9).is_err());
        assert!(TournamentSelector::new(0.2, 0.0).is_err());
    }

    #[test]
    fn returns_requested_count_of_valid_indices() {
        let selector = TournamentSelector::new(0.2, 0.9).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let picks = selector.select(&sorted_fitness(50), 17, &mut rng).unwrap();
        assert_eq!(picks.len(), 17);
        assert!(picks.iter().all(|i| *i < 50));
    }

    #[test]
    fn p_one_always_picks_subset_best() {
        // With p = 1 every draw takes the best member of its subset. With
        // k = L the subset is the whole pool, so that is the global best.
        let selector = TournamentSelector::new(1.0, 1.0).unwrap();
        let mut fitness = sorted_fitness(12);
        fitness.reverse();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let picks = selector.select(&fitness, 200, &mut rng).unwrap();
        assert!(picks.iter().all(|i| *i == 11));
    }

    #[test]
    fn p_one_with_small_subset_never_picks_worst_members() {
        // k = 3 of 10: the pick is the best of a random triple, so it can
        // never be one of the two worst-ranked members.
        let selector = TournamentSelector::new(0.3, 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let picks = selector.select(&sorted_fitness(10), 500, &mut rng).unwrap();
        assert!(picks.iter().all(|i| *i < 8));
        assert!(picks.iter().any(|i| *i > 0));
    }

    #[test]
    fn k_one_is_uniform() {
        let selector = TournamentSelector::new(0.1, 0.9).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let draws = 20_000;
        let picks = selector.select(&sorted_fitness(10), draws, &mut rng).unwrap();

        let mut counts = [0usize; 10];
        for i in picks {
            counts[i] += 1;
        }
        let expected = draws as f64 / 10.0;
        for (i, c) in counts.iter().enumerate() {
            let deviation = (*c as f64 - expected).abs() / expected;
            assert!(deviation < 0.1, "index {i} drawn {c} times");
        }
    }

    #[test]
    fn selection_is_biased_toward_better_ranks() {
        let selector = TournamentSelector::new(0.2, 0.9).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(34);
        let picks = selector.select(&sorted_fitness(100), 2000, &mut rng).unwrap();
        let top_half = picks.iter().filter(|i| **i < 50).count();
        assert!(top_half > 1800, "top half drawn {top_half} times");
    }

    #[test]
    fn seeded_selection_is_reproducible() {
        let selector = TournamentSelector::new(0.2, 0.9).unwrap();
        let fitness = sorted_fitness(30);
        let a = selector
            .select(&fitness, 10, &mut ChaCha8Rng::seed_from_u64(99))
            .unwrap();
        let b = selector
            .select(&fitness, 10, &mut ChaCha8Rng::seed_from_u64(99))
            .unwrap();
        assert_eq!(a, b);
    }
}
