//! Surrogate model and proposal logic for Bayesian optimization
//!
//! The surrogate is an RBF distance-weighted regression over the
//! observed (params, score) pairs: predicted score is the
//! kernel-weighted mean of neighbors, and predicted uncertainty shrinks
//! with the kernel mass near the candidate. Proposals maximize an
//! upper-confidence-bound acquisition over a sampled candidate batch.
//!
//! With no successful observation yet the surrogate has nothing to
//! condition on and proposals degrade to uniform random sampling, so a
//! search can always make progress.
//!
//! References:
//! - Snoek et al. (2012). Practical Bayesian Optimization. NeurIPS.
//! - Bergstra & Bengio (2012). Random Search for Hyper-Parameter
//!   Optimization. JMLR.

use rand::rngs::StdRng;

use crate::ledger::ParamMap;

use super::space::ParamSpace;

/// RBF kernel bandwidth over normalized per-dimension distances.
const KERNEL_BANDWIDTH: f64 = 0.2;

/// Exploration weight in the UCB acquisition.
const EXPLORATION_KAPPA: f64 = 1.0;

/// Random candidates scored per proposal.
const CANDIDATE_BATCH: usize = 64;

/// Surrogate over observed configurations.
///
/// Scores are stored in maximization orientation; the engine negates
/// when the caller minimizes.
pub(crate) struct Surrogate<'a> {
    space: &'a ParamSpace,
    observed: Vec<(ParamMap, f64)>,
}

impl<'a> Surrogate<'a> {
    pub(crate) fn new(space: &'a ParamSpace) -> Self {
        Self {
            space,
            observed: Vec::new(),
        }
    }

    /// Record a successful observation.
    pub(crate) fn observe(&mut self, params: ParamMap, oriented_score: f64) {
        self.observed.push((params, oriented_score));
    }

    /// Number of observations conditioning the surrogate.
    pub(crate) fn observation_count(&self) -> usize {
        self.observed.len()
    }

    /// Predicted (mean, uncertainty) at a candidate configuration.
    fn predict(&self, candidate: &ParamMap) -> (f64, f64) {
        let mut mass = 0.0;
        let mut weighted = 0.0;
        for (params, score) in &self.observed {
            let d = self.space.distance(candidate, params);
            let w = (-(d / KERNEL_BANDWIDTH).powi(2)).exp();
            mass += w;
            weighted += w * score;
        }
        if mass < 1e-12 {
            // Candidate is far from everything observed: fall back to
            // the global mean with maximal uncertainty.
            let global = self.observed.iter().map(|(_, s)| s).sum::<f64>()
                / self.observed.len() as f64;
            return (global, 1.0);
        }
        (weighted / mass, 1.0 / (1.0 + mass))
    }

    /// Propose the next configuration.
    ///
    /// Samples [`CANDIDATE_BATCH`] uniform candidates and keeps the one
    /// maximizing `mean + kappa * sigma`. Degrades to a single uniform
    /// draw while no observation exists.
    pub(crate) fn propose(&self, rng: &mut StdRng) -> ParamMap {
        if self.observed.is_empty() {
            return self.space.sample(rng);
        }
        let mut best: Option<(f64, ParamMap)> = None;
        for _ in 0..CANDIDATE_BATCH {
            let candidate = self.space.sample(rng);
            let (mean, sigma) = self.predict(&candidate);
            let acquisition = EXPLORATION_KAPPA.mul_add(sigma, mean);
            match &best {
                Some((score, _)) if *score >= acquisition => {}
                _ => best = Some((acquisition, candidate)),
            }
        }
        best.map(|(_, c)| c).unwrap_or_else(|| self.space.sample(rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ParamValue;
    use crate::tuner::space::ParamDomain;
    use rand::SeedableRng;

    fn space() -> ParamSpace {
        ParamSpace::new().add(
            "x",
            ParamDomain::Real {
                low: 0.0,
                high: 1.0,
                log_scale: false,
            },
        )
    }

    fn point(x: f64) -> ParamMap {
        let mut m = ParamMap::new();
        m.insert("x".to_string(), ParamValue::Float(x));
        m
    }

    #[test]
    fn test_empty_surrogate_degrades_to_random() {
        let space = space();
        let surrogate = Surrogate::new(&space);
        let mut rng = StdRng::seed_from_u64(1);
        let proposal = surrogate.propose(&mut rng);
        assert!(proposal.contains_key("x"));
    }

    #[test]
    fn test_prediction_tracks_neighbors() {
        let space = space();
        let mut surrogate = Surrogate::new(&space);
        surrogate.observe(point(0.1), 1.0);
        surrogate.observe(point(0.9), 10.0);

        let (near_low, _) = surrogate.predict(&point(0.1));
        let (near_high, _) = surrogate.predict(&point(0.9));
        assert!(near_high > near_low);
    }

    #[test]
    fn test_uncertainty_shrinks_with_mass() {
        let space = space();
        let mut surrogate = Surrogate::new(&space);
        surrogate.observe(point(0.5), 1.0);

        let (_, sigma_near) = surrogate.predict(&point(0.5));
        let (_, sigma_far) = surrogate.predict(&point(0.99));
        assert!(sigma_near < sigma_far);
    }

    #[test]
    fn test_proposals_concentrate_near_good_region() {
        let space = space();
        let mut surrogate = Surrogate::new(&space);
        // Strong signal: high scores near x = 0.8
        for i in 0..5 {
            let x = 0.78 + f64::from(i) * 0.01;
            surrogate.observe(point(x), 10.0);
            surrogate.observe(point(x - 0.6), 0.0);
        }

        let mut rng = StdRng::seed_from_u64(3);
        let mut near_good = 0;
        for _ in 0..20 {
            let p = surrogate.propose(&mut rng);
            let x = p["x"].as_f64().unwrap();
            if (x - 0.8).abs() < 0.25 {
                near_good += 1;
            }
        }
        // Far better than the uniform expectation of ~50% in [0.55, 1.0]
        assert!(near_good >= 12, "only {near_good}/20 proposals near optimum");
    }
}
