//! Parameter spaces for the three search strategies
//!
//! Grid axes enumerate finite candidate lists; distributions draw
//! random samples; domains describe bounded numeric ranges (optionally
//! log-scaled) or categorical sets for Bayesian proposals.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::{ParamMap, ParamValue};

/// Finite grid of candidate values per parameter.
///
/// Axes enumerate in insertion order, so the Cartesian product (and
/// therefore trial indices) is deterministic for a given construction
/// order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamGrid {
    axes: Vec<(String, Vec<ParamValue>)>,
}

impl ParamGrid {
    /// Create an empty grid.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an axis with its finite candidate sequence.
    #[must_use]
    pub fn add(mut self, name: impl Into<String>, values: Vec<ParamValue>) -> Self {
        self.axes.push((name.into(), values));
        self
    }

    /// Number of combinations in the full Cartesian product.
    #[must_use]
    pub fn size(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(|(_, vs)| vs.len()).product()
    }

    /// Enumerate the full Cartesian product in axis-insertion order.
    #[must_use]
    pub fn combinations(&self) -> Vec<ParamMap> {
        if self.size() == 0 {
            return Vec::new();
        }
        let mut configs = vec![ParamMap::new()];
        for (name, values) in &self.axes {
            let mut expanded = Vec::with_capacity(configs.len() * values.len());
            for config in &configs {
                for value in values {
                    let mut next = config.clone();
                    next.insert(name.clone(), value.clone());
                    expanded.push(next);
                }
            }
            configs = expanded;
        }
        configs
    }

    /// Reject empty grids and empty axes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the grid has no combinations.
    pub fn validate(&self) -> Result<()> {
        if self.axes.is_empty() {
            return Err(Error::Config("param grid has no axes".to_string()));
        }
        for (name, values) in &self.axes {
            if values.is_empty() {
                return Err(Error::Config(format!(
                    "param grid axis '{name}' has no candidate values"
                )));
            }
        }
        Ok(())
    }
}

/// Per-parameter distribution for random search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamDistribution {
    /// Uniform draw with replacement from a discrete sequence
    Choice {
        /// The candidate values
        values: Vec<ParamValue>,
    },
    /// Uniform continuous draw from `[low, high)`
    Uniform {
        /// Lower bound (inclusive)
        low: f64,
        /// Upper bound (exclusive)
        high: f64,
    },
    /// Uniform draw in log space over `[low, high)`
    LogUniform {
        /// Lower bound (inclusive, must be positive)
        low: f64,
        /// Upper bound (exclusive)
        high: f64,
    },
    /// Uniform integer draw from `[low, high]`
    IntRange {
        /// Lower bound (inclusive)
        low: i64,
        /// Upper bound (inclusive)
        high: i64,
    },
}

impl ParamDistribution {
    /// Draw one value.
    pub fn sample(&self, rng: &mut StdRng) -> ParamValue {
        match self {
            Self::Choice { values } => values[rng.gen_range(0..values.len())].clone(),
            Self::Uniform { low, high } => ParamValue::Float(rng.gen_range(*low..*high)),
            Self::LogUniform { low, high } => {
                let u = rng.gen_range(low.ln()..high.ln());
                ParamValue::Float(u.exp())
            }
            Self::IntRange { low, high } => ParamValue::Int(rng.gen_range(*low..=*high)),
        }
    }

    /// Whether a value lies within the declared domain.
    #[must_use]
    pub fn contains(&self, value: &ParamValue) -> bool {
        match self {
            Self::Choice { values } => values.contains(value),
            Self::Uniform { low, high } | Self::LogUniform { low, high } => value
                .as_f64()
                .is_some_and(|v| v >= *low && v < *high),
            Self::IntRange { low, high } => {
                matches!(value, ParamValue::Int(i) if i >= low && i <= high)
            }
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let ok = match self {
            Self::Choice { values } => !values.is_empty(),
            Self::Uniform { low, high } => low < high,
            Self::LogUniform { low, high } => *low > 0.0 && low < high,
            Self::IntRange { low, high } => low <= high,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "distribution for parameter '{name}' has an empty or inverted domain"
            )))
        }
    }
}

/// Named distributions for random search, sampled jointly per trial.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamDistributions {
    dims: Vec<(String, ParamDistribution)>,
}

impl ParamDistributions {
    /// Create an empty set of distributions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named distribution.
    #[must_use]
    pub fn add(mut self, name: impl Into<String>, dist: ParamDistribution) -> Self {
        self.dims.push((name.into(), dist));
        self
    }

    /// Draw one configuration, sampling every dimension independently.
    pub fn sample(&self, rng: &mut StdRng) -> ParamMap {
        self.dims
            .iter()
            .map(|(name, dist)| (name.clone(), dist.sample(rng)))
            .collect()
    }

    /// Look up a dimension's distribution by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamDistribution> {
        self.dims
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    /// Reject empty or malformed distribution sets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty set or a degenerate domain.
    pub fn validate(&self) -> Result<()> {
        if self.dims.is_empty() {
            return Err(Error::Config(
                "random search needs at least one distribution".to_string(),
            ));
        }
        for (name, dist) in &self.dims {
            dist.validate(name)?;
        }
        Ok(())
    }
}

/// One parameter's domain for Bayesian optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamDomain {
    /// Bounded continuous range, optionally searched in log space
    Real {
        /// Lower bound (inclusive)
        low: f64,
        /// Upper bound (inclusive)
        high: f64,
        /// Sample and measure distance in log space
        log_scale: bool,
    },
    /// Bounded integer range
    Integer {
        /// Lower bound (inclusive)
        low: i64,
        /// Upper bound (inclusive)
        high: i64,
    },
    /// Unordered categorical set
    Categorical {
        /// The candidate values
        values: Vec<ParamValue>,
    },
}

impl ParamDomain {
    /// Draw one value uniformly from the domain.
    pub fn sample(&self, rng: &mut StdRng) -> ParamValue {
        match self {
            Self::Real {
                low,
                high,
                log_scale: false,
            } => ParamValue::Float(rng.gen_range(*low..=*high)),
            Self::Real {
                low,
                high,
                log_scale: true,
            } => {
                let u = rng.gen_range(low.ln()..=high.ln());
                ParamValue::Float(u.exp())
            }
            Self::Integer { low, high } => ParamValue::Int(rng.gen_range(*low..=*high)),
            Self::Categorical { values } => values[rng.gen_range(0..values.len())].clone(),
        }
    }

    /// Normalized distance between two values of this domain in `[0, 1]`.
    ///
    /// Numeric domains use the bound-scaled absolute difference (log
    /// space when `log_scale`); categorical values are at distance 0
    /// when equal and 1 otherwise.
    #[must_use]
    pub fn distance(&self, a: &ParamValue, b: &ParamValue) -> f64 {
        match self {
            Self::Real {
                low,
                high,
                log_scale,
            } => {
                let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                    return 1.0;
                };
                if *log_scale {
                    let span = high.ln() - low.ln();
                    ((a.ln() - b.ln()) / span).abs()
                } else {
                    ((a - b) / (high - low)).abs()
                }
            }
            Self::Integer { low, high } => {
                let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                    return 1.0;
                };
                let span = (high - low).max(1) as f64;
                ((a - b) / span).abs()
            }
            Self::Categorical { .. } => {
                if a == b {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let ok = match self {
            Self::Real {
                low,
                high,
                log_scale,
            } => low < high && (!log_scale || *low > 0.0),
            Self::Integer { low, high } => low <= high,
            Self::Categorical { values } => !values.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "domain for parameter '{name}' has an empty or inverted range"
            )))
        }
    }
}

/// Named domains forming a Bayesian search space.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSpace {
    dims: Vec<(String, ParamDomain)>,
}

impl ParamSpace {
    /// Create an empty space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named domain.
    #[must_use]
    pub fn add(mut self, name: impl Into<String>, domain: ParamDomain) -> Self {
        self.dims.push((name.into(), domain));
        self
    }

    /// The named dimensions, in insertion order.
    #[must_use]
    pub fn dims(&self) -> &[(String, ParamDomain)] {
        &self.dims
    }

    /// Draw one configuration uniformly from the space.
    pub fn sample(&self, rng: &mut StdRng) -> ParamMap {
        self.dims
            .iter()
            .map(|(name, domain)| (name.clone(), domain.sample(rng)))
            .collect()
    }

    /// Mean per-dimension distance between two configurations.
    #[must_use]
    pub fn distance(&self, a: &ParamMap, b: &ParamMap) -> f64 {
        if self.dims.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .dims
            .iter()
            .map(|(name, domain)| match (a.get(name), b.get(name)) {
                (Some(av), Some(bv)) => domain.distance(av, bv),
                _ => 1.0,
            })
            .sum();
        total / self.dims.len() as f64
    }

    /// Reject empty or malformed spaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty space or a degenerate domain.
    pub fn validate(&self) -> Result<()> {
        if self.dims.is_empty() {
            return Err(Error::Config(
                "bayesian search needs at least one domain".to_string(),
            ));
        }
        for (name, domain) in &self.dims {
            domain.validate(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_grid_cartesian_product() {
        let grid = ParamGrid::new()
            .add("x", vec![ParamValue::Int(1), ParamValue::Int(2)])
            .add("y", vec![ParamValue::Int(10), ParamValue::Int(20)]);

        assert_eq!(grid.size(), 4);
        let combos = grid.combinations();
        assert_eq!(combos.len(), 4);
        // First axis varies slowest
        assert_eq!(combos[0]["x"], ParamValue::Int(1));
        assert_eq!(combos[0]["y"], ParamValue::Int(10));
        assert_eq!(combos[3]["x"], ParamValue::Int(2));
        assert_eq!(combos[3]["y"], ParamValue::Int(20));
    }

    #[test]
    fn test_grid_validation() {
        assert!(ParamGrid::new().validate().is_err());
        let empty_axis = ParamGrid::new().add("x", vec![]);
        assert!(empty_axis.validate().is_err());
    }

    #[test]
    fn test_distribution_samples_in_domain() {
        let mut rng = StdRng::seed_from_u64(7);
        let dists = [
            ParamDistribution::Uniform { low: 0.5, high: 2.5 },
            ParamDistribution::LogUniform {
                low: 1e-4,
                high: 1e-1,
            },
            ParamDistribution::IntRange { low: 2, high: 9 },
            ParamDistribution::Choice {
                values: vec![ParamValue::Str("a".into()), ParamValue::Str("b".into())],
            },
        ];
        for dist in &dists {
            for _ in 0..100 {
                let v = dist.sample(&mut rng);
                assert!(dist.contains(&v), "{v} outside {dist:?}");
            }
        }
    }

    #[test]
    fn test_seeded_sampling_reproducible() {
        let dists = ParamDistributions::new()
            .add("lr", ParamDistribution::LogUniform { low: 1e-4, high: 1.0 })
            .add("depth", ParamDistribution::IntRange { low: 1, high: 8 });

        let a: Vec<ParamMap> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..10).map(|_| dists.sample(&mut rng)).collect()
        };
        let b: Vec<ParamMap> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..10).map(|_| dists.sample(&mut rng)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_domain_distance() {
        let real = ParamDomain::Real {
            low: 0.0,
            high: 10.0,
            log_scale: false,
        };
        let d = real.distance(&ParamValue::Float(2.0), &ParamValue::Float(7.0));
        assert!((d - 0.5).abs() < 1e-12);

        let cat = ParamDomain::Categorical {
            values: vec![ParamValue::Str("rbf".into()), ParamValue::Str("linear".into())],
        };
        assert_eq!(
            cat.distance(&ParamValue::Str("rbf".into()), &ParamValue::Str("rbf".into())),
            0.0
        );
        assert_eq!(
            cat.distance(&ParamValue::Str("rbf".into()), &ParamValue::Str("linear".into())),
            1.0
        );
    }

    #[test]
    fn test_space_validation() {
        assert!(ParamSpace::new().validate().is_err());

        let bad = ParamSpace::new().add(
            "lr",
            ParamDomain::Real {
                low: 1.0,
                high: 0.5,
                log_scale: false,
            },
        );
        assert!(bad.validate().is_err());

        let bad_log = ParamSpace::new().add(
            "lr",
            ParamDomain::Real {
                low: 0.0,
                high: 1.0,
                log_scale: true,
            },
        );
        assert!(bad_log.validate().is_err());
    }
}
