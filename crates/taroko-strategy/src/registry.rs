//! Catalogue of buildable strategies.
//!
//! The registry maps a family name + parameter map to a fresh boxed
//! instance. The same entry points serve the `/set-main-strategy` command,
//! shadow-slot construction from `strategy_config` rows, and the
//! walk-forward grid.

use std::collections::BTreeMap;

use crate::strategies::{ChannelBreakoutStrategy, MeanReversionStrategy, MomentumStrategy};
use crate::types::Strategy;

/// Errors from strategy construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    UnknownStrategy { name: String },
    BadParameter { name: String, parameter: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::UnknownStrategy { name } => {
                write!(f, "unknown strategy '{name}'")
            }
            RegistryError::BadParameter { name, parameter } => {
                write!(f, "strategy '{name}': invalid parameter '{parameter}'")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// The buildable family names, in stable order.
pub fn strategy_names() -> &'static [&'static str] {
    &["momentum", "mean_reversion", "breakout"]
}

/// Build a fresh strategy instance from a family name and parameter map.
/// Missing parameters fall back to the family defaults; non-positive
/// lookbacks are rejected.
pub fn build_strategy(
    name: &str,
    params: &BTreeMap<String, f64>,
) -> Result<Box<dyn Strategy>, RegistryError> {
    let lookback = |key: &str, default: f64| -> Result<usize, RegistryError> {
        let v = params.get(key).copied().unwrap_or(default);
        if v < 1.0 || v > 10_000.0 {
            return Err(RegistryError::BadParameter {
                name: name.to_string(),
                parameter: key.to_string(),
            });
        }
        Ok(v as usize)
    };

    match name {
        "momentum" => {
            let lb = lookback("lookback", 20.0)?;
            let threshold = params.get("threshold_pct").copied().unwrap_or(1.0);
            if threshold <= 0.0 {
                return Err(RegistryError::BadParameter {
                    name: name.to_string(),
                    parameter: "threshold_pct".to_string(),
                });
            }
            Ok(Box::new(MomentumStrategy::new(lb, threshold)))
        }
        "mean_reversion" => {
            let lb = lookback("lookback", 20.0)?;
            let z_entry = params.get("z_entry").copied().unwrap_or(2.0);
            let z_exit = params.get("z_exit").copied().unwrap_or(0.5);
            if z_entry <= 0.0 || z_exit < 0.0 || z_exit >= z_entry {
                return Err(RegistryError::BadParameter {
                    name: name.to_string(),
                    parameter: "z_entry/z_exit".to_string(),
                });
            }
            Ok(Box::new(MeanReversionStrategy::new(lb, z_entry, z_exit)))
        }
        "breakout" => {
            let lb = lookback("lookback", 55.0)?;
            let exit_lb = lookback("exit_lookback", 20.0)?;
            Ok(Box::new(ChannelBreakoutStrategy::new(lb, exit_lb)))
        }
        other => Err(RegistryError::UnknownStrategy {
            name: other.to_string(),
        }),
    }
}

/// The grid-search parameter space per family, used by the walk-forward
/// optimizer. Order is deterministic.
pub fn param_grid(name: &str) -> Vec<BTreeMap<String, f64>> {
    fn map(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    match name {
        "momentum" => {
            let mut grid = Vec::new();
            for lb in [10.0, 20.0, 40.0] {
                for th in [0.5, 1.0, 2.0] {
                    grid.push(map(&[("lookback", lb), ("threshold_pct", th)]));
                }
            }
            grid
        }
        "mean_reversion" => {
            let mut grid = Vec::new();
            for lb in [10.0, 20.0, 40.0] {
                for z in [1.5, 2.0, 2.5] {
                    grid.push(map(&[("lookback", lb), ("z_entry", z), ("z_exit", 0.5)]));
                }
            }
            grid
        }
        "breakout" => {
            let mut grid = Vec::new();
            for lb in [20.0, 55.0] {
                for ex in [10.0, 20.0] {
                    grid.push(map(&[("lookback", lb), ("exit_lookback", ex)]));
                }
            }
            grid
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_every_listed_family_with_defaults() {
        for name in strategy_names() {
            let s = build_strategy(name, &BTreeMap::new()).unwrap();
            assert!(!s.name().is_empty());
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = match build_strategy("martingale", &BTreeMap::new()) {
            Err(e) => e,
            Ok(_) => panic!("expected build_strategy to reject an unknown strategy name"),
        };
        assert_eq!(
            err,
            RegistryError::UnknownStrategy {
                name: "martingale".to_string()
            }
        );
    }

    #[test]
    fn bad_lookback_is_rejected() {
        let params = BTreeMap::from([("lookback".to_string(), 0.0)]);
        assert!(build_strategy("momentum", &params).is_err());
    }

    #[test]
    fn z_exit_must_stay_below_z_entry() {
        let params = BTreeMap::from([
            ("z_entry".to_string(), 1.0),
            ("z_exit".to_string(), 1.5),
        ]);
        assert!(build_strategy("mean_reversion", &params).is_err());
    }

    #[test]
    fn grids_are_nonempty_and_deterministic() {
        for name in strategy_names() {
            let a = param_grid(name);
            let b = param_grid(name);
            assert!(!a.is_empty());
            assert_eq!(a, b);
        }
        assert_eq!(param_grid("momentum").len(), 9);
        assert!(param_grid("unknown").is_empty());
    }

    #[test]
    fn grid_entries_all_build() {
        for name in strategy_names() {
            for params in param_grid(name) {
                assert!(build_strategy(name, &params).is_ok());
            }
        }
    }
}
