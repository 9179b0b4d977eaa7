use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors within this relative distance of the last marked error are marked along with it
const TIE_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown marking strategy '{0}' (expected 0, 1, 2, cumulative_fraction, relative_to_max or absolute_threshold)")]
pub struct UnknownStrategy(pub String);

/// Rule used to decide which Elems are refined
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StrategyRepr", into = "u8")]
pub enum MarkingStrategy {
    /// 0: mark the largest errors until `sqrt(threshold)` of the total has been processed; ties stay together
    #[default]
    CumulativeFraction,
    /// 1: mark errors of at least `threshold` times the largest error
    RelativeToMax,
    /// 2: mark errors of at least `threshold`
    AbsoluteThreshold,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StrategyRepr {
    Index(u8),
    Name(String),
}

impl TryFrom<StrategyRepr> for MarkingStrategy {
    type Error = UnknownStrategy;

    fn try_from(repr: StrategyRepr) -> Result<Self, Self::Error> {
        match repr {
            StrategyRepr::Index(index) => Self::try_from(index),
            StrategyRepr::Name(name) => name.parse(),
        }
    }
}

impl TryFrom<u8> for MarkingStrategy {
    type Error = UnknownStrategy;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        match index {
            0 => Ok(Self::CumulativeFraction),
            1 => Ok(Self::RelativeToMax),
            2 => Ok(Self::AbsoluteThreshold),
            _ => Err(UnknownStrategy(index.to_string())),
        }
    }
}

impl From<MarkingStrategy> for u8 {
    fn from(strategy: MarkingStrategy) -> Self {
        match strategy {
            MarkingStrategy::CumulativeFraction => 0,
            MarkingStrategy::RelativeToMax => 1,
            MarkingStrategy::AbsoluteThreshold => 2,
        }
    }
}

impl FromStr for MarkingStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cumulative_fraction" => Ok(Self::CumulativeFraction),
            "relative_to_max" => Ok(Self::RelativeToMax),
            "absolute_threshold" => Ok(Self::AbsoluteThreshold),
            _ => s
                .parse::<u8>()
                .map_err(|_| UnknownStrategy(s.to_string()))
                .and_then(Self::try_from),
        }
    }
}

impl fmt::Display for MarkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CumulativeFraction => "cumulative_fraction",
            Self::RelativeToMax => "relative_to_max",
            Self::AbsoluteThreshold => "absolute_threshold",
        };
        write!(f, "{} ({})", name, u8::from(*self))
    }
}

impl MarkingStrategy {
    /// Indices of the marked errors, largest error first (equal errors in ascending index order)
    pub fn mark(&self, errors: &[f64], threshold: f64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..errors.len()).filter(|i| errors[*i] > 0.0).collect();
        order.sort_by(|a, b| match errors[*b].total_cmp(&errors[*a]) {
            Ordering::Equal => a.cmp(b),
            other => other,
        });

        match self {
            Self::CumulativeFraction => {
                let total: f64 = errors.iter().filter(|e| **e > 0.0).sum();
                let mut processed = 0.0;
                let mut last_marked: Option<f64> = None;
                let mut marked = Vec::new();

                for idx in order {
                    let err = errors[idx];
                    if let Some(err0) = last_marked {
                        if processed > threshold.sqrt() * total && ((err - err0) / err0).abs() > TIE_TOLERANCE {
                            break;
                        }
                    }

                    last_marked = Some(last_marked.map_or(err, |err0| err0.min(err)));
                    processed += err;
                    marked.push(idx);
                }

                marked
            }
            Self::RelativeToMax => {
                let max = order.first().map(|idx| errors[*idx]).unwrap_or(0.0);
                order
                    .into_iter()
                    .take_while(|idx| errors[*idx] >= threshold * max)
                    .collect()
            }
            Self::AbsoluteThreshold => order
                .into_iter()
                .take_while(|idx| errors[*idx] >= threshold)
                .collect(),
        }
    }
}
