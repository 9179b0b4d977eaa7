use crate::adapt::{
    candidate::CandList,
    estimator::{ErrorCombination, ReferenceEstimator},
    marking::MarkingStrategy,
    selector::{ErrorWeights, ProjBasedSelector},
    Adapt,
};
use crate::domain::{
    boundary::EssentialBCs,
    mesh::{p_refinement::PolyOrders, Mesh, MAX_POLYNOMIAL_ORDER},
    RefinementError, Space,
};
use crate::integration::forms::ProjNormType;
use crate::projection::OrthogonalProjection;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse configuration: {0}")]
    Parse(String),
    #[error("Unable to serialize configuration: {0}")]
    Serialize(String),
    #[error("threshold {threshold} is not valid for marking strategy {strategy}")]
    Threshold { strategy: MarkingStrategy, threshold: f64 },
    #[error("mesh regularity must be at least 1 (or unset for arbitrary hanging nodes)")]
    ZeroRegularity,
    #[error("candidate list {cand_list:?} has anisotropic splits, which can't be combined with mesh regularity {regularity}")]
    AnisotropicWithRegularity { cand_list: CandList, regularity: u8 },
    #[error("expansion order {order} is outside of 1..={max}")]
    OrderOutOfRange { order: u8, max: u8 },
    #[error("{name} must be positive (got {value})")]
    NonPositive { name: &'static str, value: f64 },
    #[error("adaptivity needs at least one field")]
    NoFields,
    #[error("expected {expected} fields but got {found}")]
    FieldCountMismatch { expected: usize, found: usize },
    #[error("single-mesh adaptivity requires every field to have the same mesh")]
    MeshesDiffer,
    #[error("{name} is {value}, but expansion orders can't exceed {max}")]
    OrderIncreaseOutOfRange { name: &'static str, value: u8, max: u8 },
    #[error("Unable to build the initial spaces: {0}")]
    InitialSpace(#[from] RefinementError),
}

/// Options of an adaptivity run
///
/// Loaded from TOML; every field has a default:
/// ```toml
/// initial_orders = [2]
/// init_ref_num = 0
/// multimesh = true
/// strategy = 0            # or "cumulative_fraction"
/// threshold = 0.3
/// cand_list = "hp_aniso"
/// conv_exp = 1.0
/// err_stop = 1.0          # percent
/// ndof_stop = 60000
/// order_increase = 1
/// max_order = 9
/// max_order_increase = 2
/// norm = "h1"
/// combination = "euclidean"
///
/// [error_weights]
/// h = 2.0
/// aniso = 1.4142135623730951
/// p = 1.0
/// ```
/// `mesh_regularity` and `max_iterations` are unbounded unless given.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptConfig {
    /// Initial expansion order of each field (a single entry applies to all fields)
    pub initial_orders: Vec<u8>,
    /// Number of uniform h-refinements applied to the initial mesh
    pub init_ref_num: usize,
    /// Independent meshes per field
    pub multimesh: bool,
    pub strategy: MarkingStrategy,
    pub threshold: f64,
    pub cand_list: CandList,
    /// Maximum level of hanging nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh_regularity: Option<u8>,
    /// Exponent of the DOF increase in candidate scores
    pub conv_exp: f64,
    /// Relative error tolerance (%)
    pub err_stop: f64,
    /// DOF ceiling of the working spaces
    pub ndof_stop: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    /// Order increase of the reference spaces
    pub order_increase: u8,
    pub max_order: u8,
    /// Largest order increase per direction considered by the selector
    pub max_order_increase: u8,
    pub norm: ProjNormType,
    pub combination: ErrorCombination,
    pub error_weights: ErrorWeights,
}

impl Default for AdaptConfig {
    fn default() -> Self {
        Self {
            initial_orders: vec![2],
            init_ref_num: 0,
            multimesh: true,
            strategy: MarkingStrategy::CumulativeFraction,
            threshold: 0.3,
            cand_list: CandList::HpAniso,
            mesh_regularity: None,
            conv_exp: 1.0,
            err_stop: 1.0,
            ndof_stop: 60000,
            max_iterations: None,
            order_increase: 1,
            max_order: 9,
            max_order_increase: 2,
            norm: ProjNormType::H1,
            combination: ErrorCombination::Euclidean,
            error_weights: ErrorWeights::default(),
        }
    }
}

impl AdaptConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Check the options on their own
    pub fn check(&self) -> Result<(), ConfigError> {
        let threshold_ok = match self.strategy {
            MarkingStrategy::CumulativeFraction | MarkingStrategy::RelativeToMax => {
                self.threshold > 0.0 && self.threshold <= 1.0
            }
            MarkingStrategy::AbsoluteThreshold => self.threshold > 0.0 && self.threshold.is_finite(),
        };
        if !threshold_ok {
            return Err(ConfigError::Threshold {
                strategy: self.strategy,
                threshold: self.threshold,
            });
        }

        match self.mesh_regularity {
            Some(0) => return Err(ConfigError::ZeroRegularity),
            Some(regularity) if self.cand_list.has_aniso_h() => {
                return Err(ConfigError::AnisotropicWithRegularity {
                    cand_list: self.cand_list,
                    regularity,
                })
            }
            _ => {}
        }

        if self.max_order == 0 || self.max_order > MAX_POLYNOMIAL_ORDER {
            return Err(ConfigError::OrderOutOfRange {
                order: self.max_order,
                max: MAX_POLYNOMIAL_ORDER,
            });
        }
        if self.initial_orders.is_empty() {
            return Err(ConfigError::NoFields);
        }
        if let Some(order) = self.initial_orders.iter().find(|o| **o == 0 || **o > self.max_order) {
            return Err(ConfigError::OrderOutOfRange {
                order: *order,
                max: self.max_order,
            });
        }

        for (name, value) in [
            ("order_increase", self.order_increase),
            ("max_order_increase", self.max_order_increase),
        ] {
            if value > MAX_POLYNOMIAL_ORDER {
                return Err(ConfigError::OrderIncreaseOutOfRange {
                    name,
                    value,
                    max: MAX_POLYNOMIAL_ORDER,
                });
            }
        }

        for (name, value) in [
            ("conv_exp", self.conv_exp),
            ("err_stop", self.err_stop),
            ("ndof_stop", self.ndof_stop as f64),
            ("max_order_increase", self.max_order_increase as f64),
            ("error_weights.h", self.error_weights.h),
            ("error_weights.aniso", self.error_weights.aniso),
            ("error_weights.p", self.error_weights.p),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if self.max_iterations == Some(0) {
            return Err(ConfigError::NonPositive {
                name: "max_iterations",
                value: 0.0,
            });
        }

        Ok(())
    }

    /// Check the options against the working spaces of a run
    pub fn validate(&self, spaces: &[Space]) -> Result<(), ConfigError> {
        self.check()?;

        if spaces.is_empty() {
            return Err(ConfigError::NoFields);
        }
        if self.initial_orders.len() != 1 && self.initial_orders.len() != spaces.len() {
            return Err(ConfigError::FieldCountMismatch {
                expected: self.initial_orders.len(),
                found: spaces.len(),
            });
        }
        if !self.multimesh && spaces.windows(2).any(|pair| !pair[0].mesh().same_structure(pair[1].mesh())) {
            return Err(ConfigError::MeshesDiffer);
        }

        let [ni, nj] = spaces
            .iter()
            .map(|space| space.mesh().max_expansion_orders())
            .fold([0, 0], |[a, b], [c, d]| [a.max(c), b.max(d)]);
        if ni.max(nj) > self.max_order {
            return Err(ConfigError::OrderOutOfRange {
                order: ni.max(nj),
                max: self.max_order,
            });
        }

        Ok(())
    }

    /// Initial expansion order of one field
    pub fn initial_order(&self, field: usize) -> u8 {
        self.initial_orders
            .get(field)
            .or_else(|| self.initial_orders.first())
            .copied()
            .unwrap_or(1)
    }

    /// Build one working Space per set of essential boundary conditions, with the configured initial orders
    ///
    /// The mesh is uniformly refined `init_ref_num` times first.
    pub fn initial_spaces(&self, mesh: &Mesh, essential: Vec<EssentialBCs>) -> Result<Vec<Space>, ConfigError> {
        self.check()?;

        let mut mesh = mesh.clone();
        for _ in 0..self.init_ref_num {
            mesh.global_h_refinement().map_err(RefinementError::from)?;
        }

        essential
            .into_iter()
            .enumerate()
            .map(|(field, bcs)| {
                let order = self.initial_order(field);
                Space::new(mesh.clone(), PolyOrders::iso(order), bcs).map_err(|err| match err {
                    RefinementError::P(_) => ConfigError::OrderOutOfRange {
                        order,
                        max: self.max_order,
                    },
                    other => ConfigError::InitialSpace(other),
                })
            })
            .collect()
    }

    pub fn selector(&self) -> ProjBasedSelector {
        let mut selector = ProjBasedSelector::new(self.cand_list, self.conv_exp, self.max_order);
        selector.max_order_increase = self.max_order_increase;
        selector.weights = self.error_weights;
        selector.norm = self.norm;
        selector
    }

    /// The mark-and-refine pass described by these options
    pub fn adapt(&self) -> Adapt {
        Adapt {
            selector: self.selector(),
            strategy: self.strategy,
            threshold: self.threshold,
            multimesh: self.multimesh,
            regularity: self.mesh_regularity,
        }
    }

    pub fn projector(&self) -> OrthogonalProjection {
        OrthogonalProjection::new(self.norm)
    }

    pub fn estimator(&self) -> ReferenceEstimator {
        ReferenceEstimator::new(self.norm, self.combination)
    }
}
