//! Deformable image registration.
//!
//! Two drivers are provided:
//!
//! * [`MultiResolutionRegistration`]: a B-spline transformation optimized
//!   coarse to fine against a weighted list of image costs, optionally with
//!   a coefficient penalty
//! * [`FluidRegistration`]: a dense displacement field driven by the cost
//!   force and smoothed by a Navier-Lamé solver
//!
//! Components can be built directly or resolved from descriptor strings
//! through a [`Registry`].

pub mod config;
pub mod error;
pub mod fluid;
pub mod metric;
pub mod multires;
pub mod optimizer;
pub mod progress;
pub mod registration;
pub mod registry;
pub mod regularization;
pub mod transform_factory;

pub use config::{CostConfig, FluidConfig, RegistrationConfig};
pub use error::{RegistrationError, Result};
pub use fluid::{FluidLevelReport, FluidOutcome, FluidRegistration};
pub use metric::{FullCostList, ImageCost, ImageCostKind, ImageFullCost, Lncc, Lsd, MutualInformation, Ssd};
pub use multires::{
    normalize_jointly, register_images, register_with_config, LevelReport, MultiResolutionRegistration,
    RegistrationOutcome,
};
pub use optimizer::{Minimizer, MinimizerReport, MinimizerStatus, Problem};
pub use progress::{ConsoleProgressCallback, HistoryCallback, ProgressCallback, ProgressInfo};
pub use registration::RegistrationProblem;
pub use registry::Registry;
pub use regularization::{DivCurlPenalty, NavierSolver};
pub use transform_factory::SplineTransformFactory;
