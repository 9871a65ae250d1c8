//! Image costs.
//!
//! This module contains the similarity measures driving a registration and
//! the weighted cost list that carries them through the pyramid.

pub mod trait_;
pub mod ssd;
pub mod mutual_information;
pub mod lncc;
pub mod lsd;
pub mod kind;
pub mod cost_list;

pub use trait_::ImageCost;
pub use ssd::{AutoMask, Ssd};
pub use mutual_information::{MutualInformation, SplineParzenMi};
pub use lncc::Lncc;
pub use lsd::Lsd;
pub use kind::ImageCostKind;
pub use cost_list::{FullCostList, ImageFullCost};
