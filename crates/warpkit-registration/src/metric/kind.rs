//! Closed set of image costs.

use warpkit_core::{Image, VectorField};

use super::lncc::Lncc;
use super::lsd::Lsd;
use super::mutual_information::MutualInformation;
use super::ssd::Ssd;
use super::trait_::ImageCost;
use crate::error::Result;

/// Any of the supported image costs.
#[derive(Debug, Clone)]
pub enum ImageCostKind {
    Ssd(Ssd),
    Mi(MutualInformation),
    Lncc(Lncc),
    Lsd(Lsd),
}

impl ImageCostKind {
    fn as_cost<const D: usize>(&self) -> &dyn ImageCost<D> {
        match self {
            ImageCostKind::Ssd(c) => c,
            ImageCostKind::Mi(c) => c,
            ImageCostKind::Lncc(c) => c,
            ImageCostKind::Lsd(c) => c,
        }
    }
}

impl From<Ssd> for ImageCostKind {
    fn from(cost: Ssd) -> Self {
        ImageCostKind::Ssd(cost)
    }
}

impl From<MutualInformation> for ImageCostKind {
    fn from(cost: MutualInformation) -> Self {
        ImageCostKind::Mi(cost)
    }
}

impl From<Lncc> for ImageCostKind {
    fn from(cost: Lncc) -> Self {
        ImageCostKind::Lncc(cost)
    }
}

impl From<Lsd> for ImageCostKind {
    fn from(cost: Lsd) -> Self {
        ImageCostKind::Lsd(cost)
    }
}

impl<const D: usize> ImageCost<D> for ImageCostKind {
    fn name(&self) -> &'static str {
        self.as_cost::<D>().name()
    }

    fn set_reference(&mut self, reference: &Image<D>) -> Result<()> {
        match self {
            ImageCostKind::Ssd(c) => ImageCost::<D>::set_reference(c, reference),
            ImageCostKind::Mi(c) => ImageCost::<D>::set_reference(c, reference),
            ImageCostKind::Lncc(c) => ImageCost::<D>::set_reference(c, reference),
            ImageCostKind::Lsd(c) => ImageCost::<D>::set_reference(c, reference),
        }
    }

    fn value(&self, moving: &Image<D>, reference: &Image<D>) -> Result<f64> {
        self.as_cost::<D>().value(moving, reference)
    }

    fn evaluate_force(
        &self,
        moving: &Image<D>,
        reference: &Image<D>,
        force: &mut VectorField<D>,
    ) -> Result<f64> {
        self.as_cost::<D>().evaluate_force(moving, reference, force)
    }
}
