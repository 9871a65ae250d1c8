//! The registration objective seen by the minimizers.
//!
//! The parameters are the coefficients of a [`SplineTransform`]; the
//! objective is the weighted cost list plus the transformation's own
//! smoothness penalty.

use tracing::trace;
use warpkit_core::SplineTransform;

use crate::error::Result;
use crate::metric::FullCostList;
use crate::optimizer::Problem;
use crate::progress::ProgressTracker;

/// Cost list and penalty over the coefficients of a spline transformation.
pub struct RegistrationProblem<'a, const D: usize> {
    costs: &'a FullCostList<D>,
    transform: &'a mut SplineTransform<D>,
    tracker: Option<&'a mut ProgressTracker>,
    penalty_gradient: Vec<f64>,
    value_evaluations: usize,
    gradient_evaluations: usize,
}

impl<'a, const D: usize> RegistrationProblem<'a, D> {
    /// The costs must already be set to the size of `transform`.
    pub fn new(costs: &'a FullCostList<D>, transform: &'a mut SplineTransform<D>) -> Self {
        let size = transform.degrees_of_freedom();
        Self {
            costs,
            transform,
            tracker: None,
            penalty_gradient: vec![0.0; size],
            value_evaluations: 0,
            gradient_evaluations: 0,
        }
    }

    pub(crate) fn with_tracker(mut self, tracker: &'a mut ProgressTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Number of value-only and gradient evaluations so far.
    pub fn evaluations(&self) -> (usize, usize) {
        (self.value_evaluations, self.gradient_evaluations)
    }

    fn record(&mut self, value: f64) {
        trace!(
            fe = self.value_evaluations,
            fg = self.gradient_evaluations,
            value,
            "registration cost"
        );
        if let Some(tracker) = self.tracker.as_deref_mut() {
            tracker.record(value);
        }
    }
}

impl<const D: usize> Problem for RegistrationProblem<'_, D> {
    fn size(&self) -> usize {
        self.transform.degrees_of_freedom()
    }

    fn f(&mut self, x: &[f64]) -> Result<f64> {
        self.transform.set_parameters(x)?;
        let value = self.costs.value(&*self.transform)? + self.transform.penalty_value();
        self.value_evaluations += 1;
        self.record(value);
        Ok(value)
    }

    fn fdf(&mut self, x: &[f64], g: &mut [f64]) -> Result<f64> {
        self.transform.set_parameters(x)?;
        let mut value = self.costs.evaluate(&*self.transform, g)?;
        if self.transform.penalty().is_some() {
            value += self
                .transform
                .penalty_value_and_gradient(&mut self.penalty_gradient);
            g.iter_mut()
                .zip(&self.penalty_gradient)
                .for_each(|(gi, pi)| *gi += pi);
        }
        self.value_evaluations += 1;
        self.gradient_evaluations += 1;
        self.record(value);
        Ok(value)
    }
}
