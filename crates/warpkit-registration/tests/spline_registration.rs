use std::sync::Arc;

use approx::assert_relative_eq;

use warpkit_core::{BoundaryKind, Image, SplineKernel, Transform};
use warpkit_registration::metric::{FullCostList, ImageFullCost, Ssd};
use warpkit_registration::optimizer::AdaptiveGradientDescent;
use warpkit_registration::{
    register_with_config, HistoryCallback, Minimizer, MultiResolutionRegistration, RegistrationConfig, Registry,
    SplineTransformFactory,
};

fn blob(size: [usize; 2], center: [f32; 2], sigma: f32) -> Image<2> {
    Image::from_fn(size, |[x, y]| {
        let dx = x as f32 - center[0];
        let dy = y as f32 - center[1];
        (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
    })
}

fn ssd_costs(moving: &Image<2>, reference: &Image<2>, factory: &SplineTransformFactory<2>) -> FullCostList<2> {
    let mut costs = FullCostList::new();
    costs.push(
        ImageFullCost::new(
            Ssd::default().into(),
            1.0,
            moving.clone(),
            reference.clone(),
            factory.kernel().clone(),
            factory.boundary(),
        )
        .unwrap(),
    );
    costs
}

#[test]
fn test_shifted_blob_registration_lowers_cost() {
    let size = [32, 32];
    let reference = blob(size, [16.0, 16.0], 4.0);
    let moving = blob(size, [17.5, 16.0], 4.0);

    let kernel = Arc::new(SplineKernel::bspline(3).unwrap());
    let factory = SplineTransformFactory::new([4.0, 4.0], kernel, BoundaryKind::Mirror).unwrap();

    let mut identity_costs = ssd_costs(&moving, &reference, &factory);
    identity_costs.set_size(size).unwrap();
    let initial = identity_costs.value(&factory.create(size).unwrap()).unwrap();
    assert!(initial > 0.0);

    let minimizer = Minimizer::from(AdaptiveGradientDescent::new(0.01, 1.0, 0.0, 0.0, 50).unwrap());
    let history = Arc::new(HistoryCallback::new());
    let mut registration = MultiResolutionRegistration::new(ssd_costs(&moving, &reference, &factory), minimizer, factory, 2)
        .unwrap()
        .with_progress(history.clone());
    let outcome = registration.run().unwrap();

    assert_eq!(outcome.levels.len(), 2);
    assert_eq!(outcome.levels[0].size, [16, 16]);
    assert_eq!(outcome.levels[1].size, [32, 32]);
    // the coarse grid is carried to the fine level and grown there
    assert!(!outcome.levels[0].refined);
    assert!(outcome.levels[1].refined);
    assert_eq!(outcome.levels[1].coefficient_size, [10, 10]);
    assert_eq!(outcome.transform.coefficient_size(), [10, 10]);
    assert_eq!(history.level_sizes(), vec![vec![16, 16], vec![32, 32], vec![32, 32]]);

    let final_value = outcome.levels[1].final_value().unwrap();
    assert!(final_value < initial, "{} >= {}", final_value, initial);
    assert_relative_eq!(identity_costs.value(&outcome.transform).unwrap(), final_value, max_relative = 1e-6);

    // reference points map towards the moving blob
    let u = outcome.transform.displacement_at([16.0, 16.0]);
    assert!(u[0] > 0.0, "{:?}", u);
}

#[test]
fn test_registration_from_json_config() {
    let size = [24, 24];
    let reference = blob(size, [12.0, 12.0], 3.0);
    let moving = blob(size, [13.0, 11.0], 3.0);
    let config = RegistrationConfig::from_json(
        r#"{
            "levels": 2,
            "transform": "spline:rate=4,penalty=[divcurl:weight=0.01]",
            "minimizer": "gsl:opt=cg-pr,iter=20",
            "refinement": "gsl:opt=simplex,iter=10",
            "costs": [{"cost": "ssd"}, {"cost": "lncc:w=2", "weight": 0.5}]
        }"#,
    )
    .unwrap();

    let outcome = register_with_config(&Registry::new(), &config, &moving, &reference).unwrap();
    assert_eq!(outcome.levels.len(), 2);
    assert!(outcome.transform.penalty().is_some());
    for level in &outcome.levels {
        // main minimizer and refinement, twice when the grid was refined
        let expected = if level.refined { 4 } else { 2 };
        assert_eq!(level.reports.len(), expected);
        assert!(level.reports.iter().all(|r| r.value.is_finite()));
    }
    assert_eq!(outcome.transform.size(), size);
}

#[test]
fn test_config_with_unknown_component_fails() {
    let image = blob([16, 16], [8.0, 8.0], 3.0);
    let config = RegistrationConfig {
        minimizer: "newton".to_string(),
        ..RegistrationConfig::default()
    };
    let err = register_with_config(&Registry::new(), &config, &image, &image).unwrap_err();
    assert!(err.is_invalid_argument(), "{}", err);
}
