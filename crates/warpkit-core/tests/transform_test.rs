use std::sync::Arc;

use approx::assert_abs_diff_eq;
use proptest::prelude::*;
use warpkit_core::image::GridIter;
use warpkit_core::interpolation::{BoundaryKind, SplineKernel};
use warpkit_core::transform::{SplineTransform, Transform};

fn transform_2d(range: [usize; 2], rate: f64, kernel: &str) -> SplineTransform<2> {
    let kernel = Arc::new(SplineKernel::parse(kernel).unwrap());
    SplineTransform::new(range, [rate; 2], kernel, BoundaryKind::Mirror).unwrap()
}

fn wavy_parameters(n: usize, amplitude: f64) -> Vec<f64> {
    (0..n).map(|i| amplitude * (0.9 * i as f64).sin()).collect()
}

#[test]
fn test_identity_has_zero_field() {
    let t = transform_2d([12, 10], 3.0, "bspline:d=3");
    assert_eq!(t.displacement_field().max_norm(), 0.0);
    assert_eq!(t.max_coefficient_norm(), 0.0);
    assert_eq!(t.transform_point([3.5, 2.0]), [3.5, 2.0]);
}

#[test]
fn test_set_parameters_rejects_wrong_length() {
    let mut t = transform_2d([12, 10], 3.0, "bspline:d=3");
    let n = t.degrees_of_freedom();
    assert!(t.set_parameters(&vec![0.0; n - 1]).is_err());
    assert!(t.set_parameters(&vec![0.0; n]).is_ok());
}

#[test]
fn test_upscale_identity_is_identity() {
    let t = transform_2d([9, 9], 2.0, "bspline:d=3");
    let up = t.upscale([17, 17]).unwrap();
    assert_eq!(up.range(), [17, 17]);
    assert_eq!(up.coefficient_size(), t.coefficient_size());
    assert_eq!(up.displacement_field().max_norm(), 0.0);
}

#[test]
fn test_upscale_preserves_relative_field() {
    let mut t = transform_2d([9, 9], 2.0, "bspline:d=3");
    let params = wavy_parameters(t.degrees_of_freedom(), 0.3);
    t.set_parameters(&params).unwrap();
    let up = t.upscale([17, 17]).unwrap();
    for [x, y] in GridIter::new([9, 9]) {
        let coarse = t.displacement_at([x as f64, y as f64]);
        let fine = up.displacement_at([2.0 * x as f64, 2.0 * y as f64]);
        assert_abs_diff_eq!(fine[0], 2.0 * coarse[0], epsilon = 1e-9);
        assert_abs_diff_eq!(fine[1], 2.0 * coarse[1], epsilon = 1e-9);
    }
}

#[test]
fn test_refine_reproduces_coarse_field() {
    let mut t = transform_2d([17, 17], 4.0, "bspline:d=3");
    let params = wavy_parameters(t.degrees_of_freedom(), 0.4);
    t.set_parameters(&params).unwrap();

    let mut up = t.upscale([33, 33]).unwrap();
    let before = up.displacement_field();
    let coarse_size = up.coefficient_size();

    assert!(up.refine().unwrap());
    assert_eq!(up.coefficient_size(), [11, 11]);
    assert_ne!(up.coefficient_size(), coarse_size);
    let after = up.displacement_field();
    for (a, b) in before.data().iter().zip(after.data()) {
        assert_abs_diff_eq!(a[0], b[0], epsilon = 0.02);
        assert_abs_diff_eq!(a[1], b[1], epsilon = 0.02);
    }
    assert!(!up.refine().unwrap());
}

#[test]
fn test_refine_keeps_translation_exact() {
    let t = transform_2d([9, 9], 2.0, "bspline:d=3");
    let mut constant = t.clone();
    let params: Vec<f64> = (0..t.degrees_of_freedom())
        .map(|i| if i % 2 == 0 { 1.5 } else { -0.5 })
        .collect();
    constant.set_parameters(&params).unwrap();
    let mut up = constant.upscale([17, 17]).unwrap();
    assert!(up.refine().unwrap());
    for v in up.displacement_field().data() {
        assert_abs_diff_eq!(v[0], 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(v[1], -1.0, epsilon = 1e-5);
    }
}

#[test]
fn test_3d_field_matches_pointwise() {
    let kernel = Arc::new(SplineKernel::omoms3());
    let mut t = SplineTransform::<3>::new([6, 5, 4], [2.0; 3], kernel, BoundaryKind::Mirror).unwrap();
    let params = wavy_parameters(t.degrees_of_freedom(), 0.5);
    t.set_parameters(&params).unwrap();
    let field = t.displacement_field();
    for [x, y, z] in GridIter::new([6, 5, 4]) {
        let u = t.displacement_at([x as f64, y as f64, z as f64]);
        let f = field.get([x, y, z]);
        for d in 0..3 {
            assert_abs_diff_eq!(f[d] as f64, u[d], epsilon = 1e-5);
        }
    }
}

proptest! {
    #[test]
    fn prop_parameters_round_trip(values in prop::collection::vec(-10.0f64..10.0, 128)) {
        // 8x8 coefficients, 2 components
        let mut t = transform_2d([16, 16], 3.0, "bspline:d=3");
        prop_assert_eq!(t.degrees_of_freedom(), values.len());
        t.set_parameters(&values).unwrap();
        prop_assert_eq!(t.get_parameters(), values);
    }

    #[test]
    fn prop_translate_is_adjoint(seed in 0u32..1000) {
        let mut t = transform_2d([10, 8], 2.0, "bspline:d=2");
        let n = t.degrees_of_freedom();
        let params: Vec<f64> = (0..n).map(|i| ((i as u32 * 31 + seed) % 17) as f64 / 17.0 - 0.5).collect();
        t.set_parameters(&params).unwrap();
        let force = warpkit_core::VectorField::from_fn([10, 8], |[x, y]| {
            warpkit_core::FVector::<2>::new(
                ((x as u32 * 7 + y as u32 + seed) % 5) as f32 - 2.0,
                ((x as u32 + 3 * y as u32 + seed) % 3) as f32 - 1.0,
            )
        });
        let mut g = vec![0.0; n];
        t.translate(&force, &mut g).unwrap();
        let lhs: f64 = g.iter().zip(&params).map(|(a, b)| a * b).sum();
        let rhs: f64 = t.displacement_field().data().iter().zip(force.data())
            .map(|(u, f)| u[0] as f64 * f[0] as f64 + u[1] as f64 * f[1] as f64)
            .sum();
        prop_assert!((lhs - rhs).abs() < 1e-3 * (1.0 + rhs.abs()));
    }
}
