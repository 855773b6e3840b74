use sofast_core::synthetic::SyntheticScene;
use sofast_core::{iso_from_rt, Iso3, Pt2, Real, Rot3, SurfaceModel, SurfaceShape, Vec3};
use sofast_optim::{SlopeSolver, SlopeSolverInput, SlopeSolverOptions};

/// Trace a pixel grid off `shape` placed at `surface_to_optic` and build the
/// solver input in the optic frame.
fn traced_input(shape: &SurfaceShape, surface_to_optic: &Iso3, seed: SurfaceModel) -> SlopeSolverInput {
    let scene = SyntheticScene::facing_camera().unwrap();
    let orient = scene.orientation.with_optic(scene.optic_to_cam);
    let screen_to_optic = orient.screen_to_optic();

    let mut rays = Vec::new();
    let mut screens = Vec::new();
    for py in (150..=330).step_by(15) {
        for px in (230..=410).step_by(15) {
            let pixel = Pt2::new(px as Real, py as Real);
            let traced = scene.trace_pixel(shape, surface_to_optic, &pixel).unwrap();
            rays.push(traced.ray_optic);
            screens.push(screen_to_optic * traced.screen_point_screen);
        }
    }

    let measure = scene
        .trace_pixel(shape, surface_to_optic, &Pt2::new(320.0, 240.0))
        .unwrap();
    SlopeSolverInput {
        surface: seed,
        v_optic_cam_optic: orient.camera_position_optic().coords,
        u_active_pixel_pointing_optic: rays,
        v_screen_points_facet: screens,
        v_optic_screen_optic: orient.screen_origin_optic().coords,
        v_align_point_optic: Vec3::zeros(),
        u_measure_pixel_pointing_optic: measure.ray_optic,
        dist_optic_screen: scene.distance_to_screen(&measure.surface_point_optic),
    }
}

#[test]
fn flat_tilted_mirror_round_trip() {
    let truth = iso_from_rt(
        &Rot3::from_euler_angles(0.0, 0.004, 0.0),
        &Vec3::new(0.0, 0.0, 0.8),
    );
    let input = traced_input(&SurfaceShape::Plano, &truth, SurfaceModel::plano(false, 1));
    let n = input.u_active_pixel_pointing_optic.len();

    let data = SlopeSolver::new(input, SlopeSolverOptions::default())
        .unwrap()
        .solve()
        .unwrap();

    assert_eq!(data.slopes_facet_xy.len(), n);
    assert!(data.coarse_converged);
    assert!(data.fine_converged);
    for s in &data.slopes_facet_xy {
        assert!(s.norm() < 1e-6, "slope {s}");
    }
    assert!(data.rms_residual < 1e-8, "rms {}", data.rms_residual);
    let angle = data.trans_alignment.rotation.angle_to(&truth.rotation);
    assert!(angle < 1e-6, "tilt error {angle}");
    // The measure point sits on the optic z axis, so the piston is recovered there.
    assert!((data.trans_alignment.translation.vector.z - 0.8).abs() < 1e-3);
}

#[test]
fn parabolic_coefficients_are_recovered() {
    let f_true = 2000.0;
    let a_true = 0.25 / f_true;
    let shape = SurfaceShape::Parabolic {
        a: a_true,
        b: a_true,
    };
    let truth = iso_from_rt(
        &Rot3::from_euler_angles(0.002, 0.0, 0.0),
        &Vec3::new(0.0, 0.0, 0.5),
    );
    let seed = SurfaceModel::parabolic((1500.0, 1500.0), false, 1);
    let input = traced_input(&shape, &truth, seed);

    let data = SlopeSolver::new(input, SlopeSolverOptions::default())
        .unwrap()
        .solve()
        .unwrap();
    assert!(data.fine_converged);

    let (fx, fy) = data.surface.focal_lengths().unwrap();
    assert!((fx - f_true).abs() / f_true < 0.02, "fx {fx}");
    assert!((fy - f_true).abs() / f_true < 0.02, "fy {fy}");

    for (p, s) in data.v_surf_points_facet.iter().zip(&data.slopes_facet_xy) {
        let expected = shape.gradient(p.x, p.y);
        assert!((s - expected).norm() < 5e-4, "p={p} s={s} expected={expected}");
    }
    assert!(data.trans_alignment.rotation.angle_to(&truth.rotation) < 5e-4);
}

#[test]
fn coarse_only_matches_refined_on_flat_mirror() {
    let truth = iso_from_rt(
        &Rot3::from_euler_angles(-0.003, 0.001, 0.0),
        &Vec3::new(0.0, 0.0, -0.4),
    );
    let input = traced_input(&SurfaceShape::Plano, &truth, SurfaceModel::plano(true, 2));
    let opts = SlopeSolverOptions {
        joint_refine: false,
        ..SlopeSolverOptions::default()
    };
    let data = SlopeSolver::new(input, opts).unwrap().solve().unwrap();
    assert!(!data.fine_converged);
    assert!(data.coarse_iterations >= 1);
    assert!(data.trans_alignment.rotation.angle_to(&truth.rotation) < 1e-6);
}

#[test]
fn capped_joint_refinement_is_not_reported_converged() {
    let f_true = 2000.0;
    let a_true = 0.25 / f_true;
    let shape = SurfaceShape::Parabolic {
        a: a_true,
        b: a_true,
    };
    let truth = iso_from_rt(
        &Rot3::from_euler_angles(0.002, 0.0, 0.0),
        &Vec3::new(0.0, 0.0, 0.5),
    );
    let seed = SurfaceModel::parabolic((1500.0, 1500.0), false, 1);
    let mut opts = SlopeSolverOptions {
        coarse_max_iters: 0,
        ..SlopeSolverOptions::default()
    };
    opts.fine.max_iters = 1;

    let data = SlopeSolver::new(traced_input(&shape, &truth, seed), opts)
        .unwrap()
        .solve()
        .unwrap();
    assert!(!data.coarse_converged);
    assert!(!data.fine_converged);
}

#[test]
fn unmeasured_screen_point_is_an_input_error() {
    let truth = iso_from_rt(&Rot3::identity(), &Vec3::new(0.0, 0.0, 0.2));
    let mut input = traced_input(&SurfaceShape::Plano, &truth, SurfaceModel::plano(false, 1));
    input.v_screen_points_facet[5] = sofast_core::Pt3::new(Real::NAN, Real::NAN, Real::NAN);
    assert!(SlopeSolver::new(input, SlopeSolverOptions::default()).is_err());
}
