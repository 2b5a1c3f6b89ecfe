//! Distributed storage must reproduce local storage.
//!
//! Ranks are simulated with `ThreadComm`; every process count used here maps
//! to a valid near-square grid (1x1, 1x2, 2x2, 2x3).

mod common;

use common::{chain_bands, flatten, max_relative_error, weak_coupling};
use faer::{Mat, c64};
use rand::Rng;
use relaxon::bte::{CalcStatistics, StatisticsSweep, TabulatedCoupling, TransportSystem, VectorBte};
use relaxon::config::TransportOptions;
use relaxon::context::TransportContext;
use relaxon::core::{CouplingEvaluator, Op};
use relaxon::matrix::DistributedMatrix;
use relaxon::parallel::{SerialComm, ThreadComm};
use relaxon::scattering::{MatrixOptions, ScatteringMatrix};
use std::sync::atomic::{AtomicUsize, Ordering};

const PROCESS_COUNTS: [usize; 4] = [1, 2, 4, 6];

/// Counts the transition rates requested by all ranks together.
struct CountingCoupling {
    table: TabulatedCoupling,
    calls: AtomicUsize,
}

impl CouplingEvaluator for CountingCoupling {
    fn transition_rate(&self, calc: &CalcStatistics, i: usize, j: usize) -> f64 {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.table.transition_rate(calc, i, j)
    }
}

fn column_major(m: &Mat<f64>) -> Vec<f64> {
    (0..m.ncols()).flat_map(|j| (0..m.nrows()).map(move |i| m[(i, j)])).collect()
}

#[test]
fn real_prod_matches_local() {
    let mut rng = rand::thread_rng();
    let a = Mat::from_fn(9, 7, |_, _| rng.r#gen::<f64>() - 0.5);
    let b = Mat::from_fn(9, 5, |_, _| rng.r#gen::<f64>() - 0.5);
    let c = Mat::from_fn(5, 7, |_, _| rng.r#gen::<f64>() - 0.5);

    let serial = SerialComm;
    let la = DistributedMatrix::from_global(&serial, a.as_ref(), None).unwrap();
    let lb = DistributedMatrix::from_global(&serial, b.as_ref(), None).unwrap();
    let lc = DistributedMatrix::from_global(&serial, c.as_ref(), None).unwrap();
    let atb = column_major(&la.prod(&lb, Op::Trans, Op::NoTrans).unwrap().to_global().unwrap());
    let act = column_major(&la.prod(&lc, Op::NoTrans, Op::Trans).unwrap().to_global().unwrap());

    for p in PROCESS_COUNTS {
        for nb in [1, 3] {
            let results = ThreadComm::run(p, |comm| {
                let da = DistributedMatrix::from_global(comm, a.as_ref(), Some(nb)).unwrap();
                let db = DistributedMatrix::from_global(comm, b.as_ref(), Some(nb)).unwrap();
                let dc = DistributedMatrix::from_global(comm, c.as_ref(), Some(nb)).unwrap();
                let x = da.prod(&db, Op::Trans, Op::NoTrans).unwrap();
                let y = da.prod(&dc, Op::NoTrans, Op::Trans).unwrap();
                assert!(x.is_distributed());
                (column_major(&x.to_global().unwrap()), column_major(&y.to_global().unwrap()))
            });
            for (x, y) in results {
                let ex = max_relative_error(&x, &atb);
                let ey = max_relative_error(&y, &act);
                assert!(ex < 1e-10 && ey < 1e-10, "P = {p}, nb = {nb}: {ex} {ey}");
            }
        }
    }
}

#[test]
fn complex_adjoint_prod_matches_local() {
    let mut rng = rand::thread_rng();
    let a = Mat::from_fn(6, 6, |_, _| c64::new(rng.r#gen::<f64>(), rng.r#gen::<f64>()));
    let serial = SerialComm;
    let la = DistributedMatrix::from_global(&serial, a.as_ref(), None).unwrap();
    let reference = la.prod(&la, Op::Adjoint, Op::NoTrans).unwrap().to_global().unwrap();

    for p in PROCESS_COUNTS {
        let results = ThreadComm::run(p, |comm| {
            let da = DistributedMatrix::from_global(comm, a.as_ref(), Some(2)).unwrap();
            da.prod(&da, Op::Adjoint, Op::NoTrans).unwrap().to_global().unwrap()
        });
        for m in results {
            for j in 0..6 {
                for i in 0..6 {
                    let d = m[(i, j)] - reference[(i, j)];
                    assert!(d.re.hypot(d.im) < 1e-10, "P = {p} at ({i}, {j})");
                }
            }
        }
    }
}

#[test]
fn scattering_matrix_is_layout_independent() {
    let bands = chain_bands(5, 2);
    let sweep = StatisticsSweep::from_temperatures(&[0.9]);
    let system = TransportSystem::new(&sweep, &bands);
    let coupling = weak_coupling(10);
    let mut rng = rand::thread_rng();
    let trial = VectorBte::from_fn(1, 10, |_, _, _| rng.gen_range(-1.0..1.0));

    let base = MatrixOptions { boundary_length: Some(1.0), ..Default::default() };
    let serial = SerialComm;
    let mut reference = ScatteringMatrix::new(&serial, base, &system, &coupling).unwrap();
    reference.setup().unwrap();
    let ref_matrix = column_major(&reference.matrix().unwrap().to_global().unwrap());
    let ref_dot = reference.dot(&trial).unwrap().into_vec();
    let ref_diag = reference.diagonal().unwrap().clone().into_vec();

    for p in PROCESS_COUNTS {
        for block_size in [None, Some(1), Some(3)] {
            for use_symmetries in [false, true] {
                let options = MatrixOptions { block_size, use_symmetries, ..base };
                let results = ThreadComm::run(p, |comm| {
                    let mut sm = ScatteringMatrix::new(comm, options, &system, &coupling).unwrap();
                    sm.setup().unwrap();
                    let m = column_major(&sm.matrix().unwrap().to_global().unwrap());
                    let y = sm.dot(&trial).unwrap().into_vec();
                    let d = sm.diagonal().unwrap().clone().into_vec();
                    (m, y, d)
                });
                for (m, y, d) in results {
                    let label = format!("P = {p}, {block_size:?}, symmetries {use_symmetries}");
                    assert!(max_relative_error(&m, &ref_matrix) < 1e-10, "matrix, {label}");
                    assert!(max_relative_error(&y, &ref_dot) < 1e-10, "dot, {label}");
                    assert!(max_relative_error(&d, &ref_diag) < 1e-10, "diagonal, {label}");
                }
            }
        }
    }
}

#[test]
fn on_the_fly_products_are_rank_independent() {
    let bands = chain_bands(4, 2);
    let sweep = StatisticsSweep::from_temperatures(&[0.7, 1.3]);
    let system = TransportSystem::new(&sweep, &bands);
    let coupling = weak_coupling(8);
    let trial = VectorBte::from_fn(2, 8, |c, d, s| ((c + 2 * d + 3 * s) % 5) as f64 - 2.0);
    let options = MatrixOptions { in_memory: false, ..Default::default() };

    let serial = SerialComm;
    let mut reference = ScatteringMatrix::new(&serial, options, &system, &coupling).unwrap();
    reference.setup().unwrap();
    let expected = reference.dot(&trial).unwrap().into_vec();

    for p in [2, 3, 5] {
        let results = ThreadComm::run(p, |comm| {
            let mut sm = ScatteringMatrix::new(comm, options, &system, &coupling).unwrap();
            sm.setup().unwrap();
            sm.dot(&trial).unwrap().into_vec()
        });
        for y in results {
            assert!(max_relative_error(&y, &expected) < 1e-12, "P = {p}");
        }
    }
}

#[test]
fn full_run_matches_serial_on_a_process_grid() {
    let bands = chain_bands(4, 2);
    let sweep = StatisticsSweep::from_temperatures(&[1.0]);
    let system = TransportSystem::new(&sweep, &bands);
    let coupling = weak_coupling(8);
    let options = TransportOptions::default()
        .with_solvers(&["iterative", "variational", "relaxons"])
        .with_boundary_length(Some(0.8))
        .with_convergence(1e-10, 500);

    let serial = SerialComm;
    let reference = TransportContext::new(&serial, options.clone())
        .unwrap()
        .run(&system, &coupling)
        .unwrap();

    for p in [4, 6] {
        let distributed = options.clone().with_block_size(Some(2));
        let reports = ThreadComm::run(p, |comm| {
            TransportContext::new(comm, distributed.clone()).unwrap().run(&system, &coupling).unwrap()
        });
        for report in reports {
            for (got, want) in report.results.iter().zip(&reference.results) {
                assert_eq!(got.kind, want.kind);
                let err = max_relative_error(
                    &flatten(got.conductivity.tensor(0)),
                    &flatten(want.conductivity.tensor(0)),
                );
                assert!(err < 1e-8, "P = {p}, {:?}: {err}", got.kind);
            }
            let lifetimes = report.results[3].relaxation_times.as_ref().unwrap();
            let expected = reference.results[3].relaxation_times.as_ref().unwrap();
            assert!(max_relative_error(lifetimes, expected) < 1e-8, "P = {p}");
        }
    }
}

#[test]
fn symmetric_block_cyclic_assembly_splits_pairs_across_ranks() {
    let n = 10;
    let bands = chain_bands(5, 2);
    let sweep = StatisticsSweep::from_temperatures(&[0.9]);
    let system = TransportSystem::new(&sweep, &bands);
    let options = MatrixOptions { block_size: Some(2), use_symmetries: true, ..Default::default() };

    for p in PROCESS_COUNTS {
        let coupling = CountingCoupling { table: weak_coupling(n), calls: AtomicUsize::new(0) };
        let linewidths = ThreadComm::run(p, |comm| {
            let mut sm = ScatteringMatrix::new(comm, options, &system, &coupling).unwrap();
            sm.setup().unwrap();
            sm.linewidths(0).to_vec()
        });
        assert_eq!(coupling.calls.load(Ordering::Relaxed), n * (n - 1) / 2, "P = {p}");
        for lw in &linewidths[1..] {
            assert_eq!(lw, &linewidths[0]);
        }
    }
}
