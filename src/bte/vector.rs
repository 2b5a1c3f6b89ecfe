//! Vector over (calculation, Cartesian direction, state).
//!
//! Storage is contiguous: calculation-major, then direction, then state.
//! Binary operators require identical shapes and assert on mismatch.

use crate::bte::statistics::PopulationFactors;
use faer::Mat;
use serde::Serialize;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Number of Cartesian directions carried by every vector.
pub const DIMENSIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorBte {
    num_calcs: usize,
    num_states: usize,
    data: Vec<f64>,
}

impl VectorBte {
    pub fn zeros(num_calcs: usize, num_states: usize) -> Self {
        Self { num_calcs, num_states, data: vec![0.0; num_calcs * DIMENSIONS * num_states] }
    }

    pub fn from_fn<F>(num_calcs: usize, num_states: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize) -> f64,
    {
        let mut data = Vec::with_capacity(num_calcs * DIMENSIONS * num_states);
        for c in 0..num_calcs {
            for d in 0..DIMENSIONS {
                for s in 0..num_states {
                    data.push(f(c, d, s));
                }
            }
        }
        Self { num_calcs, num_states, data }
    }

    /// Wraps a buffer laid out as `data[(c * 3 + d) * num_states + s]`.
    pub fn from_vec(num_calcs: usize, num_states: usize, data: Vec<f64>) -> Self {
        assert_eq!(
            data.len(),
            num_calcs * DIMENSIONS * num_states,
            "buffer length does not match {num_calcs} calcs x {num_states} states"
        );
        Self { num_calcs, num_states, data }
    }

    pub fn num_calcs(&self) -> usize {
        self.num_calcs
    }
    pub fn num_states(&self) -> usize {
        self.num_states
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn offset(&self, calc: usize, dir: usize) -> usize {
        (calc * DIMENSIONS + dir) * self.num_states
    }

    pub fn get(&self, calc: usize, dir: usize, state: usize) -> f64 {
        self.data[self.offset(calc, dir) + state]
    }

    pub fn set(&mut self, calc: usize, dir: usize, state: usize, value: f64) {
        let at = self.offset(calc, dir) + state;
        self.data[at] = value;
    }

    /// States of one (calculation, direction) pair.
    pub fn slice(&self, calc: usize, dir: usize) -> &[f64] {
        let at = self.offset(calc, dir);
        &self.data[at..at + self.num_states]
    }

    pub fn slice_mut(&mut self, calc: usize, dir: usize) -> &mut [f64] {
        let at = self.offset(calc, dir);
        &mut self.data[at..at + self.num_states]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn same_shape(&self, other: &VectorBte) -> bool {
        self.num_calcs == other.num_calcs && self.num_states == other.num_states
    }

    fn assert_same_shape(&self, other: &VectorBte) {
        assert!(
            self.same_shape(other),
            "vector shape mismatch: {}x{} vs {}x{}",
            self.num_calcs,
            self.num_states,
            other.num_calcs,
            other.num_states
        );
    }

    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        Self {
            num_calcs: self.num_calcs,
            num_states: self.num_states,
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    pub fn zip_map<F: Fn(f64, f64) -> f64>(&self, other: &VectorBte, f: F) -> Self {
        self.assert_same_shape(other);
        Self {
            num_calcs: self.num_calcs,
            num_states: self.num_states,
            data: self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect(),
        }
    }

    /// One inner product per (calculation, direction), as a `num_calcs x 3` matrix.
    pub fn dot(&self, other: &VectorBte) -> Mat<f64> {
        self.assert_same_shape(other);
        Mat::from_fn(self.num_calcs, DIMENSIONS, |c, d| {
            self.slice(c, d).iter().zip(other.slice(c, d)).map(|(a, b)| a * b).sum()
        })
    }

    /// Max-norm per (calculation, direction).
    pub fn max_norm(&self) -> Mat<f64> {
        Mat::from_fn(self.num_calcs, DIMENSIONS, |c, d| {
            self.slice(c, d).iter().fold(0.0f64, |m, x| m.max(x.abs()))
        })
    }

    pub fn sqrt(&self) -> Self {
        self.map(f64::sqrt)
    }

    /// Elementwise `1/x`, with zero (or non-finite) entries mapped to zero.
    pub fn reciprocal_or_zero(&self) -> Self {
        self.map(|x| {
            let r = 1.0 / x;
            if x != 0.0 && r.is_finite() { r } else { 0.0 }
        })
    }

    /// Multiplies each (calculation, direction) block by `scale[(c, d)]`.
    pub fn scale_by(&self, scale: &Mat<f64>) -> Self {
        assert_eq!(scale.nrows(), self.num_calcs, "scale rows must match calculations");
        assert_eq!(scale.ncols(), DIMENSIONS, "scale columns must match directions");
        let mut out = self.clone();
        for c in 0..self.num_calcs {
            for d in 0..DIMENSIONS {
                let k = scale[(c, d)];
                out.slice_mut(c, d).iter_mut().for_each(|x| *x *= k);
            }
        }
        out
    }

    fn with_factors<F: Fn(f64, f64) -> f64>(&self, factors: &PopulationFactors, f: F) -> Self {
        assert_eq!(factors.num_calcs(), self.num_calcs, "factor table calculations");
        assert_eq!(factors.num_states(), self.num_states, "factor table states");
        let mut out = self.clone();
        for c in 0..self.num_calcs {
            for d in 0..DIMENSIONS {
                for (s, x) in out.slice_mut(c, d).iter_mut().enumerate() {
                    let n = factors.get(c, s);
                    *x = if n > 0.0 { f(*x, n) } else { 0.0 };
                }
            }
        }
        out
    }

    /// Population deviation `dn` to canonical `f = dn / N`.
    pub fn population_to_canonical(&self, factors: &PopulationFactors) -> Self {
        self.with_factors(factors, |x, n| x / n)
    }

    /// Canonical `f` to population deviation `dn = N f`.
    pub fn canonical_to_population(&self, factors: &PopulationFactors) -> Self {
        self.with_factors(factors, |x, n| x * n)
    }
}

macro_rules! impl_elementwise {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait<&VectorBte> for &VectorBte {
            type Output = VectorBte;
            fn $method(self, rhs: &VectorBte) -> VectorBte {
                self.zip_map(rhs, |a, b| a $op b)
            }
        }
        impl $trait<VectorBte> for VectorBte {
            type Output = VectorBte;
            fn $method(self, rhs: VectorBte) -> VectorBte {
                (&self).$method(&rhs)
            }
        }
        impl $trait<&VectorBte> for VectorBte {
            type Output = VectorBte;
            fn $method(self, rhs: &VectorBte) -> VectorBte {
                (&self).$method(rhs)
            }
        }
        impl $trait<VectorBte> for &VectorBte {
            type Output = VectorBte;
            fn $method(self, rhs: VectorBte) -> VectorBte {
                self.$method(&rhs)
            }
        }
    };
}

impl_elementwise!(Add, add, +);
impl_elementwise!(Sub, sub, -);
impl_elementwise!(Mul, mul, *);
impl_elementwise!(Div, div, /);

impl Mul<f64> for &VectorBte {
    type Output = VectorBte;
    fn mul(self, k: f64) -> VectorBte {
        self.map(|x| x * k)
    }
}

impl Mul<f64> for VectorBte {
    type Output = VectorBte;
    fn mul(mut self, k: f64) -> VectorBte {
        self.data.iter_mut().for_each(|x| *x *= k);
        self
    }
}

impl Neg for &VectorBte {
    type Output = VectorBte;
    fn neg(self) -> VectorBte {
        self.map(|x| -x)
    }
}

impl Neg for VectorBte {
    type Output = VectorBte;
    fn neg(mut self) -> VectorBte {
        self.data.iter_mut().for_each(|x| *x = -*x);
        self
    }
}
