//! Weight initialization utilities.
//!
//! The random source is an explicit, seedable generator handle instead of a
//! process-global one, so that two networks built with the same seed start
//! from identical weights and tests are reproducible.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};

use crate::graph::{Float, Matrix, Vector};

/// Shared handle to the random generator used for weight initialization.
/// Every trainable node built from the same handle draws from the same
/// underlying stream.
pub type RngHandle = Rc<RefCell<StdRng>>;

/// Create a generator handle with a fixed seed, for reproducible runs.
pub fn seeded(seed: u64) -> RngHandle {
    Rc::new(RefCell::new(StdRng::seed_from_u64(seed)))
}

/// Create a generator handle seeded from the operating system.
pub fn from_entropy() -> RngHandle {
    Rc::new(RefCell::new(StdRng::from_os_rng()))
}

/// Matrix with entries drawn uniformly from `(-scale, scale)`.
pub fn uniform_matrix(rows: usize, cols: usize, scale: Float, rng: &mut StdRng) -> Matrix {
    let uniform = Uniform::new(-scale, scale).unwrap();

    Matrix::from_shape_fn((rows, cols), |_| uniform.sample(rng))
}

/// Vector with entries drawn uniformly from `(-scale, scale)`.
pub fn uniform_vector(len: usize, scale: Float, rng: &mut StdRng) -> Vector {
    let uniform = Uniform::new(-scale, scale).unwrap();

    Vector::from_shape_fn(len, |_| uniform.sample(rng))
}
