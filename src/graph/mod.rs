// Data-flow substrate of the engine: ports carry values forward and errors
// backward, nodes transform them. Everything else in the crate is built on
// these two types.

pub mod node;
pub mod port;


pub use node::Node;
pub use port::{Port, PortRef};

/// Scalar type used throughout the engine. Parameters are serialized as
/// 32-bit floats, so this alias is fixed to `f32`.
pub type Float = f32;

/// Column vector of [`Float`] values.
pub type Vector = ndarray::Array1<Float>;

/// Matrix of [`Float`] values, stored row-major.
pub type Matrix = ndarray::Array2<Float>;
