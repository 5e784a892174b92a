// Transform primitives and the containers that compose them. Every type in
// this module implements the Node contract from crate::graph.

pub mod activation;
pub mod container;
pub mod dense;
pub mod merge;
pub mod recurrent;

mod tests;

pub use activation::{
    Activation, ActivationFn, LinearActivation, OneMinusActivation, SigmoidActivation,
    TanhActivation,
};
pub use container::NetworkNode;
pub use dense::Dense;
pub use merge::{MergeProduct, MergeSum};
pub use recurrent::{BpttVariant, RecurrentNetworkNode};
