//! # recnet
//!
//! recnet is a small differentiable computation-graph engine for training
//! recurrent and feed-forward models by gradient descent, written in Rust
//! on top of `ndarray`.
//!
//! ## Features
//!
//! - Networks wired explicitly out of primitive nodes (dense layers,
//!   activations, element-wise merges) connected through shared ports
//! - RMSprop-style parameter updates
//! - Explicit, caller-driven time steps with backpropagation through time
//!   (two selectable error-propagation policies)
//! - Pre-wired GRU, LSTM and clockwork RNN cells built from the same
//!   primitives
//! - Flat float-stream serialization of all trainable parameters
//! - Seedable weight initialization for reproducible experiments
//!
//! ## Example
//!
//! A network with a single dense layer, trained on one sample:
//!
//! ```
//! use ndarray::array;
//! use recnet::{init, Dense, Network};
//!
//! let rng = init::seeded(1);
//! let mut net = Network::new(1);
//! let mut dense = Dense::new(1, 0.05, 0.9, rng);
//!
//! dense.set_input(net.input_port());
//! net.add_node(Box::new(dense));
//!
//! for _ in 0..100 {
//!     net.train_sample(&array![0.5], &array![2.0]);
//! }
//!
//! let prediction = net.predict(&array![0.5]);
//! assert!((prediction[0] - 2.0).abs() < 0.2);
//! ```

pub mod cells;
pub mod graph;
pub mod init;
pub mod network;
pub mod nodes;
pub mod serializer;

pub use cells::{CWRNN, GRU, LSTM};
pub use graph::{Float, Matrix, Node, Port, PortRef, Vector};
pub use network::Network;
pub use nodes::{
    BpttVariant, Dense, LinearActivation, MergeProduct, MergeSum, NetworkNode,
    OneMinusActivation, RecurrentNetworkNode, SigmoidActivation, TanhActivation,
};
pub use serializer::{NetworkSerializer, SerializerError};
