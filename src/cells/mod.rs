// Higher-level cell topologies, built entirely out of the primitives in
// crate::nodes through their public wiring surface. None of these types
// adds new mechanics: they are pre-wired graphs of dense, merge and
// activation nodes around a recurrent container.

pub mod cwrnn;
pub mod gru;
pub mod lstm;

pub use cwrnn::CWRNN;
pub use gru::GRU;
pub use lstm::LSTM;
