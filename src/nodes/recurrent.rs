use log::trace;
use ndarray::Zip;

use crate::graph::{Float, Node, Port, PortRef};
use crate::nodes::NetworkNode;
use crate::serializer::NetworkSerializer;

// Hard bound on the error propagated between time steps by the standard
// BPTT policy. Without it, recurrent error signals can grow without bound
// over long sequences.
const ERROR_CLIP: Float = 10.0;

/// Backpropagation-through-time policy used by a recurrent container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BpttVariant {
    /// `e(t-1) = clip(e(t) - restored(t))`: only the error contributed by
    /// the current step propagates one step back, clipped to a hard bound.
    #[default]
    Standard,
    /// `e(t-1) = e(t) / max_timestep`: the error is not reduced by the
    /// restored part, it is instead normalized by the sequence length so
    /// that its accumulation stays bounded.
    Experimental,
}

// One recurrent child: the port whose history is recorded, and one stored
// (value, error) snapshot per time step seen since the last reset.
struct RecurrentState {
    port: PortRef,
    size: usize,
    storage: Vec<Port>,
}

/// Container node that supports recurrent connections between its children.
///
/// Recurrent connections need careful interplay between
/// `set_current_timestep`, `forward` and `backward`. This node keeps a
/// growable, time-indexed store of (value, error) snapshots for each
/// registered recurrent child:
///
/// - `set_current_timestep(t)` restores the child's output to the value it
///   produced at step `t-1` (zero at the start of a sequence) and to the
///   error already computed for step `t`, growing the store by one entry
///   when `t` is first visited.
/// - `forward` records the value produced at the current step.
/// - `backward` writes the error to propagate to step `t-1`, following the
///   configured [`BpttVariant`].
///
/// Storage grows append-only: visiting step `t` requires having visited
/// step `t-1` since the last `reset`.
pub struct RecurrentNetworkNode {
    network: NetworkNode,
    recurrent: Vec<RecurrentState>,
    variant: BpttVariant,
    timestep: usize,
    max_timestep: usize,
}

impl RecurrentNetworkNode {
    pub fn new(variant: BpttVariant) -> Self {
        Self {
            network: NetworkNode::new(),
            recurrent: Vec::new(),
            variant,
            timestep: 0,
            max_timestep: 0,
        }
    }

    /// Add a child node, in forward-propagation order.
    pub fn add_node(&mut self, node: Box<dyn Node>) {
        self.network.add_node(node);
    }

    /// Register a child as recurrent, so that its output value and error
    /// are propagated between time steps. The node must already be wired:
    /// its output shape defines the shape of the stored snapshots. The
    /// node still has to be added to the child list with `add_node`.
    pub fn add_recurrent_node(&mut self, node: &dyn Node) {
        let port = node.output();
        let size = port.borrow().len();

        self.recurrent.push(RecurrentState {
            port,
            size,
            storage: Vec::new(),
        });
    }

    /// Time step currently being processed.
    pub fn current_timestep(&self) -> usize {
        self.timestep
    }

    /// Record the value of the recurrent children into the storage of the
    /// current time step. Called at the end of `forward`; composite nodes
    /// that replace `forward` wholesale call this themselves.
    pub fn forward_recurrent(&mut self) {
        for state in &mut self.recurrent {
            assert!(
                state.storage.len() > self.timestep,
                "forward at time step {} before set_current_timestep reserved its storage",
                self.timestep
            );

            let port = state.port.borrow();
            state.storage[self.timestep].value.assign(&port.value);
        }
    }

    /// Write the error of the recurrent children into the storage of the
    /// previous time step, following the configured BPTT variant. Called
    /// at the end of `backward`; composite nodes that replace `backward`
    /// wholesale call this themselves.
    pub fn backward_recurrent(&mut self) {
        if self.timestep == 0 {
            // There is no step before the start of a sequence
            return;
        }

        // The normalization uses the highest step seen this sequence, kept
        // up to date by set_current_timestep.
        let normalization = 1.0 / self.max_timestep.max(1) as Float;

        for state in &mut self.recurrent {
            assert!(state.storage.len() > self.timestep);

            let port = state.port.borrow();
            let (previous, current) = {
                let (head, tail) = state.storage.split_at_mut(self.timestep);
                (&mut head[self.timestep - 1], &tail[0])
            };

            match self.variant {
                BpttVariant::Standard => {
                    // The error restored when this step was entered is
                    // already accounted for at step t-1; only the part
                    // added since then moves back, under a hard clip.
                    Zip::from(&mut previous.error)
                        .and(&port.error)
                        .and(&current.error)
                        .for_each(|stored, &error, &restored| {
                            *stored = (error - restored).clamp(-ERROR_CLIP, ERROR_CLIP);
                        });
                }
                BpttVariant::Experimental => {
                    Zip::from(&mut previous.error)
                        .and(&port.error)
                        .for_each(|stored, &error| {
                            *stored = error * normalization;
                        });
                }
            }
        }
    }
}

impl Node for RecurrentNetworkNode {
    fn output(&self) -> PortRef {
        self.network.output()
    }

    fn forward(&mut self) {
        self.network.forward();
        self.forward_recurrent();
    }

    fn backward(&mut self) {
        self.network.backward();
        self.backward_recurrent();
    }

    fn update(&mut self) {
        self.network.update();
    }

    fn clear_error(&mut self) {
        self.network.clear_error();
    }

    fn reset(&mut self) {
        self.network.reset();

        for state in &mut self.recurrent {
            state.storage.clear();

            // The next sequence starts from a blank state
            let mut port = state.port.borrow_mut();
            port.value.fill(0.0);
            port.error.fill(0.0);
        }

        self.timestep = 0;
        self.max_timestep = 0;

        trace!("recurrent container reset, {} storage lanes cleared", self.recurrent.len());
    }

    fn set_current_timestep(&mut self, timestep: usize) {
        // Let the children clear their error signals (or restore their own
        // recurrent state) first
        self.network.set_current_timestep(timestep);

        for state in &mut self.recurrent {
            assert!(
                timestep <= state.storage.len(),
                "time step {} skips ahead of the {} recorded steps",
                timestep,
                state.storage.len()
            );

            // Grow the storage when a step is visited for the first time.
            // This append is the only way the storage ever grows.
            if timestep == state.storage.len() {
                state.storage.push(Port::zeros(state.size));
            }

            let mut port = state.port.borrow_mut();

            if timestep > 0 {
                // The recurrent connection itself: the value this node
                // produced at the previous time step becomes visible on
                // its output port
                port.value.assign(&state.storage[timestep - 1].value);
            } else {
                // No history before the start of a sequence
                port.value.fill(0.0);
            }

            // Restore the error already computed for this time step, so
            // that further backward passes accumulate onto it instead of
            // losing it
            port.error.assign(&state.storage[timestep].error);
        }

        self.max_timestep = self.max_timestep.max(timestep);
        self.timestep = timestep;
    }

    fn serialize(&self, serializer: &mut NetworkSerializer) {
        self.network.serialize(serializer);
    }

    fn deserialize(&mut self, serializer: &mut NetworkSerializer) {
        self.network.deserialize(serializer);
    }
}
