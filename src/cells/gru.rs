use std::cell::RefCell;
use std::rc::Rc;

use crate::graph::{Float, Node, PortRef};
use crate::init::RngHandle;
use crate::nodes::{
    BpttVariant, Dense, MergeProduct, MergeSum, OneMinusActivation, RecurrentNetworkNode,
    SigmoidActivation, TanhActivation,
};
use crate::serializer::NetworkSerializer;

/// Gated Recurrent Units layer.
///
/// This layer contains memory and can be used to model sequences: at each
/// time step, the value it produces depends on all the previous time
/// steps. An episode is finished by calling `reset`, which
/// [`Network::reset`](crate::Network::reset) does.
///
/// The constructor wires the recurrent connections (output to Z and R)
/// itself. More connections are made by calling `add_input`, `add_z` and
/// `add_r`: the input is usually connected to Z and R as well, each time
/// through its own `Dense`, so we have `x -> dense1 -> input`,
/// `x -> dense2 -> z` and `x -> dense3 -> r`.
pub struct GRU {
    inner: RecurrentNetworkNode,
    inputs: Rc<RefCell<MergeSum>>,
    updates: Rc<RefCell<MergeSum>>,
    resets: Rc<RefCell<MergeSum>>,
}

impl GRU {
    /// Layer of GRU units. All the input and output ports of this layer
    /// have the same shape.
    pub fn new(
        size: usize,
        learning_rate: Float,
        decay: Float,
        variant: BpttVariant,
        rng: RngHandle,
    ) -> Self {
        // Instantiate all the nodes used by a GRU cell
        let mut inputs = MergeSum::new();
        let mut input_activation = TanhActivation::new();

        let mut updates = MergeSum::new();
        let mut update_activation = SigmoidActivation::new();
        let mut oneminus_update_activation = OneMinusActivation::new();
        let mut update_times_output = MergeProduct::new();
        let mut oneminus_update_times_input = MergeProduct::new();
        let mut output = MergeSum::new(); // z*h(t-1) + (1-z)*candidate

        let mut resets = MergeSum::new();
        let mut reset_activation = SigmoidActivation::new();
        let mut reset_times_output = MergeProduct::new(); // wired back to inputs through a Dense

        let mut loop_output_to_updates = Dense::new(size, learning_rate, decay, rng.clone());
        let mut loop_output_to_resets = Dense::new(size, learning_rate, decay, rng.clone());
        let mut loop_reset_times_output_to_inputs = Dense::new(size, learning_rate, decay, rng);

        // Wire everything up, taking care that only ports whose size is
        // already known are connected to inputs.
        resets.add_input(loop_output_to_resets.output());
        updates.add_input(loop_output_to_updates.output());
        inputs.add_input(loop_reset_times_output_to_inputs.output());

        input_activation.set_input(inputs.output());
        update_activation.set_input(updates.output());
        oneminus_update_activation.set_input(update_activation.output());
        reset_activation.set_input(resets.output());

        oneminus_update_times_input.add_input(input_activation.output());
        oneminus_update_times_input.add_input(oneminus_update_activation.output());

        // The candidate branch gives the output sum its size before the
        // gated feedback branch, which reads the output port, is attached
        output.add_input(oneminus_update_times_input.output());

        update_times_output.add_input(update_activation.output());
        update_times_output.add_input(output.output());
        output.add_input(update_times_output.output());

        reset_times_output.add_input(reset_activation.output());
        reset_times_output.add_input(output.output());

        loop_output_to_updates.set_input(output.output());
        loop_output_to_resets.set_input(output.output());
        loop_reset_times_output_to_inputs.set_input(reset_times_output.output());

        // The output value at t-1 has to be visible when step t runs, so
        // the output sum is the recurrent node of this cell
        let mut inner = RecurrentNetworkNode::new(variant);
        inner.add_recurrent_node(&output);

        let inputs = Rc::new(RefCell::new(inputs));
        let updates = Rc::new(RefCell::new(updates));
        let resets = Rc::new(RefCell::new(resets));

        // Forward-propagation order of the children
        inner.add_node(Box::new(loop_output_to_updates));
        inner.add_node(Box::new(loop_output_to_resets));

        inner.add_node(Box::new(resets.clone()));
        inner.add_node(Box::new(reset_activation));
        inner.add_node(Box::new(reset_times_output));

        inner.add_node(Box::new(loop_reset_times_output_to_inputs));

        inner.add_node(Box::new(inputs.clone()));
        inner.add_node(Box::new(input_activation));

        inner.add_node(Box::new(updates.clone()));
        inner.add_node(Box::new(update_activation));
        inner.add_node(Box::new(oneminus_update_activation));
        inner.add_node(Box::new(update_times_output));
        inner.add_node(Box::new(oneminus_update_times_input));

        inner.add_node(Box::new(output));

        let mut gru = Self {
            inner,
            inputs,
            updates,
            resets,
        };

        // Ensure that h(0) = 0
        gru.reset();
        gru
    }

    /// Add an X input to this cell.
    pub fn add_input(&mut self, input: PortRef) {
        self.inputs.borrow_mut().add_input(input);
    }

    /// Add a Z (update gate) input to this cell.
    pub fn add_z(&mut self, z: PortRef) {
        self.updates.borrow_mut().add_input(z);
    }

    /// Add an R (reset gate) input to this cell.
    pub fn add_r(&mut self, r: PortRef) {
        self.resets.borrow_mut().add_input(r);
    }
}

impl Node for GRU {
    fn output(&self) -> PortRef {
        self.inner.output()
    }

    fn forward(&mut self) {
        self.inner.forward();
    }

    fn backward(&mut self) {
        self.inner.backward();
    }

    fn update(&mut self) {
        self.inner.update();
    }

    fn clear_error(&mut self) {
        self.inner.clear_error();
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn set_current_timestep(&mut self, timestep: usize) {
        self.inner.set_current_timestep(timestep);
    }

    fn serialize(&self, serializer: &mut NetworkSerializer) {
        self.inner.serialize(serializer);
    }

    fn deserialize(&mut self, serializer: &mut NetworkSerializer) {
        self.inner.deserialize(serializer);
    }
}
