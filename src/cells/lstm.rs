use std::cell::RefCell;
use std::rc::Rc;

use crate::graph::{Float, Node, PortRef};
use crate::init::RngHandle;
use crate::nodes::{
    BpttVariant, Dense, LinearActivation, MergeProduct, MergeSum, RecurrentNetworkNode,
    SigmoidActivation, TanhActivation,
};
use crate::serializer::NetworkSerializer;

/// Long Short-Term Memory layer.
///
/// This layer contains memory and can be used to model sequences: at each
/// time step, the value it produces depends on all the previous time
/// steps. An episode is finished by calling `reset`, which
/// [`Network::reset`](crate::Network::reset) does.
///
/// The constructor wires the recurrent connections (cell state to the
/// input and the three gates) itself. More connections are made by calling
/// `add_input`, `add_in_gate`, `add_out_gate` and `add_forget_gate`; the
/// input is usually connected to all three gates, each time through its
/// own `Dense`. See [`GRU`](crate::cells::GRU) for advice about those
/// connections.
pub struct LSTM {
    inner: RecurrentNetworkNode,
    inputs: Rc<RefCell<MergeSum>>,
    ingates: Rc<RefCell<MergeSum>>,
    outgates: Rc<RefCell<MergeSum>>,
    forgetgates: Rc<RefCell<MergeSum>>,
}

impl LSTM {
    /// Layer of LSTM cells. All the input and output ports of this layer
    /// have the same shape.
    pub fn new(
        size: usize,
        learning_rate: Float,
        decay: Float,
        variant: BpttVariant,
        rng: RngHandle,
    ) -> Self {
        // Instantiate all the nodes used by an LSTM cell
        let mut inputs = MergeSum::new();
        let mut input_activation = TanhActivation::new();

        let mut input_gate = MergeSum::new();
        let mut input_gate_activation = SigmoidActivation::new();

        let mut forget_gate = MergeSum::new();
        let mut forget_gate_activation = SigmoidActivation::new();

        let mut output_gate = MergeSum::new();
        let mut output_gate_activation = SigmoidActivation::new();

        let mut input_times_input_gate = MergeProduct::new();
        let mut cells_times_forget_gate = MergeProduct::new();
        let mut cells = MergeSum::new();
        let mut cells_recurrent = LinearActivation::new();
        let mut cells_activation = TanhActivation::new();
        let mut cells_times_output_gate = MergeProduct::new();

        let mut loop_output_to_output_gate = Dense::new(size, learning_rate, decay, rng.clone());
        let mut loop_output_to_input_gate = Dense::new(size, learning_rate, decay, rng.clone());
        // Starting with a forget gate biased toward one lets the cell keep
        // its state until training learns when to forget
        let mut loop_output_to_forget_gate =
            Dense::with_ones_bias(size, learning_rate, decay, rng.clone());
        let mut loop_output_to_input = Dense::new(size, learning_rate, decay, rng);

        // Wire everything up, taking care that only ports whose size is
        // already known are connected to inputs.
        inputs.add_input(loop_output_to_input.output());
        input_gate.add_input(loop_output_to_input_gate.output());
        forget_gate.add_input(loop_output_to_forget_gate.output());
        output_gate.add_input(loop_output_to_output_gate.output());

        input_activation.set_input(inputs.output());
        input_gate_activation.set_input(input_gate.output());
        forget_gate_activation.set_input(forget_gate.output());
        output_gate_activation.set_input(output_gate.output());

        input_times_input_gate.add_input(input_gate_activation.output());
        input_times_input_gate.add_input(input_activation.output());

        // The gated input gives the cell sum its size before the forget
        // branch, which reads the cell state port, is attached
        cells.add_input(input_times_input_gate.output());
        cells_recurrent.set_input(cells.output());

        cells_times_forget_gate.add_input(forget_gate_activation.output());
        cells_times_forget_gate.add_input(cells_recurrent.output()); // cells(t-1) * forget
        cells.add_input(cells_times_forget_gate.output());

        cells_activation.set_input(cells.output());
        cells_times_output_gate.add_input(output_gate_activation.output());
        cells_times_output_gate.add_input(cells_activation.output());

        loop_output_to_forget_gate.set_input(cells_recurrent.output());
        loop_output_to_input_gate.set_input(cells_recurrent.output());
        loop_output_to_output_gate.set_input(cells_recurrent.output());
        loop_output_to_input.set_input(cells_recurrent.output());

        // The cell state at t-1 has to be visible when step t runs, so the
        // pass-through over the cells is the recurrent node of this cell
        let mut inner = RecurrentNetworkNode::new(variant);
        inner.add_recurrent_node(&cells_recurrent);

        let inputs = Rc::new(RefCell::new(inputs));
        let ingates = Rc::new(RefCell::new(input_gate));
        let forgetgates = Rc::new(RefCell::new(forget_gate));
        let outgates = Rc::new(RefCell::new(output_gate));

        // Forward-propagation order of the children. The cell state has
        // been restored from the recurrent storage and can be used by the
        // loop connections right away.
        inner.add_node(Box::new(loop_output_to_forget_gate));
        inner.add_node(Box::new(loop_output_to_input));
        inner.add_node(Box::new(loop_output_to_input_gate));
        inner.add_node(Box::new(loop_output_to_output_gate));

        inner.add_node(Box::new(inputs.clone()));
        inner.add_node(Box::new(input_activation));
        inner.add_node(Box::new(ingates.clone()));
        inner.add_node(Box::new(input_gate_activation));
        inner.add_node(Box::new(forgetgates.clone()));
        inner.add_node(Box::new(forget_gate_activation));
        inner.add_node(Box::new(outgates.clone()));
        inner.add_node(Box::new(output_gate_activation));

        inner.add_node(Box::new(input_times_input_gate));
        inner.add_node(Box::new(cells_times_forget_gate));
        inner.add_node(Box::new(cells));
        inner.add_node(Box::new(cells_recurrent));
        inner.add_node(Box::new(cells_activation));
        inner.add_node(Box::new(cells_times_output_gate));

        let mut lstm = Self {
            inner,
            inputs,
            ingates,
            outgates,
            forgetgates,
        };

        // Ensure that the cell state starts at zero
        lstm.reset();
        lstm
    }

    /// Add an X input to this cell.
    pub fn add_input(&mut self, input: PortRef) {
        self.inputs.borrow_mut().add_input(input);
    }

    /// Add an input gate input to this cell.
    pub fn add_in_gate(&mut self, input: PortRef) {
        self.ingates.borrow_mut().add_input(input);
    }

    /// Add an output gate input to this cell.
    pub fn add_out_gate(&mut self, input: PortRef) {
        self.outgates.borrow_mut().add_input(input);
    }

    /// Add a forget gate input to this cell.
    pub fn add_forget_gate(&mut self, input: PortRef) {
        self.forgetgates.borrow_mut().add_input(input);
    }
}

impl Node for LSTM {
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
