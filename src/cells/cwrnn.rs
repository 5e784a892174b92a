use std::cell::RefCell;
use std::rc::Rc;

use crate::graph::{Float, Node, PortRef};
use crate::init::RngHandle;
use crate::nodes::{
    BpttVariant, Dense, LinearActivation, MergeSum, RecurrentNetworkNode, TanhActivation,
};
use crate::serializer::NetworkSerializer;

// One clockwork unit. When the unit is active, its output is the Tanh of
// the sum of its inputs; when it is inactive, the skip link propagates the
// previous output unchanged.
struct Unit {
    inputs: Vec<Rc<RefCell<Dense>>>,
    sum: Rc<RefCell<MergeSum>>,
    activation: Rc<RefCell<TanhActivation>>,
    skip: Rc<RefCell<LinearActivation>>,
    output: Rc<RefCell<MergeSum>>,
}

/// Clockwork RNN.
///
/// Implementation based on the description of "A Clockwork RNN", Koutnik,
/// Greff, Gomez and Schmidhuber, 2014, arXiv:1402.3511. The layer is split
/// into units running at different time resolutions: unit `i` of `n` is
/// active one time step every `2^(n-1-i)`, and the last unit is always
/// active. Fast units receive recurrent connections from the slower ones.
pub struct CWRNN {
    inner: RecurrentNetworkNode,
    units: Vec<Unit>,
    output: Rc<RefCell<MergeSum>>,
    unit_size: usize,
    learning_rate: Float,
    decay: Float,
    rng: RngHandle,
}

impl CWRNN {
    /// Layer of clockwork units. `num_units` must divide `size`; each unit
    /// then manages `size / num_units` neurons.
    pub fn new(
        num_units: usize,
        size: usize,
        learning_rate: Float,
        decay: Float,
        variant: BpttVariant,
        rng: RngHandle,
    ) -> Self {
        let unit_size = size / num_units;

        assert_eq!(
            unit_size * num_units,
            size,
            "the number of clockwork units must divide the layer size"
        );

        let mut inner = RecurrentNetworkNode::new(variant);
        let mut output = MergeSum::new();
        let mut units: Vec<Unit> = Vec::with_capacity(num_units);

        for i in 0..num_units {
            let mut sum = MergeSum::new();
            let mut activation = TanhActivation::new();
            let mut skip = LinearActivation::new();
            let mut unit_output = MergeSum::new();

            // Recurrent connections from the previous units and from this
            // one. The denses are created first so that the sum knows its
            // size, and wired once this unit's output has a size too.
            let mut denses: Vec<Dense> = (0..=i)
                .map(|_| Dense::new(unit_size, learning_rate, decay, rng.clone()))
                .collect();

            for dense in &denses {
                sum.add_input(dense.output());
            }

            activation.set_input(sum.output());
            unit_output.add_input(activation.output());
            skip.set_input(unit_output.output());
            unit_output.add_input(skip.output());

            for (j, dense) in denses.iter_mut().enumerate() {
                let source = if j == i {
                    unit_output.output()
                } else {
                    units[j].output.borrow().output()
                };

                dense.set_input(source);
            }

            // The output of this unit crosses time steps
            inner.add_recurrent_node(&unit_output);
            output.add_input(unit_output.output());

            let sum = Rc::new(RefCell::new(sum));
            let activation = Rc::new(RefCell::new(activation));
            let skip = Rc::new(RefCell::new(skip));
            let unit_output = Rc::new(RefCell::new(unit_output));
            let mut inputs = Vec::with_capacity(denses.len());

            for dense in denses {
                let dense = Rc::new(RefCell::new(dense));
                inner.add_node(Box::new(dense.clone()));
                inputs.push(dense);
            }

            inner.add_node(Box::new(sum.clone()));
            inner.add_node(Box::new(activation.clone()));
            inner.add_node(Box::new(skip.clone()));
            inner.add_node(Box::new(unit_output.clone()));

            units.push(Unit {
                inputs,
                sum,
                activation,
                skip,
                output: unit_output,
            });
        }

        // The layer output sums the outputs of all the units
        let output = Rc::new(RefCell::new(output));
        inner.add_node(Box::new(output.clone()));

        let mut cwrnn = Self {
            inner,
            units,
            output,
            unit_size,
            learning_rate,
            decay,
            rng,
        };

        cwrnn.reset();
        cwrnn
    }

    /// Add an X input to this layer.
    ///
    /// The input does not need to go through a `Dense` first: a dense
    /// connection is inserted between the input and every unit, so the
    /// network input port can be passed directly.
    pub fn add_input(&mut self, input: PortRef) {
        for unit in &mut self.units {
            let mut dense = Dense::new(
                self.unit_size,
                self.learning_rate,
                self.decay,
                self.rng.clone(),
            );

            dense.set_input(input.clone());
            unit.sum.borrow_mut().add_input(dense.output());

            let dense = Rc::new(RefCell::new(dense));
            unit.inputs.push(dense.clone());
            self.inner.add_node(Box::new(dense));
        }
    }

    // Period of unit i: the first unit is active one time step every
    // 2^(num_units - 1), the last one on every step.
    fn period(&self, unit: usize) -> usize {
        1 << (self.units.len() - 1 - unit)
    }
}

impl Node for CWRNN {
    fn output(&self) -> PortRef {
        self.output.borrow().output()
    }

    fn forward(&mut self) {
        let timestep = self.inner.current_timestep();

        for i in 0..self.units.len() {
            let period = self.period(i);
            let unit = &self.units[i];

            if timestep % period == 0 {
                // output = activation(sum(inputs)); the skip value is
                // zeroed so that it does not leak into the sum
                for dense in &unit.inputs {
                    dense.borrow_mut().forward();
                }

                unit.sum.borrow_mut().forward();
                unit.activation.borrow_mut().forward();
                unit.skip.borrow().output().borrow_mut().value.fill(0.0);
            } else {
                // output = output(t-1), carried by the skip link; the
                // activation value is zeroed for the same reason
                unit.skip.borrow_mut().forward();
                unit.activation.borrow().output().borrow_mut().value.fill(0.0);
            }
        }

        // Forward the outputs of the units now that their previous values
        // are not needed anymore
        for unit in &self.units {
            unit.output.borrow_mut().forward();
        }

        self.output.borrow_mut().forward();

        // Store the output of the recurrent nodes for later use
        self.inner.forward_recurrent();
    }

    fn backward(&mut self) {
        let timestep = self.inner.current_timestep();

        self.output.borrow_mut().backward();

        for i in 0..self.units.len() {
            let period = self.period(i);
            let unit = &self.units[i];

            if timestep % period == 0 {
                // This also sets an error on the skip link, but that error
                // is not propagated further
                unit.output.borrow_mut().backward();
                unit.activation.borrow_mut().backward();
                unit.sum.borrow_mut().backward();

                for dense in unit.inputs.iter().rev() {
                    dense.borrow_mut().backward();
                }
            } else {
                unit.output.borrow_mut().backward();
                unit.skip.borrow_mut().backward();
            }
        }

        // Store the backpropagated error for later use
        self.inner.backward_recurrent();
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
