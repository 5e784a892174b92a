use ndarray::Zip;

use crate::graph::{Node, Port, PortRef};

// Guard against dividing by a near-zero input value when inverting the
// product in MergeProduct::backward.
const DIVISION_EPSILON: f32 = 1e-20;

// Input list and output port shared by the merge nodes. The first input to
// be added defines the shape of the output; later inputs must match it.
struct MergePorts {
    inputs: Vec<PortRef>,
    output: PortRef,
}

impl MergePorts {
    fn new() -> Self {
        Self {
            inputs: Vec::new(),
            output: Port::shared(0),
        }
    }

    fn add_input(&mut self, input: PortRef) {
        let dim = input.borrow().len();

        if self.inputs.is_empty() {
            self.output.borrow_mut().resize(dim);
        } else {
            let expected = self.inputs[0].borrow().len();

            assert_eq!(
                dim, expected,
                "merge input shape mismatch: expected {expected} elements, got {dim}"
            );
        }

        self.inputs.push(input);
    }

    fn clear_error(&mut self) {
        self.output.borrow_mut().error.fill(0.0);
    }
}

/// Merge input ports into an output port by element-wise summing them.
pub struct MergeSum {
    ports: MergePorts,
}

impl MergeSum {
    pub fn new() -> Self {
        Self {
            ports: MergePorts::new(),
        }
    }

    /// Add an input to the list of inputs to be summed.
    pub fn add_input(&mut self, input: PortRef) {
        self.ports.add_input(input);
    }
}

impl Default for MergeSum {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for MergeSum {
    fn output(&self) -> PortRef {
        self.ports.output.clone()
    }

    fn forward(&mut self) {
        let mut output = self.ports.output.borrow_mut();

        output.value.fill(0.0);

        for input in &self.ports.inputs {
            output.value += &input.borrow().value;
        }
    }

    fn backward(&mut self) {
        // This node computes f(a, b) = a + b, so df/da = 1: every input
        // receives the output error unchanged.
        let output = self.ports.output.borrow();

        for input in &self.ports.inputs {
            input.borrow_mut().error += &output.error;
        }
    }

    fn clear_error(&mut self) {
        self.ports.clear_error();
    }
}

/// Merge input ports into an output port by element-wise multiplying them.
pub struct MergeProduct {
    ports: MergePorts,
}

impl MergeProduct {
    pub fn new() -> Self {
        Self {
            ports: MergePorts::new(),
        }
    }

    /// Add an input to the list of inputs to be multiplied.
    pub fn add_input(&mut self, input: PortRef) {
        self.ports.add_input(input);
    }
}

impl Default for MergeProduct {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for MergeProduct {
    fn output(&self) -> PortRef {
        self.ports.output.clone()
    }

    fn forward(&mut self) {
        let mut output = self.ports.output.borrow_mut();

        output.value.fill(1.0);

        for input in &self.ports.inputs {
            output.value *= &input.borrow().value;
        }
    }

    fn backward(&mut self) {
        // If f(a, b, c) = a * b * c, then df/da = b * c = f / a: dividing
        // the output by one input gives the gradient with regard to that
        // input. The denominator is guarded against near-zero values.
        let output = self.ports.output.borrow();

        for input in &self.ports.inputs {
            let port = &mut *input.borrow_mut();

            Zip::from(&mut port.error)
                .and(&port.value)
                .and(&output.value)
                .and(&output.error)
                .for_each(|error, &value, &out_value, &out_error| {
                    *error += out_error * (out_value / (value + DIVISION_EPSILON));
                });
        }
    }

    fn clear_error(&mut self) {
        self.ports.clear_error();
    }
}
