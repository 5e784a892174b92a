use std::marker::PhantomData;

use ndarray::Zip;

use crate::graph::{Float, Node, Port, PortRef};

// Saturation bound for the argument of the exponential. Tanh and sigmoid
// receive arbitrarily large pre-activations during training; an unclamped
// exp overflows to infinity and poisons the whole network with NaNs. The
// constant 20 is also used by CLSTM.
const EXP_CLAMP: Float = 20.0;

fn clamped_exp(x: Float) -> Float {
    x.clamp(-EXP_CLAMP, EXP_CLAMP).exp()
}

/// Element-wise function applied by an [`Activation`] node.
///
/// The derivative is expressed in terms of the function's own output, which
/// avoids storing or recomputing the pre-activation during the backward
/// pass.
pub trait ActivationFn {
    fn apply(x: Float) -> Float;

    /// Derivative evaluated on the output value `y = apply(x)`.
    fn derivative(y: Float) -> Float;
}

/// Tanh (output from -1 to 1).
pub struct TanhFn;

impl ActivationFn for TanhFn {
    fn apply(x: Float) -> Float {
        // tanh written through the sigmoid so that the clamp on the
        // exponential applies
        2.0 / (1.0 + clamped_exp(-2.0 * x)) - 1.0
    }

    fn derivative(y: Float) -> Float {
        1.0 - y * y
    }
}

/// Sigmoid (output from 0 to 1).
pub struct SigmoidFn;

impl ActivationFn for SigmoidFn {
    fn apply(x: Float) -> Float {
        1.0 / (1.0 + clamped_exp(-x))
    }

    fn derivative(y: Float) -> Float {
        y * (1.0 - y)
    }
}

/// Identity. Useful as an explicit pass-through point in a graph, for
/// instance to expose a recurrent value under its own port.
pub struct LinearFn;

impl ActivationFn for LinearFn {
    fn apply(x: Float) -> Float {
        x
    }

    fn derivative(_y: Float) -> Float {
        1.0
    }
}

/// Output = 1 - input.
pub struct OneMinusFn;

impl ActivationFn for OneMinusFn {
    fn apply(x: Float) -> Float {
        1.0 - x
    }

    fn derivative(_y: Float) -> Float {
        -1.0
    }
}

/// Activation node: applies an element-wise function to its single input,
/// producing the same number of outputs.
pub struct Activation<F: ActivationFn> {
    input: Option<PortRef>,
    output: PortRef,
    _function: PhantomData<F>,
}

pub type TanhActivation = Activation<TanhFn>;
pub type SigmoidActivation = Activation<SigmoidFn>;
pub type LinearActivation = Activation<LinearFn>;
pub type OneMinusActivation = Activation<OneMinusFn>;

impl<F: ActivationFn> Activation<F> {
    pub fn new() -> Self {
        Self {
            input: None,
            output: Port::shared(0),
            _function: PhantomData,
        }
    }

    /// Set the input port of this node. The output takes the shape of the
    /// input.
    pub fn set_input(&mut self, input: PortRef) {
        let inputs = input.borrow().len();

        self.output.borrow_mut().resize(inputs);
        self.input = Some(input);
    }

    fn input(&self) -> &PortRef {
        self.input
            .as_ref()
            .expect("activation node used before set_input")
    }
}

impl<F: ActivationFn> Default for Activation<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ActivationFn> Node for Activation<F> {
    fn output(&self) -> PortRef {
        self.output.clone()
    }

    fn forward(&mut self) {
        let input = self.input().borrow();
        let mut output = self.output.borrow_mut();

        output.value = input.value.mapv(F::apply);
    }

    fn backward(&mut self) {
        let output = self.output.borrow();
        let mut input = self.input().borrow_mut();

        Zip::from(&mut input.error)
            .and(&output.error)
            .and(&output.value)
            .for_each(|error, &out_error, &out_value| {
                *error += out_error * F::derivative(out_value);
            });
    }

    fn clear_error(&mut self) {
        self.output.borrow_mut().error.fill(0.0);
    }
}
