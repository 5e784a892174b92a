use ndarray::{Axis, Zip};

use crate::graph::{Float, Matrix, Node, Port, PortRef, Vector};
use crate::init::{self, RngHandle};
use crate::serializer::NetworkSerializer;

// Scale of the random weight initialization.
const INIT_SCALE: Float = 0.01;

// Added to the root of the squared-gradient average so that the RMSprop
// step never divides by zero.
const RMS_EPSILON: Float = 1e-30;

// Fraction of the accumulated gradient kept by clear_error. Gradients are
// not zeroed outright: inside one sequence, each time step contributes to
// the same accumulators, and the contributions of earlier steps are kept
// with geometrically decreasing weight.
const GRADIENT_MOMENTUM: Float = 0.1;

/// Dense fully-connected layer with no activation function.
///
/// Computes `output = W * input + b`. The weights are adjusted by an
/// RMSprop-style rule: `update` divides the accumulated gradient by the
/// root of its running squared average, so the step size adapts to the
/// recent magnitude of each gradient component.
pub struct Dense {
    input: Option<PortRef>,
    output: PortRef,
    learning_rate: Float,
    decay: Float,
    ones_bias: bool,
    rng: RngHandle,

    weights: Matrix,
    d_weights: Matrix,
    avg_d_weights: Matrix,
    bias: Vector,
    d_bias: Vector,
    avg_d_bias: Vector,
}

impl Dense {
    /// Dense connection producing `outputs` values.
    ///
    /// `decay` controls the running average of squared gradients used by
    /// RMSprop (0.9 is a good default). Weights are initialized when the
    /// input is attached, drawing from the given generator.
    pub fn new(outputs: usize, learning_rate: Float, decay: Float, rng: RngHandle) -> Self {
        Self {
            input: None,
            output: Port::shared(outputs),
            learning_rate,
            decay,
            ones_bias: false,
            rng,
            weights: Matrix::zeros((0, 0)),
            d_weights: Matrix::zeros((0, 0)),
            avg_d_weights: Matrix::zeros((0, 0)),
            bias: Vector::zeros(0),
            d_bias: Vector::zeros(0),
            avg_d_bias: Vector::zeros(0),
        }
    }

    /// Like [`Dense::new`], but the bias starts at all-ones instead of
    /// small random values. Used to bias a gate toward passing its signal
    /// through at the start of training (LSTM forget gates).
    pub fn with_ones_bias(
        outputs: usize,
        learning_rate: Float,
        decay: Float,
        rng: RngHandle,
    ) -> Self {
        let mut dense = Self::new(outputs, learning_rate, decay, rng);
        dense.ones_bias = true;
        dense
    }

    /// Set the input port of this node. This sizes and initializes the
    /// weights and bias; calling it again re-initializes them.
    pub fn set_input(&mut self, input: PortRef) {
        let inputs = input.borrow().len();
        let outputs = self.output.borrow().len();

        {
            let mut rng = self.rng.borrow_mut();

            self.weights = init::uniform_matrix(outputs, inputs, INIT_SCALE, &mut rng);
            self.bias = if self.ones_bias {
                Vector::ones(outputs)
            } else {
                init::uniform_vector(outputs, INIT_SCALE, &mut rng)
            };
        }

        self.d_weights = Matrix::zeros((outputs, inputs));
        self.avg_d_weights = Matrix::zeros((outputs, inputs));
        self.d_bias = Vector::zeros(outputs);
        self.avg_d_bias = Vector::zeros(outputs);

        self.input = Some(input);

        // Start from a clean error signal for the first backward pass
        self.clear_error();
    }

    /// Current weight matrix, shaped outputs x inputs.
    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    /// Current bias vector.
    pub fn bias(&self) -> &Vector {
        &self.bias
    }

    pub(crate) fn weights_mut(&mut self) -> &mut Matrix {
        &mut self.weights
    }

    pub(crate) fn bias_mut(&mut self) -> &mut Vector {
        &mut self.bias
    }

    pub(crate) fn d_weights(&self) -> &Matrix {
        &self.d_weights
    }

    pub(crate) fn d_bias(&self) -> &Vector {
        &self.d_bias
    }

    fn input(&self) -> &PortRef {
        self.input
            .as_ref()
            .expect("dense node used before set_input")
    }
}

impl Node for Dense {
    fn output(&self) -> PortRef {
        self.output.clone()
    }

    fn forward(&mut self) {
        let input = self.input().borrow();
        let mut output = self.output.borrow_mut();

        output.value = self.weights.dot(&input.value) + &self.bias;
    }

    fn backward(&mut self) {
        let input = self.input().clone();
        let mut input = input.borrow_mut();
        let output = self.output.borrow();

        // Multiply the output errors by the weights to obtain the input
        // errors
        input.error += &self.weights.t().dot(&output.error);

        // Accumulate the gradient of the weights and bias. The gradient is
        // stored negated so that update always subtracts a positive step.
        let error_column = output.error.view().insert_axis(Axis(1));
        let value_row = input.value.view().insert_axis(Axis(0));

        self.d_weights -= &error_column.dot(&value_row);
        self.d_bias -= &output.error;
    }

    fn update(&mut self) {
        let decay = self.decay;
        let learning_rate = self.learning_rate;

        // Keep a moving average of the squared gradients
        Zip::from(&mut self.avg_d_weights)
            .and(&self.d_weights)
            .for_each(|avg, &gradient| {
                *avg = decay * *avg + (1.0 - decay) * gradient * gradient;
            });
        Zip::from(&mut self.avg_d_bias)
            .and(&self.d_bias)
            .for_each(|avg, &gradient| {
                *avg = decay * *avg + (1.0 - decay) * gradient * gradient;
            });

        // Perform the update using RMSprop
        Zip::from(&mut self.weights)
            .and(&self.d_weights)
            .and(&self.avg_d_weights)
            .for_each(|weight, &gradient, &avg| {
                *weight -= learning_rate * gradient / (avg.sqrt() + RMS_EPSILON);
            });
        Zip::from(&mut self.bias)
            .and(&self.d_bias)
            .and(&self.avg_d_bias)
            .for_each(|bias, &gradient, &avg| {
                *bias -= learning_rate * gradient / (avg.sqrt() + RMS_EPSILON);
            });
    }

    fn clear_error(&mut self) {
        self.output.borrow_mut().error.fill(0.0);

        // Decay the accumulated gradients instead of zeroing them, so that
        // time-distributed contributions survive across the time steps of
        // one sequence. The running squared averages are kept untouched:
        // they hold statistics about the general behavior of the gradients.
        self.d_weights *= GRADIENT_MOMENTUM;
        self.d_bias *= GRADIENT_MOMENTUM;
    }

    fn serialize(&self, serializer: &mut NetworkSerializer) {
        for value in self.weights.iter() {
            serializer.write_weight(*value);
        }
        for value in self.avg_d_weights.iter() {
            serializer.write_weight(*value);
        }
        for value in self.bias.iter() {
            serializer.write_weight(*value);
        }
        for value in self.avg_d_bias.iter() {
            serializer.write_weight(*value);
        }
    }

    fn deserialize(&mut self, serializer: &mut NetworkSerializer) {
        assert!(
            self.input.is_some(),
            "dense node must be wired before deserialization"
        );

        for value in self.weights.iter_mut() {
            *value = serializer.read_weight();
        }
        for value in self.avg_d_weights.iter_mut() {
            *value = serializer.read_weight();
        }
        for value in self.bias.iter_mut() {
            *value = serializer.read_weight();
        }
        for value in self.avg_d_bias.iter_mut() {
            *value = serializer.read_weight();
        }
    }
}
