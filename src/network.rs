use log::{debug, trace};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::graph::{Float, Node, Port, PortRef, Vector};
use crate::nodes::{BpttVariant, RecurrentNetworkNode};
use crate::serializer::NetworkSerializer;

/// Neural network, made of nodes.
///
/// A `Network` keeps track of nodes and manages the forward and backward
/// passes. It also contains the training entry points: single samples,
/// minibatches and whole sequences.
///
/// A network is built by instantiating nodes, connecting them through
/// their input and output ports, then adding them to the network in the
/// order of forward propagation (for recurrent graphs, breadth-first order
/// from the input avoids loops). The first node reads its input from
/// [`Network::input_port`]; the output of the last node is the output of
/// the network.
pub struct Network {
    input_port: PortRef,
    nodes: RecurrentNetworkNode,
    timestep: usize,
}

impl Network {
    /// Network taking `inputs` values, using standard BPTT for any
    /// recurrent node registered directly on it.
    pub fn new(inputs: usize) -> Self {
        Self::with_variant(inputs, BpttVariant::default())
    }

    /// Network taking `inputs` values, with an explicit BPTT policy.
    pub fn with_variant(inputs: usize, variant: BpttVariant) -> Self {
        Self {
            input_port: Port::shared(inputs),
            nodes: RecurrentNetworkNode::new(variant),
            timestep: 0,
        }
    }

    /// Port that carries the values given to this network, so that the
    /// first node can read its input from somewhere.
    pub fn input_port(&self) -> PortRef {
        self.input_port.clone()
    }

    /// Port that carries the output of the last node of this network.
    pub fn output_port(&self) -> PortRef {
        self.nodes.output()
    }

    /// Add a node to this network. The first node receives the input, the
    /// last one produces the output of the network.
    pub fn add_node(&mut self, node: Box<dyn Node>) {
        self.nodes.add_node(node);
    }

    /// Register an already-added node as recurrent at the network level.
    /// Cells like GRU and LSTM manage their own recurrence and do not need
    /// this.
    pub fn add_recurrent_node(&mut self, node: &dyn Node) {
        self.nodes.add_recurrent_node(node);
    }

    /// Produce the output corresponding to the input.
    ///
    /// Prediction is incremental: recurrent state is not reset between
    /// calls. Ending an input sequence (and preparing the network for the
    /// next one) is performed by [`Network::reset`].
    pub fn predict(&mut self, input: &Vector) -> Vector {
        {
            let mut port = self.input_port.borrow_mut();

            assert_eq!(
                input.len(),
                port.len(),
                "network expects {} input values, got {}",
                port.len(),
                input.len()
            );

            port.value.assign(input);
        }

        self.nodes.forward();

        let output = self.nodes.output();
        let value = output.borrow().value.clone();
        value
    }

    /// Set the expected output of the network and back-propagate the
    /// difference with the last prediction, without updating any
    /// parameter. Returns the mean squared error of the prediction.
    ///
    /// Calling `predict`, `set_expected_output` then `update` trains the
    /// network on one sample. Minibatches are implemented by predicting
    /// and setting the expected output several times before one `update`.
    pub fn set_expected_output(&mut self, output: &Vector) -> Float {
        let error = {
            let port = self.nodes.output();
            let port = port.borrow();

            assert_eq!(
                output.len(),
                port.len(),
                "network produces {} output values, got {} expected values",
                port.len(),
                output.len()
            );

            output - &port.value
        };

        self.set_error(&error)
    }

    /// Like [`Network::set_expected_output`], with an element-wise weight
    /// applied to the error signal. Useful when some output components
    /// matter more than others.
    pub fn set_expected_output_weighted(&mut self, output: &Vector, weights: &Vector) -> Float {
        let error = {
            let port = self.nodes.output();
            let port = port.borrow();

            assert_eq!(output.len(), port.len());
            assert_eq!(weights.len(), port.len());

            (output - &port.value) * weights
        };

        self.set_error(&error)
    }

    /// Set the error signal at the output of the network and back-propagate
    /// it, without updating any parameter. Returns the mean squared error.
    pub fn set_error(&mut self, error: &Vector) -> Float {
        {
            let port = self.nodes.output();
            let mut port = port.borrow_mut();

            assert_eq!(
                error.len(),
                port.len(),
                "network produces {} output values, got {} error values",
                port.len(),
                error.len()
            );

            port.error.assign(error);
        }

        self.nodes.backward();

        mean_squared(error)
    }

    /// Perform one gradient update using the error accumulated by the last
    /// calls to `set_expected_output` and `set_error`. The error signal is
    /// discarded afterwards.
    pub fn update(&mut self) {
        self.nodes.update();
        self.nodes.clear_error();
    }

    /// Clear the internal memory of the network but preserve its weights.
    /// Call this between input sequences.
    pub fn reset(&mut self) {
        trace!("network reset");

        self.nodes.reset();
        self.timestep = 0;
    }

    /// Inform every node of the time step about to be processed, restoring
    /// the recurrent state recorded for that step.
    pub fn set_current_timestep(&mut self, timestep: usize) {
        self.nodes.set_current_timestep(timestep);
        self.timestep = timestep;
    }

    /// Time step currently being processed.
    pub fn current_timestep(&self) -> usize {
        self.timestep
    }

    /// Shortcut performing one gradient update on a sample. Returns the
    /// mean squared error of the prediction made before the update.
    pub fn train_sample(&mut self, input: &Vector, output: &Vector) -> Float {
        self.predict(input);
        let mse = self.set_expected_output(output);
        self.update();
        mse
    }

    /// Like [`Network::train_sample`], with an element-wise weight applied
    /// to the error signal.
    pub fn train_sample_weighted(
        &mut self,
        input: &Vector,
        output: &Vector,
        weights: &Vector,
    ) -> Float {
        self.predict(input);
        let mse = self.set_expected_output_weighted(output, weights);
        self.update();
        mse
    }

    /// Minibatch training: run `epochs` passes over the samples, updating
    /// the parameters every `batch_size` samples. When a random generator
    /// is given, the samples are visited in a different order at each
    /// epoch. Returns the mean squared error of the last epoch.
    pub fn train(
        &mut self,
        inputs: &[Vector],
        outputs: &[Vector],
        batch_size: usize,
        epochs: usize,
        mut rng: Option<&mut StdRng>,
    ) -> Float {
        assert_eq!(
            inputs.len(),
            outputs.len(),
            "every input sample needs an output sample"
        );
        assert!(batch_size > 0, "batch size must be at least one");

        let mut order: Vec<usize> = (0..inputs.len()).collect();
        let mut mse = 0.0;

        for epoch in 0..epochs {
            if let Some(rng) = rng.as_deref_mut() {
                order.shuffle(rng);
            }

            mse = 0.0;

            for (seen, &index) in order.iter().enumerate() {
                self.predict(&inputs[index]);
                mse += self.set_expected_output(&outputs[index]);

                if (seen + 1) % batch_size == 0 {
                    self.update();
                }
            }

            // Flush the last, possibly partial, batch
            if order.len() % batch_size != 0 {
                self.update();
            }

            mse /= inputs.len().max(1) as Float;

            debug!("epoch {epoch}: mse = {mse}");
        }

        mse
    }

    /// Train the network on a whole sequence using backpropagation through
    /// time, then update the parameters once. Returns the mean per-step
    /// squared error observed during the forward sweep.
    ///
    /// The sequence is processed in two sweeps. The forward sweep visits
    /// the steps in increasing order and records the error of each
    /// prediction. Only once every step has been forwarded does the
    /// backward sweep run, in decreasing order: each step's recurrent
    /// state is restored, the step is predicted again so that stateless
    /// values are consistent, and the recorded error is injected and
    /// back-propagated. Restoring a step only works if the network was
    /// forwarded through it in order, which is why no error is injected
    /// during the forward sweep.
    pub fn train_sequence(
        &mut self,
        inputs: &[Vector],
        outputs: &[Vector],
        weights: Option<&[Vector]>,
    ) -> Float {
        assert_eq!(
            inputs.len(),
            outputs.len(),
            "every input step needs an output step"
        );

        if let Some(weights) = weights {
            assert_eq!(
                weights.len(),
                inputs.len(),
                "every step needs a weight vector"
            );
        }

        let steps = inputs.len();
        let mut errors: Vec<Vector> = Vec::with_capacity(steps);
        let mut mse = 0.0;

        for t in 0..steps {
            self.set_current_timestep(t);

            let prediction = self.predict(&inputs[t]);
            let mut error = &outputs[t] - &prediction;

            if let Some(weights) = weights {
                error = error * &weights[t];
            }

            mse += mean_squared(&error);
            errors.push(error);
        }

        for t in (0..steps).rev() {
            self.set_current_timestep(t);
            self.predict(&inputs[t]);
            self.set_error(&errors[t]);
        }

        self.update();

        let mse = mse / steps.max(1) as Float;

        trace!("sequence of {steps} steps trained, mse = {mse}");

        mse
    }

    /// Write the parameters of every node to the serializer, in the order
    /// the nodes were added.
    pub fn save(&self, serializer: &mut NetworkSerializer) {
        self.nodes.serialize(serializer);
    }

    /// Restore the parameters of every node from the serializer. The
    /// network must have exactly the topology of the one that was saved.
    pub fn load(&mut self, serializer: &mut NetworkSerializer) {
        self.nodes.deserialize(serializer);
    }
}

fn mean_squared(error: &Vector) -> Float {
    if error.is_empty() {
        return 0.0;
    }

    error.iter().map(|e| e * e).sum::<Float>() / error.len() as Float
}
