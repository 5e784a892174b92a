#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use crate::graph::{Float, Node, Port, PortRef};
    use crate::init;
    use crate::nodes::activation::{ActivationFn, SigmoidFn, TanhFn};
    use crate::nodes::{
        BpttVariant, Dense, LinearActivation, MergeProduct, MergeSum, NetworkNode,
        RecurrentNetworkNode, SigmoidActivation, TanhActivation,
    };
    use crate::serializer::NetworkSerializer;

    // ========================================================================
    // MERGE NODES
    // ========================================================================

    #[test]
    fn merge_first_input_defines_the_output_shape() {
        let mut sum = MergeSum::new();

        sum.add_input(Port::shared(3));

        assert_eq!(sum.output().borrow().len(), 3);
    }

    #[test]
    #[should_panic(expected = "merge input shape mismatch")]
    fn merge_rejects_an_input_of_different_shape() {
        let mut sum = MergeSum::new();

        sum.add_input(Port::shared(3));
        sum.add_input(Port::shared(2));
    }

    #[test]
    fn merge_sum_adds_values_and_routes_errors_unchanged() {
        let a = Port::shared(2);
        let b = Port::shared(2);
        let mut sum = MergeSum::new();

        sum.add_input(a.clone());
        sum.add_input(b.clone());

        a.borrow_mut().value = array![1.0, 2.0];
        b.borrow_mut().value = array![3.0, 4.0];
        sum.forward();

        assert_eq!(sum.output().borrow().value, array![4.0, 6.0]);

        sum.output().borrow_mut().error = array![0.5, -1.0];
        sum.backward();

        assert_eq!(a.borrow().error, array![0.5, -1.0]);
        assert_eq!(b.borrow().error, array![0.5, -1.0]);
    }

    #[test]
    fn backward_accumulates_instead_of_overwriting() {
        // Two backward passes without clear_error in between must double
        // the error at the inputs
        let a = Port::shared(1);
        let mut sum = MergeSum::new();

        sum.add_input(a.clone());
        sum.output().borrow_mut().error = array![2.0];

        sum.backward();
        sum.backward();

        assert_eq!(a.borrow().error, array![4.0]);
    }

    #[test]
    fn merge_product_divides_the_output_to_invert_the_product() {
        let a = Port::shared(1);
        let b = Port::shared(1);
        let mut product = MergeProduct::new();

        product.add_input(a.clone());
        product.add_input(b.clone());

        a.borrow_mut().value = array![2.0];
        b.borrow_mut().value = array![3.0];
        product.forward();

        assert_eq!(product.output().borrow().value, array![6.0]);

        product.output().borrow_mut().error = array![1.0];
        product.backward();

        // d(a*b)/da = b, d(a*b)/db = a
        assert_abs_diff_eq!(a.borrow().error[0], 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(b.borrow().error[0], 2.0, epsilon = 1e-5);
    }

    // ========================================================================
    // ACTIVATION NODES
    // ========================================================================

    #[test]
    fn tanh_matches_the_closed_form() {
        for x in [-4.0f32, -1.0, -0.1, 0.0, 0.3, 2.0, 5.0] {
            assert_abs_diff_eq!(TanhFn::apply(x), x.tanh(), epsilon = 1e-5);
        }
    }

    #[test]
    fn activation_derivatives_match_finite_differences() {
        let h = 1e-3f32;

        for x in [-1.2f32, -0.4, 0.3, 0.9] {
            let numeric = (TanhFn::apply(x + h) - TanhFn::apply(x - h)) / (2.0 * h);
            assert_abs_diff_eq!(numeric, TanhFn::derivative(TanhFn::apply(x)), epsilon = 1e-3);

            let numeric = (SigmoidFn::apply(x + h) - SigmoidFn::apply(x - h)) / (2.0 * h);
            assert_abs_diff_eq!(
                numeric,
                SigmoidFn::derivative(SigmoidFn::apply(x)),
                epsilon = 1e-3
            );
        }
    }

    #[test]
    fn activations_saturate_instead_of_overflowing() {
        for x in [-1e6f32, -1e3, 1e3, 1e6] {
            assert!(TanhFn::apply(x).is_finite());
            assert!(SigmoidFn::apply(x).is_finite());
        }

        assert_abs_diff_eq!(SigmoidFn::apply(1e6), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(SigmoidFn::apply(-1e6), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn activation_node_applies_elementwise() {
        let input = Port::shared(2);
        let mut tanh = TanhActivation::new();

        tanh.set_input(input.clone());
        input.borrow_mut().value = array![0.0, 1.0];
        tanh.forward();

        let output = tanh.output();
        assert_abs_diff_eq!(output.borrow().value[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(output.borrow().value[1], 1.0f32.tanh(), epsilon = 1e-5);

        output.borrow_mut().error = array![1.0, 1.0];
        tanh.backward();

        let y = 1.0f32.tanh();
        assert_abs_diff_eq!(input.borrow().error[0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(input.borrow().error[1], 1.0 - y * y, epsilon = 1e-5);
    }

    #[test]
    fn sigmoid_derivative_uses_the_output_value() {
        let input = Port::shared(1);
        let mut sigmoid = SigmoidActivation::new();

        sigmoid.set_input(input.clone());
        input.borrow_mut().value = array![0.7];
        sigmoid.forward();

        sigmoid.output().borrow_mut().error = array![2.0];
        sigmoid.backward();

        let y = SigmoidFn::apply(0.7);
        assert_abs_diff_eq!(input.borrow().error[0], 2.0 * y * (1.0 - y), epsilon = 1e-5);
    }

    // ========================================================================
    // DENSE NODE
    // ========================================================================

    #[test]
    fn dense_forward_computes_the_affine_transform() {
        let input = Port::shared(2);
        let mut dense = Dense::new(2, 0.05, 0.9, init::seeded(1));

        dense.set_input(input.clone());
        *dense.weights_mut() = array![[1.0, 2.0], [3.0, 4.0]];
        *dense.bias_mut() = array![0.5, -0.5];

        input.borrow_mut().value = array![1.0, -1.0];
        dense.forward();

        assert_eq!(dense.output().borrow().value, array![-0.5, -1.5]);
    }

    #[test]
    fn dense_gradient_matches_finite_differences() {
        let input = Port::shared(3);
        let mut dense = Dense::new(2, 0.05, 0.9, init::seeded(7));

        dense.set_input(input.clone());
        input.borrow_mut().value = array![0.4, -0.3, 0.8];
        dense.forward();

        let base: Float = dense.output().borrow().value.sum();

        // With loss = sum(y), the loss gradient at the output is all-ones
        dense.output().borrow_mut().error.fill(1.0);
        dense.backward();

        // Gradients are stored negated
        let analytic = -dense.d_weights()[[1, 2]];

        let eps = 1e-3;
        dense.weights_mut()[[1, 2]] += eps;
        dense.forward();

        let perturbed: Float = dense.output().borrow().value.sum();
        let numeric = (perturbed - base) / eps;

        assert_abs_diff_eq!(numeric, analytic, epsilon = 1e-3);
    }

    #[test]
    fn dense_backward_propagates_through_the_transpose() {
        let input = Port::shared(2);
        let mut dense = Dense::new(2, 0.05, 0.9, init::seeded(1));

        dense.set_input(input.clone());
        *dense.weights_mut() = array![[1.0, 2.0], [3.0, 4.0]];

        dense.output().borrow_mut().error = array![1.0, 1.0];
        dense.backward();

        // input error = W^T * output error
        assert_eq!(input.borrow().error, array![4.0, 6.0]);
    }

    #[test]
    fn dense_gradients_accumulate_across_backward_passes() {
        let input = Port::shared(1);
        let mut dense = Dense::new(1, 0.05, 0.9, init::seeded(1));

        dense.set_input(input.clone());
        input.borrow_mut().value = array![1.0];
        dense.output().borrow_mut().error = array![2.0];

        dense.backward();
        assert_eq!(dense.d_bias()[0], -2.0);

        dense.backward();
        assert_eq!(dense.d_bias()[0], -4.0);
    }

    #[test]
    fn dense_serialization_round_trips_parameters() {
        let input = Port::shared(2);
        let mut dense = Dense::new(1, 0.05, 0.9, init::seeded(3));
        dense.set_input(input.clone());

        let mut serializer = NetworkSerializer::new();
        dense.serialize(&mut serializer);

        // weights, weight average, bias, bias average
        assert_eq!(serializer.len(), 2 + 2 + 1 + 1);

        let mut other = Dense::new(1, 0.05, 0.9, init::seeded(99));
        other.set_input(input);
        other.deserialize(&mut serializer);

        assert_eq!(other.weights(), dense.weights());
        assert_eq!(other.bias(), dense.bias());
    }

    // ========================================================================
    // CONTAINER NODES
    // ========================================================================

    #[test]
    fn container_runs_children_in_order_and_back_in_reverse() {
        let input = Port::shared(2);
        let mut first = LinearActivation::new();
        first.set_input(input.clone());
        let mut second = LinearActivation::new();
        second.set_input(first.output());

        let mut container = NetworkNode::new();
        container.add_node(Box::new(first));
        container.add_node(Box::new(second));

        input.borrow_mut().value = array![1.5, -2.5];
        container.forward();

        assert_eq!(container.output().borrow().value, array![1.5, -2.5]);

        container.output().borrow_mut().error = array![1.0, 2.0];
        container.backward();

        // The error only reaches the input port if the second node ran
        // backward before the first one
        assert_eq!(input.borrow().error, array![1.0, 2.0]);
    }

    // ========================================================================
    // RECURRENT CONTAINER
    // ========================================================================

    fn recurrent_with_linear(variant: BpttVariant) -> (PortRef, RecurrentNetworkNode) {
        let input = Port::shared(2);
        let mut linear = LinearActivation::new();
        linear.set_input(input.clone());

        let mut container = RecurrentNetworkNode::new(variant);
        container.add_recurrent_node(&linear);
        container.add_node(Box::new(linear));

        (input, container)
    }

    #[test]
    fn recurrent_restores_the_previous_step_value() {
        let (input, mut container) = recurrent_with_linear(BpttVariant::Standard);
        let port = container.output();

        container.set_current_timestep(0);
        assert_eq!(port.borrow().value, array![0.0, 0.0]);

        input.borrow_mut().value = array![1.0, 2.0];
        container.forward();

        container.set_current_timestep(1);
        assert_eq!(port.borrow().value, array![1.0, 2.0]);

        input.borrow_mut().value = array![3.0, 4.0];
        container.forward();

        container.set_current_timestep(2);
        assert_eq!(port.borrow().value, array![3.0, 4.0]);
    }

    #[test]
    fn recurrent_state_is_a_pure_function_of_the_stored_history() {
        let (input, mut container) = recurrent_with_linear(BpttVariant::Standard);
        let port = container.output();

        container.set_current_timestep(0);
        input.borrow_mut().value = array![1.0, 2.0];
        container.forward();

        container.set_current_timestep(1);
        input.borrow_mut().value = array![3.0, 4.0];
        container.forward();

        container.set_current_timestep(2);
        let first_visit = port.borrow().value.clone();

        // Jumping around previously visited steps must not change what
        // step 2 restores
        container.set_current_timestep(1);
        assert_eq!(port.borrow().value, array![1.0, 2.0]);

        container.set_current_timestep(2);
        assert_eq!(port.borrow().value, first_visit);
    }

    #[test]
    fn standard_bptt_propagates_the_marginal_error_and_clips_it() {
        let (_input, mut container) = recurrent_with_linear(BpttVariant::Standard);
        let port = container.output();

        container.set_current_timestep(0);
        container.forward();
        container.set_current_timestep(1);
        container.forward();

        port.borrow_mut().error = array![100.0, -3.0];
        container.backward();

        // Nothing was restored at step 1, so the whole error moves back,
        // clipped to the hard bound
        container.set_current_timestep(0);
        assert_eq!(port.borrow().error, array![10.0, -3.0]);
    }

    #[test]
    fn standard_bptt_subtracts_the_restored_error() {
        let (_input, mut container) = recurrent_with_linear(BpttVariant::Standard);
        let port = container.output();

        for t in 0..3 {
            container.set_current_timestep(t);
            container.forward();
        }

        // Backward at step 2 records an error for step 1
        port.borrow_mut().error = array![6.0, 6.0];
        container.backward();

        // Entering step 1 restores that error; only what is added on top
        // of it propagates to step 0
        container.set_current_timestep(1);
        assert_eq!(port.borrow().error, array![6.0, 6.0]);

        port.borrow_mut().error += &array![2.0, 2.0];
        container.backward();

        container.set_current_timestep(0);
        assert_eq!(port.borrow().error, array![2.0, 2.0]);
    }

    #[test]
    fn experimental_bptt_normalizes_by_the_sequence_length() {
        let (_input, mut container) = recurrent_with_linear(BpttVariant::Experimental);
        let port = container.output();

        for t in 0..3 {
            container.set_current_timestep(t);
            container.forward();
        }

        port.borrow_mut().error = array![3.0, -9.0];
        container.backward();

        // Highest step seen is 2, so the error is divided by 2
        container.set_current_timestep(1);
        assert_eq!(port.borrow().error, array![1.5, -4.5]);
    }

    #[test]
    fn one_step_sequences_produce_finite_gradients_under_both_policies() {
        for variant in [BpttVariant::Standard, BpttVariant::Experimental] {
            let (input, mut container) = recurrent_with_linear(variant);
            let port = container.output();

            container.set_current_timestep(0);
            input.borrow_mut().value = array![0.5, -0.5];
            container.forward();

            port.borrow_mut().error = array![5.0, 5.0];
            container.backward();

            assert!(input.borrow().error.iter().all(|e| e.is_finite()));
            assert!(port.borrow().error.iter().all(|e| e.is_finite()));
        }
    }

    #[test]
    #[should_panic(expected = "skips ahead")]
    fn visiting_a_timestep_out_of_order_is_rejected() {
        let (_input, mut container) = recurrent_with_linear(BpttVariant::Standard);

        container.set_current_timestep(1);
    }

    #[test]
    fn reset_clears_the_history_and_the_recurrent_state() {
        let (input, mut container) = recurrent_with_linear(BpttVariant::Standard);
        let port = container.output();

        container.set_current_timestep(0);
        input.borrow_mut().value = array![1.0, 2.0];
        container.forward();
        container.set_current_timestep(1);
        container.forward();

        container.reset();

        assert_eq!(container.current_timestep(), 0);

        container.set_current_timestep(0);
        assert_eq!(port.borrow().value, array![0.0, 0.0]);
        assert_eq!(port.borrow().error, array![0.0, 0.0]);
    }

    // ========================================================================
    // SERIALIZER
    // ========================================================================

    #[test]
    fn serializer_reads_back_what_was_written() {
        let mut serializer = NetworkSerializer::new();

        serializer.write_weight(1.0);
        serializer.write_weight(-2.5);

        assert_eq!(serializer.len(), 2);
        assert_eq!(serializer.read_weight(), 1.0);
        assert_eq!(serializer.read_weight(), -2.5);
    }

    #[test]
    #[should_panic(expected = "read past the end")]
    fn serializer_rejects_reading_past_the_end() {
        let mut serializer = NetworkSerializer::new();

        serializer.write_weight(1.0);
        serializer.read_weight();
        serializer.read_weight();
    }

    #[test]
    fn serializer_round_trips_through_a_byte_stream() {
        let mut serializer = NetworkSerializer::new();

        for value in [0.25f32, -1.5, 3.0] {
            serializer.write_weight(value);
        }

        let mut bytes = Vec::new();
        serializer.save(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 12);

        let mut restored = NetworkSerializer::new();
        restored
            .load(&mut std::io::Cursor::new(bytes))
            .unwrap();

        assert_eq!(restored.data(), serializer.data());
    }

    #[test]
    fn serializer_rejects_a_truncated_byte_stream() {
        let bytes = vec![0u8; 6];
        let mut serializer = NetworkSerializer::new();

        let result = serializer.load(&mut std::io::Cursor::new(bytes));

        assert!(result.is_err());
    }
}
