use std::cell::RefCell;
use std::rc::Rc;

use crate::graph::PortRef;
use crate::serializer::NetworkSerializer;

/// Unit of computation in a network graph.
///
/// A node takes inputs and produces outputs, and is a generalization of
/// whatever can appear in a neural network: dense connections, activation
/// functions, merge points and recurrent memory are all nodes. A node only
/// ever reads the ports it was wired to, never another node's internals.
///
/// For instance, a single-hidden-layer feed-forward network is made by
/// connecting nodes this way:
///
/// `input -> Dense -> Sigmoid -> Dense -> Sigmoid`
pub trait Node {
    /// Output port of this node. The same port is returned on every call,
    /// and its shape is fixed once the node has been wired.
    fn output(&self) -> PortRef;

    /// Forward pass from the inputs to the output of this node. Only this
    /// node's own output value is written.
    fn forward(&mut self);

    /// Backward pass from the output to the inputs. Each input port's error
    /// receives an added contribution; it is never overwritten, because a
    /// port may feed several consumers.
    fn backward(&mut self);

    /// Update the parameters of this node based on the gradients computed
    /// by `backward`. Stateless nodes do nothing.
    fn update(&mut self) {}

    /// Clear the error signals in this node, not touching the parameters
    /// or any memory cells.
    fn clear_error(&mut self);

    /// Discard any memory stored in this node (but not its parameters).
    fn reset(&mut self) {}

    /// Inform the node of the current time step of the sequence being
    /// processed. Nodes without memory only clear their error signal;
    /// recurrent nodes restore the state recorded for that step.
    fn set_current_timestep(&mut self, timestep: usize) {
        let _ = timestep;
        self.clear_error();
    }

    /// Write this node's parameters to the serializer. Parameter-free nodes
    /// write nothing.
    fn serialize(&self, serializer: &mut NetworkSerializer) {
        let _ = serializer;
    }

    /// Read this node's parameters back from the serializer, in the exact
    /// order `serialize` wrote them.
    fn deserialize(&mut self, serializer: &mut NetworkSerializer) {
        let _ = serializer;
    }
}

// Shared handle to a node. Containers own their children as boxed trait
// objects; when a composite cell needs to keep driving one of its children
// after handing it to a container (adding gate inputs, running a selective
// forward pass), both sides hold an `Rc<RefCell<N>>` and the container
// stores a clone of it.
impl<N: Node> Node for Rc<RefCell<N>> {
    fn output(&self) -> PortRef {
        self.borrow().output()
    }

    fn forward(&mut self) {
        self.borrow_mut().forward();
    }

    fn backward(&mut self) {
        self.borrow_mut().backward();
    }

    fn update(&mut self) {
        self.borrow_mut().update();
    }

    fn clear_error(&mut self) {
        self.borrow_mut().clear_error();
    }

    fn reset(&mut self) {
        self.borrow_mut().reset();
    }

    fn set_current_timestep(&mut self, timestep: usize) {
        self.borrow_mut().set_current_timestep(timestep);
    }

    fn serialize(&self, serializer: &mut NetworkSerializer) {
        self.borrow().serialize(serializer);
    }

    fn deserialize(&mut self, serializer: &mut NetworkSerializer) {
        self.borrow_mut().deserialize(serializer);
    }
}
