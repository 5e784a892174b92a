use crate::graph::{Node, PortRef};
use crate::serializer::NetworkSerializer;

/// Node made of an ordered list of child nodes.
///
/// The children are stored in forward-propagation order: `forward` runs
/// them first to last, `backward` last to first. The output of the
/// container is the output of its last child.
#[derive(Default)]
pub struct NetworkNode {
    nodes: Vec<Box<dyn Node>>,
}

impl NetworkNode {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Add a node to this container. The first node receives the input,
    /// the last one produces the output.
    pub fn add_node(&mut self, node: Box<dyn Node>) {
        self.nodes.push(node);
    }

    /// Number of children in this container.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Node for NetworkNode {
    fn output(&self) -> PortRef {
        self.nodes
            .last()
            .expect("container node has no children")
            .output()
    }

    fn forward(&mut self) {
        for node in &mut self.nodes {
            node.forward();
        }
    }

    fn backward(&mut self) {
        for node in self.nodes.iter_mut().rev() {
            node.backward();
        }
    }

    fn update(&mut self) {
        for node in &mut self.nodes {
            node.update();
        }
    }

    fn clear_error(&mut self) {
        for node in &mut self.nodes {
            node.clear_error();
        }
    }

    fn reset(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
    }

    fn set_current_timestep(&mut self, timestep: usize) {
        for node in &mut self.nodes {
            node.set_current_timestep(timestep);
        }
    }

    fn serialize(&self, serializer: &mut NetworkSerializer) {
        for node in &self.nodes {
            node.serialize(serializer);
        }
    }

    fn deserialize(&mut self, serializer: &mut NetworkSerializer) {
        for node in &mut self.nodes {
            node.deserialize(serializer);
        }
    }
}
