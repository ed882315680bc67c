use nnstack_core::Tensor;
use std::cell::RefCell;

/// Index of a node on the current thread's tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// How a node's value was computed from earlier nodes.
#[derive(Debug, Clone, Copy)]
pub enum Op {
    Leaf,
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    MatMul(NodeId, NodeId),
    Relu(NodeId),
    Sigmoid(NodeId),
    Tanh(NodeId),
    /// Row-wise softmax of an `[n, k]` matrix.
    SoftmaxRows(NodeId),
    /// `[n, k]` to `[n, 1]`.
    SumRows(NodeId),
    MeanAll(NodeId),
    MulScalar(NodeId, f64),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub op: Op,
    pub shape: Vec<usize>,
    pub value: Tensor<f64>,
    pub requires_grad: bool,
}

/// Append-only tape. Node ids are positions, so ids only ever point backwards.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn add_node(&mut self, op: Op, value: Tensor<f64>, requires_grad: bool) -> NodeId {
        let shape = value.shape_vec();
        self.nodes.push(Node { op, shape, value, requires_grad });
        NodeId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// Rayon workers computing gradient shards each record onto their own tape.
thread_local! {
    static TAPE: RefCell<Graph> = RefCell::new(Graph::default());
}

/// Run `f` against this thread's tape.
pub fn with_graph<F, R>(f: F) -> R
where
    F: FnOnce(&mut Graph) -> R,
{
    TAPE.with(|g| f(&mut g.borrow_mut()))
}

/// Drop every node recorded on this thread. Variables created earlier become stale.
pub fn reset_graph() {
    TAPE.with(|g| *g.borrow_mut() = Graph::default());
}

/// Nodes currently recorded on this thread.
pub fn graph_len() -> usize {
    with_graph(|g| g.len())
}
