pub mod graph;
pub mod variable;
pub mod backward;

pub use graph::{graph_len, reset_graph, with_graph, Graph, Node, NodeId, Op};
pub use variable::{softmax_rows, sum_rows, Variable};
pub use backward::{backward, Gradients};
