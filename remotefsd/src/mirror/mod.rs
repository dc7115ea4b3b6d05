pub mod node;
pub mod node_ref;

pub use node::{LoadState, MirrorNode, MirrorTree, NodeId};
pub use node_ref::{NodeRef, NodeState};
