mod scope_fusion;

pub use scope_fusion::{fuse_graph, ScopeFusionPass};
