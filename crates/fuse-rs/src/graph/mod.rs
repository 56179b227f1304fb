//! Compute graph data model: descriptors, the node arena, and topology utilities.

pub mod arena;
pub mod builder;
pub mod slice_info;
pub mod spec;
pub mod topology;

pub use arena::{ComputeGraph, GraphError, InPort, Node, NodeId, OutPort};
pub use builder::{tensor_desc_static, GraphBuilder};
pub use slice_info::{DimRange, OpSliceInfo, TensorSlice};
pub use spec::{
    AttrMap, AttrValue, DType, ExtAttr, ExtAttrs, OpDesc, Shape, StridedInfo, TensorDesc,
};
pub use topology::{topological_order, topological_sort, validate_graph_topology, TopologyError};
