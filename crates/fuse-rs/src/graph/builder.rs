use crate::graph::arena::{ComputeGraph, GraphError, InPort, NodeId, OutPort};
use crate::graph::spec::{DType, OpDesc, Shape, TensorDesc};

/// Builds a tensor descriptor with fully static dimensions.
pub fn tensor_desc_static(dtype: DType, dims: &[i64]) -> TensorDesc {
    TensorDesc::new(dtype, Shape::new(dims.to_vec()))
}

/// Incremental graph construction helper.
///
/// Every op added through [`GraphBuilder::op`] takes one input port per listed producer and
/// gets `outputs` output ports sharing the same tensor descriptor.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: ComputeGraph,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: ComputeGraph::new(name),
        }
    }

    /// Adds a fully described node without wiring it.
    pub fn node(&mut self, desc: OpDesc) -> NodeId {
        self.graph.add_node(desc)
    }

    /// Adds a graph input with a single output.
    pub fn data(&mut self, name: &str, tensor: TensorDesc) -> NodeId {
        self.graph.add_node(OpDesc::new(name, "Data").with_output(tensor))
    }

    /// Adds `desc` extended with one input per producer and wires those producers in order.
    pub fn op(
        &mut self,
        mut desc: OpDesc,
        producers: &[OutPort],
        tensor: &TensorDesc,
        outputs: usize,
    ) -> Result<NodeId, GraphError> {
        for _ in producers {
            desc.inputs.push(tensor.clone());
        }
        for _ in 0..outputs {
            desc.outputs.push(tensor.clone());
        }
        let id = self.graph.add_node(desc);
        for (index, src) in producers.iter().enumerate() {
            self.graph.add_data_edge(*src, InPort::new(id, index))?;
        }
        Ok(id)
    }

    pub fn edge(&mut self, src: OutPort, dst: InPort) -> Result<(), GraphError> {
        self.graph.add_data_edge(src, dst)
    }

    pub fn ctrl(&mut self, src: NodeId, dst: NodeId) -> Result<(), GraphError> {
        self.graph.add_ctrl_edge(src, dst)
    }

    pub fn graph(&self) -> &ComputeGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ComputeGraph {
        &mut self.graph
    }

    pub fn finish(self) -> ComputeGraph {
        self.graph
    }
}
