//! Per-thread slice metadata used when one kernel is launched as several cooperating
//! instances, each working on a slice of every tensor.

use serde::{Deserialize, Serialize};

/// Half-open `[lower, upper)` range along one tensor axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimRange {
    pub lower: i64,
    pub upper: i64,
}

impl DimRange {
    pub fn new(lower: i64, upper: i64) -> Self {
        Self { lower, upper }
    }
}

/// Slice of one tensor for one thread: a range per axis.
pub type TensorSlice = Vec<DimRange>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpSliceInfo {
    /// 0 = manual slicing, 1 = automatic slicing.
    pub thread_mode: u32,
    pub slice_instance_num: u32,
    /// Indexed `[thread][input port]`.
    pub input_tensor_slice: Vec<Vec<TensorSlice>>,
    /// Indexed `[thread][output port]`.
    pub output_tensor_slice: Vec<Vec<TensorSlice>>,
}

impl OpSliceInfo {
    pub fn thread_count(&self) -> usize {
        self.input_tensor_slice
            .len()
            .max(self.output_tensor_slice.len())
    }

    pub fn input_slice(&self, thread: usize, port: usize) -> Option<&TensorSlice> {
        self.input_tensor_slice.get(thread)?.get(port)
    }

    pub fn output_slice(&self, thread: usize, port: usize) -> Option<&TensorSlice> {
        self.output_tensor_slice.get(thread)?.get(port)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(src: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(src)
    }
}
