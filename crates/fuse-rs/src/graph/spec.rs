use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::graph::slice_info::OpSliceInfo;
use crate::kernel::KernelBinary;

/// Scalar element types carried by tensor descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum DType {
    Bool,
    Si8,
    Ui8,
    Si16,
    Si32,
    Si64,
    Bf16,
    F16,
    F32,
    F64,
}

impl DType {
    /// Returns the storage size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::Si8 | DType::Ui8 => 1,
            DType::Si16 | DType::Bf16 | DType::F16 => 2,
            DType::Si32 | DType::F32 => 4,
            DType::Si64 | DType::F64 => 8,
        }
    }
}

/// Logical tensor shape. Negative extents mark dynamic dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<i64>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<i64>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn is_static(&self) -> bool {
        self.dims.iter().all(|dim| *dim >= 0)
    }

    /// Returns the element count when every dimension is static.
    pub fn element_count(&self) -> Option<u64> {
        let mut count = 1u64;
        for dim in &self.dims {
            let dim = u64::try_from(*dim).ok()?;
            count = count.checked_mul(dim)?;
        }
        Some(count)
    }
}

/// Tensor metadata attached to one data port of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub dtype: DType,
    pub shape: Shape,
    /// Transfer size in bytes once known; overrides the nominal size.
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub attrs: AttrMap,
}

impl TensorDesc {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self {
            dtype,
            shape,
            size: None,
            attrs: AttrMap::new(),
        }
    }

    /// Nominal byte size derived from dtype and a fully static shape.
    pub fn nominal_size(&self) -> Option<u64> {
        let count = self.shape.element_count()?;
        count.checked_mul(self.dtype.size_in_bytes() as u64)
    }
}

/// Typed attribute value. The set of cases is closed so merge policies can match on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum AttrValue {
    Bool(bool),
    I64(i64),
    String(String),
    Bytes(Arc<[u8]>),
    BoolList(Vec<bool>),
    I64List(Vec<i64>),
    StringList(Vec<String>),
    BytesList(Vec<Arc<[u8]>>),
}

impl AttrValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::I64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64_list(&self) -> Option<&[i64]> {
        match self {
            AttrValue::I64List(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            AttrValue::StringList(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    /// Returns `true` for the list cases.
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            AttrValue::BoolList(_)
                | AttrValue::I64List(_)
                | AttrValue::StringList(_)
                | AttrValue::BytesList(_)
        )
    }
}

pub type AttrMap = BTreeMap<String, AttrValue>;

/// Access pattern record attached to strided read/write adapter nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StridedInfo {
    /// Number of strided blocks transferred.
    pub batch: i64,
    /// Distance in elements between the starts of consecutive blocks.
    pub stride: i64,
    /// Elements transferred per block.
    pub dim: i64,
}

impl StridedInfo {
    /// Bytes spanned by the access: the last block starts at `(batch - 1) * stride`.
    pub fn transfer_size(&self, dtype: DType) -> Option<u64> {
        if self.batch <= 0 || self.stride < 0 || self.dim < 0 {
            return None;
        }
        let span = (self.batch - 1)
            .checked_mul(self.stride)?
            .checked_add(self.dim)?;
        let span = u64::try_from(span).ok()?;
        span.checked_mul(dtype.size_in_bytes() as u64)
    }
}

/// Auxiliary objects that do not belong in the serializable attribute map.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtAttr {
    KernelBinary(Arc<KernelBinary>),
    SliceInfo(OpSliceInfo),
    OptimizeInfo(StridedInfo),
}

pub type ExtAttrs = BTreeMap<String, ExtAttr>;

/// Operator descriptor for a single graph node.
#[derive(Debug, Clone, PartialEq)]
pub struct OpDesc {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    pub attrs: AttrMap,
    pub ext_attrs: ExtAttrs,
}

impl OpDesc {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: AttrMap::new(),
            ext_attrs: ExtAttrs::new(),
        }
    }

    pub fn with_input(mut self, desc: TensorDesc) -> Self {
        self.inputs.push(desc);
        self
    }

    pub fn with_output(mut self, desc: TensorDesc) -> Self {
        self.outputs.push(desc);
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn with_ext_attr(mut self, name: impl Into<String>, value: ExtAttr) -> Self {
        self.ext_attrs.insert(name.into(), value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn i64_attr(&self, name: &str) -> Option<i64> {
        self.attrs.get(name).and_then(AttrValue::as_i64)
    }

    pub fn bool_attr(&self, name: &str) -> Option<bool> {
        self.attrs.get(name).and_then(AttrValue::as_bool)
    }

    pub fn str_attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(AttrValue::as_str)
    }

    pub fn kernel_binary(&self) -> Option<&Arc<KernelBinary>> {
        self.ext_attrs.values().find_map(|ext| match ext {
            ExtAttr::KernelBinary(binary) => Some(binary),
            _ => None,
        })
    }

    pub fn slice_info(&self) -> Option<&OpSliceInfo> {
        self.ext_attrs.values().find_map(|ext| match ext {
            ExtAttr::SliceInfo(info) => Some(info),
            _ => None,
        })
    }

    pub fn strided_info(&self) -> Option<StridedInfo> {
        self.ext_attrs.values().find_map(|ext| match ext {
            ExtAttr::OptimizeInfo(info) => Some(*info),
            _ => None,
        })
    }
}
