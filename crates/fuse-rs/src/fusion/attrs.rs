//! Attribute and extended-attribute names understood by the fusion engine.

/// Scope id assigned by the pattern matcher; `-1` or absent means not a candidate.
pub const SCOPE_ID: &str = "fusion_scope";
/// Node produces no device task and never joins a scope.
pub const NO_TASK: &str = "no_task";
/// Set on every node produced by a splice.
pub const IS_COMPILED_FUSION_OP: &str = "is_compiled_fusion_op";

pub const IMPLY_TYPE: &str = "imply_type";
pub const KERNEL_NAME: &str = "kernel_name";
pub const KERNEL_MAGIC: &str = "kernel_magic";
pub const KERNEL_META: &str = "kernel_meta";
pub const ENGINE: &str = "engine";
pub const CORE_TYPE: &str = "core_type";

/// Core type of kernels split into cooperating cube and vector sub-kernels.
pub const CORE_TYPE_MIX: &str = "MIX";
/// Attribute-name prefixes of the sub-kernels of a mixed kernel.
pub const MIX_PREFIXES: [&str; 2] = ["_mix_aic", "_mix_aiv"];

pub const THREAD_KERNEL_NAMES: &str = "thread_kernel_names";
pub const DEPENDENCIES: &str = "dependencies";
pub const WORKSPACE_BYTES: &str = "workspace_bytes";

pub const NEED_ATOMIC_CLEAN: &str = "need_atomic_clean";
pub const IS_DYNAMIC_SHAPE: &str = "is_dynamic_shape";
/// Marks reference operators whose outputs alias inputs named by `ref_port_index`.
pub const REFERENCE: &str = "reference";

/// Flattened `(output, input)` index pairs of in-place outputs.
pub const INPLACE_ALIAS: &str = "inplace_alias";
pub const SLICE_INFO_JSON: &str = "fusion_slice_info";
pub const DATADUMP_ORIGIN_NAMES: &str = "datadump_origin_op_names";
pub const DATADUMP_ORIGIN_TYPES: &str = "datadump_origin_op_types";

pub const L1_FUSION_SCOPE: &str = "l1_fusion_scope";
pub const L1_SPACE_SIZE: &str = "l1_space_size";
pub const L2_FUSION_SCOPE: &str = "l2_fusion_scope";
pub const L2_INFO: &str = "l2_info";
pub const TUNING_NODES: &str = "fusion_tuning_nodes";

/// Tensor-level: name of the node that produced the tensor before fusion.
pub const ORIGIN_NODE_NAME: &str = "origin_node_name";
/// Tensor-level: output index on that node.
pub const ORIGIN_OUTPUT_INDEX: &str = "origin_output_index";
/// Tensor-level: input index an output of a reference operator refers to.
pub const REF_PORT_INDEX: &str = "ref_port_index";

pub const EXT_KERNEL_BINARY: &str = "kernel_binary";
pub const EXT_SLICE_INFO: &str = "slice_info";
pub const EXT_OPTIMIZE_INFO: &str = "optimize_info";

pub const OP_TYPE_STRIDED_WRITE: &str = "StridedWrite";
pub const OP_TYPE_STRIDED_READ: &str = "StridedRead";
