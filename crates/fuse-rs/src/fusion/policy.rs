//! Attribute merge policies applied when several descriptors collapse into one.

use std::collections::BTreeSet;

use crate::graph::{AttrMap, AttrValue, OpDesc};
use crate::optimizer::FusionConfig;

use super::attrs;

/// How the values of one attribute across constituents combine into the fused value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Value from the first constituent (in graph order) that carries the attribute.
    FirstWins,
    /// Values of every constituent appended into one list, in constituent order.
    Concatenate,
    /// `true` when any constituent sets it; never turned back to `false`.
    ConditionalTrue,
    /// Recomputed for the fused node by the splice engine; never merged.
    Derived,
    /// Only kept while the gating feature is enabled.
    Gated(Gate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    L1Fusion,
    L2Fusion,
}

/// Policy catalogue. Attributes not listed here fall back to first-wins.
pub fn policy_for(name: &str) -> MergePolicy {
    match name {
        attrs::THREAD_KERNEL_NAMES | attrs::DEPENDENCIES | attrs::WORKSPACE_BYTES => {
            MergePolicy::Concatenate
        }
        attrs::NEED_ATOMIC_CLEAN | attrs::IS_DYNAMIC_SHAPE | attrs::REFERENCE => {
            MergePolicy::ConditionalTrue
        }
        attrs::IS_COMPILED_FUSION_OP
        | attrs::INPLACE_ALIAS
        | attrs::SLICE_INFO_JSON
        | attrs::DATADUMP_ORIGIN_NAMES
        | attrs::DATADUMP_ORIGIN_TYPES
        | attrs::TUNING_NODES => MergePolicy::Derived,
        attrs::L1_FUSION_SCOPE | attrs::L1_SPACE_SIZE => MergePolicy::Gated(Gate::L1Fusion),
        attrs::L2_FUSION_SCOPE | attrs::L2_INFO => MergePolicy::Gated(Gate::L2Fusion),
        _ => MergePolicy::FirstWins,
    }
}

/// Policy for `name` on a mixed-core kernel, where sub-kernel attributes carry a
/// `_mix_aic`/`_mix_aiv` prefix and follow the policy of the unprefixed name.
pub fn policy_for_mix(name: &str) -> MergePolicy {
    for prefix in attrs::MIX_PREFIXES {
        if let Some(base) = name.strip_prefix(prefix) {
            if !base.is_empty() {
                return policy_for(base);
            }
        }
    }
    policy_for(name)
}

/// Merges the attribute maps of `descs` (primary first) into one map.
///
/// Gated attributes follow first-wins while their gate is enabled and are dropped
/// otherwise. Derived attributes are left for the caller.
pub fn merge_attrs(descs: &[&OpDesc], config: &FusionConfig) -> AttrMap {
    let mix = first_value(descs, attrs::CORE_TYPE)
        .and_then(AttrValue::as_str)
        .is_some_and(|core| core == attrs::CORE_TYPE_MIX);

    let names: BTreeSet<&str> = descs
        .iter()
        .flat_map(|desc| desc.attrs.keys().map(String::as_str))
        .collect();

    let mut merged = AttrMap::new();
    for name in names {
        let policy = if mix {
            policy_for_mix(name)
        } else {
            policy_for(name)
        };
        let value = match policy {
            MergePolicy::FirstWins => first_value(descs, name).cloned(),
            MergePolicy::Concatenate => concatenate(descs, name),
            MergePolicy::ConditionalTrue => conditional_true(descs, name),
            MergePolicy::Derived => None,
            MergePolicy::Gated(gate) => {
                let enabled = match gate {
                    Gate::L1Fusion => config.l1_fusion_enabled,
                    Gate::L2Fusion => config.l2_fusion_enabled,
                };
                if enabled {
                    first_value(descs, name).cloned()
                } else {
                    None
                }
            }
        };
        if let Some(value) = value {
            merged.insert(name.to_string(), value);
        }
    }
    merged
}

pub fn first_value<'a>(descs: &[&'a OpDesc], name: &str) -> Option<&'a AttrValue> {
    descs.iter().find_map(|desc| desc.attrs.get(name))
}

/// Any `true` wins; otherwise the first value present is kept as-is.
pub fn conditional_true(descs: &[&OpDesc], name: &str) -> Option<AttrValue> {
    if descs
        .iter()
        .any(|desc| desc.bool_attr(name) == Some(true))
    {
        return Some(AttrValue::Bool(true));
    }
    first_value(descs, name).cloned()
}

/// Appends list values and promotes scalars to single-element lists of the same kind.
///
/// The first value seen fixes the list kind; values of another kind are skipped. A value
/// carried by a single constituent is kept unchanged.
pub fn concatenate(descs: &[&OpDesc], name: &str) -> Option<AttrValue> {
    let carriers: Vec<&OpDesc> = descs
        .iter()
        .copied()
        .filter(|desc| desc.attrs.contains_key(name))
        .collect();
    if let [only] = carriers.as_slice() {
        return only.attrs.get(name).cloned();
    }

    let mut acc: Option<AttrValue> = None;
    for desc in carriers {
        let Some(value) = desc.attrs.get(name) else {
            continue;
        };
        let Some(list) = to_list(value) else {
            continue;
        };
        match acc.as_mut() {
            None => acc = Some(list),
            Some(existing) => {
                if !append(existing, list) {
                    log::debug!(
                        "attribute `{name}` on `{}` has a different kind; skipped when \
                         concatenating",
                        desc.name
                    );
                }
            }
        }
    }
    acc
}

fn to_list(value: &AttrValue) -> Option<AttrValue> {
    Some(match value {
        AttrValue::Bool(v) => AttrValue::BoolList(vec![*v]),
        AttrValue::I64(v) => AttrValue::I64List(vec![*v]),
        AttrValue::String(v) => AttrValue::StringList(vec![v.clone()]),
        AttrValue::Bytes(v) => AttrValue::BytesList(vec![v.clone()]),
        list if list.is_list() => list.clone(),
        _ => return None,
    })
}

fn append(dst: &mut AttrValue, src: AttrValue) -> bool {
    match (dst, src) {
        (AttrValue::BoolList(dst), AttrValue::BoolList(src)) => dst.extend(src),
        (AttrValue::I64List(dst), AttrValue::I64List(src)) => dst.extend(src),
        (AttrValue::StringList(dst), AttrValue::StringList(src)) => dst.extend(src),
        (AttrValue::BytesList(dst), AttrValue::BytesList(src)) => dst.extend(src),
        _ => return false,
    }
    true
}
