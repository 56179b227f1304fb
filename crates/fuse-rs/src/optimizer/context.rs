use std::collections::BTreeSet;
use std::sync::Arc;

use crate::env;
use crate::kernel::{global_handle_store, global_kernel_registry, HandleStore, KernelRegistry};

/// Tunables for scope validation and descriptor synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionConfig {
    /// Longest fused node name kept verbatim before falling back to `<first>_fused`.
    pub max_fused_name_len: usize,
    /// Scope ids below this bound belong to earlier passes and are never regrouped.
    pub scope_lower_bound: i64,
    /// Validated scopes smaller than this are left unfused. The default of 1 splices
    /// single-node scopes too.
    pub min_scope_size: usize,
    pub l1_fusion_enabled: bool,
    pub l2_fusion_enabled: bool,
    pub tuning_mode: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_fused_name_len: 512,
            scope_lower_bound: 0,
            min_scope_size: 1,
            l1_fusion_enabled: false,
            l2_fusion_enabled: false,
            tuning_mode: false,
        }
    }
}

impl FusionConfig {
    /// Defaults overridden by `FUSERS_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_fused_name_len: env::max_fused_name_len().unwrap_or(defaults.max_fused_name_len),
            scope_lower_bound: env::scope_lower_bound().unwrap_or(defaults.scope_lower_bound),
            min_scope_size: env::min_scope_size()
                .unwrap_or(defaults.min_scope_size)
                .max(1),
            l1_fusion_enabled: env::l1_fusion_enabled().unwrap_or(defaults.l1_fusion_enabled),
            l2_fusion_enabled: env::l2_fusion_enabled().unwrap_or(defaults.l2_fusion_enabled),
            tuning_mode: env::tuning_mode().unwrap_or(defaults.tuning_mode),
        }
    }
}

/// External collaborators consulted while synthesizing fused descriptors.
#[derive(Clone)]
pub struct FusionServices {
    pub registry: Arc<dyn KernelRegistry>,
    pub handles: Arc<dyn HandleStore>,
}

impl FusionServices {
    pub fn new(registry: Arc<dyn KernelRegistry>, handles: Arc<dyn HandleStore>) -> Self {
        Self { registry, handles }
    }

    /// Services backed by the process-wide registry and handle store.
    pub fn global() -> Self {
        Self {
            registry: global_kernel_registry(),
            handles: global_handle_store(),
        }
    }
}

pub struct FusionContext {
    config: FusionConfig,
    services: FusionServices,
    failed_scopes: BTreeSet<i64>,
}

impl FusionContext {
    pub fn new(config: FusionConfig, services: FusionServices) -> Self {
        Self {
            config,
            services,
            failed_scopes: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn services(&self) -> &FusionServices {
        &self.services
    }

    /// Forgets the failures of an earlier run. Scope ids are only meaningful within one graph.
    pub fn clear_failed_scopes(&mut self) {
        self.failed_scopes.clear();
    }

    pub fn record_failed_scope(&mut self, scope: i64) {
        self.failed_scopes.insert(scope);
    }

    /// Scopes whose splice failed during the latest run.
    pub fn failed_scopes(&self) -> impl Iterator<Item = i64> + '_ {
        self.failed_scopes.iter().copied()
    }
}
