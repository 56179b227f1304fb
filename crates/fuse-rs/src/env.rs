use std::env;
use std::str::FromStr;
use std::sync::OnceLock;

static FUSERS_MAX_NAME_LEN: OnceLock<Option<usize>> = OnceLock::new();
static FUSERS_SCOPE_LOWER_BOUND: OnceLock<Option<i64>> = OnceLock::new();
static FUSERS_MIN_SCOPE_SIZE: OnceLock<Option<usize>> = OnceLock::new();
static FUSERS_L1_FUSION: OnceLock<Option<bool>> = OnceLock::new();
static FUSERS_L2_FUSION: OnceLock<Option<bool>> = OnceLock::new();
static FUSERS_TUNING_MODE: OnceLock<Option<bool>> = OnceLock::new();

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_bool(key: &str) -> Option<bool> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(parse_bool(&value)),
        _ => None,
    }
}

fn read_number<T: FromStr>(key: &str) -> Option<T> {
    let value = env::var(key).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("ignoring {key}={value:?}: not a valid number");
            None
        }
    }
}

pub(crate) fn max_fused_name_len() -> Option<usize> {
    *FUSERS_MAX_NAME_LEN.get_or_init(|| read_number("FUSERS_MAX_NAME_LEN"))
}

pub(crate) fn scope_lower_bound() -> Option<i64> {
    *FUSERS_SCOPE_LOWER_BOUND.get_or_init(|| read_number("FUSERS_SCOPE_LOWER_BOUND"))
}

pub(crate) fn min_scope_size() -> Option<usize> {
    *FUSERS_MIN_SCOPE_SIZE.get_or_init(|| read_number("FUSERS_MIN_SCOPE_SIZE"))
}

pub(crate) fn l1_fusion_enabled() -> Option<bool> {
    *FUSERS_L1_FUSION.get_or_init(|| read_bool("FUSERS_L1_FUSION"))
}

pub(crate) fn l2_fusion_enabled() -> Option<bool> {
    *FUSERS_L2_FUSION.get_or_init(|| read_bool("FUSERS_L2_FUSION"))
}

pub(crate) fn tuning_mode() -> Option<bool> {
    *FUSERS_TUNING_MODE.get_or_init(|| read_bool("FUSERS_TUNING_MODE"))
}
