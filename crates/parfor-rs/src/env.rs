use std::env;
use std::sync::OnceLock;

use crate::buffer::EvictionPolicy;

static PARFOR_NESTED_PARALLELISM: OnceLock<Option<bool>> = OnceLock::new();
static PARFOR_RANGE_TASKS: OnceLock<Option<bool>> = OnceLock::new();
static PARFOR_BUFFER_POLICY: OnceLock<Option<EvictionPolicy>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_bool(name: &str) -> Option<bool> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(parse_bool(&value)),
        _ => None,
    }
}

pub(crate) fn nested_parallelism_override() -> Option<bool> {
    *PARFOR_NESTED_PARALLELISM.get_or_init(|| read_bool("PARFOR_NESTED_PARALLELISM"))
}

pub(crate) fn range_tasks_override() -> Option<bool> {
    *PARFOR_RANGE_TASKS.get_or_init(|| read_bool("PARFOR_RANGE_TASKS"))
}

pub(crate) fn buffer_policy_override() -> Option<EvictionPolicy> {
    *PARFOR_BUFFER_POLICY.get_or_init(|| match env::var("PARFOR_BUFFER_POLICY") {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "lru" => Some(EvictionPolicy::Lru),
            "fifo" => Some(EvictionPolicy::Fifo),
            _ => None,
        },
        Err(_) => None,
    })
}
