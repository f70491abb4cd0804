//! Read-only view of the local and remote execution resources.

use serde::{Deserialize, Serialize};

use crate::error::{ParforError, Result};

/// Source of parallelism and memory metrics. Each metric may be unknown.
pub trait InfrastructureProbe {
    fn local_parallelism(&self) -> Option<usize>;
    /// Raw local memory in bytes, before the utilization factor is applied.
    fn local_max_memory(&self) -> Option<u64>;
    fn remote_nodes(&self) -> Option<usize>;
    /// Concurrent task slots across the whole cluster.
    fn remote_parallelism(&self) -> Option<usize>;
    /// Raw per-task memory on a remote node in bytes.
    fn remote_max_memory(&self) -> Option<u64>;
}

/// Snapshot of all metrics, immutable for the duration of one rewrite pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infrastructure {
    pub local_parallelism: usize,
    pub local_max_memory: u64,
    pub remote_nodes: usize,
    pub remote_parallelism: usize,
    pub remote_max_memory: u64,
}

impl Infrastructure {
    pub fn resolve(probe: &dyn InfrastructureProbe) -> Result<Self> {
        fn require<T>(value: Option<T>, metric: &str) -> Result<T> {
            value.ok_or_else(|| {
                ParforError::ConfigMissing(format!("infrastructure metric '{metric}' unavailable"))
            })
        }

        Ok(Self {
            local_parallelism: require(probe.local_parallelism(), "local_parallelism")?,
            local_max_memory: require(probe.local_max_memory(), "local_max_memory")?,
            remote_nodes: require(probe.remote_nodes(), "remote_nodes")?,
            remote_parallelism: require(probe.remote_parallelism(), "remote_parallelism")?,
            remote_max_memory: require(probe.remote_max_memory(), "remote_max_memory")?,
        })
    }
}

/// Probe returning fixed values; `None` fields model unavailable metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticInfrastructure {
    pub local_parallelism: Option<usize>,
    pub local_max_memory: Option<u64>,
    pub remote_nodes: Option<usize>,
    pub remote_parallelism: Option<usize>,
    pub remote_max_memory: Option<u64>,
}

impl StaticInfrastructure {
    pub fn new(
        local_parallelism: usize,
        local_max_memory: u64,
        remote_nodes: usize,
        remote_parallelism: usize,
        remote_max_memory: u64,
    ) -> Self {
        Self {
            local_parallelism: Some(local_parallelism),
            local_max_memory: Some(local_max_memory),
            remote_nodes: Some(remote_nodes),
            remote_parallelism: Some(remote_parallelism),
            remote_max_memory: Some(remote_max_memory),
        }
    }

    /// Machine without a cluster attached.
    pub fn local_only(local_parallelism: usize, local_max_memory: u64) -> Self {
        Self::new(local_parallelism, local_max_memory, 0, 0, 0)
    }
}

impl From<Infrastructure> for StaticInfrastructure {
    fn from(value: Infrastructure) -> Self {
        Self::new(
            value.local_parallelism,
            value.local_max_memory,
            value.remote_nodes,
            value.remote_parallelism,
            value.remote_max_memory,
        )
    }
}

impl InfrastructureProbe for StaticInfrastructure {
    fn local_parallelism(&self) -> Option<usize> {
        self.local_parallelism
    }

    fn local_max_memory(&self) -> Option<u64> {
        self.local_max_memory
    }

    fn remote_nodes(&self) -> Option<usize> {
        self.remote_nodes
    }

    fn remote_parallelism(&self) -> Option<usize> {
        self.remote_parallelism
    }

    fn remote_max_memory(&self) -> Option<u64> {
        self.remote_max_memory
    }
}
