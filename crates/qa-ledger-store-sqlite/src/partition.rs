use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionSummary {
    pub index: usize,
    pub rows: usize,
    pub first_key: String,
    pub last_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionReport {
    pub partition_size: usize,
    pub total_partitions: usize,
    pub committed: Vec<PartitionSummary>,
}

impl PartitionReport {
    #[must_use]
    pub fn committed_rows(&self) -> usize {
        self.committed.iter().map(|partition| partition.rows).sum()
    }
}

/// One partition rolled back. Partitions before it stay committed and the
/// ones after it were never attempted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[error("partition {index} of {total_partitions} rolled back at {}: {cause}", .failing_key.as_deref().unwrap_or("<begin/commit>"))]
pub struct PartitionFailure {
    pub index: usize,
    pub failing_key: Option<String>,
    pub partition_size: usize,
    pub total_partitions: usize,
    pub committed: Vec<PartitionSummary>,
    pub cause: String,
}

impl PartitionFailure {
    /// Partitions that still need a commit, the failed one included.
    #[must_use]
    pub fn remaining_partitions(&self) -> usize {
        self.total_partitions.saturating_sub(self.index)
    }
}

#[must_use]
pub fn partition_count(items: usize, partition_size: usize) -> usize {
    items.div_ceil(partition_size.max(1))
}
