//! Debug snapshots and leak reports

use crate::config::ConfigError;
use crate::handle::{NativeId, ResourceKind};
use crate::registry::{LifecycleState, ResourceRecord};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Point-in-time description of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugInfo {
    /// Kind of the wrapped object
    pub kind: ResourceKind,
    /// Lifecycle state when the snapshot was taken
    pub state: LifecycleState,
    /// Native id; kept after destruction for diagnostics only
    pub native_id: NativeId,
    /// Debug tag of the owner, if the record has one
    pub owner_tag: Option<String>,
    /// Number of attached children
    pub child_count: usize,
    /// The record's own debug tag
    pub debug_tag: String,
    /// Release requests queued but not yet drained
    pub pending_finalizations: u32,
    /// `file:line` of the creating call
    pub alloc_site: String,
}

impl DebugInfo {
    /// Snapshot `record`
    pub fn of(record: &ResourceRecord) -> Self {
        let site = record.alloc_site();
        Self {
            kind: record.kind(),
            state: record.state(),
            native_id: record.handle().native_id,
            owner_tag: record.owner().map(|owner| owner.debug_tag()),
            child_count: record.child_count(),
            debug_tag: record.debug_tag(),
            pending_finalizations: record.pending_finalizations(),
            alloc_site: format!("{}:{}", site.file(), site.line()),
        }
    }
}

/// Every record that was still live when the report was taken
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakReport {
    /// Live records in registration order
    pub entries: Vec<DebugInfo>,
}

impl LeakReport {
    /// Build a report from live records
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a std::sync::Arc<ResourceRecord>>) -> Self {
        Self {
            entries: records.into_iter().map(|record| DebugInfo::of(record)).collect(),
        }
    }

    /// Number of leaked records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing leaked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of leaked records of `kind`
    pub fn count_of(&self, kind: ResourceKind) -> usize {
        self.entries.iter().filter(|entry| entry.kind == kind).count()
    }

    /// Render the report as pretty RON
    pub fn to_ron(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Write the report to `path` as RON
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_ron()?).map_err(ConfigError::Io)
    }

    /// Emit one warning per leaked record
    pub fn log(&self) {
        for entry in &self.entries {
            log::warn!(
                "Leaked {} {} ({}) allocated at {}",
                entry.kind,
                entry.native_id,
                entry.debug_tag,
                entry.alloc_site
            );
        }
    }
}
