//! Replication log configuration.

use crate::types::Namespace;

/// How this node participates in replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationMode {
    /// Standalone node; nothing is logged.
    Disabled,
    /// Replica set member; logs to `local.oplog.rs`.
    ReplicaSet,
    /// Legacy master/slave; logs to `local.oplog.$main`.
    MasterSlave,
}

impl ReplicationMode {
    /// Returns true if writes are logged in this mode.
    #[must_use]
    pub const fn is_logging_enabled(self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Returns the oplog collection namespace for this mode.
    ///
    /// Returns `None` when logging is disabled.
    #[must_use]
    pub fn oplog_namespace(self) -> Option<Namespace> {
        match self {
            Self::Disabled => None,
            Self::ReplicaSet => Some(Namespace::new("local.oplog.rs")),
            Self::MasterSlave => Some(Namespace::new("local.oplog.$main")),
        }
    }
}

/// What to do with a reserved slot whose write never happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolePolicy {
    /// Record the slot as skipped; readers see a gap.
    Skip,
    /// Write a no-op placeholder entry at the slot.
    WriteNoop,
}

/// Configuration for the replication log.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Replication mode.
    pub mode: ReplicationMode,

    /// Whether to sync the store after every append (safer but slower).
    pub sync_on_append: bool,

    /// Handling of aborted slots.
    pub hole_policy: HolePolicy,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            mode: ReplicationMode::ReplicaSet,
            sync_on_append: true,
            hole_policy: HolePolicy::Skip,
        }
    }
}

impl ReplicationConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the replication mode.
    #[must_use]
    pub const fn mode(mut self, mode: ReplicationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets whether to sync after every append.
    #[must_use]
    pub const fn sync_on_append(mut self, value: bool) -> Self {
        self.sync_on_append = value;
        self
    }

    /// Sets the hole policy.
    #[must_use]
    pub const fn hole_policy(mut self, policy: HolePolicy) -> Self {
        self.hole_policy = policy;
        self
    }

    /// Returns true if writes are logged.
    #[must_use]
    pub const fn is_logging_enabled(&self) -> bool {
        self.mode.is_logging_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ReplicationConfig::default();
        assert_eq!(config.mode, ReplicationMode::ReplicaSet);
        assert!(config.sync_on_append);
        assert_eq!(config.hole_policy, HolePolicy::Skip);
        assert!(config.is_logging_enabled());
    }

    #[test]
    fn builder_pattern() {
        let config = ReplicationConfig::new()
            .mode(ReplicationMode::Disabled)
            .sync_on_append(false)
            .hole_policy(HolePolicy::WriteNoop);

        assert!(!config.is_logging_enabled());
        assert!(!config.sync_on_append);
        assert_eq!(config.hole_policy, HolePolicy::WriteNoop);
    }

    #[test]
    fn oplog_name_follows_mode() {
        assert_eq!(ReplicationMode::Disabled.oplog_namespace(), None);
        assert_eq!(
            ReplicationMode::ReplicaSet.oplog_namespace(),
            Some(Namespace::new("local.oplog.rs"))
        );
        assert_eq!(
            ReplicationMode::MasterSlave
                .oplog_namespace()
                .map(|ns| ns.coll().to_string()),
            Some("oplog.$main".to_string())
        );
    }
}
