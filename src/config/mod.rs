//! Replicator configuration: the raw settings surface, its defaults, and the
//! validator that turns raw settings into an immutable snapshot.

pub mod validate;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use validate::{validate, ConfigError, SharedLogSettings, ValidatedConfig};

/// Effective stream size when the log is optimized for lower disk usage
/// (sparse log): the stream is allowed to grow far beyond the dense default.
pub const SPARSE_MAX_STREAM_SIZE_MB: i64 = 200 * 1024;

/// `MinLogSizeInMB = 0` means "derive from the checkpoint threshold".
pub const DEFAULT_MIN_LOG_SIZE_DIVIDER: i64 = 2;
pub const SMALLEST_MIN_LOG_SIZE_MB: i64 = 1;

/// Raw replicator settings as read from the external configuration source.
/// Absent fields take the documented defaults during validation; nothing is
/// range-checked until [`validate`] runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicatorSettings {
    #[serde(rename = "RetryInterval", skip_serializing_if = "Option::is_none")]
    pub retry_interval_secs: Option<i64>,
    #[serde(
        rename = "BatchAcknowledgementInterval",
        skip_serializing_if = "Option::is_none"
    )]
    pub batch_ack_interval_ms: Option<i64>,
    #[serde(
        rename = "InitialCopyQueueSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_copy_queue_size: Option<i64>,
    #[serde(rename = "MaxCopyQueueSize", skip_serializing_if = "Option::is_none")]
    pub max_copy_queue_size: Option<i64>,
    #[serde(
        rename = "MaxReplicationMessageSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_replication_message_size: Option<i64>,
    #[serde(
        rename = "InitialPrimaryReplicationQueueSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_primary_replication_queue_size: Option<i64>,
    #[serde(
        rename = "MaxPrimaryReplicationQueueSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_primary_replication_queue_size: Option<i64>,
    #[serde(
        rename = "MaxPrimaryReplicationQueueMemorySize",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_primary_replication_queue_memory_size: Option<i64>,
    #[serde(
        rename = "InitialSecondaryReplicationQueueSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_secondary_replication_queue_size: Option<i64>,
    #[serde(
        rename = "MaxSecondaryReplicationQueueSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_secondary_replication_queue_size: Option<i64>,
    #[serde(
        rename = "MaxSecondaryReplicationQueueMemorySize",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_secondary_replication_queue_memory_size: Option<i64>,
    #[serde(
        rename = "CheckpointThresholdInMB",
        skip_serializing_if = "Option::is_none"
    )]
    pub checkpoint_threshold_mb: Option<i64>,
    #[serde(rename = "MinLogSizeInMB", skip_serializing_if = "Option::is_none")]
    pub min_log_size_mb: Option<i64>,
    #[serde(
        rename = "TruncationThresholdFactor",
        skip_serializing_if = "Option::is_none"
    )]
    pub truncation_threshold_factor: Option<i64>,
    #[serde(
        rename = "ThrottlingThresholdFactor",
        skip_serializing_if = "Option::is_none"
    )]
    pub throttling_threshold_factor: Option<i64>,
    #[serde(rename = "MaxStreamSizeInMB", skip_serializing_if = "Option::is_none")]
    pub max_stream_size_mb: Option<i64>,
    #[serde(rename = "MaxRecordSizeInKB", skip_serializing_if = "Option::is_none")]
    pub max_record_size_kb: Option<i64>,
    #[serde(rename = "MaxMetadataSizeInKB", skip_serializing_if = "Option::is_none")]
    pub max_metadata_size_kb: Option<i64>,
    #[serde(
        rename = "MaxWriteQueueDepthInKB",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_write_queue_depth_kb: Option<i64>,
    #[serde(rename = "SharedLogId", skip_serializing_if = "Option::is_none")]
    pub shared_log_id: Option<String>,
    #[serde(rename = "SharedLogPath", skip_serializing_if = "Option::is_none")]
    pub shared_log_path: Option<String>,
    #[serde(
        rename = "MaxAccumulatedBackupLogSizeInMB",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_accumulated_backup_log_size_mb: Option<i64>,
    #[serde(
        rename = "SlowApiMonitoringDuration",
        skip_serializing_if = "Option::is_none"
    )]
    pub slow_api_monitoring_secs: Option<i64>,
    #[serde(
        rename = "EnableIncrementalBackupsAcrossReplicas",
        skip_serializing_if = "Option::is_none"
    )]
    pub enable_incremental_backups_across_replicas: Option<bool>,
    #[serde(
        rename = "LogTruncationIntervalSeconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub log_truncation_interval_secs: Option<i64>,
    #[serde(
        rename = "OptimizeLogForLowerDiskUsage",
        skip_serializing_if = "Option::is_none"
    )]
    pub optimize_log_for_lower_disk_usage: Option<bool>,
}

impl ReplicatorSettings {
    /// Loads settings from a key-value configuration section. Unknown keys
    /// are rejected so misspelled settings fail loudly instead of silently
    /// falling back to defaults.
    pub fn from_values(values: &HashMap<String, String>) -> Result<Self, SettingsError> {
        let mut settings = Self::default();
        for (key, value) in values {
            match key.as_str() {
                "RetryInterval" => settings.retry_interval_secs = Some(parse_int(key, value)?),
                "BatchAcknowledgementInterval" => {
                    settings.batch_ack_interval_ms = Some(parse_int(key, value)?)
                }
                "InitialCopyQueueSize" => {
                    settings.initial_copy_queue_size = Some(parse_int(key, value)?)
                }
                "MaxCopyQueueSize" => settings.max_copy_queue_size = Some(parse_int(key, value)?),
                "MaxReplicationMessageSize" => {
                    settings.max_replication_message_size = Some(parse_int(key, value)?)
                }
                "InitialPrimaryReplicationQueueSize" => {
                    settings.initial_primary_replication_queue_size = Some(parse_int(key, value)?)
                }
                "MaxPrimaryReplicationQueueSize" => {
                    settings.max_primary_replication_queue_size = Some(parse_int(key, value)?)
                }
                "MaxPrimaryReplicationQueueMemorySize" => {
                    settings.max_primary_replication_queue_memory_size =
                        Some(parse_int(key, value)?)
                }
                "InitialSecondaryReplicationQueueSize" => {
                    settings.initial_secondary_replication_queue_size = Some(parse_int(key, value)?)
                }
                "MaxSecondaryReplicationQueueSize" => {
                    settings.max_secondary_replication_queue_size = Some(parse_int(key, value)?)
                }
                "MaxSecondaryReplicationQueueMemorySize" => {
                    settings.max_secondary_replication_queue_memory_size =
                        Some(parse_int(key, value)?)
                }
                "CheckpointThresholdInMB" => {
                    settings.checkpoint_threshold_mb = Some(parse_int(key, value)?)
                }
                "MinLogSizeInMB" => settings.min_log_size_mb = Some(parse_int(key, value)?),
                "TruncationThresholdFactor" => {
                    settings.truncation_threshold_factor = Some(parse_int(key, value)?)
                }
                "ThrottlingThresholdFactor" => {
                    settings.throttling_threshold_factor = Some(parse_int(key, value)?)
                }
                "MaxStreamSizeInMB" => settings.max_stream_size_mb = Some(parse_int(key, value)?),
                "MaxRecordSizeInKB" => settings.max_record_size_kb = Some(parse_int(key, value)?),
                "MaxMetadataSizeInKB" => {
                    settings.max_metadata_size_kb = Some(parse_int(key, value)?)
                }
                "MaxWriteQueueDepthInKB" => {
                    settings.max_write_queue_depth_kb = Some(parse_int(key, value)?)
                }
                "SharedLogId" => settings.shared_log_id = Some(value.clone()),
                "SharedLogPath" => settings.shared_log_path = Some(value.clone()),
                "MaxAccumulatedBackupLogSizeInMB" => {
                    settings.max_accumulated_backup_log_size_mb = Some(parse_int(key, value)?)
                }
                "SlowApiMonitoringDuration" => {
                    settings.slow_api_monitoring_secs = Some(parse_int(key, value)?)
                }
                "EnableIncrementalBackupsAcrossReplicas" => {
                    settings.enable_incremental_backups_across_replicas =
                        Some(parse_bool(key, value)?)
                }
                "LogTruncationIntervalSeconds" => {
                    settings.log_truncation_interval_secs = Some(parse_int(key, value)?)
                }
                "OptimizeLogForLowerDiskUsage" => {
                    settings.optimize_log_for_lower_disk_usage = Some(parse_bool(key, value)?)
                }
                _ => {
                    return Err(SettingsError::UnknownKey { key: key.clone() });
                }
            }
        }
        Ok(settings)
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64, SettingsError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// External source the lifecycle controller (re)loads raw settings from.
pub trait SettingsSource: Send + Sync {
    fn load(&self) -> Result<ReplicatorSettings, SettingsError>;
}

/// Source backed by a fixed key-value section; also the handle a host uses
/// to push dynamic configuration changes in tests and embeddings.
#[derive(Debug, Default)]
pub struct StaticSettingsSource {
    values: parking_lot::RwLock<HashMap<String, String>>,
}

impl StaticSettingsSource {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values: parking_lot::RwLock::new(values),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

impl SettingsSource for StaticSettingsSource {
    fn load(&self) -> Result<ReplicatorSettings, SettingsError> {
        ReplicatorSettings::from_values(&self.values.read())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("unrecognized configuration key {key:?}")]
    UnknownKey { key: String },
    #[error("configuration key {key:?} has invalid value {value:?}")]
    InvalidValue { key: String, value: String },
}
