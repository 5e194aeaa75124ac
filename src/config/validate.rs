//! Validation of replicator settings. Defaulting runs first (the min-log
//! derivation), then the sizing invariants in a fixed order; the first
//! violated rule is returned as a structured error naming the offending
//! parameters and their values. Validation is a pure function of its input.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::{
    ReplicatorSettings, DEFAULT_MIN_LOG_SIZE_DIVIDER, SMALLEST_MIN_LOG_SIZE_MB,
    SPARSE_MAX_STREAM_SIZE_MB,
};

const DEFAULT_RETRY_INTERVAL_SECS: i64 = 5;
const DEFAULT_BATCH_ACK_INTERVAL_MS: i64 = 15;
const DEFAULT_INITIAL_COPY_QUEUE_SIZE: i64 = 64;
const DEFAULT_MAX_COPY_QUEUE_SIZE: i64 = 1024;
const DEFAULT_MAX_REPLICATION_MESSAGE_SIZE: i64 = 50 * 1024 * 1024;
const DEFAULT_INITIAL_PRIMARY_QUEUE_SIZE: i64 = 64;
const DEFAULT_MAX_PRIMARY_QUEUE_SIZE: i64 = 1024;
const DEFAULT_INITIAL_SECONDARY_QUEUE_SIZE: i64 = 64;
const DEFAULT_MAX_SECONDARY_QUEUE_SIZE: i64 = 2048;
const DEFAULT_CHECKPOINT_THRESHOLD_MB: i64 = 50;
const DEFAULT_MIN_LOG_SIZE_MB: i64 = 0;
const DEFAULT_TRUNCATION_FACTOR: i64 = 2;
const DEFAULT_THROTTLING_FACTOR: i64 = 4;
const DEFAULT_MAX_STREAM_SIZE_MB: i64 = 1024;
const DEFAULT_MAX_RECORD_SIZE_KB: i64 = 1024;
const DEFAULT_MAX_METADATA_SIZE_KB: i64 = 4;
const DEFAULT_MAX_WRITE_QUEUE_DEPTH_KB: i64 = 0;
const DEFAULT_MAX_ACCUMULATED_BACKUP_LOG_SIZE_MB: i64 = 800;
const DEFAULT_SLOW_API_MONITORING_SECS: i64 = 300;
const DEFAULT_LOG_TRUNCATION_INTERVAL_SECS: i64 = 0;

const MIN_RECORD_SIZE_KB: i64 = 128;
/// The stream must hold at least this many maximum-size records.
const MIN_RECORDS_PER_STREAM: i64 = 16;

/// Shared-log identity: both-or-neither with its companion path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedLogSettings {
    pub id: Uuid,
    pub path: PathBuf,
}

/// Immutable, fully-validated configuration snapshot. Produced once per open
/// or reload and swapped wholesale; never mutated field-by-field.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub retry_interval: Duration,
    pub batch_ack_interval: Duration,
    pub initial_copy_queue_size: u64,
    pub max_copy_queue_size: u64,
    pub max_replication_message_size: u64,
    pub initial_primary_replication_queue_size: u64,
    pub max_primary_replication_queue_size: u64,
    pub max_primary_replication_queue_memory_size: u64,
    pub initial_secondary_replication_queue_size: u64,
    pub max_secondary_replication_queue_size: u64,
    pub max_secondary_replication_queue_memory_size: u64,
    pub checkpoint_threshold_mb: u64,
    /// Effective minimum log size after derivation.
    pub min_log_size_mb: u64,
    pub truncation_threshold_factor: u64,
    pub throttling_threshold_factor: u64,
    /// Effective stream size (the sparse constant when disk-usage
    /// optimization is enabled).
    pub max_stream_size_mb: u64,
    pub max_record_size_kb: u64,
    pub max_metadata_size_kb: u64,
    pub max_write_queue_depth_kb: u64,
    pub shared_log: Option<SharedLogSettings>,
    pub max_accumulated_backup_log_size_mb: u64,
    pub slow_api_monitoring: Duration,
    pub enable_incremental_backups_across_replicas: bool,
    pub log_truncation_interval: Duration,
    pub optimize_log_for_lower_disk_usage: bool,
}

impl ValidatedConfig {
    /// Log size beyond which checkpointed records may be discarded.
    pub fn truncation_threshold_mb(&self) -> u64 {
        self.min_log_size_mb * self.truncation_threshold_factor
    }

    /// Log size beyond which write admission is slowed.
    pub fn throttling_threshold_mb(&self) -> u64 {
        self.checkpoint_threshold_mb.max(self.min_log_size_mb) * self.throttling_threshold_factor
    }
}

impl Default for ValidatedConfig {
    fn default() -> Self {
        validate(&ReplicatorSettings::default())
            .unwrap_or_else(|err| unreachable!("default settings must validate: {err}"))
    }
}

/// Derives the effective minimum log size: 0 means "half the checkpoint
/// threshold", floored at 1 MB.
fn derive_min_log_size_mb(min_log_size_mb: i64, checkpoint_threshold_mb: i64) -> i64 {
    let derived = if min_log_size_mb == DEFAULT_MIN_LOG_SIZE_MB {
        checkpoint_threshold_mb / DEFAULT_MIN_LOG_SIZE_DIVIDER
    } else {
        min_log_size_mb
    };
    if min_log_size_mb == DEFAULT_MIN_LOG_SIZE_MB && derived < SMALLEST_MIN_LOG_SIZE_MB {
        SMALLEST_MIN_LOG_SIZE_MB
    } else {
        derived
    }
}

/// Applies defaulting, then the sizing invariants in fixed order, then the
/// logger/backup/monitoring checks. The first violated rule wins.
pub fn validate(settings: &ReplicatorSettings) -> Result<ValidatedConfig, ConfigError> {
    let checkpoint_threshold_mb = settings
        .checkpoint_threshold_mb
        .unwrap_or(DEFAULT_CHECKPOINT_THRESHOLD_MB);
    let raw_min_log_size_mb = settings.min_log_size_mb.unwrap_or(DEFAULT_MIN_LOG_SIZE_MB);
    let min_log_size_mb = derive_min_log_size_mb(raw_min_log_size_mb, checkpoint_threshold_mb);
    let truncation_threshold_factor = settings
        .truncation_threshold_factor
        .unwrap_or(DEFAULT_TRUNCATION_FACTOR);
    let throttling_threshold_factor = settings
        .throttling_threshold_factor
        .unwrap_or(DEFAULT_THROTTLING_FACTOR);
    let optimize_log_for_lower_disk_usage =
        settings.optimize_log_for_lower_disk_usage.unwrap_or(false);
    let max_stream_size_mb = if optimize_log_for_lower_disk_usage {
        SPARSE_MAX_STREAM_SIZE_MB
    } else {
        settings
            .max_stream_size_mb
            .unwrap_or(DEFAULT_MAX_STREAM_SIZE_MB)
    };
    let max_record_size_kb = settings
        .max_record_size_kb
        .unwrap_or(DEFAULT_MAX_RECORD_SIZE_KB);
    let max_metadata_size_kb = settings
        .max_metadata_size_kb
        .unwrap_or(DEFAULT_MAX_METADATA_SIZE_KB);

    // Invariant 1: the minimum log size must be at least 1 MB.
    if min_log_size_mb < 1 {
        return Err(ConfigError::MinLogSizeTooSmall { min_log_size_mb });
    }

    // Invariant 2: the log must be able to shrink below the stream size.
    if min_log_size_mb >= max_stream_size_mb {
        return Err(ConfigError::MinLogSizeNotBelowStreamSize {
            min_log_size_mb,
            max_stream_size_mb,
        });
    }

    // Invariant 3: truncation must leave at least one minimum log's worth of
    // headroom.
    if truncation_threshold_factor < 2 {
        return Err(ConfigError::TruncationFactorTooSmall {
            truncation_threshold_factor,
        });
    }

    // Invariant 4: the truncation threshold must sit below the stream size.
    if min_log_size_mb * truncation_threshold_factor >= max_stream_size_mb {
        return Err(ConfigError::TruncationThresholdNotBelowStreamSize {
            min_log_size_mb,
            truncation_threshold_factor,
            max_stream_size_mb,
        });
    }

    // Invariant 5: throttling must engage strictly after truncation.
    if throttling_threshold_factor < 3 {
        return Err(ConfigError::ThrottlingFactorTooSmall {
            throttling_threshold_factor,
        });
    }
    if throttling_threshold_factor <= truncation_threshold_factor {
        return Err(ConfigError::ThrottlingFactorNotAboveTruncationFactor {
            throttling_threshold_factor,
            truncation_threshold_factor,
        });
    }

    // Invariant 6: the throttling threshold must sit below the stream size.
    let throttling_threshold_mb =
        checkpoint_threshold_mb.max(min_log_size_mb) * throttling_threshold_factor;
    if throttling_threshold_mb >= max_stream_size_mb {
        return Err(ConfigError::ThrottlingThresholdNotBelowStreamSize {
            checkpoint_threshold_mb,
            min_log_size_mb,
            throttling_threshold_factor,
            max_stream_size_mb,
        });
    }

    // Invariant 7: record and metadata sizes align to 4 KB pages; records
    // have a floor.
    if max_metadata_size_kb < 0 {
        return Err(ConfigError::MetadataSizeNegative {
            max_metadata_size_kb,
        });
    }
    if max_metadata_size_kb % 4 != 0 {
        return Err(ConfigError::MetadataSizeNotMultipleOf4Kb {
            max_metadata_size_kb,
        });
    }
    if max_record_size_kb % 4 != 0 {
        return Err(ConfigError::RecordSizeNotMultipleOf4Kb { max_record_size_kb });
    }
    if max_record_size_kb < MIN_RECORD_SIZE_KB {
        return Err(ConfigError::RecordSizeTooSmall {
            max_record_size_kb,
            floor_kb: MIN_RECORD_SIZE_KB,
        });
    }

    // Invariant 8: shared-log identity and path travel together, and the
    // identity must be a 128-bit identifier.
    let shared_log = match (&settings.shared_log_id, &settings.shared_log_path) {
        (None, None) => None,
        (Some(id), None) => {
            return Err(ConfigError::SharedLogIdWithoutPath {
                shared_log_id: id.clone(),
            })
        }
        (None, Some(path)) => {
            return Err(ConfigError::SharedLogPathWithoutId {
                shared_log_path: path.clone(),
            })
        }
        (Some(id), Some(path)) => {
            let parsed = Uuid::parse_str(id).map_err(|_| ConfigError::SharedLogIdInvalid {
                shared_log_id: id.clone(),
            })?;
            let path = PathBuf::from(path);
            if !path.is_absolute() {
                return Err(ConfigError::SharedLogPathNotAbsolute {
                    shared_log_path: path.display().to_string(),
                });
            }
            Some(SharedLogSettings { id: parsed, path })
        }
    };

    // Checks below come from the logger/backup/monitoring surface.
    if checkpoint_threshold_mb < 1 {
        return Err(ConfigError::CheckpointThresholdTooSmall {
            checkpoint_threshold_mb,
        });
    }

    let max_accumulated_backup_log_size_mb = settings
        .max_accumulated_backup_log_size_mb
        .unwrap_or(DEFAULT_MAX_ACCUMULATED_BACKUP_LOG_SIZE_MB);
    if max_accumulated_backup_log_size_mb < 1 {
        return Err(ConfigError::BackupLogSizeTooSmall {
            max_accumulated_backup_log_size_mb,
        });
    }
    if max_accumulated_backup_log_size_mb >= max_stream_size_mb {
        return Err(ConfigError::BackupLogSizeNotBelowStreamSize {
            max_accumulated_backup_log_size_mb,
            max_stream_size_mb,
        });
    }

    let slow_api_monitoring_secs = settings
        .slow_api_monitoring_secs
        .unwrap_or(DEFAULT_SLOW_API_MONITORING_SECS);
    if slow_api_monitoring_secs < 0 {
        return Err(ConfigError::SlowApiMonitoringNegative {
            slow_api_monitoring_secs,
        });
    }

    let log_truncation_interval_secs = settings
        .log_truncation_interval_secs
        .unwrap_or(DEFAULT_LOG_TRUNCATION_INTERVAL_SECS);
    if log_truncation_interval_secs < 0 {
        return Err(ConfigError::TruncationIntervalNegative {
            log_truncation_interval_secs,
        });
    }

    let max_write_queue_depth_kb = settings
        .max_write_queue_depth_kb
        .unwrap_or(DEFAULT_MAX_WRITE_QUEUE_DEPTH_KB);
    if max_write_queue_depth_kb < 0
        || (max_write_queue_depth_kb != 0 && max_write_queue_depth_kb % 4 != 0)
    {
        return Err(ConfigError::WriteQueueDepthInvalid {
            max_write_queue_depth_kb,
        });
    }

    // The stream must have room for a minimum number of maximum-size records.
    let max_stream_size_kb = max_stream_size_mb.saturating_mul(1024);
    if max_stream_size_kb < MIN_RECORDS_PER_STREAM * max_record_size_kb {
        return Err(ConfigError::StreamSizeBelowRecordBudget {
            max_stream_size_mb,
            max_record_size_kb,
            min_records: MIN_RECORDS_PER_STREAM,
        });
    }

    Ok(ValidatedConfig {
        retry_interval: Duration::from_secs(
            settings
                .retry_interval_secs
                .unwrap_or(DEFAULT_RETRY_INTERVAL_SECS)
                .max(0) as u64,
        ),
        batch_ack_interval: Duration::from_millis(
            settings
                .batch_ack_interval_ms
                .unwrap_or(DEFAULT_BATCH_ACK_INTERVAL_MS)
                .max(0) as u64,
        ),
        initial_copy_queue_size: settings
            .initial_copy_queue_size
            .unwrap_or(DEFAULT_INITIAL_COPY_QUEUE_SIZE)
            .max(0) as u64,
        max_copy_queue_size: settings
            .max_copy_queue_size
            .unwrap_or(DEFAULT_MAX_COPY_QUEUE_SIZE)
            .max(0) as u64,
        max_replication_message_size: settings
            .max_replication_message_size
            .unwrap_or(DEFAULT_MAX_REPLICATION_MESSAGE_SIZE)
            .max(0) as u64,
        initial_primary_replication_queue_size: settings
            .initial_primary_replication_queue_size
            .unwrap_or(DEFAULT_INITIAL_PRIMARY_QUEUE_SIZE)
            .max(0) as u64,
        max_primary_replication_queue_size: settings
            .max_primary_replication_queue_size
            .unwrap_or(DEFAULT_MAX_PRIMARY_QUEUE_SIZE)
            .max(0) as u64,
        max_primary_replication_queue_memory_size: settings
            .max_primary_replication_queue_memory_size
            .unwrap_or(0)
            .max(0) as u64,
        initial_secondary_replication_queue_size: settings
            .initial_secondary_replication_queue_size
            .unwrap_or(DEFAULT_INITIAL_SECONDARY_QUEUE_SIZE)
            .max(0) as u64,
        max_secondary_replication_queue_size: settings
            .max_secondary_replication_queue_size
            .unwrap_or(DEFAULT_MAX_SECONDARY_QUEUE_SIZE)
            .max(0) as u64,
        max_secondary_replication_queue_memory_size: settings
            .max_secondary_replication_queue_memory_size
            .unwrap_or(0)
            .max(0) as u64,
        checkpoint_threshold_mb: checkpoint_threshold_mb as u64,
        min_log_size_mb: min_log_size_mb as u64,
        truncation_threshold_factor: truncation_threshold_factor as u64,
        throttling_threshold_factor: throttling_threshold_factor as u64,
        max_stream_size_mb: max_stream_size_mb as u64,
        max_record_size_kb: max_record_size_kb as u64,
        max_metadata_size_kb: max_metadata_size_kb as u64,
        max_write_queue_depth_kb: max_write_queue_depth_kb as u64,
        shared_log,
        max_accumulated_backup_log_size_mb: max_accumulated_backup_log_size_mb as u64,
        slow_api_monitoring: Duration::from_secs(slow_api_monitoring_secs as u64),
        enable_incremental_backups_across_replicas: settings
            .enable_incremental_backups_across_replicas
            .unwrap_or(false),
        log_truncation_interval: Duration::from_secs(log_truncation_interval_secs as u64),
        optimize_log_for_lower_disk_usage,
    })
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("MinLogSizeInMB {min_log_size_mb} must be at least 1")]
    MinLogSizeTooSmall { min_log_size_mb: i64 },
    #[error("MinLogSizeInMB {min_log_size_mb} must be smaller than MaxStreamSizeInMB {max_stream_size_mb}")]
    MinLogSizeNotBelowStreamSize {
        min_log_size_mb: i64,
        max_stream_size_mb: i64,
    },
    #[error("TruncationThresholdFactor {truncation_threshold_factor} must be at least 2")]
    TruncationFactorTooSmall { truncation_threshold_factor: i64 },
    #[error("MinLogSizeInMB {min_log_size_mb} * TruncationThresholdFactor {truncation_threshold_factor} must be smaller than MaxStreamSizeInMB {max_stream_size_mb}")]
    TruncationThresholdNotBelowStreamSize {
        min_log_size_mb: i64,
        truncation_threshold_factor: i64,
        max_stream_size_mb: i64,
    },
    #[error("ThrottlingThresholdFactor {throttling_threshold_factor} must be at least 3")]
    ThrottlingFactorTooSmall { throttling_threshold_factor: i64 },
    #[error("ThrottlingThresholdFactor {throttling_threshold_factor} must be greater than TruncationThresholdFactor {truncation_threshold_factor}")]
    ThrottlingFactorNotAboveTruncationFactor {
        throttling_threshold_factor: i64,
        truncation_threshold_factor: i64,
    },
    #[error("max(CheckpointThresholdInMB {checkpoint_threshold_mb}, MinLogSizeInMB {min_log_size_mb}) * ThrottlingThresholdFactor {throttling_threshold_factor} must be smaller than MaxStreamSizeInMB {max_stream_size_mb}")]
    ThrottlingThresholdNotBelowStreamSize {
        checkpoint_threshold_mb: i64,
        min_log_size_mb: i64,
        throttling_threshold_factor: i64,
        max_stream_size_mb: i64,
    },
    #[error("MaxMetadataSizeInKB {max_metadata_size_kb} must be non-negative")]
    MetadataSizeNegative { max_metadata_size_kb: i64 },
    #[error("MaxMetadataSizeInKB {max_metadata_size_kb} must be a multiple of 4")]
    MetadataSizeNotMultipleOf4Kb { max_metadata_size_kb: i64 },
    #[error("MaxRecordSizeInKB {max_record_size_kb} must be a multiple of 4")]
    RecordSizeNotMultipleOf4Kb { max_record_size_kb: i64 },
    #[error("MaxRecordSizeInKB {max_record_size_kb} must be at least {floor_kb}")]
    RecordSizeTooSmall {
        max_record_size_kb: i64,
        floor_kb: i64,
    },
    #[error("SharedLogId {shared_log_id:?} is set without a SharedLogPath")]
    SharedLogIdWithoutPath { shared_log_id: String },
    #[error("SharedLogPath {shared_log_path:?} is set without a SharedLogId")]
    SharedLogPathWithoutId { shared_log_path: String },
    #[error("SharedLogId {shared_log_id:?} is not a valid 128-bit identifier")]
    SharedLogIdInvalid { shared_log_id: String },
    #[error("SharedLogPath {shared_log_path:?} must be absolute")]
    SharedLogPathNotAbsolute { shared_log_path: String },
    #[error("CheckpointThresholdInMB {checkpoint_threshold_mb} must be at least 1")]
    CheckpointThresholdTooSmall { checkpoint_threshold_mb: i64 },
    #[error("MaxAccumulatedBackupLogSizeInMB {max_accumulated_backup_log_size_mb} must be at least 1")]
    BackupLogSizeTooSmall {
        max_accumulated_backup_log_size_mb: i64,
    },
    #[error("MaxAccumulatedBackupLogSizeInMB {max_accumulated_backup_log_size_mb} must be smaller than MaxStreamSizeInMB {max_stream_size_mb}")]
    BackupLogSizeNotBelowStreamSize {
        max_accumulated_backup_log_size_mb: i64,
        max_stream_size_mb: i64,
    },
    #[error("SlowApiMonitoringDuration {slow_api_monitoring_secs}s must be non-negative")]
    SlowApiMonitoringNegative { slow_api_monitoring_secs: i64 },
    #[error("LogTruncationIntervalSeconds {log_truncation_interval_secs} must be non-negative")]
    TruncationIntervalNegative { log_truncation_interval_secs: i64 },
    #[error("MaxWriteQueueDepthInKB {max_write_queue_depth_kb} must be 0 or a positive multiple of 4")]
    WriteQueueDepthInvalid { max_write_queue_depth_kb: i64 },
    #[error("MaxStreamSizeInMB {max_stream_size_mb} must hold at least {min_records} records of MaxRecordSizeInKB {max_record_size_kb}")]
    StreamSizeBelowRecordBudget {
        max_stream_size_mb: i64,
        max_record_size_kb: i64,
        min_records: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ReplicatorSettings {
        ReplicatorSettings::default()
    }

    #[test]
    fn defaults_validate() {
        let config = validate(&settings()).unwrap();
        assert_eq!(config.checkpoint_threshold_mb, 50);
        assert_eq!(config.min_log_size_mb, 25);
        assert_eq!(config.max_stream_size_mb, 1024);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.batch_ack_interval, Duration::from_millis(15));
    }

    #[test]
    fn min_log_size_derivation_floors_at_one() {
        let mut s = settings();
        s.checkpoint_threshold_mb = Some(1);
        s.min_log_size_mb = Some(0);
        let config = validate(&s).unwrap();
        assert_eq!(config.min_log_size_mb, 1);
    }

    #[test]
    fn explicit_min_log_size_is_kept() {
        let mut s = settings();
        s.min_log_size_mb = Some(10);
        let config = validate(&s).unwrap();
        assert_eq!(config.min_log_size_mb, 10);
    }

    #[test]
    fn validation_is_pure() {
        let mut s = settings();
        s.checkpoint_threshold_mb = Some(10);
        s.min_log_size_mb = Some(10);
        s.truncation_threshold_factor = Some(2);
        s.throttling_threshold_factor = Some(3);
        s.max_stream_size_mb = Some(100);
        assert_eq!(validate(&s), validate(&s));
    }

    #[test]
    fn compatible_sizing_passes_all_rules() {
        let mut s = settings();
        s.truncation_threshold_factor = Some(2);
        s.throttling_threshold_factor = Some(3);
        s.min_log_size_mb = Some(10);
        s.checkpoint_threshold_mb = Some(10);
        s.max_stream_size_mb = Some(100);
        let config = validate(&s).unwrap();
        assert_eq!(config.truncation_threshold_mb(), 20);
        assert_eq!(config.throttling_threshold_mb(), 30);
    }

    #[test]
    fn oversized_thresholds_fail_the_throttling_rule() {
        let mut s = settings();
        s.truncation_threshold_factor = Some(2);
        s.throttling_threshold_factor = Some(3);
        s.min_log_size_mb = Some(10);
        s.checkpoint_threshold_mb = Some(10);
        s.max_stream_size_mb = Some(25);
        let err = validate(&s).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ThrottlingThresholdNotBelowStreamSize {
                checkpoint_threshold_mb: 10,
                min_log_size_mb: 10,
                throttling_threshold_factor: 3,
                max_stream_size_mb: 25,
            }
        );
    }

    #[test]
    fn each_sizing_rule_reports_itself() {
        let mut s = settings();
        s.min_log_size_mb = Some(-1);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::MinLogSizeTooSmall { .. })
        ));

        let mut s = settings();
        s.min_log_size_mb = Some(2048);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::MinLogSizeNotBelowStreamSize { .. })
        ));

        let mut s = settings();
        s.truncation_threshold_factor = Some(1);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::TruncationFactorTooSmall { .. })
        ));

        let mut s = settings();
        s.min_log_size_mb = Some(400);
        s.truncation_threshold_factor = Some(3);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::TruncationThresholdNotBelowStreamSize { .. })
        ));

        let mut s = settings();
        s.throttling_threshold_factor = Some(2);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::ThrottlingFactorTooSmall { .. })
        ));

        let mut s = settings();
        s.truncation_threshold_factor = Some(4);
        s.throttling_threshold_factor = Some(4);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::ThrottlingFactorNotAboveTruncationFactor { .. })
        ));

        let mut s = settings();
        s.max_metadata_size_kb = Some(-4);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::MetadataSizeNegative { .. })
        ));

        let mut s = settings();
        s.max_metadata_size_kb = Some(6);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::MetadataSizeNotMultipleOf4Kb { .. })
        ));

        let mut s = settings();
        s.max_record_size_kb = Some(130);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::RecordSizeNotMultipleOf4Kb { .. })
        ));

        let mut s = settings();
        s.max_record_size_kb = Some(124);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::RecordSizeTooSmall { .. })
        ));
    }

    #[test]
    fn shared_log_settings_travel_together() {
        let mut s = settings();
        s.shared_log_id = Some("c0e554a9-5936-4655-b175-46b6f969549f".to_string());
        assert!(matches!(
            validate(&s),
            Err(ConfigError::SharedLogIdWithoutPath { .. })
        ));

        let mut s = settings();
        s.shared_log_path = Some("/var/log/shared".to_string());
        assert!(matches!(
            validate(&s),
            Err(ConfigError::SharedLogPathWithoutId { .. })
        ));

        let mut s = settings();
        s.shared_log_id = Some("not-a-guid".to_string());
        s.shared_log_path = Some("/var/log/shared".to_string());
        assert!(matches!(
            validate(&s),
            Err(ConfigError::SharedLogIdInvalid { .. })
        ));

        let mut s = settings();
        s.shared_log_id = Some("c0e554a9-5936-4655-b175-46b6f969549f".to_string());
        s.shared_log_path = Some("relative/shared".to_string());
        assert!(matches!(
            validate(&s),
            Err(ConfigError::SharedLogPathNotAbsolute { .. })
        ));

        let mut s = settings();
        s.shared_log_id = Some("c0e554a9-5936-4655-b175-46b6f969549f".to_string());
        s.shared_log_path = Some("/var/log/shared".to_string());
        let config = validate(&s).unwrap();
        assert!(config.shared_log.is_some());
    }

    #[test]
    fn sparse_log_replaces_stream_size() {
        let mut s = settings();
        s.optimize_log_for_lower_disk_usage = Some(true);
        s.max_stream_size_mb = Some(512);
        let config = validate(&s).unwrap();
        assert_eq!(config.max_stream_size_mb, 200 * 1024);
    }

    #[test]
    fn backup_log_budget_must_fit_the_stream() {
        let mut s = settings();
        s.max_accumulated_backup_log_size_mb = Some(1024);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::BackupLogSizeNotBelowStreamSize { .. })
        ));
    }

    #[test]
    fn stream_must_hold_sixteen_records() {
        let mut s = settings();
        s.max_stream_size_mb = Some(64);
        s.checkpoint_threshold_mb = Some(4);
        s.min_log_size_mb = Some(2);
        s.max_record_size_kb = Some(8192);
        s.max_accumulated_backup_log_size_mb = Some(32);
        assert!(matches!(
            validate(&s),
            Err(ConfigError::StreamSizeBelowRecordBudget { .. })
        ));
    }
}
