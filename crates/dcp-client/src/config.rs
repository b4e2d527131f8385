//! 类型化配置模型，镜像外部接口表中列出的选项。
//!
//! 解析配置文件/环境变量不在本 crate 范围内；调用方构造好 [`Config`] 后交给引擎，
//! 引擎只负责 [`Config::validate`]。

use dcp_core::error::DcpError;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub hosts: Vec<String>,
    pub username: String,
    pub password: String,
    pub bucket_name: String,
    pub scope_name: Option<String>,
    pub collection_names: Vec<String>,
    pub dcp: DcpTransportConfig,
    pub metadata: MetadataConfig,
    pub checkpoint: CheckpointConfig,
    pub health_check: HealthCheckConfig,
    pub leader_election: LeaderElectionConfig,
    pub secure_connection: bool,
    pub root_ca_path: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DcpTransportConfig {
    pub group_name: String,
    pub buffer_size: usize,
    pub connection_buffer_size: usize,
    pub connection_timeout: Duration,
}

impl Default for DcpTransportConfig {
    fn default() -> Self {
        Self {
            group_name: "default".to_owned(),
            buffer_size: 16 * 1024 * 1024,
            connection_buffer_size: 20 * 1024 * 1024,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetadataBackendKind {
    Couchbase,
    File,
}

#[derive(Clone, Debug)]
pub struct MetadataConfig {
    pub kind: MetadataBackendKind,
    pub read_only: bool,
    pub key_prefix: String,
    /// 仅当 `kind == File` 时使用：检查点 JSON 文件路径。
    pub file_path: Option<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            kind: MetadataBackendKind::Couchbase,
            read_only: false,
            key_prefix: "_dcp:".to_owned(),
            file_path: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckpointScheduleKind {
    Auto,
    Manual,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AutoResetPolicy {
    Latest,
    None,
}

#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    pub kind: CheckpointScheduleKind,
    pub interval: Duration,
    pub auto_reset: AutoResetPolicy,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            kind: CheckpointScheduleKind::Auto,
            interval: Duration::from_secs(10),
            auto_reset: AutoResetPolicy::Latest,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HealthCheckConfig {
    pub disabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            failure_threshold: 5,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LeaderElectionConfig {
    pub enabled: bool,
    pub heartbeat_interval: Duration,
    pub peer_deadline: Duration,
}

impl Config {
    /// 校验配置的内部一致性；失败返回 [`DcpError::ConfigInvalid`]。
    pub fn validate(&self) -> Result<(), DcpError> {
        if self.hosts.is_empty() {
            return Err(DcpError::config_invalid("hosts must not be empty"));
        }
        if self.bucket_name.is_empty() {
            return Err(DcpError::config_invalid("bucket_name must not be empty"));
        }
        if self.checkpoint.kind == CheckpointScheduleKind::Auto
            && self.checkpoint.interval.is_zero()
        {
            return Err(DcpError::config_invalid(
                "checkpoint.interval must be non-zero when checkpoint.type is auto",
            ));
        }
        if !self.health_check.disabled && self.health_check.interval <= self.health_check.timeout
        {
            return Err(DcpError::config_invalid(
                "health_check.interval must be greater than health_check.timeout",
            ));
        }
        if self.metadata.kind == MetadataBackendKind::File && self.metadata.file_path.is_none() {
            return Err(DcpError::config_invalid(
                "metadata.file_path is required when metadata.type is file",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            hosts: vec!["127.0.0.1:11210".to_owned()],
            username: "user".to_owned(),
            password: "pass".to_owned(),
            bucket_name: "bucket".to_owned(),
            scope_name: None,
            collection_names: Vec::new(),
            dcp: DcpTransportConfig::default(),
            metadata: MetadataConfig::default(),
            checkpoint: CheckpointConfig::default(),
            health_check: HealthCheckConfig::default(),
            leader_election: LeaderElectionConfig::default(),
            secure_connection: false,
            root_ca_path: None,
        }
    }

    #[test]
    fn rejects_empty_hosts() {
        let mut config = valid_config();
        config.hosts.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_interval_when_auto() {
        let mut config = valid_config();
        config.checkpoint.interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_health_check_interval_not_greater_than_timeout() {
        let mut config = valid_config();
        config.health_check.interval = Duration::from_secs(1);
        config.health_check.timeout = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(valid_config().validate().is_ok());
    }
}
