//! 引擎配置：失败策略、删除策略、持久化布局命名与初始修订号。
//!
//! # 契约说明（What）
//! - 可由 TOML 文本加载（[`AuditConfig::from_toml_str`]），也可以在代码中以 `with_*` 方法构造；
//! - 所有字段都有缺省值，空文档即得到推荐配置：fail-closed + 墓碑即记录；
//! - 加载后统一经过 [`AuditConfig::validate`]，非法值以 [`ConfigError::Invalid`] 报告。
//!
//! ```toml
//! failure_policy = "fail_closed"
//! deletion_policy = "tombstone_marker"
//! initial_revision = 1
//!
//! [layout]
//! revision_table = "REVINFO"
//! audit_table_suffix = "_AUD"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse audit configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read audit configuration from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid audit configuration: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// 审计写入失败时的处理策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 上抛错误，宿主事务随之中止，审计与业务数据不会分叉（推荐）。
    #[default]
    FailClosed,
    /// 记录告警后放行宿主写入，接受审计空洞。必须显式选择。
    FailOpen,
}

impl FailurePolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::FailClosed => "fail_closed",
            FailurePolicy::FailOpen => "fail_open",
        }
    }

    pub const fn is_fail_open(self) -> bool {
        matches!(self, FailurePolicy::FailOpen)
    }
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_closed" => Ok(FailurePolicy::FailClosed),
            "fail_open" => Ok(FailurePolicy::FailOpen),
            _ => Err(ConfigError::Invalid {
                field: "failure_policy",
                reason: format!("'{s}' is not one of 'fail_closed', 'fail_open'"),
            }),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 删除事件的审计表示。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// `DELETED` 记录携带最后已知状态。
    #[default]
    TombstoneRecord,
    /// `DELETED` 记录不携带字段，只把实体此前的记录标记为已关闭。
    TombstoneMarker,
}

impl DeletionPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            DeletionPolicy::TombstoneRecord => "tombstone_record",
            DeletionPolicy::TombstoneMarker => "tombstone_marker",
        }
    }

    pub const fn keeps_last_state(self) -> bool {
        matches!(self, DeletionPolicy::TombstoneRecord)
    }
}

impl FromStr for DeletionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "tombstone_record" | "record" => Ok(DeletionPolicy::TombstoneRecord),
            "tombstone_marker" | "marker" => Ok(DeletionPolicy::TombstoneMarker),
            _ => Err(ConfigError::Invalid {
                field: "deletion_policy",
                reason: format!("'{s}' is not one of 'tombstone_record', 'tombstone_marker'"),
            }),
        }
    }
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 持久化布局命名。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub revision_table: String,
    pub revision_column: String,
    pub timestamp_column: String,
    pub actor_column: String,
    pub revision_type_column: String,
    pub audit_table_suffix: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            revision_table: "REVINFO".to_owned(),
            revision_column: "REV".to_owned(),
            timestamp_column: "REVTSTMP".to_owned(),
            actor_column: "actor".to_owned(),
            revision_type_column: "REVTYPE".to_owned(),
            audit_table_suffix: "_AUD".to_owned(),
        }
    }
}

/// 引擎配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub failure_policy: FailurePolicy,
    pub deletion_policy: DeletionPolicy,
    pub initial_revision: u64,
    pub layout: LayoutConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            deletion_policy: DeletionPolicy::default(),
            initial_revision: 1,
            layout: LayoutConfig::default(),
        }
    }
}

impl AuditConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: AuditConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }

    pub fn with_initial_revision(mut self, first: u64) -> Self {
        self.initial_revision = first;
        self
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_revision == 0 {
            return Err(ConfigError::Invalid {
                field: "initial_revision",
                reason: "must be at least 1".to_owned(),
            });
        }
        let layout = &self.layout;
        let identifiers = [
            ("layout.revision_table", &layout.revision_table),
            ("layout.revision_column", &layout.revision_column),
            ("layout.timestamp_column", &layout.timestamp_column),
            ("layout.actor_column", &layout.actor_column),
            ("layout.revision_type_column", &layout.revision_type_column),
            ("layout.audit_table_suffix", &layout.audit_table_suffix),
        ];
        for (field, value) in identifiers {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be empty".to_owned(),
                });
            }
            if !value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("'{value}' is not a plain SQL identifier"),
                });
            }
        }
        Ok(())
    }
}
