//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义审计引擎对外暴露的错误语义，区分“致命、需上抛”与“可按策略降级”的两类失败；
//! - 未命中（没有历史、没有修订）不是错误，由查询接口以 `Ok(None)` 或空集合表达。
//!
//! ## 分类（What）
//! - [`AuditError::ClockExhausted`]：修订号空间耗尽，致命，不重试；
//! - [`AuditError::SnapshotWriteFailed`] / [`AuditError::RevisionWriteFailed`]：存储写入失败，
//!   按 [`FailurePolicy`](crate::FailurePolicy) 决定上抛（fail-closed）或记录告警后放行（fail-open）；
//! - [`AuditError::InconsistentHistory`]：审计记录引用了不存在的修订，查询立即失败，绝不静默修补；
//! - 其余变体覆盖调用方误用（非法状态跃迁、已关闭的工作单元）与配置错误。

use thiserror::Error;

use crate::config::ConfigError;
use crate::ids::{EntityKey, EntityType, RevisionId, UnitOfWorkId};
#[cfg(feature = "json")]
use crate::journal::JournalError;
use crate::record::ChangeKind;
use crate::schema::SchemaError;
use crate::store::StoreError;

/// 引擎统一的 `Result` 别名。
pub type Result<T, E = AuditError> = std::result::Result<T, E>;

/// 审计引擎错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：让宿主在事务边界上一次性决定回滚还是继续，所有写路径失败都收敛到该枚举；
/// - **契约 (What)**：所有变体均为 `Send + Sync + 'static`，可跨线程传播，也可交给 `anyhow` 统一处理；
/// - **权衡 (Trade-offs)**：存储层错误以 [`StoreError`] 作为 `source` 保留，而非展开为字符串，便于调用方按类别重试。
#[derive(Debug, Error)]
pub enum AuditError {
    /// 修订号空间已耗尽（`u64` 溢出）。
    #[error("revision id space exhausted after revision {last}")]
    ClockExhausted { last: RevisionId },

    /// 追加审计记录失败。
    #[error("failed to append audit records for revision {revision}: {source}")]
    SnapshotWriteFailed {
        revision: RevisionId,
        #[source]
        source: StoreError,
    },

    /// 写入修订元数据失败。
    #[error("failed to persist revision {revision}: {source}")]
    RevisionWriteFailed {
        revision: RevisionId,
        #[source]
        source: StoreError,
    },

    /// 存储层读取失败。
    #[error("audit storage read failed: {0}")]
    StoreRead(#[source] StoreError),

    /// 审计记录引用了不存在的修订（参照完整性被破坏）。
    #[error("audit history of {entity} references missing revision {revision}")]
    InconsistentHistory {
        entity: EntityKey,
        revision: RevisionId,
    },

    /// 审计记录本身缺失重建状态所需的数据。
    #[error("audit record of {entity} at revision {revision} is malformed: {reason}")]
    MalformedRecord {
        entity: EntityKey,
        revision: RevisionId,
        reason: &'static str,
    },

    /// 同一工作单元内出现非法的变更序列，例如删除后再更新。
    #[error("illegal change sequence for {entity}: {from:?} followed by {to:?}")]
    IllegalTransition {
        entity: EntityKey,
        from: ChangeKind,
        to: ChangeKind,
    },

    /// 实体类型未在注册表中登记。
    #[error("entity type `{entity_type}` is not registered for auditing")]
    UnknownEntityType { entity_type: EntityType },

    /// 更新或删除前未能读取到前像。
    #[error("pre-image of {entity} is missing; cannot audit {kind:?}")]
    MissingPreImage { entity: EntityKey, kind: ChangeKind },

    /// 数值超出持久化列的取值范围。
    #[error("{what} {value} exceeds the BIGINT column range")]
    OutOfRange { what: &'static str, value: u64 },

    /// 工作单元已经提交或回滚。
    #[error("unit of work {unit} is already closed")]
    UnitOfWorkClosed { unit: UnitOfWorkId },

    /// 工作单元在 fail-closed 策略下已记录审计失败，只能回滚。
    #[error("unit of work {unit} was aborted by an earlier audit failure")]
    UnitOfWorkAborted { unit: UnitOfWorkId },

    /// 内部锁被毒化。
    #[error("lock guarding {resource} is poisoned")]
    LockPoisoned { resource: &'static str },

    /// 实体类型注册表构建失败。
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// 配置非法。
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 日志导入导出失败。
    #[cfg(feature = "json")]
    #[error(transparent)]
    Journal(#[from] JournalError),
}

impl AuditError {
    /// 是否属于“存储写入失败”类别，即受 [`FailurePolicy`](crate::FailurePolicy) 约束的错误。
    pub fn is_write_failure(&self) -> bool {
        matches!(
            self,
            AuditError::SnapshotWriteFailed { .. } | AuditError::RevisionWriteFailed { .. }
        )
    }

    /// 是否为致命错误：无论策略如何都必须上抛。
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuditError::ClockExhausted { .. }
                | AuditError::InconsistentHistory { .. }
                | AuditError::LockPoisoned { .. }
        )
    }
}
