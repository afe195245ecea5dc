//! 审计存储契约：快照存储与修订元数据存储。
//!
//! # 设计动机（Why）
//! - 快照存储独占 [`AuditRecord`]，修订元数据存储独占 [`Revision`]，两者只通过修订号关联；
//! - 引擎只依赖 trait，部署可以把它们落到任意持久化后端，`revtrail-contract-tests` 提供通用契约套件。
//!
//! # 契约说明（What）
//! - 追加是唯一的变更入口，不暴露更新或物理删除记录的接口；
//! - `append_all` 必须原子：要么整批可见，要么整批不可见；
//! - 追加返回后，后续读取必须能看到该记录；
//! - 未命中以 `Ok(None)` 或空 `Vec` 表达。

mod memory;

pub use memory::{InMemoryRevisionStore, InMemorySnapshotStore};

use thiserror::Error;

use crate::ids::{EntityKey, RevisionId};
use crate::record::{AuditRecord, Revision, RevisionDraft};

/// 存储后端错误。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// 后端暂不可用（I/O、连接中断等）。
    #[error("storage backend unavailable: {reason}")]
    Unavailable { reason: String },

    /// 记录的修订号不大于该实体已记录的最新修订号。
    #[error("record for {entity} at revision {attempted} is not after latest revision {latest}")]
    OutOfOrder {
        entity: EntityKey,
        latest: RevisionId,
        attempted: RevisionId,
    },

    /// 修订或 `(实体, 修订)` 组合已存在。
    #[error("duplicate entry at revision {revision}{}", .entity.as_ref().map(|e| format!(" for {e}")).unwrap_or_default())]
    Duplicate {
        revision: RevisionId,
        entity: Option<EntityKey>,
    },

    /// 后端基于约束拒绝写入。
    #[error("storage rejected write: {reason}")]
    Rejected { reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 快照存储：按 `(实体类型, 实体 ID, 修订号)` 保存审计记录。
///
/// # 教案式说明
/// - **意图 (Why)**：为读取器提供“某实体的全部记录”和“某修订之前的最后一条记录”两类查询；
/// - **契约 (What)**：
///   - `query` 按修订号升序返回；
///   - `query_at` 返回修订号不大于给定值的最后一条记录；
///   - `closed_at` 返回实体被 `DELETED` 记录关闭时的修订号，墓碑即标记策略依赖它；
/// - **前置条件**：同一实体的追加由宿主的行级写入顺序串行化，存储只负责拒绝乱序。
pub trait SnapshotStore: Send + Sync {
    fn append(&self, record: AuditRecord) -> StoreResult<()>;

    /// 原子追加一个修订的全部记录。
    fn append_all(&self, records: Vec<AuditRecord>) -> StoreResult<()>;

    fn query(&self, entity: &EntityKey) -> StoreResult<Vec<AuditRecord>>;

    fn query_at(&self, entity: &EntityKey, revision: RevisionId) -> StoreResult<Option<AuditRecord>>;

    /// 某个修订写入的全部记录，按实体键排序。
    fn records_in(&self, revision: RevisionId) -> StoreResult<Vec<AuditRecord>>;

    fn closed_at(&self, entity: &EntityKey) -> StoreResult<Option<RevisionId>>;

    /// 全量扫描，按修订号升序；用于导出与校验。
    fn scan(&self) -> StoreResult<Vec<AuditRecord>>;
}

/// 修订元数据存储：每个修订一行，创建后不可变。
pub trait RevisionStore: Send + Sync {
    /// 固化时钟分配的修订。
    fn create(&self, draft: RevisionDraft) -> StoreResult<Revision>;

    fn get(&self, id: RevisionId) -> StoreResult<Option<Revision>>;

    /// 时间戳不大于 `timestamp` 的最新修订。
    fn latest_at_or_before(&self, timestamp: u64) -> StoreResult<Option<Revision>>;

    fn latest(&self) -> StoreResult<Option<Revision>>;

    /// 撤销一个尚未有任何审计记录引用的修订。
    ///
    /// 仅供工作单元在快照追加失败时回滚自己刚创建的修订使用；返回是否确实移除。
    fn abandon(&self, id: RevisionId) -> StoreResult<bool>;

    /// 全量扫描，按修订号升序。
    fn scan(&self) -> StoreResult<Vec<Revision>>;
}
