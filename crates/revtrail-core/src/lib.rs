#![deny(unsafe_code)]
#![doc = "revtrail-core: 实体级变更审计引擎。"]
#![doc = ""]
#![doc = "引擎在宿主的工作单元（事务）边界内同步运行：拦截实体的创建/更新/删除，"]
#![doc = "为每个执行过审计写入的工作单元分配唯一修订号，并以只追加方式保存实体快照，"]
#![doc = "随后通过 [`AuditReader`] 回答历史、按修订号与按时间点的状态查询。"]

//! # 组件总览
//!
//! | 组件 | 模块 | 职责 |
//! | --- | --- | --- |
//! | 修订时钟 | [`clock`] | 线性化分配修订号，记录墙钟时间戳 |
//! | 变更拦截器 | [`interceptor`] | 读前写捕获前像/后像，按字段过滤 |
//! | 快照存储 | [`store`] | 只追加保存 `AuditRecord` |
//! | 修订元数据存储 | [`store`] | 每个修订一行，创建后不可变 |
//! | 审计读取器 | [`reader`] | 历史、`state_at` 与修订查询 |
//! | 操作者解析 | [`actor`] | 由宿主注入“当前是谁” |
//!
//! 入口为 [`AuditEngine`]：构建时注入 [`SchemaRegistry`]、存储与 [`AuditorResolver`]，
//! 每个宿主事务调用一次 [`AuditEngine::begin`] 获取 [`UnitOfWork`]。

pub mod actor;
pub mod clock;
pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod host;
pub mod ids;
pub mod interceptor;
#[cfg(feature = "json")]
pub mod journal;
pub mod layout;
pub mod reader;
pub mod record;
pub mod schema;
pub mod store;
/// 测试桩命名空间：可注入故障的存储与可计数的操作者解析器，供集成测试与示例复用。
pub mod test_stubs;
pub mod unit_of_work;
pub mod value;

pub use actor::{
    Actor, AnonymousAuditor, AuditActor, AuditorResolver, FixedAuditor, FnAuditor, SystemAuditor,
};
pub use clock::{ManualWallClock, RevisionClock, SystemWallClock, WallClock};
pub use config::{AuditConfig, ConfigError, DeletionPolicy, FailurePolicy, LayoutConfig};
pub use digest::SnapshotHasher;
pub use engine::{AuditEngine, AuditEngineBuilder};
pub use error::{AuditError, Result};
pub use host::{HostError, MemoryEntityTable};
pub use ids::{EntityId, EntityKey, EntityType, RevisionId, UnitOfWorkId};
pub use interceptor::{CapturedChange, ChangeInterceptor, EntityWriter, WriteError};
pub use layout::{AuditTableLayout, ColumnLayout, ColumnRole, PersistedLayout, RevisionTableLayout};
pub use reader::AuditReader;
pub use record::{AuditRecord, ChangeKind, HistoryEntry, Revision, RevisionDraft};
pub use schema::{
    BaseDefinition, EntitySchema, EntityTypeBuilder, FieldDef, FieldKind, FieldOrigin,
    ResolvedField, SchemaError, SchemaRegistry, SchemaRegistryBuilder,
};
pub use store::{
    InMemoryRevisionStore, InMemorySnapshotStore, RevisionStore, SnapshotStore, StoreError,
    StoreResult,
};
pub use unit_of_work::{CommitOutcome, UnitOfWork};
pub use value::{FieldMap, FieldValue, field_map};
