//! 修订与审计记录的数据模型。
//!
//! - [`Revision`]：一个工作单元的审计变更，含修订号、时间戳与可选操作者，创建后不可变；
//! - [`AuditRecord`]：单个实体在某个修订中的快照，只追加、永不修改；
//! - [`HistoryEntry`]：读取器按修订号连接两者后的结果。

use serde::{Deserialize, Serialize};

use crate::actor::Actor;
use crate::ids::{EntityKey, RevisionId};
use crate::value::FieldMap;

/// 变更类别，对应持久化布局中的 `REVTYPE` 列。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    /// `REVTYPE` 编码：0=INSERT，1=UPDATE，2=DELETE。
    pub const fn rev_type(self) -> u8 {
        match self {
            ChangeKind::Created => 0,
            ChangeKind::Updated => 1,
            ChangeKind::Deleted => 2,
        }
    }

    pub const fn from_rev_type(code: u8) -> Option<Self> {
        match code {
            0 => Some(ChangeKind::Created),
            1 => Some(ChangeKind::Updated),
            2 => Some(ChangeKind::Deleted),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Created => "CREATED",
            ChangeKind::Updated => "UPDATED",
            ChangeKind::Deleted => "DELETED",
        }
    }
}

/// 修订时钟已分配、尚未持久化的修订。
///
/// 工作单元提交时交给 [`RevisionStore::create`](crate::RevisionStore::create)，
/// 由存储固化为 [`Revision`]；回滚时直接丢弃，修订号留下空洞。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionDraft {
    pub id: RevisionId,
    pub timestamp: u64,
    pub actor: Actor,
}

/// 已持久化的修订元数据。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    id: RevisionId,
    timestamp: u64,
    actor: Actor,
}

impl Revision {
    pub fn new(id: RevisionId, timestamp: u64, actor: Actor) -> Self {
        Self {
            id,
            timestamp,
            actor,
        }
    }

    pub fn id(&self) -> RevisionId {
        self.id
    }

    /// 自 Unix 纪元起的毫秒数。
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }
}

impl From<RevisionDraft> for Revision {
    fn from(draft: RevisionDraft) -> Self {
        Self::new(draft.id, draft.timestamp, draft.actor)
    }
}

/// 单个实体在单个修订中的审计记录。
///
/// # 教案式说明
/// - **意图 (Why)**：同时保存“变更前”与“变更后”两份视图，历史展示需要前像，按时间回溯需要后像；
/// - **契约 (What)**：
///   - `CREATED`：`field_snapshot` 与 `state_after` 均为创建时的审计字段全集；
///   - `UPDATED`：`field_snapshot` 为发生变化的审计字段在变更前的取值，`state_after` 为变更后的审计字段全集；
///   - `DELETED`：`state_after` 为空；墓碑即记录策略下 `field_snapshot` 保存最后已知状态，
///     墓碑即标记策略下为空；
/// - **权衡 (Trade-offs)**：后像冗余存储换取 `state_at` 单次查找，不必从 `CREATED` 逐条折叠。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    entity: EntityKey,
    revision_id: RevisionId,
    change_kind: ChangeKind,
    field_snapshot: Option<FieldMap>,
    state_after: Option<FieldMap>,
}

impl AuditRecord {
    pub fn created(entity: EntityKey, revision_id: RevisionId, state: FieldMap) -> Self {
        Self {
            entity,
            revision_id,
            change_kind: ChangeKind::Created,
            field_snapshot: Some(state.clone()),
            state_after: Some(state),
        }
    }

    pub fn updated(
        entity: EntityKey,
        revision_id: RevisionId,
        previous_values: FieldMap,
        state_after: FieldMap,
    ) -> Self {
        Self {
            entity,
            revision_id,
            change_kind: ChangeKind::Updated,
            field_snapshot: Some(previous_values),
            state_after: Some(state_after),
        }
    }

    /// `last_state` 为 `None` 表示墓碑即标记。
    pub fn deleted(entity: EntityKey, revision_id: RevisionId, last_state: Option<FieldMap>) -> Self {
        Self {
            entity,
            revision_id,
            change_kind: ChangeKind::Deleted,
            field_snapshot: last_state,
            state_after: None,
        }
    }

    pub fn entity(&self) -> &EntityKey {
        &self.entity
    }

    pub fn revision_id(&self) -> RevisionId {
        self.revision_id
    }

    pub fn change_kind(&self) -> ChangeKind {
        self.change_kind
    }

    pub fn field_snapshot(&self) -> Option<&FieldMap> {
        self.field_snapshot.as_ref()
    }

    pub fn state_after(&self) -> Option<&FieldMap> {
        self.state_after.as_ref()
    }

    pub fn is_tombstone(&self) -> bool {
        self.change_kind == ChangeKind::Deleted
    }
}

/// 历史中的一项：修订元数据与对应的审计记录。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub revision: Revision,
    pub record: AuditRecord,
}
