//! 审计读取器：只读的历史查询面。
//!
//! # 设计动机（Why）
//! - 合规与报表工具需要“某实体的完整历史”“某时间点/某修订时的状态”两类问题的答案；
//! - 读取器只持有两类存储的共享引用，不加任何额外锁，可以与写入方并发运行。
//!
//! # 逻辑解析（How）
//! - `history`：按修订号升序读取记录，逐条连接修订元数据；
//! - `state_at`：先在修订存储中二分出时间戳不大于目标时间的最新修订，再在快照存储中取该修订及之前的最后一条记录，
//!   直接返回其后像，无需从 `CREATED` 起逐条折叠；
//! - 任何记录引用了不存在的修订都会以 [`AuditError::InconsistentHistory`] 让整个查询失败，不返回部分结果。
//!
//! # 契约说明（What）
//! - 无历史、无修订或已删除均以 `Ok(None)` / 空集合表示；
//! - 无论删除策略如何，`history` 的最后一项都是唯一的 `DELETED` 记录（若实体已删除）。

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::config::DeletionPolicy;
use crate::error::{AuditError, Result};
use crate::ids::{EntityKey, RevisionId};
use crate::record::{AuditRecord, ChangeKind, HistoryEntry, Revision};
use crate::store::{RevisionStore, SnapshotStore};
use crate::value::FieldMap;

/// 只读历史查询。
#[derive(Clone)]
pub struct AuditReader {
    revisions: Arc<dyn RevisionStore>,
    snapshots: Arc<dyn SnapshotStore>,
    deletion_policy: DeletionPolicy,
}

impl AuditReader {
    pub fn new(
        revisions: Arc<dyn RevisionStore>,
        snapshots: Arc<dyn SnapshotStore>,
        deletion_policy: DeletionPolicy,
    ) -> Self {
        Self {
            revisions,
            snapshots,
            deletion_policy,
        }
    }

    /// 当前生效的删除策略。
    pub fn deletion_policy(&self) -> DeletionPolicy {
        self.deletion_policy
    }

    /// 实体的完整历史，按修订号升序。
    pub fn history(&self, entity: &EntityKey) -> Result<Vec<HistoryEntry>> {
        let records = self.snapshots.query(entity).map_err(AuditError::StoreRead)?;
        records
            .into_iter()
            .map(|record| {
                let revision = self.require_revision(entity, record.revision_id())?;
                Ok(HistoryEntry { revision, record })
            })
            .collect()
    }

    /// 触及实体的修订号列表，升序。
    pub fn revisions(&self, entity: &EntityKey) -> Result<Vec<RevisionId>> {
        Ok(self
            .snapshots
            .query(entity)
            .map_err(AuditError::StoreRead)?
            .iter()
            .map(AuditRecord::revision_id)
            .collect())
    }

    /// 时间点 `at`（Unix 毫秒）时实体的完整审计状态。
    ///
    /// 取时间戳不大于 `at` 的最新修订，再取该修订及之前的最后一条记录；实体当时尚未创建或已删除时返回 `None`。
    pub fn state_at(&self, entity: &EntityKey, at: u64) -> Result<Option<FieldMap>> {
        match self.revision_at(at)? {
            Some(revision) => self.state_at_revision(entity, revision),
            None => Ok(None),
        }
    }

    /// 修订 `revision` 提交后实体的完整审计状态。
    pub fn state_at_revision(
        &self,
        entity: &EntityKey,
        revision: RevisionId,
    ) -> Result<Option<FieldMap>> {
        let Some(record) = self
            .snapshots
            .query_at(entity, revision)
            .map_err(AuditError::StoreRead)?
        else {
            return Ok(None);
        };
        self.require_revision(entity, record.revision_id())?;
        match record.change_kind() {
            ChangeKind::Deleted => Ok(None),
            ChangeKind::Created | ChangeKind::Updated => {
                record
                    .state_after()
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| AuditError::MalformedRecord {
                        entity: entity.clone(),
                        revision: record.revision_id(),
                        reason: "record carries no post-change state",
                    })
            }
        }
    }

    /// 实体最后一次可见的状态；对已删除实体返回删除前的状态，两种删除策略结果一致。
    pub fn last_known_state(&self, entity: &EntityKey) -> Result<Option<FieldMap>> {
        let records = self.snapshots.query(entity).map_err(AuditError::StoreRead)?;
        Ok(records
            .iter()
            .rev()
            .find_map(|record| record.state_after().cloned()))
    }

    pub fn find_revision(&self, revision: RevisionId) -> Result<Option<Revision>> {
        self.revisions.get(revision).map_err(AuditError::StoreRead)
    }

    /// 时间戳不大于 `at` 的最新修订号。
    pub fn revision_at(&self, at: u64) -> Result<Option<RevisionId>> {
        Ok(self
            .revisions
            .latest_at_or_before(at)
            .map_err(AuditError::StoreRead)?
            .map(|revision| revision.id()))
    }

    /// 某个修订写入的全部审计记录。
    pub fn entities_changed_in(&self, revision: RevisionId) -> Result<Vec<AuditRecord>> {
        self.snapshots
            .records_in(revision)
            .map_err(AuditError::StoreRead)
    }

    /// 实体被删除时的修订号。
    pub fn deleted_at(&self, entity: &EntityKey) -> Result<Option<RevisionId>> {
        self.snapshots
            .closed_at(entity)
            .map_err(AuditError::StoreRead)
    }

    fn require_revision(&self, entity: &EntityKey, revision: RevisionId) -> Result<Revision> {
        match self.revisions.get(revision).map_err(AuditError::StoreRead)? {
            Some(found) => Ok(found),
            None => {
                error!(
                    entity = %entity,
                    revision = revision.get(),
                    "audit record references a revision that does not exist"
                );
                Err(AuditError::InconsistentHistory {
                    entity: entity.clone(),
                    revision,
                })
            }
        }
    }
}

impl fmt::Debug for AuditReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditReader")
            .field("deletion_policy", &self.deletion_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::record::RevisionDraft;
    use crate::store::{InMemoryRevisionStore, InMemorySnapshotStore};
    use crate::value::{FieldValue, field_map};

    fn key() -> EntityKey {
        EntityKey::new("Employee", 7_u64)
    }

    fn seeded(policy: DeletionPolicy) -> AuditReader {
        let revisions = Arc::new(InMemoryRevisionStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        for (id, ts) in [(1, 100), (2, 200), (3, 300)] {
            revisions
                .create(RevisionDraft {
                    id: RevisionId::new(id),
                    timestamp: ts,
                    actor: Actor::Anonymous,
                })
                .expect("revision");
        }
        let v1 = field_map([("name", FieldValue::from("Ana")), ("salary", 1000_i64.into())]);
        let v2 = field_map([("name", FieldValue::from("Ana")), ("salary", 1200_i64.into())]);
        snapshots
            .append(AuditRecord::created(key(), RevisionId::new(1), v1))
            .expect("created");
        snapshots
            .append(AuditRecord::updated(
                key(),
                RevisionId::new(2),
                field_map([("salary", 1000_i64)]),
                v2.clone(),
            ))
            .expect("updated");
        let last = policy.keeps_last_state().then_some(v2);
        snapshots
            .append(AuditRecord::deleted(key(), RevisionId::new(3), last))
            .expect("deleted");
        AuditReader::new(revisions, snapshots, policy)
    }

    #[test]
    fn state_lookups_agree_across_deletion_policies() {
        for policy in [DeletionPolicy::TombstoneRecord, DeletionPolicy::TombstoneMarker] {
            let reader = seeded(policy);
            assert_eq!(reader.deletion_policy(), policy);
            assert!(reader.state_at(&key(), 99).expect("before").is_none());
            assert_eq!(
                reader.state_at(&key(), 250).expect("between"),
                Some(field_map([("name", FieldValue::from("Ana")), ("salary", 1200_i64.into())]))
            );
            assert!(reader.state_at(&key(), 300).expect("after").is_none());
            assert_eq!(
                reader.last_known_state(&key()).expect("last").map(|s| s["salary"].clone()),
                Some(FieldValue::Integer(1200))
            );
            let history = reader.history(&key()).expect("history");
            assert_eq!(history.len(), 3);
            assert_eq!(history[2].record.change_kind(), ChangeKind::Deleted);
            assert_eq!(reader.deleted_at(&key()).expect("closed"), Some(RevisionId::new(3)));
        }
    }

    #[test]
    fn missing_revision_fails_the_whole_query() {
        let revisions = Arc::new(InMemoryRevisionStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        snapshots
            .append(AuditRecord::created(key(), RevisionId::new(4), FieldMap::new()))
            .expect("orphan");
        let reader = AuditReader::new(revisions, snapshots, DeletionPolicy::default());
        let err = reader.history(&key()).expect_err("inconsistent");
        assert!(matches!(
            err,
            AuditError::InconsistentHistory { revision, .. } if revision == RevisionId::new(4)
        ));
        assert!(reader.state_at_revision(&key(), RevisionId::new(9)).is_err());
    }

    #[test]
    fn unknown_entities_yield_empty_results() {
        let reader = seeded(DeletionPolicy::TombstoneRecord);
        let stranger = EntityKey::new("Employee", 99_u64);
        assert!(reader.history(&stranger).expect("history").is_empty());
        assert!(reader.revisions(&stranger).expect("revisions").is_empty());
        assert!(reader.state_at(&stranger, 1_000).expect("state").is_none());
        assert!(reader.find_revision(RevisionId::new(42)).expect("find").is_none());
    }
}
