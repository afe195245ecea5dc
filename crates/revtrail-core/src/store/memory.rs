use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use super::{RevisionStore, SnapshotStore, StoreError, StoreResult};
use crate::ids::{EntityKey, RevisionId};
use crate::record::{AuditRecord, ChangeKind, Revision, RevisionDraft};

/// 基于内存的快照存储，供测试、演示与日志回放使用。
///
/// # 逻辑解析（How）
/// - `by_entity`：每个实体一条按修订号升序的记录向量，`query_at` 在其上二分；
/// - `by_revision`：修订号 → 实体键列表，支撑 `records_in`；
/// - `closed`：实体被 `DELETED` 关闭时的修订号；
/// - 批量追加在写锁内先完成整批校验，再一次性写入，失败时不留下任何部分结果。
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    inner: RwLock<SnapshotIndex>,
}

#[derive(Debug, Default)]
struct SnapshotIndex {
    by_entity: HashMap<EntityKey, Vec<AuditRecord>>,
    by_revision: BTreeMap<RevisionId, Vec<EntityKey>>,
    closed: HashMap<EntityKey, RevisionId>,
}

impl SnapshotIndex {
    fn check(&self, record: &AuditRecord) -> StoreResult<()> {
        let entity = record.entity();
        if let Some(closed_at) = self.closed.get(entity) {
            return Err(StoreError::Rejected {
                reason: format!("{entity} was closed by a tombstone at revision {closed_at}"),
            });
        }
        let latest = self
            .by_entity
            .get(entity)
            .and_then(|records| records.last())
            .map(AuditRecord::revision_id);
        match latest {
            Some(latest) if latest == record.revision_id() => Err(StoreError::Duplicate {
                revision: latest,
                entity: Some(entity.clone()),
            }),
            Some(latest) if latest > record.revision_id() => Err(StoreError::OutOfOrder {
                entity: entity.clone(),
                latest,
                attempted: record.revision_id(),
            }),
            _ => Ok(()),
        }
    }

    fn record_at(&self, entity: &EntityKey, revision: RevisionId) -> Option<AuditRecord> {
        let records = self.by_entity.get(entity)?;
        records
            .binary_search_by_key(&revision, AuditRecord::revision_id)
            .ok()
            .map(|at| records[at].clone())
    }

    fn insert(&mut self, record: AuditRecord) {
        let entity = record.entity().clone();
        let revision = record.revision_id();
        if record.change_kind() == ChangeKind::Deleted {
            self.closed.insert(entity.clone(), revision);
        }
        let keys = self.by_revision.entry(revision).or_default();
        if let Err(position) = keys.binary_search(&entity) {
            keys.insert(position, entity.clone());
        }
        self.by_entity.entry(entity).or_default().push(record);
    }
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已保存的记录总数。
    pub fn len(&self) -> usize {
        self.inner.read().by_entity.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn append(&self, record: AuditRecord) -> StoreResult<()> {
        let mut index = self.inner.write();
        index.check(&record)?;
        index.insert(record);
        Ok(())
    }

    fn append_all(&self, records: Vec<AuditRecord>) -> StoreResult<()> {
        let mut index = self.inner.write();
        let mut seen: HashMap<&EntityKey, RevisionId> = HashMap::with_capacity(records.len());
        for record in &records {
            if let Some(previous) = seen.insert(record.entity(), record.revision_id()) {
                return Err(StoreError::Duplicate {
                    revision: previous,
                    entity: Some(record.entity().clone()),
                });
            }
            index.check(record)?;
        }
        for record in records {
            index.insert(record);
        }
        Ok(())
    }

    fn query(&self, entity: &EntityKey) -> StoreResult<Vec<AuditRecord>> {
        Ok(self
            .inner
            .read()
            .by_entity
            .get(entity)
            .cloned()
            .unwrap_or_default())
    }

    fn query_at(&self, entity: &EntityKey, revision: RevisionId) -> StoreResult<Option<AuditRecord>> {
        let index = self.inner.read();
        let Some(records) = index.by_entity.get(entity) else {
            return Ok(None);
        };
        let upto = records.partition_point(|record| record.revision_id() <= revision);
        Ok(upto.checked_sub(1).map(|at| records[at].clone()))
    }

    fn records_in(&self, revision: RevisionId) -> StoreResult<Vec<AuditRecord>> {
        let index = self.inner.read();
        Ok(index
            .by_revision
            .get(&revision)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| index.record_at(key, revision))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn closed_at(&self, entity: &EntityKey) -> StoreResult<Option<RevisionId>> {
        Ok(self.inner.read().closed.get(entity).copied())
    }

    fn scan(&self) -> StoreResult<Vec<AuditRecord>> {
        let guard = self.inner.read();
        let index: &SnapshotIndex = &guard;
        Ok(index
            .by_revision
            .iter()
            .flat_map(move |(revision, keys)| {
                keys.iter()
                    .filter_map(move |key| index.record_at(key, *revision))
            })
            .collect())
    }
}

/// 基于内存的修订元数据存储。
///
/// 修订按修订号有序保存。工作单元的提交顺序可能与修订号分配顺序不同，
/// 因此插入位置由二分确定；同时校验时间戳随修订号单调不减，`latest_at_or_before` 才能二分。
#[derive(Debug, Default)]
pub struct InMemoryRevisionStore {
    revisions: RwLock<Vec<Revision>>,
}

impl InMemoryRevisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.revisions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.read().is_empty()
    }
}

impl RevisionStore for InMemoryRevisionStore {
    fn create(&self, draft: RevisionDraft) -> StoreResult<Revision> {
        let mut revisions = self.revisions.write();
        let position = match revisions.binary_search_by_key(&draft.id, Revision::id) {
            Ok(_) => {
                return Err(StoreError::Duplicate {
                    revision: draft.id,
                    entity: None,
                });
            }
            Err(position) => position,
        };
        let before = position
            .checked_sub(1)
            .and_then(|at| revisions.get(at))
            .map(Revision::timestamp);
        let after = revisions.get(position).map(Revision::timestamp);
        if before.is_some_and(|ts| ts > draft.timestamp) || after.is_some_and(|ts| ts < draft.timestamp) {
            return Err(StoreError::Rejected {
                reason: format!(
                    "timestamp {} of revision {} breaks timestamp order",
                    draft.timestamp, draft.id
                ),
            });
        }
        let revision = Revision::from(draft);
        revisions.insert(position, revision.clone());
        Ok(revision)
    }

    fn get(&self, id: RevisionId) -> StoreResult<Option<Revision>> {
        let revisions = self.revisions.read();
        Ok(revisions
            .binary_search_by_key(&id, Revision::id)
            .ok()
            .map(|at| revisions[at].clone()))
    }

    fn latest_at_or_before(&self, timestamp: u64) -> StoreResult<Option<Revision>> {
        let revisions = self.revisions.read();
        let upto = revisions.partition_point(|revision| revision.timestamp() <= timestamp);
        Ok(upto.checked_sub(1).map(|at| revisions[at].clone()))
    }

    fn latest(&self) -> StoreResult<Option<Revision>> {
        Ok(self.revisions.read().last().cloned())
    }

    fn abandon(&self, id: RevisionId) -> StoreResult<bool> {
        let mut revisions = self.revisions.write();
        match revisions.binary_search_by_key(&id, Revision::id) {
            Ok(at) => {
                revisions.remove(at);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    fn scan(&self) -> StoreResult<Vec<Revision>> {
        Ok(self.revisions.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::value::{FieldValue, field_map};

    fn employee() -> EntityKey {
        EntityKey::new("Employee", 7_u64)
    }

    fn created(rev: u64) -> AuditRecord {
        AuditRecord::created(
            employee(),
            RevisionId::new(rev),
            field_map([("name", FieldValue::from("Ana"))]),
        )
    }

    fn draft(id: u64, timestamp: u64) -> RevisionDraft {
        RevisionDraft {
            id: RevisionId::new(id),
            timestamp,
            actor: Actor::Anonymous,
        }
    }

    #[test]
    fn query_at_returns_latest_prior_record() {
        let store = InMemorySnapshotStore::new();
        store.append(created(2)).expect("create");
        store
            .append(AuditRecord::updated(
                employee(),
                RevisionId::new(5),
                field_map([("name", FieldValue::from("Ana"))]),
                field_map([("name", FieldValue::from("Bea"))]),
            ))
            .expect("update");

        assert!(store.query_at(&employee(), RevisionId::new(1)).expect("q").is_none());
        let at_four = store.query_at(&employee(), RevisionId::new(4)).expect("q");
        assert_eq!(at_four.map(|r| r.revision_id()), Some(RevisionId::new(2)));
        let at_nine = store.query_at(&employee(), RevisionId::new(9)).expect("q");
        assert_eq!(at_nine.map(|r| r.revision_id()), Some(RevisionId::new(5)));
    }

    #[test]
    fn out_of_order_and_closed_entities_are_rejected() {
        let store = InMemorySnapshotStore::new();
        store.append(created(3)).expect("create");
        let stale = store.append(AuditRecord::deleted(employee(), RevisionId::new(2), None));
        assert!(matches!(stale, Err(StoreError::OutOfOrder { .. })));

        store
            .append(AuditRecord::deleted(employee(), RevisionId::new(4), None))
            .expect("delete");
        assert_eq!(store.closed_at(&employee()).expect("closed"), Some(RevisionId::new(4)));
        let after = store.append(created(5));
        assert!(matches!(after, Err(StoreError::Rejected { .. })));
    }

    #[test]
    fn failed_batch_leaves_store_untouched() {
        let store = InMemorySnapshotStore::new();
        store.append(created(5)).expect("seed");
        let other = AuditRecord::created(
            EntityKey::new("Employee", 8_u64),
            RevisionId::new(3),
            field_map([("name", FieldValue::from("Bo"))]),
        );
        let result = store.append_all(vec![other, created(3)]);
        assert!(result.is_err());
        assert_eq!(store.len(), 1);
        assert!(store.records_in(RevisionId::new(3)).expect("records").is_empty());
    }

    #[test]
    fn revisions_insert_in_id_order_and_search_by_timestamp() {
        let store = InMemoryRevisionStore::new();
        store.create(draft(2, 200)).expect("two");
        store.create(draft(1, 100)).expect("one");
        store.create(draft(4, 400)).expect("four");

        assert!(matches!(store.create(draft(2, 250)), Err(StoreError::Duplicate { .. })));
        assert!(matches!(store.create(draft(3, 500)), Err(StoreError::Rejected { .. })));

        let ids: Vec<u64> = store.scan().expect("scan").iter().map(|r| r.id().get()).collect();
        assert_eq!(ids, vec![1, 2, 4]);
        assert_eq!(
            store.latest_at_or_before(399).expect("lookup").map(|r| r.id()),
            Some(RevisionId::new(2))
        );
        assert!(store.latest_at_or_before(99).expect("lookup").is_none());
        assert!(store.abandon(RevisionId::new(4)).expect("abandon"));
        assert_eq!(store.latest().expect("latest").map(|r| r.id()), Some(RevisionId::new(2)));
    }
}
