use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::actor::{Actor, AuditActor, AuditorResolver};
use crate::ids::{EntityKey, RevisionId};
use crate::record::AuditRecord;
use crate::store::{InMemorySnapshotStore, SnapshotStore, StoreError, StoreResult};

/// 可按需注入写入故障的快照存储，读取始终委托给内存实现。
#[derive(Debug, Default)]
pub struct FailingSnapshotStore {
    inner: InMemorySnapshotStore,
    armed: AtomicBool,
    rejected: AtomicUsize,
}

impl FailingSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的追加全部失败。
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// 被拒绝的追加调用次数。
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    fn guard(&self) -> StoreResult<()> {
        if self.armed.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable {
                reason: "injected snapshot store outage".to_owned(),
            });
        }
        Ok(())
    }
}

impl SnapshotStore for FailingSnapshotStore {
    fn append(&self, record: AuditRecord) -> StoreResult<()> {
        self.guard()?;
        self.inner.append(record)
    }

    fn append_all(&self, records: Vec<AuditRecord>) -> StoreResult<()> {
        self.guard()?;
        self.inner.append_all(records)
    }

    fn query(&self, entity: &EntityKey) -> StoreResult<Vec<AuditRecord>> {
        self.inner.query(entity)
    }

    fn query_at(&self, entity: &EntityKey, revision: RevisionId) -> StoreResult<Option<AuditRecord>> {
        self.inner.query_at(entity, revision)
    }

    fn records_in(&self, revision: RevisionId) -> StoreResult<Vec<AuditRecord>> {
        self.inner.records_in(revision)
    }

    fn closed_at(&self, entity: &EntityKey) -> StoreResult<Option<RevisionId>> {
        self.inner.closed_at(entity)
    }

    fn scan(&self) -> StoreResult<Vec<AuditRecord>> {
        self.inner.scan()
    }
}

/// 记录被询问次数的操作者解析器。
#[derive(Debug)]
pub struct RecordingAuditor {
    actor: AuditActor,
    calls: AtomicUsize,
}

impl RecordingAuditor {
    pub fn new(id: &'static str) -> Self {
        Self {
            actor: AuditActor::new(id),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AuditorResolver for RecordingAuditor {
    fn current_actor(&self) -> Actor {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Actor::Identified(self.actor.clone())
    }
}
