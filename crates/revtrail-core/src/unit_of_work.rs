//! 工作单元：审计写入与宿主事务同生共死。
//!
//! # 设计动机（Why）
//! - 宿主写入回滚时，其产生的审计记录与修订也必须一并消失；引擎因此把捕获结果暂存在工作单元内，
//!   直到宿主提交时才一次性发布；
//! - 修订只为真正产生审计记录的工作单元创建：没有审计写入（或只改了非审计字段）的工作单元不消耗修订行。
//!
//! # 逻辑解析（How）
//! 1. `create`/`update`/`delete`（或观察者接口 `record_*`）捕获变更并合并进暂存区；
//! 2. [`UnitOfWork::commit`] 丢弃空操作，向时钟取得（或复用已分配的）修订；
//! 3. 先固化修订元数据，再原子追加全部审计记录；追加失败时撤销刚创建的修订；
//! 4. 无论成败都解除时钟绑定；显式回滚或直接 `drop` 则丢弃暂存区。
//!
//! # 契约说明（What）
//! - fail-closed：任何审计失败都以 `Err` 上抛，工作单元随即进入中止状态，只能回滚；
//! - fail-open：存储失败与捕获失败记录 `warn` 后放行，提交返回 [`CommitOutcome::AuditGap`]；
//! - 致命错误（修订号耗尽、锁毒化）不受策略影响，始终上抛。

use tracing::{debug, info, warn};

use crate::actor::Actor;
use crate::engine::AuditEngine;
use crate::error::{AuditError, Result};
use crate::ids::{EntityKey, EntityType, RevisionId, UnitOfWorkId};
use crate::interceptor::{CapturedChange, EntityWriter, PendingChanges, WriteError};
use crate::record::Revision;
use crate::value::FieldMap;

/// 提交结果。
#[derive(Debug)]
pub enum CommitOutcome {
    /// 工作单元没有任何有效的审计变更，未创建修订。
    NothingToAudit,
    /// 修订与审计记录均已持久化。
    Committed { revision: Revision, records: usize },
    /// fail-open 策略下审计写入失败，宿主写入照常放行。
    AuditGap {
        revision: RevisionId,
        error: AuditError,
    },
}

impl CommitOutcome {
    pub fn revision(&self) -> Option<&Revision> {
        match self {
            CommitOutcome::Committed { revision, .. } => Some(revision),
            _ => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    Open,
    Aborted,
    Closed,
}

/// 单个宿主事务的审计句柄。
///
/// 由 [`AuditEngine::begin`] 创建；未提交即被丢弃时视为回滚。
/// 句柄与宿主事务一一对应，不可跨线程共享，但可以移动到执行该事务的线程。
pub struct UnitOfWork<'e> {
    engine: &'e AuditEngine,
    id: UnitOfWorkId,
    actor: Option<Actor>,
    pending: PendingChanges,
    state: UnitState,
}

impl<'e> UnitOfWork<'e> {
    pub(crate) fn new(engine: &'e AuditEngine, id: UnitOfWorkId, actor: Option<Actor>) -> Self {
        Self {
            engine,
            id,
            actor,
            pending: PendingChanges::default(),
            state: UnitState::Open,
        }
    }

    pub fn id(&self) -> UnitOfWorkId {
        self.id
    }

    /// 暂存的实体变更数量（合并后）。
    pub fn pending_changes(&self) -> usize {
        self.pending.len()
    }

    pub fn is_aborted(&self) -> bool {
        self.state == UnitState::Aborted
    }

    /// 本工作单元的修订号；首次调用时分配，此后幂等。
    ///
    /// 若最终没有审计记录，已分配的修订号不会落库，只在序列中留下空洞。
    pub fn current_revision(&mut self) -> Result<RevisionId> {
        self.ensure_open()?;
        let draft = self
            .engine
            .clock()
            .current_revision(self.id, || self.engine.resolve_actor(self.actor.as_ref()))?;
        Ok(draft.id)
    }

    /// 观察者接口：宿主已完成创建，`after` 含生成字段。
    pub fn record_create(&mut self, entity: EntityKey, after: &FieldMap) -> Result<()> {
        self.ensure_open()?;
        let Some(change) = self.engine.interceptor().capture_create(entity, after) else {
            return Ok(());
        };
        let merged = self.pending.merge(change);
        self.absorb(merged)
    }

    /// 观察者接口：`before` 必须在更新生效前读取。
    pub fn record_update(
        &mut self,
        entity: EntityKey,
        before: Option<&FieldMap>,
        after: &FieldMap,
    ) -> Result<()> {
        self.ensure_open()?;
        let captured = self.engine.interceptor().capture_update(entity, before, after);
        self.stage(captured)
    }

    /// 观察者接口：`before` 必须在删除生效前读取。
    pub fn record_delete(&mut self, entity: EntityKey, before: Option<&FieldMap>) -> Result<()> {
        self.ensure_open()?;
        let captured = self.engine.interceptor().capture_delete(entity, before);
        self.stage(captured)
    }

    /// 通过宿主写入器创建实体并捕获后像。
    pub fn create<W: EntityWriter>(
        &mut self,
        writer: &mut W,
        entity_type: impl Into<EntityType>,
        state: FieldMap,
    ) -> std::result::Result<EntityKey, WriteError<W::Error>> {
        self.ensure_open()?;
        let entity_type = entity_type.into();
        let (entity_id, after) = writer
            .insert(&entity_type, state)
            .map_err(WriteError::Host)?;
        let entity = EntityKey {
            entity_type,
            entity_id,
        };
        self.record_create(entity.clone(), &after)?;
        Ok(entity)
    }

    /// 读前写：先读取前像，再交给宿主更新。返回完整后像。
    pub fn update<W: EntityWriter>(
        &mut self,
        writer: &mut W,
        entity: &EntityKey,
        changes: FieldMap,
    ) -> std::result::Result<FieldMap, WriteError<W::Error>> {
        self.ensure_open()?;
        let before = writer.read(entity).map_err(WriteError::Host)?;
        let after = writer.update(entity, changes).map_err(WriteError::Host)?;
        self.record_update(entity.clone(), before.as_ref(), &after)?;
        Ok(after)
    }

    /// 读前写：先读取前像，再交给宿主删除。
    pub fn delete<W: EntityWriter>(
        &mut self,
        writer: &mut W,
        entity: &EntityKey,
    ) -> std::result::Result<(), WriteError<W::Error>> {
        self.ensure_open()?;
        let before = writer.read(entity).map_err(WriteError::Host)?;
        writer.delete(entity).map_err(WriteError::Host)?;
        self.record_delete(entity.clone(), before.as_ref())?;
        Ok(())
    }

    /// 发布暂存的审计变更。提交后句柄关闭，后续写入返回 [`AuditError::UnitOfWorkClosed`]。
    pub fn commit(&mut self) -> Result<CommitOutcome> {
        match self.state {
            UnitState::Closed => return Err(AuditError::UnitOfWorkClosed { unit: self.id }),
            UnitState::Aborted => {
                self.close();
                return Err(AuditError::UnitOfWorkAborted { unit: self.id });
            }
            UnitState::Open => {}
        }
        let changes = self.pending.drain_effective();
        if changes.is_empty() {
            self.close();
            debug!(unit = %self.id, "unit of work committed without audited changes");
            return Ok(CommitOutcome::NothingToAudit);
        }

        let outcome = self.publish(changes);
        self.close();
        outcome
    }

    /// 显式回滚：丢弃暂存变更并释放修订绑定。
    pub fn rollback(&mut self) {
        if self.state == UnitState::Closed {
            return;
        }
        let discarded = self.pending.len();
        self.close();
        debug!(unit = %self.id, discarded, "unit of work rolled back");
    }

    fn publish(&self, changes: Vec<CapturedChange>) -> Result<CommitOutcome> {
        let engine = self.engine;
        let draft = engine
            .clock()
            .current_revision(self.id, || engine.resolve_actor(self.actor.as_ref()))?;
        let revision_id = draft.id;

        let result = changes
            .into_iter()
            .map(|change| engine.interceptor().to_record(change, revision_id))
            .collect::<Result<Vec<_>>>()
            .and_then(|records| engine.persist(draft, records));

        match result {
            Ok((revision, records)) => {
                info!(
                    revision = revision_id.get(),
                    unit = %self.id,
                    records,
                    actor = %revision.actor(),
                    "committed audit revision"
                );
                Ok(CommitOutcome::Committed { revision, records })
            }
            Err(error) if engine.config().failure_policy.is_fail_open() && !error.is_fatal() => {
                warn!(
                    revision = revision_id.get(),
                    unit = %self.id,
                    error = %error,
                    "audit write failed; continuing without audit trail (fail-open)"
                );
                Ok(CommitOutcome::AuditGap {
                    revision: revision_id,
                    error,
                })
            }
            Err(error) => Err(error),
        }
    }

    fn stage(&mut self, captured: Result<Option<CapturedChange>>) -> Result<()> {
        let merged = match captured {
            Ok(Some(change)) => self.pending.merge(change),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };
        self.absorb(merged)
    }

    /// 按失败策略处理捕获阶段的错误。
    fn absorb(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(error) if self.engine.config().failure_policy.is_fail_open() && !error.is_fatal() => {
                warn!(unit = %self.id, error = %error, "audit capture skipped (fail-open)");
                Ok(())
            }
            Err(error) => {
                self.state = UnitState::Aborted;
                Err(error)
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            UnitState::Open => Ok(()),
            UnitState::Aborted => Err(AuditError::UnitOfWorkAborted { unit: self.id }),
            UnitState::Closed => Err(AuditError::UnitOfWorkClosed { unit: self.id }),
        }
    }

    fn close(&mut self) {
        self.state = UnitState::Closed;
        self.pending.clear();
        if let Err(error) = self.engine.clock().release(self.id) {
            warn!(unit = %self.id, error = %error, "failed to release revision binding");
        }
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if self.state != UnitState::Closed {
            let discarded = self.pending.len();
            self.close();
            debug!(unit = %self.id, discarded, "unit of work dropped without commit; rolled back");
        }
    }
}

impl std::fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tracing_test::traced_test;

    use super::*;
    use crate::config::{AuditConfig, FailurePolicy};
    use crate::schema::{EntityTypeBuilder, FieldDef, FieldKind, SchemaRegistry};
    use crate::test_stubs::FailingSnapshotStore;
    use crate::value::{FieldValue, field_map};

    fn engine(policy: FailurePolicy, store: Arc<FailingSnapshotStore>) -> AuditEngine {
        let registry = SchemaRegistry::builder()
            .register(EntityTypeBuilder::new("Employee").field(FieldDef::new("name", FieldKind::Text)))
            .build()
            .expect("registry");
        AuditEngine::builder(registry)
            .config(AuditConfig::default().with_failure_policy(policy))
            .snapshot_store(store)
            .build()
            .expect("engine")
    }

    fn ana() -> FieldMap {
        field_map([("name", FieldValue::from("Ana"))])
    }

    #[test]
    #[traced_test]
    fn fail_open_reports_gap_and_logs_warning() {
        let store = Arc::new(FailingSnapshotStore::new());
        store.arm();
        let engine = engine(FailurePolicy::FailOpen, store.clone());

        let mut unit = engine.begin();
        unit.record_create(EntityKey::new("Employee", 1_u64), &ana())
            .expect("capture");
        let outcome = unit.commit().expect("fail-open does not propagate");

        assert!(matches!(outcome, CommitOutcome::AuditGap { ref error, .. } if error.is_write_failure()));
        assert!(logs_contain("continuing without audit trail (fail-open)"));
        assert!(engine.revision_store().latest().expect("latest").is_none());
        assert_eq!(store.rejected(), 1);
    }

    #[test]
    #[traced_test]
    fn fail_open_skips_capture_errors() {
        let engine = engine(FailurePolicy::FailOpen, Arc::new(FailingSnapshotStore::new()));
        let mut unit = engine.begin();
        unit.record_update(EntityKey::new("Employee", 1_u64), None, &ana())
            .expect("skipped");
        assert!(!unit.is_aborted());
        assert!(logs_contain("audit capture skipped"));
        assert!(matches!(unit.commit().expect("commit"), CommitOutcome::NothingToAudit));
    }

    #[test]
    #[traced_test]
    fn dropping_an_open_unit_rolls_back() {
        let engine = engine(FailurePolicy::FailClosed, Arc::new(FailingSnapshotStore::new()));
        {
            let mut unit = engine.begin();
            unit.record_create(EntityKey::new("Employee", 1_u64), &ana())
                .expect("capture");
            unit.current_revision().expect("allocate");
        }
        assert!(logs_contain("dropped without commit"));
        assert_eq!(engine.clock().open_units().expect("units"), 0);
        assert!(engine.snapshot_store().scan().expect("scan").is_empty());
    }

    #[test]
    fn closed_unit_rejects_further_writes() {
        let engine = engine(FailurePolicy::FailClosed, Arc::new(FailingSnapshotStore::new()));
        let mut unit = engine.begin();
        unit.record_create(EntityKey::new("Employee", 1_u64), &ana())
            .expect("capture");
        assert!(unit.commit().expect("commit").is_committed());
        let err = unit
            .record_create(EntityKey::new("Employee", 2_u64), &ana())
            .expect_err("closed");
        assert!(matches!(err, AuditError::UnitOfWorkClosed { .. }));
        assert!(matches!(unit.commit(), Err(AuditError::UnitOfWorkClosed { .. })));
    }

    #[test]
    fn rewriting_a_nan_reading_is_not_a_change() {
        let registry = SchemaRegistry::builder()
            .register(EntityTypeBuilder::new("Sensor").field(FieldDef::new("reading", FieldKind::Float)))
            .build()
            .expect("registry");
        let engine = AuditEngine::builder(registry).build().expect("engine");
        let sensor = EntityKey::new("Sensor", 1_u64);
        let state = field_map([("reading", f64::NAN)]);

        let mut unit = engine.begin();
        unit.record_create(sensor.clone(), &state).expect("capture");
        assert!(unit.commit().expect("commit").is_committed());

        let mut unit = engine.begin();
        unit.record_update(sensor.clone(), Some(&state), &state)
            .expect("capture");
        assert!(matches!(unit.commit().expect("commit"), CommitOutcome::NothingToAudit));
        assert_eq!(engine.reader().history(&sensor).expect("history").len(), 1);
        assert_eq!(engine.revision_store().scan().expect("scan").len(), 1);
    }
}
