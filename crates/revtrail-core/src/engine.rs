//! 审计引擎门面：装配配置、注册表、时钟、操作者解析器与两类存储。
//!
//! # 设计动机（Why）
//! - 宿主只需要在启动时构建一次 [`AuditEngine`]，之后每个事务调用 [`AuditEngine::begin`]；
//! - 引擎内部没有后台线程，所有工作都在调用方的工作单元边界内同步完成。
//!
//! # 契约说明（What）
//! - `AuditEngine` 为 `Send + Sync`，可放入 `Arc` 在线程间共享；
//! - 构建时若修订存储已有数据，时钟从最新修订之后继续分配，时间戳也不回退。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::error;

use crate::actor::{Actor, AnonymousAuditor, AuditorResolver};
use crate::clock::{RevisionClock, SystemWallClock, WallClock};
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::ids::{RevisionId, UnitOfWorkId};
use crate::interceptor::ChangeInterceptor;
use crate::layout::PersistedLayout;
use crate::reader::AuditReader;
use crate::record::{AuditRecord, Revision, RevisionDraft};
use crate::schema::SchemaRegistry;
use crate::store::{InMemoryRevisionStore, InMemorySnapshotStore, RevisionStore, SnapshotStore};
use crate::unit_of_work::UnitOfWork;

/// 审计引擎。
pub struct AuditEngine {
    config: AuditConfig,
    interceptor: ChangeInterceptor,
    clock: RevisionClock,
    resolver: Arc<dyn AuditorResolver>,
    revisions: Arc<dyn RevisionStore>,
    snapshots: Arc<dyn SnapshotStore>,
    layout: PersistedLayout,
    next_unit: AtomicU64,
}

impl AuditEngine {
    pub fn builder(registry: SchemaRegistry) -> AuditEngineBuilder {
        AuditEngineBuilder::new(registry)
    }

    /// 为一个宿主事务开启工作单元，操作者在分配修订时由解析器提供。
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(self, self.next_unit_id(), None)
    }

    /// 以预先解析的操作者开启工作单元，不再询问解析器。
    pub fn begin_as(&self, actor: Actor) -> UnitOfWork<'_> {
        UnitOfWork::new(self, self.next_unit_id(), Some(actor))
    }

    pub fn reader(&self) -> AuditReader {
        AuditReader::new(
            Arc::clone(&self.revisions),
            Arc::clone(&self.snapshots),
            self.config.deletion_policy,
        )
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        self.interceptor.registry()
    }

    pub fn layout(&self) -> &PersistedLayout {
        &self.layout
    }

    pub fn clock(&self) -> &RevisionClock {
        &self.clock
    }

    pub fn interceptor(&self) -> &ChangeInterceptor {
        &self.interceptor
    }

    pub fn revision_store(&self) -> &Arc<dyn RevisionStore> {
        &self.revisions
    }

    pub fn snapshot_store(&self) -> &Arc<dyn SnapshotStore> {
        &self.snapshots
    }

    pub(crate) fn resolve_actor(&self, preset: Option<&Actor>) -> Actor {
        match preset {
            Some(actor) => actor.clone(),
            None => self.resolver.current_actor(),
        }
    }

    /// 固化修订并原子追加记录；记录写入失败时撤销修订。
    pub(crate) fn persist(
        &self,
        draft: RevisionDraft,
        records: Vec<AuditRecord>,
    ) -> Result<(Revision, usize)> {
        let id = draft.id;
        let revision = self
            .revisions
            .create(draft)
            .map_err(|source| AuditError::RevisionWriteFailed {
                revision: id,
                source,
            })?;
        let count = records.len();
        if let Err(source) = self.snapshots.append_all(records) {
            self.abandon(id);
            return Err(AuditError::SnapshotWriteFailed {
                revision: id,
                source,
            });
        }
        Ok((revision, count))
    }

    fn abandon(&self, id: RevisionId) {
        if let Err(abandon) = self.revisions.abandon(id) {
            error!(
                revision = id.get(),
                error = %abandon,
                "failed to abandon revision after snapshot write failure; revision row is orphaned"
            );
        }
    }

    fn next_unit_id(&self) -> UnitOfWorkId {
        UnitOfWorkId::new(self.next_unit.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for AuditEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditEngine")
            .field("config", &self.config)
            .field("entity_types", &self.registry().len())
            .finish_non_exhaustive()
    }
}

/// [`AuditEngine`] 构建器。
///
/// 未显式注入的组件使用缺省值：匿名操作者、系统墙钟、内存存储。
pub struct AuditEngineBuilder {
    registry: SchemaRegistry,
    config: AuditConfig,
    resolver: Arc<dyn AuditorResolver>,
    wall: Arc<dyn WallClock>,
    revisions: Option<Arc<dyn RevisionStore>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl AuditEngineBuilder {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            registry,
            config: AuditConfig::default(),
            resolver: Arc::new(AnonymousAuditor),
            wall: Arc::new(SystemWallClock),
            revisions: None,
            snapshots: None,
        }
    }

    pub fn config(mut self, config: AuditConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: impl AuditorResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn shared_resolver(mut self, resolver: Arc<dyn AuditorResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn wall_clock(mut self, wall: Arc<dyn WallClock>) -> Self {
        self.wall = wall;
        self
    }

    pub fn revision_store(mut self, store: Arc<dyn RevisionStore>) -> Self {
        self.revisions = Some(store);
        self
    }

    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn build(self) -> Result<AuditEngine> {
        self.config.validate()?;
        let revisions = self
            .revisions
            .unwrap_or_else(|| Arc::new(InMemoryRevisionStore::new()) as Arc<dyn RevisionStore>);
        let snapshots = self
            .snapshots
            .unwrap_or_else(|| Arc::new(InMemorySnapshotStore::new()) as Arc<dyn SnapshotStore>);

        let clock = RevisionClock::starting_at(RevisionId::new(self.config.initial_revision), self.wall);
        if let Some(latest) = revisions.latest().map_err(AuditError::StoreRead)? {
            clock.resume_after(latest.id(), latest.timestamp())?;
        }

        let layout = PersistedLayout::new(&self.config.layout, &self.registry);
        let interceptor = ChangeInterceptor::new(Arc::new(self.registry), self.config.deletion_policy);
        Ok(AuditEngine {
            config: self.config,
            interceptor,
            clock,
            resolver: self.resolver,
            revisions,
            snapshots,
            layout,
            next_unit: AtomicU64::new(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{AuditActor, FixedAuditor};
    use crate::clock::ManualWallClock;
    use crate::ids::EntityKey;
    use crate::schema::{EntityTypeBuilder, FieldDef, FieldKind};
    use crate::test_stubs::RecordingAuditor;
    use crate::unit_of_work::CommitOutcome;
    use crate::value::{FieldValue, field_map};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .register(
                EntityTypeBuilder::new("Employee")
                    .field(FieldDef::new("name", FieldKind::Text))
                    .field(FieldDef::new("salary", FieldKind::Integer)),
            )
            .register(EntityTypeBuilder::new("Department").field(FieldDef::new("title", FieldKind::Text)))
            .build()
            .expect("registry")
    }

    #[test]
    fn one_revision_per_unit_regardless_of_entity_count() {
        let engine = AuditEngine::builder(registry())
            .wall_clock(Arc::new(ManualWallClock::new(1_000)))
            .resolver(FixedAuditor::new(AuditActor::new("ana")))
            .build()
            .expect("engine");

        let mut unit = engine.begin();
        unit.record_create(
            EntityKey::new("Employee", 1_u64),
            &field_map([("name", FieldValue::from("Ana")), ("salary", 1000_i64.into())]),
        )
        .expect("employee");
        unit.record_create(
            EntityKey::new("Department", 10_u64),
            &field_map([("title", "R&D")]),
        )
        .expect("department");
        let outcome = unit.commit().expect("commit");

        let CommitOutcome::Committed { revision, records } = outcome else {
            panic!("expected a committed outcome");
        };
        assert_eq!(records, 2);
        assert_eq!(revision.actor().column_value(), Some("ana"));
        assert_eq!(engine.revision_store().scan().expect("scan").len(), 1);
        assert_eq!(
            engine.reader().entities_changed_in(revision.id()).expect("records").len(),
            2
        );
    }

    #[test]
    fn eagerly_allocated_revision_without_changes_is_not_persisted() {
        let engine = AuditEngine::builder(registry()).build().expect("engine");
        let mut unit = engine.begin();
        let allocated = unit.current_revision().expect("allocate");
        assert_eq!(unit.current_revision().expect("again"), allocated);
        assert!(matches!(unit.commit().expect("commit"), CommitOutcome::NothingToAudit));
        assert!(engine.revision_store().latest().expect("latest").is_none());
        assert_eq!(engine.clock().open_units().expect("units"), 0);
    }

    #[test]
    fn builder_resumes_after_existing_revisions() {
        let revisions: Arc<dyn RevisionStore> = Arc::new(InMemoryRevisionStore::new());
        revisions
            .create(RevisionDraft {
                id: RevisionId::new(17),
                timestamp: 5_000,
                actor: Actor::Anonymous,
            })
            .expect("seed");
        let engine = AuditEngine::builder(registry())
            .revision_store(revisions)
            .wall_clock(Arc::new(ManualWallClock::new(10)))
            .build()
            .expect("engine");
        assert_eq!(
            engine.clock().peek_next().expect("peek"),
            Some(RevisionId::new(18))
        );
    }

    #[test]
    fn invalid_config_is_rejected_at_build_time() {
        let err = AuditEngine::builder(registry())
            .config(AuditConfig::default().with_initial_revision(0))
            .build()
            .expect_err("invalid");
        assert!(matches!(err, AuditError::Config(_)));
    }

    #[test]
    fn resolver_is_consulted_once_per_allocated_revision() {
        let auditor = Arc::new(RecordingAuditor::new("ana"));
        let engine = AuditEngine::builder(registry())
            .shared_resolver(auditor.clone())
            .build()
            .expect("engine");

        let mut unit = engine.begin();
        let key = EntityKey::new("Employee", 1_u64);
        unit.record_create(key.clone(), &field_map([("name", "Ana")]))
            .expect("create");
        unit.current_revision().expect("allocate");
        unit.record_update(
            key,
            Some(&field_map([("name", "Ana")])),
            &field_map([("name", "Ana B.")]),
        )
        .expect("update");
        unit.commit().expect("commit");
        assert_eq!(auditor.calls(), 1);

        let mut quiet = engine.begin();
        assert!(matches!(quiet.commit().expect("commit"), CommitOutcome::NothingToAudit));
        let mut preset = engine.begin_as(Actor::identified("batch"));
        preset
            .record_create(EntityKey::new("Employee", 2_u64), &field_map([("name", "Bo")]))
            .expect("create");
        preset.commit().expect("commit");
        assert_eq!(auditor.calls(), 1);
    }
}
