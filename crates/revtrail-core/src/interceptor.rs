//! 变更拦截器：在宿主写入边界捕获前像与后像。
//!
//! # 设计动机（Why）
//! - 更新与删除必须在底层写入生效**之前**读取前像（读前写），创建则在生成字段（如自增 ID）赋值**之后**读取后像；
//! - 拦截器是纯观察者：它从不阻塞、重试或改写宿主写入，只把捕获结果交给工作单元暂存。
//!
//! # 逻辑解析（How）
//! - `capture_*` 负责按 [`EntitySchema`] 投影字段，未注册的实体类型返回 `None`；
//! - 同一工作单元内对同一实体的多次写入经 [`PendingChanges::merge`] 折叠为一条待提交变更；
//! - 提交时 [`ChangeInterceptor::to_record`] 把变更与修订号组合成 [`AuditRecord`]。
//!
//! # 契约说明（What）
//! - 合并规则：创建+更新→创建（最终状态）；创建+删除→无记录；更新+更新→更新（保留最初前像）；
//!   更新+删除→删除；删除+创建→更新；其余组合（删除后再写、重复创建、更新后创建）为非法跃迁；
//! - 仅非审计字段发生变化的更新在提交时被丢弃，不产生记录。

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::DeletionPolicy;
use crate::error::{AuditError, Result};
use crate::ids::{EntityId, EntityKey, EntityType, RevisionId};
use crate::record::{AuditRecord, ChangeKind};
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::value::FieldMap;

/// 宿主写入路径的抽象。
///
/// # 教案式说明
/// - **意图 (Why)**：让 [`UnitOfWork`](crate::UnitOfWork) 包裹宿主的创建/更新/删除，自动完成读前写；
/// - **契约 (What)**：
///   - `read` 返回实体当前状态，不存在时为 `None`；
///   - `insert` 返回生成的实体 ID 与包含生成字段的完整后像；
///   - `update` 应用部分字段并返回完整后像；
/// - **权衡 (Trade-offs)**：接口以 `&mut self` 接收，宿主可以直接把事务句柄实现为写入器。
pub trait EntityWriter {
    type Error: std::error::Error + Send + Sync + 'static;

    fn read(&mut self, entity: &EntityKey) -> std::result::Result<Option<FieldMap>, Self::Error>;

    fn insert(
        &mut self,
        entity_type: &EntityType,
        state: FieldMap,
    ) -> std::result::Result<(EntityId, FieldMap), Self::Error>;

    fn update(
        &mut self,
        entity: &EntityKey,
        changes: FieldMap,
    ) -> std::result::Result<FieldMap, Self::Error>;

    fn delete(&mut self, entity: &EntityKey) -> std::result::Result<(), Self::Error>;
}

/// 包裹写入的错误：宿主写入失败，或审计失败（fail-closed）。
#[derive(Debug, Error)]
pub enum WriteError<E>
where
    E: std::error::Error + 'static,
{
    #[error("host write failed: {0}")]
    Host(#[source] E),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl<E> WriteError<E>
where
    E: std::error::Error + 'static,
{
    pub fn as_audit(&self) -> Option<&AuditError> {
        match self {
            WriteError::Audit(err) => Some(err),
            WriteError::Host(_) => None,
        }
    }
}

/// 已投影、待提交的单实体变更。
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedChange {
    pub entity: EntityKey,
    pub kind: ChangeKind,
    pub before: Option<FieldMap>,
    pub after: Option<FieldMap>,
}

impl CapturedChange {
    /// 审计字段未发生任何变化的更新。
    pub fn is_noop(&self) -> bool {
        self.kind == ChangeKind::Updated && self.before == self.after
    }
}

/// 工作单元内按实体键暂存的变更。
#[derive(Debug, Default)]
pub(crate) struct PendingChanges {
    changes: BTreeMap<EntityKey, CapturedChange>,
}

impl PendingChanges {
    pub(crate) fn merge(&mut self, incoming: CapturedChange) -> Result<()> {
        let Some(existing) = self.changes.remove(&incoming.entity) else {
            self.changes.insert(incoming.entity.clone(), incoming);
            return Ok(());
        };

        let merged = match (existing.kind, incoming.kind) {
            (ChangeKind::Created, ChangeKind::Updated) => Some(CapturedChange {
                after: incoming.after,
                ..existing
            }),
            (ChangeKind::Created, ChangeKind::Deleted) => None,
            (ChangeKind::Updated, ChangeKind::Updated) => Some(CapturedChange {
                after: incoming.after,
                ..existing
            }),
            (ChangeKind::Updated, ChangeKind::Deleted) => Some(CapturedChange {
                kind: ChangeKind::Deleted,
                after: None,
                ..existing
            }),
            (ChangeKind::Deleted, ChangeKind::Created) => Some(CapturedChange {
                kind: ChangeKind::Updated,
                after: incoming.after,
                ..existing
            }),
            (from, to) => {
                let entity = existing.entity.clone();
                self.changes.insert(entity.clone(), existing);
                return Err(AuditError::IllegalTransition { entity, from, to });
            }
        };
        if let Some(change) = merged {
            self.changes.insert(change.entity.clone(), change);
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.changes.len()
    }

    pub(crate) fn clear(&mut self) {
        self.changes.clear();
    }

    pub(crate) fn drain_effective(&mut self) -> Vec<CapturedChange> {
        std::mem::take(&mut self.changes)
            .into_values()
            .filter(|change| !change.is_noop())
            .collect()
    }
}

/// 按注册表投影字段并生成审计记录。
#[derive(Clone, Debug)]
pub struct ChangeInterceptor {
    registry: Arc<SchemaRegistry>,
    deletion_policy: DeletionPolicy,
}

impl ChangeInterceptor {
    pub fn new(registry: Arc<SchemaRegistry>, deletion_policy: DeletionPolicy) -> Self {
        Self {
            registry,
            deletion_policy,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn deletion_policy(&self) -> DeletionPolicy {
        self.deletion_policy
    }

    /// 查找实体类型的已解析元数据。
    pub fn schema(&self, entity_type: &EntityType) -> Result<&Arc<EntitySchema>> {
        self.registry
            .get(entity_type)
            .ok_or_else(|| AuditError::UnknownEntityType {
                entity_type: entity_type.clone(),
            })
    }

    pub fn is_audited(&self, entity_type: &EntityType) -> bool {
        self.registry.contains(entity_type)
    }

    /// 捕获创建；`after` 应已包含生成字段。
    pub fn capture_create(&self, entity: EntityKey, after: &FieldMap) -> Option<CapturedChange> {
        let schema = self.registry.get(&entity.entity_type)?;
        Some(CapturedChange {
            before: None,
            after: Some(schema.project(after)),
            kind: ChangeKind::Created,
            entity,
        })
    }

    /// 捕获更新；`before` 必须是写入生效前读取的状态。
    pub fn capture_update(
        &self,
        entity: EntityKey,
        before: Option<&FieldMap>,
        after: &FieldMap,
    ) -> Result<Option<CapturedChange>> {
        let Some(schema) = self.registry.get(&entity.entity_type) else {
            return Ok(None);
        };
        let Some(before) = before else {
            return Err(AuditError::MissingPreImage {
                entity,
                kind: ChangeKind::Updated,
            });
        };
        Ok(Some(CapturedChange {
            before: Some(schema.project(before)),
            after: Some(schema.project(after)),
            kind: ChangeKind::Updated,
            entity,
        }))
    }

    /// 捕获删除；`before` 必须是删除生效前读取的状态。
    pub fn capture_delete(
        &self,
        entity: EntityKey,
        before: Option<&FieldMap>,
    ) -> Result<Option<CapturedChange>> {
        let Some(schema) = self.registry.get(&entity.entity_type) else {
            return Ok(None);
        };
        let Some(before) = before else {
            return Err(AuditError::MissingPreImage {
                entity,
                kind: ChangeKind::Deleted,
            });
        };
        Ok(Some(CapturedChange {
            before: Some(schema.project(before)),
            after: None,
            kind: ChangeKind::Deleted,
            entity,
        }))
    }

    /// 组合修订号生成审计记录。
    ///
    /// `UPDATED` 的 `field_snapshot` 只保留值发生变化的审计字段，取变更前的值。
    pub fn to_record(&self, change: CapturedChange, revision: RevisionId) -> Result<AuditRecord> {
        let CapturedChange {
            entity,
            kind,
            before,
            after,
        } = change;
        match (kind, before, after) {
            (ChangeKind::Created, _, Some(after)) => Ok(AuditRecord::created(entity, revision, after)),
            (ChangeKind::Updated, Some(before), Some(after)) => {
                let previous = before
                    .into_iter()
                    .filter(|(name, value)| after.get(name) != Some(value))
                    .collect();
                Ok(AuditRecord::updated(entity, revision, previous, after))
            }
            (ChangeKind::Deleted, Some(before), _) => {
                let last_state = self.deletion_policy.keeps_last_state().then_some(before);
                Ok(AuditRecord::deleted(entity, revision, last_state))
            }
            (kind, _, _) => Err(AuditError::MissingPreImage { entity, kind }),
        }
    }
}
