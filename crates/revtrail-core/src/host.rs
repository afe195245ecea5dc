//! 内存宿主表：参考 [`EntityWriter`] 实现。
//!
//! 回放工具与测试用它扮演“宿主持久层”：实体以字段映射形式保存在内存里，
//! 创建时若状态中没有 `id` 字段则自动生成数值 ID。

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::ids::{EntityId, EntityKey, EntityType};
use crate::interceptor::EntityWriter;
use crate::value::{FieldMap, FieldValue};

/// 宿主表错误。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("entity {0} does not exist")]
    NotFound(EntityKey),

    #[error("entity {0} already exists")]
    AlreadyExists(EntityKey),

    #[error("field `id` must be an integer or text, got {0}")]
    InvalidId(String),
}

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<EntityKey, FieldMap>,
    next_id: u64,
}

/// 共享的内存实体表；克隆得到同一张表的另一个句柄。
#[derive(Clone, Debug, Default)]
pub struct MemoryEntityTable {
    inner: Arc<RwLock<Table>>,
}

impl MemoryEntityTable {
    pub const ID_FIELD: &'static str = "id";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: &EntityKey) -> Option<FieldMap> {
        self.inner.read().rows.get(entity).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().rows.is_empty()
    }
}

impl EntityWriter for MemoryEntityTable {
    type Error = HostError;

    fn read(&mut self, entity: &EntityKey) -> Result<Option<FieldMap>, HostError> {
        Ok(self.get(entity))
    }

    fn insert(
        &mut self,
        entity_type: &EntityType,
        mut state: FieldMap,
    ) -> Result<(EntityId, FieldMap), HostError> {
        let mut table = self.inner.write();
        let entity_id = match state.remove(Self::ID_FIELD) {
            None | Some(FieldValue::Null) => {
                table.next_id += 1;
                EntityId::from(table.next_id)
            }
            Some(FieldValue::Integer(id)) => EntityId::from(id),
            Some(FieldValue::Text(id)) => EntityId::from(id),
            Some(other) => return Err(HostError::InvalidId(format!("{other:?}"))),
        };
        let key = EntityKey {
            entity_type: entity_type.clone(),
            entity_id: entity_id.clone(),
        };
        if table.rows.contains_key(&key) {
            return Err(HostError::AlreadyExists(key));
        }
        table.rows.insert(key, state.clone());
        Ok((entity_id, state))
    }

    fn update(&mut self, entity: &EntityKey, changes: FieldMap) -> Result<FieldMap, HostError> {
        let mut table = self.inner.write();
        let row = table
            .rows
            .get_mut(entity)
            .ok_or_else(|| HostError::NotFound(entity.clone()))?;
        row.extend(changes);
        Ok(row.clone())
    }

    fn delete(&mut self, entity: &EntityKey) -> Result<(), HostError> {
        self.inner
            .write()
            .rows
            .remove(entity)
            .map(drop)
            .ok_or_else(|| HostError::NotFound(entity.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::field_map;

    #[test]
    fn explicit_and_generated_ids() {
        let mut table = MemoryEntityTable::new();
        let ty = EntityType::from("Employee");
        let (explicit, _) = table
            .insert(&ty, field_map([("id", FieldValue::from(7_i64)), ("name", "Ana".into())]))
            .expect("explicit");
        let (generated, state) = table
            .insert(&ty, field_map([("name", "Bo")]))
            .expect("generated");
        assert_eq!(explicit, EntityId::from("7"));
        assert_eq!(generated, EntityId::from("1"));
        assert!(!state.contains_key("id"));

        let dup = table.insert(&ty, field_map([("id", 7_i64)]));
        assert!(matches!(dup, Err(HostError::AlreadyExists(_))));
    }

    #[test]
    fn update_merges_fields_and_delete_removes_row() {
        let mut table = MemoryEntityTable::new();
        let ty = EntityType::from("Employee");
        let (id, _) = table
            .insert(&ty, field_map([("name", FieldValue::from("Ana")), ("salary", 1000_i64.into())]))
            .expect("insert");
        let key = EntityKey::new(ty, id);
        let after = table
            .update(&key, field_map([("salary", 1200_i64)]))
            .expect("update");
        assert_eq!(after["name"], FieldValue::from("Ana"));
        assert_eq!(after["salary"], FieldValue::Integer(1200));
        table.delete(&key).expect("delete");
        assert!(table.get(&key).is_none());
        assert_eq!(table.delete(&key), Err(HostError::NotFound(key)));
    }
}
