//! 审计引擎使用的强类型标识。
//!
//! # 设计目标（Why）
//! - 修订号、实体类型、实体 ID 与工作单元 ID 在签名中极易混用，使用新类型在编译期隔离；
//! - 实体类型以 `Arc<str>` 承载，克隆仅为原子计数，适合作为存储索引键反复复制。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// 单调递增的修订号。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(u64);

impl RevisionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 实体类型标签，例如 `Employee`。
///
/// # 契约说明（What）
/// - 标签区分大小写，与 [`SchemaRegistry`](crate::SchemaRegistry) 中注册的名称逐字匹配；
/// - 序列化为普通字符串。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EntityType(Arc<str>);

impl EntityType {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityType {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for EntityType {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 实体在其类型命名空间内的稳定标识。
///
/// 数值主键与字符串主键统一以文本保存，比较语义为逐字比较。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(实体类型, 实体 ID)` 组合键，快照存储以此为分区键。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<EntityType>, entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.entity_id)
    }
}

/// 工作单元标识，由引擎按进程内计数器分配，仅用于绑定“当前修订”。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitOfWorkId(u64);

impl UnitOfWorkId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitOfWorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uow-{}", self.0)
    }
}
