//! 实体类型注册表：在启动时把字段声明解析为每个具体类型的审计字段集合。
//!
//! # 设计动机（Why）
//! - 声明式的“字段参与/不参与审计”本质是每字段一个布尔能力位，启动时一次性解析，运行期只读；
//! - 多个实体类型可以共享一个基础定义（例如公共的 `created_by`、`updated_at` 字段），
//!   继承字段是否参与审计在**具体类型**层面逐个覆盖，两个共享基础定义的类型可以对同一继承字段作出不同选择。
//!
//! # 逻辑解析（How）
//! - [`EntityTypeBuilder`] 收集基础定义、自有字段与继承字段覆盖；
//! - [`EntityTypeBuilder::build`] 合成 [`EntitySchema`]：字段按“先继承、后自有”排序，审计集合固化为 `BTreeSet`；
//! - [`SchemaRegistry`] 不可变，构建完成后由引擎以 `Arc` 共享。
//!
//! # 契约说明（What）
//! - 未注册的实体类型不参与审计，拦截器对其写入不产生记录；
//! - 实体 ID 字段不属于快照，它由 [`EntityKey`](crate::EntityKey) 单独承载。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;

use crate::ids::EntityType;
use crate::value::{FieldMap, FieldValue};

/// 注册表构建错误。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("entity type `{entity_type}` declares field `{field}` more than once")]
    DuplicateField { entity_type: String, field: String },

    #[error("entity type `{0}` is registered more than once")]
    DuplicateEntityType(String),

    #[error("entity type `{entity_type}` overrides `{field}`, which no base definition provides")]
    UnknownInheritedField { entity_type: String, field: String },

    #[error("{what} name must not be empty")]
    EmptyName { what: &'static str },
}

/// 字段的存储类型，用于渲染持久化布局。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Bool,
    Integer,
    Float,
    Text,
    Bytes,
    Timestamp,
}

impl FieldKind {
    pub const fn sql_type(self) -> &'static str {
        match self {
            FieldKind::Bool => "BOOLEAN",
            FieldKind::Integer => "BIGINT",
            FieldKind::Float => "DOUBLE PRECISION",
            FieldKind::Text => "VARCHAR(255)",
            FieldKind::Bytes => "BLOB",
            FieldKind::Timestamp => "TIMESTAMP",
        }
    }
}

/// 字段声明。默认参与审计。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    name: String,
    kind: FieldKind,
    audited: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            audited: true,
        }
    }

    /// 标记为不参与审计：该字段不会出现在快照中。
    pub fn not_audited(mut self) -> Self {
        self.audited = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn audited(&self) -> bool {
        self.audited
    }
}

/// 可被多个实体类型复用的公共字段集合。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseDefinition {
    name: String,
    fields: Vec<FieldDef>,
}

impl BaseDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }
}

/// 字段来源。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldOrigin {
    Own,
    Inherited { base: String },
}

/// 解析后的字段：审计标记已经应用覆盖。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedField {
    pub name: String,
    pub kind: FieldKind,
    pub audited: bool,
    pub origin: FieldOrigin,
}

/// 具体实体类型的已解析审计元数据。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntitySchema {
    entity_type: EntityType,
    table: String,
    id_field: String,
    fields: Vec<ResolvedField>,
    audited: BTreeSet<String>,
}

impl EntitySchema {
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// 实体主表名，审计表名由它加后缀得到。
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn fields(&self) -> &[ResolvedField] {
        &self.fields
    }

    /// 参与审计的字段，按声明顺序。
    pub fn audited_fields(&self) -> impl Iterator<Item = &ResolvedField> {
        self.fields.iter().filter(|field| field.audited)
    }

    pub fn is_audited(&self, field: &str) -> bool {
        self.audited.contains(field)
    }

    /// 把宿主实体状态投影为审计快照。
    ///
    /// 非审计字段、未声明字段与 ID 字段被丢弃；缺失的审计字段以 `Null` 补齐，
    /// 以便同一实体的每份快照都拥有相同的键集合。
    pub fn project(&self, state: &FieldMap) -> FieldMap {
        self.audited
            .iter()
            .map(|name| {
                let value = state.get(name).cloned().unwrap_or(FieldValue::Null);
                (name.clone(), value)
            })
            .collect()
    }
}

/// 单个实体类型的构建器。
#[derive(Clone, Debug)]
pub struct EntityTypeBuilder {
    name: String,
    table: Option<String>,
    id_field: String,
    bases: Vec<BaseDefinition>,
    fields: Vec<FieldDef>,
    overrides: BTreeMap<String, bool>,
}

impl EntityTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            id_field: "id".to_owned(),
            bases: Vec::new(),
            fields: Vec::new(),
            overrides: BTreeMap::new(),
        }
    }

    /// 主表名，缺省时与类型名相同。
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn extends(mut self, base: &BaseDefinition) -> Self {
        self.bases.push(base.clone());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// 在本类型上覆盖某个继承字段是否参与审计。
    pub fn audit_inherited(mut self, field: impl Into<String>, audited: bool) -> Self {
        self.overrides.insert(field.into(), audited);
        self
    }

    pub fn build(self) -> Result<EntitySchema, SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyName { what: "entity type" });
        }
        let duplicate = |field: &str| SchemaError::DuplicateField {
            entity_type: self.name.clone(),
            field: field.to_owned(),
        };

        let mut fields: Vec<ResolvedField> = Vec::new();
        let mut seen = BTreeSet::new();
        for base in &self.bases {
            for def in base.fields() {
                if !seen.insert(def.name().to_owned()) || def.name() == self.id_field {
                    return Err(duplicate(def.name()));
                }
                let audited = self
                    .overrides
                    .get(def.name())
                    .copied()
                    .unwrap_or(def.audited());
                fields.push(ResolvedField {
                    name: def.name().to_owned(),
                    kind: def.kind(),
                    audited,
                    origin: FieldOrigin::Inherited {
                        base: base.name().to_owned(),
                    },
                });
            }
        }

        if let Some(unknown) = self.overrides.keys().find(|name| {
            !fields
                .iter()
                .any(|field| field.name == name.as_str())
        }) {
            return Err(SchemaError::UnknownInheritedField {
                entity_type: self.name.clone(),
                field: unknown.clone(),
            });
        }

        for def in &self.fields {
            if def.name().trim().is_empty() {
                return Err(SchemaError::EmptyName { what: "field" });
            }
            if !seen.insert(def.name().to_owned()) || def.name() == self.id_field {
                return Err(duplicate(def.name()));
            }
            fields.push(ResolvedField {
                name: def.name().to_owned(),
                kind: def.kind(),
                audited: def.audited(),
                origin: FieldOrigin::Own,
            });
        }

        let audited = fields
            .iter()
            .filter(|field| field.audited)
            .map(|field| field.name.clone())
            .collect();
        Ok(EntitySchema {
            entity_type: EntityType::from(self.name.as_str()),
            table: self.table.unwrap_or_else(|| self.name.clone()),
            id_field: self.id_field,
            fields,
            audited,
        })
    }
}

/// 启动期构建、运行期只读的实体类型注册表。
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<EntityType, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    pub fn get(&self, entity_type: &EntityType) -> Option<&Arc<EntitySchema>> {
        self.types.get(entity_type)
    }

    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.types.contains_key(entity_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntitySchema>> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// [`SchemaRegistry`] 构建器。
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    pending: Vec<EntityTypeBuilder>,
}

impl SchemaRegistryBuilder {
    pub fn register(mut self, entity: EntityTypeBuilder) -> Self {
        self.pending.push(entity);
        self
    }

    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let mut types = BTreeMap::new();
        for pending in self.pending {
            let schema = pending.build()?;
            let key = schema.entity_type().clone();
            if types.contains_key(&key) {
                return Err(SchemaError::DuplicateEntityType(key.to_string()));
            }
            types.insert(key, Arc::new(schema));
        }
        Ok(SchemaRegistry { types })
    }
}
