//! 持久化布局：修订表与每个实体类型的审计表。
//!
//! - 修订表（缺省 `REVINFO`）：`REV` 主键、`REVTSTMP` 时间戳、可选 `actor`；
//! - 审计表（缺省 `<TABLE>_AUD`）：实体 ID 列、`REV` 外键、`REVTYPE`（0/1/2）以及每个审计字段一列。
//!
//! 本模块只描述布局并把记录投影为行，不执行任何 SQL；DDL 文本供部署脚本或迁移工具使用。

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::config::LayoutConfig;
use crate::error::{AuditError, Result};
use crate::ids::EntityType;
use crate::record::{AuditRecord, ChangeKind, Revision};
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::value::FieldValue;

/// 列在布局中的角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnRole {
    EntityId,
    Revision,
    RevisionType,
    Timestamp,
    Actor,
    Field,
}

/// 单列描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnLayout {
    pub name: String,
    pub sql_type: &'static str,
    pub role: ColumnRole,
    pub nullable: bool,
}

impl ColumnLayout {
    fn new(name: impl Into<String>, sql_type: &'static str, role: ColumnRole, nullable: bool) -> Self {
        Self {
            name: name.into(),
            sql_type,
            role,
            nullable,
        }
    }
}

/// 修订表布局。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionTableLayout {
    pub table: String,
    pub columns: Vec<ColumnLayout>,
}

impl RevisionTableLayout {
    pub fn new(config: &LayoutConfig) -> Self {
        Self {
            table: config.revision_table.clone(),
            columns: vec![
                ColumnLayout::new(&config.revision_column, "BIGINT", ColumnRole::Revision, false),
                ColumnLayout::new(&config.timestamp_column, "BIGINT", ColumnRole::Timestamp, false),
                ColumnLayout::new(&config.actor_column, "VARCHAR(255)", ColumnRole::Actor, true),
            ],
        }
    }

    pub fn revision_column(&self) -> &str {
        column_named(&self.columns, ColumnRole::Revision)
    }

    /// 修订行：`[REV, REVTSTMP, actor]`。
    pub fn project_row(&self, revision: &Revision) -> Result<Vec<(String, FieldValue)>> {
        let rev = bigint(revision.id().get(), "revision id")?;
        let ts = bigint(revision.timestamp(), "revision timestamp")?;
        Ok(self
            .columns
            .iter()
            .map(|column| {
                let value = match column.role {
                    ColumnRole::Revision => FieldValue::Integer(rev),
                    ColumnRole::Timestamp => FieldValue::Integer(ts),
                    _ => revision.actor().column_value().map_or(FieldValue::Null, FieldValue::from),
                };
                (column.name.clone(), value)
            })
            .collect())
    }

    pub fn create_table_sql(&self) -> String {
        let mut sql = format!("CREATE TABLE {} (\n", self.table);
        for column in &self.columns {
            push_column(&mut sql, column);
        }
        let _ = write!(sql, "    PRIMARY KEY ({})\n);", self.revision_column());
        sql
    }
}

/// 单个实体类型的审计表布局。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditTableLayout {
    pub entity_type: EntityType,
    pub table: String,
    pub columns: Vec<ColumnLayout>,
    revision_table: String,
    revision_table_key: String,
}

impl AuditTableLayout {
    pub fn new(config: &LayoutConfig, schema: &EntitySchema) -> Self {
        let mut columns = vec![
            ColumnLayout::new(schema.id_field(), "VARCHAR(255)", ColumnRole::EntityId, false),
            ColumnLayout::new(&config.revision_column, "BIGINT", ColumnRole::Revision, false),
            ColumnLayout::new(&config.revision_type_column, "SMALLINT", ColumnRole::RevisionType, false),
        ];
        columns.extend(
            schema
                .audited_fields()
                .map(|field| ColumnLayout::new(&field.name, field.kind.sql_type(), ColumnRole::Field, true)),
        );
        Self {
            entity_type: schema.entity_type().clone(),
            table: format!("{}{}", schema.table(), config.audit_table_suffix),
            columns,
            revision_table: config.revision_table.clone(),
            revision_table_key: config.revision_column.clone(),
        }
    }

    /// 审计记录投影为一行。
    ///
    /// `CREATED`/`UPDATED` 行写入变更后的完整状态，前像由同一实体的上一行给出；
    /// `DELETED` 行在墓碑即记录策略下写入最后已知状态，在墓碑即标记策略下字段列全部为 `NULL`。
    pub fn project_row(&self, record: &AuditRecord) -> Result<Vec<(String, FieldValue)>> {
        let fields = match record.change_kind() {
            ChangeKind::Deleted => record.field_snapshot(),
            ChangeKind::Created | ChangeKind::Updated => record.state_after(),
        };
        let rev = bigint(record.revision_id().get(), "revision id")?;
        Ok(self
            .columns
            .iter()
            .map(|column| {
                let value = match column.role {
                    ColumnRole::EntityId => FieldValue::from(record.entity().entity_id.as_str()),
                    ColumnRole::Revision => FieldValue::Integer(rev),
                    ColumnRole::RevisionType => {
                        FieldValue::Integer(i64::from(record.change_kind().rev_type()))
                    }
                    _ => fields
                        .and_then(|map| map.get(&column.name))
                        .cloned()
                        .unwrap_or(FieldValue::Null),
                };
                (column.name.clone(), value)
            })
            .collect())
    }

    pub fn create_table_sql(&self) -> String {
        let mut sql = format!("CREATE TABLE {} (\n", self.table);
        for column in &self.columns {
            push_column(&mut sql, column);
        }
        let id = column_named(&self.columns, ColumnRole::EntityId);
        let rev = column_named(&self.columns, ColumnRole::Revision);
        let _ = writeln!(sql, "    PRIMARY KEY ({id}, {rev}),");
        let _ = write!(
            sql,
            "    FOREIGN KEY ({rev}) REFERENCES {}({})\n);",
            self.revision_table, self.revision_table_key
        );
        sql
    }
}

/// 全部表的布局。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedLayout {
    revision: RevisionTableLayout,
    audit: BTreeMap<EntityType, AuditTableLayout>,
}

impl PersistedLayout {
    pub fn new(config: &LayoutConfig, registry: &SchemaRegistry) -> Self {
        Self {
            revision: RevisionTableLayout::new(config),
            audit: registry
                .iter()
                .map(|schema| {
                    (
                        schema.entity_type().clone(),
                        AuditTableLayout::new(config, schema),
                    )
                })
                .collect(),
        }
    }

    pub fn revision_table(&self) -> &RevisionTableLayout {
        &self.revision
    }

    pub fn audit_table(&self, entity_type: &EntityType) -> Result<&AuditTableLayout> {
        self.audit
            .get(entity_type)
            .ok_or_else(|| AuditError::UnknownEntityType {
                entity_type: entity_type.clone(),
            })
    }

    pub fn audit_tables(&self) -> impl Iterator<Item = &AuditTableLayout> {
        self.audit.values()
    }

    /// 修订表在前、审计表按类型名排序的完整 DDL。
    pub fn ddl(&self) -> String {
        let mut statements = vec![self.revision.create_table_sql()];
        statements.extend(self.audit.values().map(AuditTableLayout::create_table_sql));
        statements.join("\n\n")
    }
}

fn push_column(sql: &mut String, column: &ColumnLayout) {
    let null = if column.nullable { "" } else { " NOT NULL" };
    let _ = writeln!(sql, "    {} {}{null},", column.name, column.sql_type);
}

fn column_named(columns: &[ColumnLayout], role: ColumnRole) -> &str {
    columns
        .iter()
        .find(|column| column.role == role)
        .map_or("", |column| column.name.as_str())
}

fn bigint(value: u64, what: &'static str) -> Result<i64> {
    i64::try_from(value).map_err(|_| AuditError::OutOfRange { what, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::ids::{EntityKey, RevisionId};
    use crate::schema::{EntityTypeBuilder, FieldDef, FieldKind};
    use crate::value::field_map;

    fn layout() -> PersistedLayout {
        let registry = SchemaRegistry::builder()
            .register(
                EntityTypeBuilder::new("Employee")
                    .table("employees")
                    .field(FieldDef::new("name", FieldKind::Text))
                    .field(FieldDef::new("salary", FieldKind::Integer))
                    .field(FieldDef::new("notes", FieldKind::Text).not_audited()),
            )
            .build()
            .expect("registry");
        PersistedLayout::new(&LayoutConfig::default(), &registry)
    }

    #[test]
    fn audit_table_ddl_references_revision_table() {
        let layout = layout();
        let table = layout
            .audit_table(&EntityType::from("Employee"))
            .expect("registered");
        assert_eq!(table.table, "employees_AUD");
        let ddl = table.create_table_sql();
        assert!(ddl.contains("REVTYPE SMALLINT NOT NULL"));
        assert!(ddl.contains("salary BIGINT,"));
        assert!(!ddl.contains("notes"));
        assert!(ddl.contains("FOREIGN KEY (REV) REFERENCES REVINFO(REV)"));
        assert!(layout.ddl().starts_with("CREATE TABLE REVINFO ("));
        assert!(layout.audit_table(&EntityType::from("Ghost")).is_err());
    }

    #[test]
    fn rows_project_post_state_and_rev_type() {
        let layout = layout();
        let table = layout
            .audit_table(&EntityType::from("Employee"))
            .expect("registered");
        let record = AuditRecord::updated(
            EntityKey::new("Employee", 7_u64),
            RevisionId::new(2),
            field_map([("salary", 1000_i64)]),
            field_map([("name", FieldValue::from("Ana")), ("salary", 1200_i64.into())]),
        );
        let row = table.project_row(&record).expect("row");
        assert_eq!(
            row,
            vec![
                ("id".to_owned(), FieldValue::from("7")),
                ("REV".to_owned(), FieldValue::Integer(2)),
                ("REVTYPE".to_owned(), FieldValue::Integer(1)),
                ("name".to_owned(), FieldValue::from("Ana")),
                ("salary".to_owned(), FieldValue::Integer(1200)),
            ]
        );

        let marker = AuditRecord::deleted(EntityKey::new("Employee", 7_u64), RevisionId::new(3), None);
        let row = table.project_row(&marker).expect("row");
        assert_eq!(row[2].1, FieldValue::Integer(2));
        assert!(row[3..].iter().all(|(_, value)| value.is_null()));

        let revision_row = layout
            .revision_table()
            .project_row(&Revision::new(RevisionId::new(2), 1_500, Actor::Anonymous))
            .expect("row");
        assert_eq!(revision_row[2], ("actor".to_owned(), FieldValue::Null));
    }
}
