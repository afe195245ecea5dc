use std::fmt::Write;
use std::panic;

use revtrail_core::{
    Actor, AuditRecord, EntityKey, FieldMap, FieldValue, RevisionDraft, RevisionId, field_map,
};

/// 在附加上下文的情况下重新抛出 panic。
///
/// # 教案式说明
/// - **意图 (Why)**：`case::run_suite` 捕获 panic 后，在原始 payload 之上追加“套件/用例”描述。
/// - **逻辑 (How)**：将 payload 解析为 `&str` / `String`，格式化后通过 [`panic::resume_unwind`] 抛出。
/// - **契约 (What)**：必须在 `catch_unwind` 的错误分支中调用；函数不会正常返回。
pub fn panic_with_context(suite: &str, case: &str, payload: Box<dyn std::any::Any + Send>) -> ! {
    let mut message = String::new();
    let _ = write!(&mut message, "[revtrail-tck::{suite}::{case}] 测试失败：");

    if let Some(text) = payload.downcast_ref::<&str>() {
        let _ = write!(&mut message, "{text}");
    } else if let Some(text) = payload.downcast_ref::<String>() {
        let _ = write!(&mut message, "{text}");
    } else {
        let _ = write!(&mut message, "<未知 panic 类型>");
    }

    panic::resume_unwind(Box::new(message));
}

pub fn employee(id: u64) -> EntityKey {
    EntityKey::new("Employee", id)
}

pub fn salary(value: i64) -> FieldMap {
    field_map([("name", FieldValue::from("Ana")), ("salary", value.into())])
}

pub fn rev(id: u64) -> RevisionId {
    RevisionId::new(id)
}

pub fn created(id: u64, revision: u64, value: i64) -> AuditRecord {
    AuditRecord::created(employee(id), rev(revision), salary(value))
}

pub fn updated(id: u64, revision: u64, from: i64, to: i64) -> AuditRecord {
    AuditRecord::updated(
        employee(id),
        rev(revision),
        field_map([("salary", from)]),
        salary(to),
    )
}

pub fn draft(id: u64, timestamp: u64) -> RevisionDraft {
    RevisionDraft {
        id: rev(id),
        timestamp,
        actor: Actor::identified("tck"),
    }
}
