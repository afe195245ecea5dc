use sha2::{Digest, Sha256};

use crate::actor::Actor;
use crate::record::{AuditRecord, Revision};
use crate::value::{FieldMap, FieldValue, canonical_float_bits};

/// 快照摘要生成器。
///
/// ## 设计动机（Why）
/// - 导出的审计日志需要防篡改证据：每条记录附带其快照的 SHA-256 摘要，回放时重新计算比对；
/// - 编码集中在这里，导出端与回放工具共用同一套字节布局。
///
/// ## 逻辑（How）
/// - 按字段名有序遍历 [`FieldMap`]，写入字段名、`0x00` 分隔、类型标记与取值字节、`0xFF` 结束；
/// - 字符串与字节串先写入长度前缀，避免相邻字段拼接产生歧义；
/// - 缺失的映射（墓碑即标记）编码为固定标记 `absent`；
/// - 浮点按位编码，所有 NaN 折叠为同一个位模式，与 [`FieldValue`] 的相等语义一致。
pub struct SnapshotHasher;

impl SnapshotHasher {
    /// 单个字段映射的摘要。
    pub fn digest(fields: &FieldMap) -> String {
        let mut hasher = Sha256::new();
        Self::hash_map(&mut hasher, fields);
        hex::encode(hasher.finalize())
    }

    /// 审计记录两份视图的联合摘要。
    pub fn digest_record(record: &AuditRecord) -> String {
        let mut hasher = Sha256::new();
        hasher.update(record.entity().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(record.revision_id().get().to_le_bytes());
        hasher.update([record.change_kind().rev_type()]);
        for view in [record.field_snapshot(), record.state_after()] {
            match view {
                Some(fields) => Self::hash_map(&mut hasher, fields),
                None => hasher.update(b"absent"),
            }
        }
        hex::encode(hasher.finalize())
    }

    /// 修订元数据（修订号、时间戳、操作者）的摘要。
    pub fn digest_revision(revision: &Revision) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"revision");
        hasher.update(revision.id().get().to_le_bytes());
        hasher.update(revision.timestamp().to_le_bytes());
        match revision.actor() {
            Actor::Anonymous => hasher.update(b"anonymous"),
            Actor::Identified(actor) => {
                hasher.update(b"identified");
                for part in [
                    Some(&*actor.id),
                    actor.display_name.as_deref(),
                    actor.tenant.as_deref(),
                ] {
                    match part {
                        Some(text) => {
                            hasher.update((text.len() as u64).to_le_bytes());
                            hasher.update(text.as_bytes());
                        }
                        None => hasher.update(b"absent"),
                    }
                }
            }
        }
        hex::encode(hasher.finalize())
    }

    fn hash_map(hasher: &mut Sha256, fields: &FieldMap) {
        hasher.update(b"map");
        for (name, value) in fields {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            Self::hash_value(hasher, value);
            hasher.update([0xFF]);
        }
    }

    fn hash_value(hasher: &mut Sha256, value: &FieldValue) {
        match value {
            FieldValue::Null => hasher.update(b"null"),
            FieldValue::Bool(v) => {
                hasher.update(b"bool");
                hasher.update([u8::from(*v)]);
            }
            FieldValue::Integer(v) => {
                hasher.update(b"int");
                hasher.update(v.to_le_bytes());
            }
            FieldValue::Float(v) => {
                hasher.update(b"float");
                hasher.update(canonical_float_bits(*v).to_le_bytes());
            }
            FieldValue::Text(v) => {
                hasher.update(b"text");
                hasher.update((v.len() as u64).to_le_bytes());
                hasher.update(v.as_bytes());
            }
            FieldValue::Bytes(v) => {
                hasher.update(b"bytes");
                hasher.update((v.len() as u64).to_le_bytes());
                hasher.update(v);
            }
            FieldValue::Timestamp(v) => {
                hasher.update(b"ts");
                hasher.update(v.to_le_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{EntityKey, RevisionId};
    use crate::value::field_map;

    #[test]
    fn digest_is_stable_and_sensitive_to_values() {
        let ana = field_map([("name", FieldValue::from("Ana")), ("salary", 1000_i64.into())]);
        let raised = field_map([("name", FieldValue::from("Ana")), ("salary", 1200_i64.into())]);
        assert_eq!(SnapshotHasher::digest(&ana), SnapshotHasher::digest(&ana.clone()));
        assert_ne!(SnapshotHasher::digest(&ana), SnapshotHasher::digest(&raised));
        assert_eq!(SnapshotHasher::digest(&ana).len(), 64);
    }

    #[test]
    fn adjacent_text_fields_do_not_collide() {
        let left = field_map([("a", FieldValue::from("xy")), ("b", FieldValue::from(""))]);
        let right = field_map([("a", FieldValue::from("x")), ("b", FieldValue::from("y"))]);
        assert_ne!(SnapshotHasher::digest(&left), SnapshotHasher::digest(&right));
    }

    #[test]
    fn revision_digest_covers_timestamp_and_actor() {
        use crate::actor::AuditActor;

        let base = Revision::new(RevisionId::new(1), 1_000, Actor::identified("ana"));
        let later = Revision::new(RevisionId::new(1), 1_001, Actor::identified("ana"));
        let anonymous = Revision::new(RevisionId::new(1), 1_000, Actor::Anonymous);
        let tenanted = Revision::new(
            RevisionId::new(1),
            1_000,
            Actor::Identified(AuditActor::new("ana").with_tenant("acme")),
        );
        let digest = SnapshotHasher::digest_revision(&base);
        assert_eq!(digest, SnapshotHasher::digest_revision(&base.clone()));
        for other in [later, anonymous, tenanted] {
            assert_ne!(digest, SnapshotHasher::digest_revision(&other));
        }
    }

    #[test]
    fn record_digest_distinguishes_tombstone_policies() {
        let key = EntityKey::new("Employee", 7_u64);
        let state = field_map([("name", FieldValue::from("Ana"))]);
        let with_state = AuditRecord::deleted(key.clone(), RevisionId::new(3), Some(state));
        let marker = AuditRecord::deleted(key, RevisionId::new(3), None);
        assert_ne!(
            SnapshotHasher::digest_record(&with_state),
            SnapshotHasher::digest_record(&marker)
        );
    }
}
