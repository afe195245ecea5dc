//! 审计日志：修订与审计记录的 JSON Lines 导出/导入。
//!
//! # 设计要点（Why）
//! - 合规归档与跨环境迁移需要与存储后端无关的交换格式，逐行 JSON 便于流式处理与 `grep`；
//! - 每条修订与记录分别附带 [`SnapshotHasher::digest_revision`] / [`SnapshotHasher::digest_record`] 摘要，
//!   导入时重新计算，发现篡改即终止。
//!
//! # 格式（What）
//! ```text
//! {"kind":"revision","revision":{"id":1,"timestamp":1000,"actor":{"kind":"identified","id":"ana"}},"digest":"<sha256 hex>"}
//! {"kind":"record","record":{...},"digest":"<sha256 hex>"}
//! ```
//! - 所有修订行在前，审计记录行按修订号升序在后；
//! - 导入时记录必须引用已出现的修订，并遵守快照存储的追加顺序约束。

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::digest::SnapshotHasher;
use crate::ids::{EntityKey, RevisionId};
use crate::record::{AuditRecord, Revision, RevisionDraft};
use crate::store::{RevisionStore, SnapshotStore, StoreError};

/// 日志导入导出错误。
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode journal entry: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("line {line}: malformed journal entry: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line}: digest mismatch for revision {revision} metadata")]
    RevisionDigestMismatch { line: usize, revision: RevisionId },

    #[error("line {line}: digest mismatch for {entity} at revision {revision}")]
    DigestMismatch {
        line: usize,
        entity: EntityKey,
        revision: RevisionId,
    },

    #[error("line {line}: record references revision {revision}, which the journal never declared")]
    DanglingRevision { line: usize, revision: RevisionId },

    #[error("line {line}: storage rejected journal entry: {source}")]
    Store {
        line: usize,
        #[source]
        source: StoreError,
    },

    #[error("failed to read audit storage for export: {0}")]
    Read(#[source] StoreError),
}

/// 日志中的一行。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalLine {
    Revision { revision: Revision, digest: String },
    Record { record: AuditRecord, digest: String },
}

/// 导入或导出的条目计数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JournalSummary {
    pub revisions: usize,
    pub records: usize,
}

/// 把两类存储的全部内容写为日志。
pub fn export<W: Write>(
    revisions: &dyn RevisionStore,
    snapshots: &dyn SnapshotStore,
    mut out: W,
) -> Result<JournalSummary, JournalError> {
    let mut summary = JournalSummary::default();
    for revision in revisions.scan().map_err(JournalError::Read)? {
        let digest = SnapshotHasher::digest_revision(&revision);
        write_line(&mut out, &JournalLine::Revision { revision, digest })?;
        summary.revisions += 1;
    }
    for record in snapshots.scan().map_err(JournalError::Read)? {
        let digest = SnapshotHasher::digest_record(&record);
        write_line(&mut out, &JournalLine::Record { record, digest })?;
        summary.records += 1;
    }
    out.flush()?;
    info!(
        revisions = summary.revisions,
        records = summary.records,
        "exported audit journal"
    );
    Ok(summary)
}

/// 校验并导入日志；遇到第一处错误即停止。
pub fn import<R: BufRead>(
    input: R,
    revisions: &dyn RevisionStore,
    snapshots: &dyn SnapshotStore,
) -> Result<JournalSummary, JournalError> {
    let mut summary = JournalSummary::default();
    for (index, line) in input.lines().enumerate() {
        let line_no = index + 1;
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: JournalLine = serde_json::from_str(trimmed).map_err(|source| JournalError::Parse {
            line: line_no,
            source,
        })?;
        match entry {
            JournalLine::Revision { revision, digest } => {
                if SnapshotHasher::digest_revision(&revision) != digest {
                    return Err(JournalError::RevisionDigestMismatch {
                        line: line_no,
                        revision: revision.id(),
                    });
                }
                let draft = RevisionDraft {
                    id: revision.id(),
                    timestamp: revision.timestamp(),
                    actor: revision.actor().clone(),
                };
                revisions.create(draft).map_err(|source| JournalError::Store {
                    line: line_no,
                    source,
                })?;
                summary.revisions += 1;
            }
            JournalLine::Record { record, digest } => {
                if SnapshotHasher::digest_record(&record) != digest {
                    return Err(JournalError::DigestMismatch {
                        line: line_no,
                        entity: record.entity().clone(),
                        revision: record.revision_id(),
                    });
                }
                let known = revisions
                    .get(record.revision_id())
                    .map_err(|source| JournalError::Store {
                        line: line_no,
                        source,
                    })?;
                if known.is_none() {
                    return Err(JournalError::DanglingRevision {
                        line: line_no,
                        revision: record.revision_id(),
                    });
                }
                snapshots.append(record).map_err(|source| JournalError::Store {
                    line: line_no,
                    source,
                })?;
                summary.records += 1;
            }
        }
    }
    info!(
        revisions = summary.revisions,
        records = summary.records,
        "imported audit journal"
    );
    Ok(summary)
}

fn write_line<W: Write>(out: &mut W, line: &JournalLine) -> Result<(), JournalError> {
    serde_json::to_writer(&mut *out, line).map_err(JournalError::Encode)?;
    out.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::store::{InMemoryRevisionStore, InMemorySnapshotStore};
    use crate::value::{FieldValue, field_map};

    fn seeded() -> (InMemoryRevisionStore, InMemorySnapshotStore) {
        let revisions = InMemoryRevisionStore::new();
        let snapshots = InMemorySnapshotStore::new();
        revisions
            .create(RevisionDraft {
                id: RevisionId::new(1),
                timestamp: 1_000,
                actor: Actor::identified("ana"),
            })
            .expect("revision");
        snapshots
            .append(AuditRecord::created(
                EntityKey::new("Employee", 7_u64),
                RevisionId::new(1),
                field_map([("name", FieldValue::from("Ana")), ("salary", 1000_i64.into())]),
            ))
            .expect("record");
        (revisions, snapshots)
    }

    #[test]
    fn exported_journal_imports_into_empty_stores() {
        let (revisions, snapshots) = seeded();
        let mut buffer = Vec::new();
        let exported = export(&revisions, &snapshots, &mut buffer).expect("export");
        assert_eq!(exported, JournalSummary { revisions: 1, records: 1 });

        let (target_revisions, target_snapshots) =
            (InMemoryRevisionStore::new(), InMemorySnapshotStore::new());
        let imported = import(buffer.as_slice(), &target_revisions, &target_snapshots).expect("import");
        assert_eq!(imported, exported);
        assert_eq!(target_snapshots.scan().expect("scan"), snapshots.scan().expect("scan"));
        assert_eq!(target_revisions.scan().expect("scan"), revisions.scan().expect("scan"));
    }

    #[test]
    fn non_finite_readings_round_trip_through_the_journal() {
        let revisions = InMemoryRevisionStore::new();
        let snapshots = InMemorySnapshotStore::new();
        revisions
            .create(RevisionDraft {
                id: RevisionId::new(1),
                timestamp: 1_000,
                actor: Actor::Anonymous,
            })
            .expect("revision");
        let reading = field_map([
            ("peak", FieldValue::Float(f64::INFINITY)),
            ("floor", FieldValue::Float(f64::NEG_INFINITY)),
            ("reading", FieldValue::Float(f64::NAN)),
        ]);
        snapshots
            .append(AuditRecord::created(EntityKey::new("Sensor", 1_u64), RevisionId::new(1), reading))
            .expect("record");

        let mut buffer = Vec::new();
        export(&revisions, &snapshots, &mut buffer).expect("export");
        let text = String::from_utf8(buffer.clone()).expect("utf8");
        assert!(!text.contains("null"), "{text}");

        let target = InMemorySnapshotStore::new();
        import(buffer.as_slice(), &InMemoryRevisionStore::new(), &target).expect("import");
        assert_eq!(target.scan().expect("scan"), snapshots.scan().expect("scan"));
    }

    #[test]
    fn tampered_record_is_detected() {
        let (revisions, snapshots) = seeded();
        let mut buffer = Vec::new();
        export(&revisions, &snapshots, &mut buffer).expect("export");
        let tampered = String::from_utf8(buffer)
            .expect("utf8")
            .replace(r#""value":1000"#, r#""value":9000"#);
        let err = import(
            tampered.as_bytes(),
            &InMemoryRevisionStore::new(),
            &InMemorySnapshotStore::new(),
        )
        .expect_err("tampered");
        assert!(matches!(err, JournalError::DigestMismatch { line: 2, .. }));
    }

    #[test]
    fn tampered_revision_metadata_is_detected() {
        let (revisions, snapshots) = seeded();
        let mut buffer = Vec::new();
        export(&revisions, &snapshots, &mut buffer).expect("export");
        let text = String::from_utf8(buffer).expect("utf8");

        let backdated = text.replace(r#""timestamp":1000"#, r#""timestamp":5"#);
        let err = import(
            backdated.as_bytes(),
            &InMemoryRevisionStore::new(),
            &InMemorySnapshotStore::new(),
        )
        .expect_err("backdated");
        assert!(matches!(err, JournalError::RevisionDigestMismatch { line: 1, .. }));

        let impersonated = text.replace(r#""id":"ana""#, r#""id":"eve""#);
        let err = import(
            impersonated.as_bytes(),
            &InMemoryRevisionStore::new(),
            &InMemorySnapshotStore::new(),
        )
        .expect_err("impersonated");
        assert!(matches!(err, JournalError::RevisionDigestMismatch { line: 1, .. }));
    }

    #[test]
    fn record_without_declared_revision_is_rejected() {
        let (_, snapshots) = seeded();
        let record = snapshots.scan().expect("scan").remove(0);
        let digest = SnapshotHasher::digest_record(&record);
        let line = serde_json::to_string(&JournalLine::Record { record, digest }).expect("encode");
        let err = import(
            line.as_bytes(),
            &InMemoryRevisionStore::new(),
            &InMemorySnapshotStore::new(),
        )
        .expect_err("dangling");
        assert!(matches!(err, JournalError::DanglingRevision { line: 1, .. }));
    }
}
