//! 审计日志回放工具：导入 JSON Lines 日志，校验完整性，打印某实体的历史或某时间点的状态。
//!
//! # 使用方法
//! ```bash
//! RUST_LOG=info cargo run --features replay-cli --bin revtrail_replay -- audit.jsonl --entity Employee:7 --at 1700000000000 \
//!     --policy tombstone_marker
//! ```
//! - `audit.jsonl`：由 `revtrail_core::journal::export` 生成的日志；
//! - `--entity TYPE:ID`：可选，目标实体；缺省时只做校验并输出汇总；
//! - `--at MILLIS`：可选，输出该时间点的状态而非完整历史；
//! - `--policy`：可选，日志产生时的删除策略，仅影响输出中的 `deletion_policy` 字段。
//!
//! # 设计要点（Why）
//! - 导入过程复用库内的摘要与存储约束：摘要不符、引用未声明的修订、记录乱序都会立即失败；
//! - 日志输出走 `tracing`，结果走标准输出，便于脚本化处理。

use std::env;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use revtrail_core::journal;
use revtrail_core::{
    AuditReader, DeletionPolicy, EntityKey, InMemoryRevisionStore, InMemorySnapshotStore,
};

struct Options {
    journal: PathBuf,
    entity: Option<EntityKey>,
    at: Option<u64>,
    policy: DeletionPolicy,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    if let Err(error) = run() {
        eprintln!("审计日志回放失败: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_args(env::args().skip(1))?;

    let file = File::open(&options.journal)
        .with_context(|| format!("打开日志失败: {}", options.journal.display()))?;
    let revisions = Arc::new(InMemoryRevisionStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let summary = journal::import(BufReader::new(file), revisions.as_ref(), snapshots.as_ref())
        .with_context(|| format!("校验日志失败: {}", options.journal.display()))?;

    let reader = AuditReader::new(revisions, snapshots, options.policy);
    let output = match (&options.entity, options.at) {
        (None, _) => json!({
            "revisions": summary.revisions,
            "records": summary.records,
        }),
        (Some(entity), Some(at)) => json!({
            "entity": entity.to_string(),
            "at": at,
            "revision": reader.revision_at(at)?,
            "state": reader.state_at(entity, at)?,
        }),
        (Some(entity), None) => json!({
            "entity": entity.to_string(),
            "deletion_policy": reader.deletion_policy().as_str(),
            "history": reader.history(entity)?,
        }),
    };

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &output)?;
    writeln!(stdout)?;
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let journal = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| usage("缺少审计日志路径"))?;
    let mut options = Options {
        journal,
        entity: None,
        at: None,
        policy: DeletionPolicy::default(),
    };

    while let Some(flag) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| usage(&format!("{name} 之后必须提供取值")))
        };
        match flag.as_str() {
            "--entity" => {
                let raw = value("--entity")?;
                let (entity_type, entity_id) = raw
                    .split_once(':')
                    .ok_or_else(|| usage("--entity 的格式应为 TYPE:ID"))?;
                options.entity = Some(EntityKey::new(entity_type, entity_id));
            }
            "--at" => {
                let raw = value("--at")?;
                options.at = Some(
                    raw.parse()
                        .with_context(|| format!("--at 需要毫秒时间戳，得到 {raw}"))?,
                );
            }
            "--policy" => {
                options.policy = value("--policy")?.parse()?;
            }
            unknown => return Err(usage(&format!("未知参数: {unknown}"))),
        }
    }
    Ok(options)
}

fn usage(reason: &str) -> anyhow::Error {
    anyhow!(
        "{reason}\n用法: revtrail_replay <journal.jsonl> [--entity TYPE:ID] [--at MILLIS] [--policy tombstone_record|tombstone_marker]"
    )
}
