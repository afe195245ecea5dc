//! 多线程共享同一引擎：每个工作单元独占一个修订号，所有记录都可按修订找回。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use revtrail_core::{
    AuditEngine, CommitOutcome, EntityKey, EntityTypeBuilder, FieldDef, FieldKind, FieldValue,
    SchemaRegistry, field_map,
};

const THREADS: u64 = 8;
const UNITS_PER_THREAD: u64 = 25;

#[test]
fn parallel_units_receive_distinct_revisions() {
    let registry = SchemaRegistry::builder()
        .register(EntityTypeBuilder::new("Order").field(FieldDef::new("total", FieldKind::Integer)))
        .build()
        .expect("注册表构建失败");
    let engine = Arc::new(AuditEngine::builder(registry).build().expect("引擎构建失败"));

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let mut committed = Vec::with_capacity(UNITS_PER_THREAD as usize);
                for n in 0..UNITS_PER_THREAD {
                    let mut unit = engine.begin();
                    let order = EntityKey::new("Order", worker * 1_000 + n);
                    unit.record_create(order, &field_map([("total", FieldValue::Integer(n as i64))]))
                        .expect("捕获失败");
                    let CommitOutcome::Committed { revision, .. } = unit.commit().expect("提交失败") else {
                        panic!("提交结果应为 Committed");
                    };
                    committed.push(revision.id());
                }
                committed
            })
        })
        .collect();

    let mut all = BTreeSet::new();
    for handle in handles {
        for revision in handle.join().expect("工作线程不应 panic") {
            assert!(all.insert(revision), "修订 {revision} 被重复分配");
        }
    }
    assert_eq!(all.len() as u64, THREADS * UNITS_PER_THREAD);

    let reader = engine.reader();
    let stored = engine.revision_store().scan().expect("扫描失败");
    assert_eq!(stored.len(), all.len());
    assert!(stored.windows(2).all(|pair| pair[0].timestamp() <= pair[1].timestamp()));
    for revision in &all {
        assert_eq!(reader.entities_changed_in(*revision).expect("查询失败").len(), 1);
    }
    assert_eq!(engine.clock().open_units().expect("读取绑定表失败"), 0);
}
