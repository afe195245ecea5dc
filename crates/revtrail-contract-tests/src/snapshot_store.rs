//! 快照存储契约：每实体按修订号严格递增、同一修订内每实体至多一条、墓碑之后不再接受写入。

use revtrail_core::{AuditRecord, ChangeKind, StoreError};

use crate::SnapshotStoreFactory;
use crate::case::{TckCase, TckSuite};
use crate::support::{created, employee, rev, salary, updated};

const CASES: &[TckCase<SnapshotStoreFactory>] = &[
    TckCase {
        name: "query_returns_records_in_revision_order",
        test: query_returns_records_in_revision_order,
    },
    TckCase {
        name: "query_at_picks_latest_record_not_after_revision",
        test: query_at_picks_latest_record_not_after_revision,
    },
    TckCase {
        name: "same_revision_twice_is_duplicate",
        test: same_revision_twice_is_duplicate,
    },
    TckCase {
        name: "older_revision_is_out_of_order",
        test: older_revision_is_out_of_order,
    },
    TckCase {
        name: "tombstone_closes_entity",
        test: tombstone_closes_entity,
    },
    TckCase {
        name: "append_all_is_all_or_nothing",
        test: append_all_is_all_or_nothing,
    },
    TckCase {
        name: "records_in_and_scan_group_by_revision",
        test: records_in_and_scan_group_by_revision,
    },
    TckCase {
        name: "unknown_entity_reads_are_empty",
        test: unknown_entity_reads_are_empty,
    },
];

const SUITE: TckSuite<SnapshotStoreFactory> = TckSuite {
    name: "snapshot_store",
    cases: CASES,
};

pub const fn suite() -> &'static TckSuite<SnapshotStoreFactory> {
    &SUITE
}

fn query_returns_records_in_revision_order(factory: &SnapshotStoreFactory) {
    let store = factory();
    store.append(created(7, 1, 1000)).expect("追加 CREATED 失败");
    store.append(updated(7, 4, 1000, 1200)).expect("追加 UPDATED 失败");
    store.append(updated(7, 9, 1200, 1300)).expect("追加 UPDATED 失败");

    let revisions: Vec<_> = store
        .query(&employee(7))
        .expect("查询失败")
        .iter()
        .map(AuditRecord::revision_id)
        .collect();
    assert_eq!(revisions, [rev(1), rev(4), rev(9)], "记录必须按修订号升序返回");
}

fn query_at_picks_latest_record_not_after_revision(factory: &SnapshotStoreFactory) {
    let store = factory();
    store.append(created(7, 2, 1000)).expect("追加失败");
    store.append(updated(7, 5, 1000, 1200)).expect("追加失败");

    assert_eq!(store.query_at(&employee(7), rev(1)).expect("查询失败"), None);
    let at_four = store.query_at(&employee(7), rev(4)).expect("查询失败");
    assert_eq!(at_four.map(|record| record.revision_id()), Some(rev(2)));
    let at_five = store
        .query_at(&employee(7), rev(5))
        .expect("查询失败")
        .expect("修订 5 应命中记录");
    assert_eq!(at_five.state_after(), Some(&salary(1200)));
}

fn same_revision_twice_is_duplicate(factory: &SnapshotStoreFactory) {
    let store = factory();
    store.append(created(7, 3, 1000)).expect("追加失败");
    let err = store
        .append(updated(7, 3, 1000, 1100))
        .expect_err("同一修订的第二条记录必须被拒绝");
    assert!(matches!(err, StoreError::Duplicate { .. }), "应返回 Duplicate，实际为 {err:?}");
    assert_eq!(store.query(&employee(7)).expect("查询失败").len(), 1);
}

fn older_revision_is_out_of_order(factory: &SnapshotStoreFactory) {
    let store = factory();
    store.append(created(7, 5, 1000)).expect("追加失败");
    let err = store
        .append(updated(7, 4, 1000, 1100))
        .expect_err("较旧修订必须被拒绝");
    assert!(matches!(err, StoreError::OutOfOrder { .. }), "应返回 OutOfOrder，实际为 {err:?}");
}

fn tombstone_closes_entity(factory: &SnapshotStoreFactory) {
    let store = factory();
    store.append(created(7, 1, 1000)).expect("追加失败");
    store
        .append(AuditRecord::deleted(employee(7), rev(2), None))
        .expect("追加墓碑失败");
    assert_eq!(store.closed_at(&employee(7)).expect("查询失败"), Some(rev(2)));
    assert!(store.append(updated(7, 3, 1000, 1100)).is_err(), "墓碑之后不得再追加记录");

    let history = store.query(&employee(7)).expect("查询失败");
    assert_eq!(history.last().map(AuditRecord::change_kind), Some(ChangeKind::Deleted));
    assert_eq!(
        history.iter().filter(|record| record.is_tombstone()).count(),
        1,
        "历史中只能有一条 DELETED"
    );
    assert_eq!(store.closed_at(&employee(8)).expect("查询失败"), None);
}

fn append_all_is_all_or_nothing(factory: &SnapshotStoreFactory) {
    let store = factory();
    store.append(created(7, 5, 1000)).expect("追加失败");
    let err = store.append_all(vec![created(8, 6, 500), updated(7, 4, 1000, 1100)]);
    assert!(err.is_err(), "批次中任一记录违约时整批失败");
    assert!(store.query(&employee(8)).expect("查询失败").is_empty(), "失败批次不得留下部分结果");

    store
        .append_all(vec![created(8, 6, 500), updated(7, 6, 1000, 1100)])
        .expect("合法批次应成功");
    assert_eq!(store.records_in(rev(6)).expect("查询失败").len(), 2);
}

fn records_in_and_scan_group_by_revision(factory: &SnapshotStoreFactory) {
    let store = factory();
    store
        .append_all(vec![created(2, 1, 10), created(1, 1, 20)])
        .expect("追加失败");
    store.append(updated(2, 3, 10, 11)).expect("追加失败");

    let in_first: Vec<_> = store
        .records_in(rev(1))
        .expect("查询失败")
        .into_iter()
        .map(|record| record.entity().clone())
        .collect();
    assert_eq!(in_first.len(), 2);
    assert!(in_first.contains(&employee(1)) && in_first.contains(&employee(2)));
    assert!(store.records_in(rev(2)).expect("查询失败").is_empty());

    let scanned: Vec<_> = store
        .scan()
        .expect("扫描失败")
        .iter()
        .map(AuditRecord::revision_id)
        .collect();
    assert_eq!(scanned, [rev(1), rev(1), rev(3)], "scan 必须按修订号升序");
}

fn unknown_entity_reads_are_empty(factory: &SnapshotStoreFactory) {
    let store = factory();
    assert!(store.query(&employee(404)).expect("查询失败").is_empty());
    assert_eq!(store.query_at(&employee(404), rev(1)).expect("查询失败"), None);
    assert!(store.scan().expect("扫描失败").is_empty());
}
