//! 修订存储契约：按修订号有序、修订号唯一、时间戳随修订号单调不减、撤销只影响目标修订。

use revtrail_core::{Revision, StoreError};

use crate::RevisionStoreFactory;
use crate::case::{TckCase, TckSuite};
use crate::support::{draft, rev};

const CASES: &[TckCase<RevisionStoreFactory>] = &[
    TckCase {
        name: "created_revision_is_readable",
        test: created_revision_is_readable,
    },
    TckCase {
        name: "duplicate_id_is_rejected",
        test: duplicate_id_is_rejected,
    },
    TckCase {
        name: "late_commit_of_lower_id_keeps_order",
        test: late_commit_of_lower_id_keeps_order,
    },
    TckCase {
        name: "timestamp_regression_is_rejected",
        test: timestamp_regression_is_rejected,
    },
    TckCase {
        name: "latest_at_or_before_resolves_by_timestamp",
        test: latest_at_or_before_resolves_by_timestamp,
    },
    TckCase {
        name: "abandon_removes_only_the_target",
        test: abandon_removes_only_the_target,
    },
];

const SUITE: TckSuite<RevisionStoreFactory> = TckSuite {
    name: "revision_store",
    cases: CASES,
};

pub const fn suite() -> &'static TckSuite<RevisionStoreFactory> {
    &SUITE
}

fn created_revision_is_readable(factory: &RevisionStoreFactory) {
    let store = factory();
    let stored = store.create(draft(1, 1_000)).expect("创建修订失败");
    assert_eq!(stored.id(), rev(1));
    assert_eq!(stored.timestamp(), 1_000);
    assert_eq!(stored.actor().column_value(), Some("tck"));
    assert_eq!(store.get(rev(1)).expect("读取失败"), Some(stored.clone()));
    assert_eq!(store.latest().expect("读取失败"), Some(stored));
    assert_eq!(store.get(rev(2)).expect("读取失败"), None);
}

fn duplicate_id_is_rejected(factory: &RevisionStoreFactory) {
    let store = factory();
    store.create(draft(1, 1_000)).expect("创建修订失败");
    let err = store.create(draft(1, 2_000)).expect_err("重复修订号必须被拒绝");
    assert!(matches!(err, StoreError::Duplicate { .. }), "应返回 Duplicate，实际为 {err:?}");
    assert_eq!(store.scan().expect("扫描失败").len(), 1);
}

fn late_commit_of_lower_id_keeps_order(factory: &RevisionStoreFactory) {
    let store = factory();
    store.create(draft(2, 1_000)).expect("创建修订失败");
    store.create(draft(1, 1_000)).expect("较小修订号晚提交应被接受");
    let ids: Vec<_> = store.scan().expect("扫描失败").iter().map(Revision::id).collect();
    assert_eq!(ids, [rev(1), rev(2)], "scan 必须按修订号升序");
    assert_eq!(store.latest().expect("读取失败").map(|r| r.id()), Some(rev(2)));
}

fn timestamp_regression_is_rejected(factory: &RevisionStoreFactory) {
    let store = factory();
    store.create(draft(1, 2_000)).expect("创建修订失败");
    assert!(
        store.create(draft(2, 1_000)).is_err(),
        "修订号更大但时间戳更早的修订必须被拒绝"
    );
}

fn latest_at_or_before_resolves_by_timestamp(factory: &RevisionStoreFactory) {
    let store = factory();
    store.create(draft(1, 1_000)).expect("创建修订失败");
    store.create(draft(2, 2_000)).expect("创建修订失败");
    store.create(draft(3, 2_000)).expect("创建修订失败");

    let at = |ts| {
        store
            .latest_at_or_before(ts)
            .expect("查询失败")
            .map(|revision| revision.id())
    };
    assert_eq!(at(999), None);
    assert_eq!(at(1_000), Some(rev(1)));
    assert_eq!(at(1_999), Some(rev(1)));
    assert_eq!(at(2_000), Some(rev(3)), "同一时间戳取修订号最大者");
    assert_eq!(at(u64::MAX), Some(rev(3)));
}

fn abandon_removes_only_the_target(factory: &RevisionStoreFactory) {
    let store = factory();
    store.create(draft(1, 1_000)).expect("创建修订失败");
    store.create(draft(2, 2_000)).expect("创建修订失败");
    assert!(store.abandon(rev(2)).expect("撤销失败"));
    assert!(!store.abandon(rev(2)).expect("撤销失败"), "重复撤销返回 false");
    assert_eq!(store.latest().expect("读取失败").map(|r| r.id()), Some(rev(1)));
    assert_eq!(store.get(rev(2)).expect("读取失败"), None);
}
