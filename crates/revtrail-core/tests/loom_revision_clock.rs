#![cfg(all(loom, feature = "loom-model"))]

use loom::{model, sync::Arc, thread};
use revtrail_core::{Actor, ManualWallClock, RevisionClock, RevisionId, UnitOfWorkId};

fn clock() -> RevisionClock {
    RevisionClock::new(std::sync::Arc::new(ManualWallClock::new(1_000)))
}

#[test]
fn concurrent_units_never_share_a_revision() {
    //
    // 教案级说明：验证两个工作单元并发首次分配时拿到不同的修订号。
    // - **Why**：修订号是审计记录的主键组成部分，重复分配会让两个事务的变更混在同一修订下。
    // - **How**：两个线程分别以不同工作单元调用 `current_revision`，Loom 穷举加锁顺序。
    // - **What**：结果恰为 {1, 2}，且较大的修订号时间戳不早于较小者。
    model(|| {
        let clock = Arc::new(clock());

        let handles: Vec<_> = (1..=2_u64)
            .map(|unit| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || {
                    clock
                        .current_revision(UnitOfWorkId::new(unit), Actor::default)
                        .expect("分配修订不应失败")
                })
            })
            .collect();

        let mut drafts: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("分配线程不应 panic"))
            .collect();
        drafts.sort_by_key(|draft| draft.id);
        assert_eq!(drafts[0].id, RevisionId::new(1));
        assert_eq!(drafts[1].id, RevisionId::new(2));
        assert!(drafts[0].timestamp <= drafts[1].timestamp, "时间戳必须随修订号单调不减");
        assert_eq!(clock.open_units().expect("读取绑定表失败"), 2);
    });
}

#[test]
fn racing_calls_within_one_unit_agree() {
    //
    // 教案级说明：同一工作单元的两次询问在锁外解析操作者后会复查绑定。
    // - **Why**：若复查缺失，两次调用可能各自分配一个修订号，导致同一事务的记录分散到两个修订。
    // - **What**：两个线程得到相同的修订，计数器只前进一步。
    model(|| {
        let clock = Arc::new(clock());
        let unit = UnitOfWorkId::new(7);

        let other = {
            let clock = Arc::clone(&clock);
            thread::spawn(move || {
                clock
                    .current_revision(unit, || Actor::identified("racer"))
                    .expect("分配修订不应失败")
            })
        };
        let mine = clock
            .current_revision(unit, || Actor::identified("owner"))
            .expect("分配修订不应失败");
        let theirs = other.join().expect("竞争线程不应 panic");

        assert_eq!(mine, theirs);
        assert_eq!(clock.peek_next().expect("读取计数器失败"), Some(RevisionId::new(2)));
    });
}
