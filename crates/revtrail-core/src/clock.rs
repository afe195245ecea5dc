//! 修订时钟：在并发工作单元之间线性化分配修订号。
//!
//! # 设计动机（Why）
//! - 修订号是引擎唯一的竞争资源：两个工作单元绝不能拿到同一个修订号，空洞则可以接受；
//! - 同一工作单元内多次询问“当前修订”必须得到同一个结果，且操作者只在首次分配时读取一次。
//!
//! # 逻辑解析（How）
//! - 计数器、最近时间戳与“工作单元 → 已分配修订”的绑定表都放在同一把互斥锁内，分配是一次临界区；
//! - 操作者解析在锁外执行，避免慢速的认证查询拖住其他工作单元；解析完成后重新加锁并复查绑定；
//! - 时间戳取 `max(墙钟, 上一次时间戳)`，保证修订时间戳单调不减，读取器可以对其二分查找。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

//
// 教案级说明：`loom` 模型检查需要接管互斥锁以枚举调度交错，
// 因此在 `cfg(loom)` 且启用 `loom-model` 时切换到 `loom::sync::Mutex`，常规构建保持 `std::sync::Mutex`。
#[cfg(all(loom, feature = "loom-model"))]
use loom::sync::{Mutex, MutexGuard};
#[cfg(not(all(loom, feature = "loom-model")))]
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::actor::Actor;
use crate::error::{AuditError, Result};
use crate::ids::{RevisionId, UnitOfWorkId};
use crate::record::RevisionDraft;

/// 墙钟抽象，返回自 Unix 纪元起的毫秒数。
pub trait WallClock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// 读取系统时间的墙钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// 手动推进的墙钟，测试用来构造确定的时间线。
#[derive(Debug, Default)]
pub struct ManualWallClock {
    now: AtomicU64,
}

impl ManualWallClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    /// 前进 `delta` 毫秒并返回新的时间。
    pub fn advance(&self, delta: u64) -> u64 {
        self.now.fetch_add(delta, Ordering::SeqCst).saturating_add(delta)
    }
}

impl WallClock for ManualWallClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<T: WallClock + ?Sized> WallClock for Arc<T> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

struct ClockState {
    /// `None` 表示修订号空间已耗尽。
    next: Option<u64>,
    last_timestamp: u64,
    bound: HashMap<UnitOfWorkId, RevisionDraft>,
}

/// 修订号分配器。
///
/// # 契约说明（What）
/// - [`current_revision`](Self::current_revision)：首次调用为工作单元分配新修订，后续调用幂等返回同一修订；
/// - [`release`](Self::release)：工作单元结束（提交或回滚）后解除绑定；
/// - 修订号耗尽时返回 [`AuditError::ClockExhausted`]，不重试。
pub struct RevisionClock {
    state: Mutex<ClockState>,
    wall: Arc<dyn WallClock>,
}

impl RevisionClock {
    /// 从修订号 1 开始分配。
    pub fn new(wall: Arc<dyn WallClock>) -> Self {
        Self::starting_at(RevisionId::new(1), wall)
    }

    pub fn starting_at(first: RevisionId, wall: Arc<dyn WallClock>) -> Self {
        Self {
            state: Mutex::new(ClockState {
                next: Some(first.get()),
                last_timestamp: 0,
                bound: HashMap::new(),
            }),
            wall,
        }
    }

    /// 返回工作单元的当前修订，必要时分配。
    ///
    /// `actor` 仅在需要分配时调用，且至多调用一次。
    pub fn current_revision<F>(&self, unit: UnitOfWorkId, actor: F) -> Result<RevisionDraft>
    where
        F: FnOnce() -> Actor,
    {
        if let Some(existing) = self.lock()?.bound.get(&unit) {
            return Ok(existing.clone());
        }

        let actor = actor();
        let mut state = self.lock()?;
        if let Some(existing) = state.bound.get(&unit) {
            return Ok(existing.clone());
        }

        let id = state.next.ok_or(AuditError::ClockExhausted {
            last: RevisionId::new(u64::MAX),
        })?;
        state.next = id.checked_add(1);
        let timestamp = self.wall.now_millis().max(state.last_timestamp);
        state.last_timestamp = timestamp;

        let draft = RevisionDraft {
            id: RevisionId::new(id),
            timestamp,
            actor,
        };
        state.bound.insert(unit, draft.clone());
        drop(state);

        debug!(revision = id, unit = %unit, timestamp, "allocated revision");
        Ok(draft)
    }

    /// 工作单元已绑定的修订（若有）。
    pub fn bound(&self, unit: UnitOfWorkId) -> Result<Option<RevisionDraft>> {
        Ok(self.lock()?.bound.get(&unit).cloned())
    }

    /// 解除工作单元的绑定，返回其曾持有的修订。
    pub fn release(&self, unit: UnitOfWorkId) -> Result<Option<RevisionDraft>> {
        Ok(self.lock()?.bound.remove(&unit))
    }

    /// 下一个将被分配的修订号；耗尽时为 `None`。
    pub fn peek_next(&self) -> Result<Option<RevisionId>> {
        Ok(self.lock()?.next.map(RevisionId::new))
    }

    /// 让时钟越过已存在的修订，用于在已有审计数据的存储上重建引擎。
    pub fn resume_after(&self, last: RevisionId, last_timestamp: u64) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(next) = state.next {
            if next <= last.get() {
                state.next = last.get().checked_add(1);
            }
        }
        state.last_timestamp = state.last_timestamp.max(last_timestamp);
        Ok(())
    }

    /// 当前仍持有修订的工作单元数量。
    pub fn open_units(&self) -> Result<usize> {
        Ok(self.lock()?.bound.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ClockState>> {
        self.state.lock().map_err(|_| AuditError::LockPoisoned {
            resource: "revision clock",
        })
    }
}

impl fmt::Debug for RevisionClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevisionClock").finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn manual(at: u64) -> (Arc<ManualWallClock>, RevisionClock) {
        let wall = Arc::new(ManualWallClock::new(at));
        let clock = RevisionClock::new(wall.clone());
        (wall, clock)
    }

    #[test]
    fn repeated_calls_within_a_unit_are_idempotent_and_resolve_actor_once() {
        let (_, clock) = manual(1_000);
        let calls = AtomicUsize::new(0);
        let resolve = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Actor::identified("ana")
        };
        let first = clock
            .current_revision(UnitOfWorkId::new(1), resolve)
            .expect("allocate");
        let second = clock
            .current_revision(UnitOfWorkId::new(1), || Actor::identified("someone-else"))
            .expect("reuse");
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.actor.column_value(), Some("ana"));
    }

    #[test]
    fn distinct_units_receive_increasing_ids() {
        let (_, clock) = manual(1_000);
        let a = clock
            .current_revision(UnitOfWorkId::new(1), Actor::default)
            .expect("a");
        let b = clock
            .current_revision(UnitOfWorkId::new(2), Actor::default)
            .expect("b");
        assert_eq!(a.id, RevisionId::new(1));
        assert_eq!(b.id, RevisionId::new(2));
    }

    #[test]
    fn timestamps_never_move_backwards() {
        let (wall, clock) = manual(5_000);
        let first = clock
            .current_revision(UnitOfWorkId::new(1), Actor::default)
            .expect("first");
        wall.set(4_000);
        let second = clock
            .current_revision(UnitOfWorkId::new(2), Actor::default)
            .expect("second");
        assert_eq!(first.timestamp, 5_000);
        assert_eq!(second.timestamp, 5_000);
    }

    #[test]
    fn exhaustion_is_reported_after_the_last_id() {
        let clock = RevisionClock::starting_at(
            RevisionId::new(u64::MAX),
            Arc::new(ManualWallClock::new(0)),
        );
        let last = clock
            .current_revision(UnitOfWorkId::new(1), Actor::default)
            .expect("last id is still usable");
        assert_eq!(last.id.get(), u64::MAX);
        let err = clock
            .current_revision(UnitOfWorkId::new(2), Actor::default)
            .expect_err("space exhausted");
        assert!(matches!(err, AuditError::ClockExhausted { .. }));
        assert_eq!(clock.peek_next().expect("peek"), None);
    }

    #[test]
    fn release_unbinds_and_resume_skips_existing_ids() {
        let (_, clock) = manual(10);
        clock
            .current_revision(UnitOfWorkId::new(9), Actor::default)
            .expect("allocate");
        assert_eq!(clock.open_units().expect("count"), 1);
        assert!(clock.release(UnitOfWorkId::new(9)).expect("release").is_some());
        assert_eq!(clock.open_units().expect("count"), 0);

        clock.resume_after(RevisionId::new(41), 99).expect("resume");
        let next = clock
            .current_revision(UnitOfWorkId::new(10), Actor::default)
            .expect("allocate");
        assert_eq!(next.id, RevisionId::new(42));
        assert_eq!(next.timestamp, 99);
    }
}
