//! revtrail 存储契约测试套件（TCK）入口。
//!
//! # 教案式综述（Why / How / What）
//! - **为什么存在**：引擎只通过 [`SnapshotStore`] 与 [`RevisionStore`] 两个 trait 访问持久层，
//!   第三方后端（关系库、KV、对象存储）必须遵守同一组排序、去重与墓碑约束，审计历史才不会分叉。
//! - **如何集成**：在后端仓库的 `tests` 目录下调用 [`run_snapshot_store_suite`] 与
//!   [`run_revision_store_suite`]，传入“每次返回一个全新空存储”的工厂闭包即可。
//! - **测试对象**：只使用 trait 暴露的公开方法，不依赖任何内存实现细节。
//!
//! # 契约说明（What）
//! - 工厂每次调用都必须返回彼此隔离的空存储，用例之间不共享状态；
//! - 任一用例失败都会以 `[revtrail-tck::{套件}::{用例}]` 前缀重新 panic。

mod revision_store;
mod snapshot_store;
mod support;

use std::sync::Arc;

use revtrail_core::{RevisionStore, SnapshotStore};

use case::run_suite;
pub use case::{TckCase, TckSuite};

/// 快照存储工厂：每次调用返回一个新的空存储。
pub type SnapshotStoreFactory = dyn Fn() -> Arc<dyn SnapshotStore>;

/// 修订存储工厂：每次调用返回一个新的空存储。
pub type RevisionStoreFactory = dyn Fn() -> Arc<dyn RevisionStore>;

mod case {
    use super::support;
    use std::panic;

    /// 单个 TCK 用例：名称与接收被测对象的断言函数。
    ///
    /// `test` 必须在失败时 `panic`，名称用于错误提示。
    pub struct TckCase<S: ?Sized + 'static> {
        pub name: &'static str,
        pub test: fn(&S),
    }

    /// 同一主题的一组用例。
    pub struct TckSuite<S: ?Sized + 'static> {
        pub name: &'static str,
        pub cases: &'static [TckCase<S>],
    }

    impl<S: ?Sized + 'static> TckSuite<S> {
        /// 用例名称列表，按执行顺序。
        pub fn case_names(&self) -> impl Iterator<Item = &'static str> + '_ {
            self.cases.iter().map(|case| case.name)
        }
    }

    /// 在捕获 panic 的前提下依次执行套件内全部用例。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：一旦用例失败即附加“套件/用例”上下文后重新 panic，便于定位是哪条存储约束被破坏。
    /// - **逻辑 (How)**：借助 [`panic::catch_unwind`] 捕获 panic，将 payload 交给 `support::panic_with_context`。
    /// - **契约 (What)**：`suite.cases` 不得为空；全部成功时正常返回。
    pub fn run_suite<S: ?Sized + 'static>(suite: &TckSuite<S>, subject: &S) {
        assert!(!suite.cases.is_empty(), "TCK 套件不应为空");
        for case in suite.cases {
            let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| (case.test)(subject)));
            if let Err(payload) = outcome {
                support::panic_with_context(suite.name, case.name, payload);
            }
        }
    }
}

/// 快照存储套件的元信息，便于外部脚本列出用例。
pub fn snapshot_store_suite() -> &'static TckSuite<SnapshotStoreFactory> {
    snapshot_store::suite()
}

/// 修订存储套件的元信息。
pub fn revision_store_suite() -> &'static TckSuite<RevisionStoreFactory> {
    revision_store::suite()
}

/// 对快照存储实现运行全部用例：排序、去重、墓碑关闭与批量追加的原子性。
pub fn run_snapshot_store_suite<F, S>(factory: F)
where
    F: Fn() -> S + 'static,
    S: SnapshotStore + 'static,
{
    let factory: &SnapshotStoreFactory = &move || Arc::new(factory()) as Arc<dyn SnapshotStore>;
    run_suite(snapshot_store::suite(), factory);
}

/// 对修订存储实现运行全部用例：按修订号有序、时间戳单调与撤销语义。
pub fn run_revision_store_suite<F, S>(factory: F)
where
    F: Fn() -> S + 'static,
    S: RevisionStore + 'static,
{
    let factory: &RevisionStoreFactory = &move || Arc::new(factory()) as Arc<dyn RevisionStore>;
    run_suite(revision_store::suite(), factory);
}
