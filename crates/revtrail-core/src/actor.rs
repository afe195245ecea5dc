//! 操作者模型与 [`AuditorResolver`] 注入点。
//!
//! # 设计动机（Why）
//! - 审计链需要明确“谁做的变更”，但引擎绝不直接读取宿主的全局会话；
//! - “当前是谁”被抽象为单方法能力，由宿主在构建引擎时注入，工作单元在分配修订时恰好读取一次。
//!
//! # 契约说明（What）
//! - [`Actor::Anonymous`] 是合法结果，引擎必须容忍并照常创建修订；
//! - 解析器需为 `Send + Sync`，会在并发工作单元间共享。

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 触发审计修订的操作者身份。
///
/// ## 契约说明（What）
/// - `id`：操作者稳定标识，通常为 IAM 用户或服务账号；
/// - `display_name`：面向展示的人类可读名称，可选；
/// - `tenant`：多租户系统中的租户标识，可选。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditActor {
    pub id: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<Cow<'static, str>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Cow<'static, str>>,
}

impl AuditActor {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            tenant: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<Cow<'static, str>>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }
}

/// 解析结果：具名身份或匿名。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    Identified(AuditActor),
    #[default]
    Anonymous,
}

impl Actor {
    pub fn identified(id: impl Into<Cow<'static, str>>) -> Self {
        Actor::Identified(AuditActor::new(id))
    }

    pub fn as_identity(&self) -> Option<&AuditActor> {
        match self {
            Actor::Identified(actor) => Some(actor),
            Actor::Anonymous => None,
        }
    }

    /// 写入 `actor` 列时使用的值；匿名时为 `None`。
    pub fn column_value(&self) -> Option<&str> {
        self.as_identity().map(|actor| actor.id.as_ref())
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Identified(actor) => f.write_str(&actor.id),
            Actor::Anonymous => f.write_str("<anonymous>"),
        }
    }
}

/// “当前操作者”能力。
///
/// # 教案式说明
/// - **意图 (Why)**：把宿主认证上下文与审计引擎解耦，测试可注入固定身份，批处理可注入系统身份；
/// - **契约 (What)**：实现必须无副作用且快速返回，引擎在首次分配修订时同步调用它；
/// - **权衡 (Trade-offs)**：只暴露同步接口，宿主若需异步查询身份，应在开启工作单元前解析好并使用
///   [`AuditEngine::begin_as`](crate::AuditEngine::begin_as)。
pub trait AuditorResolver: Send + Sync {
    fn current_actor(&self) -> Actor;
}

/// 始终返回匿名的解析器，未配置认证的部署使用它。
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousAuditor;

impl AuditorResolver for AnonymousAuditor {
    fn current_actor(&self) -> Actor {
        Actor::Anonymous
    }
}

/// 固定身份，适合测试。
#[derive(Clone, Debug)]
pub struct FixedAuditor {
    actor: AuditActor,
}

impl FixedAuditor {
    pub fn new(actor: AuditActor) -> Self {
        Self { actor }
    }
}

impl AuditorResolver for FixedAuditor {
    fn current_actor(&self) -> Actor {
        Actor::Identified(self.actor.clone())
    }
}

/// 批处理/后台任务的系统身份。
#[derive(Clone, Debug)]
pub struct SystemAuditor {
    actor: AuditActor,
}

impl SystemAuditor {
    pub const DEFAULT_ID: &'static str = "system";

    pub fn new(job: impl Into<Cow<'static, str>>) -> Self {
        Self {
            actor: AuditActor::new(Self::DEFAULT_ID).with_display_name(job),
        }
    }
}

impl Default for SystemAuditor {
    fn default() -> Self {
        Self {
            actor: AuditActor::new(Self::DEFAULT_ID),
        }
    }
}

impl AuditorResolver for SystemAuditor {
    fn current_actor(&self) -> Actor {
        Actor::Identified(self.actor.clone())
    }
}

/// 以闭包实现的解析器，宿主可把会话查找直接包成解析器。
pub struct FnAuditor<F> {
    resolve: F,
}

impl<F> FnAuditor<F>
where
    F: Fn() -> Actor + Send + Sync,
{
    pub fn new(resolve: F) -> Self {
        Self { resolve }
    }
}

impl<F> AuditorResolver for FnAuditor<F>
where
    F: Fn() -> Actor + Send + Sync,
{
    fn current_actor(&self) -> Actor {
        (self.resolve)()
    }
}

impl<F> fmt::Debug for FnAuditor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAuditor").finish_non_exhaustive()
    }
}
