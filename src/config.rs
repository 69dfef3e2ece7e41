//! 定义了共享连接生命周期的可配置参数。
//! Defines configurable parameters for the shared connection lifecycle.

/// A structure containing all configurable parameters for a managed connection.
///
/// 包含受管连接所有可配置参数的结构体。
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Lifecycle bookkeeping parameters.
    /// 生命周期记账相关参数。
    pub lifecycle: LifecycleConfig,

    /// Identifier bound into the resource descriptor, if already known at
    /// construction time. It can still be changed with `set_resource_id`
    /// until the participant handle is first requested.
    ///
    /// 资源描述符绑定的标识符（如果在构造时已知）。
    /// 在首次请求参与者句柄之前仍可通过 `set_resource_id` 修改。
    pub resource_id: Option<String>,
}

/// How the manager reacts when a logical handle is retired while no borrower
/// is outstanding.
///
/// 当没有未归还借用者时又归还逻辑句柄，管理器如何处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetirementPolicy {
    /// Decrement anyway. The count may go negative.
    /// 照常递减，计数可能变为负数。
    #[default]
    Unguarded,
    /// Keep the count at zero.
    /// 计数保持为零。
    Clamp,
    /// Refuse the retirement with `Error::OverRetired`.
    /// 以 `Error::OverRetired` 拒绝本次归还。
    Reject,
}

/// Lifecycle bookkeeping parameters.
///
/// 生命周期记账相关参数。
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Behavior on over-retirement.
    /// 过度归还时的行为。
    pub retirement_policy: RetirementPolicy,
    /// Log a protocol warning when a close is requested while borrowers may
    /// still be outstanding. The close proceeds either way.
    ///
    /// 当仍可能存在借用者时请求关闭，记录协议警告。无论如何关闭都会继续。
    pub warn_on_premature_close: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retirement_policy: RetirementPolicy::Unguarded,
            warn_on_premature_close: true,
        }
    }
}
