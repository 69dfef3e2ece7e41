//! 借用计数与关闭资格状态机
//! Borrower counting and close-eligibility state machine
//!
//! 该模块只包含纯状态逻辑，不持有物理连接，也不做任何通知。
//! 管理器在同一把锁下对这三个字段进行整体读改写。
//!
//! This module holds only the pure state logic: no physical connection and no
//! notification. The manager reads and modifies the three fields as one unit
//! under a single lock.

use crate::{
    config::RetirementPolicy,
    error::{Error, Result},
};

/// A point-in-time copy of the lifecycle triple.
///
/// 生命周期三元组的时间点快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifecycleSnapshot {
    /// Outstanding logical handles.
    pub borrowers: i64,
    /// True only when the last retirement brought the count to zero.
    pub close_eligible: bool,
    /// True once the physical connection has been released.
    pub released: bool,
}

/// Result of retiring a logical handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retirement {
    /// The count was decremented and borrowers remain.
    Decremented,
    /// The count reached exactly zero; the connection is now close-eligible.
    LastBorrower,
    /// More retirements than issues. Carries the count after the policy was
    /// applied.
    Overdrawn(i64),
}

/// The lifecycle triple.
#[derive(Debug, Default)]
pub(crate) struct LifecycleState {
    borrowers: i64,
    close_eligible: bool,
    released: bool,
}

impl LifecycleState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a newly issued logical handle.
    pub(crate) fn issue(&mut self) -> Result<i64> {
        if self.released {
            return Err(Error::ResourceClosed);
        }
        self.borrowers += 1;
        self.close_eligible = false;
        Ok(self.borrowers)
    }

    /// Records a retired logical handle under the given policy.
    pub(crate) fn retire(&mut self, policy: RetirementPolicy) -> Result<Retirement> {
        if self.borrowers <= 0 {
            match policy {
                RetirementPolicy::Reject => {
                    return Err(Error::OverRetired {
                        borrowers: self.borrowers,
                    });
                }
                RetirementPolicy::Clamp => {
                    self.borrowers = 0;
                    return Ok(Retirement::Overdrawn(0));
                }
                RetirementPolicy::Unguarded => {
                    self.borrowers -= 1;
                    return Ok(Retirement::Overdrawn(self.borrowers));
                }
            }
        }

        self.borrowers -= 1;
        if self.borrowers == 0 {
            self.close_eligible = true;
            Ok(Retirement::LastBorrower)
        } else {
            Ok(Retirement::Decremented)
        }
    }

    /// Flips `released` to true. Returns false if it already was.
    pub(crate) fn mark_released(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        true
    }

    #[cfg(test)]
    pub(crate) fn is_released(&self) -> bool {
        self.released
    }

    #[cfg(test)]
    pub(crate) fn is_close_eligible(&self) -> bool {
        self.close_eligible
    }

    pub(crate) fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            borrowers: self.borrowers,
            close_eligible: self.close_eligible,
            released: self.released,
        }
    }
}
