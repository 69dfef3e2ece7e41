//! 在共享物理连接上发放的逻辑句柄
//! Logical handles lent out over the shared physical connection.

use super::LocalXaConnection;
use crate::{error::Result, physical::PhysicalConnection};
use std::fmt;
use tracing::debug;

/// A borrower's handle on the shared physical connection.
///
/// Retires itself exactly once: explicitly through `close`, or on drop.
/// Retiring is what makes the physical connection eligible for close once
/// the last borrower is done.
///
/// 借用者持有的共享物理连接句柄。仅归还一次：通过 `close` 显式归还，或在被丢弃时归还。
pub struct LogicalConnection<C: PhysicalConnection> {
    owner: LocalXaConnection<C>,
    retired: bool,
}

impl<C: PhysicalConnection> LogicalConnection<C> {
    pub(crate) fn new(owner: LocalXaConnection<C>) -> Self {
        Self {
            owner,
            retired: false,
        }
    }

    /// The manager this handle was issued by.
    /// 发放此句柄的管理器。
    pub fn owner(&self) -> &LocalXaConnection<C> {
        &self.owner
    }

    /// Runs `f` against the physical connection.
    ///
    /// Same contract as `LocalXaConnection::with_physical_connection`: `f`
    /// may query the owner or close other handles, and physical access from
    /// inside `f` fails with `Error::ConnectionBusy`.
    ///
    /// 对物理连接执行 `f`，约定与 `LocalXaConnection::with_physical_connection` 相同。
    pub fn with_physical<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R> {
        self.owner.with_physical_connection(f)
    }

    /// Ends this borrower's session with the connection.
    /// 结束此借用者对连接的使用。
    pub fn close(mut self) -> Result<()> {
        self.retired = true;
        self.owner.retire_logical_handle()
    }
}

impl<C: PhysicalConnection> fmt::Debug for LogicalConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalConnection")
            .field("resource_id", &self.owner.resource_id())
            .field("retired", &self.retired)
            .finish()
    }
}

impl<C: PhysicalConnection> Drop for LogicalConnection<C> {
    fn drop(&mut self) {
        if self.retired {
            return;
        }
        self.retired = true;
        if let Err(e) = self.owner.retire_logical_handle() {
            debug!(error = %e, "Failed to retire logical handle on drop");
        }
    }
}
