//! The coordinator-facing view of a managed connection.
//!
//! A transaction coordinator drives local commit/rollback through a
//! `TransactionParticipant` trait object without knowing the physical
//! connection's type. The prepare/commit protocol itself lives in the
//! coordinator.
//!
//! 受管连接面向协调器的视图。事务协调器通过 `TransactionParticipant` trait对象
//! 驱动本地提交/回滚，而无需知道物理连接的具体类型。

use crate::{
    connection::{LocalXaConnection, Shared},
    error::{Error, Result},
    physical::PhysicalConnection,
};
use std::{
    fmt,
    sync::{Arc, Weak},
};

/// A resource that a transaction coordinator can commit or roll back.
/// 事务协调器可以提交或回滚的资源。
pub trait TransactionParticipant: Send + Sync {
    /// Identifier of the underlying resource.
    /// 底层资源的标识符。
    fn resource_id(&self) -> Option<String>;

    /// Commits the local transaction on the underlying connection.
    /// 在底层连接上提交本地事务。
    fn commit_local(&self) -> Result<()>;

    /// Rolls back the local transaction on the underlying connection.
    /// 在底层连接上回滚本地事务。
    fn rollback_local(&self) -> Result<()>;
}

/// Participant over a `LocalXaConnection`.
///
/// Holds only a weak reference so the manager's memoized descriptor does not
/// keep the manager alive. Once the manager is gone every call fails with
/// `Error::ResourceClosed`.
///
/// 基于 `LocalXaConnection` 的参与者。只持有弱引用，因此管理器缓存的描述符
/// 不会让管理器一直存活；管理器销毁后所有调用都返回 `Error::ResourceClosed`。
pub struct LocalParticipant<C: PhysicalConnection> {
    connection: Weak<Shared<C>>,
}

impl<C: PhysicalConnection> LocalParticipant<C> {
    pub(crate) fn new(connection: Weak<Shared<C>>) -> Self {
        Self { connection }
    }

    fn connection(&self) -> Result<LocalXaConnection<C>> {
        LocalXaConnection::upgrade(&self.connection).ok_or(Error::ResourceClosed)
    }
}

impl<C: PhysicalConnection> fmt::Debug for LocalParticipant<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalParticipant")
            .field("attached", &(self.connection.strong_count() > 0))
            .finish()
    }
}

impl<C: PhysicalConnection> TransactionParticipant for LocalParticipant<C> {
    fn resource_id(&self) -> Option<String> {
        self.connection().ok().and_then(|c| c.resource_id())
    }

    fn commit_local(&self) -> Result<()> {
        self.connection()?.commit_local()
    }

    fn rollback_local(&self) -> Result<()> {
        self.connection()?.rollback_local()
    }
}

/// Binds a resource identifier to a participant.
///
/// Handed to the coordinator, which keys its bookkeeping on the identifier or
/// on the descriptor's identity, so a manager only ever creates one.
///
/// 将资源标识符绑定到参与者。协调器以标识符或描述符身份为键进行记账，
/// 因此每个管理器只会创建一个描述符。
pub struct ResourceDescriptor {
    identifier: Option<String>,
    delegate: Arc<dyn TransactionParticipant>,
}

impl ResourceDescriptor {
    pub fn new(identifier: Option<String>, delegate: Arc<dyn TransactionParticipant>) -> Self {
        Self {
            identifier,
            delegate,
        }
    }

    /// The identifier frozen at creation.
    /// 创建时固定下来的标识符。
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn delegate(&self) -> &Arc<dyn TransactionParticipant> {
        &self.delegate
    }
}

impl fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}
