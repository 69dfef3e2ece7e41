//! 共享物理连接的生命周期管理器
//! Lifecycle manager for a shared physical connection
//!
//! 一个物理连接被借给多个逻辑借用者。管理器负责借用计数、关闭资格判定、
//! 仅一次的释放以及向监听器的通知。
//!
//! A single physical connection is lent out to several logical borrowers.
//! The manager counts borrowers, tracks close eligibility, releases the
//! physical connection exactly once and informs listeners about it.

mod logical;
mod state;


pub use logical::LogicalConnection;
pub use state::LifecycleSnapshot;

use crate::{
    config::Config,
    error::{Error, Operation, Result},
    listener::{ConnectionEventListener, ConnectionSource, ListenerNotifier},
    participant::{LocalParticipant, ResourceDescriptor, TransactionParticipant},
    physical::{DriverError, PhysicalConnection, invoke},
};
use state::{LifecycleState, Retirement};
use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, ThreadId},
};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Result of a release attempt.
///
/// 释放尝试的结果。
#[must_use]
#[derive(Debug)]
pub enum ReleaseOutcome {
    /// This call closed the physical connection.
    /// 本次调用关闭了物理连接。
    Closed,
    /// This call released the connection but the driver's close failed.
    /// The connection is considered gone regardless.
    ///
    /// 本次调用释放了连接，但驱动关闭失败。无论如何连接都被视为已释放。
    CloseFailed(Error),
    /// This call released the connection from inside
    /// `with_physical_connection`. The close runs once that closure returns.
    ///
    /// 本次调用在 `with_physical_connection` 内部释放了连接，关闭将在闭包返回后执行。
    Deferred,
    /// The connection had already been released by an earlier call.
    /// 连接已被之前的调用释放。
    AlreadyReleased,
}

impl ReleaseOutcome {
    /// True if this call performed the release, successfully or not.
    pub fn performed_release(&self) -> bool {
        !matches!(self, ReleaseOutcome::AlreadyReleased)
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            ReleaseOutcome::CloseFailed(e) => Some(e),
            _ => None,
        }
    }
}

pub(crate) struct Shared<C: PhysicalConnection> {
    lifecycle: Mutex<LifecycleState>,
    /// Taken out on release, so it cannot be touched afterwards. Never locked
    /// while `lifecycle` is held.
    physical: Mutex<Option<C>>,
    /// Thread currently running a closure against `physical`.
    physical_holder: Mutex<Option<ThreadId>>,
    /// Set when a release is requested from inside that closure.
    close_deferred: AtomicBool,
    listeners: ListenerNotifier,
    resource_id: Mutex<Option<String>>,
    descriptor: OnceLock<Arc<ResourceDescriptor>>,
    watch_tx: watch::Sender<LifecycleSnapshot>,
    config: Config,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the current thread as the holder of the physical connection until
/// dropped, unwinding included.
struct HolderGuard<'a> {
    holder: &'a Mutex<Option<ThreadId>>,
}

impl<'a> HolderGuard<'a> {
    fn enter(holder: &'a Mutex<Option<ThreadId>>) -> Self {
        *lock(holder) = Some(thread::current().id());
        Self { holder }
    }
}

impl Drop for HolderGuard<'_> {
    fn drop(&mut self) {
        *lock(self.holder) = None;
    }
}

impl<C: PhysicalConnection> Shared<C> {
    fn lifecycle(&self) -> MutexGuard<'_, LifecycleState> {
        lock(&self.lifecycle)
    }

    fn load_resource_id(&self) -> Option<String> {
        lock(&self.resource_id).clone()
    }

    fn load_snapshot(&self) -> LifecycleSnapshot {
        self.lifecycle().snapshot()
    }

    /// Publishes the current state to watchers. Sent under the lifecycle lock
    /// so watchers never observe snapshots out of order.
    fn publish_current(&self) {
        let lifecycle = self.lifecycle();
        self.watch_tx.send_replace(lifecycle.snapshot());
    }

    fn held_by_current_thread(&self) -> bool {
        *lock(&self.physical_holder) == Some(thread::current().id())
    }

    /// Runs `f` against the physical connection with only the connection's
    /// own lock held, so `f` may query the lifecycle or retire handles.
    ///
    /// 仅持有物理连接自身的锁来执行 `f`，因此 `f` 可以查询生命周期或归还句柄。
    fn access<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R> {
        if self.held_by_current_thread() {
            return Err(Error::ConnectionBusy);
        }
        let mut slot = lock(&self.physical);
        if self.lifecycle().snapshot().released {
            return Err(Error::ResourceClosed);
        }
        let physical = slot.as_mut().ok_or(Error::ResourceClosed)?;
        let result = {
            let _holder = HolderGuard::enter(&self.physical_holder);
            f(physical)
        };

        if self.close_deferred.swap(false, Ordering::AcqRel) {
            let physical = slot.take();
            drop(slot);
            let _ = self.close_released(physical);
        }
        Ok(result)
    }

    fn release(&self) -> ReleaseOutcome {
        if !self.lifecycle().mark_released() {
            return ReleaseOutcome::AlreadyReleased;
        }
        if self.held_by_current_thread() {
            self.close_deferred.store(true, Ordering::Release);
            debug!(
                resource_id = ?self.load_resource_id(),
                "Release requested during physical access; close deferred until it returns"
            );
            return ReleaseOutcome::Deferred;
        }
        // Waits for any other thread still inside `access`.
        let physical = lock(&self.physical).take();
        self.close_released(physical)
    }

    /// Closes a connection already marked released, then informs listeners.
    /// Called with no lock held: listeners may call back into the manager.
    fn close_released(&self, physical: Option<C>) -> ReleaseOutcome {
        let Some(mut physical) = physical else {
            return ReleaseOutcome::AlreadyReleased;
        };
        let result = invoke(&mut physical, Operation::Close, |c| c.close());
        drop(physical);

        let outcome = match result {
            Ok(()) => {
                info!(resource_id = ?self.load_resource_id(), "Physical connection released");
                self.listeners.notify_closed(self);
                ReleaseOutcome::Closed
            }
            Err(err) => {
                debug!(
                    resource_id = ?self.load_resource_id(),
                    error = %err,
                    "Error occurred while closing physical connection"
                );
                self.listeners.notify_error(self, &err);
                ReleaseOutcome::CloseFailed(err)
            }
        };

        self.publish_current();
        outcome
    }
}

impl<C: PhysicalConnection> ConnectionSource for Shared<C> {
    fn resource_id(&self) -> Option<String> {
        self.load_resource_id()
    }

    fn snapshot(&self) -> LifecycleSnapshot {
        self.load_snapshot()
    }
}

impl<C: PhysicalConnection> Drop for Shared<C> {
    fn drop(&mut self) {
        // Also covers a deferred close whose closure unwound.
        let physical = self
            .physical
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if physical.is_some() {
            warn!(
                resource_id = ?self.load_resource_id(),
                "Connection dropped without being released; closing physical connection"
            );
            self.lifecycle
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .mark_released();
            let _ = self.close_released(physical);
        }
    }
}

/// Manages one physical connection shared by several logical borrowers.
///
/// Cloning is cheap and every clone refers to the same connection. The
/// borrower count, close-eligibility and released flags are updated together
/// under one lock, so the manager can be shared across threads.
///
/// 管理一个由多个逻辑借用者共享的物理连接。克隆开销很小，所有克隆都指向同一个连接。
/// 借用计数、关闭资格和释放标志在同一把锁下一起更新，因此管理器可以跨线程共享。
pub struct LocalXaConnection<C: PhysicalConnection> {
    shared: Arc<Shared<C>>,
}

impl<C: PhysicalConnection> Clone for LocalXaConnection<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: PhysicalConnection> fmt::Debug for LocalXaConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalXaConnection")
            .field("resource_id", &self.resource_id())
            .field("lifecycle", &self.snapshot())
            .field("listeners", &self.shared.listeners)
            .field("config", &self.shared.config)
            .finish()
    }
}

impl<C: PhysicalConnection> LocalXaConnection<C> {
    /// Takes ownership of an already-open physical connection.
    pub fn new(physical: C) -> Self {
        Self::with_config(physical, Config::default())
    }

    pub fn with_config(physical: C, config: Config) -> Self {
        let (watch_tx, _) = watch::channel(LifecycleSnapshot::default());
        let shared = Shared {
            lifecycle: Mutex::new(LifecycleState::new()),
            physical: Mutex::new(Some(physical)),
            physical_holder: Mutex::new(None),
            close_deferred: AtomicBool::new(false),
            listeners: ListenerNotifier::new(),
            resource_id: Mutex::new(config.resource_id.clone()),
            descriptor: OnceLock::new(),
            watch_tx,
            config,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<Shared<C>>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Lends out a new logical handle over the physical connection.
    ///
    /// Clears close eligibility. Fails with `Error::ResourceClosed` once the
    /// connection has been released.
    pub fn issue_logical_handle(&self) -> Result<LogicalConnection<C>> {
        let borrowers = {
            let mut lifecycle = self.shared.lifecycle();
            let borrowers = lifecycle.issue()?;
            self.shared.watch_tx.send_replace(lifecycle.snapshot());
            borrowers
        };
        trace!(resource_id = ?self.resource_id(), borrowers, "Logical handle issued");
        Ok(LogicalConnection::new(self.clone()))
    }

    /// Records that one logical handle is done with the connection.
    ///
    /// `LogicalConnection` calls this itself on `close` or drop; call it
    /// directly only when tracking borrowers by hand.
    pub fn retire_logical_handle(&self) -> Result<()> {
        let policy = self.shared.config.lifecycle.retirement_policy;
        let (retirement, borrowers) = {
            let mut lifecycle = self.shared.lifecycle();
            let retirement = lifecycle.retire(policy);
            if retirement.is_ok() {
                self.shared.watch_tx.send_replace(lifecycle.snapshot());
            }
            (retirement, lifecycle.snapshot().borrowers)
        };

        match retirement {
            Ok(Retirement::Decremented) => {
                trace!(resource_id = ?self.resource_id(), borrowers, "Logical handle retired");
            }
            Ok(Retirement::LastBorrower) => {
                debug!(
                    resource_id = ?self.resource_id(),
                    "Last logical handle retired; physical connection eligible for close"
                );
            }
            Ok(Retirement::Overdrawn(borrowers)) => {
                warn!(
                    resource_id = ?self.resource_id(),
                    borrowers,
                    ?policy,
                    "Logical handle retired more times than issued"
                );
            }
            Err(e) => {
                warn!(
                    resource_id = ?self.resource_id(),
                    borrowers,
                    "Rejected retirement of logical handle: none outstanding"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Closes the physical connection if no earlier call has.
    ///
    /// A close failure is reported to listeners as an error event rather than
    /// returned as `Err`. The connection counts as released either way.
    pub fn release(&self) -> ReleaseOutcome {
        self.shared.release()
    }

    /// Public close entry point.
    ///
    /// Closing while borrowers may still be outstanding is a protocol
    /// violation. It is logged but never blocks the close, so cleanup paths
    /// can force it.
    pub fn request_close(&self) -> ReleaseOutcome {
        let snapshot = self.snapshot();
        if !snapshot.close_eligible && self.shared.config.lifecycle.warn_on_premature_close {
            warn!(
                resource_id = ?self.resource_id(),
                borrowers = snapshot.borrowers,
                "Illegal state: close requested while logical handles may still be open"
            );
        }
        self.release()
    }

    /// Like `request_close`, for cleanup paths that must not fail.
    pub fn request_close_quietly(&self) {
        if let ReleaseOutcome::CloseFailed(err) = self.request_close() {
            warn!(
                resource_id = ?self.resource_id(),
                error = %err,
                "Error occurred while closing physical connection"
            );
        }
    }

    /// Commits the local transaction on the physical connection.
    pub fn commit_local(&self) -> Result<()> {
        self.drive(Operation::Commit, |c| c.commit())
    }

    /// Rolls back the local transaction on the physical connection.
    pub fn rollback_local(&self) -> Result<()> {
        self.drive(Operation::Rollback, |c| c.rollback())
    }

    fn drive<F>(&self, operation: Operation, f: F) -> Result<()>
    where
        F: FnOnce(&mut C) -> std::result::Result<(), DriverError>,
    {
        let result = self
            .shared
            .access(|physical| invoke(physical, operation, f))
            .and_then(|result| result);

        if let Err(e) = &result {
            debug!(resource_id = ?self.resource_id(), %operation, error = %e, "Local transaction operation failed");
        }
        result
    }

    /// Runs `f` with exclusive access to the physical connection.
    ///
    /// Only the connection itself is locked while `f` runs. Inside `f`, state
    /// queries, issuing handles and retiring handles (including dropping a
    /// `LogicalConnection`) work as usual. Calls that need the physical
    /// connection again (`commit_local`, `rollback_local`, a nested
    /// `with_physical_connection`) fail with `Error::ConnectionBusy`. A
    /// release requested inside `f` returns `ReleaseOutcome::Deferred`; the
    /// close happens when `f` returns.
    ///
    /// 以独占方式访问物理连接执行 `f`。`f` 运行期间只锁定连接本身：
    /// 状态查询、发放和归还句柄照常工作；再次需要物理连接的调用返回
    /// `Error::ConnectionBusy`；在 `f` 内请求的释放会推迟到 `f` 返回后关闭。
    pub fn with_physical_connection<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R> {
        self.shared.access(f)
    }

    /// The descriptor handed to a transaction coordinator.
    ///
    /// Created on first call and returned unchanged afterwards, including
    /// after release; the coordinator keys its bookkeeping on it.
    pub fn participant_handle(&self) -> Arc<ResourceDescriptor> {
        let descriptor = self.shared.descriptor.get_or_init(|| {
            let identifier = self.resource_id();
            let participant: Arc<dyn TransactionParticipant> =
                Arc::new(LocalParticipant::new(Arc::downgrade(&self.shared)));
            debug!(resource_id = ?identifier, "Resource descriptor created");
            Arc::new(ResourceDescriptor::new(identifier, participant))
        });
        Arc::clone(descriptor)
    }

    pub fn resource_id(&self) -> Option<String> {
        self.shared.load_resource_id()
    }

    /// Sets the resource identifier. Has no effect on a descriptor that has
    /// already been created.
    pub fn set_resource_id(&self, resource_id: impl Into<String>) {
        let resource_id = resource_id.into();
        if self.shared.descriptor.get().is_some() {
            debug!(
                %resource_id,
                "Resource descriptor already created; its identifier is unchanged"
            );
        }
        *lock(&self.shared.resource_id) = Some(resource_id);
    }

    pub fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>) -> bool {
        self.shared.listeners.register(listener)
    }

    pub fn remove_connection_event_listener(
        &self,
        listener: &Arc<dyn ConnectionEventListener>,
    ) -> bool {
        self.shared.listeners.unregister(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        self.shared.load_snapshot()
    }

    pub fn borrower_count(&self) -> i64 {
        self.snapshot().borrowers
    }

    pub fn is_close_eligible(&self) -> bool {
        self.snapshot().close_eligible
    }

    pub fn is_released(&self) -> bool {
        self.snapshot().released
    }

    /// Watches lifecycle changes.
    ///
    /// 订阅生命周期变化。
    pub fn subscribe(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.shared.watch_tx.subscribe()
    }

    /// Resolves once the physical connection has been released.
    pub async fn wait_released(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|snapshot| snapshot.released).await;
    }
}

impl<C: PhysicalConnection> ConnectionSource for LocalXaConnection<C> {
    fn resource_id(&self) -> Option<String> {
        self.shared.load_resource_id()
    }

    fn snapshot(&self) -> LifecycleSnapshot {
        self.shared.load_snapshot()
    }
}
