//! 连接事件监听与通知模块
//! Connection event listening and notification
//!
//! 维护已注册的观察者集合，并以尽力而为、相互隔离的方式向其广播
//! 关闭/错误事件。单个监听器失败不会影响其他监听器，也不会中断触发通知的释放操作。
//!
//! Maintains the set of registered observers and fans out closed/error events
//! to them on a best-effort basis. One failing listener never prevents the
//! others from being notified, and never aborts the release that triggered
//! the notification.

use crate::{
    connection::LifecycleSnapshot,
    error::{Error, panic_message},
};
use dashmap::{DashMap, mapref::entry::Entry};
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, trace};

/// Error type a listener may return from a callback.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of listener callbacks.
pub type ListenerResult = std::result::Result<(), ListenerError>;

/// The object an event originates from.
///
/// 事件的来源对象。
pub trait ConnectionSource: Send + Sync {
    /// Identifier of the resource, if one has been assigned.
    fn resource_id(&self) -> Option<String>;

    /// Current lifecycle state of the source.
    fn snapshot(&self) -> LifecycleSnapshot;
}

/// 连接事件类型
/// Connection event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// The physical connection was closed normally.
    /// 物理连接正常关闭。
    Closed,
    /// Closing the physical connection failed.
    /// 关闭物理连接失败。
    ErrorOccurred,
}

/// An event delivered to listeners.
pub struct ConnectionEvent<'a> {
    kind: ConnectionEventKind,
    source: &'a dyn ConnectionSource,
    error: Option<&'a Error>,
}

impl<'a> ConnectionEvent<'a> {
    pub fn closed(source: &'a dyn ConnectionSource) -> Self {
        Self {
            kind: ConnectionEventKind::Closed,
            source,
            error: None,
        }
    }

    pub fn error_occurred(source: &'a dyn ConnectionSource, error: &'a Error) -> Self {
        Self {
            kind: ConnectionEventKind::ErrorOccurred,
            source,
            error: Some(error),
        }
    }

    pub fn kind(&self) -> ConnectionEventKind {
        self.kind
    }

    /// The manager that emitted the event.
    pub fn source(&self) -> &'a dyn ConnectionSource {
        self.source
    }

    /// The close failure, for `ErrorOccurred` events.
    pub fn error(&self) -> Option<&'a Error> {
        self.error
    }
}

impl fmt::Debug for ConnectionEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEvent")
            .field("kind", &self.kind)
            .field("resource_id", &self.source.resource_id())
            .field("error", &self.error)
            .finish()
    }
}

/// An observer of connection closure and failure.
///
/// Both callbacks default to doing nothing, so implementors only override
/// the events they care about. Returning `Err` (or panicking) is logged and
/// otherwise ignored.
///
/// 连接关闭和失败的观察者。两个回调默认不做任何事，实现者只需覆盖关心的事件。
/// 返回 `Err`（或panic）只会被记录，不会影响其他监听器。
pub trait ConnectionEventListener: Send + Sync {
    fn connection_closed(&self, _event: &ConnectionEvent<'_>) -> ListenerResult {
        Ok(())
    }

    fn connection_error_occurred(&self, _event: &ConnectionEvent<'_>) -> ListenerResult {
        Ok(())
    }
}

/// Adapts a closure into a listener that receives both event kinds.
pub struct FnListener<F>(F);

impl<F> ConnectionEventListener for FnListener<F>
where
    F: Fn(&ConnectionEvent<'_>) -> ListenerResult + Send + Sync,
{
    fn connection_closed(&self, event: &ConnectionEvent<'_>) -> ListenerResult {
        (self.0)(event)
    }

    fn connection_error_occurred(&self, event: &ConnectionEvent<'_>) -> ListenerResult {
        (self.0)(event)
    }
}

/// Wraps a closure as a shareable listener.
pub fn listener_fn<F>(f: F) -> Arc<dyn ConnectionEventListener>
where
    F: Fn(&ConnectionEvent<'_>) -> ListenerResult + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotifyReport {
    /// Listeners whose callback returned `Ok`.
    pub delivered: usize,
    /// Listeners whose callback returned `Err` or panicked.
    pub failed: usize,
}

/// Registered listeners keyed by pointer identity.
///
/// 以指针身份为键的已注册监听器集合。
#[derive(Default)]
pub struct ListenerNotifier {
    listeners: DashMap<usize, Arc<dyn ConnectionEventListener>>,
}

impl fmt::Debug for ListenerNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerNotifier")
            .field("listeners_count", &self.listeners.len())
            .finish()
    }
}

fn identity(listener: &Arc<dyn ConnectionEventListener>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

impl ListenerNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener. Returns false if the same listener is already
    /// registered.
    pub fn register(&self, listener: Arc<dyn ConnectionEventListener>) -> bool {
        match self.listeners.entry(identity(&listener)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(listener);
                true
            }
        }
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unregister(&self, listener: &Arc<dyn ConnectionEventListener>) -> bool {
        self.listeners.remove(&identity(listener)).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&self) {
        self.listeners.clear();
    }

    pub fn notify_closed(&self, source: &dyn ConnectionSource) -> NotifyReport {
        self.fan_out(&ConnectionEvent::closed(source))
    }

    pub fn notify_error(&self, source: &dyn ConnectionSource, error: &Error) -> NotifyReport {
        self.fan_out(&ConnectionEvent::error_occurred(source, error))
    }

    fn fan_out(&self, event: &ConnectionEvent<'_>) -> NotifyReport {
        // Snapshot first: listeners may register or unregister from inside a
        // callback, which would deadlock against a live shard guard.
        let snapshot: Vec<Arc<dyn ConnectionEventListener>> = self
            .listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut report = NotifyReport::default();
        for listener in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event.kind() {
                ConnectionEventKind::Closed => listener.connection_closed(event),
                ConnectionEventKind::ErrorOccurred => listener.connection_error_occurred(event),
            }));

            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    debug!(kind = ?event.kind(), error = %e, "Connection event listener failed");
                    report.failed += 1;
                }
                Err(payload) => {
                    debug!(
                        kind = ?event.kind(),
                        panic = %panic_message(payload.as_ref()),
                        "Connection event listener panicked"
                    );
                    report.failed += 1;
                }
            }
        }

        trace!(
            kind = ?event.kind(),
            delivered = report.delivered,
            failed = report.failed,
            "Connection event dispatched"
        );
        report
    }
}
