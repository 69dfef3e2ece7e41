//! 测试辅助工具模块
//! Test utilities module

#![cfg(test)]

use crate::{
    connection::LifecycleSnapshot,
    listener::{ConnectionEvent, ConnectionEventListener, ConnectionSource, ListenerResult},
    physical::{DriverError, PhysicalConnection},
};
use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{
    Layer,
    layer::{Context, SubscriberExt},
};

// --- Mock Physical Connection ---

/// Scripted behavior and call counters shared between a mock connection and
/// the test that created it.
#[derive(Default)]
pub struct MockState {
    commit_calls: AtomicUsize,
    rollback_calls: AtomicUsize,
    close_calls: AtomicUsize,
    commit_failure: Mutex<Option<DriverError>>,
    rollback_failure: Mutex<Option<DriverError>>,
    close_failure: Mutex<Option<DriverError>>,
    commit_panic: Mutex<Option<String>>,
    rollback_panic: Mutex<Option<String>>,
    close_panic: Mutex<Option<String>>,
}

impl MockState {
    pub fn fail_commit_with(&self, err: DriverError) {
        *self.commit_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_rollback_with(&self, err: DriverError) {
        *self.rollback_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_close_with(&self, err: DriverError) {
        *self.close_failure.lock().unwrap() = Some(err);
    }

    pub fn panic_on_commit(&self, msg: &str) {
        *self.commit_panic.lock().unwrap() = Some(msg.to_string());
    }

    pub fn panic_on_rollback(&self, msg: &str) {
        *self.rollback_panic.lock().unwrap() = Some(msg.to_string());
    }

    pub fn panic_on_close(&self, msg: &str) {
        *self.close_panic.lock().unwrap() = Some(msg.to_string());
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub fn rollback_calls(&self) -> usize {
        self.rollback_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn run(
        counter: &AtomicUsize,
        panic_msg: &Mutex<Option<String>>,
        failure: &Mutex<Option<DriverError>>,
    ) -> Result<(), DriverError> {
        counter.fetch_add(1, Ordering::SeqCst);
        let panic_msg = panic_msg.lock().unwrap().clone();
        if let Some(msg) = panic_msg {
            panic!("{msg}");
        }
        let failure = failure.lock().unwrap().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A physical connection whose behavior is scripted through `MockState`.
pub struct MockPhysicalConnection {
    state: Arc<MockState>,
}

impl MockPhysicalConnection {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
        }
    }

    pub fn state(&self) -> Arc<MockState> {
        self.state.clone()
    }
}

impl PhysicalConnection for MockPhysicalConnection {
    fn commit(&mut self) -> Result<(), DriverError> {
        let s = &self.state;
        MockState::run(&s.commit_calls, &s.commit_panic, &s.commit_failure)
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        let s = &self.state;
        MockState::run(&s.rollback_calls, &s.rollback_panic, &s.rollback_failure)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        let s = &self.state;
        MockState::run(&s.close_calls, &s.close_panic, &s.close_failure)
    }
}

// --- Listeners and Sources ---

/// Counts the events it receives and remembers where they came from.
#[derive(Default)]
pub struct RecordingListener {
    closed: AtomicUsize,
    errors: AtomicUsize,
    sources: Mutex<Vec<Option<String>>>,
    last_error: Mutex<Option<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.closed_count() + self.error_count()
    }

    pub fn sources(&self) -> Vec<Option<String>> {
        self.sources.lock().unwrap().clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }
}

impl ConnectionEventListener for RecordingListener {
    fn connection_closed(&self, event: &ConnectionEvent<'_>) -> ListenerResult {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().push(event.source().resource_id());
        Ok(())
    }

    fn connection_error_occurred(&self, event: &ConnectionEvent<'_>) -> ListenerResult {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().push(event.source().resource_id());
        *self.last_error.lock().unwrap() = event.error().map(|e| e.to_string());
        Ok(())
    }
}

/// An event source not backed by any connection.
pub struct DetachedSource {
    id: Option<String>,
}

impl DetachedSource {
    pub fn named(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
        }
    }
}

impl ConnectionSource for DetachedSource {
    fn resource_id(&self) -> Option<String> {
        self.id.clone()
    }

    fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            borrowers: 0,
            close_eligible: true,
            released: true,
        }
    }
}

// --- Log Capture ---

/// Records the level and message of every event emitted while installed.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl LogCapture {
    /// Runs `f` with a capturing subscriber as this thread's default.
    pub fn run<R>(f: impl FnOnce() -> R) -> (R, Self) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, capture)
    }

    /// Number of WARN events whose message contains `needle`.
    pub fn warnings_containing(&self, needle: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, message)| *level == Level::WARN && message.contains(needle))
            .count()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.message));
    }
}
