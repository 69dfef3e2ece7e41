//! tests/common/harness.rs
use local_xa_connection::{
    ConnectionEvent, ConnectionEventListener, DriverError, LocalXaConnection, PhysicalConnection,
    listener::ListenerResult,
};
use std::sync::{
    Arc, Mutex, Once,
    atomic::{AtomicUsize, Ordering},
};
use tracing_subscriber::fmt::format::FmtSpan;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "local_xa_connection=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::FULL)
            .with_test_writer()
            .init();
    });
}

/// Counters shared between a `ScriptedConnection` and the test.
#[derive(Default)]
pub struct Calls {
    pub commit: AtomicUsize,
    pub rollback: AtomicUsize,
    pub close: AtomicUsize,
    commit_error: Mutex<Option<DriverError>>,
    close_error: Mutex<Option<DriverError>>,
}

impl Calls {
    pub fn closes(&self) -> usize {
        self.close.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commit.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollback.load(Ordering::SeqCst)
    }

    pub fn fail_commit_with(&self, err: DriverError) {
        *self.commit_error.lock().unwrap() = Some(err);
    }

    pub fn fail_close_with(&self, err: DriverError) {
        *self.close_error.lock().unwrap() = Some(err);
    }
}

/// A stand-in for a driver connection.
pub struct ScriptedConnection {
    calls: Arc<Calls>,
}

impl PhysicalConnection for ScriptedConnection {
    fn commit(&mut self) -> Result<(), DriverError> {
        self.calls.commit.fetch_add(1, Ordering::SeqCst);
        match self.calls.commit_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.calls.rollback.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.calls.close.fetch_add(1, Ordering::SeqCst);
        match self.calls.close_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A test harness wrapping a managed connection and its call counters.
pub struct TestHarness {
    pub manager: LocalXaConnection<ScriptedConnection>,
    pub calls: Arc<Calls>,
}

impl TestHarness {
    pub fn new() -> Self {
        init_tracing();
        let calls = Arc::new(Calls::default());
        let manager = LocalXaConnection::new(ScriptedConnection {
            calls: calls.clone(),
        });
        Self { manager, calls }
    }
}

/// Counts received events by kind.
#[derive(Default)]
pub struct CountingListener {
    pub closed: AtomicUsize,
    pub errors: AtomicUsize,
}

impl CountingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

impl ConnectionEventListener for CountingListener {
    fn connection_closed(&self, _event: &ConnectionEvent<'_>) -> ListenerResult {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn connection_error_occurred(&self, _event: &ConnectionEvent<'_>) -> ListenerResult {
        self.errors.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
