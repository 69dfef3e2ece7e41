#![deny(clippy::expect_used, clippy::unwrap_used)]

//! Lifecycle management for a physical database connection shared by several
//! logical borrowers, exposed to a transaction coordinator as a participant.
//! 由多个逻辑借用者共享的物理数据库连接的生命周期管理，并以参与者的形式暴露给事务协调器。

pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod participant;
pub mod physical;

#[cfg(test)]
pub mod test_utils;

pub use config::{Config, LifecycleConfig, RetirementPolicy};
pub use connection::{LifecycleSnapshot, LocalXaConnection, LogicalConnection, ReleaseOutcome};
pub use error::{Error, Operation, Result};
pub use listener::{
    ConnectionEvent, ConnectionEventKind, ConnectionEventListener, ConnectionSource,
    ListenerNotifier, NotifyReport, listener_fn,
};
pub use participant::{LocalParticipant, ResourceDescriptor, TransactionParticipant};
pub use physical::{DriverError, PhysicalConnection};
