//! Traits for abstracting over the physical database connection.
//!
//! 物理数据库连接的抽象。

use crate::error::{Error, Operation, Result};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// A native error reported by a database driver.
///
/// 数据库驱动报告的原生错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    sql_state: Option<String>,
    vendor_code: i32,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
            vendor_code: 0,
        }
    }

    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    pub fn with_vendor_code(mut self, vendor_code: i32) -> Self {
        self.vendor_code = vendor_code;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }

    pub fn vendor_code(&self) -> i32 {
        self.vendor_code
    }
}

/// An already-open connection to a data store.
///
/// The manager never opens or validates the connection; it only drives the
/// three operations below and closes the connection exactly once.
///
/// 已打开的数据存储连接。
///
/// 管理器从不打开或验证该连接，只调用以下三个操作，并且仅关闭一次。
pub trait PhysicalConnection: Send + 'static {
    /// Commits the local transaction.
    fn commit(&mut self) -> std::result::Result<(), DriverError>;

    /// Rolls back the local transaction.
    fn rollback(&mut self) -> std::result::Result<(), DriverError>;

    /// Closes the connection.
    fn close(&mut self) -> std::result::Result<(), DriverError>;
}

impl<C: PhysicalConnection + ?Sized> PhysicalConnection for Box<C> {
    fn commit(&mut self) -> std::result::Result<(), DriverError> {
        (**self).commit()
    }

    fn rollback(&mut self) -> std::result::Result<(), DriverError> {
        (**self).rollback()
    }

    fn close(&mut self) -> std::result::Result<(), DriverError> {
        (**self).close()
    }
}

/// Runs one driver operation, normalizing its failure.
///
/// Native errors pass through as `Error::Driver`; a panic inside the driver
/// is caught and becomes `Error::Wrapped`.
///
/// 执行一次驱动操作并规范化其失败：原生错误原样作为 `Error::Driver` 传递，
/// 驱动内部的panic被捕获并转换为 `Error::Wrapped`。
pub(crate) fn invoke<C, F>(conn: &mut C, operation: Operation, f: F) -> Result<()>
where
    C: PhysicalConnection + ?Sized,
    F: FnOnce(&mut C) -> std::result::Result<(), DriverError>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| f(conn))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(native)) => Err(Error::Driver(native)),
        Err(payload) => Err(Error::from_panic(operation, payload)),
    }
}
