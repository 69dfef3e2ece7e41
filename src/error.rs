//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use crate::physical::DriverError;
use std::{any::Any, fmt};
use thiserror::Error;

/// The physical connection operation that produced an error.
/// 产生错误的物理连接操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Commit,
    Rollback,
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Commit => "commit",
            Operation::Rollback => "rollback",
            Operation::Close => "close",
        };
        f.write_str(name)
    }
}

/// The primary error type for the shared connection lifecycle.
/// 共享连接生命周期的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// The physical connection has already been released.
    /// 物理连接已经被释放。
    #[error("connection has already been closed")]
    ResourceClosed,

    /// A native error reported by the driver, surfaced unchanged.
    /// 驱动报告的原生错误，原样向上传递。
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// The driver failed in a way it does not report natively (it panicked).
    /// The failure is wrapped so callers see a uniform error kind.
    ///
    /// 驱动以非原生方式失败（发生panic）。该失败被包装，使调用方看到统一的错误类型。
    #[error("unexpected failure during {operation}: {message}")]
    Wrapped { operation: Operation, message: String },

    /// The physical connection is already in use further up this thread's
    /// call stack, inside a `with_physical_connection` closure.
    ///
    /// 物理连接正被本线程调用栈上层的 `with_physical_connection` 闭包使用。
    #[error("physical connection is already in use by this thread")]
    ConnectionBusy,

    /// A logical handle was retired more times than handles were issued.
    /// Only produced under `RetirementPolicy::Reject`.
    ///
    /// 逻辑句柄的归还次数超过了发放次数。仅在 `RetirementPolicy::Reject` 下产生。
    #[error("logical handle retired with {borrowers} outstanding borrowers")]
    OverRetired { borrowers: i64 },
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds a `Wrapped` error from a caught panic payload.
    pub(crate) fn from_panic(operation: Operation, payload: Box<dyn Any + Send>) -> Self {
        Error::Wrapped {
            operation,
            message: panic_message(payload.as_ref()),
        }
    }

    /// Returns the driver error if this is a native driver failure.
    pub fn as_driver_error(&self) -> Option<&DriverError> {
        match self {
            Error::Driver(e) => Some(e),
            _ => None,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
