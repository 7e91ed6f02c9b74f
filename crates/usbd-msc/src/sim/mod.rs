//! Software stand-ins for the hardware around the driver: a loopback
//! device controller, a RAM disk and a host that speaks Bulk-Only
//! Transport. They run the driver end to end without a bus.

pub mod commands;
mod host;
mod loopback;
mod ramdisk;

use thiserror::Error;

use crate::control::ControlError;
use crate::storage::StorageError;

pub use host::{Host, Response};
pub use loopback::{LoopbackError, LoopbackTransport, Payload, Submission};
pub use ramdisk::RamDisk;

/// Storage whose operations finish later and can be collected.
pub trait Completions {
    fn take_completion(&mut self) -> Option<Result<(), StorageError>>;
}

impl<C: Completions + ?Sized> Completions for &mut C {
    fn take_completion(&mut self) -> Option<Result<(), StorageError>> {
        (**self).take_completion()
    }
}

impl<C: Completions + ?Sized> Completions for alloc::boxed::Box<C> {
    fn take_completion(&mut self) -> Option<Result<(), StorageError>> {
        (**self).take_completion()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    #[error("device has no command receive posted")]
    NotArmed,
    #[error("device stopped making progress")]
    Stuck,
    #[error("expected a command status wrapper, got {0} bytes")]
    BadStatus(usize),
    #[error("status tag {got:#x} does not answer command tag {expected:#x}")]
    TagMismatch { expected: u32, got: u32 },
    #[error("control request refused: {0}")]
    Control(#[from] ControlError),
}
