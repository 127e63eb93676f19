// Stewart platform controller: GPIO ownership, sensing, actuation, kinematics
// and the zenoh pose runtime.

pub mod actuators;
pub mod config;
pub mod error;
pub mod geometry;
pub mod gpio;
#[cfg(feature = "rpi")]
pub mod hardware;
pub mod indicators;
pub mod kinematics;
pub mod messages;
pub mod platform;
pub mod runtime;
pub mod sensors;
pub mod sim;

pub use error::{PlatformError, Result};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
