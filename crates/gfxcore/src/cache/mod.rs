//! Shared-resource caches.
//!
//! - `ref_counted` keeps objects alive while users hold references and
//!   destroys them on the last release.
//! - `device` keeps one derived value per live device and tears it down when
//!   that device is destroyed.

mod device;
mod ref_counted;

pub use device::{DeviceCache, DeviceCacheEntry};
pub use ref_counted::{Destroy, RefCountedCache, RefGuard};
