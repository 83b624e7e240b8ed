//! Hardware transports.
//!
//! Only Linux usbfs is implemented; elsewhere the loopback engine can still
//! run against [`SimTransport`][crate::sim::SimTransport] or a custom
//! [`Transport`][crate::Transport].

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux_usbfs;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux_usbfs::*;
