//! Pipelined USB bulk loopback testing.
//!
//! A [`LoopbackSession`] streams a buffer through a bulk OUT endpoint and
//! expects it back, unmodified, on a bulk IN endpoint. One transfer is kept
//! in flight per direction; each completion is copied into a per-direction
//! reassembly buffer and the same descriptor is re-submitted for the next
//! chunk. When the IN side has received every chunk the two buffers are
//! compared.
//!
//! The device is reached through the [`Transport`] trait. [`UsbfsTransport`]
//! talks to real hardware on Linux, and [`sim::SimTransport`] is an
//! in-process loopback with fault injection.
//!
//! ```
//! use bulkloop::{report::Report, sim::SimTransport, LoopbackConfig, LoopbackSession, Pattern};
//!
//! let config = LoopbackConfig {
//!     chunk_size: 64,
//!     total_bytes: 192,
//!     ..Default::default()
//! };
//! let mut session =
//!     LoopbackSession::with_pattern(config, Pattern::Incrementing, Report::default()).unwrap();
//! let summary = session.run(&mut SimTransport::loopback());
//! assert!(summary.verdict.unwrap().is_match());
//! ```

mod error;
pub use error::{ConfigError, Error, ErrorKind, TransferError};

mod endpoint;
pub use endpoint::{Direction, Endpoint, EndpointBitSet};

mod transfer;
pub use transfer::{Transfer, Transport};

mod config;
pub use config::{LoopbackConfig, ParsePatternError, Pattern, MAX_CHUNK_SIZE};

mod scheduler;
pub use scheduler::ChunkScheduler;

mod reassembly;
pub use reassembly::ReassemblyBuffer;

mod pipeline;
pub use pipeline::{Failure, FailureCause, Pipeline, PipelineState};

mod session;
pub use session::{LoopbackSession, TerminationGate};

pub mod report;
pub mod sim;
pub mod verify;

mod platform;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use platform::{find_device, list_devices, DeviceLocation, SysfsError, SysfsPath, UsbfsTransport};
