//! # imager-python
//!
//! Embedded Python runtime for the imager pipeline.
//!
//! This crate provides:
//! - An [`InterpreterHost`] that owns the process-wide guest runtime, starts it
//!   with an isolated configuration and finalizes it on drop
//! - A deterministic module [`SearchPath`] anchored at the executable directory
//! - [`GuestHandle`], a move-only owner of one guest reference count
//! - A marshalling facade: import, attribute lookup, calls, tuples and
//!   conversions between host primitives and guest objects
//!
//! ## Executable layout
//!
//! ```text
//! <exe_dir>/
//! <exe_dir>/Python/Lib/site-packages/
//! <exe_dir>/InstantMesh/
//! ```
//!
//! Modules under any of these, or under the stdlib locations baked in at build
//! time, are importable.
//!
//! ## Example
//!
//! ```no_run
//! use imager_python::{FailureKind, InterpreterHost};
//!
//! let host = InterpreterHost::new("/opt/app/bin")?;
//! let sys = host.check(host.import("sys"), FailureKind::Import)?;
//! if let Some(sys) = sys.object() {
//!     let version = host.get_attr(sys, "version");
//!     if let Some(text) = version.object().and_then(|v| host.cast::<String>(v)) {
//!         println!("guest {text}");
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod facade;
pub mod handle;
pub mod host;
pub mod search_path;

pub use config::HostConfig;
pub use error::{FailureKind, GuestError, HostError, HostResult};
pub use facade::{FromGuest, IntoGuest, WideString};
pub use handle::{GuestHandle, GuestObject};
pub use host::{HostState, InterpreterHost};
pub use search_path::{lexically_normal, SearchPath};
