//! mlc-exec: execution core for ahead-of-time compiled ML programs.
//!
//! Three tightly coupled layers, all consuming what an external compiler
//! produces:
//!
//! - **Loader** ([`loader`]): relocates and finalizes compiler-produced
//!   binary images inside the host process with no OS dynamic linker, and
//!   exposes their entry points behind an explicit unsafe boundary.
//! - **Micro-kernel engine** ([`ukernel`]): tiled matmul-accumulate and
//!   pack/pad/unpack primitives built as shared generic outer loops around
//!   architecture-specific inner tile routines.
//! - **Device model** ([`device`]): queues, graph/stream command buffers,
//!   and timeline semaphores for cross-queue ordering.
//!
//! Already-constructed objects are safe to use concurrently; construction
//! (loading an image, spawning a device) is the caller's to serialize.
//! Logging goes through the `log` facade; no subscriber is installed here.

pub mod config;
pub mod device;
pub mod error;
pub mod image;
pub mod loader;
pub mod ukernel;

pub use config::{CollectiveId, CommandBufferMode, DeviceParams};
pub use device::{
    Channel, CommandBuffer, CommandBufferState, Device, DeviceBuffer, Queue, Semaphore,
};
pub use error::{Error, Result};
pub use image::{Architecture, Image};
pub use loader::{
    load, EntryPoint, ExecutableLibrary, ExternalSymbols, LoadOptions, LoadedExecutable,
};
pub use ukernel::{
    mmt4d, pack, unpack, Mmt4dKind, Mmt4dParams, PackKind, PackParams, TileRegistry, UnpackParams,
};
