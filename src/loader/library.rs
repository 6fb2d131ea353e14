//! Entry-point lookup and the unsafe foreign-code invocation boundary.
//!
//! This module is the only place where control crosses into loaded,
//! architecture-native code. There is no exception-safety guarantee from the
//! callee: a crash inside an invocation takes the process down. Callers that
//! need crash containment must isolate invocation behind a process or
//! sandbox boundary; nothing in-language recovers from it.

use crate::config::CommandBufferMode;
use crate::error::{Error, Result};
use crate::loader::LoadedExecutable;

/// Signature of an exported dispatch function.
///
/// ```text
/// fn(args: *const u8, args_len: usize) -> i32 status
/// ```
///
/// A zero return is success; any other value is a callee-reported failure.
pub type DispatchFn = unsafe extern "C" fn(*const u8, usize) -> i32;

/// A resolved entry point: an address inside a loaded executable segment.
///
/// Valid only while the owning [`ExecutableLibrary`] is alive; keep the
/// library (or an `Arc` of it) around for as long as entry points circulate.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint {
    ptr: *const u8,
    ordinal: usize,
}

// SAFETY: the pointer targets immutable executable pages owned by the
// library; sharing the address between threads is sound (invocation safety
// is the caller's contract, see `invoke`).
unsafe impl Send for EntryPoint {}
unsafe impl Sync for EntryPoint {}

impl EntryPoint {
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

/// Owns one loaded executable and exposes its dispatch functions.
///
/// Concurrent invocation of different (or the same) entry points from
/// multiple threads is permitted: code pages are immutable after load.
#[derive(Debug)]
pub struct ExecutableLibrary {
    exe: LoadedExecutable,
}

impl ExecutableLibrary {
    pub fn new(exe: LoadedExecutable) -> Self {
        Self { exe }
    }

    pub fn entry_count(&self) -> usize {
        self.exe.entry_count()
    }

    pub fn supports_mode(&self, mode: CommandBufferMode) -> bool {
        self.exe.supports_mode(mode)
    }

    /// Looks up an entry point by exported name.
    pub fn lookup(&self, name: &str) -> Result<EntryPoint> {
        self.exe
            .entry_points()
            .iter()
            .position(|(n, _)| n == name)
            .map(|ordinal| EntryPoint {
                ptr: self.exe.entry_points()[ordinal].1 as *const u8,
                ordinal,
            })
            .ok_or_else(|| Error::NotFound(format!("entry point '{name}'")))
    }

    /// Looks up an entry point by table ordinal.
    pub fn lookup_ordinal(&self, ordinal: usize) -> Result<EntryPoint> {
        self.exe
            .entry_points()
            .get(ordinal)
            .map(|&(_, addr)| EntryPoint {
                ptr: addr as *const u8,
                ordinal,
            })
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "entry point ordinal {ordinal} of {}",
                    self.exe.entry_count()
                ))
            })
    }

    /// Invokes an entry point with an argument buffer, returning the raw
    /// callee status.
    ///
    /// # Safety
    ///
    /// `entry` must have been produced by this library, and the loaded code
    /// must uphold the [`DispatchFn`] ABI. The callee runs with full process
    /// authority; a crash inside it is fatal to the process and cannot be
    /// caught here.
    pub unsafe fn invoke(&self, entry: EntryPoint, args: &[u8]) -> i32 {
        let f: DispatchFn = std::mem::transmute(entry.ptr);
        f(args.as_ptr(), args.len())
    }

    /// [`Self::invoke`] with the status mapped onto the error taxonomy:
    /// nonzero statuses become [`Error::Fatal`] so a failed dispatch poisons
    /// its submission.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::invoke`].
    pub unsafe fn invoke_checked(&self, entry: EntryPoint, args: &[u8]) -> Result<()> {
        let status = self.invoke(entry, args);
        if status == 0 {
            Ok(())
        } else {
            Err(Error::Fatal(format!(
                "dispatch ordinal {} returned status {status}",
                entry.ordinal
            )))
        }
    }
}
