//! Command buffers: replayable graphs and single-use streams.
//!
//! State machine per buffer: `Recording -> Finalized -> Submitted ->
//! Completed`. Graph buffers are immutable after finalization and may be
//! resubmitted indefinitely (`Completed -> Submitted` on replay); stream
//! buffers are consumed by their single submission. Recording appends
//! fill/copy/dispatch commands; nothing executes until a queue picks the
//! buffer up (or an eligible stream buffer executes inline).

use std::sync::{Arc, Mutex};

use crate::config::CommandBufferMode;
use crate::error::{Error, Result};
use crate::loader::{EntryPoint, ExecutableLibrary};

/// A device-visible byte buffer commands operate on. Interior-locked so
/// submissions on different queues may touch disjoint regions; ordering
/// between queues is still the caller's job, via semaphores.
#[derive(Debug)]
pub struct DeviceBuffer {
    data: Mutex<Vec<u8>>,
}

impl DeviceBuffer {
    pub fn new(len: usize) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(vec![0u8; len]),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(bytes.to_vec()),
        })
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the buffer contents.
    pub fn read(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "write of {} bytes at {offset} exceeds buffer of {} bytes",
                    bytes.len(),
                    data.len()
                ))
            })?;
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

/// One recorded device operation.
#[derive(Clone)]
pub(crate) enum Command {
    Fill {
        target: Arc<DeviceBuffer>,
        offset: usize,
        len: usize,
        pattern: u8,
    },
    Copy {
        source: Arc<DeviceBuffer>,
        source_offset: usize,
        target: Arc<DeviceBuffer>,
        target_offset: usize,
        len: usize,
    },
    Dispatch {
        library: Arc<ExecutableLibrary>,
        entry: EntryPoint,
        constants: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Recording,
    Finalized,
    Submitted,
    Completed,
}

/// A recorded sequence of device operations.
pub struct CommandBuffer {
    mode: CommandBufferMode,
    /// Compiler-granted eligibility for inline execution. Changes
    /// failure-recovery semantics, so it is opt-in per buffer.
    inline_eligible: bool,
    state: Mutex<CommandBufferState>,
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new(mode: CommandBufferMode) -> Self {
        Self {
            mode,
            inline_eligible: false,
            state: Mutex::new(CommandBufferState::Recording),
            commands: Vec::new(),
        }
    }

    /// Marks this stream buffer as eligible for inline execution. Only
    /// honored when the device also allows it.
    pub fn new_inline(mode: CommandBufferMode) -> Self {
        Self {
            inline_eligible: true,
            ..Self::new(mode)
        }
    }

    pub fn mode(&self) -> CommandBufferMode {
        self.mode
    }

    pub fn inline_eligible(&self) -> bool {
        self.inline_eligible
    }

    pub fn state(&self) -> CommandBufferState {
        *self.state.lock().unwrap()
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    fn check_recording(&self) -> Result<()> {
        let state = *self.state.lock().unwrap();
        if state != CommandBufferState::Recording {
            return Err(Error::InvalidArgument(format!(
                "command buffer is {state:?}, not Recording"
            )));
        }
        Ok(())
    }

    /// Records a fill of `len` bytes at `offset` with a byte pattern.
    pub fn fill_buffer(
        &mut self,
        target: &Arc<DeviceBuffer>,
        offset: usize,
        len: usize,
        pattern: u8,
    ) -> Result<()> {
        self.check_recording()?;
        offset
            .checked_add(len)
            .filter(|&end| end <= target.len())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "fill range {offset}+{len} exceeds buffer of {} bytes",
                    target.len()
                ))
            })?;
        self.commands.push(Command::Fill {
            target: Arc::clone(target),
            offset,
            len,
            pattern,
        });
        Ok(())
    }

    /// Records a copy between (possibly identical) buffers.
    pub fn copy_buffer(
        &mut self,
        source: &Arc<DeviceBuffer>,
        source_offset: usize,
        target: &Arc<DeviceBuffer>,
        target_offset: usize,
        len: usize,
    ) -> Result<()> {
        self.check_recording()?;
        for (name, buf, offset) in [
            ("source", source, source_offset),
            ("target", target, target_offset),
        ] {
            offset
                .checked_add(len)
                .filter(|&end| end <= buf.len())
                .ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "copy {name} range {offset}+{len} exceeds buffer of {} bytes",
                        buf.len()
                    ))
                })?;
        }
        self.commands.push(Command::Copy {
            source: Arc::clone(source),
            source_offset,
            target: Arc::clone(target),
            target_offset,
            len,
        });
        Ok(())
    }

    /// Records an entry-point dispatch with a push-constant blob. The
    /// library must be tagged by the compiler as supporting this buffer's
    /// recording mode.
    pub fn dispatch(
        &mut self,
        library: &Arc<ExecutableLibrary>,
        entry: EntryPoint,
        constants: &[u8],
    ) -> Result<()> {
        self.check_recording()?;
        if !library.supports_mode(self.mode) {
            return Err(Error::InvalidArgument(format!(
                "executable does not support {:?} command buffers",
                self.mode
            )));
        }
        self.commands.push(Command::Dispatch {
            library: Arc::clone(library),
            entry,
            constants: constants.to_vec(),
        });
        Ok(())
    }

    /// Ends recording. After this no command can be appended; graph buffers
    /// become replayable, stream buffers become submittable once.
    pub fn finalize(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state != CommandBufferState::Recording {
            return Err(Error::InvalidArgument(format!(
                "command buffer is {state:?}, not Recording"
            )));
        }
        *state = CommandBufferState::Finalized;
        Ok(())
    }

    /// Discards a not-yet-submitted buffer. Submitted work cannot be
    /// cancelled; this only drops recording-stage state.
    pub fn discard(self) -> Result<()> {
        match self.state() {
            CommandBufferState::Recording | CommandBufferState::Finalized => Ok(()),
            state => Err(Error::InvalidArgument(format!(
                "cannot discard a {state:?} command buffer"
            ))),
        }
    }

    /// `Finalized|Completed -> Submitted`. Graph buffers replay from
    /// `Completed`; anything else is a state error.
    pub(crate) fn mark_submitted(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let replayable =
            self.mode == CommandBufferMode::Graph && *state == CommandBufferState::Completed;
        if *state != CommandBufferState::Finalized && !replayable {
            return Err(Error::InvalidArgument(format!(
                "cannot submit a {:?} command buffer",
                *state
            )));
        }
        *state = CommandBufferState::Submitted;
        Ok(())
    }

    pub(crate) fn mark_completed(&self) {
        *self.state.lock().unwrap() = CommandBufferState::Completed;
    }

    /// Executes the recorded commands in order. `arena` stages dispatch
    /// argument blobs so the foreign code never aliases recording state.
    pub(crate) fn execute(&self, arena: &mut Vec<u8>) -> Result<()> {
        for command in &self.commands {
            match command {
                Command::Fill {
                    target,
                    offset,
                    len,
                    pattern,
                } => {
                    let mut data = target.data.lock().unwrap();
                    let end = offset.checked_add(*len).filter(|&e| e <= data.len()).ok_or_else(
                        || {
                            Error::InvalidArgument(format!(
                                "fill range {offset}+{len} exceeds buffer of {} bytes",
                                data.len()
                            ))
                        },
                    )?;
                    data[*offset..end].fill(*pattern);
                }
                Command::Copy {
                    source,
                    source_offset,
                    target,
                    target_offset,
                    len,
                } => {
                    // Snapshot the source region first: source and target
                    // may be the same buffer, and lock order must not
                    // depend on submission contents.
                    let staged = {
                        let data = source.data.lock().unwrap();
                        let end = source_offset
                            .checked_add(*len)
                            .filter(|&e| e <= data.len())
                            .ok_or_else(|| {
                                Error::InvalidArgument(format!(
                                    "copy source range {source_offset}+{len} out of bounds"
                                ))
                            })?;
                        data[*source_offset..end].to_vec()
                    };
                    target.write(*target_offset, &staged)?;
                }
                Command::Dispatch {
                    library,
                    entry,
                    constants,
                } => {
                    arena.clear();
                    arena.extend_from_slice(constants);
                    // SAFETY: the entry point belongs to `library`, which
                    // is kept alive by the recorded Arc; the dispatch ABI
                    // is the loader's documented contract. A crash inside
                    // the callee is fatal to the process by design.
                    unsafe { library.invoke_checked(*entry, arena)? };
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("commands", &self.commands.len())
            .finish()
    }
}
