//! Device queues: ordered submission scopes with semaphore chaining.
//!
//! Each queue owns one worker thread draining a channel. Submissions to one
//! queue execute in submission order; nothing may be assumed about ordering
//! *across* queues except through the semaphore wait/signal pairs attached
//! to each submission. A failed wait or execution poisons the submission's
//! signal semaphores so downstream queues unblock with the failure instead
//! of deadlocking.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};

use crate::config::CommandBufferMode;
use crate::device::command_buffer::CommandBuffer;
use crate::device::semaphore::Semaphore;
use crate::error::{Error, Result};

/// A (semaphore, value) pair attached to a submission.
pub type SemaphoreValue = (Arc<Semaphore>, u64);

enum SubmittedBuffer {
    /// Finalized graph buffer, shared and replayable.
    Graph(Arc<CommandBuffer>),
    /// Single-use stream buffer, consumed by the submission.
    Stream(Box<CommandBuffer>),
}

impl SubmittedBuffer {
    fn buffer(&self) -> &CommandBuffer {
        match self {
            Self::Graph(cb) => cb,
            Self::Stream(cb) => cb,
        }
    }
}

struct WorkItem {
    waits: Vec<SemaphoreValue>,
    buffer: SubmittedBuffer,
    signals: Vec<SemaphoreValue>,
}

enum QueueMessage {
    Submit(WorkItem),
    Shutdown,
}

/// One ordered execution scope of a device.
pub struct Queue {
    index: usize,
    sender: Sender<QueueMessage>,
    worker: Option<JoinHandle<()>>,
    allow_inline: bool,
    tracing: bool,
}

fn run_item(item: WorkItem, arena: &mut Vec<u8>, queue_index: usize, tracing: bool) {
    if tracing {
        log::trace!(
            "queue {queue_index}: begin submission ({} waits, {} commands, {} signals)",
            item.waits.len(),
            item.buffer.buffer().command_count(),
            item.signals.len()
        );
    }
    for (sem, value) in &item.waits {
        if let Err(e) = sem.wait(*value) {
            log::warn!("queue {queue_index}: wait failed: {e}");
            fail_signals(&item.signals, &e);
            item.buffer.buffer().mark_completed();
            return;
        }
    }
    let result = item.buffer.buffer().execute(arena);
    item.buffer.buffer().mark_completed();
    match result {
        Ok(()) => {
            for (sem, value) in &item.signals {
                if let Err(e) = sem.signal(*value) {
                    log::warn!("queue {queue_index}: signal {value} failed: {e}");
                }
            }
            if tracing {
                log::trace!("queue {queue_index}: submission complete");
            }
        }
        Err(e) => {
            log::warn!("queue {queue_index}: execution failed: {e}");
            fail_signals(&item.signals, &e);
        }
    }
}

fn fail_signals(signals: &[SemaphoreValue], error: &Error) {
    for (sem, _) in signals {
        sem.fail(error.to_string());
    }
}

impl Queue {
    pub(crate) fn spawn(
        index: usize,
        arena_block_size: usize,
        allow_inline: bool,
        tracing: bool,
    ) -> Result<Self> {
        let (sender, receiver) = unbounded::<QueueMessage>();
        let worker = std::thread::Builder::new()
            .name(format!("mlc-exec-queue-{index}"))
            .spawn(move || {
                let mut arena = Vec::with_capacity(arena_block_size);
                while let Ok(message) = receiver.recv() {
                    match message {
                        QueueMessage::Submit(item) => run_item(item, &mut arena, index, tracing),
                        QueueMessage::Shutdown => break,
                    }
                }
            })
            .map_err(|e| Error::ResourceExhausted(format!("queue worker spawn failed: {e}")))?;
        Ok(Self {
            index,
            sender,
            worker: Some(worker),
            allow_inline,
            tracing,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Submits a finalized (or completed, for replay) graph buffer.
    pub fn submit_graph(
        &self,
        waits: Vec<SemaphoreValue>,
        buffer: Arc<CommandBuffer>,
        signals: Vec<SemaphoreValue>,
    ) -> Result<()> {
        if buffer.mode() != CommandBufferMode::Graph {
            return Err(Error::InvalidArgument(
                "submit_graph requires a graph command buffer".into(),
            ));
        }
        buffer.mark_submitted()?;
        self.enqueue(WorkItem {
            waits,
            buffer: SubmittedBuffer::Graph(buffer),
            signals,
        })
    }

    /// Submits a finalized stream buffer, consuming it. If the buffer is
    /// inline-eligible and the device allows inline execution, the work runs
    /// on the calling thread and its result is returned directly.
    pub fn submit_stream(
        &self,
        waits: Vec<SemaphoreValue>,
        buffer: CommandBuffer,
        signals: Vec<SemaphoreValue>,
    ) -> Result<()> {
        if buffer.mode() != CommandBufferMode::Stream {
            return Err(Error::InvalidArgument(
                "submit_stream requires a stream command buffer".into(),
            ));
        }
        buffer.mark_submitted()?;
        if self.allow_inline && buffer.inline_eligible() {
            // Inline execution: same waits and signals, caller's thread,
            // synchronous failure reporting.
            for (sem, value) in &waits {
                sem.wait(*value)?;
            }
            let mut arena = Vec::new();
            let result = buffer.execute(&mut arena);
            buffer.mark_completed();
            match result {
                Ok(()) => {
                    for (sem, value) in &signals {
                        sem.signal(*value)?;
                    }
                    if self.tracing {
                        log::trace!("queue {}: inline submission complete", self.index);
                    }
                    Ok(())
                }
                Err(e) => {
                    fail_signals(&signals, &e);
                    Err(e)
                }
            }
        } else {
            self.enqueue(WorkItem {
                waits,
                buffer: SubmittedBuffer::Stream(Box::new(buffer)),
                signals,
            })
        }
    }

    fn enqueue(&self, item: WorkItem) -> Result<()> {
        self.sender
            .send(QueueMessage::Submit(item))
            .map_err(|_| Error::Fatal(format!("queue {} worker is gone", self.index)))
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        let _ = self.sender.send(QueueMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("index", &self.index).finish()
    }
}
