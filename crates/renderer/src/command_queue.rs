//! Cross-thread command queue.
//!
//! Any thread may push commands onto a window's queue; only the window's
//! render thread drains it. Commands run outside the queue lock, so a
//! command is free to enqueue follow-up work. That work is picked up by
//! the next drain, never the one in progress.

use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::error::QueueError;

/// A deferred action, run on the thread that owns the queue.
pub type Command = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct State {
    commands: VecDeque<Command>,
    interrupted: bool,
}

/// A FIFO of deferred commands with many producers and one consumer.
#[derive(Default)]
pub struct CommandQueue {
    state: Mutex<State>,
    ready: Condvar,
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command and wakes the consumer if it is waiting. Never runs
    /// the command.
    pub fn enqueue(&self, command: impl FnOnce() + Send + 'static) {
        self.state.lock().commands.push_back(Box::new(command));
        self.ready.notify_one();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().commands.is_empty()
    }

    /// Runs every command that was queued when the call started, in the
    /// order they were enqueued.
    ///
    /// ## Returns
    ///
    /// `Ok(true)` if at least one command ran, `Ok(false)` if the queue was
    /// empty.
    ///
    /// ## Errors
    ///
    /// If a command panics the drain stops. The commands that had not run
    /// yet are put back at the front of the queue, ahead of anything that
    /// was enqueued in the meantime, and will run on the next drain.
    pub fn drain(&self) -> Result<bool, QueueError> {
        let mut batch = std::mem::take(&mut self.state.lock().commands);

        if batch.is_empty() {
            return Ok(false);
        }

        while let Some(command) = batch.pop_front() {
            if panic::catch_unwind(AssertUnwindSafe(command)).is_err() {
                let deferred = batch.len();

                if deferred > 0 {
                    let mut state = self.state.lock();
                    batch.append(&mut state.commands);
                    state.commands = batch;
                }

                return Err(QueueError::CommandPanicked { deferred });
            }
        }

        Ok(true)
    }

    /// Blocks until a command is enqueued, [`interrupt`](Self::interrupt) is
    /// called, or `timeout` elapses. Returns immediately if commands are
    /// already waiting.
    ///
    /// ## Returns
    ///
    /// True if the queue holds commands when the wait ends.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();

        if state.commands.is_empty() && !state.interrupted {
            let _ = self.ready.wait_for(&mut state, timeout);
        }

        state.interrupted = false;
        !state.commands.is_empty()
    }

    /// Wakes the consumer without giving it work. Used to make a render
    /// thread notice a cleared running flag promptly.
    pub fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.ready.notify_all();
    }

    /// Discards every pending command, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = std::mem::take(&mut self.state.lock().commands);
        dropped.len()
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.len())
            .finish()
    }
}
