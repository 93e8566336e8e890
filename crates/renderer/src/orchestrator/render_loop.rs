use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam::channel::Sender;
use log::{debug, error, trace, warn};

use crate::{
    atlas::AtlasManager,
    backend::Capabilities,
    error::BackendError,
    window::{WindowId, WindowShared},
};

/// Everything a render thread needs, moved onto the thread at spawn.
pub(crate) struct RenderThread {
    pub window: Arc<WindowShared>,
    pub running: Arc<AtomicBool>,
    pub atlases: Arc<AtlasManager>,
    pub frame_interval: Duration,
    pub idle_timeout: Duration,
    pub exits: Sender<WindowId>,
}

impl RenderThread {
    /// The body of a window's render thread.
    ///
    /// Whatever ends the loop, the backend's cleanup hook runs, the context
    /// stops being current, and the exit is reported to the orchestrator. A
    /// window removed from this very thread gets its context released here,
    /// after cleanup.
    pub fn run(self) {
        let window = &self.window;
        let context = window.context.clone();
        let current = context.make_current();

        debug!("{:?}: render thread started ({})", window.id, context.backend_type());

        match panic::catch_unwind(AssertUnwindSafe(|| self.frames())) {
            Ok(Ok(())) => debug!("{:?}: render loop finished", window.id),
            Ok(Err(err)) => error!("{:?}: render loop failed: {err}", window.id),
            Err(_) => error!("{:?}: render loop panicked", window.id),
        }

        if panic::catch_unwind(AssertUnwindSafe(|| context.cleanup())).is_err() {
            error!("{:?}: cleanup panicked", window.id);
        }

        if window.releases_on_exit() {
            let released =
                panic::catch_unwind(AssertUnwindSafe(|| window.release_context()));
            match released {
                Ok(_) => debug!("{:?}: released its context on exit", window.id),
                Err(_) => error!("{:?}: detach panicked", window.id),
            }
        }

        window.running.store(false, Ordering::Release);
        drop(current);

        // The orchestrator may already be gone.
        let _ = self.exits.send(window.id);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.window.is_running()
    }

    fn frames(&self) -> Result<(), BackendError> {
        let window = &self.window;
        let context = &window.context;
        let backend = context.backend_type();
        let drives_frames = context.capabilities().contains(Capabilities::PROCESS);

        context.initialize()?;

        let mut size_query_failed = false;

        while self.is_running() {
            self.atlases.sweep(backend);

            // A failed size query keeps the previous size for this frame.
            match context.refresh_size() {
                Ok(resized) => {
                    if let Some(size) = resized {
                        *window.size.lock() = size;
                    }
                    size_query_failed = false;
                }
                Err(err) => {
                    if !size_query_failed {
                        warn!("{:?}: size query failed, keeping {:?}: {err}", window.id, context.size());
                    }
                    size_query_failed = true;
                }
            }

            if drives_frames {
                if !context.process(&window.queue)? {
                    debug!("{:?}: backend ended the render loop", window.id);
                    break;
                }

                trace!("{:?}: frame", window.id);
                window.queue.wait(self.frame_interval);
            } else if !window.queue.drain()? {
                window.queue.wait(self.idle_timeout);
            }
        }

        Ok(())
    }
}
