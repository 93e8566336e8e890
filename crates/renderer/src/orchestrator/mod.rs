//! Binds windows to render contexts and runs one render thread per window.

mod layout;
mod render_loop;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam::channel::{unbounded, Receiver, Sender};
use geometry::{at_least_one, Extent, Point, Rect, ScreenPx};
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
    atlas::AtlasManager,
    backend::{Backend, BackendType},
    context::{NativeHandles, RenderContext},
    error::Error,
    host::WindowHost,
    window::{NativeHandle, WindowDesc, WindowId, WindowRecord, WindowShared},
    Config,
};

pub use layout::DragOutcome;
use layout::Docks;
use render_loop::RenderThread;

struct BackendEntry {
    master: RenderContext,
    clones: Vec<RenderContext>,
}

/// Owns every window record, its render thread, and the contexts of every
/// registered backend.
///
/// All methods take `&self` and may be called from any thread. Only
/// [`remove_window`](Self::remove_window) and [`stop_all`](Self::stop_all)
/// block, while they join render threads.
pub struct Orchestrator {
    config: Config,
    atlases: Arc<AtlasManager>,
    host: Arc<dyn WindowHost>,
    running: Arc<AtomicBool>,
    registry: RwLock<HashMap<BackendType, BackendEntry>>,
    windows: RwLock<HashMap<WindowId, WindowRecord>>,
    docks: Mutex<Docks>,
    // Serializes adding and removing windows.
    lifecycle: Mutex<()>,
    exit_tx: Sender<WindowId>,
    exit_rx: Receiver<WindowId>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: Config, atlases: Arc<AtlasManager>, host: Arc<dyn WindowHost>) -> Self {
        let (exit_tx, exit_rx) = unbounded();

        Self {
            config,
            atlases,
            host,
            running: Arc::new(AtomicBool::new(true)),
            registry: RwLock::new(HashMap::new()),
            windows: RwLock::new(HashMap::new()),
            docks: Mutex::new(Docks::default()),
            lifecycle: Mutex::new(()),
            exit_tx,
            exit_rx,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn atlases(&self) -> &Arc<AtlasManager> {
        &self.atlases
    }

    /// Creates the master context for a backend.
    pub fn register_backend(&self, backend: Arc<dyn Backend>) -> Result<RenderContext, Error> {
        let kind = backend.backend_type();
        let mut registry = self.registry.write();

        if registry.contains_key(&kind) {
            return Err(Error::BackendAlreadyRegistered(kind));
        }

        let master = RenderContext::master(backend);
        registry.insert(
            kind,
            BackendEntry {
                master: master.clone(),
                clones: Vec::new(),
            },
        );

        info!("registered {kind} backend, master context {:?}", master.id());
        Ok(master)
    }

    pub fn is_registered(&self, backend: BackendType) -> bool {
        self.registry.read().contains_key(&backend)
    }

    /// Binds a window to a context of the requested backend and starts its
    /// render thread.
    ///
    /// The first window of a backend gets the master context; later ones get
    /// an idle clone, or a new one if every clone is in use.
    ///
    /// ## Errors
    ///
    /// Fails if the backend is not registered, the window is already bound,
    /// the orchestrator was stopped, or the backend cannot attach to the
    /// window. Nothing is left behind on failure.
    pub fn add_window(&self, desc: WindowDesc) -> Result<RenderContext, Error> {
        let WindowDesc {
            window,
            parent,
            device,
            graphics,
            backend,
            size,
            resize,
        } = desc;

        let lifecycle = self.lifecycle.lock();

        if !self.running.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        if self.windows.read().contains_key(&window) {
            return Err(Error::DuplicateWindow(window));
        }

        let context = self.claim_context(backend, window)?;
        let size = at_least_one(size);

        context.bind(
            NativeHandles {
                window: Some(window),
                device,
                graphics,
            },
            size,
            self.config.virtual_size,
        );

        if let Err(source) = context.attach() {
            warn!("{window:?}: {backend} backend failed to attach: {source}");
            context.release();
            return Err(Error::Attach {
                backend,
                window,
                source,
            });
        }

        let shared = Arc::new(WindowShared::new(window, context.clone(), size, resize));
        let render_thread = RenderThread {
            window: shared.clone(),
            running: self.running.clone(),
            atlases: self.atlases.clone(),
            frame_interval: self.config.frame_interval,
            idle_timeout: self.config.idle_timeout,
            exits: self.exit_tx.clone(),
        };

        let spawned = thread::Builder::new()
            .name(format!("{}-{:x}", self.config.thread_name_prefix, window.get()))
            .spawn(move || render_thread.run());

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                context.detach();
                context.release();
                return Err(Error::ThreadSpawn(err));
            }
        };

        self.windows.write().insert(
            window,
            WindowRecord {
                shared,
                thread: Some(handle),
            },
        );
        drop(lifecycle);

        info!(
            "{window:?}: bound to {backend} {:?} context {:?}",
            context.kind(),
            context.id()
        );

        if let Some(parent) = parent {
            self.dock_window(window, parent);
        }

        Ok(context)
    }

    /// Stops a window's render thread, waits for it, and returns its
    /// context to the idle pool.
    ///
    /// Called from the window's own render thread, it cannot wait; the
    /// thread then releases the context itself after its cleanup hook.
    ///
    /// ## Returns
    ///
    /// False if the window was not bound.
    pub fn remove_window(&self, window: WindowId) -> bool {
        let record = {
            let _lifecycle = self.lifecycle.lock();
            self.windows.write().remove(&window)
        };

        let Some(mut record) = record else {
            return false;
        };

        record.shared.stop();
        let joined = match record.thread.take() {
            Some(handle) if is_current_thread(&handle) => {
                debug!("{window:?}: removed from its own render thread");
                record.shared.release_on_exit();
                false
            }
            Some(handle) => {
                join_render_thread(window, handle);
                true
            }
            None => true,
        };

        self.undock(window);

        let dropped = record.shared.queue.clear();
        if joined {
            record.shared.release_context();
        }

        info!("{window:?}: removed, {dropped} pending command(s) dropped");
        true
    }

    /// Records a new client size for a window and queues its resize
    /// callback on the window's render thread. Zero dimensions are clamped
    /// to 1.
    ///
    /// ## Returns
    ///
    /// False if the window is not bound.
    pub fn handle_resize(&self, window: WindowId, width: u32, height: u32) -> bool {
        let size = at_least_one(Extent::new(width, height));
        let windows = self.windows.read();

        let Some(record) = windows.get(&window) else {
            trace!("{window:?}: resize for unknown window ignored");
            return false;
        };

        record.shared.context.resize(size);
        *record.shared.size.lock() = size;

        if let Some(callback) = record.shared.resize.clone() {
            let (width, height) = (size.width, size.height);
            record.shared.queue.enqueue(move || callback(width, height));
        }

        trace!("{window:?}: resized to {}x{}", size.width, size.height);
        true
    }

    /// Queues a command on a window's render thread.
    pub fn enqueue(&self, window: WindowId, command: impl FnOnce() + Send + 'static) -> bool {
        match self.windows.read().get(&window) {
            Some(record) => {
                record.shared.queue.enqueue(command);
                true
            }
            None => false,
        }
    }

    /// Stops every render thread and waits for all of them. Afterwards no new
    /// windows can be added. Calling it again does nothing.
    pub fn stop_all(&self) {
        let was_running = self.running.swap(false, Ordering::AcqRel);

        // The calling thread's own handle stays in its record; that thread
        // ends once the current command returns.
        let threads: Vec<_> = self
            .windows
            .write()
            .values_mut()
            .filter_map(|record| {
                record.shared.stop();
                if record.thread.as_ref().map_or(false, is_current_thread) {
                    return None;
                }
                Some((record.id(), record.thread.take()?))
            })
            .collect();

        let joined = threads.len();
        for (window, handle) in threads {
            join_render_thread(window, handle);
        }

        if was_running {
            info!("stopped, joined {joined} render thread(s)");
        }
    }

    pub fn is_stopped(&self) -> bool {
        !self.running.load(Ordering::Acquire)
    }

    /// Removes every window whose render thread ended by itself, e.g.
    /// because its backend asked to stop or failed.
    ///
    /// ## Returns
    ///
    /// The windows that were removed.
    pub fn housekeep(&self) -> Vec<WindowId> {
        let exited: Vec<_> = self.exit_rx.try_iter().collect();

        exited
            .into_iter()
            .filter(|window| {
                // A stale notice for a window that was removed and added
                // again must not take down the new thread.
                self.windows
                    .read()
                    .get(window)
                    .map_or(false, |record| !record.shared.is_running())
            })
            .filter(|window| self.remove_window(*window))
            .collect()
    }

    /// Docks `window` into `parent`'s grid, undocking it from any previous
    /// parent first.
    pub fn dock(&self, window: WindowId, parent: NativeHandle) -> Result<(), Error> {
        if !self.windows.read().contains_key(&window) {
            return Err(Error::UnknownWindow(window));
        }

        self.dock_window(window, parent);
        Ok(())
    }

    /// Returns the window to the desktop and closes the gap it left.
    pub fn undock(&self, window: WindowId) -> bool {
        let Some(parent) = self.docks.lock().undock(window) else {
            return false;
        };

        self.host.set_parent(window, None);
        self.relayout(parent);
        debug!("{window:?}: undocked from {parent:?}");
        true
    }

    /// Lays out every window docked in `parent` again. Call after the
    /// parent itself was resized.
    pub fn relayout(&self, parent: NativeHandle) {
        let Some(area) = self.host.client_area(parent) else {
            warn!("relayout: parent {parent:?} has no client area");
            return;
        };

        let cells = self.docks.lock().cells(parent, area, self.config.dock_gap);

        for (window, cell) in cells {
            self.host.set_bounds(window, cell);

            let extent = cell.extent();
            self.handle_resize(
                window,
                u32::try_from(extent.width).unwrap_or(1),
                u32::try_from(extent.height).unwrap_or(1),
            );
        }
    }

    /// Moves a docked window according to a drag ending at `cursor`, given
    /// in the parent's client coordinates.
    ///
    /// Dropping onto another window's cell swaps the two; dropping outside
    /// the parent undocks the window.
    pub fn drag_window(&self, window: WindowId, cursor: Point<i32, ScreenPx>) -> DragOutcome {
        let Some(parent) = self.docks.lock().parent_of(window) else {
            return DragOutcome::NotDocked;
        };

        let Some(area) = self.host.client_area(parent) else {
            self.undock(window);
            return DragOutcome::Undocked;
        };

        let bounds: Rect<i32, ScreenPx> = Rect::new(
            Point::new(0, 0),
            Extent::new(
                i32::try_from(area.width).unwrap_or(i32::MAX),
                i32::try_from(area.height).unwrap_or(i32::MAX),
            ),
        );

        if !bounds.contains(cursor) {
            self.undock(window);
            return DragOutcome::Undocked;
        }

        let swapped = {
            let mut docks = self.docks.lock();
            match docks.hit(parent, area, self.config.dock_gap, cursor) {
                Some(other) if other != window && docks.swap(window, other) => Some(other),
                _ => None,
            }
        };

        match swapped {
            Some(other) => {
                self.relayout(parent);
                debug!("{window:?}: swapped with {other:?}");
                DragOutcome::Swapped(other)
            }
            None => DragOutcome::Unchanged,
        }
    }

    pub fn dock_parent(&self, window: WindowId) -> Option<NativeHandle> {
        self.docks.lock().parent_of(window)
    }

    /// The windows docked in `parent`, in grid order.
    pub fn docked_windows(&self, parent: NativeHandle) -> Vec<WindowId> {
        self.docks.lock().children(parent).to_vec()
    }

    pub fn context(&self, window: WindowId) -> Option<RenderContext> {
        self.windows
            .read()
            .get(&window)
            .map(|record| record.shared.context.clone())
    }

    pub fn master(&self, backend: BackendType) -> Option<RenderContext> {
        self.registry
            .read()
            .get(&backend)
            .map(|entry| entry.master.clone())
    }

    /// Every context of a backend, master first.
    pub fn contexts(&self, backend: BackendType) -> Vec<RenderContext> {
        self.registry
            .read()
            .get(&backend)
            .map(|entry| {
                std::iter::once(&entry.master)
                    .chain(&entry.clones)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn window_size(&self, window: WindowId) -> Option<Extent<u32, ScreenPx>> {
        self.windows
            .read()
            .get(&window)
            .map(|record| *record.shared.size.lock())
    }

    /// True while the window's render thread is looping.
    pub fn is_running(&self, window: WindowId) -> bool {
        self.windows
            .read()
            .get(&window)
            .map_or(false, |record| record.shared.is_running())
    }

    pub fn window_count(&self) -> usize {
        self.windows.read().len()
    }

    pub fn windows(&self) -> Vec<WindowId> {
        self.windows.read().keys().copied().collect()
    }

    fn claim_context(&self, backend: BackendType, window: WindowId) -> Result<RenderContext, Error> {
        let mut registry = self.registry.write();
        let entry = registry
            .get_mut(&backend)
            .ok_or(Error::BackendNotRegistered(backend))?;

        if entry.master.try_claim(window) {
            return Ok(entry.master.clone());
        }

        if let Some(idle) = entry.clones.iter().find(|clone| clone.try_claim(window)) {
            return Ok(idle.clone());
        }

        let clone = entry.master.derive();
        clone.try_claim(window);
        entry.clones.push(clone.clone());
        debug!("{backend}: derived clone context {:?}", clone.id());

        Ok(clone)
    }

    fn dock_window(&self, window: WindowId, parent: NativeHandle) {
        let previous = self.docks.lock().dock(window, parent);
        self.host.set_parent(window, Some(parent));

        if let Some(previous) = previous.filter(|p| *p != parent) {
            self.relayout(previous);
        }
        self.relayout(parent);

        debug!("{window:?}: docked into {parent:?}");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop_all();

        for (_, record) in self.windows.get_mut().drain() {
            if record.thread.is_some() {
                // Dropped from this window's own render thread.
                record.shared.release_on_exit();
            } else {
                record.shared.release_context();
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("running", &!self.is_stopped())
            .field("windows", &self.window_count())
            .finish_non_exhaustive()
    }
}

fn is_current_thread(handle: &JoinHandle<()>) -> bool {
    handle.thread().id() == thread::current().id()
}

fn join_render_thread(window: WindowId, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("{window:?}: render thread panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicUsize,
        time::{Duration, Instant},
    };

    use crossbeam::channel::bounded;

    use super::*;
    use crate::{
        atlas::AtlasConfig,
        backend::{
            software::{SoftwareBackend, SoftwareConfig, SoftwareSurface},
            Capabilities,
        },
        command_queue::CommandQueue,
        context::{self, ContextState},
        error::BackendError,
        host::HeadlessHost,
        image::PixelBuffer,
    };

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn h(raw: u64) -> NativeHandle {
        NativeHandle::new(raw).unwrap()
    }

    fn fast() -> Config {
        Config {
            frame_interval: Duration::from_millis(2),
            idle_timeout: Duration::from_millis(5),
            ..Config::default()
        }
    }

    fn setup() -> (Orchestrator, Arc<HeadlessHost>) {
        init_logger();
        let host = Arc::new(HeadlessHost::new());
        let orchestrator = Orchestrator::new(fast(), Arc::new(AtlasManager::new()), host.clone());
        (orchestrator, host)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    /// A backend that counts hook calls and can be told to misbehave.
    struct Scripted {
        kind: BackendType,
        process: bool,
        fail_attach: bool,
        stop_after: Option<usize>,
        fail_size: AtomicBool,
        reported_size: Mutex<Option<Extent<u32, ScreenPx>>>,
        frames: AtomicUsize,
        initialized: AtomicUsize,
        cleaned_up: AtomicUsize,
        detached: AtomicUsize,
    }

    impl Scripted {
        fn new(kind: BackendType) -> Self {
            Self {
                kind,
                process: false,
                fail_attach: false,
                stop_after: None,
                fail_size: AtomicBool::new(false),
                reported_size: Mutex::new(None),
                frames: AtomicUsize::new(0),
                initialized: AtomicUsize::new(0),
                cleaned_up: AtomicUsize::new(0),
                detached: AtomicUsize::new(0),
            }
        }

        fn processing(mut self) -> Self {
            self.process = true;
            self
        }
    }

    impl Backend for Scripted {
        fn backend_type(&self) -> BackendType {
            self.kind
        }

        fn capabilities(&self) -> Capabilities {
            if self.process {
                Capabilities::PROCESS
            } else {
                Capabilities::empty()
            }
        }

        fn attach(&self, context: &mut ContextState) -> Result<(), BackendError> {
            if self.fail_attach {
                return Err(BackendError::ResourceCreation("no pixel format".into()));
            }

            let window = context.handles().window.map_or(0, NativeHandle::get);
            context.handles_mut().graphics = NativeHandle::new(window | 0x1000);
            Ok(())
        }

        fn detach(&self, _context: &mut ContextState) {
            self.detached.fetch_add(1, Ordering::SeqCst);
        }

        fn initialize(&self, _context: &mut ContextState) -> Result<(), BackendError> {
            self.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn cleanup(&self, _context: &mut ContextState) {
            self.cleaned_up.fetch_add(1, Ordering::SeqCst);
        }

        fn process(&self, _context: &RenderContext, queue: &CommandQueue) -> Result<bool, BackendError> {
            queue.drain()?;
            let frames = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(self.stop_after.map_or(true, |limit| frames < limit))
        }

        fn query_size(&self, context: &ContextState) -> Result<Extent<u32, ScreenPx>, BackendError> {
            if self.fail_size.load(Ordering::SeqCst) {
                return Err(BackendError::SizeQuery("window is minimized".into()));
            }
            Ok(self.reported_size.lock().unwrap_or_else(|| context.size()))
        }
    }

    #[test]
    fn second_window_gets_a_clone() {
        let (orchestrator, _) = setup();
        let backend = Arc::new(Scripted::new(BackendType::OpenGl));
        let master = orchestrator.register_backend(backend.clone()).unwrap();

        let first = orchestrator
            .add_window(WindowDesc::new(h(1), BackendType::OpenGl).with_device(h(11)))
            .unwrap();
        let second = orchestrator
            .add_window(WindowDesc::new(h(2), BackendType::OpenGl).with_device(h(22)))
            .unwrap();

        assert_eq!(first, master);
        assert!(first.is_master());
        assert!(!second.is_master());
        assert!(Arc::ptr_eq(first.backend(), second.backend()));

        assert_eq!(first.handles().window, Some(h(1)));
        assert_eq!(second.handles().window, Some(h(2)));
        assert_eq!(second.handles().device, Some(h(22)));
        assert_ne!(first.handles().graphics, second.handles().graphics);

        assert_eq!(orchestrator.contexts(BackendType::OpenGl).len(), 2);
        assert_eq!(orchestrator.context(h(2)), Some(second));
    }

    #[test]
    fn contexts_have_one_owner_and_are_reused() {
        let (orchestrator, _) = setup();
        orchestrator
            .register_backend(Arc::new(Scripted::new(BackendType::OpenGl)))
            .unwrap();

        for raw in 1..=3 {
            orchestrator
                .add_window(WindowDesc::new(h(raw), BackendType::OpenGl))
                .unwrap();
        }

        let freed = orchestrator.context(h(2)).unwrap();
        assert!(orchestrator.remove_window(h(2)));
        assert_eq!(freed.owner(), None);
        assert_eq!(freed.handles(), NativeHandles::default());

        let reused = orchestrator
            .add_window(WindowDesc::new(h(4), BackendType::OpenGl))
            .unwrap();
        assert_eq!(reused, freed);

        let contexts = orchestrator.contexts(BackendType::OpenGl);
        assert_eq!(contexts.len(), 3);

        let mut owners: Vec<_> = contexts.iter().filter_map(RenderContext::owner).collect();
        owners.sort();
        assert_eq!(owners, vec![h(1), h(3), h(4)]);
    }

    #[test]
    fn registration_errors() {
        let (orchestrator, _) = setup();
        orchestrator
            .register_backend(Arc::new(Scripted::new(BackendType::NoOp)))
            .unwrap();

        assert!(matches!(
            orchestrator.register_backend(Arc::new(Scripted::new(BackendType::NoOp))),
            Err(Error::BackendAlreadyRegistered(BackendType::NoOp))
        ));
        assert!(matches!(
            orchestrator.add_window(WindowDesc::new(h(1), BackendType::TwoDToolkit)),
            Err(Error::BackendNotRegistered(BackendType::TwoDToolkit))
        ));

        orchestrator
            .add_window(WindowDesc::new(h(1), BackendType::NoOp))
            .unwrap();
        assert!(matches!(
            orchestrator.add_window(WindowDesc::new(h(1), BackendType::NoOp)),
            Err(Error::DuplicateWindow(_))
        ));
        assert!(matches!(
            orchestrator.dock(h(9), h(100)),
            Err(Error::UnknownWindow(_))
        ));
    }

    #[test]
    fn attach_failure_leaves_nothing_behind() {
        let (orchestrator, _) = setup();
        let mut scripted = Scripted::new(BackendType::NativeToolkit);
        scripted.fail_attach = true;
        let scripted = Arc::new(scripted);
        orchestrator.register_backend(scripted.clone()).unwrap();

        let err = orchestrator
            .add_window(WindowDesc::new(h(1), BackendType::NativeToolkit))
            .unwrap_err();

        assert!(matches!(err, Error::Attach { window, .. } if window == h(1)));
        assert_eq!(orchestrator.window_count(), 0);
        assert_eq!(scripted.initialized.load(Ordering::SeqCst), 0);

        let master = orchestrator.master(BackendType::NativeToolkit).unwrap();
        assert_eq!(master.owner(), None);
        assert_eq!(master.handles(), NativeHandles::default());
    }

    #[test]
    fn resize_is_clamped_and_delivered_on_render_thread() {
        let (orchestrator, _) = setup();
        orchestrator
            .register_backend(Arc::new(Scripted::new(BackendType::OpenGl)))
            .unwrap();

        let (tx, rx) = bounded(4);
        let context = orchestrator
            .add_window(
                WindowDesc::new(h(1), BackendType::OpenGl)
                    .with_size(640, 480)
                    .with_resize(move |width, height| {
                        let name = thread::current().name().map(str::to_owned);
                        let _ = tx.send((width, height, name));
                    }),
            )
            .unwrap();

        assert!(orchestrator.handle_resize(h(1), 0, 0));
        assert_eq!(context.size(), Extent::new(1, 1));
        assert_eq!(context.framebuffer_size(), Extent::new(1, 1));
        assert_eq!(orchestrator.window_size(h(1)), Some(Extent::new(1, 1)));

        let (width, height, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((width, height), (1, 1));
        assert_eq!(name.as_deref(), Some("render-1"));
    }

    #[test]
    fn resize_of_unknown_window_is_ignored() {
        let (orchestrator, _) = setup();
        assert!(!orchestrator.handle_resize(h(7), 100, 100));
    }

    #[test]
    fn commands_run_in_order_on_the_window_thread() {
        let (orchestrator, _) = setup();
        orchestrator
            .register_backend(Arc::new(Scripted::new(BackendType::OpenGl).processing()))
            .unwrap();
        let context = orchestrator
            .add_window(WindowDesc::new(h(5), BackendType::OpenGl))
            .unwrap();

        let (tx, rx) = bounded(16);
        for i in 0..10 {
            let tx = tx.clone();
            let expected = context.clone();
            assert!(orchestrator.enqueue(h(5), move || {
                let current = context::current();
                let _ = tx.send((i, current == Some(expected)));
            }));
        }

        let received: Vec<_> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();

        assert_eq!(
            received.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            (0..10).collect::<Vec<_>>()
        );
        assert!(received.iter().all(|(_, current)| *current));
        assert!(!orchestrator.enqueue(h(6), || {}));
    }

    #[test]
    fn backend_can_end_its_loop() {
        let (orchestrator, _) = setup();
        let mut scripted = Scripted::new(BackendType::Software).processing();
        scripted.stop_after = Some(3);
        let scripted = Arc::new(scripted);
        orchestrator.register_backend(scripted.clone()).unwrap();
        orchestrator
            .add_window(WindowDesc::new(h(1), BackendType::Software))
            .unwrap();

        assert!(wait_until(|| !orchestrator.is_running(h(1))));
        assert!(wait_until(|| scripted.cleaned_up.load(Ordering::SeqCst) == 1));
        assert_eq!(scripted.frames.load(Ordering::SeqCst), 3);

        // The record stays until housekeeping picks it up.
        assert_eq!(orchestrator.window_count(), 1);
        assert!(wait_until(|| {
            orchestrator.housekeep();
            orchestrator.window_count() == 0
        }));
        assert_eq!(scripted.initialized.load(Ordering::SeqCst), 1);
        assert_eq!(scripted.detached.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.master(BackendType::Software).unwrap().owner(), None);
    }

    #[test]
    fn failed_size_query_keeps_previous_size() {
        let (orchestrator, _) = setup();
        let scripted = Arc::new(Scripted::new(BackendType::OpenGl).processing());
        scripted.fail_size.store(true, Ordering::SeqCst);
        orchestrator.register_backend(scripted.clone()).unwrap();
        orchestrator
            .add_window(WindowDesc::new(h(1), BackendType::OpenGl).with_size(100, 80))
            .unwrap();

        assert!(wait_until(|| scripted.frames.load(Ordering::SeqCst) >= 3));
        assert!(orchestrator.is_running(h(1)));
        assert_eq!(orchestrator.window_size(h(1)), Some(Extent::new(100, 80)));

        *scripted.reported_size.lock() = Some(Extent::new(300, 200));
        scripted.fail_size.store(false, Ordering::SeqCst);

        assert!(wait_until(|| orchestrator.window_size(h(1)) == Some(Extent::new(300, 200))));
        assert_eq!(
            orchestrator.context(h(1)).unwrap().size(),
            Extent::new(300, 200)
        );
    }

    #[test]
    fn panicking_command_stops_only_its_window() {
        let (orchestrator, _) = setup();
        orchestrator
            .register_backend(Arc::new(Scripted::new(BackendType::NoOp)))
            .unwrap();
        orchestrator
            .add_window(WindowDesc::new(h(1), BackendType::NoOp))
            .unwrap();
        orchestrator
            .add_window(WindowDesc::new(h(2), BackendType::NoOp))
            .unwrap();

        orchestrator.enqueue(h(1), || panic!("command failed"));

        assert!(wait_until(|| !orchestrator.is_running(h(1))));
        assert!(orchestrator.is_running(h(2)));

        assert!(wait_until(|| {
            orchestrator.housekeep();
            orchestrator.window_count() == 1
        }));
        assert!(orchestrator.context(h(2)).is_some());
    }

    #[test]
    fn stop_all_joins_everything() {
        let (orchestrator, _) = setup();
        let opengl = Arc::new(Scripted::new(BackendType::OpenGl).processing());
        let noop = Arc::new(Scripted::new(BackendType::NoOp));
        orchestrator.register_backend(opengl.clone()).unwrap();
        orchestrator.register_backend(noop.clone()).unwrap();

        for raw in 1..=2 {
            orchestrator
                .add_window(WindowDesc::new(h(raw), BackendType::OpenGl))
                .unwrap();
        }
        orchestrator
            .add_window(WindowDesc::new(h(3), BackendType::NoOp))
            .unwrap();

        orchestrator.stop_all();

        assert!(orchestrator.is_stopped());
        for raw in 1..=3 {
            assert!(!orchestrator.is_running(h(raw)));
        }
        assert_eq!(opengl.cleaned_up.load(Ordering::SeqCst), 2);
        assert_eq!(noop.cleaned_up.load(Ordering::SeqCst), 1);

        assert!(matches!(
            orchestrator.add_window(WindowDesc::new(h(4), BackendType::NoOp)),
            Err(Error::ShuttingDown)
        ));

        orchestrator.stop_all();
        assert_eq!(opengl.cleaned_up.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_releases_contexts() {
        let scripted = Arc::new(Scripted::new(BackendType::OpenGl));
        let master = {
            let (orchestrator, _) = setup();
            orchestrator.register_backend(scripted.clone()).unwrap();
            orchestrator
                .add_window(WindowDesc::new(h(1), BackendType::OpenGl))
                .unwrap()
        };

        assert_eq!(master.owner(), None);
        assert_eq!(scripted.cleaned_up.load(Ordering::SeqCst), 1);
        assert_eq!(scripted.detached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn window_can_remove_itself() {
        let (orchestrator, _) = setup();
        let orchestrator = Arc::new(orchestrator);
        let scripted = Arc::new(Scripted::new(BackendType::OpenGl));
        orchestrator.register_backend(scripted.clone()).unwrap();
        let master = orchestrator
            .add_window(WindowDesc::new(h(1), BackendType::OpenGl))
            .unwrap();

        let (tx, rx) = bounded(1);
        {
            let this = orchestrator.clone();
            orchestrator.enqueue(h(1), move || {
                let removed = this.remove_window(h(1));
                let owner = context::current().and_then(|c| c.owner());
                let _ = tx.send((removed, owner));
            });
        }

        let (removed, owner) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(removed);
        // The context stays bound until its thread is done with it.
        assert_eq!(owner, Some(h(1)));
        assert_eq!(orchestrator.window_count(), 0);

        assert!(wait_until(|| master.owner().is_none()));
        assert_eq!(scripted.cleaned_up.load(Ordering::SeqCst), 1);
        assert_eq!(scripted.detached.load(Ordering::SeqCst), 1);

        let next = orchestrator
            .add_window(WindowDesc::new(h(2), BackendType::OpenGl))
            .unwrap();
        assert_eq!(next, master);
        assert_eq!(next.owner(), Some(h(2)));
        assert_eq!(next.handles().window, Some(h(2)));
        assert!(wait_until(|| scripted.initialized.load(Ordering::SeqCst) == 2));

        // The old thread's exit notice must not take down the new window.
        assert!(orchestrator.housekeep().is_empty());
        assert!(orchestrator.is_running(h(2)));
        assert_eq!(scripted.cleaned_up.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_from_a_render_thread() {
        let (orchestrator, _) = setup();
        let scripted = Arc::new(Scripted::new(BackendType::NoOp));
        orchestrator.register_backend(scripted.clone()).unwrap();
        let master = orchestrator
            .add_window(WindowDesc::new(h(1), BackendType::NoOp))
            .unwrap();

        let orchestrator = Arc::new(orchestrator);
        let (go_tx, go_rx) = bounded::<()>(1);
        {
            let last = orchestrator.clone();
            orchestrator.enqueue(h(1), move || {
                let _ = go_rx.recv_timeout(Duration::from_secs(5));
                drop(last);
            });
        }

        drop(orchestrator);
        go_tx.send(()).unwrap();

        assert!(wait_until(|| master.owner().is_none()));
        assert_eq!(scripted.cleaned_up.load(Ordering::SeqCst), 1);
        assert_eq!(scripted.detached.load(Ordering::SeqCst), 1);
        assert_eq!(master.handles(), NativeHandles::default());
    }

    #[test]
    fn docked_windows_fill_a_grid() {
        let (orchestrator, host) = setup();
        orchestrator
            .register_backend(Arc::new(Scripted::new(BackendType::NoOp)))
            .unwrap();
        let parent = h(100);
        host.set_client_area(parent, 200, 100);

        for raw in 1..=4 {
            orchestrator
                .add_window(WindowDesc::new(h(raw), BackendType::NoOp).with_parent(parent))
                .unwrap();
        }

        assert_eq!(orchestrator.docked_windows(parent), vec![h(1), h(2), h(3), h(4)]);
        assert_eq!(host.parent(h(1)), Some(parent));
        assert_eq!(
            host.bounds(h(1)),
            Some(Rect::new(Point::new(0, 0), Extent::new(100, 50)))
        );
        assert_eq!(
            host.bounds(h(4)),
            Some(Rect::new(Point::new(100, 50), Extent::new(100, 50)))
        );
        assert_eq!(orchestrator.window_size(h(4)), Some(Extent::new(100, 50)));

        // Removing a window closes the gap.
        orchestrator.remove_window(h(4));
        assert_eq!(orchestrator.dock_parent(h(4)), None);
        assert_eq!(
            host.bounds(h(3)),
            Some(Rect::new(Point::new(0, 50), Extent::new(100, 50)))
        );
    }

    #[test]
    fn drag_swaps_and_undocks() {
        let (orchestrator, host) = setup();
        orchestrator
            .register_backend(Arc::new(Scripted::new(BackendType::NoOp)))
            .unwrap();
        let parent = h(100);
        host.set_client_area(parent, 200, 100);

        for raw in 1..=4 {
            orchestrator
                .add_window(WindowDesc::new(h(raw), BackendType::NoOp))
                .unwrap();
            orchestrator.dock(h(raw), parent).unwrap();
        }

        assert_eq!(
            orchestrator.drag_window(h(1), Point::new(20, 20)),
            DragOutcome::Unchanged
        );
        assert_eq!(
            orchestrator.drag_window(h(1), Point::new(150, 75)),
            DragOutcome::Swapped(h(4))
        );
        assert_eq!(
            host.bounds(h(1)),
            Some(Rect::new(Point::new(100, 50), Extent::new(100, 50)))
        );
        assert_eq!(
            host.bounds(h(4)),
            Some(Rect::new(Point::new(0, 0), Extent::new(100, 50)))
        );

        assert_eq!(
            orchestrator.drag_window(h(1), Point::new(500, 20)),
            DragOutcome::Undocked
        );
        assert_eq!(host.parent(h(1)), None);
        assert_eq!(orchestrator.docked_windows(parent), vec![h(4), h(2), h(3)]);
        assert_eq!(
            orchestrator.drag_window(h(1), Point::new(20, 20)),
            DragOutcome::NotDocked
        );
    }

    #[test]
    fn render_thread_uploads_and_draws() {
        init_logger();
        let atlases = Arc::new(AtlasManager::new());
        let host = Arc::new(HeadlessHost::new());
        let orchestrator = Orchestrator::new(fast(), atlases.clone(), host);

        let software = Arc::new(SoftwareBackend::new(SoftwareConfig::default()));
        orchestrator.register_backend(software.clone()).unwrap();
        atlases.register_backend_uploader(BackendType::Software, software.uploader());

        let atlas = atlases.create_atlas(AtlasConfig::new("ui", 32, 32)).unwrap();
        let sprite = atlases
            .add_sprite(atlas, "blue", &PixelBuffer::filled(Extent::new(4, 4), [0, 0, 255, 255]))
            .unwrap();

        orchestrator
            .add_window(WindowDesc::new(h(1), BackendType::Software).with_size(16, 16))
            .unwrap();

        let (tx, rx) = bounded(1);
        {
            let atlases = atlases.clone();
            orchestrator.enqueue(h(1), move || {
                let Some(context) = context::current() else {
                    return;
                };
                let drawn = context.draw_sprite(
                    &atlases,
                    sprite,
                    Rect::new(Point::new(4.0, 4.0), Extent::new(8.0, 8.0)),
                );
                let inside = context.with_state(|s| {
                    s.surface::<SoftwareSurface>().and_then(|f| f.pixel(8, 8))
                });
                let _ = tx.send((drawn, inside));
            });
        }

        let (drawn, inside) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(drawn);
        assert_eq!(inside, Some([0, 0, 255, 255]));

        let version = atlases.atlas(atlas).unwrap().read().version();
        assert_eq!(software.texture_version(atlas), Some(version));
        assert_eq!(
            atlases.uploaded_version(BackendType::Software, atlas),
            Some(version)
        );
    }
}
