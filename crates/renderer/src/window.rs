use std::{
    num::NonZeroU64,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use geometry::{Extent, ScreenPx};
use parking_lot::Mutex;

use crate::{backend::BackendType, command_queue::CommandQueue, context::RenderContext};

/// An opaque platform handle: a window, a device context, or a graphics
/// context. Never dereferenced by this crate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(NonZeroU64);

impl NativeHandle {
    /// Returns `None` for the null handle.
    #[must_use]
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Windows are identified by their native handle.
pub type WindowId = NativeHandle;

/// Invoked on the render thread with the new client width and height.
pub type ResizeCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Everything needed to bind a window to a render context.
#[derive(Clone)]
pub struct WindowDesc {
    pub window: NativeHandle,
    /// Dock the window into this parent right after it is added.
    pub parent: Option<NativeHandle>,
    pub device: Option<NativeHandle>,
    pub graphics: Option<NativeHandle>,
    pub backend: BackendType,
    /// Initial client size. Zero dimensions are clamped to 1.
    pub size: Extent<u32, ScreenPx>,
    pub resize: Option<ResizeCallback>,
}

impl WindowDesc {
    #[must_use]
    pub fn new(window: NativeHandle, backend: BackendType) -> Self {
        Self {
            window,
            parent: None,
            device: None,
            graphics: None,
            backend,
            size: Extent::new(1, 1),
            resize: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: NativeHandle) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_device(mut self, device: NativeHandle) -> Self {
        self.device = Some(device);
        self
    }

    #[must_use]
    pub fn with_graphics(mut self, graphics: NativeHandle) -> Self {
        self.graphics = Some(graphics);
        self
    }

    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Extent::new(width, height);
        self
    }

    #[must_use]
    pub fn with_resize(mut self, callback: impl Fn(u32, u32) + Send + Sync + 'static) -> Self {
        self.resize = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for WindowDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowDesc")
            .field("window", &self.window)
            .field("parent", &self.parent)
            .field("device", &self.device)
            .field("graphics", &self.graphics)
            .field("backend", &self.backend)
            .field("size", &self.size)
            .field("resize", &self.resize.is_some())
            .finish()
    }
}

/// The part of a window record its render thread shares with the
/// orchestrator.
pub(crate) struct WindowShared {
    pub id: WindowId,
    pub context: RenderContext,
    pub queue: CommandQueue,
    pub running: AtomicBool,
    pub resize: Option<ResizeCallback>,
    pub size: Mutex<Extent<u32, ScreenPx>>,
    // Set when the window was dropped from its own render thread, which then
    // hands the context back itself once it has finished with it.
    release_on_exit: AtomicBool,
    released: AtomicBool,
}

impl WindowShared {
    pub fn new(
        id: WindowId,
        context: RenderContext,
        size: Extent<u32, ScreenPx>,
        resize: Option<ResizeCallback>,
    ) -> Self {
        Self {
            id,
            context,
            queue: CommandQueue::new(),
            running: AtomicBool::new(true),
            resize,
            size: Mutex::new(size),
            release_on_exit: AtomicBool::new(false),
            released: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clears the running flag and wakes the render thread so it notices.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.queue.interrupt();
    }

    /// Detaches the backend and returns the context to the idle pool. Only
    /// the first call has any effect.
    pub fn release_context(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.context.detach();
        self.context.release();
        true
    }

    /// Leaves releasing the context to the render thread, after its cleanup.
    pub fn release_on_exit(&self) {
        self.release_on_exit.store(true, Ordering::Release);
    }

    pub fn releases_on_exit(&self) -> bool {
        self.release_on_exit.load(Ordering::Acquire)
    }
}

pub(crate) struct WindowRecord {
    pub shared: Arc<WindowShared>,
    pub thread: Option<JoinHandle<()>>,
}

impl WindowRecord {
    pub fn id(&self) -> WindowId {
        self.shared.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_is_rejected() {
        assert!(NativeHandle::new(0).is_none());
        assert_eq!(NativeHandle::new(0x2a).map(NativeHandle::get), Some(0x2a));
    }

    #[test]
    fn handle_debug_is_hex() {
        let handle = NativeHandle::new(255).unwrap();
        assert_eq!(format!("{handle:?}"), "0xff");
    }

    #[test]
    fn desc_builder() {
        let window = NativeHandle::new(1).unwrap();
        let parent = NativeHandle::new(2).unwrap();
        let desc = WindowDesc::new(window, BackendType::Software)
            .with_parent(parent)
            .with_size(640, 480)
            .with_resize(|_, _| {});

        assert_eq!(desc.parent, Some(parent));
        assert_eq!(desc.size, Extent::new(640, 480));
        assert!(desc.resize.is_some());
        assert_eq!(desc.device, None);
    }
}
