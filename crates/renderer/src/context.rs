//! Render contexts.
//!
//! Each registered backend owns one *master* context. The first window bound
//! to a backend gets the master; later windows get *clones* derived from it,
//! which share the master's backend but keep their own native handles and
//! sizes. Contexts outlive their windows and are handed out again once idle.

use std::{
    any::Any,
    cell::RefCell,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use geometry::{at_least_one, Extent, Point, Px, Rect, ScreenPx};
use log::{trace, warn};
use parking_lot::Mutex;

use crate::{
    atlas::{AtlasManager, SpriteHandle},
    backend::{Backend, BackendType, Capabilities, KeyCode, MouseButton},
    command_queue::CommandQueue,
    error::BackendError,
    window::{NativeHandle, WindowId},
};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<RenderContext>> = RefCell::new(None);
}

/// The context current on this thread, if any. Render threads make their
/// window's context current for their whole lifetime.
#[must_use]
pub fn current() -> Option<RenderContext> {
    CURRENT.with(|current| current.borrow().clone())
}

/// The backend of the context current on this thread.
#[must_use]
pub fn current_backend() -> Option<BackendType> {
    CURRENT.with(|current| current.borrow().as_ref().map(RenderContext::backend_type))
}

/// Restores the previously current context when dropped.
#[must_use = "the context stops being current when the guard is dropped"]
pub struct CurrentGuard {
    previous: Option<RenderContext>,
    // Thread-local state must be restored on the thread that set it.
    _not_send: PhantomData<*const ()>,
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextKind {
    Master,
    Clone,
}

/// The platform handles a context renders through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NativeHandles {
    pub window: Option<NativeHandle>,
    pub device: Option<NativeHandle>,
    pub graphics: Option<NativeHandle>,
}

/// Per-context state, handed to backend hooks.
pub struct ContextState {
    handles: NativeHandles,
    size: Extent<u32, ScreenPx>,
    scale_factor: f64,
    fixed_virtual_size: Option<Extent<u32, Px>>,
    surface: Option<Box<dyn Any + Send>>,
}

impl ContextState {
    fn new() -> Self {
        Self {
            handles: NativeHandles::default(),
            size: Extent::new(1, 1),
            scale_factor: 1.0,
            fixed_virtual_size: None,
            surface: None,
        }
    }

    pub fn handles(&self) -> NativeHandles {
        self.handles
    }

    /// Backends fill in the graphics handle they create during attach.
    pub fn handles_mut(&mut self) -> &mut NativeHandles {
        &mut self.handles
    }

    /// The logical client size of the window.
    pub fn size(&self) -> Extent<u32, ScreenPx> {
        self.size
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Physical-to-logical pixel ratio of the window's display.
    pub fn set_scale_factor(&mut self, scale_factor: f64) {
        if scale_factor.is_finite() && scale_factor > 0.0 {
            self.scale_factor = scale_factor;
        }
    }

    /// The size of the drawable surface in physical pixels.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn framebuffer_size(&self) -> Extent<u32, Px> {
        let scale = |v: u32| (f64::from(v) * self.scale_factor).round() as u32;
        at_least_one(Extent::new(scale(self.size.width), scale(self.size.height)))
    }

    /// The coordinate space sprite destinations are given in. Unless a fixed
    /// design size was configured this tracks the framebuffer size.
    pub fn virtual_size(&self) -> Extent<u32, Px> {
        self.fixed_virtual_size
            .unwrap_or_else(|| self.framebuffer_size())
    }

    pub fn surface<T: Any>(&self) -> Option<&T> {
        self.surface.as_ref()?.downcast_ref()
    }

    pub fn surface_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.surface.as_mut()?.downcast_mut()
    }

    /// Stores backend-specific per-context data, replacing any previous
    /// value.
    pub fn set_surface<T: Any + Send>(&mut self, surface: T) {
        self.surface = Some(Box::new(surface));
    }

    pub fn take_surface(&mut self) -> Option<Box<dyn Any + Send>> {
        self.surface.take()
    }
}

struct Inner {
    id: ContextId,
    kind: ContextKind,
    backend: Arc<dyn Backend>,
    owner: Mutex<Option<WindowId>>,
    state: Mutex<ContextState>,
}

/// A shared handle to a render context.
#[derive(Clone)]
pub struct RenderContext {
    inner: Arc<Inner>,
}

impl RenderContext {
    pub(crate) fn master(backend: Arc<dyn Backend>) -> Self {
        Self::with_kind(backend, ContextKind::Master)
    }

    /// A fresh clone sharing this context's backend but none of its state.
    pub(crate) fn derive(&self) -> Self {
        Self::with_kind(self.inner.backend.clone(), ContextKind::Clone)
    }

    fn with_kind(backend: Arc<dyn Backend>, kind: ContextKind) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
                kind,
                backend,
                owner: Mutex::new(None),
                state: Mutex::new(ContextState::new()),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn kind(&self) -> ContextKind {
        self.inner.kind
    }

    pub fn is_master(&self) -> bool {
        self.inner.kind == ContextKind::Master
    }

    pub fn backend_type(&self) -> BackendType {
        self.inner.backend.backend_type()
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.backend.capabilities()
    }

    /// The window the context is bound to, if any.
    pub fn owner(&self) -> Option<WindowId> {
        *self.inner.owner.lock()
    }

    pub fn handles(&self) -> NativeHandles {
        self.inner.state.lock().handles
    }

    pub fn size(&self) -> Extent<u32, ScreenPx> {
        self.inner.state.lock().size
    }

    pub fn framebuffer_size(&self) -> Extent<u32, Px> {
        self.inner.state.lock().framebuffer_size()
    }

    pub fn virtual_size(&self) -> Extent<u32, Px> {
        self.inner.state.lock().virtual_size()
    }

    /// Runs `f` with the context's state locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> R {
        f(&mut *self.inner.state.lock())
    }

    /// Makes this context current on the calling thread until the guard is
    /// dropped.
    pub fn make_current(&self) -> CurrentGuard {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(self.clone()));
        CurrentGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Marks the context as owned by `window`. Returns false if it already
    /// has an owner.
    pub(crate) fn try_claim(&self, window: WindowId) -> bool {
        let mut owner = self.inner.owner.lock();
        if owner.is_some() {
            return false;
        }
        *owner = Some(window);
        true
    }

    /// Points the context at a window's handles and design size.
    pub(crate) fn bind(
        &self,
        handles: NativeHandles,
        size: Extent<u32, ScreenPx>,
        virtual_size: Option<Extent<u32, Px>>,
    ) {
        let mut state = self.inner.state.lock();
        state.handles = handles;
        state.size = at_least_one(size);
        state.fixed_virtual_size = virtual_size.map(at_least_one);
    }

    /// Returns the context to the idle pool.
    pub(crate) fn release(&self) {
        {
            let mut state = self.inner.state.lock();
            state.handles = NativeHandles::default();
            state.surface = None;
            state.size = Extent::new(1, 1);
            state.scale_factor = 1.0;
        }
        *self.inner.owner.lock() = None;
    }

    pub(crate) fn resize(&self, size: Extent<u32, ScreenPx>) {
        self.inner.state.lock().size = at_least_one(size);
    }

    pub(crate) fn attach(&self) -> Result<(), BackendError> {
        self.inner.backend.attach(&mut self.inner.state.lock())
    }

    pub(crate) fn detach(&self) {
        self.inner.backend.detach(&mut self.inner.state.lock());
    }

    pub(crate) fn initialize(&self) -> Result<(), BackendError> {
        self.inner.backend.initialize(&mut self.inner.state.lock())
    }

    pub(crate) fn cleanup(&self) {
        self.inner.backend.cleanup(&mut self.inner.state.lock());
    }

    /// Runs one backend-driven frame. See [`Backend::process`].
    pub fn process(&self, queue: &CommandQueue) -> Result<bool, BackendError> {
        self.inner.backend.process(self, queue)
    }

    pub fn clear(&self) {
        self.inner.backend.clear(&mut self.inner.state.lock());
    }

    pub fn present(&self) {
        self.inner.backend.present(&mut self.inner.state.lock());
    }

    /// Asks the backend for the window's current size and records it.
    ///
    /// ## Returns
    ///
    /// The new size if it changed.
    pub fn refresh_size(&self) -> Result<Option<Extent<u32, ScreenPx>>, BackendError> {
        let mut state = self.inner.state.lock();
        let size = at_least_one(self.inner.backend.query_size(&state)?);

        if size == state.size {
            return Ok(None);
        }

        trace!("context {:?}: size {:?} -> {:?}", self.inner.id, state.size, size);
        state.size = size;
        Ok(Some(size))
    }

    /// Draws a sprite at `dst` in virtual coordinates.
    ///
    /// The sprite's atlas is offered for upload first, so a backend that
    /// lost its textures heals on the next draw.
    ///
    /// ## Returns
    ///
    /// False if the handle is stale or its atlas is gone; nothing is drawn.
    pub fn draw_sprite(&self, atlases: &AtlasManager, sprite: SpriteHandle, dst: Rect<f32, Px>) -> bool {
        let Some(info) = atlases.sprite(sprite) else {
            warn!("context {:?}: ignoring stale sprite {:?}", self.inner.id, sprite);
            return false;
        };

        if !atlases.contains(info.atlas) {
            warn!(
                "context {:?}: sprite {:?} refers to removed atlas {:?}",
                self.inner.id, sprite, info.atlas
            );
            return false;
        }

        atlases.ensure_uploaded(info.atlas);

        self.inner
            .backend
            .draw_sprite(&mut self.inner.state.lock(), &info, dst);
        true
    }

    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.inner.backend.is_key_down(&self.inner.state.lock(), key)
    }

    pub fn is_mouse_down(&self, button: MouseButton) -> bool {
        self.inner
            .backend
            .is_mouse_down(&self.inner.state.lock(), button)
    }

    pub fn cursor_position(&self) -> Option<Point<f32, ScreenPx>> {
        self.inner
            .backend
            .cursor_position(&self.inner.state.lock())
    }
}

impl PartialEq for RenderContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for RenderContext {}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("backend", &self.backend_type())
            .field("owner", &self.owner())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    fn null() -> RenderContext {
        RenderContext::master(Arc::new(NullBackend::new()))
    }

    #[test]
    fn clones_share_backend_not_state() {
        let master = null();
        let clone = master.derive();

        assert!(master.is_master());
        assert_eq!(clone.kind(), ContextKind::Clone);
        assert!(Arc::ptr_eq(master.backend(), clone.backend()));
        assert_ne!(master.id(), clone.id());
        assert_ne!(master, clone);

        master.resize(Extent::new(100, 50));
        assert_eq!(clone.size(), Extent::new(1, 1));
    }

    #[test]
    fn claim_is_exclusive() {
        let context = null();
        let a = NativeHandle::new(1).unwrap();
        let b = NativeHandle::new(2).unwrap();

        assert!(context.try_claim(a));
        assert!(!context.try_claim(b));
        assert_eq!(context.owner(), Some(a));

        context.release();
        assert_eq!(context.owner(), None);
        assert!(context.try_claim(b));
    }

    #[test]
    fn current_is_restored_by_guard() {
        let outer = null();
        let inner = outer.derive();

        assert!(current().is_none());
        {
            let _outer = outer.make_current();
            assert_eq!(current(), Some(outer.clone()));
            {
                let _inner = inner.make_current();
                assert_eq!(current(), Some(inner.clone()));
            }
            assert_eq!(current(), Some(outer.clone()));
            assert_eq!(current_backend(), Some(BackendType::NoOp));
        }
        assert!(current().is_none());
    }

    #[test]
    fn current_is_per_thread() {
        let context = null();
        let _guard = context.make_current();

        let seen = std::thread::spawn(|| current().is_some()).join().unwrap();
        assert!(!seen);
    }

    #[test]
    fn virtual_size_follows_framebuffer_unless_fixed() {
        let context = null();
        context.bind(NativeHandles::default(), Extent::new(200, 100), None);
        context.with_state(|s| s.set_scale_factor(2.0));

        assert_eq!(context.framebuffer_size(), Extent::new(400, 200));
        assert_eq!(context.virtual_size(), Extent::new(400, 200));

        context.bind(
            NativeHandles::default(),
            Extent::new(200, 100),
            Some(Extent::new(1920, 1080)),
        );
        assert_eq!(context.virtual_size(), Extent::new(1920, 1080));
    }

    #[test]
    fn zero_sizes_clamp() {
        let context = null();
        context.resize(Extent::new(0, 0));
        assert_eq!(context.size(), Extent::new(1, 1));
    }

    #[test]
    fn surface_downcasts() {
        let context = null();
        context.with_state(|s| s.set_surface(7u32));

        assert_eq!(context.with_state(|s| s.surface::<u32>().copied()), Some(7));
        assert!(context.with_state(|s| s.surface::<String>().is_none()));

        context.release();
        assert!(context.with_state(|s| s.surface::<u32>().is_none()));
    }
}
