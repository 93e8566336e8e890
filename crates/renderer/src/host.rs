//! The platform windowing operations the orchestrator needs for docking.

use std::collections::HashMap;

use geometry::{Extent, Rect, ScreenPx};
use parking_lot::Mutex;

use crate::window::NativeHandle;

/// Window management supplied by the embedding platform layer.
///
/// The orchestrator only calls these while docking and relaying out; it never
/// creates or destroys windows itself.
pub trait WindowHost: Send + Sync {
    /// The client area of a dock parent, or `None` if the window is gone.
    fn client_area(&self, parent: NativeHandle) -> Option<Extent<u32, ScreenPx>>;

    /// Reparents `window` into `parent`, or back to the desktop for `None`.
    fn set_parent(&self, window: NativeHandle, parent: Option<NativeHandle>);

    /// Moves and resizes `window`, in its parent's client coordinates.
    fn set_bounds(&self, window: NativeHandle, bounds: Rect<i32, ScreenPx>);
}

#[derive(Default)]
struct HeadlessState {
    client_areas: HashMap<NativeHandle, Extent<u32, ScreenPx>>,
    parents: HashMap<NativeHandle, NativeHandle>,
    bounds: HashMap<NativeHandle, Rect<i32, ScreenPx>>,
}

/// A [`WindowHost`] without a platform behind it. It remembers what it was
/// told, which is all that tests and offscreen rendering need.
#[derive(Default)]
pub struct HeadlessHost {
    state: Mutex<HeadlessState>,
}

impl HeadlessHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_client_area(&self, parent: NativeHandle, width: u32, height: u32) {
        self.state
            .lock()
            .client_areas
            .insert(parent, Extent::new(width, height));
    }

    pub fn parent(&self, window: NativeHandle) -> Option<NativeHandle> {
        self.state.lock().parents.get(&window).copied()
    }

    pub fn bounds(&self, window: NativeHandle) -> Option<Rect<i32, ScreenPx>> {
        self.state.lock().bounds.get(&window).copied()
    }
}

impl WindowHost for HeadlessHost {
    fn client_area(&self, parent: NativeHandle) -> Option<Extent<u32, ScreenPx>> {
        self.state.lock().client_areas.get(&parent).copied()
    }

    fn set_parent(&self, window: NativeHandle, parent: Option<NativeHandle>) {
        let mut state = self.state.lock();
        match parent {
            Some(parent) => state.parents.insert(window, parent),
            None => state.parents.remove(&window),
        };
    }

    fn set_bounds(&self, window: NativeHandle, bounds: Rect<i32, ScreenPx>) {
        self.state.lock().bounds.insert(window, bounds);
    }
}
