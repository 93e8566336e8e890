//! The backend seam.
//!
//! Every graphics backend implements [`Backend`]. One `Arc<dyn Backend>` is
//! shared by the master context of its [`BackendType`] and every clone
//! derived from it; per-window state lives in the [`ContextState`] each hook
//! receives.

pub mod null;
pub mod software;

use geometry::{Extent, Point, Px, Rect, ScreenPx};

use crate::{
    atlas::SpriteInfo,
    command_queue::CommandQueue,
    context::{ContextState, RenderContext},
    error::BackendError,
};

/// The interchangeable graphics implementations a window can be bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendType {
    OpenGl,
    NativeToolkit,
    MultimediaLibrary,
    TwoDToolkit,
    Software,
    NoOp,
}

impl BackendType {
    pub const ALL: [Self; 6] = [
        Self::OpenGl,
        Self::NativeToolkit,
        Self::MultimediaLibrary,
        Self::TwoDToolkit,
        Self::Software,
        Self::NoOp,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenGl => "opengl",
            Self::NativeToolkit => "native",
            Self::MultimediaLibrary => "multimedia",
            Self::TwoDToolkit => "2d",
            Self::Software => "software",
            Self::NoOp => "noop",
        }
    }

    /// A distinct bit per backend type, for compact per-thread bookkeeping.
    #[must_use]
    pub(crate) fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// Optional hooks a backend implements.
    pub struct Capabilities: u32 {
        /// The backend drives its own frame through [`Backend::process`],
        /// including draining the command queue. Without it the render loop
        /// drains the queue itself.
        const PROCESS = 0x1;
        /// [`Backend::draw_sprite`] does something.
        const DRAW = 0x2;
        /// The input queries report real device state.
        const INPUT = 0x4;
    }
}

/// Mouse buttons for input queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    Other(u16),
}

/// A platform key code, passed through uninterpreted.
pub type KeyCode = u32;

/// The hook set of a graphics backend.
///
/// Every hook has a no-op default, so a backend only implements what it
/// supports. Hooks that receive a [`ContextState`] are called with the
/// context's state lock held and must not call back into the same
/// [`RenderContext`].
///
/// Unless noted otherwise, hooks are called on the render thread of the
/// window the context is bound to.
#[allow(unused_variables)]
pub trait Backend: Send + Sync {
    fn backend_type(&self) -> BackendType;

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    /// Creates the native resources a context needs before it can render
    /// into its window, e.g. a graphics context for the window's device
    /// handle.
    ///
    /// Called on the thread adding the window, before its render thread
    /// starts. An error aborts adding the window.
    fn attach(&self, context: &mut ContextState) -> Result<(), BackendError> {
        Ok(())
    }

    /// Releases what [`attach`](Self::attach) created. Called after the
    /// render thread has been joined.
    fn detach(&self, context: &mut ContextState) {}

    /// Called once on the render thread before the first frame.
    fn initialize(&self, context: &mut ContextState) -> Result<(), BackendError> {
        Ok(())
    }

    /// Called once on the render thread after the last frame, however the
    /// loop ended.
    fn cleanup(&self, context: &mut ContextState) {}

    /// Renders one frame. Only called if [`Capabilities::PROCESS`] is set.
    ///
    /// The backend is responsible for draining `queue` and presenting.
    /// Returning `Ok(false)` stops the window's render loop; this is not an
    /// error.
    fn process(&self, context: &RenderContext, queue: &CommandQueue) -> Result<bool, BackendError> {
        queue.drain()?;
        Ok(true)
    }

    fn clear(&self, context: &mut ContextState) {}

    fn present(&self, context: &mut ContextState) {}

    /// Reports the current client size of the context's window.
    fn query_size(&self, context: &ContextState) -> Result<Extent<u32, ScreenPx>, BackendError> {
        Ok(context.size())
    }

    /// Draws `sprite` into `dst`, given in the context's virtual
    /// coordinates. The atlas has been offered for upload to this backend
    /// before the call.
    fn draw_sprite(&self, context: &mut ContextState, sprite: &SpriteInfo, dst: Rect<f32, Px>) {}

    fn is_key_down(&self, context: &ContextState, key: KeyCode) -> bool {
        false
    }

    fn is_mouse_down(&self, context: &ContextState, button: MouseButton) -> bool {
        false
    }

    fn cursor_position(&self, context: &ContextState) -> Option<Point<f32, ScreenPx>> {
        None
    }
}
