use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    atlas::TextureAtlas,
    backend::{Backend, BackendType},
    context::ContextState,
    error::{BackendError, UploadError},
};

/// Backend that renders nothing. The render loop still drains its windows'
/// command queues, so it is useful for headless work and tests.
#[derive(Default)]
pub struct NullBackend {
    uploads: AtomicUsize,
}

impl NullBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts any atlas.
    pub fn upload(&self, _atlas: &TextureAtlas) -> Result<(), UploadError> {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// How many atlas uploads this backend has accepted.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::Relaxed)
    }
}

/// Per-context marker so tests can tell an attached null context apart.
pub struct NullSurface {
    pub frame_id: u64,
}

impl Backend for NullBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::NoOp
    }

    fn attach(&self, context: &mut ContextState) -> Result<(), BackendError> {
        context.set_surface(NullSurface { frame_id: 0 });
        Ok(())
    }

    fn detach(&self, context: &mut ContextState) {
        context.take_surface();
    }

    fn present(&self, context: &mut ContextState) {
        if let Some(surface) = context.surface_mut::<NullSurface>() {
            surface.frame_id = surface.frame_id.wrapping_add(1);
        }
    }
}
