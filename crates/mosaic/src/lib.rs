//! Render-thread-per-window orchestration with shared texture atlases.
//!
//! [`Mosaic`] ties an [`Orchestrator`] to the [`AtlasManager`] its render
//! threads upload from, and wires up the built-in backends.

use std::sync::Arc;

use log::info;

pub use geometry;
pub use renderer::{
    atlas, backend, command_queue, context, error, host, image, orchestrator, window, AtlasConfig,
    AtlasError, AtlasIndex, AtlasManager, Backend, BackendError, BackendType, Capabilities,
    CommandQueue, Config, ContextState, DragOutcome, Error, HeadlessHost, NativeHandle,
    Orchestrator, PixelBuffer, RenderContext, SpriteHandle, SpriteInfo, TextureAtlas,
    UploadError, WindowDesc, WindowHost, WindowId,
};

use renderer::backend::{
    null::NullBackend,
    software::{SoftwareBackend, SoftwareConfig},
};

pub mod prelude {
    pub use geometry::{Extent, Point, Px, Rect, ScreenPx};
    pub use renderer::{
        backend::{
            null::NullBackend,
            software::{SoftwareBackend, SoftwareConfig, SoftwareSurface},
        },
        context::current,
        AtlasConfig, BackendType, Config, NativeHandle, PixelBuffer, RenderContext, SpriteHandle,
        WindowDesc,
    };

    pub use crate::Mosaic;
}

pub struct Mosaic {
    atlases: Arc<AtlasManager>,
    orchestrator: Orchestrator,
}

impl Mosaic {
    #[must_use]
    pub fn new(config: Config, host: Arc<dyn WindowHost>) -> Self {
        let atlases = Arc::new(AtlasManager::new());
        let orchestrator = Orchestrator::new(config, atlases.clone(), host);

        Self {
            atlases,
            orchestrator,
        }
    }

    /// A mosaic whose windows only exist as handles. The returned host
    /// records docking and client areas for inspection.
    #[must_use]
    pub fn headless(config: Config) -> (Self, Arc<HeadlessHost>) {
        let host = Arc::new(HeadlessHost::new());
        (Self::new(config, host.clone()), host)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn atlases(&self) -> &Arc<AtlasManager> {
        &self.atlases
    }

    /// Registers a backend and, if it keeps textures, its atlas uploader.
    pub fn register(
        &self,
        backend: Arc<dyn Backend>,
        uploader: Option<impl Fn(&TextureAtlas) -> Result<(), UploadError> + Send + Sync + 'static>,
    ) -> Result<RenderContext, Error> {
        let kind = backend.backend_type();
        let master = self.orchestrator.register_backend(backend)?;

        if let Some(uploader) = uploader {
            self.atlases.register_backend_uploader(kind, uploader);
        }

        Ok(master)
    }

    pub fn register_software(&self, config: SoftwareConfig) -> Result<Arc<SoftwareBackend>, Error> {
        let backend = Arc::new(SoftwareBackend::new(config));
        self.register(backend.clone(), Some(backend.uploader()))?;
        Ok(backend)
    }

    pub fn register_null(&self) -> Result<Arc<NullBackend>, Error> {
        let backend = Arc::new(NullBackend::new());
        let uploads = backend.clone();
        self.register(backend.clone(), Some(move |atlas: &TextureAtlas| uploads.upload(atlas)))?;
        Ok(backend)
    }

    /// Stops every render thread and removes every window.
    pub fn shutdown(&self) {
        self.orchestrator.stop_all();

        let windows = self.orchestrator.windows();
        for window in &windows {
            self.orchestrator.remove_window(*window);
        }

        info!("shut down, {} window(s) removed", windows.len());
    }
}
