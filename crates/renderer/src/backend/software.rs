//! A CPU rasterizer.
//!
//! Renders into an RGBA framebuffer per context. Atlases are copied into the
//! backend's own texture store by its upload callback, so drawing only ever
//! reads what was uploaded, never the live atlas.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use geometry::{Extent, Px, Rect};
use log::{debug, trace};
use parking_lot::RwLock;

use crate::{
    atlas::{AtlasIndex, SpriteInfo, TextureAtlas},
    backend::{Backend, BackendType, Capabilities},
    command_queue::CommandQueue,
    context::{ContextState, RenderContext},
    error::{BackendError, UploadError},
};

#[derive(Clone, Debug)]
pub struct SoftwareConfig {
    pub clear_color: [u8; 4],
    /// Stop a window's render loop after this many presented frames.
    pub frame_limit: Option<u64>,
}

impl Default for SoftwareConfig {
    fn default() -> Self {
        Self {
            clear_color: [0, 0, 0, 255],
            frame_limit: None,
        }
    }
}

/// The framebuffer of one context.
pub struct SoftwareSurface {
    extent: Extent<u32, Px>,
    pixels: Vec<u8>,
    frames: u64,
    draws: usize,
}

impl SoftwareSurface {
    fn new(extent: Extent<u32, Px>) -> Self {
        Self {
            extent,
            pixels: vec![0; extent.width as usize * extent.height as usize * 4],
            frames: 0,
            draws: 0,
        }
    }

    pub fn extent(&self) -> Extent<u32, Px> {
        self.extent
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.extent.width || y >= self.extent.height {
            return None;
        }

        let offset = (y as usize * self.extent.width as usize + x as usize) * 4;
        let p = &self.pixels[offset..offset + 4];
        Some([p[0], p[1], p[2], p[3]])
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    /// Sprites drawn since the last clear.
    pub fn draws(&self) -> usize {
        self.draws
    }

    fn resize(&mut self, extent: Extent<u32, Px>) {
        if self.extent != extent {
            self.extent = extent;
            self.pixels
                .resize(extent.width as usize * extent.height as usize * 4, 0);
        }
    }

    fn fill(&mut self, rgba: [u8; 4]) {
        for pixel in self.pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
        self.draws = 0;
    }
}

struct Texture {
    version: u64,
    extent: Extent<u32, Px>,
    pixels: Arc<[u8]>,
}

/// The software backend.
pub struct SoftwareBackend {
    config: SoftwareConfig,
    textures: RwLock<HashMap<AtlasIndex, Texture>>,
    uploads: AtomicUsize,
}

impl SoftwareBackend {
    #[must_use]
    pub fn new(config: SoftwareConfig) -> Self {
        Self {
            config,
            textures: RwLock::new(HashMap::new()),
            uploads: AtomicUsize::new(0),
        }
    }

    /// Copies an atlas into the texture store. Use as the backend's upload
    /// callback.
    pub fn upload(&self, atlas: &TextureAtlas) -> Result<(), UploadError> {
        let texture = Texture {
            version: atlas.version(),
            extent: atlas.extent(),
            pixels: Arc::from(atlas.pixels()),
        };

        self.textures.write().insert(atlas.index(), texture);
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// The upload callback for this backend, to register with the atlas
    /// manager.
    pub fn uploader(
        self: &Arc<Self>,
    ) -> impl Fn(&TextureAtlas) -> Result<(), UploadError> + Send + Sync + 'static {
        let backend = self.clone();
        move |atlas: &TextureAtlas| backend.upload(atlas)
    }

    /// The version of an atlas held in the texture store.
    pub fn texture_version(&self, atlas: AtlasIndex) -> Option<u64> {
        self.textures.read().get(&atlas).map(|t| t.version)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::Relaxed)
    }

    /// Drops every uploaded texture, as a GPU backend would on device loss.
    pub fn evict_textures(&self) {
        self.textures.write().clear();
    }

    fn sample(&self, sprite: &SpriteInfo) -> Option<(Extent<u32, Px>, Arc<[u8]>)> {
        let textures = self.textures.read();
        let texture = textures.get(&sprite.atlas)?;
        Some((texture.extent, texture.pixels.clone()))
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new(SoftwareConfig::default())
    }
}

impl Backend for SoftwareBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::PROCESS | Capabilities::DRAW
    }

    fn attach(&self, context: &mut ContextState) -> Result<(), BackendError> {
        if context.handles().window.is_none() {
            return Err(BackendError::ResourceCreation(
                "no window handle to render into".into(),
            ));
        }

        let extent = context.framebuffer_size();
        context.set_surface(SoftwareSurface::new(extent));
        debug!("software surface {}x{} attached", extent.width, extent.height);
        Ok(())
    }

    fn detach(&self, context: &mut ContextState) {
        context.take_surface();
    }

    fn initialize(&self, context: &mut ContextState) -> Result<(), BackendError> {
        if context.surface::<SoftwareSurface>().is_none() {
            let extent = context.framebuffer_size();
            context.set_surface(SoftwareSurface::new(extent));
        }
        Ok(())
    }

    fn process(&self, context: &RenderContext, queue: &CommandQueue) -> Result<bool, BackendError> {
        context.clear();
        queue.drain()?;
        context.present();

        let frames = context.with_state(|state| {
            state
                .surface::<SoftwareSurface>()
                .map_or(0, SoftwareSurface::frames_presented)
        });

        Ok(self.config.frame_limit.map_or(true, |limit| frames < limit))
    }

    fn clear(&self, context: &mut ContextState) {
        let extent = context.framebuffer_size();
        if let Some(surface) = context.surface_mut::<SoftwareSurface>() {
            surface.resize(extent);
            surface.fill(self.config.clear_color);
        }
    }

    fn present(&self, context: &mut ContextState) {
        if let Some(surface) = context.surface_mut::<SoftwareSurface>() {
            surface.frames += 1;
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn draw_sprite(&self, context: &mut ContextState, sprite: &SpriteInfo, dst: Rect<f32, Px>) {
        let Some((texture_extent, texels)) = self.sample(sprite) else {
            trace!("software: atlas {:?} not resident, skipping draw", sprite.atlas);
            return;
        };

        let virtual_size = context.virtual_size();
        let Some(surface) = context.surface_mut::<SoftwareSurface>() else {
            return;
        };

        // Virtual coordinates to framebuffer pixels.
        let sx = surface.extent.width as f32 / virtual_size.width as f32;
        let sy = surface.extent.height as f32 / virtual_size.height as f32;

        let left = (dst.left() * sx).round().max(0.0) as u32;
        let top = (dst.top() * sy).round().max(0.0) as u32;
        let right = ((dst.right() * sx).round().max(0.0) as u32).min(surface.extent.width);
        let bottom = ((dst.bottom() * sy).round().max(0.0) as u32).min(surface.extent.height);

        let width = (dst.right() - dst.left()) * sx;
        let height = (dst.bottom() - dst.top()) * sy;
        if width <= 0.0 || height <= 0.0 {
            return;
        }

        let region = sprite.region;
        let region_extent = region.extent();

        for y in top..bottom {
            let v = ((y as f32 + 0.5 - dst.top() * sy) / height).clamp(0.0, 1.0);
            let ty = (region.top() + ((v * region_extent.height as f32) as u32).min(region_extent.height - 1))
                .min(texture_extent.height - 1);

            for x in left..right {
                let u = ((x as f32 + 0.5 - dst.left() * sx) / width).clamp(0.0, 1.0);
                let tx = (region.left() + ((u * region_extent.width as f32) as u32).min(region_extent.width - 1))
                    .min(texture_extent.width - 1);

                let src = (ty as usize * texture_extent.width as usize + tx as usize) * 4;
                let texel = &texels[src..src + 4];

                // Binary alpha: fully transparent texels leave the
                // framebuffer untouched.
                if texel[3] == 0 {
                    continue;
                }

                let out = (y as usize * surface.extent.width as usize + x as usize) * 4;
                surface.pixels[out..out + 4].copy_from_slice(texel);
            }
        }

        surface.draws += 1;
    }
}
