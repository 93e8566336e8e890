//! Multi-backend rendering front-end.
//!
//! Windows are bound to render contexts by the [`Orchestrator`], which runs
//! one render thread per window. Code that must touch a context runs as a
//! command on that window's [`CommandQueue`]. Textures are packed into
//! shared atlases by the [`AtlasManager`] and uploaded lazily to every
//! backend that registered an uploader.
//!
//! ## Goals
//!
//! - [x] Any number of backends side by side
//! - [x] Render thread per window
//! - [x] Atlas uploads coalesced per backend
//!
//! ## Non-goals
//!
//! - [ ] Platform windowing (see [`WindowHost`])
//! - [ ] GPU drawing (backends bring their own)

pub mod atlas;
pub mod backend;
pub mod command_queue;
pub mod context;
pub mod error;
pub mod host;
pub mod image;
pub mod orchestrator;
pub mod window;

use std::time::Duration;

use geometry::{Extent, Px};

pub use atlas::{AtlasConfig, AtlasIndex, AtlasManager, SpriteHandle, SpriteInfo, TextureAtlas};
pub use backend::{Backend, BackendType, Capabilities};
pub use command_queue::CommandQueue;
pub use context::{ContextState, RenderContext};
pub use error::{AtlasError, BackendError, Error, UploadError};
pub use host::{HeadlessHost, WindowHost};
pub use image::PixelBuffer;
pub use orchestrator::{DragOutcome, Orchestrator};
pub use window::{NativeHandle, WindowDesc, WindowId};

#[derive(Clone, Debug)]
pub struct Config {
    /// How long a render thread waits for commands between frames when its
    /// backend drives the frame loop.
    ///
    /// Defaults to 16 ms.
    pub frame_interval: Duration,

    /// How long a render thread sleeps when its queue is empty and its
    /// backend does not drive frames. New commands wake it early.
    ///
    /// Defaults to 50 ms.
    pub idle_timeout: Duration,

    /// Pixels between docked windows. Defaults to 0.
    pub dock_gap: u32,

    /// The design resolution sprites are positioned in.
    ///
    /// Defaults to `None`, which uses the framebuffer size so that one
    /// virtual pixel is one framebuffer pixel.
    pub virtual_size: Option<Extent<u32, Px>>,

    /// Render threads are named `{prefix}-{window handle in hex}`.
    ///
    /// Defaults to `"render"`.
    pub thread_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
            idle_timeout: Duration::from_millis(50),
            dock_gap: 0,
            virtual_size: None,
            thread_name_prefix: "render".to_owned(),
        }
    }
}
