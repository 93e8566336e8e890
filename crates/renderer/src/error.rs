use crate::{atlas::AtlasIndex, backend::BackendType, window::WindowId};

/// Errors reported synchronously by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no backend registered for {0:?}")]
    BackendNotRegistered(BackendType),

    #[error("a backend for {0:?} is already registered")]
    BackendAlreadyRegistered(BackendType),

    #[error("window {0:?} already has a render context")]
    DuplicateWindow(WindowId),

    #[error("window {0:?} is not managed by this orchestrator")]
    UnknownWindow(WindowId),

    #[error("the orchestrator has been stopped")]
    ShuttingDown,

    /// The backend could not create the native resources for a window. The
    /// window was not added.
    #[error("failed to attach a {backend:?} context to window {window:?}: {source}")]
    Attach {
        backend: BackendType,
        window: WindowId,
        #[source]
        source: BackendError,
    },

    #[error("failed to spawn render thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Failures raised by backend hooks.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("native resource creation failed: {0}")]
    ResourceCreation(String),

    #[error("size query failed: {0}")]
    SizeQuery(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("{0}")]
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// A command panicked. The commands queued behind it were not run and
    /// remain at the front of the queue.
    #[error("a queued command panicked; {deferred} command(s) deferred to the next drain")]
    CommandPanicked { deferred: usize },
}

/// Failures reported by the atlas manager and registrars.
#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    #[error("an atlas named {0:?} already exists")]
    DuplicateName(String),

    #[error("no atlas named {0:?}")]
    UnknownName(String),

    #[error("no atlas with index {0:?}")]
    UnknownAtlas(AtlasIndex),

    #[error("atlas indices are exhausted")]
    IndexExhausted,

    #[error("atlas dimensions must be nonzero and at most {max}, got {width}x{height}")]
    InvalidSize { width: u32, height: u32, max: u32 },

    #[error("atlas {0:?} has no registrar")]
    MissingRegistrar(AtlasIndex),

    #[error("atlas {atlas:?} already contains a sprite named {name:?}")]
    DuplicateSprite { atlas: AtlasIndex, name: String },

    #[error("a {width}x{height} region can never fit in atlas {atlas:?}")]
    RegionTooLarge {
        atlas: AtlasIndex,
        width: u32,
        height: u32,
    },

    #[error("atlas {atlas:?} has no room left for a {width}x{height} region")]
    AtlasFull {
        atlas: AtlasIndex,
        width: u32,
        height: u32,
    },

    #[error("expected {expected} bytes of pixel data, got {actual}")]
    PixelSizeMismatch { expected: usize, actual: usize },

    #[error("unsupported png layout: {0}")]
    UnsupportedPng(String),

    #[error("png decoding failed: {0}")]
    PngDecoding(#[from] png::DecodingError),

    #[error("png encoding failed: {0}")]
    PngEncoding(#[from] png::EncodingError),
}

/// Returned by an upload callback that could not push an atlas to its
/// backend. The upload is retried on the next sweep.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("upload failed: {0}")]
pub struct UploadError(pub String);

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
