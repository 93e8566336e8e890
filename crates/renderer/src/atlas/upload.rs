use std::{
    cell::Cell,
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::{AtlasIndex, TextureAtlas};
use crate::{backend::BackendType, error::UploadError};

/// Pushes the content of an atlas to one backend's texture store.
///
/// Called on a render thread of that backend with a read lock on the atlas
/// held, so it must not modify that same atlas (through
/// `AtlasManager::modify_atlas`, `add_sprite` or `remove_atlas`); doing so
/// deadlocks. Other atlases may be modified. On error or panic the upload is
/// retried on a later sweep.
pub type UploadFn = Arc<dyn Fn(&TextureAtlas) -> Result<(), UploadError> + Send + Sync>;

pub(crate) type Batch = SmallVec<[(AtlasIndex, u64); 8]>;

/// What one backend has been asked to upload and what it already holds.
pub(crate) struct UploadLedger {
    pub uploader: UploadFn,
    pending: VecDeque<AtlasIndex>,
    is_pending: HashSet<AtlasIndex>,
    requested: HashMap<AtlasIndex, u64>,
    uploaded: HashMap<AtlasIndex, u64>,
}

impl UploadLedger {
    pub fn new(uploader: UploadFn) -> Self {
        Self {
            uploader,
            pending: VecDeque::new(),
            is_pending: HashSet::new(),
            requested: HashMap::new(),
            uploaded: HashMap::new(),
        }
    }

    /// Records that `atlas` reached `version`. An atlas is listed at most
    /// once no matter how often it changes before the next sweep.
    ///
    /// ## Returns
    ///
    /// True if the version is newer than anything requested or uploaded so
    /// far.
    pub fn request(&mut self, atlas: AtlasIndex, version: u64) -> bool {
        let known = self
            .requested
            .get(&atlas)
            .copied()
            .unwrap_or(0)
            .max(self.uploaded_version(atlas));

        if version <= known {
            return false;
        }

        self.requested.insert(atlas, version);
        self.push(atlas);
        true
    }

    /// Puts an atlas whose upload failed back in line.
    pub fn retry(&mut self, atlas: AtlasIndex) {
        self.push(atlas);
    }

    /// Takes every pending atlas along with the version it was requested at.
    pub fn take_pending(&mut self) -> Batch {
        let requested = &self.requested;
        self.is_pending.clear();
        self.pending
            .drain(..)
            .map(|atlas| (atlas, requested.get(&atlas).copied().unwrap_or(0)))
            .collect()
    }

    pub fn needs_upload(&self, atlas: AtlasIndex, version: u64) -> bool {
        version > self.uploaded_version(atlas)
    }

    pub fn mark_uploaded(&mut self, atlas: AtlasIndex, version: u64) {
        let uploaded = self.uploaded.entry(atlas).or_insert(0);
        *uploaded = (*uploaded).max(version);
    }

    /// Zero until the first successful upload.
    pub fn uploaded_version(&self, atlas: AtlasIndex) -> u64 {
        self.uploaded.get(&atlas).copied().unwrap_or(0)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn forget(&mut self, atlas: AtlasIndex) {
        self.requested.remove(&atlas);
        self.uploaded.remove(&atlas);
        if self.is_pending.remove(&atlas) {
            self.pending.retain(|a| *a != atlas);
        }
    }

    /// Forgets everything the backend held, e.g. after a device loss.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.is_pending.clear();
        self.requested.clear();
        self.uploaded.clear();
    }

    fn push(&mut self, atlas: AtlasIndex) {
        if self.is_pending.insert(atlas) {
            self.pending.push_back(atlas);
        }
    }
}

/// A backend's ledger plus the lock that keeps its sweeps serial.
pub(crate) struct BackendUploads {
    pub ledger: Mutex<UploadLedger>,
    pub sweep: Mutex<()>,
}

impl BackendUploads {
    pub fn new(uploader: UploadFn) -> Self {
        Self {
            ledger: Mutex::new(UploadLedger::new(uploader)),
            sweep: Mutex::new(()),
        }
    }
}

thread_local! {
    static SWEEPING: Cell<u8> = Cell::new(0);
}

/// Marks a backend as being swept on this thread. Upload callbacks that
/// touch atlases must not start a nested sweep of the same backend.
pub(crate) struct SweepGuard {
    bit: u8,
}

impl SweepGuard {
    pub fn enter(backend: BackendType) -> Option<Self> {
        let bit = backend.bit();
        SWEEPING.with(|sweeping| {
            let active = sweeping.get();
            if active & bit != 0 {
                None
            } else {
                sweeping.set(active | bit);
                Some(Self { bit })
            }
        })
    }

    pub fn is_active(backend: BackendType) -> bool {
        SWEEPING.with(|sweeping| sweeping.get() & backend.bit() != 0)
    }
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        SWEEPING.with(|sweeping| sweeping.set(sweeping.get() & !self.bit));
    }
}
