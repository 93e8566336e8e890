use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use geometry::{Extent, UvRect};
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use structures::GenerationalPool;

use super::{
    registrar::AtlasRegistrar,
    upload::{BackendUploads, SweepGuard, UploadFn},
    AtlasConfig, AtlasIndex, SpriteHandle, SpriteInfo, TextureAtlas, MAX_ATLAS_SIZE,
};
use crate::{
    backend::BackendType,
    context,
    error::{AtlasError, UploadError},
    image::PixelBuffer,
};

/// Upper bound on passes a single sweep makes over work that shows up while
/// it runs.
const MAX_SWEEP_PASSES: usize = 8;

type SharedAtlas = Arc<RwLock<TextureAtlas>>;

#[derive(Default)]
struct AtlasTable {
    by_name: HashMap<String, AtlasIndex>,
    atlases: HashMap<AtlasIndex, SharedAtlas>,
    registrars: HashMap<AtlasIndex, Arc<Mutex<AtlasRegistrar>>>,
    next_index: u32,
}

/// Owns every atlas, their sprites, and the per-backend upload ledgers.
///
/// All methods take `&self` and may be called from any thread. Locks are
/// taken in the order registrar, atlas, sprite pool, ledger, and an atlas
/// lock is never held while a ledger lock is.
#[derive(Default)]
pub struct AtlasManager {
    table: RwLock<AtlasTable>,
    sprites: Mutex<GenerationalPool<SpriteInfo>>,
    uploads: RwLock<HashMap<BackendType, Arc<BackendUploads>>>,
}

impl AtlasManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty atlas and offers it to every registered backend.
    pub fn create_atlas(&self, config: AtlasConfig) -> Result<AtlasIndex, AtlasError> {
        let AtlasConfig {
            name,
            width,
            height,
            padding,
        } = config;

        if width == 0 || height == 0 || width > MAX_ATLAS_SIZE || height > MAX_ATLAS_SIZE {
            return Err(AtlasError::InvalidSize {
                width,
                height,
                max: MAX_ATLAS_SIZE,
            });
        }

        let (index, version) = {
            let mut table = self.table.write();

            if table.by_name.contains_key(&name) {
                return Err(AtlasError::DuplicateName(name));
            }

            let index = AtlasIndex(table.next_index);
            table.next_index = table
                .next_index
                .checked_add(1)
                .ok_or(AtlasError::IndexExhausted)?;

            let extent = Extent::new(width, height);
            let atlas = TextureAtlas::new(index, name.clone(), extent);
            let version = atlas.version();

            table.by_name.insert(name.clone(), index);
            table.atlases.insert(index, Arc::new(RwLock::new(atlas)));
            table.registrars.insert(
                index,
                Arc::new(Mutex::new(AtlasRegistrar::new(index, extent, padding))),
            );

            (index, version)
        };

        info!("created atlas {name:?} as {index:?} ({width}x{height})");
        self.notify(index, version);

        Ok(index)
    }

    /// Removes an atlas and every sprite in it. The index is never handed
    /// out again.
    pub fn remove_atlas(&self, index: AtlasIndex) -> bool {
        let removed = {
            let mut table = self.table.write();
            let atlas = table.atlases.remove(&index);
            table.registrars.remove(&index);
            table.by_name.retain(|_, i| *i != index);
            atlas
        };

        if removed.is_none() {
            return false;
        }

        self.sprites.lock().retain(|sprite| sprite.atlas != index);

        for uploads in self.uploads.read().values() {
            uploads.ledger.lock().forget(index);
        }

        info!("removed atlas {index:?}");
        true
    }

    /// Installs the upload callback for a backend, replacing any previous
    /// one, and queues every existing atlas for it.
    ///
    /// The callback runs with a read lock on the atlas it uploads and must
    /// not modify that atlas. See [`UploadFn`].
    pub fn register_backend_uploader(
        &self,
        backend: BackendType,
        uploader: impl Fn(&TextureAtlas) -> Result<(), UploadError> + Send + Sync + 'static,
    ) {
        let uploader: UploadFn = Arc::new(uploader);

        let uploads = {
            let mut all = self.uploads.write();
            match all.get(&backend) {
                Some(existing) => {
                    existing.ledger.lock().uploader = uploader;
                    existing.clone()
                }
                None => {
                    let uploads = Arc::new(BackendUploads::new(uploader));
                    all.insert(backend, uploads.clone());
                    uploads
                }
            }
        };

        let versions = self.versions();
        let mut ledger = uploads.ledger.lock();
        for (index, version) in &versions {
            ledger.request(*index, *version);
        }

        debug!(
            "registered {backend} uploader, {} atlas(es) pending",
            ledger.pending_count()
        );
    }

    pub fn has_uploader(&self, backend: BackendType) -> bool {
        self.uploads.read().contains_key(&backend)
    }

    /// Offers the current content of an atlas to every backend and, if the
    /// calling thread renders for one of them, uploads pending work for that
    /// backend right away.
    pub fn ensure_uploaded(&self, index: AtlasIndex) {
        let Some(version) = self.atlas(index).map(|atlas| atlas.read().version()) else {
            warn!("ensure_uploaded: no atlas {index:?}");
            return;
        };

        self.notify(index, version);

        if let Some(backend) = context::current_backend() {
            if !SweepGuard::is_active(backend) {
                self.sweep(backend);
            }
        }
    }

    /// Uploads every atlas pending for `backend`.
    ///
    /// Sweeps of one backend never overlap; a second caller waits for the
    /// first. A nested sweep of the same backend from inside an upload
    /// callback returns immediately, and the work it would have done is
    /// picked up by the enclosing sweep.
    ///
    /// ## Returns
    ///
    /// The number of successful uploads.
    pub fn sweep(&self, backend: BackendType) -> usize {
        let Some(uploads) = self.uploads.read().get(&backend).cloned() else {
            return 0;
        };

        let Some(_active) = SweepGuard::enter(backend) else {
            return 0;
        };

        let _serial = uploads.sweep.lock();
        let mut uploaded = 0;
        let mut failed: SmallVec<[AtlasIndex; 4]> = SmallVec::new();

        for pass in 0.. {
            let (uploader, batch) = {
                let mut ledger = uploads.ledger.lock();
                (ledger.uploader.clone(), ledger.take_pending())
            };

            if batch.is_empty() {
                break;
            }

            if pass == MAX_SWEEP_PASSES {
                warn!("{backend}: atlases keep changing during upload, deferring {} to the next sweep", batch.len());
                let mut ledger = uploads.ledger.lock();
                for (index, _) in batch {
                    ledger.retry(index);
                }
                break;
            }

            for (index, requested) in batch {
                if !uploads.ledger.lock().needs_upload(index, requested) {
                    continue;
                }

                let Some(atlas) = self.atlas(index) else {
                    uploads.ledger.lock().forget(index);
                    continue;
                };

                let (result, version) = {
                    let atlas = atlas.read();
                    let result = panic::catch_unwind(AssertUnwindSafe(|| uploader(&*atlas)))
                        .unwrap_or_else(|_| Err(UploadError::new("upload callback panicked")));
                    (result, atlas.version())
                };

                match result {
                    Ok(()) => {
                        trace!("{backend}: uploaded {index:?} at version {version}");
                        uploads.ledger.lock().mark_uploaded(index, version);
                        uploaded += 1;
                    }
                    Err(err) => {
                        warn!("{backend}: upload of {index:?} failed, will retry: {err}");
                        failed.push(index);
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut ledger = uploads.ledger.lock();
            for index in failed {
                ledger.retry(index);
            }
        }

        uploaded
    }

    /// Forgets what `backend` holds and queues every atlas for it again.
    pub fn reset_backend(&self, backend: BackendType) {
        let Some(uploads) = self.uploads.read().get(&backend).cloned() else {
            return;
        };

        let versions = self.versions();
        let mut ledger = uploads.ledger.lock();
        ledger.reset();
        for (index, version) in versions {
            ledger.request(index, version);
        }

        debug!("{backend}: reset, {} atlas(es) pending", ledger.pending_count());
    }

    /// The newest version of `index` that `backend` has acknowledged, or
    /// `None` if the backend has no uploader. Zero means never uploaded.
    pub fn uploaded_version(&self, backend: BackendType, index: AtlasIndex) -> Option<u64> {
        let uploads = self.uploads.read().get(&backend).cloned()?;
        let version = uploads.ledger.lock().uploaded_version(index);
        Some(version)
    }

    pub fn pending_count(&self, backend: BackendType) -> usize {
        self.uploads
            .read()
            .get(&backend)
            .map_or(0, |uploads| uploads.ledger.lock().pending_count())
    }

    /// Runs `f` with exclusive access to an atlas, then offers the result
    /// for upload. Mutating methods on [`TextureAtlas`] bump its version.
    pub fn modify_atlas<R>(
        &self,
        index: AtlasIndex,
        f: impl FnOnce(&mut TextureAtlas) -> R,
    ) -> Result<R, AtlasError> {
        let atlas = self.atlas(index).ok_or(AtlasError::UnknownAtlas(index))?;
        let result = f(&mut *atlas.write());
        self.ensure_uploaded(index);
        Ok(result)
    }

    /// Packs `image` into an atlas under `name`.
    pub fn add_sprite(
        &self,
        index: AtlasIndex,
        name: &str,
        image: &PixelBuffer,
    ) -> Result<SpriteHandle, AtlasError> {
        let registrar = self.registrar(index)?;
        let atlas = self.atlas(index).ok_or(AtlasError::UnknownAtlas(index))?;

        let handle = {
            let mut registrar = registrar.lock();
            let reservation = registrar.reserve(name, image.width(), image.height())?;

            let extent = {
                let mut atlas = atlas.write();
                if let Err(err) = atlas.write_region(reservation.region.top_left(), image) {
                    registrar.cancel(reservation);
                    return Err(err);
                }
                atlas.extent()
            };

            let name: Arc<str> = Arc::from(name);
            let info = SpriteInfo {
                name: name.clone(),
                atlas: index,
                local: reservation.local,
                region: reservation.region,
                uv: UvRect::from_region(reservation.region, extent),
            };

            let handle = SpriteHandle {
                slot: self.sprites.lock().insert(info),
                atlas: index,
                local: reservation.local,
            };

            registrar.commit(name, reservation, handle);
            handle
        };

        trace!("added sprite {name:?} to {index:?} as {handle:?}");
        self.ensure_uploaded(index);

        Ok(handle)
    }

    /// Decodes a PNG and packs it into an atlas under `name`.
    pub fn add_sprite_png(
        &self,
        index: AtlasIndex,
        name: &str,
        encoded: &[u8],
    ) -> Result<SpriteHandle, AtlasError> {
        let image = PixelBuffer::from_png(encoded)?;
        self.add_sprite(index, name, &image)
    }

    /// Frees a sprite's space. Every copy of the handle stops resolving.
    /// The atlas pixels are left as they are.
    pub fn remove_sprite(&self, handle: SpriteHandle) -> bool {
        let Some(info) = self.sprites.lock().remove(handle.slot) else {
            return false;
        };

        if let Ok(registrar) = self.registrar(info.atlas) {
            registrar.lock().release(&info.name);
        }

        trace!("removed sprite {:?} from {:?}", info.name, info.atlas);
        true
    }

    pub fn sprite(&self, handle: SpriteHandle) -> Option<SpriteInfo> {
        self.sprites.lock().get(handle.slot).cloned()
    }

    pub fn is_alive(&self, handle: SpriteHandle) -> bool {
        self.sprites.lock().is_alive(handle.slot)
    }

    pub fn sprite_count(&self) -> usize {
        self.sprites.lock().len()
    }

    pub fn find_sprite(&self, index: AtlasIndex, name: &str) -> Option<SpriteHandle> {
        let registrar = self.registrar(index).ok()?;
        let handle = registrar.lock().find(name);
        handle
    }

    pub fn atlas_index(&self, name: &str) -> Option<AtlasIndex> {
        self.table.read().by_name.get(name).copied()
    }

    /// Looks up an atlas by name.
    pub fn atlas_named(&self, name: &str) -> Result<AtlasIndex, AtlasError> {
        self.atlas_index(name)
            .ok_or_else(|| AtlasError::UnknownName(name.to_owned()))
    }

    pub fn atlas(&self, index: AtlasIndex) -> Option<Arc<RwLock<TextureAtlas>>> {
        self.table.read().atlases.get(&index).cloned()
    }

    pub fn contains(&self, index: AtlasIndex) -> bool {
        self.table.read().atlases.contains_key(&index)
    }

    pub fn atlas_count(&self) -> usize {
        self.table.read().atlases.len()
    }

    fn registrar(&self, index: AtlasIndex) -> Result<Arc<Mutex<AtlasRegistrar>>, AtlasError> {
        let table = self.table.read();
        match table.registrars.get(&index) {
            Some(registrar) => Ok(registrar.clone()),
            None if table.atlases.contains_key(&index) => Err(AtlasError::MissingRegistrar(index)),
            None => Err(AtlasError::UnknownAtlas(index)),
        }
    }

    /// The current version of every atlas.
    fn versions(&self) -> Vec<(AtlasIndex, u64)> {
        let atlases: Vec<_> = self
            .table
            .read()
            .atlases
            .iter()
            .map(|(index, atlas)| (*index, atlas.clone()))
            .collect();

        let mut versions: Vec<_> = atlases
            .into_iter()
            .map(|(index, atlas)| (index, atlas.read().version()))
            .collect();
        versions.sort_unstable();
        versions
    }

    fn notify(&self, index: AtlasIndex, version: u64) {
        for uploads in self.uploads.read().values() {
            uploads.ledger.lock().request(index, version);
        }
    }
}

impl std::fmt::Debug for AtlasManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasManager")
            .field("atlases", &self.atlas_count())
            .field("sprites", &self.sprite_count())
            .finish_non_exhaustive()
    }
}
