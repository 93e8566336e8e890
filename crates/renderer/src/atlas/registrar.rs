use std::{collections::HashMap, sync::Arc};

use geometry::{Extent, Point, Px, Rect};
use guillotiere::{size2, AllocId, AtlasAllocator};

use super::{AtlasIndex, SpriteHandle};
use crate::error::AtlasError;

/// Space reserved for a sprite that has not been committed yet.
pub(crate) struct Reservation {
    pub local: u32,
    pub region: Rect<u32, Px>,
    alloc: AllocId,
}

struct Entry {
    handle: SpriteHandle,
    alloc: AllocId,
}

/// Decides where sprites go inside one atlas and remembers them by name.
pub struct AtlasRegistrar {
    atlas: AtlasIndex,
    extent: Extent<u32, Px>,
    padding: u32,
    allocator: AtlasAllocator,
    sprites: HashMap<Arc<str>, Entry>,
    next_local: u32,
}

impl AtlasRegistrar {
    pub(crate) fn new(atlas: AtlasIndex, extent: Extent<u32, Px>, padding: u32) -> Self {
        Self {
            atlas,
            extent,
            padding,
            allocator: AtlasAllocator::new(size2(extent.width as i32, extent.height as i32)),
            sprites: HashMap::new(),
            next_local: 0,
        }
    }

    pub fn atlas(&self) -> AtlasIndex {
        self.atlas
    }

    pub fn sprite_count(&self) -> usize {
        self.sprites.len()
    }

    pub fn find(&self, name: &str) -> Option<SpriteHandle> {
        self.sprites.get(name).map(|entry| entry.handle)
    }

    /// Finds room for a `width` x `height` sprite plus padding.
    pub(crate) fn reserve(&mut self, name: &str, width: u32, height: u32) -> Result<Reservation, AtlasError> {
        if self.sprites.contains_key(name) {
            return Err(AtlasError::DuplicateSprite {
                atlas: self.atlas,
                name: name.to_owned(),
            });
        }

        let padded = (
            width.saturating_add(2 * self.padding),
            height.saturating_add(2 * self.padding),
        );

        if width == 0 || height == 0 || padded.0 > self.extent.width || padded.1 > self.extent.height {
            return Err(AtlasError::RegionTooLarge {
                atlas: self.atlas,
                width,
                height,
            });
        }

        #[allow(clippy::cast_possible_wrap)]
        let allocation = self
            .allocator
            .allocate(size2(padded.0 as i32, padded.1 as i32))
            .ok_or(AtlasError::AtlasFull {
                atlas: self.atlas,
                width,
                height,
            })?;

        #[allow(clippy::cast_sign_loss)]
        let origin = Point::new(
            allocation.rectangle.min.x as u32 + self.padding,
            allocation.rectangle.min.y as u32 + self.padding,
        );

        let local = self.next_local;
        self.next_local = self.next_local.wrapping_add(1);

        Ok(Reservation {
            local,
            region: Rect::new(origin, Extent::new(width, height)),
            alloc: allocation.id,
        })
    }

    /// Gives back a reservation that will not be used.
    pub(crate) fn cancel(&mut self, reservation: Reservation) {
        self.allocator.deallocate(reservation.alloc);
    }

    pub(crate) fn commit(&mut self, name: Arc<str>, reservation: Reservation, handle: SpriteHandle) {
        self.sprites.insert(
            name,
            Entry {
                handle,
                alloc: reservation.alloc,
            },
        );
    }

    /// Frees the space of the sprite registered under `name`.
    pub(crate) fn release(&mut self, name: &str) -> Option<SpriteHandle> {
        let entry = self.sprites.remove(name)?;
        self.allocator.deallocate(entry.alloc);
        Some(entry.handle)
    }
}

impl std::fmt::Debug for AtlasRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasRegistrar")
            .field("atlas", &self.atlas)
            .field("extent", &self.extent)
            .field("sprites", &self.sprites.len())
            .finish_non_exhaustive()
    }
}
