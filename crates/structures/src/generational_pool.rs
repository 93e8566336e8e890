use std::{marker::PhantomData, num::NonZeroU64};

use crate::flagvec::FlagVec;

/// Nonzero handle to an item in a generational pool.
///
/// A handle packs the slot index and the generation the slot had when the
/// item was inserted. Once the item is removed the slot's generation moves
/// on, so every outstanding copy of the handle stops resolving without the
/// pool having to track them.
///
/// It is typed for a modicum of safety, but nothing prevents a handle from
/// being used against a different pool of the same type. Such a lookup is
/// memory safe, but will return whatever happens to live in that slot.
pub struct Handle<T>(NonZeroU64, PhantomData<fn() -> T>);

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index())
            .field("generation", &self.generation())
            .finish()
    }
}

impl<T> Handle<T> {
    fn new(index: u32, generation: u32) -> Self {
        debug_assert!(generation != 0, "generations start at 1");

        let value = u64::from(generation) << 32 | u64::from(index);
        // Generations start at 1, so the packed value is never zero.
        Self(NonZeroU64::new(value).unwrap_or(NonZeroU64::MIN), PhantomData)
    }

    /// The slot this handle points at.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.0.get() as u32
    }

    /// The generation of the slot at the time the handle was issued.
    #[must_use]
    pub fn generation(&self) -> u32 {
        (self.0.get() >> 32) as u32
    }
}

struct Slot<T> {
    // Survives removal so that the next occupant gets a fresh generation.
    generation: u32,
    value: Option<T>,
    next_free: Option<u32>,
}

/// An object pool that makes use of generational indices to avoid the ABA
/// problem.
///
/// Slots are recycled through an intrusive free list. A slot whose
/// generation would overflow is retired instead of being reused.
pub struct GenerationalPool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    is_free: FlagVec,
    len: usize,
}

impl<T> Default for GenerationalPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GenerationalPool<T> {
    /// Initializes a new empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            is_free: FlagVec::new(),
            len: 0,
        }
    }

    /// The number of live items in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the handle still refers to the item it was issued
    /// for.
    #[must_use]
    pub fn is_alive(&self, handle: Handle<T>) -> bool {
        self.slot(handle).is_some()
    }

    /// Returns a reference to the item identified by the given handle.
    ///
    /// ## Returns
    ///
    /// `Some(&T)` if the handle is valid and `None` otherwise.
    #[must_use]
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slot(handle).and_then(|slot| slot.value.as_ref())
    }

    /// Returns a mutable reference to the item identified by the given
    /// handle.
    ///
    /// ## Returns
    ///
    /// `Some(&mut T)` if the handle is valid and `None` otherwise.
    #[must_use]
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if !self.is_alive(handle) {
            return None;
        }

        self.slots
            .get_mut(handle.index() as usize)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Inserts a new value into the pool and returns a handle to it.
    ///
    /// ## Panics
    ///
    /// This function will panic if the pool would hold more than `u32::MAX`
    /// slots.
    #[must_use]
    pub fn insert(&mut self, value: T) -> Handle<T> {
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            self.free_head = slot.next_free.take();
            self.is_free.set(index as usize, false);

            slot.value = Some(value);
            self.len += 1;

            Handle::new(index, slot.generation)
        } else {
            let index = u32::try_from(self.slots.len()).expect("max u32::MAX slots!");

            self.slots.push(Slot {
                generation: 1,
                value: Some(value),
                next_free: None,
            });
            self.len += 1;

            Handle::new(index, 1)
        }
    }

    /// Removes the value identified by the given handle from the pool.
    ///
    /// The slot's generation is bumped, invalidating every copy of the
    /// handle.
    ///
    /// ## Returns
    ///
    /// Returns the value if the handle is valid and `None` otherwise.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        if !self.is_alive(handle) {
            return None;
        }

        let index = handle.index();
        let slot = &mut self.slots[index as usize];
        let value = slot.value.take();
        self.len -= 1;

        // If the slot is not saturated, we can reuse it.
        if slot.generation < u32::MAX {
            slot.generation += 1;
            slot.next_free = self.free_head;
            self.free_head = Some(index);
        }

        self.is_free.set(index as usize, true);

        value
    }

    /// Iterates over every live item along with its handle.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let index = u32::try_from(index).ok()?;
            slot.value
                .as_ref()
                .map(|value| (Handle::new(index, slot.generation), value))
        })
    }

    /// Removes every item for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let doomed: Vec<_> = self
            .iter()
            .filter(|(_, value)| !keep(*value))
            .map(|(handle, _)| handle)
            .collect();

        for handle in doomed {
            self.remove(handle);
        }
    }

    fn slot(&self, handle: Handle<T>) -> Option<&Slot<T>> {
        if self.is_free.get(handle.index() as usize) {
            return None;
        }

        let slot = self.slots.get(handle.index() as usize)?;
        (slot.generation == handle.generation() && slot.value.is_some()).then_some(slot)
    }
}
