use std::collections::HashMap;

use geometry::{grid_cells, Extent, Point, Rect, ScreenPx};

use crate::window::{NativeHandle, WindowId};

/// What a drag did to the dock layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DragOutcome {
    /// The window is not docked anywhere.
    NotDocked,
    /// The cursor is over the window's own cell.
    Unchanged,
    /// The window traded grid positions with another.
    Swapped(WindowId),
    /// The cursor left the parent; the window is floating again.
    Undocked,
}

/// Which windows are docked where, in grid order.
#[derive(Default)]
pub(crate) struct Docks {
    children: HashMap<NativeHandle, Vec<WindowId>>,
    parents: HashMap<WindowId, NativeHandle>,
}

impl Docks {
    /// Appends `window` to `parent`'s grid.
    ///
    /// ## Returns
    ///
    /// The parent the window was docked in before, if any.
    pub fn dock(&mut self, window: WindowId, parent: NativeHandle) -> Option<NativeHandle> {
        let previous = self.undock(window);
        self.children.entry(parent).or_default().push(window);
        self.parents.insert(window, parent);
        previous
    }

    /// Returns the parent the window was docked in.
    pub fn undock(&mut self, window: WindowId) -> Option<NativeHandle> {
        let parent = self.parents.remove(&window)?;

        if let Some(children) = self.children.get_mut(&parent) {
            children.retain(|w| *w != window);
            if children.is_empty() {
                self.children.remove(&parent);
            }
        }

        Some(parent)
    }

    pub fn parent_of(&self, window: WindowId) -> Option<NativeHandle> {
        self.parents.get(&window).copied()
    }

    pub fn children(&self, parent: NativeHandle) -> &[WindowId] {
        self.children
            .get(&parent)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Swaps the grid positions of two windows docked in the same parent.
    pub fn swap(&mut self, a: WindowId, b: WindowId) -> bool {
        let parent = match (self.parent_of(a), self.parent_of(b)) {
            (Some(pa), Some(pb)) if pa == pb => pa,
            _ => return false,
        };

        let Some(children) = self.children.get_mut(&parent) else {
            return false;
        };

        match (
            children.iter().position(|w| *w == a),
            children.iter().position(|w| *w == b),
        ) {
            (Some(i), Some(j)) => {
                children.swap(i, j);
                true
            }
            _ => false,
        }
    }

    /// The bounds of every child of `parent`, in grid order.
    pub fn cells(
        &self,
        parent: NativeHandle,
        area: Extent<u32, ScreenPx>,
        gap: u32,
    ) -> Vec<(WindowId, Rect<i32, ScreenPx>)> {
        let children = self.children(parent);
        children
            .iter()
            .copied()
            .zip(grid_cells(area, children.len(), gap))
            .collect()
    }

    /// The child whose cell contains `point`.
    pub fn hit(
        &self,
        parent: NativeHandle,
        area: Extent<u32, ScreenPx>,
        gap: u32,
        point: Point<i32, ScreenPx>,
    ) -> Option<WindowId> {
        self.cells(parent, area, gap)
            .into_iter()
            .find(|(_, cell)| cell.contains(point))
            .map(|(window, _)| window)
    }
}
