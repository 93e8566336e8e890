use std::ops::{Add, AddAssign, Div, Sub};

use euclid::num::One;
pub use euclid::{Point2D as Point, Size2D as Extent, Vector2D as Offset};

/// Texel space. Sizes and positions inside an image or texture atlas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Px();

/// Desktop space. Window positions and client areas as reported by the
/// platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenPx();

/// Normalized texture coordinates, `0.0..=1.0` on both axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Uv();

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect<T, U>(euclid::Box2D<T, U>);

impl<T, U> Rect<T, U> {
    pub fn new(origin: Point<T, U>, extent: Extent<T, U>) -> Self
    where
        T: Copy + Add<T, Output = T>,
    {
        Self(euclid::Box2D::from_origin_and_size(origin, extent))
    }

    pub fn from_corners(min: Point<T, U>, max: Point<T, U>) -> Self {
        Self(euclid::Box2D::new(min, max))
    }

    pub fn top_left(&self) -> Point<T, U>
    where
        T: Copy,
    {
        self.0.min
    }

    pub fn bottom_right(&self) -> Point<T, U>
    where
        T: Copy,
    {
        self.0.max
    }

    pub fn left(&self) -> T
    where
        T: Copy,
    {
        self.0.min.x
    }

    pub fn top(&self) -> T
    where
        T: Copy,
    {
        self.0.min.y
    }

    pub fn right(&self) -> T
    where
        T: Copy,
    {
        self.0.max.x
    }

    pub fn bottom(&self) -> T
    where
        T: Copy,
    {
        self.0.max.y
    }

    pub fn extent(&self) -> Extent<T, U>
    where
        T: Copy + Sub<T, Output = T>,
    {
        self.0.size()
    }

    pub fn center(&self) -> Point<T, U>
    where
        T: Copy + One + Add<Output = T> + Div<Output = T>,
    {
        self.0.center()
    }

    /// Returns true if `point` lies inside the rect. The right and bottom
    /// edges are exclusive.
    pub fn contains(&self, point: Point<T, U>) -> bool
    where
        T: Copy + PartialOrd,
    {
        self.0.contains(point)
    }

    pub fn intersection(&self, rhs: &Rect<T, U>) -> Option<Rect<T, U>>
    where
        T: Copy + PartialOrd,
    {
        self.0.intersection(&rhs.0).map(|r| Rect(r))
    }
}

impl<T, U> Add<Offset<T, U>> for Rect<T, U>
where
    T: Copy + Add<T, Output = T>,
{
    type Output = Self;

    fn add(self, rhs: Offset<T, U>) -> Self::Output {
        Self(self.0.translate(rhs))
    }
}

impl<T, U> AddAssign<Offset<T, U>> for Rect<T, U>
where
    T: Copy + Add<T, Output = T>,
{
    fn add_assign(&mut self, rhs: Offset<T, U>) {
        self.0 = self.0.translate(rhs);
    }
}

/// Clamps both dimensions of an extent to at least 1.
#[must_use]
pub fn at_least_one<U>(extent: Extent<u32, U>) -> Extent<u32, U> {
    Extent::new(extent.width.max(1), extent.height.max(1))
}

/// A sub-region of a texture expressed in normalized coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UvRect {
    pub min: Point<f32, Uv>,
    pub max: Point<f32, Uv>,
}

impl UvRect {
    /// The whole texture.
    pub const FULL: Self = Self {
        min: Point::new(0.0, 0.0),
        max: Point::new(1.0, 1.0),
    };

    /// Normalizes `region` against the size of the texture that contains
    /// it.
    ///
    /// ## Panics
    ///
    /// Panics if `texture` has a zero dimension.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_region(region: Rect<u32, Px>, texture: Extent<u32, Px>) -> Self {
        assert!(texture.width > 0 && texture.height > 0, "empty texture");

        let w = texture.width as f32;
        let h = texture.height as f32;

        Self {
            min: Point::new(region.left() as f32 / w, region.top() as f32 / h),
            max: Point::new(region.right() as f32 / w, region.bottom() as f32 / h),
        }
    }

    /// Interpolates between the corners of the rect. `(0, 0)` is `min` and
    /// `(1, 1)` is `max`.
    #[must_use]
    pub fn lerp(&self, u: f32, v: f32) -> Point<f32, Uv> {
        Point::new(
            self.min.x + (self.max.x - self.min.x) * u,
            self.min.y + (self.max.y - self.min.y) * v,
        )
    }
}

/// Returns the `(columns, rows)` of the near-square grid that holds `count`
/// cells.
#[must_use]
pub fn grid_shape(count: usize) -> (u32, u32) {
    if count == 0 {
        return (0, 0);
    }

    let mut columns = 1usize;
    while columns * columns < count {
        columns += 1;
    }

    let rows = (count + columns - 1) / columns;

    (
        u32::try_from(columns).unwrap_or(u32::MAX),
        u32::try_from(rows).unwrap_or(u32::MAX),
    )
}

/// Splits `area` into `count` equally sized cells laid out row-major in a
/// near-square grid, with `gap` pixels between cells and around the edges.
///
/// Cells never collapse below 1x1, even if the gaps eat the whole area.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn grid_cells(area: Extent<u32, ScreenPx>, count: usize, gap: u32) -> Vec<Rect<i32, ScreenPx>> {
    // Origin plus extent must still fit in an i32.
    const LIMIT: u32 = i32::MAX as u32 / 2;
    let screen = |v: u32| v.min(LIMIT) as i32;

    let (columns, rows) = grid_shape(count);
    if count == 0 {
        return Vec::new();
    }

    let cell_width = (area
        .width
        .saturating_sub(gap.saturating_mul(columns + 1))
        / columns)
        .max(1);
    let cell_height = (area.height.saturating_sub(gap.saturating_mul(rows + 1)) / rows).max(1);

    (0..count)
        .map(|i| {
            let column = i as u32 % columns;
            let row = i as u32 / columns;

            let x = gap.saturating_add(column.saturating_mul(cell_width.saturating_add(gap)));
            let y = gap.saturating_add(row.saturating_mul(cell_height.saturating_add(gap)));

            Rect::new(
                Point::new(screen(x), screen(y)),
                Extent::new(screen(cell_width), screen(cell_height)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_shape_is_near_square() {
        assert_eq!(grid_shape(0), (0, 0));
        assert_eq!(grid_shape(1), (1, 1));
        assert_eq!(grid_shape(2), (2, 1));
        assert_eq!(grid_shape(4), (2, 2));
        assert_eq!(grid_shape(5), (3, 2));
        assert_eq!(grid_shape(9), (3, 3));
        assert_eq!(grid_shape(10), (4, 3));
    }

    #[test]
    fn grid_cells_fill_area() {
        let cells = grid_cells(Extent::new(800, 600), 4, 0);
        assert_eq!(cells.len(), 4);

        assert_eq!(cells[0].top_left(), Point::new(0, 0));
        assert_eq!(cells[0].extent(), Extent::new(400, 300));
        assert_eq!(cells[1].top_left(), Point::new(400, 0));
        assert_eq!(cells[2].top_left(), Point::new(0, 300));
        assert_eq!(cells[3].bottom_right(), Point::new(800, 600));
    }

    #[test]
    fn grid_cells_with_gap() {
        let cells = grid_cells(Extent::new(110, 50), 2, 10);
        assert_eq!(cells[0], Rect::new(Point::new(10, 10), Extent::new(40, 30)));
        assert_eq!(cells[1], Rect::new(Point::new(60, 10), Extent::new(40, 30)));
    }

    #[test]
    fn grid_cells_never_collapse() {
        let cells = grid_cells(Extent::new(3, 3), 9, 4);
        assert!(cells.iter().all(|c| c.extent().width >= 1 && c.extent().height >= 1));
    }

    #[test]
    fn grid_cells_survive_huge_gaps() {
        let cells = grid_cells(Extent::new(200, 100), 4, u32::MAX);
        assert_eq!(cells.len(), 4);
        assert!(cells.iter().all(|c| c.extent() == Extent::new(1, 1)));
        assert!(cells.iter().all(|c| c.left() >= 0 && c.top() >= 0));
    }

    #[test]
    fn rect_contains_is_half_open() {
        let rect: Rect<i32, ScreenPx> = Rect::new(Point::new(0, 0), Extent::new(10, 10));
        assert!(rect.contains(Point::new(0, 0)));
        assert!(rect.contains(Point::new(9, 9)));
        assert!(!rect.contains(Point::new(10, 5)));
    }

    #[test]
    fn uv_from_region() {
        let uv = UvRect::from_region(
            Rect::new(Point::new(64, 128), Extent::new(64, 32)),
            Extent::new(256, 256),
        );

        assert_eq!(uv.min, Point::new(0.25, 0.5));
        assert_eq!(uv.max, Point::new(0.5, 0.625));
        assert_eq!(uv.lerp(0.5, 0.5), Point::new(0.375, 0.5625));
    }

    #[test]
    fn clamp_extent() {
        assert_eq!(at_least_one::<Px>(Extent::new(0, 0)), Extent::new(1, 1));
        assert_eq!(at_least_one::<Px>(Extent::new(5, 0)), Extent::new(5, 1));
    }
}
