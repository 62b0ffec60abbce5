//! Integer axis-aligned rectangle algebra.
//!
//! All coordinates are signed; width/height are always non-negative after
//! any operation defined here. A zero-area rectangle is a valid "empty"
//! value, not an error.

/// An axis-aligned integer rectangle: `(x, y)` is the top-left corner,
/// `width`/`height` extend right/down from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// How one rectangle relates to another under intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The two rectangles do not overlap at all.
    Disjoint,
    /// `b` fully covers `a`.
    Contained,
    /// The rectangles overlap, but `b` does not fully cover `a`.
    Partial,
}

impl Rect {
    /// Construct a rectangle, normalizing negative width/height to zero.
    pub fn init(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width: width.max(0),
            height: height.max(0),
        }
    }

    /// A zero-area rectangle at the origin.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn left(&self) -> i32 {
        self.x
    }

    pub fn top(&self) -> i32 {
        self.y
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Grow `self` so that it also covers `other`, taking the bounding box
    /// of the two. Idempotent and commutative (see tests below).
    pub fn union_into(&mut self, other: &Rect) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = *other;
            return;
        }

        let left = self.left().min(other.left());
        let top = self.top().min(other.top());
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());

        self.x = left;
        self.y = top;
        self.width = right - left;
        self.height = bottom - top;
    }

    /// Return the union of two rectangles without mutating either.
    pub fn union(a: &Rect, b: &Rect) -> Rect {
        let mut out = *a;
        out.union_into(b);
        out
    }

    /// Shrink `self` to its intersection with `bound`. May produce an empty
    /// rectangle. Idempotent: `clip(clip(a, m), m) == clip(a, m)`.
    pub fn clip_into(&mut self, bound: &Rect) {
        let left = self.left().max(bound.left());
        let top = self.top().max(bound.top());
        let right = self.right().min(bound.right());
        let bottom = self.bottom().min(bound.bottom());

        if right <= left || bottom <= top {
            *self = Rect::empty();
            return;
        }

        self.x = left;
        self.y = top;
        self.width = right - left;
        self.height = bottom - top;
    }

    /// Return the intersection of two rectangles without mutating either.
    pub fn clip(a: &Rect, bound: &Rect) -> Rect {
        let mut out = *a;
        out.clip_into(bound);
        out
    }

    /// Enlarge `self` symmetrically so width and height are multiples of
    /// `divisor`, then shift it to fit inside `bound` without growing past
    /// `bound`'s size. Fails if `divisor <= 0`.
    pub fn align_to_grid(&mut self, divisor: i32, bound: &Rect) -> Result<(), GridAlignError> {
        if divisor <= 0 {
            return Err(GridAlignError::NonPositiveDivisor);
        }

        let aligned_width = round_up(self.width, divisor).min(bound.width.max(0));
        let aligned_height = round_up(self.height, divisor).min(bound.height.max(0));

        let grow_w = aligned_width - self.width;
        let grow_h = aligned_height - self.height;

        // Grow symmetrically (extra pixel, if any, goes to the trailing side).
        let mut x = self.x - grow_w / 2;
        let mut y = self.y - grow_h / 2;
        let mut width = aligned_width;
        let mut height = aligned_height;

        // Shift inside bound without exceeding bound's extents.
        if x < bound.left() {
            x = bound.left();
        }
        if y < bound.top() {
            y = bound.top();
        }
        if x + width > bound.right() {
            x = bound.right() - width;
        }
        if y + height > bound.bottom() {
            y = bound.bottom() - height;
        }

        // If it still doesn't fit (bound smaller than the aligned size),
        // clamp to bound entirely.
        if width > bound.width || x < bound.left() {
            x = bound.left();
            width = bound.width.max(0);
        }
        if height > bound.height || y < bound.top() {
            y = bound.top();
            height = bound.height.max(0);
        }

        self.x = x;
        self.y = y;
        self.width = width.max(0);
        self.height = height.max(0);

        Ok(())
    }

    /// Classify how `self` relates to `other` under intersection.
    pub fn classify(&self, other: &Rect) -> Classification {
        let intersection = Rect::clip(self, other);
        if intersection.is_empty() {
            Classification::Disjoint
        } else if intersection == *self {
            Classification::Contained
        } else {
            Classification::Partial
        }
    }

    /// Carve one axis-aligned slab of `self` that lies outside `keep` into
    /// `out`, shrinking `self` to the remaining part, and return `true`.
    /// Returns `false` (leaving both untouched) once `self` no longer needs
    /// splitting, i.e. `self` is fully inside `keep` or disjoint from it.
    ///
    /// Carving order is top / left / bottom / right; callers iterate until
    /// this returns `false` to partition the original rectangle.
    pub fn clip_and_split(&mut self, keep: &Rect, out: &mut Rect) -> bool {
        match self.classify(keep) {
            Classification::Contained => false,
            Classification::Disjoint => false,
            Classification::Partial => {
                let overlap = Rect::clip(self, keep);

                // Top slab: the part of self above the overlap.
                if overlap.top() > self.top() {
                    *out = Rect::init(self.x, self.y, self.width, overlap.top() - self.top());
                    let new_top = overlap.top();
                    self.height -= new_top - self.y;
                    self.y = new_top;
                    return true;
                }

                // Left slab: the part of self left of the overlap.
                if overlap.left() > self.left() {
                    *out = Rect::init(self.x, self.y, overlap.left() - self.left(), self.height);
                    let new_left = overlap.left();
                    self.width -= new_left - self.x;
                    self.x = new_left;
                    return true;
                }

                // Bottom slab: the part of self below the overlap.
                if overlap.bottom() < self.bottom() {
                    *out = Rect::init(
                        self.x,
                        overlap.bottom(),
                        self.width,
                        self.bottom() - overlap.bottom(),
                    );
                    self.height = overlap.bottom() - self.y;
                    return true;
                }

                // Right slab: the part of self right of the overlap.
                if overlap.right() < self.right() {
                    *out = Rect::init(
                        overlap.right(),
                        self.y,
                        self.right() - overlap.right(),
                        self.height,
                    );
                    self.width = overlap.right() - self.x;
                    return true;
                }

                false
            }
        }
    }
}

fn round_up(value: i32, divisor: i32) -> i32 {
    let value = value.max(0);
    let remainder = value % divisor;
    if remainder == 0 {
        value
    } else {
        value + (divisor - remainder)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GridAlignError {
    #[error("grid divisor must be positive")]
    NonPositiveDivisor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_is_idempotent_and_commutative() {
        let a = Rect::init(0, 0, 10, 10);
        let b = Rect::init(5, 5, 10, 10);

        let ab = Rect::union(&a, &b);
        let abb = Rect::union(&ab, &b);
        assert_eq!(ab, abb);

        let ba = Rect::union(&b, &a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn clip_is_idempotent() {
        let a = Rect::init(-5, -5, 20, 20);
        let m = Rect::init(0, 0, 10, 10);

        let once = Rect::clip(&a, &m);
        let twice = Rect::clip(&once, &m);
        assert_eq!(once, twice);
    }

    #[test]
    fn grid_alignment_fits_and_is_multiple() {
        let bound = Rect::init(0, 0, 1024, 768);
        let mut a = Rect::init(100, 100, 37, 19);
        a.align_to_grid(64, &bound).unwrap();

        assert_eq!(a.width % 64, 0);
        assert_eq!(a.height % 64, 0);
        assert!(a.left() >= bound.left());
        assert!(a.top() >= bound.top());
        assert!(a.right() <= bound.right());
        assert!(a.bottom() <= bound.bottom());
    }

    #[test]
    fn grid_alignment_rejects_non_positive_divisor() {
        let bound = Rect::init(0, 0, 100, 100);
        let mut a = Rect::init(0, 0, 10, 10);
        assert!(a.align_to_grid(0, &bound).is_err());
        assert!(a.align_to_grid(-1, &bound).is_err());
    }

    #[test]
    fn clip_and_split_partitions_original() {
        let original = Rect::init(0, 0, 30, 30);
        let keep = Rect::init(10, 10, 10, 10);

        let mut a = original;
        let mut pieces = Vec::new();
        let mut out = Rect::empty();
        while a.clip_and_split(&keep, &mut out) {
            pieces.push(out);
        }

        // Exactly one remaining piece intersects `keep`.
        let intersecting = pieces
            .iter()
            .chain(std::iter::once(&a))
            .filter(|r| !Rect::clip(r, &keep).is_empty())
            .count();
        assert_eq!(intersecting, 1);

        // Union of all emitted pieces plus the remainder covers the original area.
        let mut total_area = a.width as i64 * a.height as i64;
        for p in &pieces {
            total_area += p.width as i64 * p.height as i64;
        }
        assert_eq!(total_area, original.width as i64 * original.height as i64);
    }

    #[test]
    fn classify_contained_vs_partial_vs_disjoint() {
        let a = Rect::init(0, 0, 10, 10);
        let contains_a = Rect::init(-5, -5, 20, 20);
        let overlaps_a = Rect::init(5, 5, 20, 20);
        let disjoint_from_a = Rect::init(100, 100, 5, 5);

        assert_eq!(a.classify(&contains_a), Classification::Contained);
        assert_eq!(a.classify(&overlaps_a), Classification::Partial);
        assert_eq!(a.classify(&disjoint_from_a), Classification::Disjoint);
    }
}
