pub mod math;
pub mod raytracing;

pub use crate::spatial::math::{vector::V3c, Axis, Real, Scalar};
use crate::spatial::math::tolerance_at;

///####################################################################################
/// Aabb
///####################################################################################

/// Axis aligned bounding box given by its minimum and maximum corners.
/// A box with any `min` component above the matching `max` component contains nothing.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Aabb<T> {
    pub min: V3c<T>,
    pub max: V3c<T>,
}

impl<T: Scalar> Default for Aabb<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Scalar> Aabb<T> {
    pub fn new(min: V3c<T>, max: V3c<T>) -> Self {
        Self { min, max }
    }

    /// A box which contains nothing; extending it with any point yields the point itself
    pub fn empty() -> Self {
        Self {
            min: V3c::unit(T::infinity()),
            max: V3c::unit(T::neg_infinity()),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a V3c<T>>) -> Self {
        points
            .into_iter()
            .fold(Self::empty(), |bounds, point| bounds.extended(point))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// True if the box has no measurable extent on any axis, i.e. it collapsed into a point
    pub fn is_degenerate(&self) -> bool {
        self.is_empty()
            || Axis::ALL.iter().all(|axis| {
                self.extent(*axis) <= tolerance_at(self.max[*axis])
            })
    }

    pub fn extended(mut self, point: &V3c<T>) -> Self {
        self.min = self.min.min_by_component(point);
        self.max = self.max.max_by_component(point);
        self
    }

    pub fn union(&self, other: &Aabb<T>) -> Self {
        Self {
            min: self.min.min_by_component(&other.min),
            max: self.max.max_by_component(&other.max),
        }
    }

    /// Grows the box by `amount` in every direction
    pub fn padded(&self, amount: T) -> Self {
        Self {
            min: self.min - V3c::unit(amount),
            max: self.max + V3c::unit(amount),
        }
    }

    pub fn extent(&self, axis: Axis) -> T {
        self.max[axis] - self.min[axis]
    }

    pub fn size(&self) -> V3c<T> {
        self.max - self.min
    }

    pub fn midpoint(&self) -> V3c<T> {
        (self.min + self.max) * T::of(0.5)
    }

    /// Half the length of the diagonal; every point of the box is inside this distance from the midpoint
    pub fn radius(&self) -> T {
        self.size().length() * T::of(0.5)
    }

    /// The axis along which the box is the longest
    pub fn longest_axis(&self) -> Axis {
        self.size().dominant_axis()
    }

    pub fn surface_area(&self) -> T {
        if self.is_empty() {
            return T::zero();
        }
        let size = self.size();
        T::of(2.) * (size.x * size.y + size.y * size.z + size.z * size.x)
    }

    /// Cuts the box into two along the plane at `position` on the given axis.
    /// Returns the part below the plane first.
    pub fn split(&self, axis: Axis, position: T) -> (Aabb<T>, Aabb<T>) {
        let mut near = *self;
        let mut far = *self;
        near.max[axis] = position;
        far.min[axis] = position;
        (near, far)
    }
}
