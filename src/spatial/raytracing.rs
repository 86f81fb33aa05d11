use crate::spatial::{math::Axis, Aabb, Scalar, V3c};


#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Ray<T> {
    pub origin: V3c<T>,
    pub direction: V3c<T>,
    /// Recursion depth of the ray inside the caller's shading, untouched by traversal
    pub depth: u32,
    /// Depth of the deepest kd-tree node the last traversal of this ray reached
    pub kdtree_depth: u32,
}

impl<T: Scalar> Ray<T> {
    /// Creates a ray with the direction normalized, so distances along it are metric
    pub fn new(origin: V3c<T>, direction: V3c<T>) -> Self {
        Self {
            origin,
            direction: direction.normalized(),
            depth: 0,
            kdtree_depth: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.origin.is_finite() && self.direction.is_finite() && T::zero() < self.direction.length()
    }

    pub fn point_at(&self, d: T) -> V3c<T> {
        self.origin + self.direction * d
    }
}

impl<T: Scalar> Aabb<T> {
    /// Tells the parametric interval in which the ray is inside the box.
    /// The interval is clamped to start at the ray origin; `None` if the ray misses the box
    /// or the box is entirely behind the origin.
    /// Axes the ray is parallel to only constrain the origin coordinate, avoiding `0 * inf`.
    pub fn intersect_ray(&self, ray: &Ray<T>) -> Option<(T, T)> {
        debug_assert!(ray.is_valid());
        if self.is_empty() {
            return None;
        }

        let mut tmin = T::zero();
        let mut tmax = T::infinity();
        for axis in Axis::ALL {
            let origin = ray.origin[axis];
            let direction = ray.direction[axis];
            if T::zero() == direction {
                if origin < self.min[axis] || origin > self.max[axis] {
                    return None;
                }
                continue;
            }

            let inverse = T::one() / direction;
            let t1 = (self.min[axis] - origin) * inverse;
            let t2 = (self.max[axis] - origin) * inverse;
            tmin = tmin.max(t1.min(t2));
            tmax = tmax.min(t1.max(t2));
        }

        if tmin > tmax {
            // ray doesn't intersect the box, or the box is behind it
            return None;
        }
        Some((tmin, tmax))
    }
}
