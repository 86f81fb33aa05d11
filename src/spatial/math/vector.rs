use crate::spatial::math::{Axis, Scalar};
use std::ops::{Add, AddAssign, Div, Index, IndexMut, Mul, Neg, Sub, SubAssign};

#[derive(Default, Clone, Copy, Debug, PartialEq, PartialOrd)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
#[repr(C)]
pub struct V3c<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Copy> V3c<T> {
    pub fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    pub fn unit(scale: T) -> Self {
        Self {
            x: scale,
            y: scale,
            z: scale,
        }
    }

    pub fn to_array(self) -> [T; 3] {
        [self.x, self.y, self.z]
    }
}

impl<T: Scalar> V3c<T> {
    pub fn length(&self) -> T {
        self.dot(self).sqrt()
    }

    pub fn normalized(self) -> V3c<T> {
        self / self.length()
    }

    pub fn abs(&self) -> V3c<T> {
        V3c::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    /// Component-wise minimum
    pub fn min_by_component(&self, other: &V3c<T>) -> V3c<T> {
        V3c::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    /// Component-wise maximum
    pub fn max_by_component(&self, other: &V3c<T>) -> V3c<T> {
        V3c::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    /// The largest absolute component value
    pub fn max_abs_component(&self) -> T {
        self.x.abs().max(self.y.abs()).max(self.z.abs())
    }

    /// The axis along which the vector has its largest absolute component
    pub fn dominant_axis(&self) -> Axis {
        let a = self.abs();
        if a.x >= a.y && a.x >= a.z {
            Axis::X
        } else if a.y >= a.z {
            Axis::Y
        } else {
            Axis::Z
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl<T> V3c<T>
where
    T: Mul<Output = T> + Add<Output = T> + Sub<Output = T> + Copy,
{
    pub fn dot(&self, other: &V3c<T>) -> T {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: V3c<T>) -> V3c<T> {
        V3c {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }
}

impl<T> Index<Axis> for V3c<T> {
    type Output = T;

    fn index(&self, axis: Axis) -> &T {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

impl<T> IndexMut<Axis> for V3c<T> {
    fn index_mut(&mut self, axis: Axis) -> &mut T {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }
}

impl<T> SubAssign for V3c<T>
where
    T: Copy + Sub<Output = T>,
{
    fn sub_assign(&mut self, other: V3c<T>) {
        *self = *self - other;
    }
}

impl<T> AddAssign for V3c<T>
where
    T: Copy + Add<Output = T>,
{
    fn add_assign(&mut self, other: V3c<T>) {
        *self = *self + other;
    }
}

impl<T: Add<Output = T>> Add for V3c<T> {
    type Output = V3c<T>;

    fn add(self, other: V3c<T>) -> V3c<T> {
        V3c {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl<T> Sub for V3c<T>
where
    T: Copy + Sub<Output = T>,
{
    type Output = V3c<T>;

    fn sub(self, other: V3c<T>) -> V3c<T> {
        V3c {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

impl<T: Neg<Output = T>> Neg for V3c<T> {
    type Output = V3c<T>;

    fn neg(self) -> V3c<T> {
        V3c {
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }
}

impl<T: Mul<Output = T> + Copy> Mul<T> for V3c<T> {
    type Output = V3c<T>;

    fn mul(self, scalar: T) -> V3c<T> {
        V3c {
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
        }
    }
}

impl<T: Mul<Output = T> + Copy> Mul<V3c<T>> for V3c<T> {
    type Output = V3c<T>;

    fn mul(self, other: V3c<T>) -> V3c<T> {
        V3c {
            x: self.x * other.x,
            y: self.y * other.y,
            z: self.z * other.z,
        }
    }
}

impl<T: Div<Output = T> + Copy> Div<T> for V3c<T> {
    type Output = V3c<T>;

    fn div(self, scalar: T) -> V3c<T> {
        V3c {
            x: self.x / scalar,
            y: self.y / scalar,
            z: self.z / scalar,
        }
    }
}

impl<T: Copy> From<[T; 3]> for V3c<T> {
    fn from(vec: [T; 3]) -> V3c<T> {
        V3c::new(vec[0], vec[1], vec[2])
    }
}

impl<T: Copy> From<V3c<T>> for [T; 3] {
    fn from(vec: V3c<T>) -> [T; 3] {
        vec.to_array()
    }
}

impl From<V3c<f32>> for V3c<f64> {
    fn from(vec: V3c<f32>) -> V3c<f64> {
        V3c::new(vec.x as f64, vec.y as f64, vec.z as f64)
    }
}

impl From<V3c<f64>> for V3c<f32> {
    fn from(vec: V3c<f64>) -> V3c<f32> {
        V3c::new(vec.x as f32, vec.y as f32, vec.z as f32)
    }
}
