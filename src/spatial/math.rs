pub mod vector;

use std::fmt::{Debug, Display};

///####################################################################################
/// Scalar
///####################################################################################

/// Floating point type every coordinate of the crate is expressed in.
/// Implemented for `f32` and `f64`; a cache written with one width is never read with the other.
pub trait Scalar:
    num_traits::Float + Default + Debug + Display + Send + Sync + bytemuck::Pod + 'static
{
    /// Width of the type in bits, stored in cache headers
    const BITS: u32;

    /// Relative tolerance for geometric comparisons in this precision
    fn tolerance() -> Self;

    /// Converts an `f64` literal into the scalar type, rounding when narrowing
    fn of(value: f64) -> Self;

    fn as_f64(self) -> f64;
}

impl Scalar for f32 {
    const BITS: u32 = 32;

    fn tolerance() -> Self {
        0.00001
    }

    fn of(value: f64) -> Self {
        value as f32
    }

    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Scalar for f64 {
    const BITS: u32 = 64;

    fn tolerance() -> Self {
        0.000_000_001
    }

    fn of(value: f64) -> Self {
        value
    }

    fn as_f64(self) -> f64 {
        self
    }
}

/// The precision selected at build time through the `single_precision` feature
#[cfg(feature = "single_precision")]
pub type Real = f32;

/// The precision selected at build time through the `single_precision` feature
#[cfg(not(feature = "single_precision"))]
pub type Real = f64;

///####################################################################################
/// Axis
///####################################################################################
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// The two axes perpendicular to this one, in cyclic order
    pub fn others(self) -> (Axis, Axis) {
        match self {
            Axis::X => (Axis::Y, Axis::Z),
            Axis::Y => (Axis::Z, Axis::X),
            Axis::Z => (Axis::X, Axis::Y),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u32) -> Option<Axis> {
        match index {
            0 => Some(Axis::X),
            1 => Some(Axis::Y),
            2 => Some(Axis::Z),
            _ => None,
        }
    }
}

/// Absolute tolerance for values of the given magnitude; never below the tolerance around 1
pub(crate) fn tolerance_at<T: Scalar>(magnitude: T) -> T {
    T::tolerance() * T::one().max(magnitude.abs())
}
