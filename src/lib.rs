pub mod convert;
pub mod kdtree;
pub mod spatial;
pub mod triangle;

pub(crate) mod arena;

pub use kdtree::{
    BuildMethod, ErrorKind, Hit, KdTree, KdTreeConfig, KdTreeError, TraversalStack, TraversalStats,
    TreeStats,
};
pub use spatial::{raytracing::Ray, Aabb, Real, Scalar, V3c};
pub use triangle::{Triangle, TriangleStore};
