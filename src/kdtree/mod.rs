pub mod build;
pub mod raytracing;
pub mod types;


pub use crate::spatial::{math::vector::V3c, raytracing::Ray, Aabb, Real, Scalar};
pub use raytracing::TraversalStack;
pub use types::{
    BuildMethod, ErrorKind, Hit, KdTreeConfig, KdTreeError, TraversalStats, TreeStats,
};

use crate::arena::{Arena, ItemKey};
use crate::triangle::{Triangle, TriangleStore};
use std::{
    ops::Range,
    sync::atomic::{AtomicU64, Ordering},
};
use types::NodeContent;

/// Key of the root node; the node arena is laid out in pre-order
pub(crate) const ROOT_NODE: ItemKey = 0;

/// The partition produced by the builder or decoded from a cache
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedTree<T> {
    pub(crate) nodes: Arena<NodeContent<T>>,
    /// Triangle indices of every leaf, each leaf owning a contiguous range
    pub(crate) leaf_triangles: Arena<u32>,
    pub(crate) bounds: Aabb<T>,
    pub(crate) stats: TreeStats,
}

impl<T: Scalar> PreparedTree<T> {
    pub(crate) fn leaf_range(&self, start: u32, len: u32) -> &[u32] {
        &self.leaf_triangles.as_slice()[start as usize..(start as usize + len as usize)]
    }
}

/// Static k-d tree over a set of triangles, each carrying a payload of type `P`.
/// Triangles are pushed first, then the tree is prepared exactly once, after which
/// it is read-only and can be traversed from any number of threads at once.
pub struct KdTree<P, T: Scalar = Real> {
    config: KdTreeConfig,
    store: TriangleStore<P, T>,
    prepared: Option<PreparedTree<T>>,
    rays_fired: AtomicU64,
}

impl<P, T: Scalar> Default for KdTree<P, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, T: Scalar> KdTree<P, T> {
    /// creates an empty kd-tree with the default configuration
    pub fn new() -> Self {
        Self {
            config: KdTreeConfig::default(),
            store: TriangleStore::new(),
            prepared: None,
            rays_fired: AtomicU64::new(0),
        }
    }

    /// creates an empty kd-tree, which will be shaped by the given configuration
    pub fn with_config(config: KdTreeConfig) -> Result<Self, KdTreeError> {
        config.validate()?;
        log::debug!("kd-tree configured: {:?}", config);
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    pub(crate) fn from_prepared(
        config: KdTreeConfig,
        store: TriangleStore<P, T>,
        prepared: PreparedTree<T>,
    ) -> Self {
        Self {
            config,
            store,
            prepared: Some(prepared),
            rays_fired: AtomicU64::new(0),
        }
    }

    fn ensure_mutable(&self) -> Result<(), KdTreeError> {
        if self.is_prepared() {
            return Err(KdTreeError::AlreadyPrepared);
        }
        Ok(())
    }

    /// Adds a triangle to the tree, returning with its index
    pub fn push(&mut self, vertices: [V3c<T>; 3], payload: P) -> Result<usize, KdTreeError> {
        self.ensure_mutable()?;
        self.store.push(vertices, payload)
    }

    /// Adds every face of an indexed mesh with one payload each; either all of them or none are added
    pub fn push_indexed(
        &mut self,
        positions: &[V3c<T>],
        faces: &[[u32; 3]],
        payloads: impl IntoIterator<Item = P>,
    ) -> Result<Range<usize>, KdTreeError> {
        self.ensure_mutable()?;
        self.store.push_indexed(positions, faces, payloads)
    }

    /// Makes room for `additional` more triangles
    pub fn reserve(&mut self, additional: usize) -> Result<(), KdTreeError> {
        self.ensure_mutable()?;
        self.store.reserve(additional)
    }

    /// Builds the partition over the pushed triangles. Can be called only once;
    /// on failure the tree stays unprepared without any partial state.
    pub fn prepare(&mut self) -> Result<(), KdTreeError> {
        if self.is_prepared() {
            return Err(KdTreeError::AlreadyBuilt);
        }
        self.prepared = Some(build::build(&self.store, &self.config)?);
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    pub(crate) fn prepared(&self) -> Result<&PreparedTree<T>, KdTreeError> {
        self.prepared.as_ref().ok_or(KdTreeError::NotPrepared)
    }

    pub fn config(&self) -> &KdTreeConfig {
        &self.config
    }

    pub fn method(&self) -> BuildMethod {
        self.config.method
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn triangle(&self, index: usize) -> Option<&Triangle<T>> {
        self.store.triangle(index)
    }

    pub fn payload(&self, index: usize) -> Option<&P> {
        self.store.payload(index)
    }

    pub fn triangles(&self) -> &TriangleStore<P, T> {
        &self.store
    }

    /// Bounding box of the prepared tree, slightly larger than the bounds of its triangles
    pub fn bounds(&self) -> Option<Aabb<T>> {
        self.prepared.as_ref().map(|prepared| prepared.bounds)
    }

    pub fn centroid(&self) -> Option<V3c<T>> {
        self.bounds()
            .filter(|bounds| !bounds.is_empty())
            .map(|bounds| bounds.midpoint())
    }

    /// Radius of the sphere around the centroid enclosing the whole tree
    pub fn radius(&self) -> Option<T> {
        self.bounds()
            .filter(|bounds| !bounds.is_empty())
            .map(|bounds| bounds.radius())
    }

    pub fn stats(&self) -> Option<&TreeStats> {
        self.prepared.as_ref().map(|prepared| &prepared.stats)
    }

    /// Number of traversals started on this tree, from all threads
    pub fn rays_fired(&self) -> u64 {
        self.rays_fired.load(Ordering::Relaxed)
    }

    pub(crate) fn count_ray(&self) {
        self.rays_fired.fetch_add(1, Ordering::Relaxed);
    }
}
