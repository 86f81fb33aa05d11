use crate::arena::ItemKey;
use crate::spatial::{math::Axis, V3c};
use thiserror::Error;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// error types during usage or creation of the kd-tree
#[derive(Error, Debug)]
pub enum KdTreeError {
    /// The triangle has collinear, coincident or non-finite vertices
    #[error("Triangle {index} is degenerate")]
    DegenerateGeometry { index: usize },

    /// An indexed face refers to a vertex outside of the given position array
    #[error("Face {face} refers to vertex {vertex}, but only {vertex_count} vertices are given")]
    InvalidTriangleIndex {
        face: usize,
        vertex: u32,
        vertex_count: usize,
    },

    #[error("Invalid kd-tree configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("Expected {expected} payloads, got {actual}")]
    PayloadCountMismatch { expected: usize, actual: usize },

    /// Allocation failed for the named storage; partial results are discarded
    #[error("Unable to allocate memory for {0}")]
    ResourceExhausted(&'static str),

    #[error("The kd-tree is already built")]
    AlreadyBuilt,

    #[error("The kd-tree is already prepared, triangles can no longer be added")]
    AlreadyPrepared,

    #[error("The kd-tree needs to be prepared before it can be traversed")]
    NotPrepared,

    #[error("Invalid kd-tree cache: {0}")]
    CacheFormatInvalid(String),

    #[error("Cache was written with {found} bit precision, expected {expected} bit")]
    PrecisionMismatch { expected: u32, found: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`KdTreeError`] values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected input; the operation failed, the tree is unchanged
    Validation,
    /// Allocation failure; conventionally fatal
    ResourceExhausted,
    /// Operation invoked in the wrong lifecycle state
    State,
    /// Malformed or incompatible cache data
    Format,
    Io,
}

impl KdTreeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KdTreeError::DegenerateGeometry { .. }
            | KdTreeError::InvalidTriangleIndex { .. }
            | KdTreeError::InvalidConfig(_)
            | KdTreeError::PayloadCountMismatch { .. } => ErrorKind::Validation,
            KdTreeError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            KdTreeError::AlreadyBuilt | KdTreeError::AlreadyPrepared | KdTreeError::NotPrepared => {
                ErrorKind::State
            }
            KdTreeError::CacheFormatInvalid(_) | KdTreeError::PrecisionMismatch { .. } => {
                ErrorKind::Format
            }
            KdTreeError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid_cache(reason: impl Into<String>) -> Self {
        KdTreeError::CacheFormatInvalid(reason.into())
    }
}

///####################################################################################
/// Nodes
///####################################################################################

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum NodeContent<T> {
    /// Triangles referenced by the leaf are stored in the leaf index arena at `start..start + len`
    Leaf { start: u32, len: u32 },
    /// `near` covers the half-space below `split` on `axis`, `far` the one above it
    Internal {
        axis: Axis,
        split: T,
        near: ItemKey,
        far: ItemKey,
    },
}

impl<T> NodeContent<T> {
    pub(crate) fn empty_leaf() -> Self {
        NodeContent::Leaf { start: 0, len: 0 }
    }
}

///####################################################################################
/// Configuration
///####################################################################################

/// Split policy used while building the kd-tree
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum BuildMethod {
    /// Bisects the longest axis of every node at its midpoint
    Fast,
    /// Places splits where the estimated traversal cost is the lowest
    #[default]
    Optimal,
}

impl BuildMethod {
    pub(crate) fn tag(&self) -> &'static str {
        match self {
            BuildMethod::Fast => "fast",
            BuildMethod::Optimal => "optimal",
        }
    }

    pub(crate) fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "fast" => Some(BuildMethod::Fast),
            "optimal" => Some(BuildMethod::Optimal),
            _ => None,
        }
    }
}

/// Tree shape parameters
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct KdTreeConfig {
    pub method: BuildMethod,

    /// Nodes with at most this many triangles become leaves
    pub max_leaf_size: usize,

    /// Nodes at this depth become leaves regardless of their size.
    /// Derived from the number of triangles when not set
    pub max_depth: Option<u32>,

    /// Estimated cost of stepping through an internal node
    pub traversal_cost: f64,

    /// Estimated cost of testing a single triangle
    pub intersection_cost: f64,

    /// Upper limit of the split candidates evaluated per axis by the optimal method
    pub sah_bins: usize,
}

impl Default for KdTreeConfig {
    fn default() -> Self {
        Self {
            method: BuildMethod::default(),
            max_leaf_size: 4,
            max_depth: None,
            traversal_cost: 1.,
            intersection_cost: 1.5,
            sah_bins: 32,
        }
    }
}

impl KdTreeConfig {
    /// Hard limit for the depth of any kd-tree
    pub const DEPTH_LIMIT: u32 = 64;

    pub fn with_method(mut self, method: BuildMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_max_leaf_size(mut self, max_leaf_size: usize) -> Self {
        self.max_leaf_size = max_leaf_size;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn with_costs(mut self, traversal_cost: f64, intersection_cost: f64) -> Self {
        self.traversal_cost = traversal_cost;
        self.intersection_cost = intersection_cost;
        self
    }

    pub fn with_sah_bins(mut self, sah_bins: usize) -> Self {
        self.sah_bins = sah_bins;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), KdTreeError> {
        if 0 == self.max_leaf_size || self.max_leaf_size > u32::MAX as usize {
            return Err(KdTreeError::InvalidConfig(
                "max_leaf_size must be positive and fit into 32 bits",
            ));
        }
        if self.max_depth.is_some_and(|d| 0 == d || d > Self::DEPTH_LIMIT) {
            return Err(KdTreeError::InvalidConfig("max_depth must be between 1 and 64"));
        }
        if !(self.traversal_cost.is_finite() && 0. <= self.traversal_cost)
            || !(self.intersection_cost.is_finite() && 0. < self.intersection_cost)
        {
            return Err(KdTreeError::InvalidConfig(
                "cost weights must be finite, the intersection cost positive",
            ));
        }
        if self.sah_bins < 2 {
            return Err(KdTreeError::InvalidConfig("sah_bins must be at least 2"));
        }
        Ok(())
    }

    /// The depth limit applied to a tree of the given size
    pub fn depth_limit_for(&self, triangle_count: usize) -> u32 {
        self.max_depth.unwrap_or_else(|| {
            let derived = 8. + 1.3 * (triangle_count.max(1) as f64).log2();
            (derived.round() as u32).min(Self::DEPTH_LIMIT)
        })
    }
}

///####################################################################################
/// Results
///####################################################################################

/// A ray hitting a triangle of the tree
#[derive(Debug)]
pub struct Hit<'a, P, T> {
    pub point: V3c<T>,
    /// Unit face normal of the struck triangle
    pub normal: V3c<T>,
    /// Parametric distance along the ray; metric for normalized directions
    pub distance: T,
    /// Barycentric weight of the second vertex
    pub alpha: T,
    /// Barycentric weight of the third vertex
    pub beta: T,
    /// Index of the struck triangle in insertion order
    pub triangle: usize,
    pub payload: &'a P,
}

impl<P, T: Copy> Clone for Hit<'_, P, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, T: Copy> Copy for Hit<'_, P, T> {}

/// Shape of a prepared kd-tree
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TreeStats {
    pub node_count: usize,
    pub leaf_count: usize,
    pub empty_leaf_count: usize,
    pub max_depth: u32,
    pub largest_leaf: usize,
    /// Sum of the leaf sizes; above the triangle count when triangles straddle splits
    pub triangle_references: usize,
    /// Surface area heuristic estimate of the cost to trace a random ray through the tree
    pub estimated_cost: f64,
}

/// Work done by a single traversal
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TraversalStats {
    pub nodes_visited: usize,
    pub leaves_visited: usize,
    pub triangles_tested: usize,
    pub max_stack_depth: usize,
}
