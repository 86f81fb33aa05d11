use crate::arena::{Arena, ItemKey};
use crate::kdtree::{
    types::{BuildMethod, KdTreeConfig, KdTreeError, NodeContent, TreeStats},
    PreparedTree, ROOT_NODE,
};
use crate::spatial::{
    math::{tolerance_at, Axis},
    Aabb, Scalar,
};
use crate::triangle::{Triangle, TriangleStore};
use std::time::Instant;

/// A split plane chosen for a node, with the triangles sorted to its two sides
struct Split<T> {
    axis: Axis,
    position: T,
    near: Vec<u32>,
    far: Vec<u32>,
}

struct Builder<'a, T> {
    triangles: &'a [Triangle<T>],
    triangle_bounds: Vec<Aabb<T>>,
    config: &'a KdTreeConfig,
    depth_limit: u32,
    nodes: Arena<NodeContent<T>>,
    leaf_triangles: Arena<u32>,
}

/// Builds the kd-tree partition over the triangles of the store
pub(crate) fn build<P, T: Scalar>(
    store: &TriangleStore<P, T>,
    config: &KdTreeConfig,
) -> Result<PreparedTree<T>, KdTreeError> {
    let started = Instant::now();
    let triangles = store.triangles();
    let depth_limit = config.depth_limit_for(triangles.len());
    log::debug!(
        "Building kd-tree over {} triangles; method: {}; depth limit: {}",
        triangles.len(),
        config.method.tag(),
        depth_limit
    );

    let mut triangle_bounds = Vec::new();
    triangle_bounds
        .try_reserve(triangles.len())
        .map_err(|_| KdTreeError::ResourceExhausted("triangle bounds"))?;
    triangle_bounds.extend(triangles.iter().map(Triangle::bounds));

    let mut builder = Builder {
        triangles,
        triangle_bounds,
        config,
        depth_limit,
        nodes: Arena::new("kd-tree nodes"),
        leaf_triangles: Arena::new("kd-tree leaves"),
    };

    let bounds = scene_bounds(store);
    let mut candidates = Vec::new();
    candidates
        .try_reserve(triangles.len())
        .map_err(|_| KdTreeError::ResourceExhausted("split candidates"))?;
    candidates.extend(0..triangles.len() as u32);

    if bounds.is_degenerate() {
        builder.make_leaf(&candidates)?;
    } else {
        builder.build_node(candidates, bounds, 0)?;
    }
    debug_assert!(builder.nodes.key_is_valid(ROOT_NODE));

    let stats = tree_stats(&builder.nodes, &bounds, config);
    log::info!(
        "kd-tree built in {:?}: {} nodes, {} leaves ({} empty), depth {}, largest leaf {}, {} triangle references",
        started.elapsed(),
        stats.node_count,
        stats.leaf_count,
        stats.empty_leaf_count,
        stats.max_depth,
        stats.largest_leaf,
        stats.triangle_references
    );

    Ok(PreparedTree {
        nodes: builder.nodes,
        leaf_triangles: builder.leaf_triangles,
        bounds,
        stats,
    })
}

/// Bounds of every triangle in the store, grown so that flat scenes still have volume
/// and no triangle lies exactly on the outer faces
fn scene_bounds<P, T: Scalar>(store: &TriangleStore<P, T>) -> Aabb<T> {
    let bounds = store.bounds();
    if bounds.is_empty() {
        return bounds;
    }
    let magnitude = bounds
        .min
        .max_abs_component()
        .max(bounds.max.max_abs_component())
        .max(bounds.size().max_abs_component());
    bounds.padded(tolerance_at(magnitude))
}

impl<T: Scalar> Builder<'_, T> {
    /// Builds the subtree over the candidates in pre-order, returning with the key of its root
    fn build_node(
        &mut self,
        candidates: Vec<u32>,
        bounds: Aabb<T>,
        depth: u32,
    ) -> Result<ItemKey, KdTreeError> {
        if candidates.len() <= self.config.max_leaf_size || depth >= self.depth_limit {
            return self.make_leaf(&candidates);
        }

        let split = match self.config.method {
            BuildMethod::Fast => self.midpoint_split(&candidates, &bounds)?,
            BuildMethod::Optimal => match self.cost_optimal_split(&candidates, &bounds)? {
                Some(split) => Some(split),
                None => self.midpoint_split(&candidates, &bounds)?,
            },
        };
        let Some(split) = split else {
            // Every plane keeps all the triangles on both sides: a cluster which can't be separated
            return self.make_leaf(&candidates);
        };
        drop(candidates);

        // Reserve the slot of the parent so that it precedes its children
        let key = self.nodes.push(NodeContent::empty_leaf())?;
        let (near_bounds, far_bounds) = bounds.split(split.axis, split.position);
        let near = self.build_node(split.near, near_bounds, depth + 1)?;
        let far = self.build_node(split.far, far_bounds, depth + 1)?;
        *self.nodes.get_mut(key) = NodeContent::Internal {
            axis: split.axis,
            split: split.position,
            near,
            far,
        };
        Ok(key)
    }

    fn make_leaf(&mut self, candidates: &[u32]) -> Result<ItemKey, KdTreeError> {
        let start = self.leaf_triangles.len() as u32;
        self.leaf_triangles.extend_from_slice(candidates)?;
        self.nodes.push(NodeContent::Leaf {
            start,
            len: candidates.len() as u32,
        })
    }

    /// Sorts the candidates to the sides of the plane. Triangles crossing the plane go to both sides;
    /// `None` if the plane doesn't separate anything
    fn partition(
        &self,
        candidates: &[u32],
        bounds: &Aabb<T>,
        axis: Axis,
        position: T,
    ) -> Result<Option<Split<T>>, KdTreeError> {
        let (near_bounds, far_bounds) = bounds.split(axis, position);
        let mut near = Vec::new();
        let mut far = Vec::new();
        near.try_reserve(candidates.len())
            .and_then(|_| far.try_reserve(candidates.len()))
            .map_err(|_| KdTreeError::ResourceExhausted("split candidates"))?;

        for index in candidates {
            let triangle_bounds = &self.triangle_bounds[*index as usize];
            let triangle = &self.triangles[*index as usize];
            let in_near = triangle_bounds.min[axis] <= position && triangle.overlaps_box(&near_bounds);
            let in_far = triangle_bounds.max[axis] >= position && triangle.overlaps_box(&far_bounds);
            if in_near || !in_far {
                near.push(*index);
            }
            if in_far || !in_near {
                far.push(*index);
            }
        }

        if near.len() == candidates.len() && far.len() == candidates.len() {
            return Ok(None);
        }
        Ok(Some(Split {
            axis,
            position,
            near,
            far,
        }))
    }

    /// True if the position is usable as a split plane inside the bounds
    fn is_inside(bounds: &Aabb<T>, axis: Axis, position: T) -> bool {
        bounds.min[axis] < position && position < bounds.max[axis]
    }

    /// Bisects the longest axis; the other axes are tried in order of their extents
    /// should the bisection not separate anything
    fn midpoint_split(
        &self,
        candidates: &[u32],
        bounds: &Aabb<T>,
    ) -> Result<Option<Split<T>>, KdTreeError> {
        let longest = bounds.longest_axis();
        let (second, third) = match longest.others() {
            (a, b) if bounds.extent(a) < bounds.extent(b) => (b, a),
            others => others,
        };
        for axis in [longest, second, third] {
            let position = (bounds.min[axis] + bounds.max[axis]) * T::of(0.5);
            if !Self::is_inside(bounds, axis, position) {
                continue;
            }
            if let Some(split) = self.partition(candidates, bounds, axis, position)? {
                return Ok(Some(split));
            }
        }
        Ok(None)
    }

    /// Surface area heuristic: every candidate plane is rated by
    /// `traversal_cost + intersection_cost * (near_area * near_count + far_area * far_count) / area`
    /// where the triangle counts are estimated from the triangle bounds
    fn cost_optimal_split(
        &self,
        candidates: &[u32],
        bounds: &Aabb<T>,
    ) -> Result<Option<Split<T>>, KdTreeError> {
        let area = bounds.surface_area().as_f64();
        if area <= 0. {
            return Ok(None);
        }

        let count = candidates.len();
        let mut lower_ends = Vec::new();
        let mut upper_ends = Vec::new();
        lower_ends
            .try_reserve(count)
            .and_then(|_| upper_ends.try_reserve(count))
            .map_err(|_| KdTreeError::ResourceExhausted("split candidates"))?;

        let mut best: Option<(f64, Axis, T)> = None;
        for axis in Axis::ALL {
            lower_ends.clear();
            upper_ends.clear();
            for index in candidates {
                let triangle_bounds = &self.triangle_bounds[*index as usize];
                lower_ends.push(triangle_bounds.min[axis]);
                upper_ends.push(triangle_bounds.max[axis]);
            }
            lower_ends.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            upper_ends.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            for position in self.split_positions(bounds, axis, &lower_ends, &upper_ends) {
                // triangles starting at or below the plane touch the near side,
                // the ones ending at or above it touch the far side
                let near_count = lower_ends.partition_point(|v| *v <= position);
                let far_count = count - upper_ends.partition_point(|v| *v < position);
                if near_count == count && far_count == count {
                    continue;
                }

                let (near_bounds, far_bounds) = bounds.split(axis, position);
                let cost = self.config.traversal_cost
                    + self.config.intersection_cost
                        * (near_bounds.surface_area().as_f64() * near_count as f64
                            + far_bounds.surface_area().as_f64() * far_count as f64)
                        / area;
                if best.map_or(true, |(best_cost, _, _)| cost < best_cost) {
                    best = Some((cost, axis, position));
                }
            }
        }

        match best {
            Some((_, axis, position)) => self.partition(candidates, bounds, axis, position),
            None => Ok(None),
        }
    }

    /// Candidate planes along the axis: the ends of the triangle bounds inside the node,
    /// or evenly spaced bin boundaries when there are more of those than `sah_bins`
    fn split_positions(
        &self,
        bounds: &Aabb<T>,
        axis: Axis,
        lower_ends: &[T],
        upper_ends: &[T],
    ) -> Vec<T> {
        let bins = self.config.sah_bins;
        if lower_ends.len() * 2 > bins {
            let extent = bounds.extent(axis);
            return (1..bins)
                .map(|bin| bounds.min[axis] + extent * T::of(bin as f64 / bins as f64))
                .filter(|position| Self::is_inside(bounds, axis, *position))
                .collect();
        }

        let mut positions = lower_ends
            .iter()
            .chain(upper_ends.iter())
            .copied()
            .filter(|position| Self::is_inside(bounds, axis, *position))
            .collect::<Vec<_>>();
        positions.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        positions.dedup();
        positions
    }
}

/// Collects the shape of the tree, including its surface area heuristic cost estimate
pub(crate) fn tree_stats<T: Scalar>(
    nodes: &Arena<NodeContent<T>>,
    bounds: &Aabb<T>,
    config: &KdTreeConfig,
) -> TreeStats {
    let mut stats = TreeStats {
        node_count: nodes.len(),
        ..Default::default()
    };
    if nodes.is_empty() {
        return stats;
    }

    let root_area = bounds.surface_area().as_f64();
    let mut node_stack = vec![(ROOT_NODE, *bounds, 0)];
    while let Some((key, node_bounds, depth)) = node_stack.pop() {
        stats.max_depth = stats.max_depth.max(depth);
        let relative_area = if 0. < root_area {
            node_bounds.surface_area().as_f64() / root_area
        } else {
            1.
        };
        match *nodes.get(key) {
            NodeContent::Leaf { len, .. } => {
                stats.leaf_count += 1;
                if 0 == len {
                    stats.empty_leaf_count += 1;
                }
                stats.largest_leaf = stats.largest_leaf.max(len as usize);
                stats.triangle_references += len as usize;
                stats.estimated_cost += relative_area * config.intersection_cost * len as f64;
            }
            NodeContent::Internal {
                axis,
                split,
                near,
                far,
            } => {
                stats.estimated_cost += relative_area * config.traversal_cost;
                let (near_bounds, far_bounds) = node_bounds.split(axis, split);
                node_stack.push((near, near_bounds, depth + 1));
                node_stack.push((far, far_bounds, depth + 1));
            }
        }
    }
    stats
}
