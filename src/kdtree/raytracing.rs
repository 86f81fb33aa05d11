use crate::arena::ItemKey;
use crate::kdtree::{
    types::{Hit, KdTreeError, NodeContent, TraversalStats},
    KdTree, ROOT_NODE,
};
use crate::spatial::{math::tolerance_at, raytracing::Ray, Real, Scalar};
use crate::triangle::{Triangle, TriangleHit};
use std::{collections::HashSet, ops::ControlFlow};

#[derive(Debug, Clone, Copy)]
struct NodeStackItem<T> {
    node: ItemKey,
    /// Parametric interval of the ray inside the node
    near: T,
    far: T,
    depth: u32,
}

/// Scratch memory of a traversal. Every thread tracing rays needs its own;
/// re-using it between traversals spares the allocations.
#[derive(Debug, Clone)]
pub struct TraversalStack<T = Real> {
    nodes: Vec<NodeStackItem<T>>,
    stats: TraversalStats,
    /// Triangles already reported by the current traversal
    reported: HashSet<u32>,
    /// Hits inside the window of the current leaf, waiting to be reported in order
    leaf_hits: Vec<(u32, TriangleHit<T>)>,
}

impl<T> Default for TraversalStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TraversalStack<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            stats: TraversalStats::default(),
            reported: HashSet::new(),
            leaf_hits: Vec::new(),
        }
    }

    /// Work done by the last traversal using this stack
    pub fn stats(&self) -> &TraversalStats {
        &self.stats
    }
}

/// Consumes the leaves of the tree in the order the ray reaches them
trait LeafVisitor<T> {
    /// Nodes starting beyond this distance along the ray need not be visited
    fn cutoff(&self) -> T;

    /// Processes the triangles of a leaf the ray is inside of in the interval `near..=far`
    fn visit_leaf(
        &mut self,
        ray: &Ray<T>,
        triangles: &[u32],
        near: T,
        far: T,
        stats: &mut TraversalStats,
    ) -> ControlFlow<()>;
}

/// Keeps the closest hit among every triangle tested
struct NearestHit<'a, T> {
    triangles: &'a [Triangle<T>],
    best: Option<(u32, TriangleHit<T>)>,
}

impl<T: Scalar> LeafVisitor<T> for NearestHit<'_, T> {
    fn cutoff(&self) -> T {
        self.best
            .map_or(T::infinity(), |(_, hit)| hit.distance)
    }

    fn visit_leaf(
        &mut self,
        ray: &Ray<T>,
        triangles: &[u32],
        _near: T,
        far: T,
        stats: &mut TraversalStats,
    ) -> ControlFlow<()> {
        for index in triangles {
            stats.triangles_tested += 1;
            if let Some(hit) = self.triangles[*index as usize].intersect(ray) {
                if self
                    .best
                    .map_or(true, |(_, best)| hit.distance < best.distance)
                {
                    self.best = Some((*index, hit));
                }
            }
        }

        // Every remaining node lies beyond this leaf, a hit inside its window can't be beaten
        match self.best {
            Some((_, best)) if best.distance <= far => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    }
}

/// Reports every hit inside the window of the visited leaf, sorted by distance
struct OrderedHits<'a, 's, P, T: Scalar, F> {
    tree: &'a KdTree<P, T>,
    reported: &'s mut HashSet<u32>,
    leaf_hits: &'s mut Vec<(u32, TriangleHit<T>)>,
    on_hit: F,
}

impl<'a, P, T, F> LeafVisitor<T> for OrderedHits<'a, '_, P, T, F>
where
    T: Scalar,
    F: FnMut(Hit<'a, P, T>) -> ControlFlow<()>,
{
    fn cutoff(&self) -> T {
        T::infinity()
    }

    fn visit_leaf(
        &mut self,
        ray: &Ray<T>,
        triangles: &[u32],
        near: T,
        far: T,
        stats: &mut TraversalStats,
    ) -> ControlFlow<()> {
        let slack = tolerance_at(far);
        self.leaf_hits.clear();
        for index in triangles {
            if self.reported.contains(index) {
                continue;
            }
            stats.triangles_tested += 1;
            if let Some(hit) = self.tree.store.triangles()[*index as usize].intersect(ray) {
                // Hits beyond the window are found again in the leaf they belong to
                if near - slack <= hit.distance && hit.distance <= far + slack {
                    self.leaf_hits.push((*index, hit));
                }
            }
        }
        self.leaf_hits.sort_by(|(_, a), (_, b)| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for (index, hit) in self.leaf_hits.iter() {
            self.reported.insert(*index);
            if (self.on_hit)(self.tree.make_hit(*index, hit)).is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

fn push_node<T>(
    nodes: &mut Vec<NodeStackItem<T>>,
    item: NodeStackItem<T>,
    stats: &mut TraversalStats,
) -> Result<(), KdTreeError> {
    if nodes.len() == nodes.capacity() {
        nodes
            .try_reserve(nodes.len().max(16))
            .map_err(|_| KdTreeError::ResourceExhausted("traversal stack"))?;
    }
    nodes.push(item);
    stats.max_stack_depth = stats.max_stack_depth.max(nodes.len());
    Ok(())
}

impl<P, T: Scalar> KdTree<P, T> {
    fn make_hit(&self, index: u32, hit: &TriangleHit<T>) -> Hit<'_, P, T> {
        Hit {
            point: hit.point,
            normal: self.store.triangles()[index as usize].normal(),
            distance: hit.distance,
            alpha: hit.alpha,
            beta: hit.beta,
            triangle: index as usize,
            payload: &self.store.payloads()[index as usize],
        }
    }

    /// Walks the leaves the ray passes through, nearest first, handing each to the visitor.
    /// Returns with the depth of the deepest node visited
    fn traverse<V: LeafVisitor<T>>(
        &self,
        ray: &Ray<T>,
        nodes: &mut Vec<NodeStackItem<T>>,
        stats: &mut TraversalStats,
        visitor: &mut V,
    ) -> Result<u32, KdTreeError> {
        debug_assert!(ray.is_valid(), "Ray direction must be finite and non-zero");
        let prepared = self.prepared()?;
        self.count_ray();
        nodes.clear();
        *stats = TraversalStats::default();

        let Some((near, far)) = prepared.bounds.intersect_ray(ray) else {
            return Ok(0);
        };
        push_node(
            nodes,
            NodeStackItem {
                node: ROOT_NODE,
                near,
                far,
                depth: 0,
            },
            stats,
        )?;

        let mut deepest = 0;
        while let Some(mut item) = nodes.pop() {
            loop {
                if visitor.cutoff() < item.near {
                    // Nodes below in the stack start even further along the ray
                    return Ok(deepest);
                }
                stats.nodes_visited += 1;
                deepest = deepest.max(item.depth);

                match *prepared.nodes.get(item.node) {
                    NodeContent::Leaf { start, len } => {
                        stats.leaves_visited += 1;
                        let triangles = prepared.leaf_range(start, len);
                        if visitor
                            .visit_leaf(ray, triangles, item.near, item.far, stats)
                            .is_break()
                        {
                            return Ok(deepest);
                        }
                        break;
                    }
                    NodeContent::Internal {
                        axis,
                        split,
                        near,
                        far,
                    } => {
                        let origin = ray.origin[axis];
                        let direction = ray.direction[axis];
                        let origin_is_near =
                            origin < split || (origin == split && direction <= T::zero());
                        let (first, second) = if origin_is_near {
                            (near, far)
                        } else {
                            (far, near)
                        };
                        item.depth += 1;

                        if T::zero() == direction {
                            // parallel to the split plane; stays on the side of its origin
                            item.node = first;
                            continue;
                        }

                        let t_split = (split - origin) / direction;
                        if t_split > item.far || t_split <= T::zero() {
                            item.node = first;
                        } else if t_split < item.near {
                            item.node = second;
                        } else {
                            push_node(
                                nodes,
                                NodeStackItem {
                                    node: second,
                                    near: t_split,
                                    far: item.far,
                                    depth: item.depth,
                                },
                                stats,
                            )?;
                            item.node = first;
                            item.far = t_split;
                        }
                    }
                }
            }
        }
        Ok(deepest)
    }

    /// Finds the closest triangle the ray hits in front of its origin.
    /// `ray.kdtree_depth` is set to the depth of the deepest node the traversal reached.
    /// ```
    /// use trikd_rs::kdtree::{KdTree, Ray, TraversalStack, V3c};
    ///
    /// let mut tree = KdTree::<&str, f64>::new();
    /// tree.push(
    ///     [V3c::new(0., 0., 0.), V3c::new(1., 0., 0.), V3c::new(0., 1., 0.)],
    ///     "floor",
    /// ).ok().unwrap();
    /// tree.prepare().ok().unwrap();
    ///
    /// let mut ray = Ray::new(V3c::new(0.25, 0.25, 10.), V3c::new(0., 0., -1.));
    /// let mut stack = TraversalStack::new();
    /// let hit = tree.shoot(&mut ray, &mut stack).ok().unwrap().unwrap();
    /// assert_eq!(hit.payload, &"floor");
    /// assert!((hit.distance - 10.).abs() < 1e-9);
    /// ```
    pub fn shoot<'a>(
        &'a self,
        ray: &mut Ray<T>,
        stack: &mut TraversalStack<T>,
    ) -> Result<Option<Hit<'a, P, T>>, KdTreeError> {
        let mut visitor = NearestHit {
            triangles: self.store.triangles(),
            best: None,
        };
        let deepest = self.traverse(ray, &mut stack.nodes, &mut stack.stats, &mut visitor)?;
        ray.kdtree_depth = deepest;
        Ok(visitor
            .best
            .map(|(index, hit)| self.make_hit(index, &hit)))
    }

    /// Collects every triangle the ray hits into `hits`, ordered by increasing distance.
    /// The previous contents of `hits` are discarded.
    pub fn shoot_all<'a>(
        &'a self,
        ray: &mut Ray<T>,
        stack: &mut TraversalStack<T>,
        hits: &mut Vec<Hit<'a, P, T>>,
    ) -> Result<(), KdTreeError> {
        hits.clear();
        self.shoot_with(ray, stack, |hit| {
            hits.push(hit);
            ControlFlow::Continue(())
        })?;
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(())
    }

    /// Reports the hits of the ray to the visitor as the traversal finds them, every triangle once.
    /// Hits are ordered by distance within each leaf, and leaves are visited nearest first.
    /// The traversal stops when the visitor breaks.
    pub fn shoot_with<'a, F>(
        &'a self,
        ray: &mut Ray<T>,
        stack: &mut TraversalStack<T>,
        on_hit: F,
    ) -> Result<(), KdTreeError>
    where
        F: FnMut(Hit<'a, P, T>) -> ControlFlow<()>,
    {
        let TraversalStack {
            nodes,
            stats,
            reported,
            leaf_hits,
        } = stack;
        reported.clear();
        let mut visitor = OrderedHits {
            tree: self,
            reported,
            leaf_hits,
            on_hit,
        };
        let deepest = self.traverse(ray, nodes, stats, &mut visitor)?;
        ray.kdtree_depth = deepest;
        Ok(())
    }
}
