mod tests;

use crate::arena::{Arena, ItemKey};
use crate::kdtree::types::KdTreeError;
use crate::spatial::{
    math::{tolerance_at, Axis},
    raytracing::Ray,
    Aabb, Real, Scalar, V3c,
};
use std::ops::Range;

///####################################################################################
/// Triangle
///####################################################################################

/// A triangle with the data the ray intersection test needs computed up front.
/// The intersection is done by projecting the hit point onto the coordinate plane
/// the triangle is the least slanted to, and solving for the barycentric weights there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle<T> {
    vertices: [V3c<T>; 3],
    normal: V3c<T>,
    /// `normal · vertices[0]`
    plane_constant: T,
    /// Coordinate axes of the projection plane
    projection: (Axis, Axis),
    /// Edges `v1 - v0` and `v2 - v0` in projection plane coordinates
    projected_edges: [[T; 2]; 2],
    inverse_determinant: T,
}

/// Where a ray hit a triangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TriangleHit<T> {
    pub(crate) distance: T,
    pub(crate) point: V3c<T>,
    pub(crate) alpha: T,
    pub(crate) beta: T,
}

impl<T: Scalar> Triangle<T> {
    /// Computes the intersection data for the given vertices,
    /// or `None` if they do not span a measurable area
    pub fn new(vertices: [V3c<T>; 3]) -> Option<Self> {
        if !vertices.iter().all(V3c::is_finite) {
            return None;
        }
        let edge_1 = vertices[1] - vertices[0];
        let edge_2 = vertices[2] - vertices[0];
        let cross = edge_1.cross(edge_2);
        let cross_length = cross.length();

        // |e1 x e2| = |e1| |e2| sin(angle); a vanishing sine means collinear vertices
        let scale = edge_1.length() * edge_2.length();
        if !(cross_length > T::epsilon() * T::of(16.) * scale) {
            return None;
        }

        let normal = cross / cross_length;
        let projection = cross.dominant_axis().others();
        let (u, v) = projection;
        let projected_edges = [[edge_1[u], edge_1[v]], [edge_2[u], edge_2[v]]];
        let determinant =
            projected_edges[0][0] * projected_edges[1][1] - projected_edges[0][1] * projected_edges[1][0];

        Some(Self {
            vertices,
            normal,
            plane_constant: normal.dot(&vertices[0]),
            projection,
            projected_edges,
            inverse_determinant: T::one() / determinant,
        })
    }

    pub fn vertices(&self) -> &[V3c<T>; 3] {
        &self.vertices
    }

    /// Unit normal, oriented by the winding order of the vertices
    pub fn normal(&self) -> V3c<T> {
        self.normal
    }

    pub fn area(&self) -> T {
        (self.vertices[1] - self.vertices[0])
            .cross(self.vertices[2] - self.vertices[0])
            .length()
            * T::of(0.5)
    }

    pub fn bounds(&self) -> Aabb<T> {
        Aabb::from_points(self.vertices.iter())
    }

    /// Tells where the ray hits the triangle, should it hit in front of its origin
    pub(crate) fn intersect(&self, ray: &Ray<T>) -> Option<TriangleHit<T>> {
        let directions_dot = self.normal.dot(&ray.direction);
        if T::zero() == directions_dot {
            // ray is parallel to the plane of the triangle
            return None;
        }

        let distance = (self.plane_constant - self.normal.dot(&ray.origin)) / directions_dot;
        if !(distance > T::zero()) {
            return None;
        }

        let point = ray.point_at(distance);
        let (u, v) = self.projection;
        let offset_u = point[u] - self.vertices[0][u];
        let offset_v = point[v] - self.vertices[0][v];
        let [[e1_u, e1_v], [e2_u, e2_v]] = self.projected_edges;

        let alpha = (offset_u * e2_v - offset_v * e2_u) * self.inverse_determinant;
        if alpha < T::zero() || alpha > T::one() {
            return None;
        }
        let beta = (e1_u * offset_v - e1_v * offset_u) * self.inverse_determinant;
        if beta < T::zero() || alpha + beta > T::one() {
            return None;
        }

        Some(TriangleHit {
            distance,
            point,
            alpha,
            beta,
        })
    }

    /// Separating axis test between the triangle and the box, which is grown by the scalar
    /// tolerance to keep triangles lying on a box face inside of it
    pub(crate) fn overlaps_box(&self, bounds: &Aabb<T>) -> bool {
        let center = bounds.midpoint();
        let padding = tolerance_at(
            bounds
                .min
                .max_abs_component()
                .max(bounds.max.max_abs_component()),
        );
        let half_size = bounds.size() * T::of(0.5) + V3c::unit(padding);
        let v = [
            self.vertices[0] - center,
            self.vertices[1] - center,
            self.vertices[2] - center,
        ];

        // box face normals
        for axis in Axis::ALL {
            let low = v[0][axis].min(v[1][axis]).min(v[2][axis]);
            let high = v[0][axis].max(v[1][axis]).max(v[2][axis]);
            if low > half_size[axis] || high < -half_size[axis] {
                return false;
            }
        }

        // triangle plane
        let radius = Self::projected_box_radius(&half_size, &self.normal);
        if self.normal.dot(&v[0]).abs() > radius {
            return false;
        }

        // cross products of triangle edges and box edges
        for edge in [v[1] - v[0], v[2] - v[1], v[0] - v[2]] {
            for axis in Axis::ALL {
                let mut box_edge = V3c::unit(T::zero());
                box_edge[axis] = T::one();
                let separating_axis = box_edge.cross(edge);
                if T::zero() == separating_axis.dot(&separating_axis) {
                    continue;
                }
                let p0 = separating_axis.dot(&v[0]);
                let p1 = separating_axis.dot(&v[1]);
                let p2 = separating_axis.dot(&v[2]);
                let radius = Self::projected_box_radius(&half_size, &separating_axis);
                if p0.min(p1).min(p2) > radius || p0.max(p1).max(p2) < -radius {
                    return false;
                }
            }
        }
        true
    }

    fn projected_box_radius(half_size: &V3c<T>, axis: &V3c<T>) -> T {
        half_size.x * axis.x.abs() + half_size.y * axis.y.abs() + half_size.z * axis.z.abs()
    }
}

///####################################################################################
/// TriangleStore
///####################################################################################

/// Append-only storage of triangles and the payloads belonging to them.
/// Triangles are addressed by their insertion index.
#[derive(Debug, Clone)]
pub struct TriangleStore<P, T: Scalar = Real> {
    triangles: Arena<Triangle<T>>,
    payloads: Arena<P>,
}

impl<P, T: Scalar> Default for TriangleStore<P, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, T: Scalar> TriangleStore<P, T> {
    pub fn new() -> Self {
        Self {
            triangles: Arena::new("triangles"),
            payloads: Arena::new("triangle payloads"),
        }
    }

    pub(crate) fn from_parts(
        triangles: Vec<Triangle<T>>,
        payloads: Vec<P>,
    ) -> Result<Self, KdTreeError> {
        if triangles.len() != payloads.len() {
            return Err(KdTreeError::PayloadCountMismatch {
                expected: triangles.len(),
                actual: payloads.len(),
            });
        }
        Ok(Self {
            triangles: Arena::from_vec("triangles", triangles),
            payloads: Arena::from_vec("triangle payloads", payloads),
        })
    }

    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Makes room for `additional` more triangles
    pub fn reserve(&mut self, additional: usize) -> Result<(), KdTreeError> {
        self.triangles.reserve(additional)?;
        self.payloads.reserve(additional)
    }

    /// Adds a triangle with the given payload, returning with its index
    pub fn push(&mut self, vertices: [V3c<T>; 3], payload: P) -> Result<usize, KdTreeError> {
        let index = self.len();
        let triangle =
            Triangle::new(vertices).ok_or(KdTreeError::DegenerateGeometry { index })?;
        self.reserve(1)?;
        self.triangles.push(triangle)?;
        self.payloads.push(payload)?;
        Ok(index)
    }

    /// Adds the faces of an indexed mesh, one payload per face.
    /// Nothing is added unless every face is valid; returns with the range of the new indices.
    pub fn push_indexed(
        &mut self,
        positions: &[V3c<T>],
        faces: &[[u32; 3]],
        payloads: impl IntoIterator<Item = P>,
    ) -> Result<Range<usize>, KdTreeError> {
        let first = self.len();
        let mut triangles = Vec::new();
        triangles
            .try_reserve(faces.len())
            .map_err(|_| KdTreeError::ResourceExhausted("triangles"))?;
        for (face_index, face) in faces.iter().enumerate() {
            let mut vertices = [V3c::unit(T::zero()); 3];
            for (corner, vertex) in face.iter().enumerate() {
                vertices[corner] = *positions.get(*vertex as usize).ok_or(
                    KdTreeError::InvalidTriangleIndex {
                        face: face_index,
                        vertex: *vertex,
                        vertex_count: positions.len(),
                    },
                )?;
            }
            triangles.push(Triangle::new(vertices).ok_or(KdTreeError::DegenerateGeometry {
                index: first + face_index,
            })?);
        }

        let mut payloads_to_add = Vec::new();
        payloads_to_add
            .try_reserve(faces.len())
            .map_err(|_| KdTreeError::ResourceExhausted("triangle payloads"))?;
        payloads_to_add.extend(payloads);
        if payloads_to_add.len() != faces.len() {
            return Err(KdTreeError::PayloadCountMismatch {
                expected: faces.len(),
                actual: payloads_to_add.len(),
            });
        }

        self.reserve(faces.len())?;
        self.triangles.extend_from_slice(&triangles)?;
        for payload in payloads_to_add {
            self.payloads.push(payload)?;
        }
        Ok(first..self.len())
    }

    pub fn triangle(&self, index: usize) -> Option<&Triangle<T>> {
        (index < self.len()).then(|| self.triangles.get(index as ItemKey))
    }

    pub fn payload(&self, index: usize) -> Option<&P> {
        (index < self.len()).then(|| self.payloads.get(index as ItemKey))
    }

    pub fn triangles(&self) -> &[Triangle<T>] {
        self.triangles.as_slice()
    }

    pub fn payloads(&self) -> &[P] {
        self.payloads.as_slice()
    }

    /// Smallest box containing every triangle
    pub fn bounds(&self) -> Aabb<T> {
        self.triangles
            .iter()
            .fold(Aabb::empty(), |bounds, triangle| {
                bounds.union(&triangle.bounds())
            })
    }
}
