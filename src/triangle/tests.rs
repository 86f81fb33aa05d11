#[cfg(test)]
mod triangle_tests {
    use crate::kdtree::types::{ErrorKind, KdTreeError};
    use crate::spatial::{raytracing::Ray, Aabb, V3c};
    use crate::triangle::{Triangle, TriangleStore};

    fn unit_triangle() -> Triangle<f64> {
        Triangle::new([
            V3c::new(0., 0., 0.),
            V3c::new(1., 0., 0.),
            V3c::new(0., 1., 0.),
        ])
        .unwrap()
    }

    #[test]
    fn test_precomputed_data() {
        let triangle = unit_triangle();
        assert_eq!(triangle.normal(), V3c::new(0., 0., 1.));
        assert_eq!(triangle.area(), 0.5);
        assert_eq!(
            triangle.bounds(),
            Aabb::new(V3c::new(0., 0., 0.), V3c::new(1., 1., 0.))
        );
    }

    #[test]
    fn test_degenerate_triangles_are_rejected() {
        // collinear
        assert!(Triangle::new([
            V3c::new(0., 0., 0.),
            V3c::new(1., 1., 1.),
            V3c::new(2., 2., 2.),
        ])
        .is_none());

        // coincident vertices
        assert!(Triangle::new([V3c::unit(1.); 3]).is_none());

        // not finite
        assert!(Triangle::new([
            V3c::new(0., 0., 0.),
            V3c::new(f32::NAN, 0., 0.),
            V3c::new(0., 1., 0.),
        ])
        .is_none());

        // thin, but measurable
        assert!(Triangle::new([
            V3c::new(0., 0., 0.),
            V3c::new(1., 0., 0.),
            V3c::new(0.5, 0.0001, 0.),
        ])
        .is_some());
    }

    #[test]
    fn test_hit_along_normal() {
        let triangle = unit_triangle();
        let ray = Ray::new(V3c::new(0.25, 0.25, 10.), V3c::new(0., 0., -1.));
        let hit = triangle.intersect(&ray).unwrap();
        assert!((hit.distance - 10.).abs() < 1e-12);
        assert!((hit.alpha - 0.25).abs() < 1e-12);
        assert!((hit.beta - 0.25).abs() < 1e-12);
        assert_eq!(hit.point, V3c::new(0.25, 0.25, 0.));

        // From behind the triangle
        let ray = Ray::new(V3c::new(0.25, 0.25, -3.), V3c::new(0., 0., 1.));
        assert!((triangle.intersect(&ray).unwrap().distance - 3.).abs() < 1e-12);
    }

    #[test]
    fn test_barycentric_weights_follow_vertices() {
        let triangle = Triangle::new([
            V3c::new(1., 0., 5.),
            V3c::new(1., 4., 5.),
            V3c::new(1., 0., 9.),
        ])
        .unwrap();
        for (target, alpha, beta) in [
            (V3c::new(1., 4., 5.), 1.0_f64, 0.),
            (V3c::new(1., 0., 9.), 0., 1.),
            (V3c::new(1., 1., 6.), 0.25, 0.25),
        ] {
            let origin = target + V3c::new(-2., 0., 0.);
            let ray = Ray::new(origin, target - origin);
            let hit = triangle.intersect(&ray).unwrap();
            assert!((hit.alpha - alpha).abs() < 1e-9);
            assert!((hit.beta - beta).abs() < 1e-9);
            assert!((hit.distance - 2.).abs() < 1e-9);
        }
    }

    #[test]
    fn test_misses() {
        let triangle = unit_triangle();

        // outside of the triangle, inside of its plane's bounding square
        let ray = Ray::new(V3c::new(0.75, 0.75, 1.), V3c::new(0., 0., -1.));
        assert!(triangle.intersect(&ray).is_none());

        // triangle is behind the ray
        let ray = Ray::new(V3c::new(0.25, 0.25, 1.), V3c::new(0., 0., 1.));
        assert!(triangle.intersect(&ray).is_none());

        // parallel to the plane
        let ray = Ray::new(V3c::new(-1., 0.25, 0.), V3c::new(1., 0., 0.));
        assert!(triangle.intersect(&ray).is_none());
    }

    #[test]
    fn test_box_overlap() {
        let triangle = unit_triangle();
        let overlapping = Aabb::new(V3c::new(0.1, 0.1, -1.), V3c::new(0.2, 0.2, 1.));
        assert!(triangle.overlaps_box(&overlapping));

        // Inside the bounding box of the triangle, but beyond its hypotenuse
        let beyond_edge = Aabb::new(V3c::new(0.8, 0.8, -1.), V3c::new(1., 1., 1.));
        assert!(!triangle.overlaps_box(&beyond_edge));

        // Touching the plane of the triangle from above
        let touching = Aabb::new(V3c::new(0.1, 0.1, 0.), V3c::new(0.2, 0.2, 1.));
        assert!(triangle.overlaps_box(&touching));

        // Above the plane of the triangle
        let above = Aabb::new(V3c::new(0.1, 0.1, 0.5), V3c::new(0.2, 0.2, 1.));
        assert!(!triangle.overlaps_box(&above));

        // Box inside a large slanted triangle
        let slanted = Triangle::new([
            V3c::new(-10., -10., -10.),
            V3c::new(10., -10., 10.),
            V3c::new(0., 10., 0.),
        ])
        .unwrap();
        assert!(slanted.overlaps_box(&Aabb::new(V3c::unit(-0.5), V3c::unit(0.5))));
        assert!(!slanted.overlaps_box(&Aabb::new(
            V3c::new(2., -0.5, -3.),
            V3c::new(3., 0.5, -2.)
        )));
    }

    #[test]
    fn test_store_push() {
        let mut store = TriangleStore::<&str, f32>::new();
        assert!(store.is_empty());
        let index = store
            .push(
                [
                    V3c::new(0., 0., 0.),
                    V3c::new(1., 0., 0.),
                    V3c::new(0., 1., 0.),
                ],
                "first",
            )
            .ok()
            .unwrap();
        assert_eq!(index, 0);

        let degenerate = store.push([V3c::unit(0.); 3], "second");
        assert!(matches!(
            degenerate,
            Err(KdTreeError::DegenerateGeometry { index: 1 })
        ));
        assert_eq!(degenerate.unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(store.len(), 1);
        assert_eq!(store.payload(0), Some(&"first"));
        assert!(store.payload(1).is_none());
        assert!(store.triangle(1).is_none());
    }

    #[test]
    fn test_store_push_indexed() {
        let positions = [
            V3c::new(0., 0., 0.),
            V3c::new(1., 0., 0.),
            V3c::new(1., 1., 0.),
            V3c::new(0., 1., 0.),
        ];
        let mut store = TriangleStore::<usize, f64>::new();
        let range = store
            .push_indexed(&positions, &[[0, 1, 2], [0, 2, 3]], [10, 11])
            .ok()
            .unwrap();
        assert_eq!(range, 0..2);
        assert_eq!(store.payloads(), &[10, 11]);
        assert_eq!(
            store.bounds(),
            Aabb::new(V3c::new(0., 0., 0.), V3c::new(1., 1., 0.))
        );

        // A single bad face rejects the whole batch
        let bad_index = store.push_indexed(&positions, &[[0, 1, 2], [0, 2, 7]], [12, 13]);
        assert!(matches!(
            bad_index,
            Err(KdTreeError::InvalidTriangleIndex {
                face: 1,
                vertex: 7,
                vertex_count: 4
            })
        ));
        let degenerate = store.push_indexed(&positions, &[[0, 1, 2], [0, 0, 1]], [12, 13]);
        assert!(matches!(
            degenerate,
            Err(KdTreeError::DegenerateGeometry { index: 3 })
        ));
        let missing_payload = store.push_indexed(&positions, &[[0, 1, 2]], []);
        assert!(matches!(
            missing_payload,
            Err(KdTreeError::PayloadCountMismatch {
                expected: 1,
                actual: 0
            })
        ));
        assert_eq!(store.len(), 2);
    }
}
