use super::bytecode::{flatten_nodes, LEAF_TAG};
use crate::kdtree::{
    types::{BuildMethod, ErrorKind, KdTreeConfig, KdTreeError, NodeContent},
    KdTree, Ray, TraversalStack, V3c,
};
use bendy::{decoding::FromBencode, encoding::ToBencode};
use rand::Rng;

fn random_tree(config: KdTreeConfig, triangle_count: usize) -> KdTree<usize, f64> {
    let mut rng = rand::thread_rng();
    let mut tree = KdTree::with_config(config).ok().unwrap();
    while tree.len() < triangle_count {
        let center = V3c::new(
            rng.gen_range(0.0..20.),
            rng.gen_range(0.0..20.),
            rng.gen_range(0.0..20.),
        );
        let mut corner =
            || center + V3c::new(rng.gen_range(-1.0..1.), rng.gen_range(-1.0..1.), rng.gen_range(-1.0..1.));
        let vertices = [corner(), corner(), corner()];
        let index = tree.len();
        let _ = tree.push(vertices, index);
    }
    tree.prepare().ok().unwrap();
    tree
}

fn random_rays(count: usize) -> Vec<Ray<f64>> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let origin = V3c::new(
                rng.gen_range(-20.0..40.),
                rng.gen_range(-20.0..40.),
                rng.gen_range(-20.0..40.),
            );
            let target = V3c::new(
                rng.gen_range(0.0..20.),
                rng.gen_range(0.0..20.),
                rng.gen_range(0.0..20.),
            );
            Ray::new(origin, target - origin)
        })
        .collect()
}

fn nearest_hits<P>(tree: &KdTree<P, f64>, rays: &[Ray<f64>]) -> Vec<Option<(usize, f64)>> {
    let mut stack = TraversalStack::new();
    rays.iter()
        .map(|ray| {
            let mut ray = *ray;
            tree.shoot(&mut ray, &mut stack)
                .ok()
                .unwrap()
                .map(|hit| (hit.triangle, hit.distance))
        })
        .collect()
}

#[test]
fn test_config_serialization() {
    let config = KdTreeConfig::default()
        .with_method(BuildMethod::Fast)
        .with_max_leaf_size(7)
        .with_max_depth(21)
        .with_costs(0.25, 3.5)
        .with_sah_bins(12);
    let config_deserialized = KdTreeConfig::from_bencode(&config.to_bencode().ok().unwrap())
        .ok()
        .unwrap();
    assert!(config_deserialized == config);

    let default_deserialized =
        KdTreeConfig::from_bencode(&KdTreeConfig::default().to_bencode().ok().unwrap())
            .ok()
            .unwrap();
    assert!(default_deserialized == KdTreeConfig::default());

    let shallow = KdTreeConfig::default().with_max_depth(1);
    let shallow_deserialized = KdTreeConfig::from_bencode(&shallow.to_bencode().ok().unwrap())
        .ok()
        .unwrap();
    assert_eq!(shallow_deserialized.max_depth, Some(1));
}

#[test]
fn test_round_trip_reports_identical_hits() {
    for method in [BuildMethod::Fast, BuildMethod::Optimal] {
        let tree = random_tree(KdTreeConfig::default().with_method(method), 1000);
        let bytes = tree.to_bytes().ok().unwrap();
        let decoded = KdTree::<usize, f64>::from_bytes(&bytes).ok().unwrap();

        assert!(decoded.is_prepared());
        assert_eq!(decoded.len(), tree.len());
        assert_eq!(decoded.method(), method);
        assert_eq!(decoded.triangles().payloads(), tree.triangles().payloads());
        assert_eq!(decoded.bounds(), tree.bounds());
        assert_eq!(decoded.stats(), tree.stats());
        assert_eq!(decoded.rays_fired(), 0);

        let rays = random_rays(300);
        assert_eq!(nearest_hits(&tree, &rays), nearest_hits(&decoded, &rays));

        let mut stack = TraversalStack::new();
        let mut hits = Vec::new();
        let mut decoded_hits = Vec::new();
        for ray in rays.iter() {
            let mut ray = *ray;
            tree.shoot_all(&mut ray, &mut stack, &mut hits).ok().unwrap();
            decoded
                .shoot_all(&mut ray, &mut stack, &mut decoded_hits)
                .ok()
                .unwrap();
            assert_eq!(
                hits.iter().map(|h| h.triangle).collect::<Vec<_>>(),
                decoded_hits.iter().map(|h| h.triangle).collect::<Vec<_>>()
            );
        }
    }
}

#[test]
fn test_round_trip_keeps_topology_of_large_tree() {
    let tree = random_tree(KdTreeConfig::default(), 10000);
    let decoded = KdTree::<usize, f64>::from_bytes(&tree.to_bytes().ok().unwrap())
        .ok()
        .unwrap();

    // same axis choices, split values and leaf contents
    assert!(tree.prepared().ok().unwrap() == decoded.prepared().ok().unwrap());
    assert!(tree.config() == decoded.config());
    for index in 0..tree.len() {
        assert_eq!(tree.triangle(index), decoded.triangle(index));
    }
}

#[test]
fn test_empty_tree_round_trip() {
    let mut tree = KdTree::<usize, f64>::new();
    tree.prepare().ok().unwrap();
    let decoded = KdTree::<usize, f64>::from_bytes(&tree.to_bytes().ok().unwrap())
        .ok()
        .unwrap();
    assert!(decoded.is_empty());
    assert_eq!(decoded.stats().unwrap().node_count, 1);

    let mut ray = Ray::new(V3c::new(0., 0., 0.), V3c::new(1., 1., 1.));
    assert!(decoded
        .shoot(&mut ray, &mut TraversalStack::new())
        .ok()
        .unwrap()
        .is_none());
}

#[test]
fn test_unprepared_tree_is_not_encoded() {
    let tree = KdTree::<usize, f64>::new();
    assert!(matches!(tree.to_bytes(), Err(KdTreeError::NotPrepared)));
    assert!(matches!(
        tree.to_bytes_without_payloads(),
        Err(KdTreeError::NotPrepared)
    ));
}

#[test]
fn test_precision_mismatch_is_rejected() {
    let mut tree = KdTree::<usize, f32>::new();
    tree.push(
        [
            V3c::new(0., 0., 0.),
            V3c::new(1., 0., 0.),
            V3c::new(0., 1., 0.),
        ],
        0,
    )
    .ok()
    .unwrap();
    tree.prepare().ok().unwrap();
    let bytes = tree.to_bytes().ok().unwrap();

    let result = KdTree::<usize, f64>::from_bytes(&bytes);
    assert!(matches!(
        result,
        Err(KdTreeError::PrecisionMismatch {
            expected: 64,
            found: 32
        })
    ));
    assert_eq!(result.err().unwrap().kind(), ErrorKind::Format);
    assert!(KdTree::<usize, f32>::from_bytes(&bytes).is_ok());
}

#[test]
fn test_truncated_cache_is_rejected() {
    let tree = random_tree(KdTreeConfig::default(), 100);
    let bytes = tree.to_bytes().ok().unwrap();
    for cut in [0, 1, 8, bytes.len() / 3, bytes.len() / 2, bytes.len() - 1] {
        let result = KdTree::<usize, f64>::from_bytes(&bytes[..cut]);
        assert!(
            matches!(result, Err(KdTreeError::CacheFormatInvalid(_))),
            "cut at {cut}"
        );
    }
}

#[test]
fn test_foreign_data_is_rejected() {
    let tree = random_tree(KdTreeConfig::default(), 10);
    let mut bytes = tree.to_bytes().ok().unwrap();

    // "l5:trikd..."
    assert_eq!(&bytes[3..8], b"trikd");
    bytes[3] = b'x';
    assert!(matches!(
        KdTree::<usize, f64>::from_bytes(&bytes),
        Err(KdTreeError::CacheFormatInvalid(_))
    ));

    let not_a_list = 42_u32.to_bencode().ok().unwrap();
    assert!(matches!(
        KdTree::<usize, f64>::from_bytes(&not_a_list),
        Err(KdTreeError::CacheFormatInvalid(_))
    ));
    assert!(matches!(
        KdTree::<usize, f64>::from_bytes(b"random garbage"),
        Err(KdTreeError::CacheFormatInvalid(_))
    ));
}

#[test]
fn test_payloads_supplied_on_load() {
    let names = ["floor", "wall", "roof"];
    let mut tree = KdTree::<&str, f64>::new();
    for (i, name) in names.iter().enumerate() {
        let offset = V3c::new(0., 0., i as f64);
        tree.push(
            [
                V3c::new(0., 0., 0.) + offset,
                V3c::new(1., 0., 0.) + offset,
                V3c::new(0., 1., 0.) + offset,
            ],
            *name,
        )
        .ok()
        .unwrap();
    }
    tree.prepare().ok().unwrap();
    let bytes = tree.to_bytes_without_payloads().ok().unwrap();

    let decoded = KdTree::<&str, f64>::from_bytes_with_payloads(&bytes, names.to_vec())
        .ok()
        .unwrap();
    let mut ray = Ray::new(V3c::new(0.25, 0.25, 10.), V3c::new(0., 0., -1.));
    let hit = decoded
        .shoot(&mut ray, &mut TraversalStack::new())
        .ok()
        .unwrap()
        .unwrap();
    assert_eq!(*hit.payload, "roof");

    assert!(matches!(
        KdTree::<&str, f64>::from_bytes_with_payloads(&bytes, vec!["floor"]),
        Err(KdTreeError::PayloadCountMismatch {
            expected: 3,
            actual: 1
        })
    ));

    // the payloads are not inside the cache
    assert!(matches!(
        KdTree::<String, f64>::from_bytes(&bytes),
        Err(KdTreeError::CacheFormatInvalid(_))
    ));
}

#[test]
fn test_save_and_load() {
    let tree = random_tree(KdTreeConfig::default(), 500);
    let directory = tempfile::tempdir().ok().unwrap();
    let path = directory.path().join("scene.kdc");
    tree.save(&path).ok().unwrap();

    let loaded = KdTree::<usize, f64>::load(&path).ok().unwrap();
    let rays = random_rays(100);
    assert_eq!(nearest_hits(&tree, &rays), nearest_hits(&loaded, &rays));

    let stripped_path = directory.path().join("stripped.kdc");
    tree.save_without_payloads(&stripped_path).ok().unwrap();
    let payloads = (0..tree.len()).map(|i| i * 2).collect::<Vec<_>>();
    let loaded = KdTree::<usize, f64>::load_with_payloads(&stripped_path, payloads)
        .ok()
        .unwrap();
    assert_eq!(loaded.payload(3), Some(&6));

    let empty_path = directory.path().join("empty.kdc");
    std::fs::File::create(&empty_path).ok().unwrap();
    assert!(matches!(
        KdTree::<usize, f64>::load(&empty_path),
        Err(KdTreeError::CacheFormatInvalid(_))
    ));

    let missing = KdTree::<usize, f64>::load(directory.path().join("missing.kdc"));
    assert_eq!(missing.err().unwrap().kind(), ErrorKind::Io);
}

/// Two triangles far apart along x, so the root splits them into two leaves
fn two_leaf_tree() -> KdTree<usize, f64> {
    let mut tree = KdTree::with_config(
        KdTreeConfig::default()
            .with_method(BuildMethod::Fast)
            .with_max_leaf_size(1),
    )
    .ok()
    .unwrap();
    for (index, x) in [0., 10.].into_iter().enumerate() {
        tree.push(
            [
                V3c::new(x, 0., 0.),
                V3c::new(x + 1., 0., 0.),
                V3c::new(x, 1., 0.),
            ],
            index,
        )
        .ok()
        .unwrap();
    }
    tree.prepare().ok().unwrap();
    tree
}

/// The encoded form of a raw array inside the cache, with its length prefix
fn encoded_array<V: bytemuck::Pod>(values: &[V]) -> Vec<u8> {
    let raw: &[u8] = bytemuck::cast_slice(values);
    [format!("{}:", raw.len()).as_bytes(), raw].concat()
}

/// Replaces the array `original` inside the cache with `patched` of the same size
fn patch_array<V: bytemuck::Pod>(bytes: &[u8], original: &[V], patched: &[V]) -> Vec<u8> {
    let original = encoded_array(original);
    let patched = encoded_array(patched);
    assert_eq!(original.len(), patched.len());
    let offset = bytes
        .windows(original.len())
        .position(|window| window == original.as_slice())
        .unwrap();
    let mut result = bytes.to_vec();
    result[offset..offset + patched.len()].copy_from_slice(&patched);
    result
}

fn assert_invalid_cache(bytes: &[u8]) {
    let result = KdTree::<usize, f64>::from_bytes(bytes);
    assert!(
        matches!(result, Err(KdTreeError::CacheFormatInvalid(_))),
        "{:?}",
        result.err()
    );
}

#[test]
fn test_corrupted_nodes_are_rejected() {
    let tree = two_leaf_tree();
    let bytes = tree.to_bytes().ok().unwrap();
    let prepared = tree.prepared().ok().unwrap();
    assert_eq!(prepared.nodes.len(), 3);
    assert!(matches!(
        prepared.nodes.get(0),
        NodeContent::Internal { near: 1, far: 2, .. }
    ));
    let (words, splits) = flatten_nodes(&prepared.nodes);

    // the unchanged words decode fine
    assert!(KdTree::<usize, f64>::from_bytes(&patch_array(&bytes, &words, &words)).is_ok());

    let patched = |word: usize, value: u32| {
        let mut patched_words = words.clone();
        patched_words[word] = value;
        patch_array(&bytes, &words, &patched_words)
    };
    // root child pointing back to the root
    assert_invalid_cache(&patched(1, 0));
    // root child beyond the last node
    assert_invalid_cache(&patched(2, 3));
    // leaf claiming more indices than stored
    assert_eq!(words[3], LEAF_TAG);
    assert_invalid_cache(&patched(5, 5));
    // leaf starting past the index array
    assert_invalid_cache(&patched(4, u32::MAX));
    // neither an axis nor a leaf
    assert_invalid_cache(&patched(3, 7));

    let mut patched_splits = splits.clone();
    patched_splits[0] = f64::NAN;
    assert_invalid_cache(&patch_array(&bytes, &splits, &patched_splits));
    patched_splits[0] = f64::INFINITY;
    assert_invalid_cache(&patch_array(&bytes, &splits, &patched_splits));
}

#[test]
fn test_corrupted_leaf_indices_are_rejected() {
    let tree = two_leaf_tree();
    let bytes = tree.to_bytes().ok().unwrap();
    let leaf_triangles = tree.prepared().ok().unwrap().leaf_triangles.as_slice().to_vec();
    assert_eq!(leaf_triangles.len(), 2);

    let mut patched = leaf_triangles.clone();
    patched[1] = 2;
    assert_invalid_cache(&patch_array(&bytes, &leaf_triangles, &patched));
    patched[1] = u32::MAX;
    assert_invalid_cache(&patch_array(&bytes, &leaf_triangles, &patched));
}

#[test]
fn test_degenerate_cached_triangle_is_rejected() {
    let tree = two_leaf_tree();
    let bytes = tree.to_bytes().ok().unwrap();
    let vertices = (0..tree.len())
        .flat_map(|index| tree.triangle(index).unwrap().vertices().to_vec())
        .flat_map(|vertex| vertex.to_array())
        .collect::<Vec<f64>>();

    // collapse the second triangle into its first vertex
    let mut patched = vertices.clone();
    for value in 12..18 {
        patched[value] = vertices[9 + value % 3];
    }
    assert_invalid_cache(&patch_array(&bytes, &vertices, &patched));
}

#[test]
fn test_foreign_byte_order_is_rejected() {
    let bytes = two_leaf_tree().to_bytes().ok().unwrap();
    let (native, foreign): (&[u8], &[u8]) = if cfg!(target_endian = "little") {
        (b"2:le", b"2:be")
    } else {
        (b"2:be", b"2:le")
    };
    let offset = bytes
        .windows(native.len())
        .position(|window| window == native)
        .unwrap();
    let mut patched = bytes.clone();
    patched[offset..offset + foreign.len()].copy_from_slice(foreign);
    assert_invalid_cache(&patched);
}

#[test]
fn test_failed_save_keeps_existing_cache() {
    let tree = two_leaf_tree();
    let directory = tempfile::tempdir().ok().unwrap();
    let path = directory.path().join("scene.kdc");
    tree.save(&path).ok().unwrap();

    let unprepared = KdTree::<usize, f64>::new();
    assert!(matches!(unprepared.save(&path), Err(KdTreeError::NotPrepared)));
    assert!(matches!(
        unprepared.save_without_payloads(&path),
        Err(KdTreeError::NotPrepared)
    ));

    let loaded = KdTree::<usize, f64>::load(&path).ok().unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(loaded.prepared().ok().unwrap() == tree.prepared().ok().unwrap());
}
