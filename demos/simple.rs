use std::ops::ControlFlow;
use trikd_rs::{BuildMethod, KdTree, KdTreeConfig, Ray, TraversalStack, V3c};

fn main() {
    // A tree is created empty, with the default configuration or a custom one
    let config = KdTreeConfig::default()
        .with_method(BuildMethod::Optimal) // Fast builds quicker, Optimal traces quicker
        .with_max_leaf_size(4); // Nodes with this many triangles or fewer become leaves
    let mut tree: KdTree<Surface, f64> = KdTree::with_config(config).ok().unwrap();

    // Every triangle carries a payload, which is handed back on every hit
    tree.push(
        [
            V3c::new(-10., 0., -10.),
            V3c::new(10., 0., -10.),
            V3c::new(0., 0., 10.),
        ],
        Surface { material_id: 1 },
    )
    .ok()
    .unwrap();

    // Indexed meshes can be added in one go: a unit cube floating above the floor
    let positions = (0..8)
        .map(|i| V3c::new((i & 1) as f64, 1. + ((i >> 1) & 1) as f64, ((i >> 2) & 1) as f64))
        .collect::<Vec<_>>();
    let faces = [
        [0, 2, 1],
        [1, 2, 3],
        [4, 5, 6],
        [5, 7, 6],
        [0, 1, 4],
        [1, 5, 4],
        [2, 6, 3],
        [3, 6, 7],
        [0, 4, 2],
        [2, 4, 6],
        [1, 3, 5],
        [3, 7, 5],
    ];
    let cube = tree
        .push_indexed(&positions, &faces, (0..faces.len()).map(|_| Surface { material_id: 2 }))
        .ok()
        .unwrap();
    assert_eq!(cube, 1..13);

    // Degenerate triangles are refused
    assert!(tree
        .push([V3c::unit(0.), V3c::unit(1.), V3c::unit(2.)], Surface::default())
        .is_err());

    // Once every triangle is in, the tree is built; it is read-only from here on
    tree.prepare().ok().unwrap();
    println!("{:?}", tree.stats().unwrap());

    // Rays are traced with a scratch stack; one stack per thread, re-used between rays
    let mut stack = TraversalStack::new();
    let mut ray = Ray::new(V3c::new(0.25, 10., 0.3), V3c::new(0., -1., 0.));
    let hit = tree.shoot(&mut ray, &mut stack).ok().unwrap().unwrap();
    assert_eq!(hit.payload.material_id, 2);
    assert!((hit.distance - 8.).abs() < 1e-9);

    // Every hit along the ray, ordered by distance
    let mut hits = Vec::new();
    tree.shoot_all(&mut ray, &mut stack, &mut hits).ok().unwrap();
    assert_eq!(
        hits.iter().map(|hit| hit.payload.material_id).collect::<Vec<_>>(),
        vec![2, 2, 1]
    );

    // ..or hits one by one, until the visitor had enough
    let mut first_floor_hit = None;
    tree.shoot_with(&mut ray, &mut stack, |hit| {
        if 1 == hit.payload.material_id {
            first_floor_hit = Some(hit.distance);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    })
    .ok()
    .unwrap();
    assert!((first_floor_hit.unwrap() - 10.).abs() < 1e-9);

    // The built tree can be cached and loaded back without building it again
    #[cfg(feature = "bytecode")]
    {
        let bytes = tree.to_bytes().ok().unwrap();
        let cached: KdTree<Surface, f64> = KdTree::from_bytes(&bytes).ok().unwrap();
        let mut ray = Ray::new(V3c::new(0.25, 10., 0.3), V3c::new(0., -1., 0.));
        let hit = cached.shoot(&mut ray, &mut stack).ok().unwrap().unwrap();
        assert_eq!(hit.payload.material_id, 2);
    }
    println!("{} rays fired", tree.rays_fired());
}

// To store the payloads inside the cache, the bendy traits are needed
// Without them the tree can still be cached through to_bytes_without_payloads
#[cfg(feature = "bytecode")]
use bendy::{
    decoding::{FromBencode, Object},
    encoding::{SingleItemEncoder, ToBencode},
};

#[cfg(feature = "bytecode")]
impl ToBencode for Surface {
    const MAX_DEPTH: usize = 1;
    fn encode(&self, encoder: SingleItemEncoder<'_>) -> Result<(), bendy::encoding::Error> {
        encoder.emit_int(self.material_id)
    }
}

#[cfg(feature = "bytecode")]
impl FromBencode for Surface {
    fn decode_bencode_object(object: Object<'_, '_>) -> Result<Self, bendy::decoding::Error> {
        Ok(Surface {
            material_id: u32::decode_bencode_object(object)?,
        })
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
struct Surface {
    material_id: u32,
}
