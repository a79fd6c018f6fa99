use glam::Vec3;
use nebula_lod::ErrorCoefficient;
use nebula_terrain::*;

fn noise_field(settings: TerrainSettings) -> Heightfield {
    let params = HeightmapParams {
        seed: 7,
        amplitude: 400.0,
        ..Default::default()
    };
    HeightmapSampler::new(params).generate(settings).unwrap()
}

fn small_settings() -> TerrainSettings {
    TerrainSettings {
        size: 257,
        world_size: 2560.0,
        max_batch_size: 33,
        min_batch_size: 17,
        skirt_size: 10.0,
        ..Default::default()
    }
}

fn params(camera: Vec3) -> LodSelectionParams {
    LodSelectionParams {
        camera_position: camera,
        error_coefficient: ErrorCoefficient::from_projection(60f32.to_radians(), 720, 2.0),
        enable_morph: true,
    }
}

/// Camera path across the terrain at varying heights.
fn camera_path(world_size: f32) -> impl Iterator<Item = Vec3> {
    (0..12).map(move |i| {
        let t = i as f32 / 11.0;
        Vec3::new(
            (t - 0.5) * world_size * 1.2,
            20.0 + t * 400.0,
            (0.5 - t) * world_size * 0.6,
        )
    })
}

/// 513 vertices with 65/33 batches: three splits, 64 leaves of size 65 with
/// two levels each.
#[test]
fn test_513_terrain_shape() {
    let settings = TerrainSettings::default();
    assert_eq!(settings.num_lod_levels(), 5);
    assert_eq!(settings.num_lod_levels_per_leaf(), 2);

    let tree = QuadTree::build(&Heightfield::flat(settings).unwrap()).unwrap();
    assert_eq!(tree.node_count(), 1 + 4 + 16 + 64);
    let leaves: Vec<_> = tree.leaves().collect();
    assert_eq!(leaves.len(), 64);
    for (_, leaf) in leaves {
        assert_eq!(leaf.depth(), 3, "three splits before reaching leaves");
        assert_eq!(leaf.size(), 65);
        let batches: Vec<u32> = leaf.lod_levels().iter().map(LodLevel::batch_size).collect();
        assert_eq!(batches, vec![65, 33]);
        assert_eq!(leaf.base_lod(), 0);
    }
    for (_, node) in tree.iter().filter(|(_, n)| !n.is_leaf()) {
        assert_eq!(node.lod_count(), 1);
        assert_eq!(node.lod_level(0).batch_size(), 33);
        assert_eq!(node.base_lod(), 4 - node.depth());
    }
}

#[test]
fn test_sibling_edges_overlap_by_one() {
    let tree = QuadTree::build(&Heightfield::flat(TerrainSettings::default()).unwrap()).unwrap();
    for (_, node) in tree.iter() {
        let Some(children) = node.children() else {
            continue;
        };
        let (px, py) = node.offset();
        let step = tree.node(children[0]).size() - 1;
        let expected = [(px, py), (px + step, py), (px, py + step), (px + step, py + step)];
        for (child, offset) in children.iter().zip(expected) {
            assert_eq!(tree.node(*child).offset(), offset);
        }
        let (left_end, _) = tree.node(children[0]).boundary();
        let (right_start, _) = tree.node(children[1]).offset();
        assert_eq!(left_end - right_start, 1, "shared column between siblings");
    }
}

/// Thresholds ascend along each ladder, and a parent never switches away
/// earlier than its most demanding child.
#[test]
fn test_delta_margins_hold() {
    let terrain = Terrain::new(noise_field(small_settings()), 129).unwrap();
    let tree = terrain.quad_tree();
    for (id, node) in tree.iter() {
        let levels = node.lod_levels();
        for pair in levels.windows(2) {
            assert!(
                pair[1].max_height_delta() >= pair[0].max_height_delta() * DELTA_MARGIN,
                "ladder of {id:?} does not ascend"
            );
        }
        if let Some(children) = node.children() {
            let max_child = children
                .iter()
                .map(|&c| {
                    let child = tree.node(c);
                    child.lod_level(child.lod_count() - 1).max_height_delta()
                })
                .fold(0.0f32, f32::max);
            assert!(
                levels[0].max_height_delta() >= max_child * DELTA_MARGIN,
                "{id:?} below its children ({} < {max_child} * margin)",
                levels[0].max_height_delta()
            );
            assert!(node.child_with_max_height_delta().is_some());
        }
    }
}

#[test]
fn test_flat_terrain_is_zero_and_coarse() {
    let terrain = Terrain::new(Heightfield::flat(small_settings()).unwrap(), 129).unwrap();
    assert!(terrain.heightfield().delta_data().iter().all(|d| *d == 0.0));
    let mut terrain = terrain;
    let mut alloc = HostBufferAllocator::new();
    let mut materials = MaterialLibrary::new();
    terrain.load(&mut alloc);
    for camera in camera_path(2560.0) {
        let (frame, draws) = terrain.update(&params(camera), &mut materials);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.rendered[0].node, terrain.quad_tree().root());
        assert_eq!(draws.len(), 1);
    }
}

/// Every frame along the path tiles the terrain exactly, whenever one
/// sibling renders all four are covered, and rendered siblings sit at most
/// one level apart.
#[test]
fn test_frames_tile_without_gaps() {
    let mut terrain = Terrain::new(noise_field(small_settings()), 129).unwrap();
    let mut alloc = HostBufferAllocator::new();
    let mut materials = MaterialLibrary::new();
    terrain.load(&mut alloc);

    let mut max_rendered = 0;
    for camera in camera_path(2560.0) {
        let (frame, draws) = terrain.update(&params(camera), &mut materials);
        let tree = terrain.quad_tree();
        assert_eq!(draws.len(), frame.len());

        let area: u64 = frame
            .rendered
            .iter()
            .map(|r| u64::from(tree.node(r.node).size() - 1).pow(2))
            .sum();
        assert_eq!(area, 256 * 256, "camera {camera}");

        for (id, node) in tree.iter() {
            let Some(children) = node.children() else {
                continue;
            };
            let covered = children
                .iter()
                .filter(|&&c| tree.node(c).is_self_or_child_rendered())
                .count();
            assert!(
                covered == 0 || covered == 4,
                "{id:?} has {covered} of 4 children covered"
            );

            let levels: Vec<u32> = children
                .iter()
                .map(|&c| tree.node(c))
                .filter_map(|child| Some(child.base_lod() + child.current_lod()? as u32))
                .collect();
            if let (Some(lo), Some(hi)) = (levels.iter().min(), levels.iter().max()) {
                assert!(
                    hi - lo <= 1,
                    "children of {id:?} render at levels {levels:?}, camera {camera}"
                );
            }
        }
        for r in &frame.rendered {
            assert!((0.0..=1.0).contains(&r.morph.transition));
        }
        max_rendered = max_rendered.max(frame.len());
    }
    assert!(max_rendered > 4, "a low camera should refine the terrain");
}

/// Destroying and recreating GPU data from regenerated CPU data uploads the
/// same bytes.
#[test]
fn test_gpu_round_trip_identical() {
    let mut terrain = Terrain::new(noise_field(small_settings()), 129).unwrap();
    let mut alloc = HostBufferAllocator::new();

    let snapshot = |terrain: &Terrain, alloc: &HostBufferAllocator| -> Vec<Vec<u8>> {
        let tree = terrain.quad_tree();
        tree.iter()
            .filter(|(_, n)| n.owns_vertex_data())
            .flat_map(|(id, _)| {
                let pair = tree.vertex_data_record(id).unwrap().gpu_buffers().unwrap();
                [
                    alloc.buffer_contents(pair.positions).unwrap().to_vec(),
                    alloc.buffer_contents(pair.deltas).unwrap().to_vec(),
                ]
            })
            .collect()
    };

    terrain.load(&mut alloc);
    let first = snapshot(&terrain, &alloc);
    terrain.unload(&mut alloc);
    assert_eq!(alloc.live_vertex_pairs(), 0);
    terrain.load(&mut alloc);
    let second = snapshot(&terrain, &alloc);
    assert_eq!(first, second);
}

/// Nodes without buffers are skipped and picked up once buffers exist.
#[test]
fn test_allocation_failure_skips_nodes() {
    let mut terrain = Terrain::new(noise_field(small_settings()), 129).unwrap();
    let mut alloc = HostBufferAllocator::with_pair_limit(1);
    let mut materials = MaterialLibrary::new();
    terrain.load(&mut alloc);
    assert_eq!(alloc.live_vertex_pairs(), 1);

    let camera = Vec3::new(0.0, 30.0, 0.0);
    let (frame, draws) = terrain.update(&params(camera), &mut materials);
    assert!(draws.len() < frame.len(), "some selected nodes lack buffers");

    alloc.set_pair_limit(None);
    terrain.load(&mut alloc);
    let (frame, draws) = terrain.update(&params(camera), &mut materials);
    assert_eq!(draws.len(), frame.len());
}

/// A delta reported at one sample lands in the node covering it at that
/// LOD and nowhere else.
#[test]
fn test_notify_delta_reaches_matching_nodes_only() {
    let settings = TerrainSettings::default();
    let mut tree = QuadTree::build(&Heightfield::flat(settings).unwrap()).unwrap();
    let (x, y) = (100, 300);
    tree.notify_delta(x, y, 2, 10.0);

    for (id, node) in tree.iter() {
        let touched = node
            .lod_levels()
            .iter()
            .any(|level| level.staging_height_delta() > 0.0);
        let expected = node.contains_point(x, y) && node.handles_global_lod(2);
        assert_eq!(touched, expected, "{id:?} at {:?}", node.offset());
        if expected {
            assert_eq!(node.depth(), 2);
            assert!(node.lod_level(0).staging_height_delta() >= 10.0);
            assert_eq!(node.lod_level(0).max_height_delta(), 0.0, "not yet finalised");
        }
    }
}
