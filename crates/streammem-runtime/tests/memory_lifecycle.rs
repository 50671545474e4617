//! End-to-end properties of the frame loop, checked through the files it
//! writes.

use std::fs;
use std::path::{Path, PathBuf};

use streammem_dump::{ArtifactWriter, artifact_file_name, compare_dumps};
use streammem_memory::SENTINEL_TIMESTAMP;
use streammem_perception::{EgoPose, PcRange, Quaternion, Vec3};
use streammem_runtime::synthetic::PROPOSALS;
use streammem_runtime::{
    FrameInput, FrameRunner, HeadShape, ReplayInference, RunnerConfig, SensorInput, SyntheticInference,
    VecFrameSource,
};
use streammem_types::Tensor;

const HIDDEN: usize = 4;

fn head(pre: usize, post: usize) -> HeadShape {
    HeadShape {
        num_layers: 2,
        num_proposals: 1,
        num_propagated: 1,
        num_classes: 3,
        code_size: 10,
        hidden_dim: HIDDEN,
        pre_capacity: pre,
        post_capacity: post,
    }
}

fn config(pre: usize, post: usize) -> RunnerConfig {
    RunnerConfig {
        head: head(pre, post),
        provenance_tag: "rs".to_string(),
        manifest_path: None,
    }
}

fn frame_dir(root: &Path, index: usize) -> PathBuf {
    root.join(format!("frame_{index:03}"))
}

/// One proposal per frame whose embedding is filled with `tag`.
fn tagged_frame(root: &Path, index: usize, tag: f32, point: [f32; 3], pose: EgoPose) -> FrameInput {
    let mut row = vec![tag; HIDDEN];
    row.extend(point);
    row.push(0.9);
    let proposals = Tensor::from_f32(vec![1, HIDDEN + 4], row).unwrap();
    FrameInput::new(index, index as f64 * 0.5, pose, frame_dir(root, index))
        .with_sensors(SensorInput::new().with(PROPOSALS, proposals))
}

fn tagged_frames(root: &Path, n: usize) -> VecFrameSource {
    VecFrameSource::new(
        (0..n)
            .map(|i| tagged_frame(root, i, (i + 1) as f32, [0.5, 0.5, 0.5], EgoPose::identity()))
            .collect(),
    )
}

fn run_synthetic(root: &Path, pre: usize, post: usize, source: &mut VecFrameSource) {
    let cfg = config(pre, post);
    let unit = SyntheticInference::new(cfg.head, PcRange::default(), 42).unwrap();
    let mut runner = FrameRunner::new(cfg, unit).unwrap();
    runner.run(source).unwrap();
}

fn read_artifact(root: &Path, frame: usize, artifact: &str, shape: &[usize]) -> Vec<f32> {
    let path = ArtifactWriter::artifact_dir(&frame_dir(root, frame)).join(artifact_file_name(artifact, shape, "rs"));
    let bytes = fs::read(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn rows(values: &[f32], width: usize) -> Vec<Vec<f32>> {
    values.chunks(width).map(<[f32]>::to_vec).collect()
}

// ── hand-off between frames ─────────────────────────────────────────────────

#[test]
fn memory_fed_to_next_frame_is_the_memory_emitted() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let n = 5;
    run_synthetic(dir.path(), 2, 3, &mut tagged_frames(dir.path(), n));

    for i in 0..n - 1 {
        for (suffix, shape) in [
            ("embedding", vec![1, 2, HIDDEN]),
            ("timestamp", vec![1, 2, 1]),
            ("egopose", vec![1, 2, 4, 4]),
            ("ref_point", vec![1, 2, 3]),
            ("velo", vec![1, 2, 2]),
        ] {
            let emitted = read_artifact(dir.path(), i, &format!("out_mem_{suffix}"), &shape);
            let fed = read_artifact(dir.path(), i + 1, &format!("in_mem_{suffix}"), &shape);
            assert_eq!(emitted, fed, "frame {i} → {} on {suffix}", i + 1);
        }
    }
}

#[test]
fn surviving_hypotheses_keep_their_creation_tag() {
    let dir = tempfile::tempdir().expect("tmp dir");
    run_synthetic(dir.path(), 2, 3, &mut tagged_frames(dir.path(), 4));

    // Frame 3 is fed what frames 2 and 1 created, newest first.
    let fed = rows(&read_artifact(dir.path(), 3, "in_mem_embedding", &[1, 2, HIDDEN]), HIDDEN);
    assert_eq!(fed, vec![vec![3.0; HIDDEN], vec![2.0; HIDDEN]]);
    let ages = read_artifact(dir.path(), 3, "in_mem_timestamp", &[1, 2, 1]);
    assert_eq!(ages, vec![0.0, 0.5]);
}

// ── capacity ────────────────────────────────────────────────────────────────

#[test]
fn every_frame_has_exact_capacities() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let n = 3;
    run_synthetic(dir.path(), 2, 3, &mut tagged_frames(dir.path(), n));

    for i in 0..n {
        assert_eq!(read_artifact(dir.path(), i, "in_mem_embedding", &[1, 2, HIDDEN]).len(), 2 * HIDDEN);
        assert_eq!(read_artifact(dir.path(), i, "out_mem_velo", &[1, 2, 2]).len(), 4);
        assert_eq!(read_artifact(dir.path(), i, "post_mem_embedding", &[1, 3, HIDDEN]).len(), 3 * HIDDEN);
        assert_eq!(read_artifact(dir.path(), i, "post_mem_egopose", &[1, 3, 4, 4]).len(), 48);
        assert_eq!(read_artifact(dir.path(), i, "out_rec_ego_pose", &[1, 3, 4, 4]).len(), 48);
    }
}

// ── frame-0 boundary ────────────────────────────────────────────────────────

#[test]
fn first_frame_is_fed_sentinels_only() {
    let dir = tempfile::tempdir().expect("tmp dir");
    run_synthetic(dir.path(), 2, 3, &mut tagged_frames(dir.path(), 1));

    let ages = read_artifact(dir.path(), 0, "in_mem_timestamp", &[1, 2, 1]);
    assert!(ages.iter().all(|&t| t == SENTINEL_TIMESTAMP), "{ages:?}");
    let emb = read_artifact(dir.path(), 0, "in_mem_embedding", &[1, 2, HIDDEN]);
    assert!(emb.iter().all(|&v| v == 0.0));
}

#[test]
fn sentinels_never_match_a_new_detection() {
    let dir = tempfile::tempdir().expect("tmp dir");
    // Frame 1's detection sits exactly on the sentinels' reference point; the
    // only live slot is far away, so no velocity can be inferred.
    let frames = vec![
        tagged_frame(dir.path(), 0, 1.0, [0.9, 0.9, 0.5], EgoPose::identity()),
        tagged_frame(dir.path(), 1, 2.0, [0.0, 0.0, 0.0], EgoPose::identity()),
    ];
    run_synthetic(dir.path(), 2, 3, &mut VecFrameSource::new(frames));

    let velo = read_artifact(dir.path(), 1, "post_mem_velo", &[1, 3, 2]);
    assert_eq!(&velo[..2], &[0.0, 0.0]);
}

#[test]
fn nearby_live_slot_yields_velocity() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let range = PcRange::default();
    let a = range.normalize(Vec3::new(0.0, 0.0, 0.0)).to_array();
    let b = range.normalize(Vec3::new(1.0, 0.0, 0.0)).to_array();
    let frames = vec![
        tagged_frame(dir.path(), 0, 1.0, a, EgoPose::identity()),
        tagged_frame(dir.path(), 1, 2.0, b, EgoPose::identity()),
    ];
    run_synthetic(dir.path(), 2, 3, &mut VecFrameSource::new(frames));

    // 1 m in 0.5 s.
    let velo = read_artifact(dir.path(), 1, "post_mem_velo", &[1, 3, 2]);
    assert!((velo[0] - 2.0).abs() < 1e-3, "{velo:?}");
    assert!(velo[1].abs() < 1e-3);
}

#[test]
fn ego_motion_is_compensated_into_the_current_frame() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let range = PcRange::default();
    let at_origin = range.normalize(Vec3::new(0.0, 0.0, 0.0)).to_array();
    let moved = EgoPose::from_translation_rotation(Vec3::new(4.0, 0.0, 0.0), Quaternion::identity());
    let frames = vec![
        tagged_frame(dir.path(), 0, 1.0, at_origin, EgoPose::identity()),
        tagged_frame(dir.path(), 1, 2.0, at_origin, moved),
    ];
    run_synthetic(dir.path(), 2, 3, &mut VecFrameSource::new(frames));

    // The vehicle drove 4 m forward, so the frame-0 object is now 4 m behind.
    let refs = read_artifact(dir.path(), 1, "post_mem_ref_point", &[1, 3, 3]);
    let prior = range.denormalize(Vec3::new(refs[3], refs[4], refs[5]));
    assert!((prior.x + 4.0).abs() < 1e-3, "{prior:?}");
    assert!(prior.y.abs() < 1e-3);
}

// ── eviction ────────────────────────────────────────────────────────────────

#[test]
fn eviction_is_fifo_by_recency() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let n = 5;
    run_synthetic(dir.path(), 3, 4, &mut tagged_frames(dir.path(), n));

    let expected: [&[f32]; 5] = [&[], &[1.0], &[2.0, 1.0], &[3.0, 2.0, 1.0], &[4.0, 3.0, 2.0]];
    for (i, live) in expected.iter().enumerate() {
        let fed = rows(&read_artifact(dir.path(), i, "in_mem_embedding", &[1, 3, HIDDEN]), HIDDEN);
        let ages = read_artifact(dir.path(), i, "in_mem_timestamp", &[1, 3, 1]);
        for (slot, row) in fed.iter().enumerate() {
            match live.get(slot) {
                Some(tag) => assert_eq!(row, &vec![*tag; HIDDEN], "frame {i} slot {slot}"),
                None => assert_eq!(ages[slot], SENTINEL_TIMESTAMP, "frame {i} slot {slot}"),
            }
        }
    }
}

// ── determinism ─────────────────────────────────────────────────────────────

#[test]
fn reruns_are_byte_identical() {
    let first = tempfile::tempdir().expect("tmp dir");
    let second = tempfile::tempdir().expect("tmp dir");
    run_synthetic(first.path(), 2, 3, &mut tagged_frames(first.path(), 2));
    run_synthetic(second.path(), 2, 3, &mut tagged_frames(second.path(), 2));

    for i in 0..2 {
        let a = ArtifactWriter::artifact_dir(&frame_dir(first.path(), i));
        let b = ArtifactWriter::artifact_dir(&frame_dir(second.path(), i));
        let mut names: Vec<_> = fs::read_dir(&a).unwrap().map(|e| e.unwrap().file_name()).collect();
        names.sort();
        assert_eq!(names.len(), 19);
        for name in names {
            assert_eq!(fs::read(a.join(&name)).unwrap(), fs::read(b.join(&name)).unwrap(), "{name:?}");
        }
    }
}

#[test]
fn rerun_overwrites_previous_dump() {
    let dir = tempfile::tempdir().expect("tmp dir");
    run_synthetic(dir.path(), 2, 3, &mut tagged_frames(dir.path(), 1));
    let frames = vec![tagged_frame(dir.path(), 0, 9.0, [0.5; 3], EgoPose::identity())];
    run_synthetic(dir.path(), 2, 3, &mut VecFrameSource::new(frames));

    let emb = read_artifact(dir.path(), 0, "out_mem_embedding", &[1, 2, HIDDEN]);
    assert_eq!(&emb[..HIDDEN], &[9.0; HIDDEN]);
}

// ── reference scenario ──────────────────────────────────────────────────────

#[test]
fn two_frame_reference_scenario() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let frames = vec![
        tagged_frame(dir.path(), 0, 1.0, [0.5; 3], EgoPose::identity()),
        FrameInput::new(1, 0.5, EgoPose::identity(), frame_dir(dir.path(), 1)),
    ];
    run_synthetic(dir.path(), 2, 3, &mut VecFrameSource::new(frames));

    let fed0 = rows(&read_artifact(dir.path(), 0, "in_mem_embedding", &[1, 2, HIDDEN]), HIDDEN);
    assert_eq!(fed0, vec![vec![0.0; 4], vec![0.0; 4]]);

    let post0 = rows(&read_artifact(dir.path(), 0, "post_mem_embedding", &[1, 3, HIDDEN]), HIDDEN);
    assert_eq!(post0, vec![vec![1.0; 4], vec![0.0; 4], vec![0.0; 4]]);

    let next0 = rows(&read_artifact(dir.path(), 0, "out_mem_embedding", &[1, 2, HIDDEN]), HIDDEN);
    assert_eq!(next0, vec![vec![1.0; 4], vec![0.0; 4]]);

    let fed1 = rows(&read_artifact(dir.path(), 1, "in_mem_embedding", &[1, 2, HIDDEN]), HIDDEN);
    assert_eq!(fed1, next0);
}

// ── cross-implementation check ──────────────────────────────────────────────

#[test]
fn replayed_dump_compares_clean() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let n = 3;
    run_synthetic(dir.path(), 2, 3, &mut tagged_frames(dir.path(), n));

    let cfg = RunnerConfig {
        provenance_tag: "replay".to_string(),
        ..config(2, 3)
    };
    let mut runner = FrameRunner::new(cfg, ReplayInference::new("rs")).unwrap();
    let frames = (0..n)
        .map(|i| FrameInput::new(i, i as f64 * 0.5, EgoPose::identity(), frame_dir(dir.path(), i)))
        .collect();
    runner.run(&mut VecFrameSource::new(frames)).unwrap();

    for i in 0..n {
        let out = ArtifactWriter::artifact_dir(&frame_dir(dir.path(), i));
        let report = compare_dumps(&out, "rs", "replay", 0.0).unwrap();
        assert!(report.is_clean(), "frame {i}:\n{report}");
        assert_eq!(report.diffs.len(), 19);
    }
}
