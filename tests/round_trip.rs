use bvh_hanim::{load_bvh_from_file, parse, parse_bytes, to_bvh_text, BvhError, Hierarchy, ParseOptions};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn data(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

fn assert_frames_close(a: &Hierarchy, b: &Hierarchy) {
    let (a, b) = (a.motion.as_ref().unwrap(), b.motion.as_ref().unwrap());
    assert_eq!(a.frames.len(), b.frames.len());
    for (fa, fb) in a.frames.iter().zip(&b.frames) {
        assert_eq!(fa.len(), fb.len());
        for (va, vb) in fa.iter().zip(fb) {
            assert!((va - vb).abs() < 1e-9, "{} != {}", va, vb);
        }
    }
}

#[test]
fn hips_chest_end_to_end() {
    let (h, diagnostics) = load_bvh_from_file(data("hips_chest.bvh")).unwrap();
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    assert_eq!(h.root_name, "Hips");
    assert_eq!(h.joints.len(), 2);
    assert_eq!(h.expected_channels_per_frame, 9);
    assert_eq!(h.motion.as_ref().unwrap().frames, vec![vec![0.0; 9]]);

    let (reparsed, diagnostics) = parse(&to_bvh_text(&h));
    assert!(diagnostics.is_empty());
    assert_eq!(reparsed, h);
}

#[test]
fn walk_keeps_layout_and_offsets() {
    let (h, diagnostics) = load_bvh_from_file(data("walk.bvh")).unwrap();
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);

    let names: Vec<&str> = h.depth_first().into_iter().map(|i| h.joints[i].name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Hips", "LeftHip", "LeftKnee", "LeftAnkle", "RightHip", "RightKnee", "RightAnkle", "Chest", "Neck", "Head"]
    );
    assert_eq!(h.expected_channels_per_frame, 33);
    assert_eq!(h.attached_channel_count(), 33);

    let motion = h.motion.as_ref().unwrap();
    assert_eq!(motion.frame_count(), 3);
    assert!(motion.frames.iter().all(|frame| frame.len() == 33));
    assert_eq!(motion.frame_rate(), 25.0);

    for joint in &h.joints {
        let expected = match h.parent_of(joint) {
            Some(parent) => parent.cumulative_offset + joint.offset,
            None => joint.offset,
        };
        assert_eq!(joint.cumulative_offset, expected, "{}", joint.name);
    }
    let head = h.find_joint_by_name("Head").unwrap();
    assert_eq!(head.cumulative_offset.y, 18.0);
}

#[test]
fn walk_round_trip() {
    let (h, _) = load_bvh_from_file(data("walk.bvh")).unwrap();
    let written = to_bvh_text(&h);
    let (reparsed, diagnostics) = parse(&written);
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);

    assert_eq!(reparsed.joints.len(), h.joints.len());
    for (a, b) in reparsed.joints.iter().zip(&h.joints) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.channel_names, b.channel_names);
        assert_eq!(a.channel_offset, b.channel_offset);
        assert_eq!(a.end_site, b.end_site);
    }
    assert_frames_close(&reparsed, &h);

    // writing the re-parsed hierarchy again changes nothing
    assert_eq!(to_bvh_text(&reparsed), written);
}

#[test]
fn hard_failures_are_errors() {
    let missing = load_bvh_from_file(data("no_such_file.bvh"));
    assert!(matches!(missing, Err(BvhError::Read { .. })));

    let not_text = parse_bytes(&[0x48, 0xff, 0xfe, 0x00], &ParseOptions::default());
    assert!(matches!(not_text, Err(BvhError::NotUtf8(_))));
}
