//! Mapping of BVH joint names onto H-Anim joint, segment and site names.
//!
//! Only a level-of-articulation 1 subset is recognized; anything else keeps its BVH name.

use crate::types::{Hierarchy, Index};
use std::collections::HashSet;

/// First entry is the H-Anim joint name, second the segment it drives, the rest are
/// case-insensitive substrings of BVH names that map onto them. Order matters: earlier
/// rows win when a BVH name contains several aliases.
const LOA1_ALIAS_TABLE: &[(&str, &str, &[&str])] = &[
    ("humanoidroot", "sacrum", &["root", "hips"]),
    ("sacroiliac", "pelvis", &["waist"]),
    ("hip", "thigh", &["hip"]),
    ("knee", "calf", &["knee"]),
    ("midtarsal", "middistal", &["ankleend"]),
    ("ankle", "hindfoot", &["ankle"]),
    ("Chest2", "", &["chest2"]),
    ("vl5", "l5", &["chest"]),
    ("shoulder", "upperarm", &["shoulder"]),
    ("elbow", "forearm", &["elbow"]),
    ("wrist", "hand", &["wrist"]),
    ("skullbase", "skull", &["head", "noggin"]),
];

/// H-Anim names recognized for a single BVH name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HAnimName {
    pub joint: String,
    /// empty when no segment name is implied by the joint
    pub segment: String,
    pub found: bool,
}

/// Look up the H-Anim joint and segment names for a BVH joint name.
pub fn hanim_name_for(bvh_name: &str) -> HAnimName {
    if bvh_name == "ROOT" {
        return HAnimName {
            joint: "humanoidroot".to_string(),
            segment: "sacrum".to_string(),
            found: true,
        };
    }
    let lower = bvh_name.to_lowercase();
    let side = if lower.contains("left") {
        "l_"
    } else if lower.contains("right") {
        "r_"
    } else {
        ""
    };
    for (joint, segment, aliases) in LOA1_ALIAS_TABLE {
        if aliases.iter().any(|alias| lower.contains(alias)) {
            // sideless joints such as humanoidroot never take a prefix
            let side = if matches!(*joint, "humanoidroot" | "sacroiliac" | "vl5" | "skullbase" | "Chest2") {
                ""
            } else {
                side
            };
            let segment = if segment.is_empty() {
                String::new()
            } else {
                format!("{}{}", side, segment)
            };
            return HAnimName {
                joint: format!("{}{}", side, joint),
                segment,
                found: true,
            };
        }
    }
    HAnimName {
        joint: bvh_name.to_string(),
        segment: String::new(),
        found: false,
    }
}

/// Turn arbitrary text into a legal X3D `DEF`/`name` identifier.
pub fn to_identifier(text: &str) -> String {
    let mut id: String = text
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' { c } else { '_' })
        .collect();
    match id.chars().next() {
        None => id.push('_'),
        Some(c) if c.is_ascii_digit() || c == '-' || c == '.' => id.insert(0, '_'),
        _ => {}
    }
    id
}

/// Every X3D name derived for one joint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointNames {
    pub bvh_name: String,
    pub joint_name: String,
    pub segment_name: String,
    pub site_name: String,
    pub joint_def: String,
    pub segment_def: String,
    pub site_def: String,
    pub found: bool,
}

/// Names for each joint of a hierarchy, indexed like `Hierarchy::joints`.
///
/// Joint and segment names are made unique by suffixing the joint index on collision,
/// since several BVH joints (e.g. `Chest3`, `Chest4`) can match the same alias.
pub fn name_table(hierarchy: &Hierarchy, model_name: &str) -> Vec<JointNames> {
    let mut used_joints: HashSet<String> = HashSet::new();
    let mut used_segments: HashSet<String> = HashSet::new();
    let mut table: Vec<Option<JointNames>> = vec![None; hierarchy.joints.len()];

    // parents before children, so segment names can refer to the parent's joint name
    for index in hierarchy.depth_first() {
        let joint = &hierarchy.joints[index];
        let hanim = hanim_name_for(&joint.name);

        let joint_name = unique(to_identifier(&hanim.joint), index, &mut used_joints);
        let parent_joint_name = joint
            .parent
            .and_then(|p| table.get(p).and_then(Option::as_ref))
            .map(|names| names.joint_name.clone());
        let segment_base = if !hanim.segment.is_empty() {
            to_identifier(&hanim.segment)
        } else if let Some(parent) = parent_joint_name {
            format!("{}_to_{}", parent, joint_name)
        } else {
            format!("{}_segment", joint_name)
        };
        let segment_name = unique(segment_base, index, &mut used_segments);
        let site_name = format!("{}_tip", segment_name);

        table[index] = Some(JointNames {
            bvh_name: joint.name.clone(),
            joint_def: def_name(model_name, &joint_name),
            segment_def: def_name(model_name, &segment_name),
            site_def: def_name(model_name, &site_name),
            joint_name,
            segment_name,
            site_name,
            found: hanim.found,
        });
    }

    table
        .into_iter()
        .enumerate()
        .map(|(index, names)| names.unwrap_or_else(|| orphan_names(hierarchy, model_name, index)))
        .collect()
}

/// `<model>_<name>`, the DEF convention used throughout the generated scene.
pub fn def_name(model_name: &str, name: &str) -> String {
    format!("{}_{}", model_name, name)
}

fn unique(base: String, index: Index, used: &mut HashSet<String>) -> String {
    let name = if used.contains(&base) {
        format!("{}_{}", base, index)
    } else {
        base
    };
    used.insert(name.clone());
    name
}

// joints not reachable from a top-level joint; only possible in hand-built hierarchies
fn orphan_names(hierarchy: &Hierarchy, model_name: &str, index: Index) -> JointNames {
    let bvh_name = hierarchy.joints[index].name.clone();
    let joint_name = format!("{}_{}", to_identifier(&bvh_name), index);
    let segment_name = format!("{}_segment", joint_name);
    let site_name = format!("{}_tip", segment_name);
    JointNames {
        bvh_name,
        joint_def: def_name(model_name, &joint_name),
        segment_def: def_name(model_name, &segment_name),
        site_def: def_name(model_name, &site_name),
        joint_name,
        segment_name,
        site_name,
        found: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_bvh_names_map_to_loa1() {
        assert_eq!(hanim_name_for("Hips").joint, "humanoidroot");
        assert_eq!(hanim_name_for("Hips").segment, "sacrum");
        assert_eq!(hanim_name_for("LeftHip").joint, "l_hip");
        assert_eq!(hanim_name_for("LeftHip").segment, "l_thigh");
        assert_eq!(hanim_name_for("RightKnee").joint, "r_knee");
        assert_eq!(hanim_name_for("Head").joint, "skullbase");
        assert_eq!(hanim_name_for("ROOT").segment, "sacrum");
    }

    #[test]
    fn alias_order_prefers_ankle_end() {
        assert_eq!(hanim_name_for("LeftAnkleEnd").joint, "l_midtarsal");
        assert_eq!(hanim_name_for("LeftAnkle").joint, "l_ankle");
    }

    #[test]
    fn unknown_names_are_kept() {
        let name = hanim_name_for("LeftFingerBase");
        assert_eq!(name.joint, "LeftFingerBase");
        assert!(name.segment.is_empty());
        assert!(!name.found);
    }

    #[test]
    fn identifiers_are_sanitized() {
        assert_eq!(to_identifier("Left Hand"), "Left_Hand");
        assert_eq!(to_identifier("3rdFinger"), "_3rdFinger");
        assert_eq!(to_identifier(""), "_");
    }
}
