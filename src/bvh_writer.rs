use crate::types::*;
use crate::utils::{format_number, format_position, indent};

/// Canonical BVH text for a hierarchy: two-space indentation, fields in the order
/// `OFFSET`, `CHANNELS`, child joints, `End Site`, then the `MOTION` block if any.
///
/// Numbers are written so that parsing the result gives back the same values.
pub fn to_bvh_text(hierarchy: &Hierarchy) -> String {
    let mut out = String::from("HIERARCHY\n");
    for root in hierarchy.roots.iter().filter_map(|&i| hierarchy.find_joint_by_index(i)) {
        write_joint(hierarchy, root, 0, &mut out);
    }
    if let Some(motion) = &hierarchy.motion {
        write_motion(motion, &mut out);
    }
    out
}

fn push_line(out: &mut String, level: usize, text: &str) {
    out.push_str(&indent(level));
    out.push_str(text);
    out.push('\n');
}

fn write_joint(hierarchy: &Hierarchy, joint: &Joint, level: usize, out: &mut String) {
    let keyword = if joint.parent.is_none() { "ROOT" } else { "JOINT" };
    push_line(out, level, &format!("{} {}", keyword, joint.name));
    push_line(out, level, "{");
    push_line(out, level + 1, &format!("OFFSET {}", format_position(joint.offset)));
    //// the declared count, not the names, decides how many frame columns the joint owns
    if joint.declared_channels > 0 || !joint.channel_names.is_empty() {
        let channels = format!("CHANNELS {} {}", joint.declared_channels, joint.channel_names_string());
        push_line(out, level + 1, channels.trim_end());
    }
    for child in hierarchy.children_of(joint) {
        write_joint(hierarchy, child, level + 1, out);
    }
    if let Some(site) = joint.end_site {
        push_line(out, level + 1, "End Site");
        push_line(out, level + 1, "{");
        push_line(out, level + 2, &format!("OFFSET {}", format_position(site)));
        push_line(out, level + 1, "}");
    }
    push_line(out, level, "}");
}

fn write_motion(motion: &Motion, out: &mut String) {
    out.push_str("MOTION\n");
    out.push_str(&format!("Frames: {}\n", motion.frame_count()));
    out.push_str(&format!("Frame Time: {}\n", format_number(motion.frame_duration)));
    for frame in &motion.frames {
        out.push_str(&frame_line(frame, format_number));
        out.push('\n');
    }
}

/// Values separated by spaces, with a tab between each group of three.
pub(crate) fn frame_line<F>(frame: &[f64], format: F) -> String
where
    F: Fn(f64) -> String,
{
    frame
        .chunks(3)
        .map(|triple| {
            triple
                .iter()
                .map(|&value| format(value))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\t")
}
