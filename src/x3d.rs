//! X3D (XML encoding) output: an H-Anim humanoid built from the BVH skeleton, with optional
//! ball-and-stick shapes and one interpolator per animated joint.

use crate::bvh_writer::frame_line;
use crate::hanim::{def_name, name_table, to_identifier, JointNames};
use crate::types::*;
use crate::utils::{
    euler_to_axis_angle, format_decimal, format_number, format_position, format_position_compact, indent,
    xml_escape,
};
use cgmath::Zero;
use std::collections::HashSet;
use std::f64::consts::TAU;
use tracing::{debug, info};

pub const ONE_INCH_TO_METERS: f64 = 0.0254;
/// distance of the default viewpoints from the model, in meters
const VIEWPOINT_DISTANCE: f64 = 8.0;
/// consecutive values closer than this count as sensor noise
const JITTER_THRESHOLD: f64 = 0.000005;

///////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq)]
pub struct X3dOptions {
    /// joint spheres, bone lines and site diamonds
    pub ball_and_stick: bool,
    /// external viewpoints, the humanoid-level site viewpoint and site shapes
    pub illustrate_sites_and_viewpoints: bool,
    /// an extra `HAnimSegment` per parent/child bone carrying the bone line
    pub bone_segment_joints: bool,
    /// echo each joint's BVH `OFFSET` and `CHANNELS` in a comment
    pub channel_comments: bool,
    /// dump every motion frame in a trailing comment
    pub frame_data_comment: bool,
    pub x3d_version: String,
    /// written into the `translated` and `modified` meta tags; today's date when `None`
    pub translated_date: Option<String>,
}

impl Default for X3dOptions {
    fn default() -> Self {
        X3dOptions {
            ball_and_stick: true,
            illustrate_sites_and_viewpoints: true,
            bone_segment_joints: false,
            channel_comments: true,
            frame_data_comment: true,
            x3d_version: "3.3".to_string(),
            translated_date: None,
        }
    }
}

impl X3dOptions {
    pub fn with_ball_and_stick(mut self, enabled: bool) -> Self {
        self.ball_and_stick = enabled;
        self
    }

    pub fn with_illustrations(mut self, enabled: bool) -> Self {
        self.illustrate_sites_and_viewpoints = enabled;
        self
    }

    pub fn with_bone_segment_joints(mut self, enabled: bool) -> Self {
        self.bone_segment_joints = enabled;
        self
    }

    pub fn with_channel_comments(mut self, enabled: bool) -> Self {
        self.channel_comments = enabled;
        self
    }

    pub fn with_frame_data_comment(mut self, enabled: bool) -> Self {
        self.frame_data_comment = enabled;
        self
    }

    pub fn with_x3d_version(mut self, version: impl Into<String>) -> Self {
        self.x3d_version = version.into();
        self
    }

    pub fn with_translated_date(mut self, date: impl Into<String>) -> Self {
        self.translated_date = Some(date.into());
        self
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////

/// Factor converting model units to meters, guessed from the model height.
///
/// Heights above 250 are taken as millimetres, above 100 as centimetres, above 24 as inches and
/// above 2.5 as decimetres. Tiny models are scaled up. Non-positive heights are left alone.
pub fn estimate_scale_factor(height: f64) -> f64 {
    if height > 250.0 {
        0.001
    } else if height > 100.0 {
        0.01
    } else if height > 24.0 {
        ONE_INCH_TO_METERS
    } else if height > 2.5 {
        0.1
    } else if height <= 0.0 {
        1.0
    } else if height < 0.002 {
        1000.0
    } else if height < 0.02 {
        100.0
    } else if height < 0.2 {
        10.0
    } else {
        1.0
    }
}

/// Vertical shift putting the lowest end site on the ground plane; zero when under 10cm.
pub fn height_offset(min_y: f64, scale: f64) -> f64 {
    let offset = -min_y * scale;
    if offset.abs() > 0.1 {
        offset
    } else {
        0.0
    }
}

/// `Bvh` + the output file name without its `.x3d` extension, as a legal DEF prefix.
pub fn model_name_for(output_file_name: &str) -> String {
    let name = format!("Bvh{}", output_file_name.trim());
    let name = name.strip_suffix(".x3d").unwrap_or(&name);
    to_identifier(name)
}

/// One key per frame, evenly spread over `[0, 1]`.
pub fn key_array(frame_count: usize) -> Vec<String> {
    if frame_count == 0 {
        return Vec::new();
    }
    let last = frame_count - 1;
    let mut keys: Vec<String> = (0..last)
        .map(|i| format_decimal(i as f64 / last as f64, 4))
        .collect();
    keys.push("1.0".to_string());
    keys
}

/// Every key of [`key_array`] twice, for stepping through frames one at a time.
pub fn doubled_key_array(frame_count: usize) -> Vec<String> {
    key_array(frame_count)
        .into_iter()
        .flat_map(|key| [key.clone(), key])
        .collect()
}

///////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variation {
    Unchanging,
    Jittery,
    Moving,
}

/// Per-column min/max over all frames plus how much the columns move.
struct ColumnStats {
    ranges: Vec<(f64, f64)>,
    variation: Variation,
}

impl ColumnStats {
    fn gather(frames: &[Vec<f64>], columns: &[(Axis, usize)]) -> Self {
        let mut ranges = vec![(f64::INFINITY, f64::NEG_INFINITY); columns.len()];
        for frame in frames {
            for (range, &(_, column)) in ranges.iter_mut().zip(columns) {
                let value = channel_value(frame, column);
                range.0 = range.0.min(value);
                range.1 = range.1.max(value);
            }
        }

        let mut unchanging = true;
        let mut jittery = true;
        for pair in frames.windows(2) {
            for &(_, column) in columns {
                let delta = (channel_value(&pair[1], column) - channel_value(&pair[0], column)).abs();
                unchanging &= delta == 0.0;
                jittery &= delta <= JITTER_THRESHOLD;
            }
        }
        let variation = if unchanging {
            Variation::Unchanging
        } else if jittery {
            Variation::Jittery
        } else {
            Variation::Moving
        };
        ColumnStats { ranges, variation }
    }

    fn overall(&self) -> Option<(f64, f64)> {
        self.ranges.iter().fold(None, |acc, &(min, max)| match acc {
            None => Some((min, max)),
            Some((lo, hi)) => Some((lo.min(min), hi.max(max))),
        })
    }

    fn describe(&self) -> String {
        self.ranges
            .iter()
            .map(|&(min, max)| format!("[{},{}]", format_number(min), format_number(max)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn channel_value(frame: &[f64], column: usize) -> f64 {
    frame.get(column).copied().unwrap_or(0.0)
}

fn format_rounded(p: Position, digits: usize) -> String {
    format!(
        "{} {} {}",
        format_decimal(p.x, digits),
        format_decimal(p.y, digits),
        format_decimal(p.z, digits)
    )
}

///////////////////////////////////////////////////////////////////////////////////////////////////

struct Scene<'a> {
    hierarchy: &'a Hierarchy,
    options: &'a X3dOptions,
    model_name: String,
    names: Vec<JointNames>,
    scale: f64,
    height_offset: f64,
    segment_uses: Vec<String>,
    site_uses: Vec<String>,
    segment_names: HashSet<String>,
    out: String,
}

impl<'a> Scene<'a> {
    fn new(hierarchy: &'a Hierarchy, output_file_name: &str, options: &'a X3dOptions) -> Self {
        let model_name = model_name_for(output_file_name);
        let names = name_table(hierarchy, &model_name);
        let bounds = hierarchy.bounds;
        let (scale, offset) = if bounds.initialized {
            let scale = estimate_scale_factor(bounds.height());
            (scale, height_offset(bounds.min.y, scale))
        } else {
            (1.0, 0.0)
        };
        let segment_names = names.iter().map(|n| n.segment_name.clone()).collect();
        Scene {
            hierarchy,
            options,
            model_name,
            names,
            scale,
            height_offset: offset,
            segment_uses: Vec::new(),
            site_uses: Vec::new(),
            segment_names,
            out: String::new(),
        }
    }

    fn line(&mut self, level: usize, text: impl AsRef<str>) {
        self.out.push_str(&indent(level));
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn comment(&mut self, level: usize, text: impl AsRef<str>) {
        self.line(level, format!("<!-- {} -->", text.as_ref()));
    }

    fn render(mut self) -> String {
        self.head();
        self.information();
        if self.options.illustrate_sites_and_viewpoints {
            self.viewpoints();
        }
        self.humanoid();
        let hierarchy = self.hierarchy;
        if let Some(motion) = &hierarchy.motion {
            self.motion(motion);
        }
        self.line(1, "</Scene>");
        self.line(0, "</X3D>");
        self.out
    }

    //////////////////////////////////////////////////////////////// HEAD

    fn head(&mut self) {
        let version = xml_escape(&self.options.x3d_version);
        let date = self
            .options
            .translated_date
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%-d %B %Y").to_string());
        let date = xml_escape(&date);
        let model = self.model_name.clone();

        self.line(0, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        self.line(
            0,
            format!(
                "<!DOCTYPE X3D PUBLIC \"ISO//Web3D//DTD X3D {version}//EN\" \"https://www.web3d.org/specifications/x3d-{version}.dtd\">"
            ),
        );
        self.line(
            0,
            format!(
                "<X3D profile='Immersive' version='{version}' xmlns:xsd='http://www.w3.org/2001/XMLSchema-instance' xsd:noNamespaceSchemaLocation='https://www.web3d.org/specifications/x3d-{version}.xsd'>"
            ),
        );
        self.line(1, "<head>");
        self.line(2, "<component level='1' name='H-Anim'/>");
        self.line(2, format!("<meta content='{model}.x3d' name='title'/>"));
        self.line(2, "<meta content='BVH motion capture file converted to an X3D H-Anim humanoid' name='description'/>");
        self.line(2, format!("<meta content='{date}' name='translated'/>"));
        self.line(2, format!("<meta content='{date}' name='modified'/>"));
        self.line(
            2,
            "<meta content='https://www.web3d.org/x3d/content/examples/X3dSceneAuthoringHints.html#MOCAP' name='reference'/>",
        );
        self.line(
            2,
            format!(
                "<meta content='{} {} BVH to X3D converter' name='generator'/>",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
        );
        self.line(2, "<meta content='../license.html' name='license'/>");
        self.line(1, "</head>");
        self.line(1, "<Scene>");
        self.line(2, "<NavigationInfo type='\"EXAMINE\" \"ANY\"'/>");
    }

    fn information(&mut self) {
        let hierarchy = self.hierarchy;
        let bounds = hierarchy.bounds;
        self.line(2, format!("<Group DEF='{}_BvhToX3dConversionImportInformation'>", self.model_name));
        self.comment(
            3,
            format!(
                "{} BVH JOINT definitions found, following HIERARCHY ROOT {}",
                hierarchy.joints.len(),
                xml_escape(&hierarchy.root_name)
            ),
        );
        if bounds.initialized {
            self.comment(
                3,
                format!(
                    "BVH HIERARCHY model size computations: minX={}, maxX={}, width={}; minY={}, maxY={}, height={}; minZ={}, maxZ={}, depth={}",
                    format_number(bounds.min.x),
                    format_number(bounds.max.x),
                    format_number(bounds.width()),
                    format_number(bounds.min.y),
                    format_number(bounds.max.y),
                    format_number(bounds.height()),
                    format_number(bounds.min.z),
                    format_number(bounds.max.z),
                    format_number(bounds.depth()),
                ),
            );
        } else {
            self.comment(3, "No End Site found, BVH HIERARCHY model size unknown");
        }
        if self.scale != 1.0 {
            self.comment(
                3,
                format!(
                    "Estimated rescaling to meters based on height: scaleFactor={} for modified height of {}m",
                    format_number(self.scale),
                    format_decimal(bounds.height() * self.scale, 3)
                ),
            );
        }
        if self.height_offset != 0.0 {
            self.comment(
                3,
                format!(
                    "Vertical offset to move bottom of BVH figure to ground plane: heightOffset={}m",
                    format_decimal(self.height_offset, 3)
                ),
            );
        }

        let matched = self.names.iter().filter(|n| n.found).count();
        self.line(3, "<MetadataSet name='BvhToHAnimConversionNameTable'>");
        self.comment(
            4,
            format!("{} of {} BVH joint names matched H-Anim LOA-1 joint names", matched, self.names.len()),
        );
        self.comment(4, "<MetadataString name='bvhName' reference='bvhType' value='\"name\" \"segmentName\"'/>");
        for index in hierarchy.depth_first() {
            let joint = &hierarchy.joints[index];
            let names = &self.names[index];
            let reference = if joint.parent.is_none() { "ROOT" } else { "JOINT" };
            let mut entries = vec![format!(
                "<MetadataString containerField='value' name='{}' reference='{}' value='\"{}\" \"{}\"'/>",
                xml_escape(&joint.name),
                reference,
                names.joint_name,
                names.segment_name
            )];
            if joint.has_end_site() {
                entries.push(format!(
                    "<MetadataString containerField='value' name='{}Site' reference='Site' value='\"{}\"'/>",
                    xml_escape(&joint.name),
                    names.site_name
                ));
            }
            for entry in entries {
                self.line(4, entry);
            }
        }
        self.line(3, "</MetadataSet>");
        self.line(2, "</Group>");
    }

    fn viewpoints(&mut self) {
        let hierarchy = self.hierarchy;
        let model = self.model_name.clone();
        let half = hierarchy.bounds.half_extent();
        let initial = Position::new(
            half.x * self.scale,
            half.y * self.scale + self.height_offset,
            half.z * self.scale,
        );
        self.line(
            2,
            format!("<Transform DEF='{}_InitialPositionScaled' translation='{}'>", model, format_rounded(initial, 3)),
        );
        self.line(
            3,
            format!(
                "<Viewpoint description='{} model BVH to X3D conversion, from {}m' position='0 0 {}'/>",
                model,
                VIEWPOINT_DISTANCE,
                VIEWPOINT_DISTANCE
            ),
        );
        let ends = hierarchy
            .motion
            .as_ref()
            .and_then(|m| Some((m.frames.first()?, m.frames.last()?)))
            .filter(|(first, last)| first.len() >= 3 && last.len() >= 3);
        if let Some((first, last)) = ends {
            for (label, frame) in [("initial", first), ("final", last)] {
                let position = Position::new(
                    frame[0] * self.scale,
                    frame[1] * self.scale,
                    frame[2] * self.scale + VIEWPOINT_DISTANCE,
                );
                self.line(
                    3,
                    format!(
                        "<Viewpoint description='{} {} motion position' position='{}'/>",
                        model,
                        label,
                        format_rounded(position, 3)
                    ),
                );
            }
        }
        self.line(2, "</Transform>");
    }

    //////////////////////////////////////////////////////////////// SKELETON

    fn humanoid(&mut self) {
        let hierarchy = self.hierarchy;
        let model = self.model_name.clone();
        let humanoid_def = def_name(&model, &to_identifier(&hierarchy.root_name));
        self.line(
            2,
            format!(
                "<HAnimHumanoid DEF='{}' name='{}' version='2.0'>",
                humanoid_def,
                xml_escape(&hierarchy.root_name)
            ),
        );

        if self.options.illustrate_sites_and_viewpoints {
            let root_joint = hierarchy
                .roots
                .first()
                .map_or("humanoidroot".to_string(), |&i| self.names[i].joint_name.clone());
            let view_name = format!("{}_view", root_joint);
            let view_def = def_name(&model, &view_name);
            self.comment(3, "Top-level HAnimSite/Viewpoint attached to HAnimHumanoid is unaffected by motion animation");
            self.line(
                3,
                format!("<HAnimSite DEF='{}' containerField='viewpoints' name='{}'>", view_def, view_name),
            );
            self.line(
                4,
                format!(
                    "<Viewpoint DEF='{}point' description='{} front view towards HAnimHumanoid center' position='0 0 {}'/>",
                    view_def,
                    model,
                    format_decimal(VIEWPOINT_DISTANCE / self.scale, 4)
                ),
            );
            self.line(3, "</HAnimSite>");
            self.site_uses.push(view_def);
        }

        for (i, &root) in hierarchy.roots.iter().enumerate() {
            self.joint(root, 3, i == 0);
        }

        self.comment(
            3,
            "top-level USE nodes follow DEF declarations and can be employed by inverse-kinematics (IK) engines or other HAnim tools",
        );
        for index in hierarchy.depth_first() {
            let use_line = format!("<HAnimJoint USE='{}' containerField='joints'/>", self.names[index].joint_def);
            self.line(3, use_line);
        }
        for segment in std::mem::take(&mut self.segment_uses) {
            self.line(3, format!("<HAnimSegment USE='{}' containerField='segments'/>", segment));
        }
        for site in std::mem::take(&mut self.site_uses) {
            self.line(3, format!("<HAnimSite USE='{}' containerField='sites'/>", site));
        }
        self.line(2, "</HAnimHumanoid>");
    }

    fn joint(&mut self, index: Index, level: usize, first_root: bool) {
        let hierarchy = self.hierarchy;
        let joint = &hierarchy.joints[index];
        let names = self.names[index].clone();
        let is_root = joint.parent.is_none();

        let mut attributes = format!("DEF='{}' name='{}'", names.joint_def, names.joint_name);
        if is_root {
            attributes.push_str(" containerField='skeleton'");
            if self.scale != 1.0 {
                let s = format_number(self.scale);
                attributes.push_str(&format!(" scale='{s} {s} {s}'"));
            }
        }
        if joint.offset != Position::zero() {
            attributes.push_str(&format!(" translation='{}'", format_position_compact(joint.offset)));
        }
        self.line(level, format!("<HAnimJoint {}>", attributes));

        if self.options.channel_comments {
            self.comment(
                level + 1,
                format!(
                    "BVH {} {}, OFFSET {}, CHANNELS {} {}",
                    if is_root { "ROOT" } else { "JOINT" },
                    xml_escape(&joint.name),
                    format_position(joint.offset),
                    joint.channel_count(),
                    xml_escape(&joint.channel_names_string())
                ),
            );
        }

        self.line(
            level + 1,
            format!("<HAnimSegment DEF='{}' name='{}'>", names.segment_def, names.segment_name),
        );
        self.segment_uses.push(names.segment_def.clone());
        if self.options.ball_and_stick {
            if is_root && first_root {
                self.prototype_shapes(level + 2, joint, &names);
            } else {
                let shape = if is_root { "HAnimRootShape" } else { "HAnimJointShape" };
                self.line(
                    level + 2,
                    format!(
                        "<TouchSensor description='HAnimJoint {} {}, HAnimSegment {}'/>",
                        xml_escape(&joint.name),
                        names.joint_name,
                        names.segment_name
                    ),
                );
                self.line(level + 2, format!("<Shape USE='{}'/>", shape));
            }
            if !self.options.bone_segment_joints {
                for &child in &joint.children {
                    self.bone_line(level + 2, &names, child);
                }
            }
        } else {
            self.comment(level + 2, "insert Shape geometry here");
        }
        if let Some(site) = joint.end_site {
            self.site(level + 2, joint, &names, site);
        }
        self.line(level + 1, "</HAnimSegment>");

        if self.options.bone_segment_joints {
            for &child in &joint.children {
                self.bone_segment(level + 1, &names, child);
            }
        }
        for &child in &joint.children {
            self.joint(child, level + 1, false);
        }
        self.line(level, "</HAnimJoint>");
    }

    /// Root shape plus the hidden DEF shapes every other joint, bone and site refers to.
    fn prototype_shapes(&mut self, level: usize, joint: &Joint, names: &JointNames) {
        let r = format_decimal(ONE_INCH_TO_METERS / self.scale, 6);
        self.comment(
            level,
            "humanoidroot HAnimSegment with visualization root shape plus hidden DEF geometry for later use (radius 1 inch)",
        );
        self.line(level, "<Switch whichChoice='0'>");
        self.line(level + 1, "<Group>");
        self.line(
            level + 2,
            format!(
                "<TouchSensor description='HAnimHumanoid ROOT {}, HAnimSegment {}'/>",
                xml_escape(&joint.name),
                names.segment_name
            ),
        );
        self.line(level + 2, "<Shape DEF='HAnimRootShape'>");
        self.line(level + 3, format!("<Sphere DEF='HAnimJointSphere' radius='{}'/>", r));
        self.line(level + 3, "<Appearance>");
        self.line(level + 4, "<Material DEF='HAnimRootMaterial' diffuseColor='0.8 0 0' transparency='0.3'/>");
        self.line(level + 3, "</Appearance>");
        self.line(level + 2, "</Shape>");
        self.line(level + 1, "</Group>");

        self.line(level + 1, "<Shape DEF='HAnimJointShape'>");
        self.line(level + 2, "<Sphere USE='HAnimJointSphere'/>");
        self.line(level + 2, "<Appearance>");
        self.line(level + 3, "<Material DEF='HAnimJointMaterial' diffuseColor='0 0 0.8' transparency='0.3'/>");
        self.line(level + 2, "</Appearance>");
        self.line(level + 1, "</Shape>");

        self.line(level + 1, "<Shape>");
        self.line(level + 2, "<LineSet vertexCount='2'>");
        self.line(level + 3, "<Coordinate point='0 0 0 0 0 0'/>");
        self.line(level + 3, "<ColorRGBA DEF='HAnimSegmentLineColorRGBA' color='1 1 0 1 1 1 0 0.1'/>");
        self.line(level + 2, "</LineSet>");
        self.line(level + 1, "</Shape>");

        self.line(level + 1, "<Shape DEF='HAnimSiteShape'>");
        self.line(
            level + 2,
            "<IndexedFaceSet DEF='DiamondIFS' coordIndex='0 1 2 -1 0 2 3 -1 0 3 4 -1 0 4 1 -1 5 2 1 -1 5 3 2 -1 5 4 3 -1 5 1 4 -1' creaseAngle='0.5' solid='false'>",
        );
        self.line(
            level + 3,
            format!("<Coordinate point='0 {r} 0 -{r} 0 0 0 0 {r} {r} 0 0 0 0 -{r} 0 -{r} 0'/>"),
        );
        self.line(level + 2, "</IndexedFaceSet>");
        self.line(level + 2, "<Appearance>");
        self.line(level + 3, "<Material diffuseColor='1 0.5 0' transparency='0.3'/>");
        self.line(level + 2, "</Appearance>");
        self.line(level + 1, "</Shape>");

        self.line(level + 1, "<Shape>");
        self.line(level + 2, "<LineSet vertexCount='2'>");
        self.line(level + 3, "<Coordinate point='0 0 0 0 0 0'/>");
        self.line(level + 3, "<ColorRGBA DEF='HAnimSiteLineColorRGBA' color='1 0.5 0 1 1 0.5 0 0.1'/>");
        self.line(level + 2, "</LineSet>");
        self.line(level + 1, "</Shape>");
        self.line(level, "</Switch>");
    }

    /// Line from the current joint's origin to a child joint.
    fn bone_line(&mut self, level: usize, names: &JointNames, child: Index) {
        let hierarchy = self.hierarchy;
        let child_offset = hierarchy.joints[child].offset;
        let child_name = self.names[child].joint_name.clone();
        self.comment(
            level,
            format!(
                "HAnimSegment OFFSET visualization line from current <HAnimJoint name='{}'/> to child <HAnimJoint name='{}'/>",
                names.joint_name, child_name
            ),
        );
        self.line(level, "<Shape>");
        self.line(level + 1, "<LineSet vertexCount='2'>");
        self.line(
            level + 2,
            format!("<Coordinate point='0 0 0 {}'/>", format_position_compact(child_offset)),
        );
        self.line(level + 2, "<ColorRGBA USE='HAnimSegmentLineColorRGBA'/>");
        self.line(level + 1, "</LineSet>");
        self.line(level, "</Shape>");
    }

    fn bone_segment(&mut self, level: usize, names: &JointNames, child: Index) {
        let base = format!("{}_to_{}", names.joint_name, self.names[child].joint_name);
        let name = if self.segment_names.contains(&base) {
            format!("{}_bone", base)
        } else {
            base
        };
        self.segment_names.insert(name.clone());
        let def = def_name(&self.model_name, &name);
        debug!("bone segment {}", def);

        self.line(level, format!("<HAnimSegment DEF='{}' name='{}'>", def, name));
        if self.options.ball_and_stick {
            self.bone_line(level + 1, names, child);
        } else {
            self.comment(level + 1, "insert Shape geometry here");
        }
        self.line(level, "</HAnimSegment>");
        self.segment_uses.push(def);
    }

    fn site(&mut self, level: usize, joint: &Joint, names: &JointNames, site: Position) {
        self.line(
            level,
            format!(
                "<HAnimSite DEF='{}' name='{}' translation='{}'>",
                names.site_def,
                names.site_name,
                format_position_compact(site)
            ),
        );
        self.comment(level + 1, format!("BVH End Site OFFSET {}", format_position(site)));
        if self.options.ball_and_stick && self.options.illustrate_sites_and_viewpoints {
            self.line(level + 1, format!("<TouchSensor description='HAnimSite {}'/>", names.site_name));
            self.line(level + 1, "<Shape USE='HAnimSiteShape'/>");
            self.comment(
                level + 1,
                format!(
                    "HAnimSite visualization line from parent <HAnimJoint name='{}'/> to current <HAnimSite name='{}'/>",
                    names.joint_name, names.site_name
                ),
            );
            self.line(level + 1, "<Shape>");
            self.line(level + 2, "<LineSet vertexCount='2'>");
            self.line(
                level + 3,
                format!("<Coordinate point='{} 0 0 0'/>", format_position_compact(-site)),
            );
            self.line(level + 3, "<ColorRGBA USE='HAnimSiteLineColorRGBA'/>");
            self.line(level + 2, "</LineSet>");
            self.line(level + 1, "</Shape>");
        }
        self.line(level, "</HAnimSite>");
        self.site_uses.push(names.site_def.clone());
        debug!("site {} on joint {}", names.site_def, joint.name);
    }

    //////////////////////////////////////////////////////////////// MOTION

    fn motion(&mut self, motion: &Motion) {
        let hierarchy = self.hierarchy;
        let frame_count = motion.frame_count();
        let width = motion.frame_width();
        let fps = format_decimal(motion.frame_rate(), 2);

        self.line(2, format!("<Group DEF='{}_MotionGroup'>", self.model_name));
        self.comment(3, "BVH MOTION");
        self.comment(3, format!("BVH Frames: {}", frame_count));
        self.comment(
            3,
            format!(
                "BVH Frame Time: {} seconds ({} frames per second)",
                format_number(motion.frame_duration),
                fps
            ),
        );
        self.comment(
            3,
            format!(
                "Expected frame count: {}, actual frame count: {}, animation total duration: {} seconds",
                motion.expected_frame_count,
                frame_count,
                format_decimal(motion.total_duration(), 3)
            ),
        );
        self.comment(
            3,
            format!(
                "Frame width: {} channel values, total count: {} * {} = {} recorded motion values",
                width,
                width,
                frame_count,
                width * frame_count
            ),
        );
        if motion.expected_frame_count != frame_count {
            self.comment(3, "Error: expected frame count != actual frame count");
        }
        let attached = hierarchy.attached_channel_count();
        if frame_count > 0 && width != attached {
            self.comment(
                3,
                format!("Error: frame width {} != {} CHANNELS names declared in HIERARCHY", width, attached),
            );
        }
        if frame_count == 0 {
            self.comment(3, "No motion frames found, no interpolators generated");
            self.line(2, "</Group>");
            return;
        }

        let keys = key_array(frame_count).join(" ");
        let doubled = doubled_key_array(frame_count);
        self.comment(
            3,
            format!("Animation playback: enable RealTimer for continuous motion at {} frames/second (fps)", fps),
        );
        self.line(
            3,
            format!(
                "<TimeSensor DEF='RealTimer' cycleInterval='{}' enabled='true' loop='true'/>",
                format_decimal(motion.total_duration(), 3)
            ),
        );
        self.comment(3, "Alternative replay: enable StepTimer for discrete time-step motion at 1 fps");
        self.line(
            3,
            format!("<TimeSensor DEF='StepTimer' cycleInterval='{}' enabled='false' loop='true'/>", frame_count),
        );
        self.line(3, "<ScalarInterpolator DEF='FrameStepper'");
        self.line(4, format!("     key='{}'", doubled[1..].join(" ")));
        self.line(4, format!("keyValue='{}'/>", doubled[..doubled.len() - 1].join(" ")));
        self.line(
            3,
            "<ROUTE fromField='fraction_changed' fromNode='StepTimer' toField='set_fraction' toNode='FrameStepper'/>",
        );

        let mut routes: Vec<(String, String, &str)> = Vec::new();
        let mut angle_range: Option<(f64, f64)> = None;
        for index in hierarchy.depth_first() {
            let joint = &hierarchy.joints[index];
            let names = self.names[index].clone();

            let positions = joint.position_columns();
            if !positions.is_empty() {
                let def = format!("Interpolator{}_{}", routes.len(), names.joint_name);
                self.position_interpolator(motion, joint, &names, &def, &positions, &keys);
                routes.push((def, names.joint_def.clone(), "set_translation"));
            }

            let rotations = joint.rotation_columns();
            if !rotations.is_empty() {
                let def = format!("Interpolator{}_{}", routes.len(), names.joint_name);
                if let Some((min, max)) = self.orientation_interpolator(motion, joint, &names, &def, &rotations, &keys) {
                    angle_range = Some(match angle_range {
                        None => (min, max),
                        Some((lo, hi)) => (lo.min(min), hi.max(max)),
                    });
                }
                routes.push((def, names.joint_def.clone(), "set_rotation"));
            }
        }

        if let Some((min, max)) = angle_range {
            self.comment(
                3,
                format!("Overall angle min/max range [{},{}] degrees", format_number(min), format_number(max)),
            );
            if max > min && min.abs() <= TAU && max.abs() <= TAU {
                self.comment(3, "Warning: angles are likely radian values, not degrees");
            }
            if min.abs() > 360.0 || max.abs() > 360.0 {
                self.comment(3, "Warning: some angle values are greater than 360 degrees");
            }
        }

        self.comment(3, "Corresponding ROUTE statements to send animation values");
        for (interpolator, target, field) in &routes {
            self.line(
                3,
                format!(
                    "<ROUTE fromField='fraction_changed' fromNode='RealTimer' toField='set_fraction' toNode='{}'/>",
                    interpolator
                ),
            );
            self.line(
                3,
                format!(
                    "<ROUTE fromField='value_changed' fromNode='FrameStepper' toField='set_fraction' toNode='{}'/>",
                    interpolator
                ),
            );
            self.line(
                3,
                format!(
                    "<ROUTE fromField='value_changed' fromNode='{}' toField='{}' toNode='{}'/>",
                    interpolator, field, target
                ),
            );
        }
        self.line(2, "</Group>");
        info!(model = %self.model_name, interpolators = routes.len(), frames = frame_count, "X3D motion group");

        if self.options.frame_data_comment {
            self.line(2, "<!-- All frame data:");
            for frame in &motion.frames {
                self.line(2, frame_line(frame, |value| format_decimal(value, 3)));
            }
            self.line(2, "-->");
        }
    }

    fn interpolator_comment(&mut self, def: &str, kind: &str, joint: &Joint, names: &JointNames, columns: &[(Axis, usize)]) {
        let columns = columns
            .iter()
            .map(|(_, column)| column.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        self.comment(
            3,
            format!(
                "{} channels [{}] sends {} values to BVH JOINT {}, <HAnimJoint DEF='{}' name='{}'/>",
                def,
                columns,
                kind,
                xml_escape(&joint.name),
                names.joint_def,
                names.joint_name
            ),
        );
    }

    fn position_interpolator(
        &mut self,
        motion: &Motion,
        joint: &Joint,
        names: &JointNames,
        def: &str,
        columns: &[(Axis, usize)],
        keys: &str,
    ) {
        self.interpolator_comment(def, "translation", joint, names, columns);
        let values: Vec<String> = motion
            .frames
            .iter()
            .map(|frame| {
                let mut p = Position::zero();
                for &(axis, column) in columns {
                    let value = channel_value(frame, column) * self.scale;
                    match axis {
                        Axis::X => p.x = value,
                        Axis::Y => p.y = value,
                        Axis::Z => p.z = value,
                    }
                }
                format_rounded(p, 4)
            })
            .collect();
        self.line(3, format!("<PositionInterpolator DEF='{}'", def));
        self.line(4, format!("     key='{}'", keys));
        self.line(4, format!("keyValue='{}'/>", values.join(", ")));

        let stats = ColumnStats::gather(&motion.frames, columns);
        self.summary(4, &stats, "Position", joint, "");
    }

    /// Returns the smallest and largest Euler angle seen.
    fn orientation_interpolator(
        &mut self,
        motion: &Motion,
        joint: &Joint,
        names: &JointNames,
        def: &str,
        columns: &[(Axis, usize)],
        keys: &str,
    ) -> Option<(f64, f64)> {
        self.interpolator_comment(def, "rotation", joint, names, columns);
        let values: Vec<String> = motion
            .frames
            .iter()
            .map(|frame| {
                let euler: Vec<(Axis, f64)> = columns
                    .iter()
                    .map(|&(axis, column)| (axis, channel_value(frame, column)))
                    .collect();
                let (x, y, z, angle) = euler_to_axis_angle(&euler);
                format!(
                    "{} {} {} {}",
                    format_decimal(x, 4),
                    format_decimal(y, 4),
                    format_decimal(z, 4),
                    format_decimal(angle, 4)
                )
            })
            .collect();
        self.line(3, format!("<OrientationInterpolator DEF='{}'", def));
        self.line(4, format!("     key='{}'", keys));
        self.line(4, format!("keyValue='{}'/>", values.join(", ")));

        let stats = ColumnStats::gather(&motion.frames, columns);
        self.summary(4, &stats, "Euler angle", joint, " degrees");
        stats.overall()
    }

    fn summary(&mut self, level: usize, stats: &ColumnStats, kind: &str, joint: &Joint, unit: &str) {
        let prefix = match stats.variation {
            Variation::Unchanging => "Unchanging ",
            Variation::Jittery => "Jittery ",
            Variation::Moving => "",
        };
        self.comment(
            level,
            format!(
                "{}{} values, CHANNELS {}, with min/max ranges {}{}",
                prefix,
                kind,
                xml_escape(&joint.channel_names_string()),
                stats.describe(),
                unit
            ),
        );
    }
}

//////////////////////////////////////////////////////////////// PUBLIC ////////////////////////////////////////////////////////////////

/// Build the X3D scene for a parsed hierarchy. `output_file_name` only feeds the model name
/// and metadata; nothing is written to disk.
pub fn to_x3d_text(hierarchy: &Hierarchy, output_file_name: &str, options: &X3dOptions) -> String {
    let scene = Scene::new(hierarchy, output_file_name, options);
    info!(
        model = %scene.model_name,
        joints = hierarchy.joints.len(),
        scale = scene.scale,
        "generating X3D"
    );
    scene.render()
}
