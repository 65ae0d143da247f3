use crate::builder::HierarchyBuilder;
use crate::diagnostics::Diagnostic;
use crate::error::{BvhError, Result};
use crate::types::*;
use crate::utils::{is_numeric, split_values};
use cgmath::Zero;
use regex::Regex;
use std::cmp::Ordering as CmpOrdering;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

///////////////////////////////////////////////////////////////////////////////////////////////////

static RE_JOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ROOT|JOINT)\b\s*([^{]*?)\s*(\{.*)?$").expect("joint header pattern is valid")
});
static RE_END_SITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^end\s*site\b\s*(.*)$").expect("end site pattern is valid"));
static RE_FRAMES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Frames\s*:\s*(.*)$").expect("frames pattern is valid"));
static RE_FRAME_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Frame\s+Time\s*:\s*(.*)$").expect("frame time pattern is valid"));

///////////////////////////////////////////////////////////////////////////////////////////////////

/// Knobs for [`parse_with_options`].
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Reproduce the legacy bounding box, where a new maximum X overwrites `max.z`.
    pub strict_bounding_box: bool,
    /// Checked before every line; once set, parsing halts with a fatal diagnostic.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ParseOptions {
    pub fn with_strict_bounding_box(mut self, strict: bool) -> Self {
        self.strict_bounding_box = strict;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Where the parser is in the BVH grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// expecting `HIERARCHY`
    Start,
    /// expecting `ROOT`
    InHierarchy,
    InJointBlock,
    InMotion(MotionStep),
    /// all announced frames read; only trailing content remains
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionStep {
    FrameCount,
    FrameTime,
    Frames,
}

type Step = ControlFlow<()>;

/// Text after `keyword` when the line starts with it as a whole word.
fn keyword_rest<'l>(line: &'l str, keyword: &str) -> Option<&'l str> {
    let rest = line.strip_prefix(keyword)?;
    (rest.is_empty() || rest.starts_with(char::is_whitespace)).then_some(rest)
}

///////////////////////////////////////////////////////////////////////////////////////////////////

struct Parser<'a> {
    /// trimmed source lines; blank ones are skipped but keep their line number
    lines: Vec<&'a str>,
    /// index of the next unread line
    next: usize,
    /// last non-blank line consumed, cited by end-of-input diagnostics
    last: (usize, &'a str),
    state: ParseState,
    builder: HierarchyBuilder,
    motion: Option<Motion>,
    diagnostics: Vec<Diagnostic>,
    options: &'a ParseOptions,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, options: &'a ParseOptions) -> Self {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        Parser {
            lines: text.lines().map(str::trim).collect(),
            next: 0,
            last: (0, ""),
            state: ParseState::Start,
            builder: HierarchyBuilder::new(),
            motion: None,
            diagnostics: Vec::new(),
            options,
        }
    }

    fn run(mut self) -> (Hierarchy, Vec<Diagnostic>) {
        while let Some((n, line)) = self.next_line() {
            if self.options.is_cancelled() {
                let _ = self.fatal(n, line, "parsing cancelled");
                return self.finish();
            }
            if self.dispatch(n, line).is_break() {
                return self.finish();
            }
        }
        self.end_of_input();
        self.finish()
    }

    fn finish(mut self) -> (Hierarchy, Vec<Diagnostic>) {
        if let Some(motion) = self.motion.take() {
            self.builder.set_motion(motion);
        }
        let hierarchy = self.builder.finish();
        info!(
            joints = hierarchy.joints.len(),
            channels = hierarchy.expected_channels_per_frame,
            frames = hierarchy.motion.as_ref().map_or(0, Motion::frame_count),
            diagnostics = self.diagnostics.len(),
            "parsed BVH hierarchy {}",
            hierarchy.root_name
        );
        (hierarchy, self.diagnostics)
    }

    //////////////////////////////////////////////////////////////// LINES

    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        let (n, line) = self.peek_line()?;
        self.consume(n, line);
        Some((n, line))
    }

    /// Next non-blank line with its 1-based number, without consuming it.
    fn peek_line(&self) -> Option<(usize, &'a str)> {
        self.lines[self.next..]
            .iter()
            .position(|line| !line.is_empty())
            .map(|k| (self.next + k + 1, self.lines[self.next + k]))
    }

    fn consume(&mut self, n: usize, line: &'a str) {
        self.next = n;
        self.last = (n, line);
    }

    //////////////////////////////////////////////////////////////// DIAGNOSTICS

    fn warn(&mut self, n: usize, line: &str, message: impl Into<String>) {
        let diagnostic = Diagnostic::warning(n, line, message);
        debug!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }

    fn fatal(&mut self, n: usize, line: &str, message: impl Into<String>) -> Step {
        let diagnostic = Diagnostic::fatal(n, line, message);
        debug!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
        ControlFlow::Break(())
    }

    fn transition(&mut self, state: ParseState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "BVH parse state");
            self.state = state;
        }
    }

    //////////////////////////////////////////////////////////////// STATES

    fn dispatch(&mut self, n: usize, line: &'a str) -> Step {
        match self.state {
            ParseState::Start => self.on_start(n, line),
            ParseState::InHierarchy => self.on_hierarchy(n, line),
            ParseState::InJointBlock => self.on_joint_block(n, line),
            ParseState::InMotion(step) => self.on_motion(step, n, line),
            ParseState::Done => {
                self.on_trailing(n, line);
                ControlFlow::Continue(())
            }
        }
    }

    fn on_start(&mut self, n: usize, line: &'a str) -> Step {
        let Some(rest) = keyword_rest(line, "HIERARCHY") else {
            return self.fatal(n, line, "HIERARCHY not found, not a BVH file");
        };
        if !rest.trim().is_empty() {
            self.warn(n, line, "unexpected text following HIERARCHY, ignored");
        }
        self.transition(ParseState::InHierarchy);
        ControlFlow::Continue(())
    }

    fn on_hierarchy(&mut self, n: usize, line: &'a str) -> Step {
        match RE_JOINT.captures(line) {
            Some(caps) if &caps[1] == "ROOT" => {
                let name = caps.get(2).map_or("", |m| m.as_str());
                self.open_joint(n, line, "ROOT", name, caps.get(3).is_some())
            }
            _ => self.fatal(n, line, "unexpected content before ROOT"),
        }
    }

    fn on_joint_block(&mut self, n: usize, line: &'a str) -> Step {
        if let Some(caps) = RE_JOINT.captures(line) {
            let keyword = caps.get(1).map_or("JOINT", |m| m.as_str());
            let name = caps.get(2).map_or("", |m| m.as_str());
            if keyword == "ROOT" && self.builder.current().is_some() {
                self.warn(n, line, "ROOT found inside a JOINT block, treated as JOINT");
            }
            return self.open_joint(n, line, keyword, name, caps.get(3).is_some());
        }
        if let Some(rest) = keyword_rest(line, "OFFSET") {
            let offset = self.parse_offset(n, line, rest).unwrap_or_else(Position::zero);
            if !self.builder.set_offset(offset) {
                self.warn(n, line, "OFFSET found outside of a JOINT block, ignored");
            }
        } else if let Some(rest) = keyword_rest(line, "CHANNELS") {
            self.on_channels(n, line, rest);
        } else if let Some(caps) = RE_END_SITE.captures(line) {
            let rest = caps.get(1).map_or("", |m| m.as_str());
            return self.on_end_site(n, line, rest);
        } else if line.starts_with('{') {
            // brace already accounted for by the header lookahead
        } else if line.starts_with('}') {
            if !self.builder.close_block() {
                debug!("line {}: unbalanced }} ignored", n);
            }
        } else if let Some(rest) = keyword_rest(line, "MOTION") {
            if !rest.trim().is_empty() {
                self.warn(n, line, "unexpected text following MOTION, ignored");
            }
            let open = self.builder.depth();
            if open > 0 {
                self.warn(n, line, format!("{} unclosed JOINT block(s) found before MOTION", open));
            }
            self.motion = Some(Motion::default());
            self.transition(ParseState::InMotion(MotionStep::FrameCount));
        } else {
            self.warn(n, line, "unrecognized content in HIERARCHY, ignored");
        }
        ControlFlow::Continue(())
    }

    fn on_motion(&mut self, step: MotionStep, n: usize, line: &'a str) -> Step {
        match step {
            MotionStep::FrameCount => {
                let Some(caps) = RE_FRAMES.captures(line) else {
                    self.warn(n, line, "Frames: not found after MOTION, assuming 0 frames");
                    self.transition(ParseState::InMotion(MotionStep::FrameTime));
                    return self.dispatch(n, line);
                };
                let value = caps.get(1).map_or("", |m| m.as_str()).trim();
                let count = match value.parse::<usize>() {
                    Ok(count) => count,
                    Err(_) => {
                        self.warn(n, line, format!("Frames: value '{}' is not a whole number, using 0", value));
                        0
                    }
                };
                if let Some(motion) = self.motion.as_mut() {
                    motion.expected_frame_count = count;
                }
                self.transition(ParseState::InMotion(MotionStep::FrameTime));
                ControlFlow::Continue(())
            }
            MotionStep::FrameTime => {
                let Some(caps) = RE_FRAME_TIME.captures(line) else {
                    self.warn(n, line, "Frame Time: not found after Frames:, using 0");
                    self.start_frames();
                    return self.dispatch(n, line);
                };
                let value = caps.get(1).map_or("", |m| m.as_str()).trim();
                let duration = match value.parse::<f64>() {
                    Ok(duration) => duration,
                    Err(_) => {
                        self.warn(n, line, format!("Frame Time: value '{}' is not a number, using 0", value));
                        0.0
                    }
                };
                if let Some(motion) = self.motion.as_mut() {
                    motion.frame_duration = duration;
                }
                self.start_frames();
                ControlFlow::Continue(())
            }
            MotionStep::Frames => {
                self.on_frame(n, line);
                ControlFlow::Continue(())
            }
        }
    }

    fn on_trailing(&mut self, n: usize, line: &str) {
        //// frames beyond the announced count are dropped silently
        if split_values(line).iter().all(|token| is_numeric(token)) {
            return;
        }
        self.warn(n, line, "unexpected content after MOTION data, ignored");
    }

    fn end_of_input(&mut self) {
        let (n, line) = self.last;
        match self.state {
            ParseState::Start => {
                let _ = self.fatal(n, line, "HIERARCHY not found, not a BVH file");
            }
            ParseState::InHierarchy => {
                let _ = self.fatal(n, line, "premature end of file, ROOT not found");
            }
            ParseState::InJointBlock => self.warn(n, line, "end of file reached without MOTION section"),
            ParseState::InMotion(MotionStep::FrameCount) => {
                let _ = self.fatal(n, line, "premature end of file after MOTION");
            }
            ParseState::InMotion(MotionStep::FrameTime) => {
                let _ = self.fatal(n, line, "premature end of file after Frames:");
            }
            ParseState::InMotion(MotionStep::Frames) => {
                let (read, expected) = self
                    .motion
                    .as_ref()
                    .map_or((0, 0), |m| (m.frame_count(), m.expected_frame_count));
                if read == 0 {
                    let _ = self.fatal(n, line, "premature end of file after MOTION header, no frames found");
                } else {
                    self.warn(n, line, format!("expected {} frames but found only {}", expected, read));
                }
            }
            ParseState::Done => {}
        }
    }

    //////////////////////////////////////////////////////////////// HIERARCHY LINES

    fn open_joint(&mut self, n: usize, line: &'a str, keyword: &str, name: &str, has_brace: bool) -> Step {
        if name.is_empty() {
            self.warn(n, line, format!("no name provided for {}", keyword));
        }
        if self.builder.hierarchy().roots.is_empty() && self.builder.current().is_none() {
            self.builder.set_root_name(name);
        }
        let index = self.builder.open_joint(name);
        debug!("{} {} is joint {} at depth {}", keyword, name, index, self.builder.depth() - 1);
        self.transition(ParseState::InJointBlock);

        if !has_brace {
            match self.peek_line() {
                None => return self.fatal(n, line, format!("premature end of file after {}", keyword)),
                Some((m, next)) if next.starts_with('{') => self.consume(m, next),
                Some((m, next)) => return self.fatal(m, next, format!("no {{ found after {}", keyword)),
            }
        }
        ControlFlow::Continue(())
    }

    /// Three numbers, or `None` after recording why not.
    fn parse_offset(&mut self, n: usize, line: &str, rest: &str) -> Option<Position> {
        if rest.contains(',') {
            self.warn(n, line, "no commas allowed in OFFSET values");
        }
        let values = split_values(rest);
        if values.is_empty() {
            self.warn(n, line, "no OFFSET data values found, using 0 0 0");
            return None;
        }
        if values.len() != 3 {
            self.warn(
                n,
                line,
                format!("incorrect number of OFFSET values, expected 3 but found {}, using 0 0 0", values.len()),
            );
            return None;
        }
        let mut xyz = [0.0; 3];
        for (slot, token) in xyz.iter_mut().zip(&values) {
            match token.parse::<f64>() {
                Ok(value) => *slot = value,
                Err(_) => {
                    self.warn(n, line, format!("OFFSET value '{}' is not a number, using 0 0 0", token));
                    return None;
                }
            }
        }
        Some(Position::new(xyz[0], xyz[1], xyz[2]))
    }

    fn on_channels(&mut self, n: usize, line: &str, rest: &str) {
        if rest.contains(',') {
            self.warn(n, line, "no commas allowed in CHANNELS values");
        }
        let tokens = split_values(rest);
        let Some((count, names)) = tokens.split_first() else {
            self.warn(n, line, "no CHANNELS data values found, ignored");
            return;
        };
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        let declared = match count.parse::<usize>() {
            Ok(declared) => declared,
            Err(_) => {
                self.warn(
                    n,
                    line,
                    format!("CHANNELS count '{}' is not a number, using the {} names found", count, names.len()),
                );
                names.len()
            }
        };
        let declared = if self.plausible_channel_count(declared, line) {
            declared
        } else {
            self.warn(
                n,
                line,
                format!("CHANNELS count {} is implausible, using the {} names found", declared, names.len()),
            );
            names.len()
        };
        if declared != names.len() {
            self.warn(
                n,
                line,
                format!("incorrect number of CHANNELS names, declared {} but found {}", declared, names.len()),
            );
        }
        if !self.builder.set_channels(declared, names) {
            self.warn(n, line, "CHANNELS found outside of a JOINT block, ignored");
        }
    }

    /// A declared count must fit the running frame width and cannot exceed what the line could
    /// name, since every channel name takes at least two characters with its separator.
    fn plausible_channel_count(&self, declared: usize, line: &str) -> bool {
        declared <= line.len() / 2
            && self
                .builder
                .expected_channels_per_frame()
                .checked_add(declared)
                .is_some()
    }

    /// `End Site`, optional `{`, `OFFSET`, then a mandatory `}` that does not close the owning joint.
    fn on_end_site(&mut self, n: usize, line: &'a str, rest: &str) -> Step {
        let mut last = (n, line);
        if !rest.starts_with('{') {
            if !rest.is_empty() {
                self.warn(n, line, "unexpected text following End Site, ignored");
            }
            if let Some((m, next)) = self.peek_line().filter(|(_, next)| next.starts_with('{')) {
                self.consume(m, next);
                last = (m, next);
            }
        }

        let offset_line = self
            .peek_line()
            .and_then(|(m, next)| keyword_rest(next, "OFFSET").map(|values| (m, next, values)));
        let site = match offset_line {
            Some((m, next, values)) => {
                self.consume(m, next);
                last = (m, next);
                self.parse_offset(m, next, values)
            }
            None => {
                self.warn(n, line, "no OFFSET found for End Site, using 0 0 0");
                None
            }
        };
        //// only well-formed sites grow the bounding box
        let bounds = site.is_some().then_some(self.options.strict_bounding_box);
        if !self.builder.set_end_site(site.unwrap_or_else(Position::zero), bounds) {
            self.warn(n, line, "End Site found outside of a JOINT block, ignored");
        }

        match self.peek_line() {
            Some((m, next)) if next.starts_with('}') => {
                self.consume(m, next);
                ControlFlow::Continue(())
            }
            _ => self.fatal(last.0, last.1, "no closing } found after End Site OFFSET"),
        }
    }

    //////////////////////////////////////////////////////////////// MOTION LINES

    fn start_frames(&mut self) {
        let expected = self.motion.as_ref().map_or(0, |m| m.expected_frame_count);
        if expected == 0 {
            self.transition(ParseState::Done);
        } else {
            self.transition(ParseState::InMotion(MotionStep::Frames));
        }
    }

    fn on_frame(&mut self, n: usize, line: &str) {
        let frame_index = self.motion.as_ref().map_or(0, Motion::frame_count);
        let width = self.builder.expected_channels_per_frame();
        let frame = self.parse_frame(n, line, width, frame_index);

        let motion = self.motion.get_or_insert_with(Motion::default);
        motion.frames.push(frame);
        let complete = motion.frames.len() >= motion.expected_frame_count;
        if complete {
            self.transition(ParseState::Done);
        }
    }

    /// Always `width` values: missing ones padded with 0, excess ones dropped.
    fn parse_frame(&mut self, n: usize, line: &str, width: usize, frame_index: usize) -> Vec<f64> {
        if line.contains(',') {
            self.warn(n, line, format!("no commas allowed in MOTION values, frame {}", frame_index));
        }
        let tokens = split_values(line);
        match tokens.len().cmp(&width) {
            CmpOrdering::Less => self.warn(
                n,
                line,
                format!(
                    "MOTION frame {} has {} missing values, expected {} channels per frame",
                    frame_index,
                    width - tokens.len(),
                    width
                ),
            ),
            CmpOrdering::Greater => self.warn(
                n,
                line,
                format!(
                    "MOTION frame {} has {} excess values, expected {} channels per frame, extra values ignored",
                    frame_index,
                    tokens.len() - width,
                    width
                ),
            ),
            CmpOrdering::Equal => {}
        }

        let mut frame = Vec::with_capacity(width);
        for (column, token) in tokens.iter().take(width).enumerate() {
            match token.parse::<f64>() {
                Ok(value) => frame.push(value),
                Err(_) => {
                    self.warn(
                        n,
                        line,
                        format!("MOTION frame {} channel {} value '{}' is not a number, using 0", frame_index, column, token),
                    );
                    frame.push(0.0);
                }
            }
        }
        if frame.len() < width {
            self.warn(
                n,
                line,
                format!("MOTION frame {} padded with 0 starting at channel {}", frame_index, frame.len()),
            );
            frame.resize(width, 0.0);
        }
        frame
    }
}

//////////////////////////////////////////////////////////////// PUBLIC ////////////////////////////////////////////////////////////////

/// Parse BVH text into a fresh [`Hierarchy`] and the problems found along the way.
///
/// Never fails: when a fatal diagnostic is returned, the hierarchy holds whatever was built before the halt.
pub fn parse(text: &str) -> (Hierarchy, Vec<Diagnostic>) {
    parse_with_options(text, &ParseOptions::default())
}

pub fn parse_with_options(text: &str, options: &ParseOptions) -> (Hierarchy, Vec<Diagnostic>) {
    Parser::new(text, options).run()
}

/// Like [`parse_with_options`] for raw bytes, which must be UTF-8.
pub fn parse_bytes(bytes: &[u8], options: &ParseOptions) -> Result<(Hierarchy, Vec<Diagnostic>)> {
    let text = std::str::from_utf8(bytes)?;
    Ok(parse_with_options(text, options))
}

/// load a bvh file from a file path
pub fn load_bvh_from_file(file_path: impl AsRef<Path>) -> Result<(Hierarchy, Vec<Diagnostic>)> {
    let path = file_path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| BvhError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_bytes(&bytes, &ParseOptions::default())
}

/// load a bvh file from a string
pub fn load_bvh_from_string(bvh_string: &str) -> (Hierarchy, Vec<Diagnostic>) {
    parse(bvh_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{is_fatal, Severity};

    const HIPS_CHEST: &str = "HIERARCHY
ROOT Hips
{
  OFFSET 0 0 0
  CHANNELS 6 Xposition Yposition Zposition Zrotation Xrotation Yrotation
  JOINT Chest
  {
    OFFSET 0 5 0
    CHANNELS 3 Zrotation Xrotation Yrotation
    End Site
    {
      OFFSET 0 3 0
    }
  }
}
MOTION
Frames: 1
Frame Time: 0.033333
0 0 0 0 0 0 0 0 0
";

    fn fatal_messages(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics
            .iter()
            .filter(|d| d.is_fatal())
            .map(|d| d.message.as_str())
            .collect()
    }

    #[test]
    fn hips_chest_parses_cleanly() {
        let (h, diagnostics) = parse(HIPS_CHEST);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(h.root_name, "Hips");
        assert_eq!(h.joints.len(), 2);
        assert_eq!(h.expected_channels_per_frame, 9);

        let chest = h.find_joint_by_name("Chest").unwrap();
        assert_eq!(chest.parent, Some(0));
        assert_eq!(chest.cumulative_offset, Position::new(0.0, 5.0, 0.0));
        assert_eq!(chest.end_site, Some(Position::new(0.0, 3.0, 0.0)));
        assert_eq!(chest.channel_offset, 6);
        assert_eq!(h.root().unwrap().children, vec![1]);

        let motion = h.motion.as_ref().unwrap();
        assert_eq!(motion.frame_count(), 1);
        assert_eq!(motion.frame_width(), 9);
        assert_eq!(motion.frame_rate(), 30.0);
    }

    #[test]
    fn missing_hierarchy_is_a_single_fatal() {
        let (h, diagnostics) = parse("ROOT Hips\n{\n}\n");
        assert!(h.joints.is_empty());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Fatal);
        assert_eq!(diagnostics[0].line_number, 1);
    }

    #[test]
    fn empty_input_is_fatal() {
        let (h, diagnostics) = parse("\n  \n");
        assert!(h.joints.is_empty());
        assert!(is_fatal(&diagnostics));
    }

    #[test]
    fn end_of_file_after_root_is_fatal() {
        let (h, diagnostics) = parse("HIERARCHY\nROOT Hips");
        assert_eq!(fatal_messages(&diagnostics), vec!["premature end of file after ROOT"]);
        assert_eq!(diagnostics[0].line_number, 2);
        assert_eq!(h.root_name, "Hips");
    }

    #[test]
    fn missing_brace_after_joint_is_fatal() {
        let text = "HIERARCHY\nROOT Hips\n{\nOFFSET 0 0 0\nJOINT Chest\nOFFSET 0 1 0\n";
        let (_, diagnostics) = parse(text);
        assert_eq!(fatal_messages(&diagnostics), vec!["no { found after JOINT"]);
        assert_eq!(diagnostics[0].line_number, 6);
    }

    #[test]
    fn content_before_root_is_fatal() {
        let (_, diagnostics) = parse("HIERARCHY\nOFFSET 0 0 0\n");
        assert_eq!(fatal_messages(&diagnostics), vec!["unexpected content before ROOT"]);
    }

    #[test]
    fn offset_with_two_values_is_recoverable() {
        let text = HIPS_CHEST.replace("OFFSET 0 5 0", "OFFSET 0 5");
        let (h, diagnostics) = parse(&text);
        assert_eq!(diagnostics.len(), 1, "{:?}", diagnostics);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
        assert_eq!(diagnostics[0].line_number, 8);
        assert_eq!(h.joints[1].offset, Position::zero());
        assert_eq!(h.motion.unwrap().frame_count(), 1);
    }

    #[test]
    fn keywords_must_be_whole_words() {
        let (h, diagnostics) = parse(&HIPS_CHEST.replacen("HIERARCHY", "HIERARCHYFOO", 1));
        assert!(h.joints.is_empty());
        assert_eq!(fatal_messages(&diagnostics), vec!["HIERARCHY not found, not a BVH file"]);

        let (h, diagnostics) = parse(&HIPS_CHEST.replacen("HIERARCHY", "HIERARCHY extra", 1));
        assert_eq!(diagnostics.len(), 1, "{:?}", diagnostics);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
        assert_eq!(h.joints.len(), 2);

        let (h, diagnostics) = parse(&HIPS_CHEST.replace("OFFSET 0 5 0", "OFFSETS 0 5 0"));
        assert_eq!(diagnostics.len(), 1, "{:?}", diagnostics);
        assert!(diagnostics[0].message.contains("unrecognized content"));
        assert_eq!(h.joints[1].offset, Position::zero());
    }

    #[test]
    fn commas_in_offset_are_reported_and_split() {
        let text = HIPS_CHEST.replace("OFFSET 0 5 0", "OFFSET 0, 5, 0");
        let (h, diagnostics) = parse(&text);
        assert_eq!(diagnostics.len(), 1, "{:?}", diagnostics);
        assert_eq!(diagnostics[0].message, "no commas allowed in OFFSET values");
        assert_eq!(diagnostics[0].line_number, 8);
        assert_eq!(h.joints[1].offset, Position::new(0.0, 5.0, 0.0));
        assert_eq!(h.joints[1].cumulative_offset, Position::new(0.0, 5.0, 0.0));
    }

    #[test]
    fn commas_in_channels_are_reported_and_split() {
        let text = HIPS_CHEST.replace(
            "CHANNELS 3 Zrotation Xrotation Yrotation",
            "CHANNELS 3,Zrotation,Xrotation,Yrotation",
        );
        let (h, diagnostics) = parse(&text);
        assert_eq!(diagnostics.len(), 1, "{:?}", diagnostics);
        assert_eq!(diagnostics[0].message, "no commas allowed in CHANNELS values");
        assert_eq!(h.joints[1].channel_names, vec!["Zrotation", "Xrotation", "Yrotation"]);
        assert_eq!(h.expected_channels_per_frame, 9);
        assert_eq!(h.motion.unwrap().frames[0].len(), 9);
    }

    #[test]
    fn huge_channel_counts_fall_back_to_names() {
        let text = HIPS_CHEST.replace(
            "CHANNELS 6 Xposition Yposition Zposition Zrotation Xrotation Yrotation",
            "CHANNELS 18446744073709551615 Zrotation",
        );
        let (h, diagnostics) = parse(&text);
        assert!(!is_fatal(&diagnostics));
        assert!(diagnostics[0].message.contains("implausible"), "{:?}", diagnostics);
        assert_eq!(h.joints[0].declared_channels, 1);
        assert_eq!(h.expected_channels_per_frame, 4);
        assert_eq!(h.motion.unwrap().frames[0].len(), 4);

        let text = HIPS_CHEST.replace("CHANNELS 3 Zrotation", "CHANNELS 100000 Zrotation");
        let (h, diagnostics) = parse(&text);
        assert!(diagnostics[0].message.contains("implausible"), "{:?}", diagnostics);
        assert_eq!(h.expected_channels_per_frame, 9);
    }

    #[test]
    fn braces_on_header_lines() {
        let text = "HIERARCHY\nROOT Hips {\n OFFSET 1 2 3\n CHANNELS 3 Zrotation Xrotation Yrotation\n End Site {\n  OFFSET 0 1 0\n }\n}\nMOTION\nFrames: 0\nFrame Time: 0.1\n";
        let (h, diagnostics) = parse(text);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(h.joints[0].offset, Position::new(1.0, 2.0, 3.0));
        assert!(h.joints[0].has_end_site());
        assert_eq!(h.motion.unwrap().frame_count(), 0);
    }

    #[test]
    fn channel_count_mismatch_keeps_declared_count() {
        let text = HIPS_CHEST.replace("CHANNELS 3 Zrotation Xrotation Yrotation", "CHANNELS 3 Zrotation Xrotation");
        let (h, diagnostics) = parse(&text);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(h.expected_channels_per_frame, 9);
        assert_eq!(h.attached_channel_count(), 8);
    }

    #[test]
    fn short_frames_are_padded() {
        let text = HIPS_CHEST.replace("0 0 0 0 0 0 0 0 0", "1 2 3 4 5 6 7");
        let (h, diagnostics) = parse(&text);
        assert_eq!(diagnostics.len(), 2, "{:?}", diagnostics);
        assert!(diagnostics[0].message.contains("2 missing values"));
        assert!(diagnostics[1].message.contains("channel 7"));
        let frame = &h.motion.unwrap().frames[0];
        assert_eq!(frame, &vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 0.0, 0.0]);
    }

    #[test]
    fn long_frames_are_truncated_and_commas_reported() {
        let text = HIPS_CHEST.replace("0 0 0 0 0 0 0 0 0", "1,2,3,4,5,6,7,8,9,10");
        let (h, diagnostics) = parse(&text);
        assert_eq!(diagnostics.len(), 2, "{:?}", diagnostics);
        assert!(diagnostics[1].message.contains("1 excess values"));
        assert_eq!(h.motion.unwrap().frames[0].len(), 9);
    }

    #[test]
    fn end_site_without_close_is_fatal() {
        let text = "HIERARCHY\nROOT Hips\n{\nOFFSET 0 0 0\nEnd Site\n{\nOFFSET 0 1 0\nMOTION\n";
        let (h, diagnostics) = parse(text);
        assert_eq!(fatal_messages(&diagnostics), vec!["no closing } found after End Site OFFSET"]);
        assert_eq!(diagnostics[0].line_number, 7);
        assert!(h.motion.is_none());
    }

    #[test]
    fn end_site_closing_brace_keeps_joint_open() {
        let text = "HIERARCHY\nROOT Hips\n{\nOFFSET 0 0 0\nEnd Site\n{\nOFFSET 0 1 0\n}\nJOINT Chest\n{\nOFFSET 0 2 0\n}\n}\nMOTION\nFrames: 0\nFrame Time: 0.1\n";
        let (h, diagnostics) = parse(text);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(h.joints[1].parent, Some(0));
        assert!(h.joints[0].has_end_site());
    }

    #[test]
    fn motion_header_problems() {
        let (_, diagnostics) = parse("HIERARCHY\nROOT Hips\n{\n}\nMOTION\n");
        assert_eq!(fatal_messages(&diagnostics), vec!["premature end of file after MOTION"]);

        let (_, diagnostics) = parse("HIERARCHY\nROOT Hips\n{\n}\nMOTION\nFrames: 2\n");
        assert_eq!(fatal_messages(&diagnostics), vec!["premature end of file after Frames:"]);

        let (h, diagnostics) = parse("HIERARCHY\nROOT Hips\n{\n}\nMOTION\nFrames: 2\nFrame Time: 0.5\n");
        assert_eq!(
            fatal_messages(&diagnostics),
            vec!["premature end of file after MOTION header, no frames found"]
        );
        assert_eq!(h.motion.unwrap().frame_duration, 0.5);
    }

    #[test]
    fn missing_frames_line_is_recoverable() {
        let (h, diagnostics) = parse("HIERARCHY\nROOT Hips\n{\n}\nMOTION\nFrame Time: 0.5\n");
        assert_eq!(diagnostics.len(), 1);
        assert!(!is_fatal(&diagnostics));
        assert_eq!(h.motion.unwrap().expected_frame_count, 0);
    }

    #[test]
    fn fewer_frames_than_announced() {
        let text = HIPS_CHEST.replace("Frames: 1", "Frames: 3");
        let (h, diagnostics) = parse(&text);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "expected 3 frames but found only 1");
        assert_eq!(h.motion.unwrap().frame_count(), 1);
    }

    #[test]
    fn trailing_content_after_frames() {
        let text = format!("{}0 0 0 0 0 0 0 0 0\nthe end\n", HIPS_CHEST);
        let (h, diagnostics) = parse(&text);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].line_number, 21);
        assert_eq!(h.motion.unwrap().frame_count(), 1);
    }

    #[test]
    fn unclosed_blocks_at_motion_warn() {
        let text = HIPS_CHEST.replacen("  }\n}\nMOTION", "  }\nMOTION", 1);
        let (_, diagnostics) = parse(&text);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("unclosed JOINT"));
    }

    #[test]
    fn cancelled_parse_halts_immediately() {
        let flag = Arc::new(AtomicBool::new(true));
        let options = ParseOptions::default().with_cancel_flag(flag);
        let (h, diagnostics) = parse_with_options(HIPS_CHEST, &options);
        assert!(h.joints.is_empty());
        assert_eq!(fatal_messages(&diagnostics), vec!["parsing cancelled"]);
    }

    #[test]
    fn bounding_box_follows_end_sites() {
        let text = "HIERARCHY\nROOT Hips\n{\nOFFSET 0 0 0\nJOINT A\n{\nOFFSET 0 0 0\nEnd Site\n{\nOFFSET 0 0 0\n}\n}\nJOINT B\n{\nOFFSET 0 0 0\nEnd Site\n{\nOFFSET 4 2 1\n}\n}\n}\nMOTION\nFrames: 0\nFrame Time: 0.1\n";
        let (h, _) = parse(text);
        assert_eq!(h.bounds.max, Position::new(4.0, 2.0, 1.0));

        let options = ParseOptions::default().with_strict_bounding_box(true);
        let (h, _) = parse_with_options(text, &options);
        assert_eq!(h.bounds.max, Position::new(0.0, 2.0, 4.0));
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let result = parse_bytes(&[0x48, 0xff, 0xfe], &ParseOptions::default());
        assert!(matches!(result, Err(BvhError::NotUtf8(_))));
    }
}
