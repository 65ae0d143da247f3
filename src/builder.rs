use crate::types::*;
use cgmath::Zero;

/// Builds a [`Hierarchy`] from block events, independent of how they were scanned from text.
///
/// The cursor is a stack of open joint indices: `open_joint` pushes, `close_block` pops.
#[derive(Debug, Default)]
pub struct HierarchyBuilder {
    hierarchy: Hierarchy,
    cursor: Vec<Index>,
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        HierarchyBuilder::default()
    }

    /// Index of the innermost open joint.
    pub fn current(&self) -> Option<Index> {
        self.cursor.last().copied()
    }

    pub fn depth(&self) -> Depth {
        self.cursor.len()
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn set_root_name(&mut self, name: &str) {
        self.hierarchy.root_name = name.to_string();
    }

    /// Start a new joint as child of the current one (or top-level if none is open) and make it current.
    pub fn open_joint(&mut self, name: &str) -> Index {
        let index = self.hierarchy.joints.len();
        let parent = self.current();
        let mut joint = Joint::new(name.to_string(), index, parent, self.depth());

        //// a joint without an OFFSET line still sits at its parent's position
        joint.cumulative_offset = self.parent_cumulative_offset(parent);

        match parent {
            Some(p) => self.hierarchy.joints[p].children.push(index),
            None => self.hierarchy.roots.push(index),
        }
        self.hierarchy.joints.push(joint);
        self.cursor.push(index);
        index
    }

    /// Pop the cursor. Returns false (and changes nothing) when no joint is open.
    pub fn close_block(&mut self) -> bool {
        self.cursor.pop().is_some()
    }

    /// Set the current joint's local offset and recompute its cumulative offset.
    pub fn set_offset(&mut self, offset: Position) -> bool {
        let Some(index) = self.current() else {
            return false;
        };
        let parent = self.hierarchy.joints[index].parent;
        let base = self.parent_cumulative_offset(parent);
        let joint = &mut self.hierarchy.joints[index];
        joint.offset = offset;
        joint.cumulative_offset = offset + base;
        true
    }

    /// Attach channel names to the current joint; `declared` columns are reserved in each frame.
    pub fn set_channels(&mut self, declared: usize, names: Vec<String>) -> bool {
        let Some(index) = self.current() else {
            return false;
        };
        let joint = &mut self.hierarchy.joints[index];
        joint.channel_offset = self.hierarchy.expected_channels_per_frame;
        joint.channel_names = names;
        joint.declared_channels = declared;
        self.hierarchy.expected_channels_per_frame =
            self.hierarchy.expected_channels_per_frame.saturating_add(declared);
        true
    }

    /// Record an end site on the current joint. `bounds` is `Some(strict)` when the offset
    /// should also grow the hierarchy's bounding box.
    pub fn set_end_site(&mut self, offset: Position, bounds: Option<bool>) -> bool {
        let Some(index) = self.current() else {
            return false;
        };
        self.hierarchy.joints[index].end_site = Some(offset);
        if let Some(strict) = bounds {
            self.hierarchy.bounds.include(offset, strict);
        }
        true
    }

    pub fn set_motion(&mut self, motion: Motion) {
        self.hierarchy.motion = Some(motion);
    }

    pub fn expected_channels_per_frame(&self) -> usize {
        self.hierarchy.expected_channels_per_frame
    }

    pub fn finish(self) -> Hierarchy {
        self.hierarchy
    }

    fn parent_cumulative_offset(&self, parent: Option<Index>) -> Position {
        parent
            .map(|p| self.hierarchy.joints[p].cumulative_offset)
            .unwrap_or_else(Position::zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_follows_open_and_close() {
        let mut b = HierarchyBuilder::new();
        let hips = b.open_joint("Hips");
        let chest = b.open_joint("Chest");
        assert_eq!(b.current(), Some(chest));
        assert!(b.close_block());
        assert_eq!(b.current(), Some(hips));
        let leg = b.open_joint("LeftHip");
        assert!(b.close_block());
        assert!(b.close_block());
        assert!(!b.close_block());

        let h = b.finish();
        assert_eq!(h.roots, vec![hips]);
        assert_eq!(h.joints[hips].children, vec![chest, leg]);
        assert_eq!(h.joints[leg].parent, Some(hips));
        assert_eq!(h.joints[leg].depth, 1);
    }

    #[test]
    fn cumulative_offsets_accumulate() {
        let mut b = HierarchyBuilder::new();
        b.open_joint("Hips");
        b.set_offset(Position::new(1.0, 2.0, 3.0));
        b.open_joint("Chest");
        b.set_offset(Position::new(0.0, 5.0, 0.0));
        b.open_joint("Neck");
        let h = b.finish();
        assert_eq!(h.joints[1].cumulative_offset, Position::new(1.0, 7.0, 3.0));
        // no OFFSET line: inherits the parent's position
        assert_eq!(h.joints[2].cumulative_offset, Position::new(1.0, 7.0, 3.0));
    }

    #[test]
    fn channels_reserve_frame_columns() {
        let mut b = HierarchyBuilder::new();
        b.open_joint("Hips");
        b.set_channels(6, vec!["Xposition".into(); 6]);
        b.open_joint("Chest");
        b.set_channels(3, vec!["Zrotation".into(); 3]);
        let h = b.finish();
        assert_eq!(h.expected_channels_per_frame, 9);
        assert_eq!(h.joints[1].channel_offset, 6);
        assert_eq!(h.joints[1].declared_channels, 3);
    }

    #[test]
    fn oversized_channel_counts_do_not_overflow() {
        let mut b = HierarchyBuilder::new();
        b.open_joint("Hips");
        b.set_channels(usize::MAX, vec!["Zrotation".into()]);
        b.open_joint("Chest");
        b.set_channels(3, vec!["Zrotation".into(); 3]);
        assert_eq!(b.expected_channels_per_frame(), usize::MAX);
    }

    #[test]
    fn events_without_open_joint_are_rejected() {
        let mut b = HierarchyBuilder::new();
        assert!(!b.set_offset(Position::new(1.0, 0.0, 0.0)));
        assert!(!b.set_channels(3, Vec::new()));
        assert!(!b.set_end_site(Position::zero(), None));
        assert_eq!(b.finish().expected_channels_per_frame, 0);
    }
}
