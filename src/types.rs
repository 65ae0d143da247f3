use cgmath::{Vector3, Zero};

/////////////////////////////////////////////////////////////////////////////////////////////////

pub type Index = usize;
pub type Depth = usize;
pub type Position = Vector3<f64>;

/////////////////////////////////////////////////////////////////////////////////////////////////

pub const XPOSITION: &str = "Xposition";
pub const YPOSITION: &str = "Yposition";
pub const ZPOSITION: &str = "Zposition";
pub const XROTATION: &str = "Xrotation";
pub const YROTATION: &str = "Yrotation";
pub const ZROTATION: &str = "Zrotation";

/// Axis a BVH channel acts along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// What a channel column feeds: a translation or a rotation component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Position(Axis),
    Rotation(Axis),
}

impl ChannelKind {
    /// Classify a channel name such as `Zrotation`. Unknown names (e.g. scale channels) yield `None`.
    pub fn from_name(name: &str) -> Option<ChannelKind> {
        match name {
            XPOSITION => Some(ChannelKind::Position(Axis::X)),
            YPOSITION => Some(ChannelKind::Position(Axis::Y)),
            ZPOSITION => Some(ChannelKind::Position(Axis::Z)),
            XROTATION => Some(ChannelKind::Rotation(Axis::X)),
            YROTATION => Some(ChannelKind::Rotation(Axis::Y)),
            ZROTATION => Some(ChannelKind::Rotation(Axis::Z)),
            _ => None,
        }
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////////

/// One `ROOT` or `JOINT` block. Joints live in the [`Hierarchy`] arena and refer to each other by index.
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub name: String,
    pub index: Index,
    pub parent: Option<Index>,
    pub depth: Depth,
    pub children: Vec<Index>,
    /// local translation relative to the parent joint
    pub offset: Position,
    /// `offset` summed with every ancestor's offset
    pub cumulative_offset: Position,
    pub channel_names: Vec<String>,
    /// count given on the `CHANNELS` line; frame columns are reserved from this, not from the names
    pub declared_channels: usize,
    /// column of this joint's first channel inside a motion frame
    pub channel_offset: usize,
    pub end_site: Option<Position>,
}

impl Joint {
    pub fn new(name: String, index: Index, parent: Option<Index>, depth: Depth) -> Self {
        Joint {
            name,
            index,
            parent,
            depth,
            children: Vec::new(),
            offset: Position::zero(),
            cumulative_offset: Position::zero(),
            channel_names: Vec::new(),
            declared_channels: 0,
            channel_offset: 0,
            end_site: None,
        }
    }

    pub fn has_end_site(&self) -> bool {
        self.end_site.is_some()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channel_names.len()
    }

    /// Channel names joined by single spaces, as written on a `CHANNELS` line.
    pub fn channel_names_string(&self) -> String {
        self.channel_names.join(" ")
    }

    /// Frame columns of this joint's channels matching `pred`, in channel order, paired with their axis.
    pub fn channel_columns<F>(&self, pred: F) -> Vec<(Axis, usize)>
    where
        F: Fn(ChannelKind) -> Option<Axis>,
    {
        self.channel_names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                ChannelKind::from_name(name)
                    .and_then(&pred)
                    .map(|axis| (axis, self.channel_offset + i))
            })
            .collect()
    }

    pub fn position_columns(&self) -> Vec<(Axis, usize)> {
        self.channel_columns(|kind| match kind {
            ChannelKind::Position(axis) => Some(axis),
            ChannelKind::Rotation(_) => None,
        })
    }

    pub fn rotation_columns(&self) -> Vec<(Axis, usize)> {
        self.channel_columns(|kind| match kind {
            ChannelKind::Rotation(axis) => Some(axis),
            ChannelKind::Position(_) => None,
        })
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////////

/// Extrema over every `End Site` offset seen while parsing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Position,
    pub max: Position,
    /// false until the first end site has been included
    pub initialized: bool,
}

impl Default for Bounds {
    fn default() -> Self {
        Bounds {
            min: Position::zero(),
            max: Position::zero(),
            initialized: false,
        }
    }
}

impl Bounds {
    /// Grow the box to include `p`.
    ///
    /// With `legacy_axis_swap` a new maximum X is written into `max.z`, reproducing the
    /// output of the converter this format was first exported by.
    pub fn include(&mut self, p: Position, legacy_axis_swap: bool) {
        if !self.initialized {
            self.min = p;
            self.max = p;
            self.initialized = true;
            return;
        }
        if p.x < self.min.x {
            self.min.x = p.x;
        }
        if p.y < self.min.y {
            self.min.y = p.y;
        }
        if p.z < self.min.z {
            self.min.z = p.z;
        }
        if p.x > self.max.x {
            if legacy_axis_swap {
                self.max.z = p.x;
            } else {
                self.max.x = p.x;
            }
        }
        if p.y > self.max.y {
            self.max.y = p.y;
        }
        if p.z > self.max.z {
            self.max.z = p.z;
        }
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn depth(&self) -> f64 {
        self.max.z - self.min.z
    }

    /// Half extents of the box, used to place the initial view.
    pub fn half_extent(&self) -> Position {
        (self.max - self.min) / 2.0
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Motion {
    /// value of the `Frames:` line; the number actually read may be lower
    pub expected_frame_count: usize,
    /// value of the `Frame Time:` line, in seconds
    pub frame_duration: f64,
    pub frames: Vec<Vec<f64>>,
}

impl Motion {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_width(&self) -> usize {
        self.frames.first().map_or(0, Vec::len)
    }

    /// Frames per second, rounded to the nearest hundredth. Zero when no frame time was given.
    pub fn frame_rate(&self) -> f64 {
        if self.frame_duration <= 0.0 {
            return 0.0;
        }
        (100.0 / self.frame_duration).round() / 100.0
    }

    pub fn total_duration(&self) -> f64 {
        self.frame_count() as f64 * self.frame_duration
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////////

/// Everything parsed from one BVH file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hierarchy {
    pub root_name: String,
    /// top-level joints, normally just the `ROOT`
    pub roots: Vec<Index>,
    /// every joint, in declaration (pre-)order
    pub joints: Vec<Joint>,
    pub expected_channels_per_frame: usize,
    pub bounds: Bounds,
    pub motion: Option<Motion>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Hierarchy::default()
    }

    pub fn find_joint_by_index(&self, index: Index) -> Option<&Joint> {
        self.joints.get(index)
    }

    pub fn find_joint_by_name(&self, name: &str) -> Option<&Joint> {
        self.joints.iter().find(|joint| joint.name == name)
    }

    pub fn root(&self) -> Option<&Joint> {
        self.roots.first().and_then(|&i| self.joints.get(i))
    }

    pub fn parent_of(&self, joint: &Joint) -> Option<&Joint> {
        joint.parent.and_then(|i| self.joints.get(i))
    }

    pub fn children_of<'a>(&'a self, joint: &'a Joint) -> impl Iterator<Item = &'a Joint> + 'a {
        joint.children.iter().filter_map(move |&i| self.joints.get(i))
    }

    /// Sum of the channel names actually attached to joints.
    pub fn attached_channel_count(&self) -> usize {
        self.joints.iter().map(Joint::channel_count).sum()
    }

    /// Indices of the joints in depth-first order starting from the top-level joints.
    pub fn depth_first(&self) -> Vec<Index> {
        let mut order = Vec::with_capacity(self.joints.len());
        let mut stack: Vec<Index> = self.roots.iter().rev().copied().collect();
        while let Some(i) = stack.pop() {
            order.push(i);
            if let Some(joint) = self.joints.get(i) {
                stack.extend(joint.children.iter().rev());
            }
        }
        order
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////////
