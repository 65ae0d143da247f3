//! Parse Biovision Hierarchy (`.bvh`) motion capture files, write them back out, and
//! convert them to X3D H-Anim humanoids.
//!
//! ```no_run
//! use bvh_hanim::{parse, to_x3d_text, X3dOptions};
//!
//! let (hierarchy, diagnostics) = parse(&std::fs::read_to_string("walk.bvh").unwrap());
//! for d in &diagnostics {
//!     eprintln!("{}", d);
//! }
//! let x3d = to_x3d_text(&hierarchy, "walk.x3d", &X3dOptions::default());
//! ```

pub mod builder;
pub mod bvh_writer;
pub mod diagnostics;
pub mod error;
pub mod hanim;
pub mod parse;
pub mod types;
pub mod utils;
pub mod x3d;

pub use bvh_writer::to_bvh_text;
pub use diagnostics::{is_fatal, Diagnostic, Severity};
pub use error::{BvhError, Result};
pub use parse::{
    load_bvh_from_file, load_bvh_from_string, parse, parse_bytes, parse_with_options, MotionStep, ParseOptions,
    ParseState,
};
pub use types::{Axis, Bounds, ChannelKind, Hierarchy, Joint, Motion, Position};
pub use x3d::{to_x3d_text, X3dOptions};
