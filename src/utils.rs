use crate::types::{Axis, Position};
use cgmath::{InnerSpace, Quaternion, Rad, Rotation3};
use regex::Regex;
use std::sync::LazyLock;

static VALUE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,\s]+").expect("value separator pattern is valid"));

/// Split a BVH numeric list on commas and/or whitespace. Commas are not legal BVH, callers report them.
pub(crate) fn split_values(text: &str) -> Vec<&str> {
    let text = text.trim_matches(|c: char| c == ',' || c.is_whitespace());
    if text.is_empty() {
        return Vec::new();
    }
    VALUE_SEPARATOR.split(text).collect()
}

pub(crate) fn is_numeric(token: &str) -> bool {
    token.parse::<f64>().is_ok()
}

/// Two spaces per nesting level.
pub(crate) fn indent(level: usize) -> String {
    "  ".repeat(level)
}

/// Shortest exact decimal form of `value`, with a trailing `.0` on integral values so the
/// text re-parses to the same `f64`.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// `value` rounded to at most `digits` decimals, trailing zeros dropped (`0.5000` is written `0.5`).
pub fn format_decimal(value: f64, digits: usize) -> String {
    let mut text = format!("{:.*}", digits, value);
    if text.contains('.') {
        let kept = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(kept);
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

pub fn format_position(p: Position) -> String {
    format!("{} {} {}", format_number(p.x), format_number(p.y), format_number(p.z))
}

/// Like [`format_position`] but writes zero components as a bare `0`, as X3D authors tend to.
pub fn format_position_compact(p: Position) -> String {
    let compact = |v: f64| {
        if v == 0.0 {
            "0".to_string()
        } else {
            format!("{}", v)
        }
    };
    format!("{} {} {}", compact(p.x), compact(p.y), compact(p.z))
}

/// Compose Euler rotations given in DEGREES, applied in the listed channel order
/// (e.g. `Z X Y` gives `Rz * Rx * Ry`, the BVH convention).
pub fn euler_to_quat(rotations: &[(Axis, f64)]) -> Quaternion<f64> {
    rotations
        .iter()
        .fold(Quaternion::new(1.0, 0.0, 0.0, 0.0), |q, &(axis, degrees)| {
            let angle = Rad(degrees.to_radians());
            let r = match axis {
                Axis::X => Quaternion::from_angle_x(angle),
                Axis::Y => Quaternion::from_angle_y(angle),
                Axis::Z => Quaternion::from_angle_z(angle),
            };
            q * r
        })
}

/// Axis-angle form `(x, y, z, angle)` of a rotation, angle in radians within `[0, PI]`.
/// The identity rotation maps to `(0, 1, 0, 0)`.
pub fn quat_to_axis_angle(q: Quaternion<f64>) -> (f64, f64, f64, f64) {
    let q = if q.s < 0.0 { Quaternion::from_sv(-q.s, -q.v) } else { q };
    let mag = q.v.magnitude();
    if mag * mag > 1.0e-12 {
        let axis = q.v / mag;
        (axis.x, axis.y, axis.z, 2.0 * mag.atan2(q.s))
    } else {
        (0.0, 1.0, 0.0, 0.0)
    }
}

pub fn euler_to_axis_angle(rotations: &[(Axis, f64)]) -> (f64, f64, f64, f64) {
    quat_to_axis_angle(euler_to_quat(rotations))
}

/// Escape text for use inside a single-quoted XML attribute or a comment.
pub(crate) fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    // "--" is not allowed inside XML comments
    while out.contains("--") {
        out = out.replace("--", "- -");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn split_accepts_commas_and_whitespace() {
        assert_eq!(split_values(" 1.0  2.5\t-3 "), vec!["1.0", "2.5", "-3"]);
        assert_eq!(split_values("1.0, 2.5,-3"), vec!["1.0", "2.5", "-3"]);
        assert!(split_values("   ").is_empty());
    }

    #[test]
    fn format_number_keeps_round_trip_precision() {
        assert_eq!(format_number(0.0), "0.0");
        assert_eq!(format_number(5.0), "5.0");
        assert_eq!(format_number(-3.25), "-3.25");
        let v = 0.1 + 0.2;
        assert_eq!(format_number(v).parse::<f64>().unwrap(), v);
    }

    #[test]
    fn format_decimal_trims_zeros() {
        assert_eq!(format_decimal(0.5, 4), "0.5");
        assert_eq!(format_decimal(2.0, 3), "2");
        assert_eq!(format_decimal(1.0 / 3.0, 4), "0.3333");
        assert_eq!(format_decimal(-0.00001, 3), "0");
        assert_eq!(format_decimal(-12.34567, 2), "-12.35");
    }

    #[test]
    fn identity_rotation_has_default_axis() {
        let (x, y, z, a) = euler_to_axis_angle(&[(Axis::Z, 0.0), (Axis::X, 0.0), (Axis::Y, 0.0)]);
        assert_eq!((x, y, z, a), (0.0, 1.0, 0.0, 0.0));
    }

    #[test]
    fn single_axis_rotation() {
        let (x, y, z, a) = euler_to_axis_angle(&[(Axis::X, 90.0)]);
        assert!(close(x, 1.0) && close(y, 0.0) && close(z, 0.0));
        assert!(close(a, FRAC_PI_2));

        let (x, y, z, a) = euler_to_axis_angle(&[(Axis::Z, -90.0), (Axis::X, 0.0)]);
        assert!(close(x, 0.0) && close(y, 0.0) && close(z, -1.0));
        assert!(close(a, FRAC_PI_2));
    }

    #[test]
    fn xml_escape_handles_quotes_and_comment_dashes() {
        assert_eq!(xml_escape("a'b<c>&"), "a&apos;b&lt;c&gt;&amp;");
        assert_eq!(xml_escape("x--y"), "x- -y");
    }
}
