//! Property Animation
//!
//! Curve-driven animation of scalar entity properties (position and scale
//! components), independent of skeletons. A [`PropertyAnimation`] holds a set
//! of curves keyed on integer frame numbers at a fixed frame rate; the scene
//! advances a per-component time and writes the evaluated values back to the
//! entity each tick.

use bitflags::bitflags;

bitflags! {
    /// Per-component animator flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyAnimatorFlags: u32 {
        const LOOPED = 1 << 0;
    }
}

/// Which entity property a curve drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetProperty {
    PositionX,
    PositionY,
    PositionZ,
    ScaleX,
    ScaleY,
    ScaleZ,
}

/// One keyframed scalar curve. `frames` are strictly increasing frame
/// numbers; `values` pairs with them one-to-one.
#[derive(Debug, Clone)]
pub struct PropertyCurve {
    pub target: TargetProperty,
    pub frames: Vec<i32>,
    pub values: Vec<f32>,
}

impl PropertyCurve {
    /// Evaluates the curve at a (possibly fractional) frame position with
    /// linear interpolation, clamping outside the keyed range.
    #[must_use]
    pub fn evaluate(&self, frame: f32) -> f32 {
        debug_assert_eq!(self.frames.len(), self.values.len());
        if self.frames.is_empty() {
            return 0.0;
        }
        let next = self.frames.partition_point(|&f| (f as f32) <= frame);
        if next == 0 {
            return self.values[0];
        }
        let last = self.frames.len() - 1;
        if next > last {
            return self.values[last];
        }
        let i = next - 1;
        let f0 = self.frames[i] as f32;
        let f1 = self.frames[next] as f32;
        let t = if f1 - f0 > f32::EPSILON {
            ((frame - f0) / (f1 - f0)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.values[i] + (self.values[next] - self.values[i]) * t
    }

    /// Last keyed frame number, the loop length of this curve.
    #[must_use]
    pub fn last_frame(&self) -> i32 {
        self.frames.last().copied().unwrap_or(0)
    }
}

/// Immutable property animation resource.
#[derive(Debug, Clone)]
pub struct PropertyAnimation {
    pub fps: f32,
    pub curves: Vec<PropertyCurve>,
}

impl PropertyAnimation {
    #[must_use]
    pub fn new(fps: f32) -> Self {
        Self {
            fps,
            curves: Vec::new(),
        }
    }

    /// Converts a play time in seconds to a frame position, wrapping at the
    /// first curve's last frame when `looped`.
    #[must_use]
    pub fn frame_at(&self, time: f32, looped: bool) -> f32 {
        let frame = time * self.fps;
        let length = self
            .curves
            .first()
            .map_or(0, PropertyCurve::last_frame);
        if length <= 0 {
            return 0.0;
        }
        if looped {
            frame.rem_euclid(length as f32)
        } else {
            frame.min(length as f32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_curve() -> PropertyCurve {
        PropertyCurve {
            target: TargetProperty::PositionY,
            frames: vec![0, 10, 20],
            values: vec![0.0, 1.0, 0.0],
        }
    }

    #[test]
    fn evaluates_midpoint_between_keys() {
        let curve = triangle_curve();
        assert!((curve.evaluate(5.0) - 0.5).abs() < 1e-6);
        assert!((curve.evaluate(15.0) - 0.5).abs() < 1e-6);
        assert!((curve.evaluate(10.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn clamps_outside_keyed_range() {
        let curve = triangle_curve();
        assert!((curve.evaluate(-3.0) - 0.0).abs() < 1e-6);
        assert!((curve.evaluate(99.0) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn frame_wraps_when_looped() {
        let mut anim = PropertyAnimation::new(30.0);
        anim.curves.push(triangle_curve());
        // 1 second at 30 fps = frame 30, loop length 20 -> frame 10
        assert!((anim.frame_at(1.0, true) - 10.0).abs() < 1e-4);
        assert!((anim.frame_at(1.0, false) - 20.0).abs() < 1e-4);
    }
}
