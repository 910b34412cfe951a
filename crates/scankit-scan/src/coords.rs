//! Coordinate frames and transforms.
//!
//! Three frames describe the same physical pose:
//!
//! - **Camera-relative** is the user-authoring frame: where the camera
//!   stands relative to the turntable (radius, height) and how the
//!   turntable and tilt servo are rotated.
//! - **Machine** is what the controller sees; [`Position4D`] in machine
//!   coordinates.
//! - **Cartesian** is the export frame with world-space labels: x/y as
//!   machine travel, `z` carrying the turntable rotation angle, `c` the
//!   tilt. Isomorphic to machine, relabelled for downstream tooling.
//!
//! Conversions are total: out-of-range input yields out-of-range output,
//! and validation is a separate step.

use scankit_core::types::Position4D;
use serde::{Deserialize, Serialize};

/// Camera pose relative to the turntable
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraRelative {
    /// Horizontal distance from turntable center to the camera, mm
    pub radius: f64,
    /// Camera height above the turntable surface, mm
    pub height: f64,
    /// Turntable rotation angle, degrees
    pub rotation: f64,
    /// Camera tilt servo angle, degrees (negative = down)
    pub tilt: f64,
}

/// World-labelled export frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Cartesian {
    /// X position, mm
    pub x: f64,
    /// Y position, mm
    pub y: f64,
    /// Turntable rotation angle, degrees
    pub z: f64,
    /// Camera tilt angle, degrees
    pub c: f64,
}

/// Converts between the three frames.
///
/// `offset` is the installation's calibration vector between the
/// camera-relative and machine origins. The reference installation is
/// calibrated to identity, so the default is zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameTransformer {
    /// Calibration offset added when entering the machine frame
    pub offset: Position4D,
}

impl FrameTransformer {
    /// Transformer with an explicit calibration offset
    pub fn with_offset(offset: Position4D) -> Self {
        Self { offset }
    }

    /// Camera-relative -> machine
    pub fn camera_to_machine(&self, pose: &CameraRelative) -> Position4D {
        Position4D::new(
            pose.radius + self.offset.x,
            pose.height + self.offset.y,
            pose.rotation + self.offset.z,
            pose.tilt + self.offset.c,
        )
    }

    /// Machine -> camera-relative
    pub fn machine_to_camera(&self, machine: &Position4D) -> CameraRelative {
        CameraRelative {
            radius: machine.x - self.offset.x,
            height: machine.y - self.offset.y,
            rotation: machine.z - self.offset.z,
            tilt: machine.c - self.offset.c,
        }
    }

    /// Machine -> cartesian (relabelling; exact)
    pub fn machine_to_cartesian(&self, machine: &Position4D) -> Cartesian {
        Cartesian {
            x: machine.x,
            y: machine.y,
            z: machine.z,
            c: machine.c,
        }
    }

    /// Cartesian -> machine (relabelling; exact)
    pub fn cartesian_to_machine(&self, world: &Cartesian) -> Position4D {
        Position4D::new(world.x, world.y, world.z, world.c)
    }

    /// Camera-relative -> cartesian
    pub fn camera_to_cartesian(&self, pose: &CameraRelative) -> Cartesian {
        self.machine_to_cartesian(&self.camera_to_machine(pose))
    }

    /// Cartesian -> camera-relative
    pub fn cartesian_to_camera(&self, world: &Cartesian) -> CameraRelative {
        self.machine_to_camera(&self.cartesian_to_machine(world))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() <= tolerance
    }

    #[test]
    fn camera_machine_round_trip() {
        let transformer = FrameTransformer::with_offset(Position4D::new(5.0, -3.0, 10.0, 0.5));
        let pose = CameraRelative {
            radius: 82.5,
            height: 120.0,
            rotation: 45.0,
            tilt: -15.0,
        };
        let back = transformer.machine_to_camera(&transformer.camera_to_machine(&pose));
        assert!(close(back.radius, pose.radius, 1e-6));
        assert!(close(back.height, pose.height, 1e-6));
        assert!(close(back.rotation, pose.rotation, 1e-6));
        assert!(close(back.tilt, pose.tilt, 1e-6));
    }

    #[test]
    fn machine_cartesian_round_trip_is_exact() {
        let transformer = FrameTransformer::default();
        let machine = Position4D::new(12.345678901, 98.7, -170.0, 33.3);
        let back = transformer.cartesian_to_machine(&transformer.machine_to_cartesian(&machine));
        assert!(close(back.x, machine.x, 1e-9));
        assert!(close(back.y, machine.y, 1e-9));
        assert!(close(back.z, machine.z, 1e-9));
        assert!(close(back.c, machine.c, 1e-9));
    }

    #[test]
    fn identity_offset_maps_fields_directly() {
        let transformer = FrameTransformer::default();
        let pose = CameraRelative {
            radius: 50.0,
            height: 100.0,
            rotation: 90.0,
            tilt: -10.0,
        };
        let machine = transformer.camera_to_machine(&pose);
        assert_eq!(machine, Position4D::new(50.0, 100.0, 90.0, -10.0));
    }

    #[test]
    fn conversions_are_total_on_out_of_range_input() {
        let transformer = FrameTransformer::default();
        let pose = CameraRelative {
            radius: -999.0,
            height: 1e6,
            rotation: 7200.0,
            tilt: 500.0,
        };
        // No clamping, no panic: garbage in, garbage out.
        let machine = transformer.camera_to_machine(&pose);
        assert_eq!(machine.x, -999.0);
        assert_eq!(machine.z, 7200.0);
    }
}
