//! Node transformation data.
//!
//! Position, orientation and scale of a scene node. World transforms are
//! produced by composing a parent's transform with a child's local one, the
//! same way merged geometry bakes member transforms into vertex data.

use std::ops::Mul;

use cgmath::{InnerSpace, Matrix4, One, Quaternion, Vector3};

/// Position, rotation (as quaternion), and scale of one scene node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Transform {
    /// Identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: Quaternion::one(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    /// Applies scale, rotation and translation to a point.
    pub fn transform_point(&self, point: Vector3<f32>) -> Vector3<f32> {
        let scaled = Vector3::new(
            point.x * self.scale.x,
            point.y * self.scale.y,
            point.z * self.scale.z,
        );
        self.position + self.rotation * scaled
    }

    /// Rotates a direction (normals, tangents). Non-uniform scale is ignored.
    pub fn transform_direction(&self, direction: Vector3<f32>) -> Vector3<f32> {
        let rotated = self.rotation * direction;
        if rotated.magnitude2() > 0.0 {
            rotated.normalize()
        } else {
            rotated
        }
    }

    /// Linear blend used when mixing animation keyframes and poses.
    pub fn lerp(&self, other: &Transform, t: f32) -> Transform {
        Transform {
            position: self.position + (other.position - self.position) * t,
            rotation: self.rotation.nlerp(other.rotation, t),
            scale: self.scale + (other.scale - self.scale) * t,
        }
    }
}

pub fn position_differs(a: Vector3<f32>, b: Vector3<f32>, epsilon: f32) -> bool {
    (a.x - b.x).abs() > epsilon || (a.y - b.y).abs() > epsilon || (a.z - b.z).abs() > epsilon
}

pub fn rotation_differs(a: Quaternion<f32>, b: Quaternion<f32>, epsilon: f32) -> bool {
    // q and -q describe the same orientation
    let dot = a.dot(b).abs();
    (1.0 - dot) > epsilon
}

impl Mul<Transform> for Transform {
    type Output = Self;

    fn mul(self, rhs: Transform) -> Self::Output {
        &self * &rhs
    }
}

impl<'a, 'b> Mul<&'b Transform> for &'a Transform {
    type Output = Transform;

    fn mul(self, rhs: &'b Transform) -> Self::Output {
        let new_rotation = self.rotation * rhs.rotation;

        let new_scale = Vector3::new(
            self.scale.x * rhs.scale.x,
            self.scale.y * rhs.scale.y,
            self.scale.z * rhs.scale.z,
        );
        let new_position = self.transform_point(rhs.position);

        Transform {
            position: new_position,
            rotation: new_rotation,
            scale: new_scale,
        }
    }
}

impl From<Vector3<f32>> for Transform {
    fn from(position: Vector3<f32>) -> Self {
        Transform {
            position,
            ..Default::default()
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}
