use cgmath::{InnerSpace, Vector3};

/// Point light attached to a scene object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub colour: [f32; 3],
    pub radius: f32,
    pub falloff: f32,
    pub intensity: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            colour: [1.0, 1.0, 1.0],
            radius: 10.0,
            falloff: 0.75,
            intensity: 1.0,
        }
    }
}

/// The scene's single directional light (sun by day, moon by night).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels in (pointing away from the sun).
    pub direction: Vector3<f32>,
    pub colour: [f32; 3],
    pub is_moon: bool,
}

impl DirectionalLight {
    /// Derives the light from a normalized time of day (0 = midnight, 0.5 = noon).
    pub fn from_time_of_day(time_of_day: f32) -> Self {
        let angle = (time_of_day.rem_euclid(1.0) - 0.25) * std::f32::consts::TAU;
        // sun position on a circle in the x/y plane, rising in +x
        let sun = Vector3::new(angle.cos(), angle.sin(), 0.2).normalize();
        if sun.y >= 0.0 {
            let warmth = sun.y.clamp(0.0, 1.0);
            Self {
                direction: -sun,
                colour: [1.0, 0.6 + 0.4 * warmth, 0.4 + 0.6 * warmth],
                is_moon: false,
            }
        } else {
            let moon = -sun;
            Self {
                direction: -moon,
                colour: [0.25, 0.3, 0.45],
                is_moon: true,
            }
        }
    }
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self::from_time_of_day(0.5)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fog {
    pub start: f32,
    pub end: f32,
    pub colour: [f32; 3],
    pub underwater: bool,
}
