//! Render collaborator surface.
//!
//! The stream never draws anything itself. Decoded frames are
//! [`RenderableObject`]s: the stream writes their [`FrameControls`], calls
//! `update` once per tick and the object pushes [`DrawCommand`]s into the
//! [`RenderContext`].
//!
//! - [`points`]: reference decoder for raw binary point clouds

pub mod points;

use bytes::Bytes;
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ShadingConfig;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Buffer too short: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("Unrecognized magic {0:?}")]
    BadMagic([u8; 4]),

    #[error("Payload holds {actual} bytes but header declares {declared} points")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Whether frames cast and/or receive shadows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShadowMode {
    Disabled,
    #[default]
    Enabled,
    CastOnly,
    ReceiveOnly,
}

/// A single draw submission produced by a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub model_matrix: Mat4,
    pub vertex_count: usize,
    pub shadows: ShadowMode,
}

/// Per-frame state handed to the stream by the render loop.
#[derive(Debug, Default)]
pub struct RenderContext {
    /// Scene time in seconds.
    pub time: f64,

    /// Scene-mode transition in progress; the stream skips such frames.
    pub morphing: bool,

    /// Draw commands accumulated this frame.
    pub commands: Vec<DrawCommand>,
}

impl RenderContext {
    pub fn new(time: f64) -> Self {
        Self {
            time,
            ..Default::default()
        }
    }

    /// Start a new frame: set the time and drop last frame's commands.
    pub fn begin_frame(&mut self, time: f64) {
        self.time = time;
        self.commands.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn volume(&self) -> f64 {
        let r = self.radius as f64;
        4.0 / 3.0 * std::f64::consts::PI * r * r * r
    }

    /// Smallest sphere around the centroid that contains every point.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let center = points.iter().copied().sum::<Vec3>() / points.len() as f32;
        let radius = points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0f32, f32::max);
        Some(Self { center, radius })
    }
}

/// Typed controls the stream sets on a decoded object before each update.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameControls {
    pub model_matrix: Mat4,
    pub time_since_load_ms: f64,
    pub shadows: ShadowMode,
    pub is_clipped: bool,
    pub clipping_planes_dirty: bool,
    pub style_dirty: bool,
    pub attenuation: bool,
    pub geometric_error: f64,
    pub geometric_error_scale: f64,
    pub maximum_attenuation: f64,
}

impl Default for FrameControls {
    fn default() -> Self {
        Self {
            model_matrix: Mat4::IDENTITY,
            time_since_load_ms: 0.0,
            shadows: ShadowMode::Enabled,
            is_clipped: false,
            clipping_planes_dirty: false,
            style_dirty: false,
            attenuation: false,
            geometric_error: 0.0,
            geometric_error_scale: 1.0,
            maximum_attenuation: 10.0,
        }
    }
}

/// Stream-wide settings pushed into each frame's controls before it updates.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub model_matrix: Mat4,
    pub shadows: ShadowMode,
    pub shading: ShadingConfig,
    pub time_since_load_ms: f64,
    pub is_clipped: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            model_matrix: Mat4::IDENTITY,
            shadows: ShadowMode::Enabled,
            shading: ShadingConfig::default(),
            time_since_load_ms: 0.0,
            is_clipped: false,
        }
    }
}

impl RenderSettings {
    /// Write the settings into `object`'s controls. `transform` is the
    /// frame's own transform, applied before the stream model matrix.
    pub fn apply(&self, transform: Mat4, object: &mut dyn RenderableObject) {
        let geometric_error = self.geometric_error(object);
        let controls = object.controls_mut();
        controls.model_matrix = self.model_matrix * transform;
        controls.time_since_load_ms = self.time_since_load_ms;
        controls.shadows = self.shadows;
        controls.is_clipped = self.is_clipped;
        controls.attenuation = self.shading.attenuation;
        controls.geometric_error = geometric_error;
        controls.geometric_error_scale = self.shading.geometric_error_scale;
        controls.maximum_attenuation = self.shading.maximum_attenuation.unwrap_or(10.0);
    }

    /// Fixed base resolution if configured, else the average spacing implied
    /// by the bounding volume and point count.
    pub fn geometric_error(&self, object: &dyn RenderableObject) -> f64 {
        if let Some(base) = self.shading.base_resolution {
            return base;
        }
        match object.bounding_sphere() {
            Some(sphere) if object.point_count() > 0 => {
                (sphere.volume() / object.point_count() as f64).cbrt()
            }
            _ => 0.0,
        }
    }
}

/// A decoded frame, owned exclusively by its cache slot until destroyed.
pub trait RenderableObject: Send {
    /// All renderer resources are prepared.
    fn is_ready(&self) -> bool;

    /// Memory held once ready.
    fn byte_size(&self) -> usize;

    fn point_count(&self) -> usize;

    fn bounding_sphere(&self) -> Option<BoundingSphere>;

    fn controls(&self) -> &FrameControls;

    fn controls_mut(&mut self) -> &mut FrameControls;

    /// Per-tick update. Does bounded preparation work until ready, then
    /// pushes draw commands.
    fn update(&mut self, ctx: &mut RenderContext);

    /// Release renderer resources.
    fn destroy(&mut self);
}

/// Turns fetched bytes into a renderable object.
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: Bytes) -> Result<Box<dyn RenderableObject>, DecodeError>;
}

/// Optional clipping collaborator; a change in `state` marks every frame's
/// clipping planes dirty.
pub trait ClippingPlanes: Send {
    fn enabled(&self) -> bool;

    /// Opaque state hash; compared tick over tick.
    fn state(&self) -> u32;

    fn update(&mut self, ctx: &RenderContext);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_sphere_from_points() {
        let points = [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)];
        let sphere = BoundingSphere::from_points(&points).unwrap();
        assert_eq!(sphere.center, Vec3::ZERO);
        assert!((sphere.radius - 1.0).abs() < 1e-6);
        assert!((sphere.volume() - 4.0 / 3.0 * std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn test_settings_apply() {
        use crate::render::points::PointCloud;

        let points = vec![Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)];
        let mut object = PointCloud::new(points, 16);
        let settings = RenderSettings {
            model_matrix: Mat4::from_translation(Vec3::X),
            shading: ShadingConfig {
                attenuation: true,
                ..Default::default()
            },
            ..Default::default()
        };

        settings.apply(Mat4::from_translation(Vec3::Y), &mut object);
        let controls = object.controls();
        assert_eq!(controls.model_matrix.w_axis.truncate(), Vec3::new(1.0, 1.0, 0.0));
        assert!(controls.attenuation);
        assert_eq!(controls.maximum_attenuation, 10.0);
        let expected = (4.0 / 3.0 * std::f64::consts::PI / 2.0).cbrt();
        assert!((controls.geometric_error - expected).abs() < 1e-9);
    }

    #[test]
    fn test_base_resolution_overrides_density() {
        use crate::render::points::PointCloud;

        let object = PointCloud::new(vec![Vec3::ZERO, Vec3::ONE], 16);
        let settings = RenderSettings {
            shading: ShadingConfig {
                base_resolution: Some(0.25),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(settings.geometric_error(&object), 0.25);
    }

    #[test]
    fn test_bounding_sphere_empty() {
        assert!(BoundingSphere::from_points(&[]).is_none());
    }
}
