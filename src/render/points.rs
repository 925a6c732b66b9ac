//! Reference decoder for raw binary point clouds.
//!
//! Layout (little-endian):
//! ```text
//! magic   [u8; 4]   b"TDPC"
//! count   u32       number of points
//! points  [f32; 3] × count
//! ```
//! Uploads happen incrementally: each `update` moves at most
//! `upload_chunk_points` positions into the resident buffer, and the object
//! becomes ready once everything is uploaded.

use bytemuck::{Pod, Zeroable};
use bytes::{BufMut, Bytes, BytesMut};
use glam::Vec3;
use tracing::debug;

use crate::render::{
    BoundingSphere, DecodeError, Decoder, DrawCommand, FrameControls, RenderContext,
    RenderableObject,
};

pub const MAGIC: [u8; 4] = *b"TDPC";

/// Bytes per point in the payload and on the device.
pub const POINT_STRIDE: usize = std::mem::size_of::<[f32; 3]>();

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Header {
    magic: [u8; 4],
    count: u32,
}

const HEADER_LEN: usize = std::mem::size_of::<Header>();

/// Encode positions into the reference format.
pub fn encode_points(points: &[Vec3]) -> Bytes {
    let header = Header {
        magic: MAGIC,
        count: points.len() as u32,
    };
    let mut buf = BytesMut::with_capacity(HEADER_LEN + points.len() * POINT_STRIDE);
    buf.put_slice(bytemuck::bytes_of(&header));
    for p in points {
        buf.put_slice(bytemuck::bytes_of(&p.to_array()));
    }
    buf.freeze()
}

/// Decoder for the reference point format.
#[derive(Debug, Clone)]
pub struct PointCloudDecoder {
    upload_chunk_points: usize,
}

impl PointCloudDecoder {
    pub fn new(upload_chunk_points: usize) -> Self {
        Self {
            upload_chunk_points: upload_chunk_points.max(1),
        }
    }
}

impl Decoder for PointCloudDecoder {
    fn decode(&self, bytes: Bytes) -> Result<Box<dyn RenderableObject>, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                needed: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let header: Header = bytemuck::pod_read_unaligned(&bytes[..HEADER_LEN]);
        if header.magic != MAGIC {
            return Err(DecodeError::BadMagic(header.magic));
        }

        let count = header.count as usize;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != count * POINT_STRIDE {
            return Err(DecodeError::LengthMismatch {
                declared: count,
                actual: payload.len(),
            });
        }

        let positions: Vec<Vec3> = payload
            .chunks_exact(POINT_STRIDE)
            .map(|chunk| Vec3::from_array(bytemuck::pod_read_unaligned::<[f32; 3]>(chunk)))
            .collect();

        debug!(points = count, "Decoded point cloud");

        Ok(Box::new(PointCloud::new(positions, self.upload_chunk_points)))
    }
}

/// A decoded point cloud frame.
#[derive(Debug)]
pub struct PointCloud {
    /// Decoded positions waiting for upload.
    staged: Vec<Vec3>,

    /// Uploaded positions.
    resident: Vec<Vec3>,

    point_count: usize,
    upload_chunk_points: usize,
    bounding_sphere: Option<BoundingSphere>,
    controls: FrameControls,
    destroyed: bool,
}

impl PointCloud {
    pub fn new(positions: Vec<Vec3>, upload_chunk_points: usize) -> Self {
        let bounding_sphere = BoundingSphere::from_points(&positions);
        Self {
            point_count: positions.len(),
            staged: positions,
            resident: Vec::new(),
            upload_chunk_points: upload_chunk_points.max(1),
            bounding_sphere,
            controls: FrameControls::default(),
            destroyed: false,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn upload_chunk(&mut self) {
        let start = self.resident.len();
        let end = (start + self.upload_chunk_points).min(self.point_count);
        self.resident.extend_from_slice(&self.staged[start..end]);
        if self.resident.len() == self.point_count {
            self.staged = Vec::new();
        }
    }
}

impl RenderableObject for PointCloud {
    fn is_ready(&self) -> bool {
        !self.destroyed && self.resident.len() == self.point_count
    }

    fn byte_size(&self) -> usize {
        self.point_count * POINT_STRIDE
    }

    fn point_count(&self) -> usize {
        self.point_count
    }

    fn bounding_sphere(&self) -> Option<BoundingSphere> {
        self.bounding_sphere
    }

    fn controls(&self) -> &FrameControls {
        &self.controls
    }

    fn controls_mut(&mut self) -> &mut FrameControls {
        &mut self.controls
    }

    fn update(&mut self, ctx: &mut RenderContext) {
        if self.destroyed {
            return;
        }
        if !self.is_ready() {
            self.upload_chunk();
            if !self.is_ready() {
                return;
            }
        }

        ctx.commands.push(DrawCommand {
            model_matrix: self.controls.model_matrix,
            vertex_count: self.point_count,
            shadows: self.controls.shadows,
        });

        // Dirty flags are consumed by the draw that re-evaluates them.
        self.controls.style_dirty = false;
        self.controls.clipping_planes_dirty = false;
    }

    fn destroy(&mut self) {
        self.staged = Vec::new();
        self.resident = Vec::new();
        self.destroyed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_points(n: usize) -> Vec<Vec3> {
        (0..n).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect()
    }

    #[test]
    fn test_decode_and_incremental_upload() {
        let bytes = encode_points(&sample_points(5));
        let mut object = PointCloudDecoder::new(2).decode(bytes).unwrap();
        let mut ctx = RenderContext::new(0.0);

        assert_eq!(object.point_count(), 5);
        assert_eq!(object.byte_size(), 5 * POINT_STRIDE);
        assert!(!object.is_ready());

        object.update(&mut ctx); // 2 points
        object.update(&mut ctx); // 4 points
        assert!(!object.is_ready());
        assert!(ctx.commands.is_empty());

        object.update(&mut ctx); // 5 points, ready and drawn
        assert!(object.is_ready());
        assert_eq!(ctx.commands.len(), 1);
        assert_eq!(ctx.commands[0].vertex_count, 5);
    }

    #[test]
    fn test_bounding_sphere_is_computed() {
        let bytes = encode_points(&sample_points(3));
        let object = PointCloudDecoder::new(16).decode(bytes).unwrap();
        let sphere = object.bounding_sphere().unwrap();
        assert_eq!(sphere.center, Vec3::new(1.0, 0.0, 0.0));
        assert!((sphere.radius - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_bad_magic() {
        let mut raw = encode_points(&sample_points(1)).to_vec();
        raw[0] = b'X';
        let err = PointCloudDecoder::new(16).decode(Bytes::from(raw)).err().unwrap();
        assert!(matches!(err, DecodeError::BadMagic(_)));
    }

    #[test]
    fn test_truncated_payload() {
        let raw = encode_points(&sample_points(4));
        let cut = raw.slice(..raw.len() - 4);
        let err = PointCloudDecoder::new(16).decode(cut).err().unwrap();
        assert!(matches!(err, DecodeError::LengthMismatch { declared: 4, .. }));

        let err = PointCloudDecoder::new(16).decode(Bytes::from_static(b"TD")).err().unwrap();
        assert!(matches!(err, DecodeError::Truncated { needed: 8, actual: 2 }));
    }

    #[test]
    fn test_destroy_releases_and_blocks_ready() {
        let bytes = encode_points(&sample_points(2));
        let mut object = PointCloudDecoder::new(16).decode(bytes).unwrap();
        let mut ctx = RenderContext::new(0.0);
        object.update(&mut ctx);
        assert!(object.is_ready());
        object.destroy();
        assert!(!object.is_ready());
    }
}
