//! HRIR sphere: a triangulated unit sphere of per-ear impulse responses,
//! sampled by nearest-vertex or barycentric-bilinear lookup via a face BSP
//! tree, plus a binauralizer that accumulates decoder-speaker HRIR
//! contributions into per-ambisonic-channel stereo convolvers.

use crate::ambisonics::{AmbisonicDecoder, BFormatBuffer};
use amplimix_dsp::filters::TwoStageConvolver;
use glam::Vec3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HrirError {
    #[error("bad AMIR magic")]
    BadMagic,
    #[error("unsupported AMIR version {0}")]
    UnsupportedVersion(u16),
    #[error("truncated AMIR file")]
    Truncated,
    #[error("empty HRIR sphere (no vertices or faces)")]
    Empty,
}

/// One vertex of the HRIR sphere: a direction plus per-ear IR and delay.
#[derive(Debug, Clone)]
pub struct HrirVertex {
    pub position: Vec3,
    pub left_ir: Vec<f32>,
    pub right_ir: Vec<f32>,
    pub left_delay: f32,
    pub right_delay: f32,
}

/// A triangular face, indexing three vertices.
#[derive(Debug, Clone, Copy)]
pub struct Face {
    pub indices: [u32; 3],
}

/// BSP tree over sphere faces for O(log F) direction-to-face queries.
/// Each internal node splits its face set by a plane through the origin;
/// faces straddling the plane are kept in both children (bounded small
/// duplication, since all faces here are small relative to the sphere).
enum BspNode {
    Leaf(Vec<usize>),
    Split {
        normal: Vec3,
        front: Box<BspNode>,
        back: Box<BspNode>,
    },
}

const BSP_LEAF_SIZE: usize = 4;

struct FaceBspTree {
    root: BspNode,
}

impl FaceBspTree {
    fn build(vertices: &[HrirVertex], faces: &[Face]) -> Self {
        let all: Vec<usize> = (0..faces.len()).collect();
        Self {
            root: Self::build_node(vertices, faces, all, 0),
        }
    }

    fn centroid(vertices: &[HrirVertex], face: &Face) -> Vec3 {
        (vertices[face.indices[0] as usize].position
            + vertices[face.indices[1] as usize].position
            + vertices[face.indices[2] as usize].position)
            / 3.0
    }

    fn build_node(
        vertices: &[HrirVertex],
        faces: &[Face],
        set: Vec<usize>,
        depth: usize,
    ) -> BspNode {
        if set.len() <= BSP_LEAF_SIZE || depth > 24 {
            return BspNode::Leaf(set);
        }
        // split plane normal: mean centroid direction, rotated 90 degrees in
        // the plane spanned by it and an arbitrary axis, to get a plane that
        // actually bisects the local cluster rather than just its mean.
        let mean: Vec3 = set
            .iter()
            .map(|&i| Self::centroid(vertices, &faces[i]))
            .fold(Vec3::ZERO, |a, b| a + b)
            / set.len() as f32;
        let normal = mean.normalize_or_zero();
        let normal = if normal.length_squared() < 1e-6 {
            Vec3::X
        } else {
            normal
        };

        let mut front = Vec::new();
        let mut back = Vec::new();
        for &i in &set {
            let c = Self::centroid(vertices, &faces[i]);
            if c.dot(normal) >= 0.0 {
                front.push(i);
            } else {
                back.push(i);
            }
        }
        if front.is_empty() || back.is_empty() {
            return BspNode::Leaf(set);
        }
        BspNode::Split {
            normal,
            front: Box::new(Self::build_node(vertices, faces, front, depth + 1)),
            back: Box::new(Self::build_node(vertices, faces, back, depth + 1)),
        }
    }

    /// Returns candidate face indices likely to contain `direction`.
    fn query(&self, direction: Vec3) -> &[usize] {
        let mut node = &self.root;
        loop {
            match node {
                BspNode::Leaf(faces) => return faces,
                BspNode::Split { normal, front, back } => {
                    node = if direction.dot(*normal) >= 0.0 { front } else { back };
                }
            }
        }
    }
}

/// Barycentric weights of `point` projected onto triangle `(a, b, c)`,
/// computed in the plane containing the triangle (not requiring `point` to
/// lie exactly on it — sufficient for direction queries on a near-uniform
/// sphere triangulation).
fn barycentric(point: Vec3, a: Vec3, b: Vec3, c: Vec3) -> (f32, f32, f32) {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = point - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < 1e-12 {
        return (1.0, 0.0, 0.0);
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    let u = 1.0 - v - w;
    (u, v, w)
}

/// Direction-to-IR sampling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    Nearest,
    Bilinear,
}

/// A triangulated unit sphere of per-ear HRIR samples.
pub struct HrirSphere {
    pub sample_rate: u32,
    pub ir_len: usize,
    vertices: Vec<HrirVertex>,
    faces: Vec<Face>,
    bsp: FaceBspTree,
}

const AMIR_MAGIC: &[u8; 4] = b"AMIR";

impl HrirSphere {
    pub fn new(sample_rate: u32, ir_len: usize, vertices: Vec<HrirVertex>, faces: Vec<Face>) -> Result<Self, HrirError> {
        if vertices.is_empty() || faces.is_empty() {
            return Err(HrirError::Empty);
        }
        let bsp = FaceBspTree::build(&vertices, &faces);
        Ok(Self { sample_rate, ir_len, vertices, faces, bsp })
    }

    /// Parses the little-endian AMIR file format.
    pub fn from_amir_bytes(bytes: &[u8]) -> Result<Self, HrirError> {
        let mut pos = 0usize;
        let take = |pos: &mut usize, n: usize| -> Result<&[u8], HrirError> {
            if *pos + n > bytes.len() {
                return Err(HrirError::Truncated);
            }
            let s = &bytes[*pos..*pos + n];
            *pos += n;
            Ok(s)
        };

        if take(&mut pos, 4)? != AMIR_MAGIC {
            return Err(HrirError::BadMagic);
        }
        let version = u16::from_le_bytes(take(&mut pos, 2)?.try_into().unwrap());
        if version != 1 {
            return Err(HrirError::UnsupportedVersion(version));
        }
        let sample_rate = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap());
        let ir_len = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap()) as usize;
        let vertex_count = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap()) as usize;
        let index_count = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap()) as usize;

        let read_f32 = |pos: &mut usize| -> Result<f32, HrirError> {
            Ok(f32::from_le_bytes(take(pos, 4)?.try_into().unwrap()))
        };

        let mut vertices = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            let position = Vec3::new(read_f32(&mut pos)?, read_f32(&mut pos)?, read_f32(&mut pos)?);
            let mut left_ir = Vec::with_capacity(ir_len);
            for _ in 0..ir_len {
                left_ir.push(read_f32(&mut pos)?);
            }
            let mut right_ir = Vec::with_capacity(ir_len);
            for _ in 0..ir_len {
                right_ir.push(read_f32(&mut pos)?);
            }
            let left_delay = read_f32(&mut pos)?;
            let right_delay = read_f32(&mut pos)?;
            vertices.push(HrirVertex { position, left_ir, right_ir, left_delay, right_delay });
        }

        let mut faces = Vec::with_capacity(index_count / 3);
        for _ in 0..(index_count / 3) {
            let a = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap());
            let b = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap());
            let c = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap());
            faces.push(Face { indices: [a, b, c] });
        }

        Self::new(sample_rate, ir_len, vertices, faces)
    }

    /// Serializes to the little-endian AMIR format.
    pub fn to_amir_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(AMIR_MAGIC);
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&self.sample_rate.to_le_bytes());
        out.extend_from_slice(&(self.ir_len as u32).to_le_bytes());
        out.extend_from_slice(&(self.vertices.len() as u32).to_le_bytes());
        out.extend_from_slice(&((self.faces.len() * 3) as u32).to_le_bytes());
        for v in &self.vertices {
            out.extend_from_slice(&v.position.x.to_le_bytes());
            out.extend_from_slice(&v.position.y.to_le_bytes());
            out.extend_from_slice(&v.position.z.to_le_bytes());
            for s in &v.left_ir {
                out.extend_from_slice(&s.to_le_bytes());
            }
            for s in &v.right_ir {
                out.extend_from_slice(&s.to_le_bytes());
            }
            out.extend_from_slice(&v.left_delay.to_le_bytes());
            out.extend_from_slice(&v.right_delay.to_le_bytes());
        }
        for f in &self.faces {
            for idx in f.indices {
                out.extend_from_slice(&idx.to_le_bytes());
            }
        }
        out
    }

    fn nearest_vertex(&self, direction: Vec3) -> usize {
        let candidates = self.bsp.query(direction);
        let mut best = candidates[0];
        let mut best_idx_in_face = 0usize;
        let mut best_dot = f32::NEG_INFINITY;
        for &f in candidates {
            for &vi in &self.faces[f].indices {
                let d = self.vertices[vi as usize].position.normalize_or_zero().dot(direction);
                if d > best_dot {
                    best_dot = d;
                    best = f;
                    best_idx_in_face = vi as usize;
                }
            }
        }
        let _ = best;
        best_idx_in_face
    }

    fn containing_face(&self, direction: Vec3) -> Option<(usize, (f32, f32, f32))> {
        let candidates = self.bsp.query(direction);
        for &f in candidates {
            let face = &self.faces[f];
            let a = self.vertices[face.indices[0] as usize].position;
            let b = self.vertices[face.indices[1] as usize].position;
            let c = self.vertices[face.indices[2] as usize].position;
            let (u, v, w) = barycentric(direction, a, b, c);
            if u >= -0.05 && v >= -0.05 && w >= -0.05 {
                return Some((f, (u.max(0.0), v.max(0.0), w.max(0.0))));
            }
        }
        candidates.first().map(|&f| (f, (1.0, 0.0, 0.0)))
    }

    /// Samples left/right IR and delay for `direction` (need not be exactly
    /// unit length; it is normalized internally).
    pub fn sample(&self, direction: Vec3, mode: SamplingMode) -> (Vec<f32>, Vec<f32>, f32, f32) {
        let direction = direction.normalize_or_zero();
        match mode {
            SamplingMode::Nearest => {
                let vi = self.nearest_vertex(direction);
                let v = &self.vertices[vi];
                (v.left_ir.clone(), v.right_ir.clone(), v.left_delay, v.right_delay)
            }
            SamplingMode::Bilinear => {
                let Some((f, (u, v, w))) = self.containing_face(direction) else {
                    let vi = self.nearest_vertex(direction);
                    let vert = &self.vertices[vi];
                    return (vert.left_ir.clone(), vert.right_ir.clone(), vert.left_delay, vert.right_delay);
                };
                let face = &self.faces[f];
                let va = &self.vertices[face.indices[0] as usize];
                let vb = &self.vertices[face.indices[1] as usize];
                let vc = &self.vertices[face.indices[2] as usize];
                let blend = |xa: f32, xb: f32, xc: f32| xa * u + xb * v + xc * w;
                let left_ir: Vec<f32> = (0..self.ir_len)
                    .map(|i| blend(va.left_ir[i], vb.left_ir[i], vc.left_ir[i]))
                    .collect();
                let right_ir: Vec<f32> = (0..self.ir_len)
                    .map(|i| blend(va.right_ir[i], vb.right_ir[i], vc.right_ir[i]))
                    .collect();
                let left_delay = blend(va.left_delay, vb.left_delay, vc.left_delay);
                let right_delay = blend(va.right_delay, vb.right_delay, vc.right_delay);
                (left_ir, right_ir, left_delay, right_delay)
            }
        }
    }
}

/// Accumulates HRIR contributions across all decoder speakers into a
/// per-ambisonic-channel pair of left/right convolvers, normalized against
/// a 90-degree-azimuth reference source to bound peak gain.
pub struct Binauralizer {
    channel_convolvers: Vec<(TwoStageConvolver, TwoStageConvolver)>,
    head_block: usize,
}

impl Binauralizer {
    /// Builds per-ambisonic-channel left/right composite IRs by summing,
    /// for every decoder speaker, that speaker's sampled HRIR weighted by
    /// its decode coefficient for each ambisonic channel.
    pub fn configure(
        sphere: &HrirSphere,
        decoder: &AmbisonicDecoder,
        channel_count: usize,
        head_block: usize,
        tail_block: usize,
        sampling: SamplingMode,
    ) -> Self {
        let ir_len = sphere.ir_len;
        let mut left_irs = vec![vec![0.0f32; ir_len]; channel_count];
        let mut right_irs = vec![vec![0.0f32; ir_len]; channel_count];

        for speaker in decoder.speakers() {
            let (left_ir, right_ir, _ld, _rd) = sphere.sample(speaker.direction, sampling);
            let coeffs = speaker.decode_coefficients();
            for c in 0..channel_count.min(coeffs.len()) {
                let coeff = coeffs[c];
                for i in 0..ir_len {
                    left_irs[c][i] += left_ir[i] * coeff;
                    right_irs[c][i] += right_ir[i] * coeff;
                }
            }
        }

        // Normalize against a 90-degree reference source's peak amplitude.
        let (ref_left, ref_right, _, _) = sphere.sample(Vec3::new(1.0, 0.0, 0.0), sampling);
        let ref_peak = ref_left
            .iter()
            .chain(ref_right.iter())
            .fold(0.0f32, |acc, &s| acc.max(s.abs()))
            .max(1e-6);

        let channel_convolvers = left_irs
            .into_iter()
            .zip(right_irs)
            .map(|(mut l, mut r)| {
                for s in l.iter_mut().chain(r.iter_mut()) {
                    *s /= ref_peak;
                }
                (
                    TwoStageConvolver::new(head_block, tail_block, &l),
                    TwoStageConvolver::new(head_block, tail_block, &r),
                )
            })
            .collect();

        Self { channel_convolvers, head_block }
    }

    /// Binauralizes one `head_block`-sized block of B-format input into
    /// stereo `out` (`out[0]` = left, `out[1]` = right).
    pub fn process(&mut self, input: &BFormatBuffer, out: &mut amplimix_buffer::AudioBuffer) {
        debug_assert_eq!(out.channel_count(), 2);
        let frames = self.head_block;
        out.clear();
        let mut scratch = vec![0.0f32; frames];
        for (c, (left, right)) in self.channel_convolvers.iter_mut().enumerate() {
            let src = &input.audio().channel(c)[..frames];
            left.process(src, &mut scratch);
            for (i, s) in scratch.iter().enumerate() {
                out.channel_mut(0)[i] += s;
            }
            right.process(src, &mut scratch);
            for (i, s) in scratch.iter().enumerate() {
                out.channel_mut(1)[i] += s;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_sphere(n_lat: usize, n_lon: usize, ir_len: usize) -> HrirSphere {
        let mut vertices = Vec::new();
        for lat in 0..=n_lat {
            let theta = std::f32::consts::PI * lat as f32 / n_lat as f32;
            for lon in 0..n_lon {
                let phi = 2.0 * std::f32::consts::PI * lon as f32 / n_lon as f32;
                let position = Vec3::new(
                    theta.sin() * phi.cos(),
                    theta.cos(),
                    theta.sin() * phi.sin(),
                );
                vertices.push(HrirVertex {
                    position,
                    left_ir: vec![1.0; ir_len],
                    right_ir: vec![0.5; ir_len],
                    left_delay: 0.0,
                    right_delay: 0.0,
                });
            }
        }
        let mut faces = Vec::new();
        for lat in 0..n_lat {
            for lon in 0..n_lon {
                let a = (lat * n_lon + lon) as u32;
                let b = (lat * n_lon + (lon + 1) % n_lon) as u32;
                let c = ((lat + 1) * n_lon + lon) as u32;
                let d = ((lat + 1) * n_lon + (lon + 1) % n_lon) as u32;
                faces.push(Face { indices: [a, b, c] });
                faces.push(Face { indices: [b, d, c] });
            }
        }
        HrirSphere::new(48000, ir_len, vertices, faces).unwrap()
    }

    #[test]
    fn amir_round_trip_preserves_header_and_data() {
        let sphere = unit_sphere(4, 8, 4);
        let bytes = sphere.to_amir_bytes();
        let parsed = HrirSphere::from_amir_bytes(&bytes).unwrap();
        assert_eq!(parsed.sample_rate, sphere.sample_rate);
        assert_eq!(parsed.ir_len, sphere.ir_len);
        assert_eq!(parsed.vertices.len(), sphere.vertices.len());
        assert_eq!(parsed.faces.len(), sphere.faces.len());
    }

    #[test]
    fn nearest_sampling_returns_consistent_ir_length() {
        let sphere = unit_sphere(6, 10, 8);
        let (l, r, _ld, _rd) = sphere.sample(Vec3::new(1.0, 0.0, 0.0), SamplingMode::Nearest);
        assert_eq!(l.len(), 8);
        assert_eq!(r.len(), 8);
    }

    #[test]
    fn bilinear_sampling_blends_without_panicking() {
        let sphere = unit_sphere(6, 10, 8);
        for _ in 0..20 {
            let dir = Vec3::new(0.3, 0.6, 0.2).normalize();
            let (l, r, _, _) = sphere.sample(dir, SamplingMode::Bilinear);
            assert_eq!(l.len(), 8);
            assert_eq!(r.len(), 8);
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; 32];
        assert!(matches!(HrirSphere::from_amir_bytes(&bytes), Err(HrirError::BadMagic)));
    }
}
