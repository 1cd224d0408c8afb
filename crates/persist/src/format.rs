//! Binary chunk payload codec.
//!
//! Little-endian, fields back to back:
//! ```text
//! i32            instance count N
//! i32            division count D
//! 3×f32          chunk bounds min
//! 3×f32          chunk bounds max
//! D × 3×f32      division bounds min
//! D × 3×f32      division bounds max
//! N × 32 bytes   instances (position, angle_y, scale, fade_distance, division_id)
//! ```

use glam::Vec3;
use verdant_common::{Aabb, ChunkId, GrassInstance};

const HEADER_SIZE: usize = 4 + 4 + 12 + 12;
const VEC3_SIZE: usize = 12;

/// Malformed or truncated payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("payload truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("negative {field}: {value}")]
    NegativeCount { field: &'static str, value: i32 },
    #[error("{field} {value} does not fit the format")]
    CountOverflow { field: &'static str, value: usize },
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    #[error("division bounds length mismatch: {min} min vs {max} max")]
    DivisionBoundsMismatch { min: usize, max: usize },
    #[error("instance {instance} references division {division}, chunk has {division_count}")]
    DivisionOutOfRange {
        instance: usize,
        division: u32,
        division_count: usize,
    },
}

/// The load/save unit for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPayload {
    pub bounds: Aabb,
    pub division_min: Vec<Vec3>,
    pub division_max: Vec<Vec3>,
    pub instances: Vec<GrassInstance>,
}

impl ChunkPayload {
    /// A chunk with no instances and no divisions.
    pub fn empty(bounds: Aabb) -> Self {
        Self {
            bounds,
            division_min: Vec::new(),
            division_max: Vec::new(),
            instances: Vec::new(),
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn division_count(&self) -> usize {
        self.division_min.len()
    }

    /// Check the structural rules both encode and decode rely on.
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.division_min.len() != self.division_max.len() {
            return Err(FormatError::DivisionBoundsMismatch {
                min: self.division_min.len(),
                max: self.division_max.len(),
            });
        }
        check_count("instance count", self.instances.len())?;
        check_count("division count", self.division_min.len())?;
        let division_count = self.division_count();
        for (i, blade) in self.instances.iter().enumerate() {
            if blade.division_id as usize >= division_count {
                return Err(FormatError::DivisionOutOfRange {
                    instance: i,
                    division: blade.division_id,
                    division_count,
                });
            }
        }
        Ok(())
    }

    /// Exact encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + self.division_count() * 2 * VEC3_SIZE
            + self.instance_count() * GrassInstance::BYTE_SIZE
    }

    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        self.validate()?;
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&(self.instances.len() as i32).to_le_bytes());
        out.extend_from_slice(&(self.division_min.len() as i32).to_le_bytes());
        put_vec3(&mut out, self.bounds.min);
        put_vec3(&mut out, self.bounds.max);
        for v in &self.division_min {
            put_vec3(&mut out, *v);
        }
        for v in &self.division_max {
            put_vec3(&mut out, *v);
        }
        for blade in &self.instances {
            for c in blade.position {
                out.extend_from_slice(&c.to_le_bytes());
            }
            out.extend_from_slice(&blade.angle_y.to_le_bytes());
            for c in blade.scale {
                out.extend_from_slice(&c.to_le_bytes());
            }
            out.extend_from_slice(&blade.fade_distance.to_le_bytes());
            out.extend_from_slice(&blade.division_id.to_le_bytes());
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut reader = Reader::new(bytes);
        reader.require(8)?;
        let instance_count = reader.count("instance count")?;
        let division_count = reader.count("division count")?;

        // Size the whole payload before allocating anything.
        let needed = division_count
            .checked_mul(2 * VEC3_SIZE)
            .and_then(|d| {
                instance_count
                    .checked_mul(GrassInstance::BYTE_SIZE)
                    .and_then(|n| n.checked_add(d))
            })
            .and_then(|body| body.checked_add(HEADER_SIZE))
            .ok_or(FormatError::CountOverflow {
                field: "payload size",
                value: usize::MAX,
            })?;
        if bytes.len() < needed {
            return Err(FormatError::Truncated {
                needed,
                available: bytes.len(),
            });
        }
        if bytes.len() > needed {
            return Err(FormatError::TrailingBytes(bytes.len() - needed));
        }

        let bounds = Aabb::new(reader.vec3()?, reader.vec3()?);
        let division_min = (0..division_count)
            .map(|_| reader.vec3())
            .collect::<Result<Vec<_>, _>>()?;
        let division_max = (0..division_count)
            .map(|_| reader.vec3())
            .collect::<Result<Vec<_>, _>>()?;
        let instances = (0..instance_count)
            .map(|_| reader.instance())
            .collect::<Result<Vec<_>, _>>()?;

        let payload = Self {
            bounds,
            division_min,
            division_max,
            instances,
        };
        payload.validate()?;
        Ok(payload)
    }
}

/// Logical asset key for a chunk, e.g. `gid_0003_0012`.
pub fn asset_key(id: ChunkId) -> String {
    format!("gid_{:04}_{:04}", id.x, id.y)
}

fn check_count(field: &'static str, value: usize) -> Result<(), FormatError> {
    if value > i32::MAX as usize {
        return Err(FormatError::CountOverflow { field, value });
    }
    Ok(())
}

fn put_vec3(out: &mut Vec<u8>, v: Vec3) {
    for c in v.to_array() {
        out.extend_from_slice(&c.to_le_bytes());
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn require(&self, len: usize) -> Result<(), FormatError> {
        let needed = self.offset + len;
        if needed > self.bytes.len() {
            return Err(FormatError::Truncated {
                needed,
                available: self.bytes.len(),
            });
        }
        Ok(())
    }

    fn take4(&mut self) -> Result<[u8; 4], FormatError> {
        self.require(4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[self.offset..self.offset + 4]);
        self.offset += 4;
        Ok(word)
    }

    fn count(&mut self, field: &'static str) -> Result<usize, FormatError> {
        let value = i32::from_le_bytes(self.take4()?);
        usize::try_from(value).map_err(|_| FormatError::NegativeCount { field, value })
    }

    fn f32(&mut self) -> Result<f32, FormatError> {
        Ok(f32::from_le_bytes(self.take4()?))
    }

    fn vec3(&mut self) -> Result<Vec3, FormatError> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    fn instance(&mut self) -> Result<GrassInstance, FormatError> {
        Ok(GrassInstance {
            position: [self.f32()?, self.f32()?, self.f32()?],
            angle_y: self.f32()?,
            scale: [self.f32()?, self.f32()?],
            fade_distance: self.f32()?,
            division_id: u32::from_le_bytes(self.take4()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload(instances: usize, divisions: usize) -> ChunkPayload {
        let division_min = (0..divisions)
            .map(|i| Vec3::new(i as f32, -1.0, 0.5))
            .collect();
        let division_max = (0..divisions)
            .map(|i| Vec3::new(i as f32 + 1.0, 2.0, 1.5))
            .collect();
        let instances = (0..instances)
            .map(|i| GrassInstance {
                position: [i as f32 * 0.25, 0.1, -(i as f32)],
                angle_y: (i * 37 % 360) as f32,
                scale: [0.8, 1.2],
                fade_distance: 0.01 + (i % 98) as f32 / 100.0,
                division_id: (i % divisions.max(1)) as u32,
            })
            .collect();
        ChunkPayload {
            bounds: Aabb::new(Vec3::new(-8.0, -1.0, -8.0), Vec3::new(8.0, 3.0, 8.0)),
            division_min,
            division_max,
            instances,
        }
    }

    #[test]
    fn layout_matches_documented_offsets() {
        let payload = sample_payload(2, 3);
        let bytes = payload.encode().unwrap();
        assert_eq!(bytes.len(), 32 + 3 * 24 + 2 * 32);
        assert_eq!(bytes.len(), payload.encoded_len());
        assert_eq!(&bytes[0..4], &2i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &3i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &(-8.0f32).to_le_bytes());
        // First division max follows all division mins.
        let div_max_start = 32 + 3 * 12;
        assert_eq!(&bytes[div_max_start..div_max_start + 4], &1.0f32.to_le_bytes());
        // Last word of the last instance is its division id.
        let tail = &bytes[bytes.len() - 4..];
        assert_eq!(tail, &1u32.to_le_bytes());
    }

    #[test]
    fn decode_restores_bit_identical_fields() {
        let mut payload = sample_payload(5, 4);
        payload.instances[2].angle_y = -0.0;
        payload.instances[3].fade_distance = f32::MIN_POSITIVE;
        let decoded = ChunkPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded.instance_count(), 5);
        assert_eq!(decoded.division_count(), 4);
        for (a, b) in payload.instances.iter().zip(&decoded.instances) {
            assert_eq!(bytemuck::bytes_of(a), bytemuck::bytes_of(b));
        }
        assert_eq!(decoded.bounds, payload.bounds);
        assert_eq!(decoded.division_max, payload.division_max);
    }

    #[test]
    fn empty_chunk_is_header_only() {
        let payload = ChunkPayload::empty(Aabb::default());
        let bytes = payload.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let decoded = ChunkPayload::decode(&bytes).unwrap();
        assert_eq!(decoded.instance_count(), 0);
        assert_eq!(decoded.division_count(), 0);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = sample_payload(3, 2).encode().unwrap();
        let cut = &bytes[..bytes.len() - 5];
        match ChunkPayload::decode(cut) {
            Err(FormatError::Truncated { needed, available }) => {
                assert_eq!(needed, bytes.len());
                assert_eq!(available, bytes.len() - 5);
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
        assert!(matches!(
            ChunkPayload::decode(&bytes[..6]),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = sample_payload(1, 1).encode().unwrap();
        bytes.extend_from_slice(&[0, 0, 0]);
        assert_eq!(
            ChunkPayload::decode(&bytes),
            Err(FormatError::TrailingBytes(3))
        );
    }

    #[test]
    fn negative_count_is_rejected() {
        let mut bytes = sample_payload(1, 1).encode().unwrap();
        bytes[0..4].copy_from_slice(&(-2i32).to_le_bytes());
        assert_eq!(
            ChunkPayload::decode(&bytes),
            Err(FormatError::NegativeCount {
                field: "instance count",
                value: -2
            })
        );
    }

    #[test]
    fn huge_counts_fail_without_allocating() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&i32::MAX.to_le_bytes());
        bytes[4..8].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(
            ChunkPayload::decode(&bytes),
            Err(FormatError::Truncated { .. }) | Err(FormatError::CountOverflow { .. })
        ));
    }

    #[test]
    fn out_of_range_division_is_rejected() {
        let mut payload = sample_payload(2, 2);
        payload.instances[1].division_id = 9;
        assert!(matches!(
            payload.encode(),
            Err(FormatError::DivisionOutOfRange {
                instance: 1,
                division: 9,
                ..
            })
        ));
    }

    #[test]
    fn mismatched_division_bounds_are_rejected() {
        let mut payload = sample_payload(0, 2);
        payload.division_max.pop();
        assert_eq!(
            payload.encode(),
            Err(FormatError::DivisionBoundsMismatch { min: 2, max: 1 })
        );
    }

    #[test]
    fn asset_key_is_zero_padded() {
        assert_eq!(asset_key(ChunkId::new(3, 12)), "gid_0003_0012");
        assert_eq!(asset_key(ChunkId::new(0, 0)), "gid_0000_0000");
    }
}
