use std::sync::Arc;

use crate::error::{Error, Result};
use crate::math::Vec3;
use crate::memory::layout::TransformOffsets;
use crate::memory::unity::TrsX;
use crate::memory::{Address, ReadMemory, ReadMemoryExt};

/// Largest hierarchy index accepted when building a transform.
pub const MAX_TRANSFORM_INDEX: i32 = 0x4000;

/// Cached addresses of one node in a native transform hierarchy.
///
/// A `Transform` is immutable: when its backing arrays move it is replaced
/// with a freshly built one, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    internal: Address,
    hierarchy: Address,
    vertices: Address,
    index: usize,
    parents: Arc<[i32]>,
}

impl Transform {
    /// Build from a transform-internal address.
    pub fn new<R: ReadMemory + ?Sized>(
        reader: &R,
        internal: Address,
        offsets: &TransformOffsets,
    ) -> Result<Self> {
        let internal = internal.validate()?;
        let hierarchy = reader.read_ptr(internal.offset(offsets.hierarchy))?;
        let index = reader.read_i32(internal.offset(offsets.index))?;
        if !(0..MAX_TRANSFORM_INDEX).contains(&index) {
            return Err(Error::validation(format!(
                "transform index {} out of range",
                index
            )));
        }
        let vertices = reader.read_ptr(hierarchy.offset(offsets.vertices))?;
        let indices = reader.read_ptr(hierarchy.offset(offsets.indices))?;
        let count = index as usize + 1;
        let parents = reader.read_array::<i32>(indices, count)?;
        Ok(Self {
            internal,
            hierarchy,
            vertices,
            index: index as usize,
            parents: parents.into(),
        })
    }

    pub fn internal(&self) -> Address {
        self.internal
    }

    pub fn hierarchy(&self) -> Address {
        self.hierarchy
    }

    /// Address of the vertex array, the value checked for silent moves.
    pub fn vertices(&self) -> Address {
        self.vertices
    }

    /// Vertices that must be read to resolve this node.
    pub fn count(&self) -> usize {
        self.index + 1
    }

    /// World position from a freshly read vertex array.
    pub fn compute_position(&self, vertices: &[TrsX]) -> Result<Vec3> {
        let count = self.count();
        if vertices.len() < count {
            return Err(Error::validation(format!(
                "expected {} vertices, got {}",
                count,
                vertices.len()
            )));
        }
        let mut position = vertices[self.index].t;
        let mut parent = self.parents[self.index];
        let mut steps = 0;
        while parent >= 0 {
            let p = parent as usize;
            if p >= count || steps >= count {
                return Err(Error::validation("transform hierarchy is corrupt"));
            }
            let node = &vertices[p];
            position = node.q.rotate(position.mul(node.s)).add(node.t);
            parent = self.parents[p];
            steps += 1;
        }
        if !position.is_finite() {
            return Err(Error::validation("transform position is not finite"));
        }
        Ok(position)
    }

    /// Read the vertex array and resolve the position in one go.
    pub fn read_position<R: ReadMemory + ?Sized>(&self, reader: &R) -> Result<Vec3> {
        let vertices = reader.read_array::<TrsX>(self.vertices, self.count())?;
        self.compute_position(&vertices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quat;
    use crate::memory::MemoryImageBuilder;

    fn offsets() -> TransformOffsets {
        TransformOffsets {
            hierarchy: 0x38,
            index: 0x40,
            vertices: 0x18,
            indices: 0x20,
        }
    }

    fn write_transform(builder: MemoryImageBuilder, nodes: &[TrsX], parents: &[i32]) -> MemoryImageBuilder {
        let vertex_bytes: Vec<u8> = nodes.iter().flat_map(|n| bytemuck::bytes_of(n).to_vec()).collect();
        let parent_bytes: Vec<u8> = parents.iter().flat_map(|p| p.to_le_bytes()).collect();
        builder
            .write_u64(0x10038, 0x20000)
            .write_i32(0x10040, nodes.len() as i32 - 1)
            .write_u64(0x20018, 0x30000)
            .write_u64(0x20020, 0x40000)
            .write_bytes(0x30000, &vertex_bytes)
            .write_bytes(0x40000, &parent_bytes)
    }

    #[test]
    fn test_position_walks_parents() {
        let root = TrsX::new(Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY, Vec3::new(2.0, 2.0, 2.0));
        let child = TrsX::new(Vec3::new(1.0, 1.0, 1.0), Quat::IDENTITY, Vec3::new(1.0, 1.0, 1.0));
        let image = write_transform(MemoryImageBuilder::new(), &[root, child], &[-1, 0]).build();

        let transform = Transform::new(&image, Address(0x10000), &offsets()).unwrap();
        assert_eq!(transform.count(), 2);
        assert_eq!(transform.vertices(), Address(0x30000));
        let position = transform.read_position(&image).unwrap();
        assert_eq!(position, Vec3::new(12.0, 2.0, 2.0));
    }

    #[test]
    fn test_cyclic_parents_are_rejected() {
        let node = TrsX::new(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY, Vec3::new(1.0, 1.0, 1.0));
        let image = write_transform(MemoryImageBuilder::new(), &[node, node], &[1, 0]).build();

        let transform = Transform::new(&image, Address(0x10000), &offsets()).unwrap();
        assert!(matches!(
            transform.read_position(&image),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_short_vertex_array_is_rejected() {
        let node = TrsX::new(Vec3::ZERO, Quat::IDENTITY, Vec3::new(1.0, 1.0, 1.0));
        let image = write_transform(MemoryImageBuilder::new(), &[node, node], &[-1, 0]).build();
        let transform = Transform::new(&image, Address(0x10000), &offsets()).unwrap();
        assert!(transform.compute_position(&[node]).is_err());
    }

    #[test]
    fn test_negative_index_is_rejected() {
        let image = MemoryImageBuilder::new()
            .write_u64(0x10038, 0x20000)
            .write_i32(0x10040, -3)
            .build();
        assert!(Transform::new(&image, Address(0x10000), &offsets()).is_err());
    }
}
