//! Engine-level object layouts (managed strings, lists, arrays, TRS nodes).
//!
//! These are properties of the runtime rather than of a particular game
//! build, so they live here as constants instead of in [`super::Layout`].

use bytemuck::{Pod, Zeroable};
use encoding_rs::UTF_16LE;

use super::address::Address;
use super::reader::ReadMemoryExt;
use crate::error::ReadError;
use crate::math::{Quat, Vec3};

/// Managed string: character count (i32).
pub const STRING_LENGTH: u64 = 0x10;
/// Managed string: first UTF-16 code unit.
pub const STRING_CHARS: u64 = 0x14;

/// Managed `List<T>`: pointer to the backing array.
pub const LIST_ITEMS: u64 = 0x10;
/// Managed `List<T>`: element count (i32).
pub const LIST_SIZE: u64 = 0x18;
/// Managed array: first element.
pub const ARRAY_FIRST_ELEMENT: u64 = 0x20;
/// Managed array: length (i32).
pub const ARRAY_LENGTH: u64 = 0x18;

/// Component list: the transform component of a game object.
pub const COMPONENT_TRANSFORM: u64 = 0x8;

/// Bound on class-name and object-name reads.
pub const NAME_MAX: usize = 64;

/// Decode a NUL-terminated UTF-8 buffer, replacing invalid sequences.
pub fn decode_utf8_z(bytes: &[u8]) -> String {
    let len = memchr::memchr(0, bytes).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

/// Decode UTF-16LE, stopping at the first NUL code unit.
pub fn decode_utf16le(bytes: &[u8]) -> String {
    let units = bytes.len() / 2;
    let len = (0..units)
        .find(|&i| bytes[i * 2] == 0 && bytes[i * 2 + 1] == 0)
        .unwrap_or(units);
    let (decoded, _, _) = UTF_16LE.decode(&bytes[..len * 2]);
    decoded.into_owned()
}

/// One node of a transform hierarchy: translation, rotation, scale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TrsX {
    pub t: Vec3,
    pub _pad0: f32,
    pub q: Quat,
    pub s: Vec3,
    pub _pad1: f32,
}

impl TrsX {
    pub fn new(t: Vec3, q: Quat, s: Vec3) -> Self {
        Self {
            t,
            _pad0: 0.0,
            q,
            s,
            _pad1: 0.0,
        }
    }
}

/// One node of the object manager's intrusive doubly-linked list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ListNode {
    pub prev: u64,
    pub next: u64,
    pub object: u64,
}

impl ListNode {
    #[inline]
    pub fn object(&self) -> Address {
        Address(self.object)
    }

    #[inline]
    pub fn next(&self) -> Address {
        Address(self.next)
    }

    #[inline]
    pub fn prev(&self) -> Address {
        Address(self.prev)
    }
}

/// Resolve an object's class name through a pointer chain.
pub fn read_class_name<R: ReadMemoryExt + ?Sized>(
    reader: &R,
    object: Address,
    chain: &[u64],
) -> Result<String, ReadError> {
    let name = reader.read_ptr_chain(object, chain)?;
    reader.read_utf8(name, NAME_MAX)
}

/// Read the element pointers of a managed `List<ptr>`.
///
/// Fails if the count is outside `0..=max_count`; null entries are dropped.
pub fn read_pointer_list<R: ReadMemoryExt + ?Sized>(
    reader: &R,
    list: Address,
    max_count: usize,
) -> Result<Vec<Address>, ReadError> {
    let items = reader.read_ptr(list.offset(LIST_ITEMS))?;
    let count = reader.read_i32(list.offset(LIST_SIZE))?;
    if count < 0 || count as usize > max_count {
        return Err(ReadError::Truncated {
            address: list.raw(),
            wanted: max_count,
            got: count.max(0) as usize,
        });
    }
    if count == 0 {
        return Ok(Vec::new());
    }
    let raw = reader.read_array::<u64>(items.offset(ARRAY_FIRST_ELEMENT), count as usize)?;
    Ok(raw
        .into_iter()
        .map(Address)
        .filter(|addr| !addr.is_null())
        .collect())
}

/// Read the element pointers of a managed `ptr[]`.
///
/// Same bounds as [`read_pointer_list`]; null elements are dropped.
pub fn read_pointer_array<R: ReadMemoryExt + ?Sized>(
    reader: &R,
    array: Address,
    max_count: usize,
) -> Result<Vec<Address>, ReadError> {
    let count = reader.read_i32(array.offset(ARRAY_LENGTH))?;
    if count < 0 || count as usize > max_count {
        return Err(ReadError::Truncated {
            address: array.raw(),
            wanted: max_count,
            got: count.max(0) as usize,
        });
    }
    if count == 0 {
        return Ok(Vec::new());
    }
    let raw = reader.read_array::<u64>(array.offset(ARRAY_FIRST_ELEMENT), count as usize)?;
    Ok(raw
        .into_iter()
        .map(Address)
        .filter(|addr| !addr.is_null())
        .collect())
}

/// Number of elements of a managed `List<T>`.
pub fn read_list_count<R: ReadMemoryExt + ?Sized>(reader: &R, list: Address) -> Result<i32, ReadError> {
    reader.read_i32(list.offset(LIST_SIZE))
}
