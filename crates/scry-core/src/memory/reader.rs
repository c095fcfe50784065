use bytemuck::Pod;

use super::address::Address;
use super::unity::{self, decode_utf8_z};
use crate::error::ReadError;

/// Maximum size of a single string read.
pub const MAX_STRING_READ: usize = 0x1000;

/// One pending request of a batched read.
#[derive(Debug, Clone)]
pub struct ScatterEntry {
    pub address: Address,
    pub len: usize,
    pub result: Option<Result<Vec<u8>, ReadError>>,
}

impl ScatterEntry {
    pub fn new(address: Address, len: usize) -> Self {
        Self {
            address,
            len,
            result: None,
        }
    }
}

/// Primitive access to the target's address space.
///
/// Implementors only need `read_bytes`; `read_scatter` should be overridden
/// by backends that can satisfy many reads in one round-trip.
pub trait ReadMemory: Send + Sync {
    /// Read exactly `len` bytes at `address`.
    fn read_bytes(&self, address: Address, len: usize) -> Result<Vec<u8>, ReadError>;

    /// Satisfy every entry, filling in `result`.
    ///
    /// A failed entry never affects its siblings.
    fn read_scatter(&self, entries: &mut [ScatterEntry]) {
        for entry in entries.iter_mut() {
            let result = entry
                .address
                .validate()
                .and_then(|addr| self.read_bytes(addr, entry.len));
            entry.result = Some(result);
        }
    }
}

impl<R: ReadMemory + ?Sized> ReadMemory for &R {
    fn read_bytes(&self, address: Address, len: usize) -> Result<Vec<u8>, ReadError> {
        (**self).read_bytes(address, len)
    }

    fn read_scatter(&self, entries: &mut [ScatterEntry]) {
        (**self).read_scatter(entries)
    }
}

impl<R: ReadMemory + ?Sized> ReadMemory for std::sync::Arc<R> {
    fn read_bytes(&self, address: Address, len: usize) -> Result<Vec<u8>, ReadError> {
        (**self).read_bytes(address, len)
    }

    fn read_scatter(&self, entries: &mut [ScatterEntry]) {
        (**self).read_scatter(entries)
    }
}

/// Decode a plain value from exactly `size_of::<T>()` bytes.
pub fn decode_value<T: Pod>(address: Address, bytes: &[u8]) -> Result<T, ReadError> {
    let size = std::mem::size_of::<T>();
    if bytes.len() < size {
        return Err(ReadError::Truncated {
            address: address.raw(),
            wanted: size,
            got: bytes.len(),
        });
    }
    Ok(bytemuck::pod_read_unaligned(&bytes[..size]))
}

/// Decode a contiguous array of `count` plain values.
pub fn decode_array<T: Pod>(address: Address, bytes: &[u8], count: usize) -> Result<Vec<T>, ReadError> {
    let size = std::mem::size_of::<T>();
    let wanted = size * count;
    if bytes.len() < wanted {
        return Err(ReadError::Truncated {
            address: address.raw(),
            wanted,
            got: bytes.len(),
        });
    }
    Ok(bytes[..wanted]
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Typed helpers layered over [`ReadMemory`].
pub trait ReadMemoryExt: ReadMemory {
    fn read_value<T: Pod>(&self, address: Address) -> Result<T, ReadError> {
        let address = address.validate()?;
        let bytes = self.read_bytes(address, std::mem::size_of::<T>())?;
        decode_value(address, &bytes)
    }

    fn read_array<T: Pod>(&self, address: Address, count: usize) -> Result<Vec<T>, ReadError> {
        let address = address.validate()?;
        let bytes = self.read_bytes(address, std::mem::size_of::<T>() * count)?;
        decode_array(address, &bytes, count)
    }

    fn read_u64(&self, address: Address) -> Result<u64, ReadError> {
        self.read_value::<u64>(address)
    }

    fn read_i32(&self, address: Address) -> Result<i32, ReadError> {
        self.read_value::<i32>(address)
    }

    fn read_bool(&self, address: Address) -> Result<bool, ReadError> {
        Ok(self.read_value::<u8>(address)? != 0)
    }

    /// Read a pointer and reject it unless it is a valid user-space address.
    fn read_ptr(&self, address: Address) -> Result<Address, ReadError> {
        Address(self.read_u64(address)?).validate()
    }

    /// Follow `offsets` from `address`: read pointer, add offset, repeat.
    fn read_ptr_chain(&self, address: Address, offsets: &[u64]) -> Result<Address, ReadError> {
        offsets
            .iter()
            .try_fold(address, |ptr, &offset| self.read_ptr(ptr.offset(offset)))
    }

    /// Read a NUL-terminated UTF-8 string of at most `max_len` bytes.
    fn read_utf8(&self, address: Address, max_len: usize) -> Result<String, ReadError> {
        let address = address.validate()?;
        let bytes = self.read_bytes(address, max_len.min(MAX_STRING_READ))?;
        Ok(decode_utf8_z(&bytes))
    }

    /// Read a managed (UTF-16) string object of at most `max_bytes` payload.
    fn read_unity_string(&self, address: Address, max_bytes: usize) -> Result<String, ReadError> {
        let address = address.validate()?;
        let chars = self.read_i32(address.offset(unity::STRING_LENGTH))?;
        let len = (chars.max(0) as usize * 2).min(max_bytes.min(MAX_STRING_READ));
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = self.read_bytes(address.offset(unity::STRING_CHARS), len)?;
        Ok(unity::decode_utf16le(&bytes))
    }
}

impl<R: ReadMemory + ?Sized> ReadMemoryExt for R {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryImageBuilder;

    #[test]
    fn test_read_value_rejects_invalid_address() {
        let image = MemoryImageBuilder::new().build();
        assert_eq!(
            image.read_u64(Address(0x10)),
            Err(ReadError::InvalidAddress(0x10))
        );
    }

    #[test]
    fn test_read_ptr_chain() {
        let image = MemoryImageBuilder::new()
            .write_u64(0x10000, 0x20000)
            .write_u64(0x20008, 0x30000)
            .write_u64(0x30010, 0x40000)
            .build();

        let end = image
            .read_ptr_chain(Address(0x10000), &[0x0, 0x8, 0x10])
            .unwrap();
        assert_eq!(end, Address(0x40000));
    }

    #[test]
    fn test_read_ptr_chain_stops_on_null() {
        let image = MemoryImageBuilder::new()
            .write_u64(0x10000, 0x20000)
            .write_u64(0x20008, 0)
            .build();

        let err = image
            .read_ptr_chain(Address(0x10000), &[0x0, 0x8, 0x10])
            .unwrap_err();
        assert_eq!(err, ReadError::InvalidAddress(0));
    }

    #[test]
    fn test_read_utf8_stops_at_nul() {
        let image = MemoryImageBuilder::new()
            .write_bytes(0x10000, b"GameWorld\0garbage")
            .build();
        assert_eq!(image.read_utf8(Address(0x10000), 17).unwrap(), "GameWorld");
    }

    #[test]
    fn test_read_unity_string() {
        let image = MemoryImageBuilder::new()
            .write_unity_string(0x10000, "factory4_day")
            .build();
        assert_eq!(
            image.read_unity_string(Address(0x10000), 128).unwrap(),
            "factory4_day"
        );
    }

    #[test]
    fn test_decode_array_truncated() {
        let err = decode_array::<u32>(Address(0x10000), &[1, 0, 0, 0, 2], 2).unwrap_err();
        assert_eq!(
            err,
            ReadError::Truncated {
                address: 0x10000,
                wanted: 8,
                got: 5
            }
        );
    }

    #[test]
    fn test_default_scatter_isolates_failures() {
        let image = MemoryImageBuilder::new().write_u64(0x10000, 7).build();
        let mut entries = vec![
            ScatterEntry::new(Address(0x10000), 8),
            ScatterEntry::new(Address(0x90000), 8),
            ScatterEntry::new(Address(0x1), 8),
        ];
        image.read_scatter(&mut entries);
        assert!(matches!(entries[0].result, Some(Ok(_))));
        assert!(matches!(entries[1].result, Some(Err(ReadError::Unmapped { .. }))));
        assert_eq!(entries[2].result, Some(Err(ReadError::InvalidAddress(1))));
    }
}
