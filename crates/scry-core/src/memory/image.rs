//! In-process address space.
//!
//! `MemoryImage` is a sparse, page-granular byte store implementing
//! [`ReadMemory`]. It backs the test suite and lets the CLI replay a captured
//! image; it can be mutated while readers are running, which is how tests
//! reproduce a target that changes underneath the pipeline.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytemuck::Pod;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::address::Address;
use super::reader::{ReadMemory, ScatterEntry};
use super::unity;
use crate::error::{Error, ReadError, Result};

const PAGE_SIZE: u64 = 0x1000;

type Page = Box<[u8; PAGE_SIZE as usize]>;

/// Counters describing how the image has been read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Calls to `read_bytes` (direct or from a scatter batch).
    pub reads: usize,
    /// Calls to `read_scatter`.
    pub batches: usize,
}

#[derive(Default)]
pub struct MemoryImage {
    pages: RwLock<BTreeMap<u64, Page>>,
    failing: RwLock<HashSet<u64>>,
    reads: AtomicUsize,
    batches: AtomicUsize,
    logging: AtomicBool,
    log: Mutex<Vec<(Address, usize)>>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an image from a JSON file of hex-encoded regions.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let file: ImageFile = serde_json::from_str(&content)?;
        let image = Self::new();
        for region in &file.regions {
            let data = hex::decode(region.data.trim())
                .map_err(|e| Error::Config(format!("region {:#x}: {}", region.base, e)))?;
            image.write_bytes(Address(region.base), &data);
        }
        debug!(
            "Loaded memory image from {} ({} regions)",
            path.as_ref().display(),
            file.regions.len()
        );
        Ok(image)
    }

    /// Write raw bytes, mapping pages as needed.
    pub fn write_bytes(&self, address: Address, data: &[u8]) {
        let mut pages = self.pages.write();
        let mut addr = address.raw();
        let mut remaining = data;
        while !remaining.is_empty() {
            let page_base = addr & !(PAGE_SIZE - 1);
            let in_page = (addr - page_base) as usize;
            let n = remaining.len().min(PAGE_SIZE as usize - in_page);
            let page = pages
                .entry(page_base)
                .or_insert_with(|| Box::new([0u8; PAGE_SIZE as usize]));
            page[in_page..in_page + n].copy_from_slice(&remaining[..n]);
            remaining = &remaining[n..];
            addr += n as u64;
        }
    }

    pub fn write_value<T: Pod>(&self, address: Address, value: T) {
        self.write_bytes(address, bytemuck::bytes_of(&value));
    }

    pub fn write_u64(&self, address: Address, value: u64) {
        self.write_value(address, value);
    }

    /// NUL-terminated UTF-8 string.
    pub fn write_utf8(&self, address: Address, text: &str) {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.write_bytes(address, &bytes);
    }

    /// Managed string object (length + UTF-16 payload).
    pub fn write_unity_string(&self, address: Address, text: &str) {
        let units: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        self.write_value(address.offset(unity::STRING_LENGTH), (units.len() / 2) as i32);
        self.write_bytes(address.offset(unity::STRING_CHARS), &units);
    }

    /// Managed `List<ptr>` at `list` whose backing array lives at `array`.
    pub fn write_pointer_list(&self, list: Address, array: Address, items: &[Address]) {
        let payload: Vec<u8> = items.iter().flat_map(|v| v.raw().to_le_bytes()).collect();
        self.write_u64(list.offset(unity::LIST_ITEMS), array.raw());
        self.write_value(list.offset(unity::LIST_SIZE), items.len() as i32);
        self.write_value(array.offset(unity::ARRAY_LENGTH), items.len() as i32);
        self.write_bytes(array.offset(unity::ARRAY_FIRST_ELEMENT), &payload);
    }

    /// Save every mapped page, coalescing adjacent pages into one region.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let pages = self.pages.read();
        let mut regions: Vec<RegionFile> = Vec::new();
        let mut current: Option<(u64, Vec<u8>)> = None;
        for (&base, page) in pages.iter() {
            match current.as_mut() {
                Some((start, data)) if *start + data.len() as u64 == base => {
                    data.extend_from_slice(&page[..]);
                }
                _ => {
                    if let Some((start, data)) = current.take() {
                        regions.push(RegionFile {
                            base: start,
                            data: hex::encode(data),
                        });
                    }
                    current = Some((base, page.to_vec()));
                }
            }
        }
        if let Some((start, data)) = current {
            regions.push(RegionFile {
                base: start,
                data: hex::encode(data),
            });
        }
        let count = regions.len();
        let content = serde_json::to_string(&ImageFile { regions })?;
        std::fs::write(path.as_ref(), content)?;
        debug!("Saved memory image to {} ({} regions)", path.as_ref().display(), count);
        Ok(())
    }

    /// Unmap every page overlapping `[address, address + len)`.
    pub fn unmap(&self, address: Address, len: usize) {
        let mut pages = self.pages.write();
        let start = address.raw() & !(PAGE_SIZE - 1);
        let end = address.raw() + len as u64;
        let mut page = start;
        while page < end {
            pages.remove(&page);
            page += PAGE_SIZE;
        }
    }

    /// Make every read starting exactly at `address` fail.
    pub fn fail_reads_at(&self, address: Address) {
        self.failing.write().insert(address.raw());
    }

    pub fn clear_failures(&self) {
        self.failing.write().clear();
    }

    pub fn stats(&self) -> ReadStats {
        ReadStats {
            reads: self.reads.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }

    /// Start recording every read request.
    pub fn record_reads(&self, enabled: bool) {
        self.logging.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.log.lock().clear();
        }
    }

    /// Number of recorded reads that started at `address`.
    pub fn reads_at(&self, address: Address) -> usize {
        self.log.lock().iter().filter(|(a, _)| *a == address).count()
    }

    /// Number of recorded reads starting inside `[start, end)`.
    pub fn reads_within(&self, start: Address, end: Address) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|(a, _)| *a >= start && *a < end)
            .count()
    }

    fn copy_out(&self, address: Address, len: usize) -> std::result::Result<Vec<u8>, ReadError> {
        let pages = self.pages.read();
        let mut out = Vec::with_capacity(len);
        let mut addr = address.raw();
        while out.len() < len {
            let page_base = addr & !(PAGE_SIZE - 1);
            let page = pages.get(&page_base).ok_or(ReadError::Unmapped {
                address: address.raw(),
                len,
            })?;
            let in_page = (addr - page_base) as usize;
            let n = (len - out.len()).min(PAGE_SIZE as usize - in_page);
            out.extend_from_slice(&page[in_page..in_page + n]);
            addr += n as u64;
        }
        Ok(out)
    }
}

impl ReadMemory for MemoryImage {
    fn read_bytes(&self, address: Address, len: usize) -> std::result::Result<Vec<u8>, ReadError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.logging.load(Ordering::Relaxed) {
            self.log.lock().push((address, len));
        }
        if self.failing.read().contains(&address.raw()) {
            return Err(ReadError::Backend {
                address: address.raw(),
            });
        }
        self.copy_out(address, len)
    }

    fn read_scatter(&self, entries: &mut [ScatterEntry]) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        for entry in entries.iter_mut() {
            let result = entry
                .address
                .validate()
                .and_then(|addr| self.read_bytes(addr, entry.len));
            entry.result = Some(result);
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageFile {
    regions: Vec<RegionFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionFile {
    base: u64,
    data: String,
}

/// Fluent builder for test and fixture images.
#[derive(Default)]
pub struct MemoryImageBuilder {
    image: MemoryImage,
}

impl MemoryImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bytes(self, address: u64, data: &[u8]) -> Self {
        self.image.write_bytes(Address(address), data);
        self
    }

    pub fn write_value<T: Pod>(self, address: u64, value: T) -> Self {
        self.image.write_value(Address(address), value);
        self
    }

    pub fn write_u64(self, address: u64, value: u64) -> Self {
        self.write_value(address, value)
    }

    pub fn write_i32(self, address: u64, value: i32) -> Self {
        self.write_value(address, value)
    }

    pub fn write_utf8(self, address: u64, text: &str) -> Self {
        self.image.write_utf8(Address(address), text);
        self
    }

    pub fn write_unity_string(self, address: u64, text: &str) -> Self {
        self.image.write_unity_string(Address(address), text);
        self
    }

    pub fn write_pointer_list(self, list: u64, array: u64, items: &[u64]) -> Self {
        let items: Vec<Address> = items.iter().copied().map(Address).collect();
        self.image.write_pointer_list(Address(list), Address(array), &items);
        self
    }

    pub fn build(self) -> MemoryImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ReadMemoryExt;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_and_read_across_pages() {
        let image = MemoryImage::new();
        let data: Vec<u8> = (0..6000u32).map(|i| (i % 251) as u8).collect();
        image.write_bytes(Address(0x10ff0), &data);
        assert_eq!(image.read_bytes(Address(0x10ff0), 6000).unwrap(), data);
    }

    #[test]
    fn test_unmapped_read_fails() {
        let image = MemoryImageBuilder::new().write_u64(0x10000, 1).build();
        assert!(image.read_bytes(Address(0x10ff0), 8).is_ok());
        // straddles into the unmapped page at 0x11000
        assert!(matches!(
            image.read_bytes(Address(0x10ffc), 8),
            Err(ReadError::Unmapped { .. })
        ));
    }

    #[test]
    fn test_unmap_and_fail_injection() {
        let image = MemoryImageBuilder::new().write_u64(0x10000, 5).build();
        image.fail_reads_at(Address(0x10000));
        assert!(matches!(
            image.read_u64(Address(0x10000)),
            Err(ReadError::Backend { .. })
        ));
        image.clear_failures();
        assert_eq!(image.read_u64(Address(0x10000)).unwrap(), 5);

        image.unmap(Address(0x10000), 8);
        assert!(image.read_u64(Address(0x10000)).is_err());
    }

    #[test]
    fn test_read_log() {
        let image = MemoryImageBuilder::new().write_u64(0x10000, 5).build();
        image.record_reads(true);
        let _ = image.read_u64(Address(0x10000));
        let _ = image.read_u64(Address(0x10000));
        assert_eq!(image.reads_at(Address(0x10000)), 2);
        assert_eq!(image.reads_within(Address(0x10000), Address(0x10008)), 2);
        assert_eq!(image.stats().reads, 2);
    }

    #[test]
    fn test_load_from_json() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(
            temp.path(),
            r#"{ "regions": [ { "base": 65536, "data": "2a00000000000000" } ] }"#,
        )
        .unwrap();

        let image = MemoryImage::load(temp.path()).unwrap();
        assert_eq!(image.read_u64(Address(0x10000)).unwrap(), 42);
    }

    #[test]
    fn test_save_coalesces_adjacent_pages() {
        let image = MemoryImage::new();
        let data = vec![0xabu8; 0x1800];
        image.write_bytes(Address(0x20000), &data);
        image.write_u64(Address(0x90000), 7);

        let temp = NamedTempFile::new().unwrap();
        image.save(temp.path()).unwrap();
        let file: ImageFile =
            serde_json::from_str(&std::fs::read_to_string(temp.path()).unwrap()).unwrap();
        assert_eq!(file.regions.len(), 2);

        let loaded = MemoryImage::load(temp.path()).unwrap();
        assert_eq!(loaded.read_bytes(Address(0x20000), 0x1800).unwrap(), data);
        assert_eq!(loaded.read_u64(Address(0x90000)).unwrap(), 7);
    }

    #[test]
    fn test_load_rejects_bad_hex() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(
            temp.path(),
            r#"{ "regions": [ { "base": 65536, "data": "zz" } ] }"#,
        )
        .unwrap();
        assert!(matches!(MemoryImage::load(temp.path()), Err(Error::Config(_))));
    }
}
