use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ReadError;

/// Lowest address considered user-space.
pub const MIN_USER_VA: u64 = 0x1_0000;
/// Highest canonical user-space address on x86-64.
pub const MAX_USER_VA: u64 = 0x7FFF_FFFF_FFFF;

/// A virtual address in the target process.
///
/// Handles are plain values: when a cached address goes stale it is replaced
/// by a new handle, never patched in place.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub u64);

impl Address {
    pub const NULL: Address = Address(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Address(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Non-null and inside the user-space range.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 >= MIN_USER_VA && self.0 <= MAX_USER_VA
    }

    /// Returns the handle if valid, otherwise `ReadError::InvalidAddress`.
    #[inline]
    pub fn validate(self) -> Result<Self, ReadError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(ReadError::InvalidAddress(self.0))
        }
    }

    /// Field address `self + offset`, wrapping on overflow.
    ///
    /// An overflowed field address lands outside user space and fails the
    /// validity check on the next read.
    #[inline]
    pub const fn offset(self, offset: u64) -> Self {
        Address(self.0.wrapping_add(offset))
    }
}

impl From<u64> for Address {
    fn from(raw: u64) -> Self {
        Address(raw)
    }
}

impl From<Address> for u64 {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}
