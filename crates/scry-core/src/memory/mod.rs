//! Access to the target's address space.

mod address;
mod image;
pub mod layout;
mod reader;
pub mod scatter;
pub mod unity;

pub use address::{Address, MAX_USER_VA, MIN_USER_VA};
pub use image::{MemoryImage, MemoryImageBuilder, ReadStats};
pub use layout::Layout;
pub use reader::{MAX_STRING_READ, ReadMemory, ReadMemoryExt, ScatterEntry, decode_array, decode_value};
pub use scatter::{RoundResults, ScatterMap, ScatterRound, ScatterStats};
