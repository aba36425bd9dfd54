mod disk;
mod discover;
pub mod error;
mod key;

pub use crate::discover::{discover, discover_stream, is_hidden};
pub use crate::disk::{DISK_JPEG_QUALITY, DiskCache, THUMBNAIL_DIRECTORY};
pub use crate::key::ThumbnailKey;
