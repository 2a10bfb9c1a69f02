//! Structural reading and writing of TIFF containers.
//!
//! This module treats a TIFF file as a tree of IFDs and tag entries rather
//! than an image: every entry payload is decoded and can be rewritten, while
//! strip and tile contents are copied through untouched. Classic and BigTIFF
//! flavors in either byte order are preserved on write.

pub mod ifd;
pub mod read;
pub mod stream;
pub mod util;
pub mod write;

pub use self::ifd::{Entry, Ifd, TiffInfo, Value};
pub use self::read::read_tiff;
pub use self::stream::ByteOrder;
pub use self::write::write_tiff;
