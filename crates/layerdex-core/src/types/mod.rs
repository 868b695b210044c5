pub mod image;
pub mod layer;
pub mod toc;

pub use image::{ImageContext, ImageFilter};
pub use layer::{EntryType, FileEntry, FileId, Layer, LayerId};
pub use toc::{Toc, TocFile};
