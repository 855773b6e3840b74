//! Image-side stages of fixed-pattern deflectometry.
//!
//! - [`blobs`]: sub-pixel dot centres from a captured frame,
//! - [`blob_index`]: integer grid indices grown outward from seed dots,
//! - [`mask`]: optic/background segmentation from a dark/light pair,
//! - [`perimeter`]: mask boundary extraction and polygon corner refinement,
//! - [`synthetic`]: small rasterizers used to build test captures.

pub mod blob_index;
pub mod blobs;
pub mod labeling;
pub mod mask;
pub mod perimeter;
mod point_grid;
pub mod synthetic;

pub use blob_index::{BlobIndex, BlobIndexConfig, BlobIndexError, IndexExtent};
pub use blobs::{detect_blobs, BlobDetectorConfig};
pub use mask::{calc_mask_raw, keep_largest_mask_area, Mask, MaskConfig, MaskError};
pub use perimeter::{PerimeterError, PerimeterRefineConfig};
