//! # Codraw Renderer
//!
//! Raster pipeline for the co-drawing engine.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Scene region │ -> │ SVG compose  │ -> │ resvg raster │ -> JPEG / PNG
//! └──────────────┘    └──────────────┘    └──────────────┘
//!
//! base64 / data URI -> decode -> strip white background -> PNG data URI
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod imaging;
pub mod snapshot;

pub use error::{RenderError, RenderResult};
pub use imaging::{
    decode_image, decode_image_source, encode_png, strip_background, to_data_uri, DecodedImage,
    ImageFormat, DEFAULT_BACKGROUND_THRESHOLD,
};
pub use snapshot::{
    RasterFormat, RasterImage, Rasterizer, SnapshotRegion, SnapshotRequest, SvgRasterizer,
};
