//! Image pipeline components.
//!
//! - **validate**: Cheap checks on uploaded bytes
//! - **decode**: Load and decode images with limits and timeout
//! - **metadata**: Describe encoded images for document sidecars
//! - **ops**: Raster primitives, one per transform step
//! - **backend**: The backend seam and the raster implementation
//! - **executor**: Runs a transform plan end to end

pub mod backend;
pub mod decode;
pub mod executor;
pub mod metadata;
pub mod ops;
pub mod validate;

pub use backend::{Encoded, ImageBackend, RasterBackend, RasterCanvas};
pub use decode::{DecodedImage, ImageDecoder};
pub use executor::{DerivedImage, PipelineExecutor};
pub use metadata::MetadataExtractor;
pub use validate::Validator;
