//! Model packaging and publishing

pub mod archive;
pub mod image;
pub mod pipeline;
pub mod registry;

pub use pipeline::{PackagedModel, PackagingOptions, PackagingPipeline};
pub use registry::{ModelRegistry, VertexRegistry};
