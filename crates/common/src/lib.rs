pub mod error;
pub mod manifest;
pub mod naming;
pub mod record;
pub mod snapshot;

pub use error::{Error, Result};
pub use manifest::{PackerBuild, PackerManifest};
pub use naming::ImageName;
pub use record::{ImageRecord, ImageState, REQUIRED_TAGS};
pub use snapshot::LastBuildSnapshot;
