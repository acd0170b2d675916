//! Source resolution: which upstream artifact to publish

pub mod policy;
pub mod source;

pub use policy::{DEFAULT_STALENESS_DAYS, ResolutionPolicy};
pub use source::{
    ResolvedSource, SourceKind, tag_matches_version, version_from_file_name, version_from_tag,
    versions_equal,
};
