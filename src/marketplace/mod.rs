//! Marketplace adapters: version lookups and the secondary registry CLI

pub mod gallery;
pub mod ovsx;

pub use gallery::{GalleryOracle, PRIMARY_GALLERY_URL, SECONDARY_GALLERY_URL};
pub use ovsx::OvsxCli;
