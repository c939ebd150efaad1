//! Image payload handling - base64, remote fetch, and size-budget
//! normalization

pub mod base64;
pub mod fetch;
pub mod normalize;

pub use fetch::ImageFetcher;
pub use normalize::ImageNormalizer;
