//! Upstream provider adapters and their shared contracts

pub mod async_http;
pub mod descriptor;
pub mod poll;
pub mod registry;
pub mod sync_http;
pub mod traits;
pub mod types;

pub use registry::ProviderRegistry;
pub use traits::ProviderAdapter;
