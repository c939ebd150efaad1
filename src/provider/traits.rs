//! The provider adapter contract

use async_trait::async_trait;

use crate::error::Result;
use crate::provider::descriptor::ProviderDescriptor;
use crate::provider::types::{CallOptions, ProviderRequest, ProviderResponse};

/// One upstream image-generation service behind a uniform interface.
///
/// Adapters are plain values assembled into a [`ProviderRegistry`] at
/// startup; all shared behavior lives in free helper functions rather than
/// a base type.
///
/// [`ProviderRegistry`]: crate::provider::registry::ProviderRegistry
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name, matching its descriptor
    fn name(&self) -> &str;

    /// Static capability data
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Pure predicate over a caller-supplied credential string
    fn detect_credential(&self, key: &str) -> bool;

    /// Worst-case wall-clock budget for one `generate` call, covering the
    /// whole submit+poll cycle for asynchronous providers
    fn call_budget(&self) -> std::time::Duration;

    /// Run one generation against the upstream.
    ///
    /// Synchronous providers answer in one round trip; asynchronous ones
    /// submit a task and drive the poll loop internally. Either way the
    /// call observes `opts.timeout`.
    async fn generate(
        &self,
        credential: &str,
        request: &ProviderRequest,
        opts: &CallOptions,
    ) -> Result<ProviderResponse>;
}
