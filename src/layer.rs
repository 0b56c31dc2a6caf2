use crate::error::ConfigError;
use crate::policy::CompressionPolicy;
use crate::service::CompressionService;
use std::sync::Arc;
use tower::Layer;

/// Default minimum body size for compression (approximately 1 MTU).
pub const DEFAULT_MIN_SIZE: usize = 860;

/// A Tower layer that compresses response bodies for allow-listed paths.
///
/// The policy is shared between every service the layer produces.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    policy: Arc<CompressionPolicy>,
    min_size: usize,
}

impl CompressionLayer {
    /// Creates a layer enforcing `policy`, with the default minimum size of
    /// 860 bytes.
    pub fn new(policy: CompressionPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            min_size: DEFAULT_MIN_SIZE,
        }
    }

    /// Creates a layer whose policy is read from `GZIP_POST_RESPONSE_ALLOW_LIST`
    /// and `GZIP_RESPONSE_ALLOW_LIST`.
    ///
    /// Fails if either variable holds a pattern that does not compile.
    pub fn from_env() -> Result<Self, ConfigError> {
        CompressionPolicy::from_env().map(Self::new)
    }

    /// Sets the minimum body size required for compression.
    ///
    /// Responses with a known Content-Length smaller than this value
    /// will not be compressed.
    pub fn min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Returns the policy applied by this layer.
    pub fn policy(&self) -> &CompressionPolicy {
        &self.policy
    }
}

impl From<CompressionPolicy> for CompressionLayer {
    fn from(policy: CompressionPolicy) -> Self {
        Self::new(policy)
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, Arc::clone(&self.policy), self.min_size)
    }
}
