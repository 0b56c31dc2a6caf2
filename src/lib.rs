//! Path-scoped HTTP response compression for Tower.
//!
//! Compressing a response that mixes secrets with attacker-influenced content
//! leaks those secrets through the compressed size (the BREACH attack). This
//! crate only compresses responses whose request path is on an allow-list:
//! a short one for `POST` requests and a broader one for everything else.
//!
//! # Example
//!
//! ```ignore
//! use scoped_response_compression::CompressionLayer;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::from_env()?)
//!     .service(my_service);
//! ```
//!
//! # Configuration
//!
//! Both lists are comma-separated regular expressions, matched against the
//! request path without its query string. An unset or empty variable selects
//! the built-in list; a pattern that fails to compile is an error at startup.
//!
//! - `GZIP_POST_RESPONSE_ALLOW_LIST` applies to `POST` requests.
//! - `GZIP_RESPONSE_ALLOW_LIST` applies to every other method.
//!
//! # Compression Rules
//!
//! An allowed response is still **not** compressed when:
//! - No supported `Accept-Encoding` is present in the request
//! - `Content-Encoding` header is already set
//! - `Content-Range` header is present (range responses)
//! - `Content-Type` starts with `image/` (except `image/svg+xml`)
//! - `Content-Type` starts with `application/grpc` (except `application/grpc-web`)
//! - `Content-Length` is below the minimum size threshold (default: 860 bytes)
//!
//! The encoder is flushed after each chunk when `X-Accel-Buffering: no` is
//! set or the `Content-Type` is `text/event-stream` or `application/grpc-web`.
//!
//! When compression is applied, `Content-Encoding` is set, `Content-Length`
//! and `Accept-Ranges` are removed, and `Vary` gains `accept-encoding`.

#![deny(missing_docs)]

mod body;
mod codec;
mod error;
mod future;
mod layer;
pub mod policy;
mod service;

pub use body::CompressionBody;
pub use codec::Encoding;
pub use error::ConfigError;
pub use future::ResponseFuture;
pub use layer::{CompressionLayer, DEFAULT_MIN_SIZE};
pub use policy::{AllowList, CompressionPolicy};
pub use service::CompressionService;
