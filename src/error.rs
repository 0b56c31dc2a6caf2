use thiserror::Error;

/// Errors raised while loading a compression policy.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A pattern in an allow-list failed to compile.
    #[error("invalid pattern {pattern:?} in {variable}: {source}")]
    InvalidPattern {
        /// Name of the setting the pattern came from.
        variable: String,
        /// The pattern as written.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// An environment variable was set but is not valid Unicode.
    #[error("{variable} is not valid unicode")]
    NotUnicode {
        /// Name of the variable.
        variable: String,
    },
}
