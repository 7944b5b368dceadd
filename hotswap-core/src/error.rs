use thiserror::Error;

/// Stable errors raised by hotswap itself. Everything the underlying driver
/// reports is passed through verbatim as [`crate::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HotswapError {
    /// The connection-string scheme does not name a registered strategy.
    #[error("unsupported hotswap strategy")]
    UnsupportedStrategy,

    /// The connection-string host does not name a registered driver.
    #[error("target driver is not registered with hotswap")]
    UnknownDriver,

    #[error("malformed hotswap connection string")]
    MalformedConnectionString,

    /// The connection belongs to a revoked generation. The pooling layer is
    /// expected to discard the connection and open a fresh one.
    #[error("connection revoked by a dsn change")]
    BadConn,

    /// The caller's own scope was canceled before the operation completed.
    #[error("operation canceled by the caller")]
    Canceled,

    /// The underlying driver lacks the optional capability this call needs.
    /// Non-fatal; callers may fall back to a simpler call shape.
    #[error("operation not supported by the underlying driver")]
    Unsupported,

    #[error("underlying driver does not support non-default isolation levels")]
    NonDefaultIsolation,

    #[error("underlying driver does not support read-only transactions")]
    ReadOnly,
}
