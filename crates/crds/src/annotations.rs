//! Service annotation keys owned by the service controller.
//!
//! The three keys below are the only persisted state the controller keeps on a
//! Service. Everything else is re-derived from the cluster on each sync.

/// Pool to allocate the public address from
pub const ANN_KEY_EXTERNAL_POOL: &str = "inwinstack.com/external-pool";

/// Public address confirmed by the allocator
pub const ANN_KEY_PUBLIC_IP: &str = "inwinstack.com/allocated-public-ip";

/// Opaque marker rewritten while the public address is still pending
pub const ANN_KEY_SERVICE_REFRESH: &str = "inwinstack.com/service-refresh";

/// Pool used when a Service does not name one
pub const DEFAULT_INTERNET_POOL: &str = "internet";

/// All annotation keys the controller writes back to a Service
pub const OWNED_ANNOTATION_KEYS: [&str; 3] = [
    ANN_KEY_EXTERNAL_POOL,
    ANN_KEY_PUBLIC_IP,
    ANN_KEY_SERVICE_REFRESH,
];
