//! MBX Gateway: rate-aware signing core for Binance-style REST APIs
//!
//! This crate is the transport-facing core a trading application builds
//! endpoint wrappers on top of:
//!
//! - **Quota accounting** - multi-window request counters reconciled against
//!   the exchange's `x-mbx-*` response headers, with admission tests and
//!   optional bounded waiting
//! - **Request signing** - canonical query strings, HMAC-SHA256 signatures,
//!   server-clock-corrected timestamps, API-key headers
//! - **Credential vault** - a keyed file in the home directory with
//!   sensitive values encrypted for this host, plus interactive prompting
//! - **Request facade** - parameter cleaning, signed GET/POST dispatch over
//!   an injectable transport, header feedback to the accountant
//!
//! ## Usage
//!
//! ```ignore
//! let config = GatewayConfig::load()?;
//! let gateway = Gateway::from_config(&config).await?;
//!
//! if gateway.accountant().can_make(10, false) {
//!     let trades = gateway
//!         .get("/api/v3/myTrades", vec![("symbol".into(), Some("BTCUSDT".into()))], true)
//!         .await?;
//! }
//! ```
//!
//! Admission is the caller's job (so batching code can plan across calls);
//! the facade takes care of everything else per request.

pub mod buckets;
pub mod cipher;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod limits;
pub mod metrics;
pub mod redact;
pub mod request;
pub mod signer;

// Re-export commonly used items at the crate root
pub use cipher::AesCipher;
pub use clock::ServerClock;
pub use config::GatewayConfig;
pub use credentials::{is_sensitive_name, CredentialFile, CredentialVault};
pub use error::GatewayError;
pub use limits::{QuotaAccountant, RateLimits, Window};
pub use redact::{Redacted, Secret};
pub use request::{
    Gateway, HttpTransport, Method, ParamValue, Params, Transport, TransportResponse,
};
pub use signer::{canonical_query, RequestSigner};
