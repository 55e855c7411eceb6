//! Secret types for credentials that must never reach logs.
//!
//! Re-exports [`secrecy`]'s wrappers. Client secrets, bearer tokens and
//! signing key material travel as [`SecretString`] / [`SecretBox`] so that any
//! struct deriving `Debug` around them prints `[REDACTED]` instead of the value.
//! Access is explicit via [`ExposeSecret::expose_secret`].
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ClientCredentials {
//!     client_id: String,
//!     client_secret: SecretString,
//! }
//!
//! let creds = ClientCredentials {
//!     client_id: "aggregator".to_string(),
//!     client_secret: SecretString::from("s3cr3t"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("s3cr3t"));
//! assert_eq!(creds.client_secret.expose_secret(), "s3cr3t");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
