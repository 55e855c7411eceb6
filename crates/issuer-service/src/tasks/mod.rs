//! Background tasks for the token issuer.
//!
//! - `key_rotation` - age-based signing key rotation and pruning

pub mod key_rotation;

pub use key_rotation::start_key_rotation_task;
