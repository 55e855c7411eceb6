pub mod jwks_refresh;

pub use jwks_refresh::start_jwks_refresh_task;
