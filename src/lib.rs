// A SIP/ISUP signaling stack in Rust
pub type Result<T> = std::result::Result<T, crate::error::Error>;
pub use crate::error::Error;
pub mod auth;
pub mod dialog;
pub mod error;
pub mod isup;
pub mod message;
pub mod party;
pub mod sdp;
pub mod transaction;
pub use transaction::engine::{SipEngine, SipEngineBuilder};
