//! Connection descriptions and session tuning.

mod connection;
mod session;

pub use connection::ConnectionDescription;
pub use session::SessionConfig;
