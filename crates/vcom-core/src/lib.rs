/*!
 * vcom Core
 *
 * This crate provides the ambient plumbing of the vcom virtual serial port
 * driver: configuration, logging, error handling and shared identifiers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use tracing;
    pub use uuid;
}

/// vcom core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("vcom core {} initialized", VERSION);
    Ok(())
}
