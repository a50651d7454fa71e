pub mod address;
pub mod attribute;
pub mod item;
pub mod logging;
pub mod state;

pub use address::{Address, AddressError};
pub use attribute::AttributeValue;
pub use item::{MailId, MailItem, Priority};
pub use state::State;

pub use tracing;

/// Shutdown fan-out value carried over `tokio::sync::broadcast`.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
}
