pub mod config;
pub mod error;
pub mod keys;
pub mod messages;
pub mod ownership;
pub mod types;

pub use config::Config;
pub use error::OwnerGraphError;
pub use keys::SortKey;
pub use messages::*;
pub use ownership::*;
pub use types::*;
