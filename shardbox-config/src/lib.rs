// Submodules
pub mod core;
pub mod error;
pub mod general;
pub mod limits;
pub mod memory;
pub mod storage;
pub mod users;

pub use self::core::{Config, ConfigAndUsers};
pub use error::Error;
pub use general::General;
pub use limits::{IpFilter, RateLimit};
pub use memory::Memory;
pub use storage::Storage;
pub use users::{User, Users};
