pub mod config;
pub mod webhooks;

pub use self::config::*;
pub use self::webhooks::*;
