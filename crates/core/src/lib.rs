pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod model;
pub mod wire;

pub use error::{EventBusError, MurmurError, Result};
pub use ids::{normalize, IdRef};
