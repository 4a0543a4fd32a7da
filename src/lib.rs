// KlipperFleet - fleet firmware lifecycle manager
// Task engine, batch orchestration and HTTP surface over the bus layer

pub mod builder;
pub mod config;
pub mod fleet;
pub mod jobs;
pub mod profiles;
pub mod server;
pub mod services;
pub mod state;
pub mod tasks;

pub use config::AppPaths;
pub use fleet::{Device, FleetStore};
pub use state::AppState;
pub use tasks::{TaskStatus, TaskStore};
