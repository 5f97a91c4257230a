pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod grid;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod sweeper;
