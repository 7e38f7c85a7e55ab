pub mod api;
pub mod config;
pub mod governor;
pub mod guard;
pub mod hub;
pub mod logging;
pub mod policy;
pub mod scheduler;
pub mod store;
