pub mod balance;
pub mod db;
pub mod engine;
pub mod server;
pub mod service;
pub mod store;
pub mod tokio_tools;
