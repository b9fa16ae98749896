pub mod compositor;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod layout;
pub mod models;
pub mod registry;
pub mod routes;
pub mod worker;
