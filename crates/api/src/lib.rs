pub mod app;
pub mod broker;
pub mod bus;
pub mod config;
pub mod error;
pub mod middleware;
pub mod pipeline;
pub mod routes;
pub mod viewer;
