pub mod config;
pub mod db;
pub mod error;
pub mod messaging;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
