pub mod app;
pub mod config;
pub mod error;
pub mod models;
pub mod omdb;
pub mod search;
pub mod store;
pub mod watched;
