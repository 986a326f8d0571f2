pub mod audit;
pub mod auth;
pub mod calendar;
pub mod config;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod rules;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
