pub mod auth;
pub mod billing;
pub mod clients;
pub mod config;
pub mod devices;
pub mod notify;
pub mod shared;
pub mod tenancy;
pub mod tickets;
