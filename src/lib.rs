pub mod audit;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod entry;
pub mod error;
pub mod material;
pub mod movement;
pub mod predicate;
pub mod rules;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;
