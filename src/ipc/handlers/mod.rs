pub mod catalog;
pub mod core;
pub mod counters;
pub mod reports;
pub mod screens;
pub mod setup;
