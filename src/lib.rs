pub mod app;
pub mod bundle;
pub mod config;
pub mod domain;
pub mod error;
pub mod gdc;
pub mod index;
pub mod output;
pub mod record;
pub mod report;
