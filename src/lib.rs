pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod index;
pub mod matcher;
pub mod models;
pub mod patterns;
pub mod service;
pub mod sync;
pub mod util;
