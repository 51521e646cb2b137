pub mod cache;
pub mod config;
pub mod error;
pub mod pdf;
pub mod pipeline;
pub mod quality;
pub mod render;
pub mod rules;
pub mod structure;
