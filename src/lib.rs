pub mod config;
pub mod db;
pub mod graph;
pub mod ingest;
pub mod output;
pub mod sanitizer;
