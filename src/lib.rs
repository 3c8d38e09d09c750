//! Generate a small Parquet table and load it into BigQuery, as a two-task DAG.

pub mod artifact;
pub mod config;
pub mod dag;
pub mod pipeline;
pub mod steps;
pub mod warehouse;
