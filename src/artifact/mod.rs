//! The local Parquet artifact handed from the producer to the loader.

pub mod file;
pub mod rows;

pub use file::{
    decode_parquet_bytes, describe_parquet, read_parquet, write_parquet, ParquetSummary,
};
pub use rows::{Row, RowSet};
