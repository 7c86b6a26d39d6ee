//! Support code for the `datacure-watch` binary.

pub mod report;
