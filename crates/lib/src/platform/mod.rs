//! Host directory layout.

pub mod paths;
