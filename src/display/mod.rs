//! Terminal output for the `semindex` CLI.
//!
//! Styled tables for query results, cache status and rebuild or append
//! outcomes.

pub mod tables;
pub mod theme;

pub use tables::{
    TableBuilder, create_append_table, create_matches_table, create_rebuild_table,
    create_status_table,
};
pub use theme::{THEME, Theme};
