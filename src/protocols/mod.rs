//! Parsers for the document formats volstat consumes.

pub mod nvstats;
