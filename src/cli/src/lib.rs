//! A3S Stargz CLI - rewrite container images for lazy pulling.

pub mod commands;
