//! cloud-maker - self-extracting provisioner builder
//!
//! This crate turns a directory of provisioning files plus an ini config
//! into a single POSIX shell installer that carries its own payload.

// Enforce strict code quality and reliability
#![deny(
    // Safety
    unsafe_code,

    // Correctness
    missing_debug_implementations,

    // Future compatibility
    future_incompatible,

    // Rust 2018 idioms
    rust_2018_idioms,
)]
#![warn(
    unreachable_pub,

    // Error handling best practices
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,

    // Performance
    clippy::inefficient_to_string,
    clippy::large_enum_variant,

    // Code clarity and maintainability
    clippy::cognitive_complexity,
    clippy::type_complexity,

    // Best practices
    clippy::clone_on_ref_ptr,
    clippy::wildcard_imports,
    clippy::enum_glob_use,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::explicit_iter_loop,
    clippy::explicit_into_iter_loop,
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod api;
pub mod config;
pub mod exceptions;
pub mod exit_codes;
pub mod logger;
pub mod provisioner;
pub mod utils;
pub mod version;

// Re-export main API functions
pub use api::{BuildOptions, build_provisioner, inspect_provisioner};
pub use exceptions::{CloudMakerError, Result};
pub use provisioner::{AssemblyReport, InstallerInfo, PermissionMode, TimestampPolicy};
