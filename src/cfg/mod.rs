//! Configuration loading, command-line parsing, and logging setup.

// SPDX-License-Identifier: GPL-3.0-or-later

/// Command-line interface parsing.
pub mod cli;
/// Configuration file parsing and management.
pub mod config;
/// Logger initialization.
pub mod logger;
