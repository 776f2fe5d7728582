//! The `missive` command-line client.
//!
//! Configuration lives in a RON file (see [`config`]); the command line
//! composes the message and picks what to do with it (see [`cli`]).

pub mod cli;
pub mod config;
