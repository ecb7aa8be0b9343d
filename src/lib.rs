//! PixPerfect: a raster image editor built around a two-surface compositor
//! (main + live preview), snapshot-based edit history and a remote image
//! store. The `pixperfect` binary wraps this library in an egui editor and a
//! headless batch CLI.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

pub mod app;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod compositor;
pub mod config;
pub mod edit_state;
pub mod error;
pub mod io;
pub mod loader;
pub mod logger;
pub mod ops;
pub mod project;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod worker;
