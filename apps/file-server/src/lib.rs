// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

pub mod cli;
pub mod config;
pub mod handlers;
pub mod logging;
pub mod server;
pub mod state;
pub mod static_files;
pub mod telemetry;

pub use config::Config;
pub use state::AppState;
