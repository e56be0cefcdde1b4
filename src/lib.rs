// SPDX-License-Identifier: GPL-3.0-only

//! Output configuration negotiation for Wayland compositors.
//!
//! Implements the server side of `zwlr_output_manager_v1` and the legacy
//! `zkwinft_output_management_v1` on top of smithay's wayland frontend, plus a
//! store for remembered output configurations.

pub mod config;
pub mod logger;
pub mod output;
pub mod utils;
pub mod wayland;
