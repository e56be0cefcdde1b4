// SPDX-License-Identifier: GPL-3.0-only

pub mod kwinft_output_management;
pub mod output_configuration;
