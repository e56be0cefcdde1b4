// SPDX-License-Identifier: GPL-3.0-only

pub(crate) mod kwinft;
pub(crate) mod wlr;
