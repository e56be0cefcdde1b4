// SPDX-License-Identifier: GPL-3.0-only

use smithay::utils::{Logical, Point, Rectangle, Size};

use crate::output::Output;

pub use super::geometry::ModeSizeExt;

pub trait OutputExt {
    /// Published geometry, with the size derived from mode, transform and scale.
    fn geometry(&self) -> Rectangle<i32, Logical>;
    fn is_enabled(&self) -> bool;
}

impl OutputExt for Output {
    fn geometry(&self) -> Rectangle<i32, Logical> {
        let state = self.published_state();
        Rectangle {
            loc: Point::from((
                state.geometry.loc.x.round() as i32,
                state.geometry.loc.y.round() as i32,
            )),
            size: self
                .current_mode()
                .map(|mode| {
                    mode.size
                        .to_output_size(state.transform, state.client_scale)
                        .to_i32_round()
                })
                .unwrap_or_else(|| Size::from((0, 0))),
        }
    }

    fn is_enabled(&self) -> bool {
        self.published_state().enabled
    }
}
