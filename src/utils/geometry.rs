// SPDX-License-Identifier: GPL-3.0-only

use smithay::utils::{Logical, Physical, Size, Transform};

pub trait ModeSizeExt {
    /// Size an output with this mode covers in the global space.
    fn to_output_size(self, transform: Transform, scale: f64) -> Size<f64, Logical>;
}

impl ModeSizeExt for Size<i32, Physical> {
    fn to_output_size(self, transform: Transform, scale: f64) -> Size<f64, Logical> {
        transform.transform_size(self).to_f64().to_logical(scale)
    }
}
