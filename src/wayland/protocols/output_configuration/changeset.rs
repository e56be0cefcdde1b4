// SPDX-License-Identifier: GPL-3.0-only

use cosmic_output_management_config::output::comp::AdaptiveSync;
use smithay::{
    reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_configuration_head_v1,
    utils::{Logical, Physical, Point, Rectangle, Size, Transform},
};

use crate::{
    output::{Mode, Output, OutputState, WeakOutput},
    utils::prelude::ModeSizeExt,
};

bitflags::bitflags! {
    /// Properties a client explicitly asked to change.
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub struct ChangesetFields: u32 {
        const ENABLED = 1;
        const MODE = 2;
        const TRANSFORM = 4;
        const GEOMETRY = 8;
        const SCALE = 16;
        const ADAPTIVE_SYNC = 32;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeConfiguration {
    Mode(Mode),
    Custom {
        size: Size<i32, Physical>,
        refresh: Option<i32>,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChangesetError {
    #[error("{0} was already set")]
    AlreadySet(&'static str),
    #[error("mode {0} does not belong to this output")]
    UnknownMode(i32),
    #[error("invalid custom mode {width}x{height}@{refresh}")]
    InvalidCustomMode {
        width: i32,
        height: i32,
        refresh: i32,
    },
    #[error("invalid scale {0}")]
    InvalidScale(f64),
    #[error("invalid transform {0}")]
    InvalidTransform(u32),
    #[error("invalid adaptive sync state {0}")]
    InvalidAdaptiveSync(u32),
}

impl ChangesetError {
    pub fn code(&self) -> zwlr_output_configuration_head_v1::Error {
        use zwlr_output_configuration_head_v1::Error;
        match self {
            ChangesetError::AlreadySet(_) => Error::AlreadySet,
            ChangesetError::UnknownMode(_) => Error::InvalidMode,
            ChangesetError::InvalidCustomMode { .. } => Error::InvalidCustomMode,
            ChangesetError::InvalidScale(_) => Error::InvalidScale,
            ChangesetError::InvalidTransform(_) => Error::InvalidTransform,
            ChangesetError::InvalidAdaptiveSync(_) => Error::InvalidAdaptiveSyncState,
        }
    }
}

/// Changes requested for one output within one configuration.
///
/// Starts out as a copy of the output's state at the time it was first
/// touched. The `*_changed` queries compare the requested values against the
/// output's state at the time of the call, so they follow any changes the
/// compositor makes to the output in the meantime.
#[derive(Debug, Clone)]
pub struct OutputChangeset {
    output: WeakOutput,
    state: OutputState,
    custom_mode: Option<(Size<i32, Physical>, Option<i32>)>,
    fields: ChangesetFields,
    single_assignment: bool,
}

impl OutputChangeset {
    pub(super) fn new(output: &WeakOutput, single_assignment: bool) -> OutputChangeset {
        OutputChangeset {
            state: output
                .upgrade()
                .map(|output| output.get_state())
                .unwrap_or_default(),
            output: output.clone(),
            custom_mode: None,
            fields: ChangesetFields::empty(),
            single_assignment,
        }
    }

    /// `None` once the output is dropped.
    pub fn output(&self) -> Option<Output> {
        self.output.upgrade()
    }

    pub(super) fn weak_output(&self) -> &WeakOutput {
        &self.output
    }

    /// Properties set by the client, whether or not they differ from the
    /// output's state.
    pub fn fields(&self) -> ChangesetFields {
        self.fields
    }

    /// The full requested state, ready for [`Output::set_state`].
    pub fn state(&self) -> &OutputState {
        &self.state
    }

    pub fn enabled(&self) -> bool {
        self.state.enabled
    }

    pub fn mode(&self) -> Option<i32> {
        self.state.mode
    }

    pub fn mode_configuration(&self) -> Option<ModeConfiguration> {
        if let Some((size, refresh)) = self.custom_mode {
            return Some(ModeConfiguration::Custom { size, refresh });
        }
        let output = self.output.upgrade()?;
        self.state
            .mode
            .and_then(|id| output.mode(id))
            .map(ModeConfiguration::Mode)
    }

    pub fn transform(&self) -> Transform {
        self.state.transform
    }

    pub fn geometry(&self) -> Rectangle<f64, Logical> {
        self.state.geometry
    }

    pub fn scale(&self) -> f64 {
        self.state.client_scale
    }

    pub fn adaptive_sync(&self) -> AdaptiveSync {
        self.state.adaptive_sync
    }

    fn live_state(&self) -> Option<OutputState> {
        self.output.upgrade().map(|output| output.get_state())
    }

    pub fn enabled_changed(&self) -> bool {
        self.live_state()
            .is_some_and(|live| live.enabled != self.state.enabled)
    }

    pub fn mode_changed(&self) -> bool {
        self.live_state()
            .is_some_and(|live| self.custom_mode.is_some() || live.mode != self.state.mode)
    }

    pub fn transform_changed(&self) -> bool {
        self.live_state()
            .is_some_and(|live| live.transform != self.state.transform)
    }

    pub fn geometry_changed(&self) -> bool {
        self.live_state()
            .is_some_and(|live| live.geometry != self.state.geometry)
    }

    pub fn scale_changed(&self) -> bool {
        self.live_state()
            .is_some_and(|live| live.client_scale != self.state.client_scale)
    }

    pub fn adaptive_sync_changed(&self) -> bool {
        self.live_state()
            .is_some_and(|live| live.adaptive_sync != self.state.adaptive_sync)
    }

    pub fn has_changes(&self) -> bool {
        self.enabled_changed()
            || self.mode_changed()
            || self.transform_changed()
            || self.geometry_changed()
            || self.scale_changed()
            || self.adaptive_sync_changed()
    }

    fn mark(&mut self, field: ChangesetFields, name: &'static str) -> Result<(), ChangesetError> {
        if self.single_assignment && self.fields.contains(field) {
            return Err(ChangesetError::AlreadySet(name));
        }
        self.fields |= field;
        Ok(())
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.fields |= ChangesetFields::ENABLED;
        self.state.enabled = enabled;
    }

    pub(crate) fn set_mode(&mut self, id: i32) -> Result<(), ChangesetError> {
        let known = self
            .output
            .upgrade()
            .is_some_and(|output| output.mode(id).is_some());
        if !known {
            return Err(ChangesetError::UnknownMode(id));
        }
        self.mark(ChangesetFields::MODE, "mode")?;
        self.state.mode = Some(id);
        self.custom_mode = None;
        Ok(())
    }

    /// `refresh` of zero leaves the refresh rate to the compositor.
    pub(crate) fn set_custom_mode(
        &mut self,
        width: i32,
        height: i32,
        refresh: i32,
    ) -> Result<(), ChangesetError> {
        if width <= 0 || height <= 0 || refresh < 0 {
            return Err(ChangesetError::InvalidCustomMode {
                width,
                height,
                refresh,
            });
        }
        self.mark(ChangesetFields::MODE, "mode")?;
        self.custom_mode = Some((Size::from((width, height)), (refresh != 0).then_some(refresh)));
        Ok(())
    }

    pub(crate) fn set_transform(&mut self, transform: Transform) -> Result<(), ChangesetError> {
        self.mark(ChangesetFields::TRANSFORM, "transform")?;
        self.state.transform = transform;
        Ok(())
    }

    pub(crate) fn set_position(&mut self, position: Point<i32, Logical>) -> Result<(), ChangesetError> {
        self.mark(ChangesetFields::GEOMETRY, "position")?;
        self.state.geometry.loc = position.to_f64();
        Ok(())
    }

    pub(crate) fn set_geometry(&mut self, geometry: Rectangle<f64, Logical>) -> Result<(), ChangesetError> {
        self.mark(ChangesetFields::GEOMETRY, "geometry")?;
        self.state.geometry = geometry;
        Ok(())
    }

    pub(crate) fn set_scale(&mut self, scale: f64) -> Result<(), ChangesetError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ChangesetError::InvalidScale(scale));
        }
        self.mark(ChangesetFields::SCALE, "scale")?;
        self.state.client_scale = scale;
        Ok(())
    }

    pub(crate) fn set_adaptive_sync(&mut self, adaptive_sync: AdaptiveSync) -> Result<(), ChangesetError> {
        self.mark(ChangesetFields::ADAPTIVE_SYNC, "adaptive sync")?;
        self.state.adaptive_sync = adaptive_sync;
        Ok(())
    }

    /// Derives the logical size from mode, transform and scale, for protocols
    /// that only carry a position.
    pub(crate) fn update_logical_size(&mut self) {
        let mode_size = match self.mode_configuration() {
            Some(ModeConfiguration::Mode(mode)) => mode.size,
            Some(ModeConfiguration::Custom { size, .. }) => size,
            None => return,
        };
        self.state.geometry.size =
            mode_size.to_output_size(self.state.transform, self.state.client_scale);
    }
}
