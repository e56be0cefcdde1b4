// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use serde::Serialize;
use smithay::utils::{Point, Rectangle, Size, Transform};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::{
    output::{Mode, Output},
    utils::prelude::*,
};
pub use cosmic_output_management_config::output::comp::{
    load_outputs, AdaptiveSync, OutputConfig, OutputInfo, OutputsConfig, TransformDef,
};

/// Remembers the configuration of every set of outputs seen so far.
#[derive(Debug)]
pub struct OutputConfigStore {
    path: Option<PathBuf>,
    outputs: OutputsConfig,
}

impl OutputConfigStore {
    /// Loads the store from `path`. A corrupt file is removed and the store
    /// starts out empty. Without a path nothing is persisted.
    pub fn load(path: Option<PathBuf>) -> OutputConfigStore {
        let outputs = load_outputs(path.as_ref());
        debug!(
            path = ?path,
            sets = outputs.config.len(),
            "Loaded output configurations"
        );
        OutputConfigStore { path, outputs }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn outputs(&self) -> &OutputsConfig {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> PersistenceGuard<'_, OutputsConfig> {
        PersistenceGuard(self.path.clone(), &mut self.outputs)
    }

    /// The remembered configuration for exactly this set of outputs, paired
    /// with the outputs in the order they were given.
    pub fn read_outputs(&self, outputs: &[Output]) -> Option<Vec<(Output, OutputConfig)>> {
        let mut infos = outputs
            .iter()
            .map(|output| (OutputInfo::from(output), output))
            .collect::<Vec<_>>();
        infos.sort_by(|(a, _), (b, _)| a.cmp(b));
        let key = infos.iter().map(|(info, _)| info.clone()).collect::<Vec<_>>();

        let configs = self.outputs.config.get(&key)?;
        if configs.len() != infos.len() {
            warn!(?key, "Stored output configuration doesn't match its outputs, ignoring.");
            return None;
        }

        let mut paired = infos
            .into_iter()
            .zip(configs.iter().cloned())
            .map(|((_, output), config)| (output.clone(), config))
            .collect::<Vec<_>>();
        paired.sort_by_key(|(output, _)| outputs.iter().position(|o| o == output));
        Some(paired)
    }

    /// Records the published state of `outputs` as the configuration for
    /// this set of outputs.
    pub fn write_outputs(&mut self, outputs: &[Output]) {
        let mut infos = outputs
            .iter()
            .map(|output| (OutputInfo::from(output), output_config(output)))
            .collect::<Vec<(OutputInfo, OutputConfig)>>();
        infos.sort_by(|(a, _), (b, _)| a.cmp(b));
        let (infos, configs) = infos.into_iter().unzip();
        self.outputs_mut().config.insert(infos, configs);
    }

    /// Writes the store right away, instead of waiting for a guard to drop.
    pub fn save(&self) -> Result<()> {
        match self.path.as_ref() {
            Some(path) => persist(path, &self.outputs),
            None => Ok(()),
        }
    }
}

fn persist<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = ron::ser::to_string_pretty(value, Default::default())
        .context("Failed to serialize output configuration")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Mutable access to persisted state, written back when dropped.
pub struct PersistenceGuard<'a, T: Serialize>(Option<PathBuf>, &'a mut T);

impl<'a, T: Serialize> std::ops::Deref for PersistenceGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.1
    }
}

impl<'a, T: Serialize> std::ops::DerefMut for PersistenceGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.1
    }
}

impl<'a, T: Serialize> Drop for PersistenceGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(path) = self.0.as_ref() {
            if let Err(err) = persist(path, &*self.1) {
                warn!(?err, "Failed to persist {}.", path.display());
            }
        }
    }
}

impl From<&Output> for OutputInfo {
    fn from(output: &Output) -> OutputInfo {
        let metadata = output.metadata();
        OutputInfo {
            connector: metadata.name,
            make: metadata.make,
            model: metadata.model,
        }
    }
}

pub fn transform_to_def(transform: Transform) -> TransformDef {
    match transform {
        Transform::Normal => TransformDef::Normal,
        Transform::_90 => TransformDef::_90,
        Transform::_180 => TransformDef::_180,
        Transform::_270 => TransformDef::_270,
        Transform::Flipped => TransformDef::Flipped,
        Transform::Flipped90 => TransformDef::Flipped90,
        Transform::Flipped180 => TransformDef::Flipped180,
        Transform::Flipped270 => TransformDef::Flipped270,
    }
}

pub fn transform_from_def(transform: TransformDef) -> Transform {
    match transform {
        TransformDef::Normal => Transform::Normal,
        TransformDef::_90 => Transform::_90,
        TransformDef::_180 => Transform::_180,
        TransformDef::_270 => Transform::_270,
        TransformDef::Flipped => Transform::Flipped,
        TransformDef::Flipped90 => Transform::Flipped90,
        TransformDef::Flipped180 => Transform::Flipped180,
        TransformDef::Flipped270 => Transform::Flipped270,
    }
}

/// The published state of `output` in its persisted form.
pub fn output_config(output: &Output) -> OutputConfig {
    let state = output.published_state();
    let geometry = output.geometry();
    OutputConfig {
        mode: output
            .current_mode()
            .map(|mode| ((mode.size.w, mode.size.h), Some(mode.refresh as u32)))
            .unwrap_or(((0, 0), None)),
        vrr: state.adaptive_sync,
        scale: state.client_scale,
        transform: transform_to_def(state.transform),
        position: (geometry.loc.x, geometry.loc.y),
        enabled: output.is_enabled(),
    }
}

fn find_mode(output: &Output, config: &OutputConfig) -> Option<Mode> {
    let size = Size::from(config.mode_size());
    // stored refresh rates are unsigned and may exceed what a mode can carry
    let refresh = i64::from(config.mode_refresh());
    output
        .modes()
        .into_iter()
        .filter(|mode| mode.size == size)
        .min_by_key(|mode| (i64::from(mode.refresh) - refresh).abs())
}

/// Writes `config` into the pending state of `output`. Publishing it is up
/// to the caller. Returns `false` if no mode of the output matches, the
/// current mode is kept in that case.
pub fn apply_output_config(output: &Output, config: &OutputConfig) -> bool {
    let mut state = output.get_state();
    let mode = find_mode(output, config);
    match mode {
        Some(mode) => state.mode = Some(mode.id),
        None => warn!(
            output = %output.name(),
            "No mode matching {:?}, keeping the current mode.", config.mode
        ),
    }

    state.enabled = config.enabled;
    state.transform = transform_from_def(config.transform);
    state.client_scale = config.scale;
    state.adaptive_sync = config.vrr;

    let size = state
        .mode
        .and_then(|id| output.mode(id))
        .map(|mode| mode.size.to_output_size(state.transform, state.client_scale))
        .unwrap_or(state.geometry.size);
    state.geometry = Rectangle {
        loc: Point::from((config.position.0 as f64, config.position.1 as f64)),
        size,
    };

    output.set_state(state);
    mode.is_some()
}
