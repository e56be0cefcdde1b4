// SPDX-License-Identifier: GPL-3.0-only

//! Outputs as seen by the output management protocols.
//!
//! An [`Output`] keeps two copies of its mutable properties. The compositor
//! writes into the pending copy through [`Output::set_state`], and
//! [`Output::done`] sends everything that differs from the published copy to
//! every bound head and device before publishing it.

use cosmic_output_management_config::output::comp::AdaptiveSync;
use smithay::{
    reexports::{
        wayland_protocols_wlr::output_management::v1::server::{
            zwlr_output_head_v1::ZwlrOutputHeadV1, zwlr_output_manager_v1::ZwlrOutputManagerV1,
        },
        wayland_server::Resource,
    },
    utils::{Logical, Physical, Point, Raw, Rectangle, Size, Transform},
};
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
};
use tracing::{debug, trace, warn};

use crate::wayland::protocols::{
    kwinft_output_management::zkwinft_output_device_v1::ZkwinftOutputDeviceV1,
    output_configuration::{handlers, OutputHeadInstance},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub size: Size<i32, Physical>,
    /// Refresh rate in mHz
    pub refresh: i32,
    pub preferred: bool,
    /// Unique within the modes of one output
    pub id: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Subpixel {
    #[default]
    Unknown,
    None,
    HorizontalRgb,
    HorizontalBgr,
    VerticalRgb,
    VerticalBgr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMetadata {
    pub name: String,
    pub description: String,
    pub make: String,
    pub model: String,
    pub serial_number: String,
    /// In millimeters
    pub physical_size: Size<i32, Raw>,
}

// `Size` does not implement `Hash`, so hash its components field by field.
impl Hash for Mode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.size.w.hash(state);
        self.size.h.hash(state);
        self.refresh.hash(state);
        self.preferred.hash(state);
        self.id.hash(state);
    }
}

impl Hash for OutputMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.description.hash(state);
        self.make.hash(state);
        self.model.hash(state);
        self.serial_number.hash(state);
        self.physical_size.w.hash(state);
        self.physical_size.h.hash(state);
    }
}

impl Default for OutputMetadata {
    fn default() -> Self {
        OutputMetadata {
            name: String::new(),
            description: String::new(),
            make: String::from("Unknown"),
            model: String::from("Unknown"),
            serial_number: String::from("Unknown"),
            physical_size: Size::from((0, 0)),
        }
    }
}

/// The mutable properties of an output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputState {
    pub enabled: bool,
    /// Id of the current mode
    pub mode: Option<i32>,
    pub transform: Transform,
    pub geometry: Rectangle<f64, Logical>,
    pub subpixel: Subpixel,
    pub client_scale: f64,
    pub adaptive_sync: AdaptiveSync,
}

impl Default for OutputState {
    fn default() -> Self {
        OutputState {
            enabled: false,
            mode: None,
            transform: Transform::Normal,
            geometry: Rectangle {
                loc: Point::from((0.0, 0.0)),
                size: Size::from((0.0, 0.0)),
            },
            subpixel: Subpixel::Unknown,
            client_scale: 1.0,
            adaptive_sync: AdaptiveSync::Disabled,
        }
    }
}

bitflags::bitflags! {
    /// Properties that differ between the pending and the published state.
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub struct OutputChanges: u32 {
        const ENABLED = 1;
        const MODE = 2;
        const TRANSFORM = 4;
        const GEOMETRY = 8;
        const SCALE = 16;
        const ADAPTIVE_SYNC = 32;
        const SUBPIXEL = 64;
        /// modes were added since the last `done`
        const MODES = 128;
    }
}

impl OutputChanges {
    pub fn between(published: &OutputState, pending: &OutputState) -> OutputChanges {
        let mut changes = OutputChanges::empty();
        changes.set(OutputChanges::ENABLED, published.enabled != pending.enabled);
        changes.set(OutputChanges::MODE, published.mode != pending.mode);
        changes.set(OutputChanges::TRANSFORM, published.transform != pending.transform);
        changes.set(OutputChanges::GEOMETRY, published.geometry != pending.geometry);
        changes.set(OutputChanges::SCALE, published.client_scale != pending.client_scale);
        changes.set(
            OutputChanges::ADAPTIVE_SYNC,
            published.adaptive_sync != pending.adaptive_sync,
        );
        changes.set(OutputChanges::SUBPIXEL, published.subpixel != pending.subpixel);
        changes
    }
}

pub(crate) struct OutputInner {
    pub(crate) metadata: OutputMetadata,
    pub(crate) modes: Vec<Mode>,
    pub(crate) pending: OutputState,
    pub(crate) published: OutputState,
    published_modes: Vec<Mode>,
    pub(crate) heads: Vec<OutputHeadInstance>,
    pub(crate) devices: Vec<ZkwinftOutputDeviceV1>,
    listeners: Vec<Weak<AtomicBool>>,
}

impl OutputInner {
    pub(crate) fn mode(&self, id: i32) -> Option<&Mode> {
        self.modes.iter().find(|mode| mode.id == id)
    }

    /// The mode flagged current, only valid once published.
    pub(crate) fn current_mode(&self) -> Option<&Mode> {
        self.published.mode.and_then(|id| self.mode(id))
    }

    fn changes(&self) -> OutputChanges {
        let mut changes = OutputChanges::between(&self.published, &self.pending);
        changes.set(OutputChanges::MODES, self.published_modes != self.modes);
        changes
    }
}

#[derive(Clone)]
pub struct Output(Arc<Mutex<OutputInner>>);

#[derive(Clone, Default)]
pub struct WeakOutput(Weak<Mutex<OutputInner>>);

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Output").field(&self.name()).finish()
    }
}

impl fmt::Debug for WeakOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(output) => f.debug_tuple("WeakOutput").field(&output.name()).finish(),
            None => f.write_str("WeakOutput(<dead>)"),
        }
    }
}

impl PartialEq for Output {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Output {}

impl Hash for Output {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state)
    }
}

impl PartialEq for WeakOutput {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq<Output> for WeakOutput {
    fn eq(&self, other: &Output) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&other.0))
    }
}

impl WeakOutput {
    pub fn upgrade(&self) -> Option<Output> {
        self.0.upgrade().map(Output)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl Output {
    pub fn new(metadata: OutputMetadata) -> Output {
        Output(Arc::new(Mutex::new(OutputInner {
            metadata,
            modes: Vec::new(),
            pending: OutputState::default(),
            published: OutputState::default(),
            published_modes: Vec::new(),
            heads: Vec::new(),
            devices: Vec::new(),
            listeners: Vec::new(),
        })))
    }

    pub(crate) fn inner(&self) -> MutexGuard<'_, OutputInner> {
        self.0.lock().unwrap()
    }

    pub fn downgrade(&self) -> WeakOutput {
        WeakOutput(Arc::downgrade(&self.0))
    }

    pub fn name(&self) -> String {
        self.inner().metadata.name.clone()
    }

    pub fn description(&self) -> String {
        self.inner().metadata.description.clone()
    }

    pub fn metadata(&self) -> OutputMetadata {
        self.inner().metadata.clone()
    }

    pub fn modes(&self) -> Vec<Mode> {
        self.inner().modes.clone()
    }

    pub fn mode(&self, id: i32) -> Option<Mode> {
        self.inner().mode(id).copied()
    }

    pub fn preferred_mode(&self) -> Option<Mode> {
        self.inner().modes.iter().find(|mode| mode.preferred).copied()
    }

    /// The published current mode.
    pub fn current_mode(&self) -> Option<Mode> {
        self.inner().current_mode().copied()
    }

    /// Adds a mode. A mode reusing the id of a known mode is ignored.
    pub fn add_mode(&self, mut mode: Mode) {
        let mut inner = self.inner();
        if inner.mode(mode.id).is_some() {
            warn!(
                output = %inner.metadata.name,
                "Ignoring mode {:?}, the id {} is already in use.", mode, mode.id
            );
            return;
        }
        if mode.preferred && inner.modes.iter().any(|mode| mode.preferred) {
            warn!(
                output = %inner.metadata.name,
                "Output already has a preferred mode, adding {:?} as a regular mode.", mode
            );
            mode.preferred = false;
        }
        inner.modes.push(mode);
    }

    /// Pending state, including changes not yet published by [`Output::done`].
    pub fn get_state(&self) -> OutputState {
        self.inner().pending.clone()
    }

    /// Replaces the whole pending state.
    pub fn set_state(&self, mut state: OutputState) {
        let mut inner = self.inner();
        if let Some(id) = state.mode {
            if inner.mode(id).is_none() {
                warn!(
                    output = %inner.metadata.name,
                    "Unknown mode id {}, keeping the current mode.", id
                );
                state.mode = inner.pending.mode;
            }
        }
        inner.pending = state;
    }

    pub fn published_state(&self) -> OutputState {
        self.inner().published.clone()
    }

    /// Sends the difference between pending and published state to all bound
    /// clients and publishes the pending state.
    pub fn done(&self) -> OutputChanges {
        profiling::scope!("Output::done");

        let mut inner = self.inner();
        let changes = inner.changes();
        if changes.is_empty() {
            trace!(output = %inner.metadata.name, "No changes to publish");
            return changes;
        }
        debug!(output = %inner.metadata.name, ?changes, "Publishing output state");

        inner.published = inner.pending.clone();
        inner.published_modes = inner.modes.clone();

        let mut heads = std::mem::take(&mut inner.heads);
        heads.retain(|head| head.obj.is_alive());
        for head in &mut heads {
            handlers::wlr::send_head_state(head, &inner, changes);
        }
        inner.heads = heads;

        inner.devices.retain(|device| device.is_alive());
        for device in &inner.devices {
            handlers::kwinft::send_device_state(device, &inner, changes);
        }

        inner.listeners.retain(|listener| match listener.upgrade() {
            Some(changed) => {
                changed.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        });

        changes
    }

    pub(crate) fn add_listener(&self, changed: &Arc<AtomicBool>) {
        let mut inner = self.inner();
        let listener = Arc::downgrade(changed);
        if !inner.listeners.iter().any(|l| l.ptr_eq(&listener)) {
            inner.listeners.push(listener);
        }
    }

    pub(crate) fn add_head(&self, head: OutputHeadInstance) {
        self.inner().heads.push(head);
    }

    pub(crate) fn remove_head(&self, head: &ZwlrOutputHeadV1) {
        self.inner().heads.retain(|instance| &instance.obj != head);
    }

    pub(crate) fn remove_heads_of(&self, manager: &ZwlrOutputManagerV1) {
        self.inner()
            .heads
            .retain(|instance| &instance.manager != manager);
    }

    pub(crate) fn take_heads(&self) -> Vec<OutputHeadInstance> {
        std::mem::take(&mut self.inner().heads)
    }

    pub(crate) fn add_device(&self, device: ZkwinftOutputDeviceV1) {
        self.inner().devices.push(device);
    }

    pub(crate) fn remove_device(&self, device: &ZkwinftOutputDeviceV1) {
        self.inner().devices.retain(|d| d != device);
    }

    pub(crate) fn clear_devices(&self) {
        self.inner().devices.clear();
    }
}
