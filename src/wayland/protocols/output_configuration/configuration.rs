// SPDX-License-Identifier: GPL-3.0-only

use smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_configuration_v1::{
    self, ZwlrOutputConfigurationV1,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use tracing::{debug, warn};

use super::changeset::{ChangesetFields, OutputChangeset};
use crate::{
    output::{Output, WeakOutput},
    wayland::protocols::kwinft_output_management::zkwinft_output_configuration_v1::ZkwinftOutputConfigurationV1,
};

/// The protocol family a configuration was created through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Wlr,
    Kwinft,
}

impl Protocol {
    /// Every live head has to be enabled or disabled before apply or test.
    pub fn requires_coverage(self) -> bool {
        matches!(self, Protocol::Wlr)
    }

    /// Configurations created before the last topology change get cancelled.
    pub fn cancels_stale(self) -> bool {
        matches!(self, Protocol::Wlr)
    }

    /// Every property may only be set once per head.
    pub fn single_assignment(self) -> bool {
        matches!(self, Protocol::Wlr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Submit {
    Apply,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigurationPhase {
    Open,
    Submitted(Submit),
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("head {0} was already configured")]
    AlreadyConfiguredHead(String),
    #[error("head {0} was neither enabled nor disabled")]
    UnconfiguredHead(String),
    #[error("configuration object was used already")]
    AlreadyUsed,
}

impl ConfigurationError {
    pub fn code(&self) -> zwlr_output_configuration_v1::Error {
        match self {
            ConfigurationError::AlreadyConfiguredHead(_) => {
                zwlr_output_configuration_v1::Error::AlreadyConfiguredHead
            }
            ConfigurationError::UnconfiguredHead(_) => {
                zwlr_output_configuration_v1::Error::UnconfiguredHead
            }
            ConfigurationError::AlreadyUsed => zwlr_output_configuration_v1::Error::AlreadyUsed,
        }
    }
}

/// What to do with a configuration after it was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitOutcome {
    /// Hand it to the compositor.
    Proceed,
    /// Answered already, nothing left to do.
    Resolved,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConfigurationResource {
    Wlr(ZwlrOutputConfigurationV1),
    Kwinft(ZkwinftOutputConfigurationV1),
}

impl ConfigurationResource {
    fn succeeded(&self) {
        match self {
            ConfigurationResource::Wlr(obj) => obj.succeeded(),
            ConfigurationResource::Kwinft(obj) => obj.applied(),
        }
    }

    fn failed(&self) {
        match self {
            ConfigurationResource::Wlr(obj) => obj.failed(),
            ConfigurationResource::Kwinft(obj) => obj.failed(),
        }
    }

    fn cancelled(&self) {
        match self {
            ConfigurationResource::Wlr(obj) => obj.cancelled(),
            // no cancelled event in the legacy protocol
            ConfigurationResource::Kwinft(obj) => obj.failed(),
        }
    }
}

struct ConfigurationInner {
    protocol: Protocol,
    resource: Option<ConfigurationResource>,
    serial: u32,
    phase: ConfigurationPhase,
    changesets: Vec<OutputChangeset>,
    detached: bool,
}

impl ConfigurationInner {
    fn finish(&mut self, phase: ConfigurationPhase) {
        self.phase = phase;
        self.changesets.clear();
        if let Some(resource) = self.resource.as_ref() {
            match phase {
                ConfigurationPhase::Succeeded => resource.succeeded(),
                ConfigurationPhase::Failed => resource.failed(),
                ConfigurationPhase::Cancelled => resource.cancelled(),
                _ => {}
            }
        }
    }

    fn changeset(&mut self, output: &WeakOutput) -> &mut OutputChangeset {
        let idx = match self
            .changesets
            .iter()
            .position(|changeset| changeset.weak_output() == output)
        {
            Some(idx) => idx,
            None => {
                self.changesets.push(OutputChangeset::new(
                    output,
                    self.protocol.single_assignment(),
                ));
                self.changesets.len() - 1
            }
        };
        &mut self.changesets[idx]
    }
}

/// A batch of output changes a client submits at once.
///
/// Handed to [`OutputConfigurationHandler`] on apply or test. The compositor
/// answers with [`OutputConfiguration::set_applied`] or
/// [`OutputConfiguration::set_failed`].
///
/// [`OutputConfigurationHandler`]: super::OutputConfigurationHandler
#[derive(Clone)]
pub struct OutputConfiguration(Arc<Mutex<ConfigurationInner>>);

impl fmt::Debug for OutputConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner();
        f.debug_struct("OutputConfiguration")
            .field("protocol", &inner.protocol)
            .field("serial", &inner.serial)
            .field("phase", &inner.phase)
            .field("changesets", &inner.changesets)
            .finish()
    }
}

impl PartialEq for OutputConfiguration {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl OutputConfiguration {
    pub(crate) fn new(protocol: Protocol, serial: u32) -> OutputConfiguration {
        OutputConfiguration(Arc::new(Mutex::new(ConfigurationInner {
            protocol,
            resource: None,
            serial,
            phase: ConfigurationPhase::Open,
            changesets: Vec::new(),
            detached: false,
        })))
    }

    fn inner(&self) -> MutexGuard<'_, ConfigurationInner> {
        self.0.lock().unwrap()
    }

    pub(crate) fn attach(&self, resource: ConfigurationResource) {
        self.inner().resource = Some(resource);
    }

    /// The client destroyed the configuration object, results go nowhere.
    pub(crate) fn release_resource(&self) {
        self.inner().resource = None;
    }

    pub fn protocol(&self) -> Protocol {
        self.inner().protocol
    }

    /// Manager serial this configuration was created against.
    pub fn serial(&self) -> u32 {
        self.inner().serial
    }

    pub fn phase(&self) -> ConfigurationPhase {
        self.inner().phase
    }

    pub fn is_used(&self) -> bool {
        self.inner().phase != ConfigurationPhase::Open
    }

    /// `true` if the client only asked whether the configuration would work.
    pub fn is_test(&self) -> bool {
        self.inner().phase == ConfigurationPhase::Submitted(Submit::Test)
    }

    /// Runs `f` on the changeset for `output`, creating it on first use.
    pub fn with_pending_changes<R>(
        &self,
        output: &Output,
        f: impl FnOnce(&mut OutputChangeset) -> R,
    ) -> R {
        self.with_changeset(&output.downgrade(), f)
    }

    pub(crate) fn with_changeset<R>(
        &self,
        output: &WeakOutput,
        f: impl FnOnce(&mut OutputChangeset) -> R,
    ) -> R {
        f(self.inner().changeset(output))
    }

    /// Changesets of the outputs still managed. Changesets of outputs removed
    /// while the configuration was submitted are dropped.
    pub fn changesets(&self) -> Vec<OutputChangeset> {
        self.inner().changesets.clone()
    }

    pub fn changeset(&self, output: &Output) -> Option<OutputChangeset> {
        self.inner()
            .changesets
            .iter()
            .find(|changeset| changeset.weak_output() == output)
            .cloned()
    }

    /// Records an explicit enable or disable of a head.
    pub(crate) fn configure_head(
        &self,
        output: &WeakOutput,
        enabled: bool,
    ) -> Result<(), ConfigurationError> {
        let mut inner = self.inner();
        let single_assignment = inner.protocol.single_assignment();
        let changeset = inner.changeset(output);
        if single_assignment && changeset.fields().contains(ChangesetFields::ENABLED) {
            let name = output
                .upgrade()
                .map(|output| output.name())
                .unwrap_or_default();
            return Err(ConfigurationError::AlreadyConfiguredHead(name));
        }
        changeset.set_enabled(enabled);
        Ok(())
    }

    pub(crate) fn forget_output(&self, output: &Output) {
        self.inner()
            .changesets
            .retain(|changeset| changeset.weak_output() != output);
    }

    /// The manager global is gone, the configuration can't be applied anymore.
    pub(crate) fn detach(&self) {
        self.inner().detached = true;
    }

    pub(crate) fn submit(
        &self,
        kind: Submit,
        serial: u32,
        outputs: &[Output],
    ) -> Result<SubmitOutcome, ConfigurationError> {
        let mut inner = self.inner();
        let protocol = inner.protocol;

        if inner.phase != ConfigurationPhase::Open {
            if protocol == Protocol::Kwinft {
                warn!(phase = ?inner.phase, "Ignoring reuse of an output configuration");
                return Ok(SubmitOutcome::Resolved);
            }
            return Err(ConfigurationError::AlreadyUsed);
        }

        if inner.detached {
            debug!("Output configuration outlived its manager");
            inner.finish(ConfigurationPhase::Cancelled);
            return Ok(SubmitOutcome::Resolved);
        }

        if protocol.cancels_stale() && inner.serial != serial {
            debug!(
                serial = inner.serial,
                current = serial,
                "Cancelling stale output configuration"
            );
            inner.finish(ConfigurationPhase::Cancelled);
            return Ok(SubmitOutcome::Resolved);
        }

        let is_live = |changeset: &OutputChangeset| {
            outputs
                .iter()
                .any(|output| changeset.weak_output() == output)
        };

        if protocol.requires_coverage() {
            // a head that was removed before the client saw `done` is a race, not an error
            if !inner.changesets.iter().all(is_live) {
                debug!("Output configuration references a removed head");
                inner.finish(ConfigurationPhase::Cancelled);
                return Ok(SubmitOutcome::Resolved);
            }
            if let Some(output) = outputs.iter().find(|output| {
                !inner.changesets.iter().any(|changeset| {
                    changeset.weak_output() == *output
                        && changeset.fields().contains(ChangesetFields::ENABLED)
                })
            }) {
                return Err(ConfigurationError::UnconfiguredHead(output.name()));
            }
            for changeset in inner.changesets.iter_mut() {
                changeset.update_logical_size();
            }
        } else {
            inner.changesets.retain(is_live);
        }

        inner.phase = ConfigurationPhase::Submitted(kind);
        Ok(SubmitOutcome::Proceed)
    }

    /// The configuration was applied, or would apply if this was a test.
    pub fn set_applied(&self) {
        let mut inner = self.inner();
        match inner.phase {
            ConfigurationPhase::Submitted(_) => inner.finish(ConfigurationPhase::Succeeded),
            phase => warn!(?phase, "Output configuration was not submitted, ignoring result"),
        }
    }

    /// The configuration could not be applied. Changes are discarded.
    pub fn set_failed(&self) {
        let mut inner = self.inner();
        match inner.phase {
            ConfigurationPhase::Submitted(_) => inner.finish(ConfigurationPhase::Failed),
            phase => warn!(?phase, "Output configuration was not submitted, ignoring result"),
        }
    }

    /// Cancels an unused configuration. Returns `false` if it was used already.
    pub(crate) fn cancel(&self) -> bool {
        let mut inner = self.inner();
        if inner.phase != ConfigurationPhase::Open {
            return false;
        }
        inner.finish(ConfigurationPhase::Cancelled);
        true
    }
}

/// Serial, dirty flag and the configurations the compositor may still see:
/// those not yet used by their clients and those awaiting an answer.
#[derive(Debug)]
pub struct ConfigurationRegistry {
    serial: u32,
    changed: Arc<AtomicBool>,
    outstanding: Vec<OutputConfiguration>,
    submitted: Vec<OutputConfiguration>,
}

impl Default for ConfigurationRegistry {
    fn default() -> Self {
        ConfigurationRegistry::new()
    }
}

impl ConfigurationRegistry {
    pub fn new() -> ConfigurationRegistry {
        ConfigurationRegistry {
            serial: 0,
            changed: Arc::new(AtomicBool::new(false)),
            outstanding: Vec::new(),
            submitted: Vec::new(),
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }

    pub fn is_changed(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    pub(crate) fn changed_flag(&self) -> &Arc<AtomicBool> {
        &self.changed
    }

    pub fn outstanding(&self) -> impl Iterator<Item = &OutputConfiguration> {
        self.outstanding.iter()
    }

    pub(crate) fn track(&mut self, conf: &OutputConfiguration) {
        if !self.outstanding.contains(conf) {
            self.outstanding.push(conf.clone());
        }
    }

    pub(crate) fn untrack(&mut self, conf: &OutputConfiguration) {
        self.outstanding.retain(|c| c != conf);
    }

    /// Configurations handed to the compositor and not yet answered.
    pub fn submitted(&self) -> impl Iterator<Item = &OutputConfiguration> {
        self.submitted.iter()
    }

    pub(crate) fn track_submitted(&mut self, conf: &OutputConfiguration) {
        self.prune_submitted();
        if !self.submitted.contains(conf) {
            self.submitted.push(conf.clone());
        }
    }

    fn prune_submitted(&mut self) {
        self.submitted
            .retain(|conf| matches!(conf.phase(), ConfigurationPhase::Submitted(_)));
    }

    /// Drops the changesets for a removed output from legacy configurations
    /// still being built and from every configuration awaiting an answer.
    pub(crate) fn forget_output(&mut self, output: &Output) {
        self.prune_submitted();
        for conf in self
            .outstanding
            .iter()
            .filter(|conf| !conf.protocol().cancels_stale())
            .chain(self.submitted.iter())
        {
            conf.forget_output(output);
        }
    }

    /// Bumps the serial and cancels stale configurations, if anything changed
    /// since the last call.
    pub fn done(&mut self) -> Option<u32> {
        if !self.changed.swap(false, Ordering::SeqCst) {
            return None;
        }
        self.serial = self.serial.wrapping_add(1);
        self.outstanding.retain(|conf| {
            if conf.protocol().cancels_stale() {
                conf.cancel();
                false
            } else {
                !conf.is_used()
            }
        });
        self.prune_submitted();
        Some(self.serial)
    }

    pub(crate) fn detach_all(&mut self) {
        for conf in self.outstanding.drain(..) {
            conf.detach();
        }
    }
}
