// SPDX-License-Identifier: GPL-3.0-only

//! Output configuration negotiation for the wlr and the legacy kwinft output
//! management protocols.
//!
//! Both protocol families share the same state machine: clients collect
//! per-output changesets in an [`OutputConfiguration`], submit it with apply
//! (or test), and the compositor answers through
//! [`OutputConfiguration::set_applied`] or [`OutputConfiguration::set_failed`].
//! Topology changes published through [`OutputConfigurationState::done`] bump
//! the serial and cancel every wlr configuration that was not used yet.

use calloop::{
    timer::{TimeoutAction, Timer},
    LoopHandle,
};
use smithay::reexports::{
    wayland_protocols_wlr::output_management::v1::server::{
        zwlr_output_configuration_head_v1::ZwlrOutputConfigurationHeadV1,
        zwlr_output_configuration_v1::ZwlrOutputConfigurationV1,
        zwlr_output_head_v1::ZwlrOutputHeadV1, zwlr_output_manager_v1::ZwlrOutputManagerV1,
        zwlr_output_mode_v1::ZwlrOutputModeV1,
    },
    wayland_server::{
        backend::GlobalId, Client, Dispatch, DisplayHandle, GlobalDispatch, Resource,
    },
};
use std::{fmt, marker::PhantomData, sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    output::{Mode, Output, WeakOutput},
    wayland::protocols::kwinft_output_management::{
        zkwinft_output_configuration_v1::ZkwinftOutputConfigurationV1,
        zkwinft_output_device_v1::ZkwinftOutputDeviceV1,
        zkwinft_output_management_v1::ZkwinftOutputManagementV1,
    },
};

mod changeset;
mod configuration;
pub(crate) mod handlers;
#[cfg(test)]
mod tests;

pub use self::changeset::{ChangesetError, ChangesetFields, ModeConfiguration, OutputChangeset};
pub use self::configuration::{
    ConfigurationError, ConfigurationPhase, ConfigurationRegistry, OutputConfiguration, Protocol,
    Submit,
};
pub(crate) use self::configuration::{ConfigurationResource, SubmitOutcome};

/// Delay between hiding a removed device global and destroying it, so clients
/// racing a bind against the removal don't hit a dead global.
const GLOBAL_REMOVAL_DELAY: Duration = Duration::from_secs(5);

pub type ClientFilter = Arc<dyn for<'a> Fn(&'a Client) -> bool + Send + Sync>;

pub struct OutputMngrGlobalData {
    filter: ClientFilter,
}

pub struct OutputDeviceGlobalData {
    output: WeakOutput,
    filter: ClientFilter,
}

#[derive(Debug, Clone)]
pub struct OutputModeData {
    pub output: WeakOutput,
    pub mode: Mode,
}

#[derive(Debug, Clone)]
pub struct ConfigurationHeadData {
    pub configuration: OutputConfiguration,
    pub output: WeakOutput,
}

#[derive(Debug)]
struct OutputMngrInstance {
    obj: ZwlrOutputManagerV1,
    finished: bool,
}

type CreateMode = Box<dyn Fn(&Mode) -> Option<ZwlrOutputModeV1> + Send + Sync>;

/// A head object announced to one manager instance, stored on its output.
pub(crate) struct OutputHeadInstance {
    pub(crate) obj: ZwlrOutputHeadV1,
    pub(crate) manager: ZwlrOutputManagerV1,
    pub(crate) modes: Vec<(i32, ZwlrOutputModeV1)>,
    create_mode: CreateMode,
}

impl fmt::Debug for OutputHeadInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputHeadInstance")
            .field("obj", &self.obj)
            .field("manager", &self.manager)
            .field("modes", &self.modes)
            .finish_non_exhaustive()
    }
}

impl OutputHeadInstance {
    pub(crate) fn create_mode(&self, mode: &Mode) -> Option<ZwlrOutputModeV1> {
        (self.create_mode)(mode)
    }
}

pub struct OutputConfigurationState<D: 'static> {
    outputs: Vec<Output>,
    instances: Vec<OutputMngrInstance>,
    registry: ConfigurationRegistry,
    global: Option<GlobalId>,
    legacy_global: Option<GlobalId>,
    device_globals: Vec<(Output, GlobalId)>,
    filter: ClientFilter,
    dh: DisplayHandle,
    event_loop_handle: LoopHandle<'static, D>,
    _dispatch: PhantomData<D>,
}

impl<D> fmt::Debug for OutputConfigurationState<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputConfigurationState")
            .field("outputs", &self.outputs)
            .field("instances", &self.instances)
            .field("registry", &self.registry)
            .field("global", &self.global)
            .field("legacy_global", &self.legacy_global)
            .field("device_globals", &self.device_globals)
            .finish_non_exhaustive()
    }
}

pub trait OutputConfigurationHandler: Sized {
    fn output_configuration_state(&mut self) -> &mut OutputConfigurationState<Self>;

    /// A client asks whether `conf` would apply. Answer with
    /// [`OutputConfiguration::set_applied`] or [`OutputConfiguration::set_failed`],
    /// without touching any output.
    fn test_configuration(&mut self, conf: OutputConfiguration);
    /// A client wants `conf` applied. Answer with
    /// [`OutputConfiguration::set_applied`] or [`OutputConfiguration::set_failed`],
    /// now or later.
    fn apply_configuration(&mut self, conf: OutputConfiguration);
}

impl<D> OutputConfigurationState<D>
where
    D: GlobalDispatch<ZwlrOutputManagerV1, OutputMngrGlobalData>
        + Dispatch<ZwlrOutputManagerV1, ()>
        + Dispatch<ZwlrOutputHeadV1, WeakOutput>
        + Dispatch<ZwlrOutputModeV1, OutputModeData>
        + Dispatch<ZwlrOutputConfigurationV1, OutputConfiguration>
        + Dispatch<ZwlrOutputConfigurationHeadV1, ConfigurationHeadData>
        + GlobalDispatch<ZkwinftOutputManagementV1, OutputMngrGlobalData>
        + Dispatch<ZkwinftOutputManagementV1, ()>
        + GlobalDispatch<ZkwinftOutputDeviceV1, OutputDeviceGlobalData>
        + Dispatch<ZkwinftOutputDeviceV1, WeakOutput>
        + Dispatch<ZkwinftOutputConfigurationV1, OutputConfiguration>
        + OutputConfigurationHandler
        + 'static,
{
    pub fn new<F>(
        dh: &DisplayHandle,
        event_loop_handle: LoopHandle<'static, D>,
        client_filter: F,
    ) -> OutputConfigurationState<D>
    where
        F: for<'a> Fn(&'a Client) -> bool + Send + Sync + 'static,
    {
        let filter: ClientFilter = Arc::new(client_filter);

        let global = dh.create_global::<D, ZwlrOutputManagerV1, _>(
            4,
            OutputMngrGlobalData {
                filter: filter.clone(),
            },
        );
        let legacy_global = dh.create_global::<D, ZkwinftOutputManagementV1, _>(
            1,
            OutputMngrGlobalData {
                filter: filter.clone(),
            },
        );

        OutputConfigurationState {
            outputs: Vec::new(),
            instances: Vec::new(),
            registry: ConfigurationRegistry::new(),
            global: Some(global),
            legacy_global: Some(legacy_global),
            device_globals: Vec::new(),
            filter,
            dh: dh.clone(),
            event_loop_handle,
            _dispatch: PhantomData,
        }
    }

    pub fn global_id(&self) -> Option<GlobalId> {
        self.global.clone()
    }

    pub fn legacy_global_id(&self) -> Option<GlobalId> {
        self.legacy_global.clone()
    }

    /// Announces new outputs to every bound client right away. Clients learn
    /// that the topology is complete with the next [`Self::done`].
    pub fn add_heads<'a>(&mut self, outputs: impl Iterator<Item = &'a Output>) {
        let new_outputs = outputs
            .filter(|o| !self.outputs.contains(o))
            .cloned()
            .collect::<Vec<_>>();

        for output in new_outputs {
            debug!(output = %output.name(), "Adding output head");
            output.add_listener(self.registry.changed_flag());

            if self.global.is_some() {
                let device_global = self.dh.create_global::<D, ZkwinftOutputDeviceV1, _>(
                    1,
                    OutputDeviceGlobalData {
                        output: output.downgrade(),
                        filter: self.filter.clone(),
                    },
                );
                self.device_globals.push((output.clone(), device_global));

                for manager in self.instances.iter().filter(|i| !i.finished) {
                    send_head_to_client::<D>(&self.dh, &manager.obj, &output);
                }
            }

            self.outputs.push(output);
            self.registry.mark_changed();
        }
    }

    pub fn remove_heads<'a>(&mut self, outputs: impl Iterator<Item = &'a Output>) {
        for output in outputs {
            if !self.outputs.contains(output) {
                continue;
            }
            debug!(output = %output.name(), "Removing output head");

            for head in output.take_heads() {
                for (_, mode) in &head.modes {
                    mode.finished();
                }
                head.obj.finished();
            }
            output.clear_devices();

            if let Some(idx) = self.device_globals.iter().position(|(o, _)| o == output) {
                let (_, global) = self.device_globals.remove(idx);
                remove_global_with_timer(&self.dh, &self.event_loop_handle, global);
            }

            self.registry.forget_output(output);
            self.outputs.retain(|o| o != output);
            self.registry.mark_changed();
        }
    }

    pub(crate) fn submit(
        &mut self,
        conf: &OutputConfiguration,
        kind: Submit,
    ) -> Result<SubmitOutcome, ConfigurationError> {
        self.registry.untrack(conf);
        // published changes the clients have not seen a `done` for yet
        if conf.protocol().cancels_stale() && self.registry.is_changed() && conf.cancel() {
            debug!("Cancelling output configuration racing a topology change");
            return Ok(SubmitOutcome::Resolved);
        }
        let outcome = conf.submit(kind, self.registry.serial(), &self.outputs)?;
        if outcome == SubmitOutcome::Proceed {
            self.registry.track_submitted(conf);
        }
        Ok(outcome)
    }
}

impl<D: 'static> OutputConfigurationState<D> {
    pub fn outputs(&self) -> impl Iterator<Item = Output> {
        self.outputs.clone().into_iter()
    }

    pub fn serial(&self) -> u32 {
        self.registry.serial()
    }

    pub fn registry(&self) -> &ConfigurationRegistry {
        &self.registry
    }

    /// Finishes a batch of output changes.
    ///
    /// Does nothing unless a head was added or removed, or an output published
    /// new state since the last call. Otherwise the serial is bumped, every
    /// unused wlr configuration is cancelled and `done` is sent to every
    /// manager.
    pub fn done(&mut self) {
        let Some(serial) = self.registry.done() else {
            return;
        };
        debug!(serial, "Output configuration changed");
        self.instances.retain(|instance| instance.obj.is_alive());
        for instance in self.instances.iter().filter(|i| !i.finished) {
            instance.obj.done(serial);
        }
    }

    /// Tears down both globals. Outstanding configurations can't be applied
    /// anymore and every bound manager receives `finished`.
    pub fn destroy_globals(&mut self) {
        if self.global.is_none() && self.legacy_global.is_none() {
            return;
        }

        for instance in self.instances.iter_mut().filter(|i| !i.finished) {
            instance.obj.finished();
            instance.finished = true;
        }
        for output in &self.outputs {
            for head in output.take_heads() {
                for (_, mode) in &head.modes {
                    mode.finished();
                }
                head.obj.finished();
            }
            output.clear_devices();
        }
        self.registry.detach_all();

        for (_, global) in self.device_globals.drain(..) {
            self.dh.remove_global::<D>(global);
        }
        if let Some(global) = self.global.take() {
            self.dh.remove_global::<D>(global);
        }
        if let Some(global) = self.legacy_global.take() {
            self.dh.remove_global::<D>(global);
        }
    }

    fn remove_instance(&mut self, obj: &ZwlrOutputManagerV1) {
        self.instances.retain(|instance| &instance.obj != obj);
        for output in &self.outputs {
            output.remove_heads_of(obj);
        }
    }
}

impl<D: 'static> Drop for OutputConfigurationState<D> {
    fn drop(&mut self) {
        self.destroy_globals();
    }
}

pub(crate) fn send_head_to_client<D>(
    dh: &DisplayHandle,
    mngr: &ZwlrOutputManagerV1,
    output: &Output,
) where
    D: Dispatch<ZwlrOutputHeadV1, WeakOutput> + Dispatch<ZwlrOutputModeV1, OutputModeData> + 'static,
{
    let Some(client) = mngr.client() else {
        return;
    };
    let head = match client.create_resource::<ZwlrOutputHeadV1, _, D>(
        dh,
        mngr.version(),
        output.downgrade(),
    ) {
        Ok(head) => head,
        Err(err) => {
            warn!(?err, output = %output.name(), "Failed to create output head");
            return;
        }
    };
    mngr.head(&head);

    let create_mode: CreateMode = {
        let dh = dh.clone();
        let version = head.version();
        let weak = output.downgrade();
        Box::new(move |mode: &Mode| {
            client
                .create_resource::<ZwlrOutputModeV1, _, D>(
                    &dh,
                    version,
                    OutputModeData {
                        output: weak.clone(),
                        mode: *mode,
                    },
                )
                .map_err(|err| warn!(?err, "Failed to create output mode"))
                .ok()
        })
    };
    let mut instance = OutputHeadInstance {
        obj: head,
        manager: mngr.clone(),
        modes: Vec::new(),
        create_mode,
    };

    {
        let inner = output.inner();
        handlers::wlr::announce_head(&mut instance, &inner);
    }
    output.add_head(instance);
}

fn remove_global_with_timer<D: 'static>(
    dh: &DisplayHandle,
    event_loop_handle: &LoopHandle<D>,
    id: GlobalId,
) {
    dh.disable_global::<D>(id.clone());
    let source = Timer::from_duration(GLOBAL_REMOVAL_DELAY);
    let dh = dh.clone();
    let res = event_loop_handle.insert_source(source, move |_, _, _state| {
        dh.remove_global::<D>(id.clone());
        TimeoutAction::Drop
    });
    if let Err(err) = res {
        tracing::error!(
            "failed to insert timer source to destroy output device global: {}",
            err
        );
    }
}

#[macro_export]
macro_rules! delegate_output_configuration {
    ($(@<$( $lt:tt $( : $clt:tt $(+ $dlt:tt )* )? ),+>)? $ty: ty) => {
        smithay::reexports::wayland_server::delegate_global_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_manager_v1::ZwlrOutputManagerV1: $crate::wayland::protocols::output_configuration::OutputMngrGlobalData
        ] => $crate::wayland::protocols::output_configuration::OutputConfigurationState<Self>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_manager_v1::ZwlrOutputManagerV1: ()
        ] => $crate::wayland::protocols::output_configuration::OutputConfigurationState<Self>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_head_v1::ZwlrOutputHeadV1: $crate::output::WeakOutput
        ] => $crate::wayland::protocols::output_configuration::OutputConfigurationState<Self>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_mode_v1::ZwlrOutputModeV1: $crate::wayland::protocols::output_configuration::OutputModeData
        ] => $crate::wayland::protocols::output_configuration::OutputConfigurationState<Self>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_configuration_v1::ZwlrOutputConfigurationV1: $crate::wayland::protocols::output_configuration::OutputConfiguration
        ] => $crate::wayland::protocols::output_configuration::OutputConfigurationState<Self>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_protocols_wlr::output_management::v1::server::zwlr_output_configuration_head_v1::ZwlrOutputConfigurationHeadV1: $crate::wayland::protocols::output_configuration::ConfigurationHeadData
        ] => $crate::wayland::protocols::output_configuration::OutputConfigurationState<Self>);
        smithay::reexports::wayland_server::delegate_global_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::wayland::protocols::kwinft_output_management::zkwinft_output_management_v1::ZkwinftOutputManagementV1: $crate::wayland::protocols::output_configuration::OutputMngrGlobalData
        ] => $crate::wayland::protocols::output_configuration::OutputConfigurationState<Self>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::wayland::protocols::kwinft_output_management::zkwinft_output_management_v1::ZkwinftOutputManagementV1: ()
        ] => $crate::wayland::protocols::output_configuration::OutputConfigurationState<Self>);
        smithay::reexports::wayland_server::delegate_global_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::wayland::protocols::kwinft_output_management::zkwinft_output_device_v1::ZkwinftOutputDeviceV1: $crate::wayland::protocols::output_configuration::OutputDeviceGlobalData
        ] => $crate::wayland::protocols::output_configuration::OutputConfigurationState<Self>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::wayland::protocols::kwinft_output_management::zkwinft_output_device_v1::ZkwinftOutputDeviceV1: $crate::output::WeakOutput
        ] => $crate::wayland::protocols::output_configuration::OutputConfigurationState<Self>);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::wayland::protocols::kwinft_output_management::zkwinft_output_configuration_v1::ZkwinftOutputConfigurationV1: $crate::wayland::protocols::output_configuration::OutputConfiguration
        ] => $crate::wayland::protocols::output_configuration::OutputConfigurationState<Self>);
    };
}
