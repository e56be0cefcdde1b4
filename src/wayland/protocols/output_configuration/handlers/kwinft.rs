// SPDX-License-Identifier: GPL-3.0-only

use smithay::{
    reexports::{
        wayland_protocols_wlr::output_management::v1::server::{
            zwlr_output_configuration_head_v1::ZwlrOutputConfigurationHeadV1,
            zwlr_output_configuration_v1::ZwlrOutputConfigurationV1,
            zwlr_output_head_v1::ZwlrOutputHeadV1, zwlr_output_manager_v1::ZwlrOutputManagerV1,
            zwlr_output_mode_v1::ZwlrOutputModeV1,
        },
        wayland_server::{
            backend::ClientId, Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New,
            Resource,
        },
    },
    utils::{Point, Rectangle, Size},
};
use tracing::warn;

use crate::{
    output::{OutputChanges, OutputInner, WeakOutput},
    wayland::protocols::{
        kwinft_output_management::{
            zkwinft_output_configuration_v1::{self, ZkwinftOutputConfigurationV1},
            zkwinft_output_device_v1::{self, ModeFlags, ZkwinftOutputDeviceV1},
            zkwinft_output_management_v1::{self, ZkwinftOutputManagementV1},
        },
        output_configuration::*,
    },
};

fn send_device_info(device: &ZkwinftOutputDeviceV1, inner: &OutputInner) {
    let metadata = &inner.metadata;
    device.info(
        metadata.name.clone(),
        metadata.description.clone(),
        metadata.make.clone(),
        metadata.model.clone(),
        metadata.serial_number.clone(),
        metadata.physical_size.w,
        metadata.physical_size.h,
    );
    send_device_state(device, inner, OutputChanges::all());
}

/// Sends the published properties in `changes` to one device, followed by
/// `done`.
pub(crate) fn send_device_state(
    device: &ZkwinftOutputDeviceV1,
    inner: &OutputInner,
    changes: OutputChanges,
) {
    let state = &inner.published;

    // the current flag lives on the modes, so a mode switch resends all of them
    if changes.intersects(OutputChanges::MODES | OutputChanges::MODE) {
        for mode in &inner.modes {
            let mut flags = ModeFlags::empty();
            flags.set(ModeFlags::Current, state.mode == Some(mode.id));
            flags.set(ModeFlags::Preferred, mode.preferred);
            device.mode(flags, mode.size.w, mode.size.h, mode.refresh, mode.id);
        }
    }
    if changes.contains(OutputChanges::ENABLED) {
        device.enabled(if state.enabled { 1 } else { 0 });
    }
    if changes.contains(OutputChanges::TRANSFORM) {
        device.transform(state.transform.into());
    }
    if changes.contains(OutputChanges::GEOMETRY) {
        let geometry = state.geometry;
        device.geometry(
            geometry.loc.x,
            geometry.loc.y,
            geometry.size.w,
            geometry.size.h,
        );
    }
    device.done();
}

impl<D> GlobalDispatch<ZkwinftOutputManagementV1, OutputMngrGlobalData, D>
    for OutputConfigurationState<D>
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
    fn bind(
        _state: &mut D,
        _dh: &DisplayHandle,
        _client: &Client,
        resource: New<ZkwinftOutputManagementV1>,
        _global_data: &OutputMngrGlobalData,
        data_init: &mut DataInit<'_, D>,
    ) {
        data_init.init(resource, ());
    }

    fn can_view(client: Client, global_data: &OutputMngrGlobalData) -> bool {
        (global_data.filter)(&client)
    }
}

impl<D> Dispatch<ZkwinftOutputManagementV1, (), D> for OutputConfigurationState<D>
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
    fn request(
        state: &mut D,
        _client: &Client,
        _obj: &ZkwinftOutputManagementV1,
        request: zkwinft_output_management_v1::Request,
        _data: &(),
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            zkwinft_output_management_v1::Request::CreateConfiguration { id } => {
                let state = state.output_configuration_state();
                let conf = OutputConfiguration::new(Protocol::Kwinft, state.registry.serial());
                let conf_obj = data_init.init(id, conf.clone());
                conf.attach(ConfigurationResource::Kwinft(conf_obj));

                if state.legacy_global.is_none() {
                    conf.detach();
                } else {
                    state.registry.track(&conf);
                }
            }
            _ => {}
        }
    }
}

impl<D> GlobalDispatch<ZkwinftOutputDeviceV1, OutputDeviceGlobalData, D>
    for OutputConfigurationState<D>
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
    fn bind(
        _state: &mut D,
        _dh: &DisplayHandle,
        _client: &Client,
        resource: New<ZkwinftOutputDeviceV1>,
        global_data: &OutputDeviceGlobalData,
        data_init: &mut DataInit<'_, D>,
    ) {
        let device = data_init.init(resource, global_data.output.clone());
        let Some(output) = global_data.output.upgrade() else {
            return;
        };
        {
            let inner = output.inner();
            send_device_info(&device, &inner);
        }
        output.add_device(device);
    }

    fn can_view(client: Client, global_data: &OutputDeviceGlobalData) -> bool {
        (global_data.filter)(&client)
    }
}

impl<D> Dispatch<ZkwinftOutputDeviceV1, WeakOutput, D> for OutputConfigurationState<D>
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
    fn request(
        _state: &mut D,
        _client: &Client,
        _obj: &ZkwinftOutputDeviceV1,
        _request: zkwinft_output_device_v1::Request,
        _data: &WeakOutput,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
    }

    fn destroyed(
        _state: &mut D,
        _client: ClientId,
        obj: &ZkwinftOutputDeviceV1,
        data: &WeakOutput,
    ) {
        if let Some(output) = data.upgrade() {
            output.remove_device(obj);
        }
    }
}

impl<D> Dispatch<ZkwinftOutputConfigurationV1, OutputConfiguration, D>
    for OutputConfigurationState<D>
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
    fn request(
        state: &mut D,
        _client: &Client,
        _obj: &ZkwinftOutputConfigurationV1,
        request: zkwinft_output_configuration_v1::Request,
        data: &OutputConfiguration,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        use zkwinft_output_configuration_v1::Request;

        if data.is_used() && !matches!(request, Request::Destroy) {
            warn!(?request, "Output configuration was used already, ignoring");
            return;
        }

        match request {
            Request::Enable {
                outputdevice,
                enable,
            } => {
                let Some(output) = outputdevice.data::<WeakOutput>() else {
                    return;
                };
                data.with_changeset(output, |changeset| changeset.set_enabled(enable != 0));
            }
            Request::Mode {
                outputdevice,
                mode_id,
            } => {
                let Some(output) = outputdevice.data::<WeakOutput>() else {
                    return;
                };
                let known = output
                    .upgrade()
                    .is_some_and(|output| output.mode(mode_id).is_some());
                if !known {
                    warn!(mode_id, "Client requested an unknown output mode, ignoring");
                    return;
                }
                if let Err(err) = data.with_changeset(output, |changeset| changeset.set_mode(mode_id))
                {
                    warn!(?err, "Failed to set output mode");
                }
            }
            Request::Transform {
                outputdevice,
                transform,
            } => {
                let Some(output) = outputdevice.data::<WeakOutput>() else {
                    return;
                };
                let transform = match transform.into_result() {
                    Ok(transform) => transform,
                    Err(err) => {
                        warn!(%err, "Client requested an invalid output transform, ignoring");
                        return;
                    }
                };
                if let Err(err) = data.with_changeset(output, |changeset| {
                    changeset.set_transform(transform.into())
                }) {
                    warn!(?err, "Failed to set output transform");
                }
            }
            Request::Geometry {
                outputdevice,
                x,
                y,
                width,
                height,
            } => {
                let Some(output) = outputdevice.data::<WeakOutput>() else {
                    return;
                };
                if !(width >= 0.0 && height >= 0.0) {
                    warn!(width, height, "Client requested an invalid output size, ignoring");
                    return;
                }
                let geometry = Rectangle {
                    loc: Point::from((x, y)),
                    size: Size::from((width, height)),
                };
                if let Err(err) =
                    data.with_changeset(output, |changeset| changeset.set_geometry(geometry))
                {
                    warn!(?err, "Failed to set output geometry");
                }
            }
            Request::Apply => match state.output_configuration_state().submit(data, Submit::Apply) {
                Ok(SubmitOutcome::Proceed) => state.apply_configuration(data.clone()),
                Ok(SubmitOutcome::Resolved) => {}
                Err(err) => warn!(?err, "Rejecting output configuration"),
            },
            Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut D,
        _client: ClientId,
        _obj: &ZkwinftOutputConfigurationV1,
        data: &OutputConfiguration,
    ) {
        data.release_resource();
        state.output_configuration_state().registry.untrack(data);
    }
}
