// SPDX-License-Identifier: GPL-3.0-only

use cosmic_output_management_config::output::comp::AdaptiveSync;
use smithay::{
    reexports::{
        wayland_protocols_wlr::output_management::v1::server::{
            zwlr_output_configuration_head_v1::{self, ZwlrOutputConfigurationHeadV1},
            zwlr_output_configuration_v1::{self, ZwlrOutputConfigurationV1},
            zwlr_output_head_v1::{self, AdaptiveSyncState, ZwlrOutputHeadV1},
            zwlr_output_manager_v1::{self, ZwlrOutputManagerV1},
            zwlr_output_mode_v1::{self, ZwlrOutputModeV1},
        },
        wayland_server::{
            backend::ClientId, protocol::wl_output, Client, DataInit, Dispatch, DisplayHandle,
            GlobalDispatch, New, Resource, WEnum,
        },
    },
    utils::{Point, Transform},
};
use tracing::{debug, error};

use crate::{
    output::{OutputChanges, OutputInner, WeakOutput},
    wayland::protocols::{
        kwinft_output_management::{
            zkwinft_output_configuration_v1::ZkwinftOutputConfigurationV1,
            zkwinft_output_device_v1::ZkwinftOutputDeviceV1,
            zkwinft_output_management_v1::ZkwinftOutputManagementV1,
        },
        output_configuration::*,
    },
};

/// Sends the static properties and the published state of an output to a
/// freshly created head.
pub(crate) fn announce_head(head: &mut OutputHeadInstance, inner: &OutputInner) {
    let metadata = &inner.metadata;
    head.obj.name(metadata.name.clone());
    head.obj.description(metadata.description.clone());
    if !(metadata.physical_size.w == 0 || metadata.physical_size.h == 0) {
        head.obj
            .physical_size(metadata.physical_size.w, metadata.physical_size.h);
    }

    if head.obj.version() >= zwlr_output_head_v1::EVT_MAKE_SINCE {
        if metadata.make != "Unknown" {
            head.obj.make(metadata.make.clone());
        }
        if metadata.model != "Unknown" {
            head.obj.model(metadata.model.clone());
        }
        if metadata.serial_number != "Unknown" {
            head.obj.serial_number(metadata.serial_number.clone());
        }
    }

    send_head_state(head, inner, OutputChanges::all());
}

/// Sends the published properties in `changes` to one head.
pub(crate) fn send_head_state(
    head: &mut OutputHeadInstance,
    inner: &OutputInner,
    mut changes: OutputChanges,
) {
    let state = &inner.published;
    // a disabled head carries no current mode, position, transform or scale
    if changes.contains(OutputChanges::ENABLED) && state.enabled {
        changes = OutputChanges::all();
    }

    if changes.contains(OutputChanges::MODES) {
        head.modes.retain(|(id, mode)| {
            let known = inner.mode(*id).is_some();
            if !known {
                mode.finished();
            }
            known
        });
        for mode in &inner.modes {
            if head.modes.iter().any(|(id, _)| *id == mode.id) {
                continue;
            }
            let Some(obj) = head.create_mode(mode) else {
                continue;
            };
            head.obj.mode(&obj);
            obj.size(mode.size.w, mode.size.h);
            if mode.refresh > 0 {
                obj.refresh(mode.refresh);
            }
            if mode.preferred {
                obj.preferred();
            }
            head.modes.push((mode.id, obj));
        }
    }

    if changes.contains(OutputChanges::ENABLED) {
        head.obj.enabled(if state.enabled { 1 } else { 0 });
    }
    if !state.enabled {
        return;
    }

    if changes.intersects(OutputChanges::MODE | OutputChanges::MODES) {
        // a mode the client released can't be named anymore
        if let Some((_, mode)) = state.mode.and_then(|current| {
            head.modes
                .iter()
                .find(|(id, mode)| *id == current && mode.is_alive())
        }) {
            head.obj.current_mode(mode);
        }
    }
    if changes.contains(OutputChanges::GEOMETRY) {
        let loc = state.geometry.loc;
        head.obj.position(loc.x.round() as i32, loc.y.round() as i32);
    }
    if changes.contains(OutputChanges::TRANSFORM) {
        head.obj.transform(state.transform.into());
    }
    if changes.contains(OutputChanges::SCALE) {
        head.obj.scale(state.client_scale);
    }
    if changes.contains(OutputChanges::ADAPTIVE_SYNC)
        && head.obj.version() >= zwlr_output_head_v1::EVT_ADAPTIVE_SYNC_SINCE
    {
        head.obj.adaptive_sync(match state.adaptive_sync {
            AdaptiveSync::Enabled => zwlr_output_head_v1::AdaptiveSyncState::Enabled,
            AdaptiveSync::Disabled => zwlr_output_head_v1::AdaptiveSyncState::Disabled,
        });
    }
}

fn transform_from_wire(
    transform: WEnum<wl_output::Transform>,
) -> Result<Transform, ChangesetError> {
    match transform {
        WEnum::Value(transform) => Ok(transform.into()),
        WEnum::Unknown(value) => Err(ChangesetError::InvalidTransform(value)),
    }
}

fn adaptive_sync_from_wire(state: WEnum<AdaptiveSyncState>) -> Result<AdaptiveSync, ChangesetError> {
    match state {
        WEnum::Value(AdaptiveSyncState::Enabled) => Ok(AdaptiveSync::Enabled),
        WEnum::Value(AdaptiveSyncState::Disabled) => Ok(AdaptiveSync::Disabled),
        WEnum::Value(state) => Err(ChangesetError::InvalidAdaptiveSync(state.into())),
        WEnum::Unknown(value) => Err(ChangesetError::InvalidAdaptiveSync(value)),
    }
}

impl<D> GlobalDispatch<ZwlrOutputManagerV1, OutputMngrGlobalData, D> for OutputConfigurationState<D>
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
        state: &mut D,
        dh: &DisplayHandle,
        _client: &Client,
        resource: New<ZwlrOutputManagerV1>,
        _global_data: &OutputMngrGlobalData,
        data_init: &mut DataInit<'_, D>,
    ) {
        let instance = OutputMngrInstance {
            obj: data_init.init(resource, ()),
            finished: false,
        };

        let mngr_state = state.output_configuration_state();
        for output in &mngr_state.outputs {
            send_head_to_client::<D>(dh, &instance.obj, output);
        }
        instance.obj.done(mngr_state.registry.serial());
        mngr_state.instances.push(instance);
    }

    fn can_view(client: Client, global_data: &OutputMngrGlobalData) -> bool {
        (global_data.filter)(&client)
    }
}

impl<D> Dispatch<ZwlrOutputManagerV1, (), D> for OutputConfigurationState<D>
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
        obj: &ZwlrOutputManagerV1,
        request: zwlr_output_manager_v1::Request,
        _data: &(),
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            zwlr_output_manager_v1::Request::CreateConfiguration { id, serial } => {
                let conf = OutputConfiguration::new(Protocol::Wlr, serial);
                let conf_obj = data_init.init(id, conf.clone());
                conf.attach(ConfigurationResource::Wlr(conf_obj));

                let state = state.output_configuration_state();
                if state.global.is_none() {
                    conf.detach();
                } else if serial != state.registry.serial() {
                    debug!(
                        serial,
                        current = state.registry.serial(),
                        "Output configuration created against an outdated serial"
                    );
                    conf.cancel();
                } else {
                    state.registry.track(&conf);
                }
            }
            zwlr_output_manager_v1::Request::Stop => {
                let state = state.output_configuration_state();
                if state
                    .instances
                    .iter()
                    .any(|instance| instance.obj == *obj && !instance.finished)
                {
                    obj.finished();
                }
                state.remove_instance(obj);
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut D,
        _client: ClientId,
        obj: &ZwlrOutputManagerV1,
        _data: &(),
    ) {
        state.output_configuration_state().remove_instance(obj);
    }
}

impl<D> Dispatch<ZwlrOutputHeadV1, WeakOutput, D> for OutputConfigurationState<D>
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
        _obj: &ZwlrOutputHeadV1,
        request: zwlr_output_head_v1::Request,
        _data: &WeakOutput,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            // handled in `destroyed`
            zwlr_output_head_v1::Request::Release => {}
            _ => {}
        }
    }

    fn destroyed(
        _state: &mut D,
        _client: ClientId,
        obj: &ZwlrOutputHeadV1,
        data: &WeakOutput,
    ) {
        if let Some(output) = data.upgrade() {
            output.remove_head(obj);
        }
    }
}

impl<D> Dispatch<ZwlrOutputModeV1, OutputModeData, D> for OutputConfigurationState<D>
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
        _obj: &ZwlrOutputModeV1,
        request: zwlr_output_mode_v1::Request,
        _data: &OutputModeData,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            // the head keeps the released mode, so it isn't announced again
            zwlr_output_mode_v1::Request::Release => {}
            _ => {}
        }
    }
}

impl<D> Dispatch<ZwlrOutputConfigurationV1, OutputConfiguration, D> for OutputConfigurationState<D>
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
        obj: &ZwlrOutputConfigurationV1,
        request: zwlr_output_configuration_v1::Request,
        data: &OutputConfiguration,
        _dh: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            zwlr_output_configuration_v1::Request::EnableHead { id, head } => {
                let Some(output) = head.data::<WeakOutput>().cloned() else {
                    error!("{:?} carries no output", head);
                    return;
                };
                data_init.init(
                    id,
                    ConfigurationHeadData {
                        configuration: data.clone(),
                        output: output.clone(),
                    },
                );
                configure_head(obj, data, &output, true);
            }
            zwlr_output_configuration_v1::Request::DisableHead { head } => {
                let Some(output) = head.data::<WeakOutput>() else {
                    error!("{:?} carries no output", head);
                    return;
                };
                configure_head(obj, data, output, false);
            }
            x @ zwlr_output_configuration_v1::Request::Apply
            | x @ zwlr_output_configuration_v1::Request::Test => {
                let kind = if matches!(x, zwlr_output_configuration_v1::Request::Test) {
                    Submit::Test
                } else {
                    Submit::Apply
                };

                match state.output_configuration_state().submit(data, kind) {
                    Ok(SubmitOutcome::Proceed) => match kind {
                        Submit::Apply => state.apply_configuration(data.clone()),
                        Submit::Test => state.test_configuration(data.clone()),
                    },
                    Ok(SubmitOutcome::Resolved) => {}
                    Err(err) => obj.post_error(err.code(), err.to_string()),
                }
            }
            zwlr_output_configuration_v1::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut D,
        _client: ClientId,
        _obj: &ZwlrOutputConfigurationV1,
        data: &OutputConfiguration,
    ) {
        data.release_resource();
        state.output_configuration_state().registry.untrack(data);
    }
}

fn configure_head(
    obj: &ZwlrOutputConfigurationV1,
    conf: &OutputConfiguration,
    output: &WeakOutput,
    enabled: bool,
) {
    if conf.is_used() {
        // in flight while the configuration got cancelled
        debug!("Ignoring head configuration of a used output configuration");
        return;
    }
    if let Err(err) = conf.configure_head(output, enabled) {
        obj.post_error(err.code(), err.to_string());
    }
}

impl<D> Dispatch<ZwlrOutputConfigurationHeadV1, ConfigurationHeadData, D>
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
        _state: &mut D,
        _client: &Client,
        obj: &ZwlrOutputConfigurationHeadV1,
        request: zwlr_output_configuration_head_v1::Request,
        data: &ConfigurationHeadData,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        if data.configuration.is_used() {
            debug!("Ignoring {:?} of a used output configuration", request);
            return;
        }

        let result = data
            .configuration
            .with_changeset(&data.output, |changeset| match request {
                zwlr_output_configuration_head_v1::Request::SetMode { mode } => {
                    let mode_data = mode.data::<OutputModeData>();
                    match mode_data.filter(|mode| mode.output == data.output) {
                        Some(mode) => changeset.set_mode(mode.mode.id),
                        None => Err(ChangesetError::UnknownMode(
                            mode_data.map_or(-1, |mode| mode.mode.id),
                        )),
                    }
                }
                zwlr_output_configuration_head_v1::Request::SetCustomMode {
                    width,
                    height,
                    refresh,
                } => changeset.set_custom_mode(width, height, refresh),
                zwlr_output_configuration_head_v1::Request::SetPosition { x, y } => {
                    changeset.set_position(Point::from((x, y)))
                }
                zwlr_output_configuration_head_v1::Request::SetTransform { transform } => {
                    transform_from_wire(transform)
                        .and_then(|transform| changeset.set_transform(transform))
                }
                zwlr_output_configuration_head_v1::Request::SetScale { scale } => {
                    changeset.set_scale(scale)
                }
                zwlr_output_configuration_head_v1::Request::SetAdaptiveSync { state } => {
                    adaptive_sync_from_wire(state)
                        .and_then(|state| changeset.set_adaptive_sync(state))
                }
                _ => Ok(()),
            });

        if let Err(err) = result {
            obj.post_error(err.code(), err.to_string());
        }
    }
}
