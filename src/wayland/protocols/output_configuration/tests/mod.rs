// SPDX-License-Identifier: GPL-3.0-only

use calloop::EventLoop;
use smithay::{
    reexports::wayland_server::{backend::ClientData, Display},
    utils::{Point, Rectangle, Size, Transform},
};
use std::{os::unix::net::UnixStream, sync::Arc, time::Duration};
use wayland_client::{backend::ObjectId, protocol::wl_output, Proxy};
use wayland_protocols_wlr::output_management::v1::client::{
    zwlr_output_configuration_head_v1::{self, ZwlrOutputConfigurationHeadV1},
    zwlr_output_configuration_v1::{self, ZwlrOutputConfigurationV1},
    zwlr_output_head_v1::{AdaptiveSyncState, ZwlrOutputHeadV1},
    zwlr_output_manager_v1::ZwlrOutputManagerV1,
};

use super::*;
use crate::{
    output::{Mode, Output, OutputMetadata, OutputState},
    wayland::protocols::kwinft_output_management::client::zkwinft_output_device_v1::{
        ModeFlags, ZkwinftOutputDeviceV1,
    },
};


use self::client::{ConfigurationResult, LegacyResult, TestClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Apply,
    Fail,
    /// Leave the configuration submitted, the test answers it.
    Defer,
}

struct TestState {
    output_configuration_state: OutputConfigurationState<TestState>,
    answer: Answer,
    tested: Vec<OutputConfiguration>,
    applied: Vec<OutputConfiguration>,
}

struct TestClientData;

impl ClientData for TestClientData {}

/// Outputs may not be placed at negative coordinates.
fn acceptable(conf: &OutputConfiguration) -> bool {
    conf.changesets().iter().all(|changeset| {
        let loc = changeset.geometry().loc;
        loc.x >= 0.0 && loc.y >= 0.0
    })
}

fn commit(conf: &OutputConfiguration) {
    for changeset in conf.changesets() {
        let Some(output) = changeset.output() else {
            continue;
        };
        let mut state = changeset.state().clone();
        if let Some(ModeConfiguration::Custom { size, refresh }) = changeset.mode_configuration() {
            let id = output.modes().iter().map(|mode| mode.id + 1).max().unwrap_or(0);
            output.add_mode(Mode {
                size,
                refresh: refresh.unwrap_or(60_000),
                preferred: false,
                id,
            });
            state.mode = Some(id);
        }
        output.set_state(state);
        output.done();
    }
}

impl TestState {
    fn finish(&mut self, conf: &OutputConfiguration) {
        if !acceptable(conf) {
            conf.set_failed();
            return;
        }
        commit(conf);
        conf.set_applied();
        self.output_configuration_state.done();
    }
}

impl OutputConfigurationHandler for TestState {
    fn output_configuration_state(&mut self) -> &mut OutputConfigurationState<Self> {
        &mut self.output_configuration_state
    }

    fn test_configuration(&mut self, conf: OutputConfiguration) {
        self.tested.push(conf.clone());
        if self.answer != Answer::Fail && acceptable(&conf) {
            conf.set_applied();
        } else {
            conf.set_failed();
        }
    }

    fn apply_configuration(&mut self, conf: OutputConfiguration) {
        self.applied.push(conf.clone());
        match self.answer {
            Answer::Apply => self.finish(&conf),
            Answer::Fail => conf.set_failed(),
            Answer::Defer => {}
        }
    }
}

crate::delegate_output_configuration!(TestState);

struct Fixture {
    event_loop: EventLoop<'static, TestState>,
    display: Display<TestState>,
    state: TestState,
}

impl Fixture {
    fn new() -> Fixture {
        Fixture::with_filter(|_: &Client| true)
    }

    fn with_filter<F>(filter: F) -> Fixture
    where
        F: for<'a> Fn(&'a Client) -> bool + Send + Sync + 'static,
    {
        let event_loop = EventLoop::try_new().unwrap();
        let display = Display::new().unwrap();
        let output_configuration_state =
            OutputConfigurationState::new(&display.handle(), event_loop.handle(), filter);
        Fixture {
            event_loop,
            display,
            state: TestState {
                output_configuration_state,
                answer: Answer::Apply,
                tested: Vec::new(),
                applied: Vec::new(),
            },
        }
    }

    /// Runs pending timers, then handles and answers every client request.
    fn roundtrip(&mut self) {
        self.event_loop
            .dispatch(Some(Duration::ZERO), &mut self.state)
            .unwrap();
        self.display.dispatch_clients(&mut self.state).unwrap();
        self.display.flush_clients().unwrap();
    }

    fn add_output(&mut self, output: &Output) {
        self.state
            .output_configuration_state
            .add_heads(std::iter::once(output));
        self.state.output_configuration_state.done();
    }

    fn remove_output(&mut self, output: &Output) {
        self.state
            .output_configuration_state
            .remove_heads(std::iter::once(output));
        self.state.output_configuration_state.done();
    }

    fn connect(&mut self) -> TestClient {
        let (client_stream, server_stream) = UnixStream::pair().unwrap();
        client_stream.set_nonblocking(true).unwrap();
        server_stream.set_nonblocking(true).unwrap();
        self.display
            .handle()
            .insert_client(server_stream, Arc::new(TestClientData))
            .unwrap();
        let mut client = TestClient::new(client_stream);
        self.sync(&mut client);
        client
    }

    fn bind_wlr(&mut self, version: u32) -> TestClient {
        let mut client = self.connect();
        client.bind_manager(version).unwrap();
        self.sync(&mut client);
        client
    }

    fn bind_legacy(&mut self) -> TestClient {
        let mut client = self.connect();
        client.bind_management().unwrap();
        self.sync(&mut client);
        client
    }

    /// Waits until the server has handled everything `client` sent so far and
    /// the client has seen the answers. Returns the objects that received
    /// events, in order.
    fn sync(&mut self, client: &mut TestClient) -> Vec<ObjectId> {
        client.request_sync();
        for _ in 0..16 {
            self.roundtrip();
            client.read_events();
            if client.is_synced() || client.protocol_error().is_some() {
                break;
            }
        }
        std::mem::take(&mut client.state.events)
    }
}

/// An enabled output showing its second mode, placed at `x`.
fn test_output(name: &str, x: i32) -> Output {
    let output = Output::new(OutputMetadata {
        name: name.to_string(),
        description: format!("{name} test output"),
        make: String::from("Generic"),
        model: String::from("Panel"),
        physical_size: Size::from((520, 290)),
        ..Default::default()
    });
    output.add_mode(Mode {
        size: Size::from((800, 600)),
        refresh: 60_000,
        preferred: true,
        id: 0,
    });
    output.add_mode(Mode {
        size: Size::from((1024, 768)),
        refresh: 60_000,
        preferred: false,
        id: 1,
    });
    output.set_state(OutputState {
        enabled: true,
        mode: Some(1),
        geometry: Rectangle {
            loc: Point::from((x as f64, 0.0)),
            size: Size::from((1024.0, 768.0)),
        },
        ..Default::default()
    });
    output.done();
    output
}

type HeadRequest = fn(&TestClient, &ZwlrOutputConfigurationHeadV1);

fn wlr_error(client: &TestClient) -> Option<(String, u32)> {
    client
        .protocol_error()
        .map(|err| (err.object_interface, err.code))
}

#[test]
fn bind_announces_outputs() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);

    let client = fixture.bind_wlr(4);
    assert_eq!(
        client.state.serial,
        Some(fixture.state.output_configuration_state.serial())
    );

    let head = client.state.head_by_name("DP-1").unwrap();
    let info = client.state.head(&head);
    assert_eq!(info.description, "DP-1 test output");
    assert_eq!(info.physical_size, Some((520, 290)));
    assert_eq!(info.make.as_deref(), Some("Generic"));
    assert_eq!(info.serial_number, None);
    assert!(info.enabled);
    assert_eq!(info.modes.len(), 2);
    assert_eq!(info.current_mode, client.state.mode_by_size(&head, (1024, 768)));
    assert_eq!(info.position, Some((0, 0)));
    assert_eq!(info.transform, Some(wl_output::Transform::Normal));
    assert_eq!(info.scale, Some(1.0));
    assert_eq!(info.adaptive_sync, Some(AdaptiveSyncState::Disabled));

    let preferred = client.state.mode_by_size(&head, (800, 600)).unwrap();
    assert!(client.state.mode(&preferred).preferred);
    assert_eq!(client.state.mode(&preferred).refresh, Some(60_000));
}

#[test]
fn old_versions_miss_newer_head_events() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));

    let client = fixture.bind_wlr(1);
    let head = client.state.head_by_name("DP-1").unwrap();
    assert_eq!(client.state.head(&head).make, None);
    assert_eq!(client.state.head(&head).adaptive_sync, None);
    assert!(client.state.head(&head).scale.is_some());
}

#[test]
fn new_heads_are_announced_with_done() {
    let mut fixture = Fixture::new();
    let mut client = fixture.bind_wlr(4);
    assert_eq!(client.state.live_heads().count(), 0);
    let serial = client.state.serial.unwrap();

    fixture.add_output(&test_output("DP-1", 0));
    fixture.sync(&mut client);
    assert!(client.state.head_by_name("DP-1").is_some());
    assert_eq!(client.state.serial, Some(serial.wrapping_add(1)));

    // nothing changed, no new serial
    fixture.state.output_configuration_state.done();
    let events = fixture.sync(&mut client);
    assert!(events.is_empty());
}

#[test]
fn apply_mode_change() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);
    let mut client = fixture.bind_wlr(4);
    let serial = client.state.serial.unwrap();

    let head = client.state.head_by_name("DP-1").unwrap();
    let mode = client.state.mode_by_size(&head, (800, 600)).unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head).set_mode(&mode);
    conf.apply();
    fixture.sync(&mut client);

    assert_eq!(client.state.results(&conf), [ConfigurationResult::Succeeded]);
    assert_eq!(client.state.head(&head).current_mode, Some(mode));
    assert_eq!(client.state.serial, Some(serial.wrapping_add(1)));
    assert_eq!(output.published_state().mode, Some(0));
    assert_eq!(
        output.published_state().geometry.size,
        Size::from((800.0, 600.0))
    );
    assert_eq!(fixture.state.applied.len(), 1);
    assert!(fixture.state.applied[0].changesets().is_empty());
    assert_eq!(fixture.state.applied[0].phase(), ConfigurationPhase::Succeeded);
}

#[test]
fn unconfigured_head_is_a_protocol_error() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    fixture.add_output(&test_output("HDMI-A-1", 1024));
    let mut client = fixture.bind_wlr(4);

    let head = client.state.head_by_name("DP-1").unwrap();
    let conf = client.create_configuration();
    conf.disable_head(&head);
    conf.apply();
    fixture.sync(&mut client);

    assert_eq!(
        wlr_error(&client),
        Some((
            ZwlrOutputConfigurationV1::interface().name.to_string(),
            u32::from(zwlr_output_configuration_v1::Error::UnconfiguredHead)
        ))
    );
    assert!(fixture.state.applied.is_empty());
    assert!(client.state.results(&conf).is_empty());
}

#[test]
fn topology_change_cancels_unused_configurations() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    let mut client = fixture.bind_wlr(4);

    let head = client.state.head_by_name("DP-1").unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head);
    fixture.sync(&mut client);

    fixture.add_output(&test_output("HDMI-A-1", 1024));
    fixture.sync(&mut client);
    assert_eq!(client.state.results(&conf), [ConfigurationResult::Cancelled]);

    conf.apply();
    fixture.sync(&mut client);
    assert_eq!(
        client.error_code(),
        Some(u32::from(zwlr_output_configuration_v1::Error::AlreadyUsed))
    );
    assert!(fixture.state.applied.is_empty());
    assert_eq!(client.state.results(&conf).len(), 1);
}

#[test]
fn outdated_serial_cancels() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    let mut client = fixture.bind_wlr(4);

    let head = client.state.head_by_name("DP-1").unwrap();
    let serial = client.state.serial.unwrap().wrapping_sub(1);
    let conf = client.create_configuration_with_serial(serial);
    client.enable_head(&conf, &head);
    fixture.sync(&mut client);
    assert_eq!(client.state.results(&conf), [ConfigurationResult::Cancelled]);
    assert!(client.protocol_error().is_none());
    assert_eq!(
        fixture
            .state
            .output_configuration_state
            .registry()
            .outstanding()
            .count(),
        0
    );
}

#[test]
fn published_changes_race_an_apply() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);
    let mut client = fixture.bind_wlr(4);

    let head = client.state.head_by_name("DP-1").unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head).set_position(100, 0);
    fixture.sync(&mut client);

    // the compositor changes the output, the client has not seen `done` yet
    let mut state = output.get_state();
    state.transform = Transform::_90;
    output.set_state(state);
    output.done();

    conf.apply();
    fixture.sync(&mut client);
    assert_eq!(client.state.results(&conf), [ConfigurationResult::Cancelled]);
    assert!(fixture.state.applied.is_empty());
    assert_eq!(output.published_state().geometry.loc, Point::from((0.0, 0.0)));

    fixture.state.output_configuration_state.done();
    fixture.sync(&mut client);
    assert_eq!(
        client.state.head(&head).transform,
        Some(wl_output::Transform::_90)
    );
}

#[test]
fn failed_configuration_keeps_state() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);
    let mut client = fixture.bind_wlr(4);
    let before = output.published_state();

    let head = client.state.head_by_name("DP-1").unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head).set_position(-1, -1);
    conf.apply();
    fixture.sync(&mut client);

    assert_eq!(client.state.results(&conf), [ConfigurationResult::Failed]);
    assert_eq!(output.published_state(), before);
    assert_eq!(client.state.head(&head).position, Some((0, 0)));
    assert_eq!(fixture.state.applied[0].phase(), ConfigurationPhase::Failed);
}

#[test]
fn test_does_not_touch_outputs() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);
    let mut client = fixture.bind_wlr(4);
    let serial = client.state.serial;

    let head = client.state.head_by_name("DP-1").unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head).set_scale(2.0);
    conf.test();
    fixture.sync(&mut client);

    assert_eq!(client.state.results(&conf), [ConfigurationResult::Succeeded]);
    assert_eq!(fixture.state.tested.len(), 1);
    assert!(fixture.state.applied.is_empty());
    assert_eq!(output.published_state().client_scale, 1.0);
    assert_eq!(client.state.serial, serial);
}

#[test]
fn rejected_test() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    fixture.state.answer = Answer::Fail;
    let mut client = fixture.bind_wlr(4);

    let head = client.state.head_by_name("DP-1").unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head);
    conf.test();
    fixture.sync(&mut client);

    assert_eq!(client.state.results(&conf), [ConfigurationResult::Failed]);
    assert_eq!(fixture.state.tested[0].phase(), ConfigurationPhase::Failed);
}

#[test]
fn configurations_are_used_once() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    let mut client = fixture.bind_wlr(4);

    let head = client.state.head_by_name("DP-1").unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head);
    conf.test();
    fixture.sync(&mut client);
    assert_eq!(client.state.results(&conf), [ConfigurationResult::Succeeded]);

    conf.apply();
    fixture.sync(&mut client);
    assert_eq!(
        client.error_code(),
        Some(u32::from(zwlr_output_configuration_v1::Error::AlreadyUsed))
    );
    assert!(fixture.state.applied.is_empty());
}

#[test]
fn heads_are_configured_once() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));

    let first: [fn(&TestClient, &ZwlrOutputConfigurationV1, &ZwlrOutputHeadV1); 2] = [
        |client, conf, head| {
            client.enable_head(conf, head);
        },
        |_, conf, head| conf.disable_head(head),
    ];
    for configure in first {
        for enable_again in [true, false] {
            let mut client = fixture.bind_wlr(4);
            let head = client.state.head_by_name("DP-1").unwrap();
            let conf = client.create_configuration();
            configure(&client, &conf, &head);
            if enable_again {
                client.enable_head(&conf, &head);
            } else {
                conf.disable_head(&head);
            }
            conf.apply();
            fixture.sync(&mut client);

            assert_eq!(
                client.error_code(),
                Some(u32::from(
                    zwlr_output_configuration_v1::Error::AlreadyConfiguredHead
                ))
            );
            assert!(client.state.results(&conf).is_empty());
        }
    }
    assert!(fixture.state.applied.is_empty());
}

#[test]
fn invalid_head_properties() {
    use zwlr_output_configuration_head_v1::Error;

    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    fixture.add_output(&test_output("HDMI-A-1", 1024));

    let cases: [(Error, HeadRequest); 5] = [
        (Error::AlreadySet, |_, conf_head| {
            conf_head.set_scale(2.0);
            conf_head.set_scale(1.0);
        }),
        (Error::AlreadySet, |_, conf_head| {
            conf_head.set_adaptive_sync(AdaptiveSyncState::Enabled);
            conf_head.set_adaptive_sync(AdaptiveSyncState::Disabled);
        }),
        (Error::InvalidScale, |_, conf_head| conf_head.set_scale(0.0)),
        (Error::InvalidCustomMode, |_, conf_head| {
            conf_head.set_custom_mode(0, 720, 0)
        }),
        (Error::InvalidMode, |client, conf_head| {
            let other = client.state.head_by_name("HDMI-A-1").unwrap();
            let mode = client.state.mode_by_size(&other, (800, 600)).unwrap();
            conf_head.set_mode(&mode);
        }),
    ];

    for (expected, request) in cases {
        let mut client = fixture.bind_wlr(4);
        let head = client.state.head_by_name("DP-1").unwrap();
        let conf = client.create_configuration();
        let conf_head = client.enable_head(&conf, &head);
        request(&client, &conf_head);
        fixture.sync(&mut client);

        let err = client.protocol_error().unwrap();
        assert_eq!(
            err.object_interface,
            ZwlrOutputConfigurationHeadV1::interface().name
        );
        assert_eq!(err.code, u32::from(expected), "{}", err.message);
    }
    assert!(fixture.state.applied.is_empty());
}

#[test]
fn custom_mode_announces_new_mode() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);
    let mut client = fixture.bind_wlr(4);

    let head = client.state.head_by_name("DP-1").unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head).set_custom_mode(1280, 720, 0);
    conf.apply();
    fixture.sync(&mut client);

    assert_eq!(client.state.results(&conf), [ConfigurationResult::Succeeded]);
    let mode = client.state.mode_by_size(&head, (1280, 720)).unwrap();
    assert_eq!(client.state.head(&head).modes.len(), 3);
    assert_eq!(client.state.head(&head).current_mode, Some(mode.clone()));
    assert_eq!(client.state.mode(&mode).refresh, Some(60_000));
    assert_eq!(
        output.current_mode().map(|mode| mode.size),
        Some(Size::from((1280, 720)))
    );
}

#[test]
fn released_current_mode_is_not_announced() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);
    let mut client = fixture.bind_wlr(4);
    let serial = client.state.serial.unwrap();

    let head = client.state.head_by_name("DP-1").unwrap();
    let mode = client.state.mode_by_size(&head, (800, 600)).unwrap();
    mode.release();
    fixture.sync(&mut client);
    let announced = client.state.head(&head).current_mode_events;

    let mut state = output.get_state();
    state.mode = Some(0);
    output.set_state(state);
    output.done();
    fixture.state.output_configuration_state.done();
    fixture.sync(&mut client);

    assert!(client.protocol_error().is_none());
    assert_eq!(client.state.head(&head).current_mode_events, announced);
    assert_eq!(client.state.serial, Some(serial.wrapping_add(1)));
    assert_eq!(output.published_state().mode, Some(0));
}

#[test]
fn disable_head() {
    let mut fixture = Fixture::new();
    let dp = test_output("DP-1", 0);
    let hdmi = test_output("HDMI-A-1", 1024);
    fixture.add_output(&dp);
    fixture.add_output(&hdmi);
    let mut client = fixture.bind_wlr(4);

    let dp_head = client.state.head_by_name("DP-1").unwrap();
    let hdmi_head = client.state.head_by_name("HDMI-A-1").unwrap();
    let conf = client.create_configuration();
    conf.disable_head(&dp_head);
    client.enable_head(&conf, &hdmi_head).set_position(0, 0);
    conf.apply();
    fixture.sync(&mut client);

    assert_eq!(client.state.results(&conf), [ConfigurationResult::Succeeded]);
    assert!(!client.state.head(&dp_head).enabled);
    assert!(client.state.head(&hdmi_head).enabled);
    assert_eq!(client.state.head(&hdmi_head).position, Some((0, 0)));
    assert!(!dp.published_state().enabled);
}

#[test]
fn submitted_configurations_survive_topology_changes() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    fixture.state.answer = Answer::Defer;
    let mut client = fixture.bind_wlr(4);

    let head = client.state.head_by_name("DP-1").unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head);
    conf.apply();
    fixture.sync(&mut client);
    assert!(client.state.results(&conf).is_empty());
    assert_eq!(
        fixture.state.applied[0].phase(),
        ConfigurationPhase::Submitted(Submit::Apply)
    );

    fixture.add_output(&test_output("HDMI-A-1", 1024));
    fixture.sync(&mut client);
    assert!(client.state.results(&conf).is_empty());

    let submitted = fixture.state.applied[0].clone();
    fixture.state.finish(&submitted);
    fixture.sync(&mut client);
    assert_eq!(client.state.results(&conf), [ConfigurationResult::Succeeded]);

    // only the first answer counts
    submitted.set_failed();
    fixture.sync(&mut client);
    assert_eq!(client.state.results(&conf), [ConfigurationResult::Succeeded]);
    assert_eq!(submitted.phase(), ConfigurationPhase::Succeeded);
}

#[test]
fn other_clients_configurations_are_cancelled_by_an_apply() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    let mut client_a = fixture.bind_wlr(4);
    let mut client_b = fixture.bind_wlr(4);

    let head_b = client_b.state.head_by_name("DP-1").unwrap();
    let conf_b = client_b.create_configuration();
    client_b.enable_head(&conf_b, &head_b);
    fixture.sync(&mut client_b);

    let head_a = client_a.state.head_by_name("DP-1").unwrap();
    let conf_a = client_a.create_configuration();
    client_a
        .enable_head(&conf_a, &head_a)
        .set_transform(wl_output::Transform::_180);
    conf_a.apply();
    fixture.sync(&mut client_a);
    assert_eq!(
        client_a.state.results(&conf_a),
        [ConfigurationResult::Succeeded]
    );

    fixture.sync(&mut client_b);
    assert_eq!(
        client_b.state.results(&conf_b),
        [ConfigurationResult::Cancelled]
    );
    assert_eq!(
        client_b.state.head(&head_b).transform,
        Some(wl_output::Transform::_180)
    );
    assert_eq!(client_a.state.serial, client_b.state.serial);
}

#[test]
fn removed_output_finishes_head_and_modes() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    let hdmi = test_output("HDMI-A-1", 1024);
    fixture.add_output(&hdmi);
    let mut client = fixture.bind_wlr(4);

    let head = client.state.head_by_name("HDMI-A-1").unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head);
    fixture.sync(&mut client);

    fixture.remove_output(&hdmi);
    fixture.sync(&mut client);

    assert!(client.state.head(&head).finished);
    assert!(client
        .state
        .head(&head)
        .modes
        .iter()
        .all(|mode| client.state.mode(mode).finished));
    assert_eq!(client.state.live_heads().count(), 1);
    assert_eq!(client.state.results(&conf), [ConfigurationResult::Cancelled]);
    assert!(hdmi.inner().heads.is_empty());
    assert_eq!(fixture.state.output_configuration_state.outputs().count(), 1);
}

#[test]
fn stop_finishes_manager() {
    let mut fixture = Fixture::new();
    let mut client = fixture.bind_wlr(4);

    client.manager().stop();
    fixture.sync(&mut client);
    assert_eq!(client.state.finished, 1);

    let output = test_output("DP-1", 0);
    fixture.add_output(&output);
    let events = fixture.sync(&mut client);
    let registry = client.state.registry.id();
    assert!(events.iter().all(|id| *id == registry));
    assert!(output.inner().heads.is_empty());
}

#[test]
fn released_heads_get_no_updates() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);
    let mut client = fixture.bind_wlr(4);

    let head = client.state.head_by_name("DP-1").unwrap();
    head.release();
    fixture.sync(&mut client);
    assert!(output.inner().heads.is_empty());

    let mut state = output.get_state();
    state.client_scale = 2.0;
    output.set_state(state);
    output.done();
    fixture.state.output_configuration_state.done();
    let events = fixture.sync(&mut client);
    assert!(events.iter().all(|id| *id != head.id()));
    assert!(events.contains(&client.manager().id()));
}

#[test]
fn disconnect_cleans_up() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);

    let mut client = fixture.bind_wlr(4);
    let head = client.state.head_by_name("DP-1").unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head);
    fixture.sync(&mut client);
    assert_eq!(
        fixture
            .state
            .output_configuration_state
            .registry()
            .outstanding()
            .count(),
        1
    );

    drop(conf);
    drop(head);
    drop(client);
    fixture.roundtrip();
    assert!(output.inner().heads.is_empty());
    assert_eq!(
        fixture
            .state
            .output_configuration_state
            .registry()
            .outstanding()
            .count(),
        0
    );
}

#[test]
fn destroyed_globals_finish_everything_once() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    let mut client = fixture.bind_wlr(4);

    let head = client.state.head_by_name("DP-1").unwrap();
    let conf = client.create_configuration();
    client.enable_head(&conf, &head);
    fixture.sync(&mut client);

    fixture.state.output_configuration_state.destroy_globals();
    fixture.state.output_configuration_state.destroy_globals();
    fixture.sync(&mut client);

    assert_eq!(client.state.finished, 1);
    assert!(client.state.head(&head).finished);
    assert!(!client
        .state
        .has_global(ZwlrOutputManagerV1::interface().name));
    assert!(fixture.state.output_configuration_state.global_id().is_none());

    // the configuration outlived its manager
    conf.apply();
    fixture.sync(&mut client);
    assert_eq!(client.state.results(&conf), [ConfigurationResult::Cancelled]);
    assert!(fixture.state.applied.is_empty());
}

#[test]
fn filtered_clients_see_no_globals() {
    let mut fixture = Fixture::with_filter(|_: &Client| false);
    fixture.add_output(&test_output("DP-1", 0));

    let mut client = fixture.connect();
    assert!(!client
        .state
        .has_global(ZwlrOutputManagerV1::interface().name));
    assert!(client.state.globals.is_empty());
    assert!(client.bind_manager(4).is_none());
    assert!(client.bind_management().is_none());
}

#[test]
fn legacy_devices_are_announced() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    let client = fixture.bind_legacy();

    let device = client.state.device_by_name("DP-1").unwrap();
    let info = client.state.device(&device);
    assert_eq!(info.make, "Generic");
    assert!(info.enabled);
    assert_eq!(info.modes.len(), 2);
    assert_eq!(info.current_mode().map(|mode| mode.id), Some(1));
    assert!(info.modes[0].flags.contains(ModeFlags::Preferred));
    assert_eq!(info.transform, Some(wl_output::Transform::Normal));
    assert_eq!(info.geometry, Some((0.0, 0.0, 1024.0, 768.0)));
    assert_eq!(info.done, 1);
}

#[test]
fn legacy_apply_mode_change() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);
    fixture.state.answer = Answer::Defer;
    let mut client = fixture.bind_legacy();

    let device = client.state.device_by_name("DP-1").unwrap();
    let conf = client.create_legacy_configuration();
    conf.mode(&device, 0);
    conf.apply();
    fixture.sync(&mut client);

    let submitted = fixture.state.applied[0].clone();
    let changeset = submitted.changeset(&output).unwrap();
    assert!(changeset.mode_changed());
    assert_eq!(changeset.mode(), Some(0));
    assert!(!changeset.geometry_changed());
    assert_eq!(submitted.protocol(), Protocol::Kwinft);

    fixture.state.finish(&submitted);
    fixture.sync(&mut client);
    assert_eq!(client.state.legacy_results(&conf), [LegacyResult::Applied]);
    assert!(submitted.changesets().is_empty());
    let info = client.state.device(&device);
    assert_eq!(info.current_mode().map(|mode| mode.id), Some(0));
    assert_eq!(info.done, 2);
}

#[test]
fn legacy_needs_no_coverage_and_survives_topology_changes() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    fixture.add_output(&test_output("HDMI-A-1", 1024));
    let mut client = fixture.bind_legacy();

    let device = client.state.device_by_name("HDMI-A-1").unwrap();
    let conf = client.create_legacy_configuration();
    conf.transform(&device, wl_output::Transform::_270);
    fixture.sync(&mut client);

    fixture.add_output(&test_output("eDP-1", 2048));
    fixture.sync(&mut client);
    assert!(client.state.legacy_results(&conf).is_empty());

    conf.apply();
    fixture.sync(&mut client);
    assert_eq!(client.state.legacy_results(&conf), [LegacyResult::Applied]);
    assert_eq!(
        client.state.device(&device).transform,
        Some(wl_output::Transform::_270)
    );
    assert!(client.protocol_error().is_none());
}

#[test]
fn legacy_failure_keeps_state() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);
    let before = output.published_state();
    let mut client = fixture.bind_legacy();

    let device = client.state.device_by_name("DP-1").unwrap();
    let conf = client.create_legacy_configuration();
    conf.geometry(&device, -1.0, -1.0, 1024.0, 768.0);
    conf.apply();
    fixture.sync(&mut client);
    assert_eq!(client.state.legacy_results(&conf), [LegacyResult::Failed]);
    assert_eq!(output.published_state(), before);

    // reuse is ignored, not an error
    conf.apply();
    fixture.sync(&mut client);
    assert_eq!(client.state.legacy_results(&conf), [LegacyResult::Failed]);
    assert!(client.protocol_error().is_none());
    assert_eq!(fixture.state.applied.len(), 1);
}

#[test]
fn legacy_ignores_invalid_requests() {
    let mut fixture = Fixture::new();
    fixture.add_output(&test_output("DP-1", 0));
    fixture.state.answer = Answer::Defer;
    let mut client = fixture.bind_legacy();

    let device = client.state.device_by_name("DP-1").unwrap();
    let conf = client.create_legacy_configuration();
    conf.mode(&device, 42);
    conf.geometry(&device, 0.0, 0.0, -5.0, 768.0);
    conf.apply();
    fixture.sync(&mut client);

    assert!(client.protocol_error().is_none());
    assert!(fixture.state.applied[0].changesets().is_empty());
}

#[test]
fn removed_outputs_leave_submitted_legacy_configurations() {
    let mut fixture = Fixture::new();
    let dp = test_output("DP-1", 0);
    let hdmi = test_output("HDMI-A-1", 1024);
    fixture.add_output(&dp);
    fixture.add_output(&hdmi);
    fixture.state.answer = Answer::Defer;
    let mut client = fixture.bind_legacy();

    let dp_device = client.state.device_by_name("DP-1").unwrap();
    let hdmi_device = client.state.device_by_name("HDMI-A-1").unwrap();
    let conf = client.create_legacy_configuration();
    conf.mode(&dp_device, 0);
    conf.transform(&hdmi_device, wl_output::Transform::_90);
    conf.apply();
    fixture.sync(&mut client);

    let submitted = fixture.state.applied[0].clone();
    assert_eq!(submitted.changesets().len(), 2);

    fixture.remove_output(&hdmi);
    fixture.sync(&mut client);
    let changesets = submitted.changesets();
    assert_eq!(changesets.len(), 1);
    assert_eq!(changesets[0].output(), Some(dp.clone()));
    assert!(submitted.changeset(&hdmi).is_none());

    fixture.state.finish(&submitted);
    fixture.sync(&mut client);
    assert_eq!(client.state.legacy_results(&conf), [LegacyResult::Applied]);
    assert_eq!(dp.published_state().mode, Some(0));
    assert_eq!(
        fixture
            .state
            .output_configuration_state
            .registry()
            .submitted()
            .count(),
        0
    );
}

#[test]
fn legacy_device_global_is_withdrawn() {
    let mut fixture = Fixture::new();
    let output = test_output("DP-1", 0);
    fixture.add_output(&output);
    let mut client = fixture.bind_legacy();
    let devices = |client: &TestClient| {
        client
            .state
            .globals
            .values()
            .filter(|(interface, _)| interface == ZkwinftOutputDeviceV1::interface().name)
            .count()
    };
    assert_eq!(devices(&client), 1);

    fixture.remove_output(&output);
    fixture.sync(&mut client);
    assert_eq!(devices(&client), 0);
    assert!(output.inner().devices.is_empty());
}
