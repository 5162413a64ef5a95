use std::{
    collections::BTreeMap,
    io,
    sync::{Arc, Mutex},
};

use frame::{
    output::{OutputId, OutputInfo, SNAP_NAME, SURFACE_TITLE, Zone, ZoneId},
    policy::{
        AppInfo, DepthLayer, FrameWindowManagerPolicy, LayoutMetadata, WindowId, WindowInfo,
        WindowManagementPolicy, WindowManagerTools, WindowSpecification, WindowState, WindowType,
    },
};
use smithay::utils::{Logical, Point, Rectangle};

#[derive(Default)]
struct FakeTools {
    outputs: Vec<OutputInfo>,
    zone: Option<Zone>,
    windows: BTreeMap<WindowId, WindowInfo>,
    modified: Vec<(WindowId, WindowSpecification)>,
    selected: Option<Option<WindowId>>,
}

impl FakeTools {
    fn with_zone(extents: Rectangle<i32, Logical>) -> Self {
        Self {
            zone: Some(Zone {
                id: ZoneId(1),
                extents,
            }),
            ..Default::default()
        }
    }

    fn add_window(&mut self, info: WindowInfo) {
        self.windows.insert(info.id, info);
    }

    fn modified_ids(&self) -> Vec<WindowId> {
        self.modified.iter().map(|(id, _)| *id).collect()
    }
}

impl WindowManagerTools for FakeTools {
    fn canonical_placement(
        &self,
        _app: &AppInfo,
        requested: &WindowSpecification,
    ) -> WindowSpecification {
        let mut spec = requested.clone();
        spec.window_type.get_or_insert(WindowType::Normal);
        spec.state.get_or_insert(WindowState::Restored);
        spec.top_left.get_or_insert(Point::from((10, 10)));
        spec.size.get_or_insert((320, 240).into());
        spec
    }

    fn place_and_size_for_state(&self, spec: &mut WindowSpecification, info: Option<&WindowInfo>) {
        if !matches!(
            spec.state,
            Some(WindowState::Maximized | WindowState::Fullscreen)
        ) {
            return;
        }

        let output = spec.output_id.or(info.and_then(|info| info.output_id));
        let extents = output
            .and_then(|id| self.outputs.iter().find(|o| o.id == id))
            .map(|o| o.extents)
            .or(self.zone.map(|zone| zone.extents));
        if let Some(extents) = extents {
            spec.top_left = Some(extents.loc);
            spec.size = Some(extents.size);
        }
    }

    fn active_zone(&self) -> Option<Zone> {
        self.zone
    }

    fn window_ids(&self) -> Vec<WindowId> {
        self.windows.keys().copied().collect()
    }

    fn info_for(&self, window: WindowId) -> Option<WindowInfo> {
        self.windows.get(&window).cloned()
    }

    fn modify_window(&mut self, window: WindowId, spec: &WindowSpecification) {
        if let Some(info) = self.windows.get_mut(&window) {
            info.apply(spec);
        }
        self.modified.push((window, spec.clone()));
    }

    fn window_at(&self, cursor: Point<f64, Logical>) -> Option<WindowId> {
        let cursor = cursor.to_i32_round();
        self.windows
            .values()
            .find(|info| info.extents().contains(cursor))
            .map(|info| info.id)
    }

    fn select_active_window(&mut self, window: Option<WindowId>) {
        self.selected = Some(window);
    }
}

/// Formatted log output, shared with the subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with warnings and errors written to the returned logs.
fn with_captured_warnings<T>(f: impl FnOnce() -> T) -> (T, CapturedLogs) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, logs)
}

fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Logical> {
    Rectangle::new((x, y).into(), (w, h).into())
}

fn output(id: u32, extents: Rectangle<i32, Logical>) -> OutputInfo {
    OutputInfo::new(OutputId(id), format!("OUT-{id}"), extents)
}

fn app(snap_name: &str) -> AppInfo {
    AppInfo::new(Some(std::process::id() as i32 + 1), snap_name)
}

fn titled(title: &str) -> WindowSpecification {
    WindowSpecification {
        name: Some(title.to_owned()),
        ..Default::default()
    }
}

/// Policy and tools with the given outputs already announced.
fn setup(outputs: &[OutputInfo]) -> (FrameWindowManagerPolicy, FakeTools) {
    setup_with_layout(outputs, LayoutMetadata::default())
}

fn setup_with_layout(
    outputs: &[OutputInfo],
    layout: LayoutMetadata,
) -> (FrameWindowManagerPolicy, FakeTools) {
    let mut policy = FrameWindowManagerPolicy::new(layout);
    let mut tools = FakeTools::with_zone(outputs.first().map_or(rect(0, 0, 640, 480), |o| o.extents));
    for output in outputs {
        tools.outputs.push(output.clone());
        policy.advise_output_create(output);
    }
    policy.advise_end(&mut tools);
    (policy, tools)
}

fn layout(yaml: &str) -> LayoutMetadata {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml).expect("valid yaml");
    LayoutMetadata::from_yaml(&value)
}

/// Places a window and records it with the tools the way the host would.
fn open(
    policy: &mut FrameWindowManagerPolicy,
    tools: &mut FakeTools,
    id: u64,
    app: AppInfo,
    requested: &WindowSpecification,
) -> WindowInfo {
    let spec = policy.place_new_window(tools, &app, requested);
    let mut info = WindowInfo::new(WindowId(id), app);
    info.apply(&spec);
    tools.add_window(info.clone());
    policy.advise_new_window(&info);
    info
}

#[test]
fn normal_windows_fill_their_output() {
    let (mut policy, mut tools) = setup(&[output(1, rect(0, 0, 800, 600))]);

    let spec = policy.place_new_window(&mut tools, &app("app"), &WindowSpecification::default());

    assert_eq!(spec.state, Some(WindowState::Fullscreen));
    assert_eq!(spec.output_id, Some(OutputId(1)));
    assert_eq!(spec.rectangle(), Some(rect(0, 0, 800, 600)));
}

#[test]
fn windows_round_robin_across_outputs() {
    let (mut policy, mut tools) = setup(&[
        output(1, rect(0, 0, 800, 600)),
        output(2, rect(800, 0, 800, 600)),
    ]);

    let first = open(&mut policy, &mut tools, 1, app("a"), &WindowSpecification::default());
    let second = open(&mut policy, &mut tools, 2, app("b"), &WindowSpecification::default());
    let third = open(&mut policy, &mut tools, 3, app("c"), &WindowSpecification::default());

    assert_eq!(first.output_id, Some(OutputId(1)));
    assert_eq!(second.output_id, Some(OutputId(2)));
    assert_eq!(second.extents(), rect(800, 0, 800, 600));
    assert_eq!(third.output_id, Some(OutputId(1)));
}

#[test]
fn tagged_outputs_route_by_title_and_snap() {
    let (mut policy, mut tools) = setup(&[
        output(1, rect(0, 0, 800, 600)),
        output(2, rect(800, 0, 800, 600)).with_attribute(SURFACE_TITLE, "Clock"),
        output(3, rect(1600, 0, 800, 600)).with_attribute(SNAP_NAME, "dashboard"),
    ]);

    let clock = policy.place_new_window(&mut tools, &app("clock-app"), &titled("Clock"));
    assert_eq!(clock.output_id, Some(OutputId(2)));
    assert_eq!(clock.rectangle(), Some(rect(800, 0, 800, 600)));

    let dashboard =
        policy.place_new_window(&mut tools, &app("dashboard"), &WindowSpecification::default());
    assert_eq!(dashboard.output_id, Some(OutputId(3)));
}

#[test]
fn snap_route_wins_over_title_route() {
    let (mut policy, mut tools) = setup(&[
        output(1, rect(0, 0, 800, 600)).with_attribute(SURFACE_TITLE, "Clock"),
        output(2, rect(800, 0, 800, 600)).with_attribute(SNAP_NAME, "clock-app"),
    ]);

    let spec = policy.place_new_window(&mut tools, &app("clock-app"), &titled("Clock"));
    assert_eq!(spec.output_id, Some(OutputId(2)));
}

#[test]
fn exact_layout_beats_output_mapping() {
    let (mut policy, mut tools) = setup_with_layout(
        &[
            output(1, rect(0, 0, 800, 600)),
            output(2, rect(800, 0, 800, 600)).with_attribute(SNAP_NAME, "kiosk"),
        ],
        layout(
            r#"
- snap-name: kiosk
  position: [100, 100]
  size: [50, 50]
"#,
        ),
    );

    let (spec, logs) = with_captured_warnings(|| {
        policy.place_new_window(&mut tools, &app("kiosk"), &WindowSpecification::default())
    });

    assert_eq!(spec.state, Some(WindowState::Restored));
    assert_eq!(spec.rectangle(), Some(rect(100, 100, 50, 50)));
    assert_eq!(spec.output_id, None);

    let logs = logs.contents();
    assert!(logs.contains("WARN"), "{logs}");
    assert!(
        logs.contains("matches both a layout rule and an output mapping"),
        "{logs}"
    );
    assert!(logs.contains("kiosk"), "{logs}");
}

#[test]
fn unambiguous_layout_rules_do_not_warn() {
    let (mut policy, mut tools) = setup_with_layout(
        &[output(1, rect(0, 0, 800, 600))],
        layout(
            r#"
- snap-name: kiosk
  position: [100, 100]
  size: [50, 50]
"#,
        ),
    );

    let (spec, logs) = with_captured_warnings(|| {
        policy.place_new_window(&mut tools, &app("kiosk"), &WindowSpecification::default())
    });
    assert_eq!(spec.rectangle(), Some(rect(100, 100, 50, 50)));
    assert!(logs.contents().is_empty(), "{}", logs.contents());
}

#[test]
fn malformed_rules_are_ignored() {
    let (mut policy, mut tools) = setup_with_layout(
        &[output(1, rect(0, 0, 800, 600))],
        layout(
            r#"
- snap-name: kiosk
  position: [100, 100, 3]
  size: [50, 50]
"#,
        ),
    );

    let spec = policy.place_new_window(&mut tools, &app("kiosk"), &WindowSpecification::default());
    assert_eq!(spec.state, Some(WindowState::Fullscreen));
    assert_eq!(spec.rectangle(), Some(rect(0, 0, 800, 600)));
}

#[test]
fn removed_outputs_stop_routing() {
    let tagged = output(2, rect(800, 0, 800, 600)).with_attribute(SURFACE_TITLE, "Clock");
    let (mut policy, mut tools) = setup(&[output(1, rect(0, 0, 800, 600)), tagged.clone()]);

    tools.outputs.retain(|o| o.id != tagged.id);
    policy.advise_output_delete(&tagged);
    policy.advise_end(&mut tools);

    assert!(!policy.placement().references(OutputId(2)));
    let spec = policy.place_new_window(&mut tools, &app("clock-app"), &titled("Clock"));
    assert_eq!(spec.output_id, Some(OutputId(1)));
}

#[test]
fn losing_every_output_leaves_windows_alone() {
    let only = output(1, rect(0, 0, 800, 600));
    let (mut policy, mut tools) = setup(&[only.clone()]);
    let window = open(&mut policy, &mut tools, 1, app("a"), &WindowSpecification::default());
    tools.modified.clear();

    let zone = tools.zone.take().expect("zone");
    tools.outputs.clear();
    policy.advise_output_delete(&only);
    policy.advise_application_zone_delete(&zone);
    policy.advise_end(&mut tools);

    assert!(tools.modified.is_empty());
    assert_eq!(tools.windows[&WindowId(1)].extents(), rect(0, 0, 800, 600));
    assert!(policy.dirty().is_empty());

    let maximize = WindowSpecification {
        state: Some(WindowState::Maximized),
        ..Default::default()
    };
    let spec = policy.handle_modify_window(&mut tools, &window, &maximize);
    assert_eq!(spec, maximize);

    let replacement = output(2, rect(0, 0, 1024, 768));
    tools.outputs.push(replacement.clone());
    tools.zone = Some(Zone {
        id: ZoneId(2),
        extents: replacement.extents,
    });
    policy.advise_output_create(&replacement);
    policy.advise_end(&mut tools);

    let window = &tools.windows[&WindowId(1)];
    assert_eq!(window.state, WindowState::Fullscreen);
    assert_eq!(window.output_id, Some(OutputId(2)));
    assert_eq!(window.extents(), rect(0, 0, 1024, 768));
}

#[test]
fn dialogs_and_children_keep_their_placement() {
    let (mut policy, mut tools) = setup(&[output(1, rect(0, 0, 800, 600))]);

    let dialog = WindowSpecification {
        window_type: Some(WindowType::Dialog),
        ..Default::default()
    };
    let spec = policy.place_new_window(&mut tools, &app("app"), &dialog);
    assert_eq!(spec.state, Some(WindowState::Restored));
    assert_eq!(spec.rectangle(), Some(rect(10, 10, 320, 240)));

    let child = WindowSpecification {
        parent: Some(WindowId(99)),
        ..Default::default()
    };
    let spec = policy.place_new_window(&mut tools, &app("app"), &child);
    assert_eq!(spec.state, Some(WindowState::Restored));
}

#[test]
fn own_windows_go_to_the_background_and_are_not_counted() {
    let (mut policy, mut tools) = setup(&[output(1, rect(0, 0, 800, 600))]);
    let observer = policy.observer();

    let own = AppInfo::new(Some(std::process::id() as i32), "");
    let wallpaper = open(&mut policy, &mut tools, 1, own, &titled("frame"));
    assert_eq!(wallpaper.depth_layer, DepthLayer::Background);
    assert_eq!(wallpaper.state, WindowState::Fullscreen);
    assert_eq!(observer.currently_open_windows(), 0);

    let app_window = open(&mut policy, &mut tools, 2, app("app"), &WindowSpecification::default());
    assert_eq!(observer.currently_open_windows(), 1);

    policy.advise_delete_window(&wallpaper);
    assert_eq!(observer.currently_open_windows(), 1);
    policy.advise_delete_window(&app_window);
    assert_eq!(observer.currently_open_windows(), 0);
    assert_eq!(policy.counters().opened_count(), 1);
    assert_eq!(policy.counters().closed_count(), 1);

    drop(policy);
    assert!(!observer.is_attached());
}

#[test]
fn restore_requests_are_turned_back_into_fullscreen() {
    let (mut policy, mut tools) = setup(&[output(1, rect(0, 0, 800, 600))]);
    let window = open(&mut policy, &mut tools, 1, app("app"), &WindowSpecification::default());

    let restore = WindowSpecification {
        state: Some(WindowState::Restored),
        size: Some((100, 100).into()),
        ..Default::default()
    };
    let spec = policy.handle_modify_window(&mut tools, &window, &restore);

    assert_eq!(spec.state, Some(WindowState::Fullscreen));
    assert_eq!(spec.rectangle(), Some(rect(0, 0, 800, 600)));
    assert_eq!(tools.modified_ids(), vec![WindowId(1)]);
}

#[test]
fn modifications_without_placement_pass_through() {
    let (mut policy, mut tools) = setup(&[output(1, rect(0, 0, 800, 600))]);
    let window = open(&mut policy, &mut tools, 1, app("app"), &WindowSpecification::default());

    let rename = titled("renamed");
    let spec = policy.handle_modify_window(&mut tools, &window, &rename);
    assert_eq!(spec, rename);

    let minimize = WindowSpecification {
        state: Some(WindowState::Minimized),
        ..Default::default()
    };
    let spec = policy.handle_modify_window(&mut tools, &window, &minimize);
    assert_eq!(spec, minimize);
    assert_eq!(tools.modified.len(), 2);
}

#[test]
fn fullscreen_confirmation_uses_the_output_extents() {
    let (mut policy, mut tools) = setup(&[
        output(1, rect(0, 0, 800, 600)),
        output(2, rect(800, 0, 1024, 768)),
    ]);
    let mut window = WindowInfo::new(WindowId(1), app("app"));
    window.output_id = Some(OutputId(2));

    let proposed = rect(5, 5, 10, 10);
    let confirmed = policy.confirm_placement_on_display(
        &mut tools,
        &window,
        WindowState::Fullscreen,
        proposed,
    );
    assert_eq!(confirmed, rect(800, 0, 1024, 768));

    let confirmed =
        policy.confirm_placement_on_display(&mut tools, &window, WindowState::Restored, proposed);
    assert_eq!(confirmed, proposed);
}

#[test]
fn output_changes_relayout_every_window() {
    let original = output(1, rect(0, 0, 800, 600));
    let (mut policy, mut tools) = setup(&[original.clone()]);
    open(&mut policy, &mut tools, 1, app("a"), &WindowSpecification::default());
    tools.modified.clear();

    let resized = output(1, rect(0, 0, 1920, 1080));
    tools.outputs = vec![resized.clone()];
    policy.advise_output_update(&resized, &original);
    policy.advise_end(&mut tools);

    assert_eq!(tools.modified_ids(), vec![WindowId(1)]);
    assert_eq!(tools.windows[&WindowId(1)].extents(), rect(0, 0, 1920, 1080));
    assert!(policy.dirty().is_empty());
}

#[test]
fn relayout_keeps_windows_on_their_output() {
    let (mut policy, mut tools) = setup(&[
        output(1, rect(0, 0, 800, 600)),
        output(2, rect(800, 0, 800, 600)),
    ]);
    open(&mut policy, &mut tools, 1, app("a"), &WindowSpecification::default());
    open(&mut policy, &mut tools, 2, app("b"), &WindowSpecification::default());

    let third = output(3, rect(1600, 0, 800, 600));
    tools.outputs.push(third.clone());
    policy.advise_output_create(&third);
    policy.advise_end(&mut tools);

    assert_eq!(tools.windows[&WindowId(1)].output_id, Some(OutputId(1)));
    assert_eq!(tools.windows[&WindowId(2)].output_id, Some(OutputId(2)));
}

#[test]
fn zone_changes_only_refit_fullscreen_windows() {
    let (mut policy, mut tools) = setup(&[output(1, rect(0, 0, 800, 600))]);
    open(&mut policy, &mut tools, 1, app("a"), &WindowSpecification::default());
    let dialog = WindowSpecification {
        window_type: Some(WindowType::Dialog),
        ..Default::default()
    };
    open(&mut policy, &mut tools, 2, app("a"), &dialog);
    tools.modified.clear();

    let zone = tools.zone.expect("zone");
    let shrunk = Zone {
        id: zone.id,
        extents: rect(0, 32, 800, 568),
    };
    tools.zone = Some(shrunk);
    policy.advise_application_zone_update(&shrunk, &zone);
    policy.advise_end(&mut tools);

    assert_eq!(tools.modified_ids(), vec![WindowId(1)]);
    assert_eq!(tools.windows[&WindowId(1)].state, WindowState::Fullscreen);

    policy.advise_end(&mut tools);
    assert_eq!(tools.modified.len(), 1);
}

#[test]
fn new_layout_metadata_is_applied_at_the_end_of_the_batch() {
    let (mut policy, mut tools) = setup(&[output(1, rect(0, 0, 800, 600))]);
    open(&mut policy, &mut tools, 1, app("kiosk"), &WindowSpecification::default());

    policy.set_layout_metadata(layout(
        r#"
- snap-name: kiosk
  position: [20, 30]
  size: [200, 100]
"#,
    ));
    assert!(!policy.dirty().is_empty());
    policy.advise_end(&mut tools);

    let window = &tools.windows[&WindowId(1)];
    assert_eq!(window.state, WindowState::Restored);
    assert_eq!(window.extents(), rect(20, 30, 200, 100));
}

#[test]
fn without_outputs_windows_use_the_active_zone() {
    let mut policy = FrameWindowManagerPolicy::new(LayoutMetadata::default());
    let mut tools = FakeTools::with_zone(rect(0, 0, 640, 480));

    let spec = policy.place_new_window(&mut tools, &app("app"), &WindowSpecification::default());
    assert_eq!(spec.output_id, None);
    assert_eq!(spec.rectangle(), Some(rect(0, 0, 640, 480)));
}

#[test]
fn pointer_and_touch_select_the_window_underneath() {
    let (mut policy, mut tools) = setup(&[
        output(1, rect(0, 0, 800, 600)),
        output(2, rect(800, 0, 800, 600)),
    ]);
    open(&mut policy, &mut tools, 1, app("a"), &WindowSpecification::default());
    open(&mut policy, &mut tools, 2, app("b"), &WindowSpecification::default());

    policy.handle_pointer_button(&mut tools, (900.0, 10.0).into());
    assert_eq!(tools.selected, Some(Some(WindowId(2))));

    policy.handle_touch(&mut tools, &[(10.0, 10.0).into(), (30.0, 30.0).into()]);
    assert_eq!(tools.selected, Some(Some(WindowId(1))));

    policy.handle_pointer_button(&mut tools, (5000.0, 5000.0).into());
    assert_eq!(tools.selected, Some(None));
}
