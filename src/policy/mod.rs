mod layout_metadata;
mod observer;
mod placement;
mod tools;
mod window;

use std::sync::Arc;

use bitflags::bitflags;
use smithay::utils::{Logical, Point, Rectangle};

pub use layout_metadata::{LayoutMetadata, PlacementRule};
pub use observer::{WindowCounters, WindowManagerObserver};
pub use placement::PlacementMapping;
pub use tools::WindowManagerTools;
pub use window::{
    AppInfo, DepthLayer, WindowId, WindowInfo, WindowSpecification, WindowState, WindowType,
};

use crate::output::{OutputId, OutputInfo, OutputRegistry, Zone};

/// Callbacks the host invokes on every window and display event.
pub trait WindowManagementPolicy {
    fn place_new_window(
        &mut self,
        tools: &mut dyn WindowManagerTools,
        app: &AppInfo,
        requested: &WindowSpecification,
    ) -> WindowSpecification;

    /// Rewrites `modifications` and forwards the result to the host.
    fn handle_modify_window(
        &mut self,
        tools: &mut dyn WindowManagerTools,
        window: &WindowInfo,
        modifications: &WindowSpecification,
    ) -> WindowSpecification;

    fn confirm_placement_on_display(
        &mut self,
        tools: &mut dyn WindowManagerTools,
        window: &WindowInfo,
        new_state: WindowState,
        proposed: Rectangle<i32, Logical>,
    ) -> Rectangle<i32, Logical>;

    fn handle_pointer_button(
        &mut self,
        tools: &mut dyn WindowManagerTools,
        cursor: Point<f64, Logical>,
    ) {
        let window = tools.window_at(cursor);
        tools.select_active_window(window);
    }

    fn handle_touch(&mut self, tools: &mut dyn WindowManagerTools, points: &[Point<f64, Logical>]) {
        if points.is_empty() {
            return;
        }
        let count = points.len() as f64;
        let sum = points
            .iter()
            .fold(Point::<f64, Logical>::from((0.0, 0.0)), |acc, p| acc + *p);
        let cursor = Point::from((sum.x / count, sum.y / count));
        let window = tools.window_at(cursor);
        tools.select_active_window(window);
    }

    fn advise_output_create(&mut self, output: &OutputInfo);
    fn advise_output_update(&mut self, updated: &OutputInfo, original: &OutputInfo);
    fn advise_output_delete(&mut self, output: &OutputInfo);

    fn advise_application_zone_create(&mut self, zone: &Zone);
    fn advise_application_zone_update(&mut self, updated: &Zone, original: &Zone);
    fn advise_application_zone_delete(&mut self, zone: &Zone);

    fn advise_new_window(&mut self, window: &WindowInfo);
    fn advise_delete_window(&mut self, window: &WindowInfo);

    /// End of a batch of advise calls.
    fn advise_end(&mut self, tools: &mut dyn WindowManagerTools);
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Dirty: u8 {
        /// Outputs or layout changed: every window is laid out again.
        const LAYOUT = 1 << 0;
        /// Only application zones changed: fullscreen windows are resized.
        const ZONES = 1 << 1;
    }
}

/// Kiosk placement: eligible windows are fullscreen on an output chosen by
/// exact layout rules, output tags, or round-robin.
#[derive(Debug)]
pub struct FrameWindowManagerPolicy {
    outputs: OutputRegistry,
    placement: PlacementMapping,
    layout: LayoutMetadata,
    counters: Arc<WindowCounters>,
    dirty: Dirty,
}

impl FrameWindowManagerPolicy {
    pub fn new(layout: LayoutMetadata) -> Self {
        Self {
            outputs: OutputRegistry::default(),
            placement: PlacementMapping::default(),
            layout,
            counters: Arc::new(WindowCounters::default()),
            dirty: Dirty::empty(),
        }
    }

    pub fn observer(&self) -> WindowManagerObserver {
        WindowManagerObserver::new(&self.counters)
    }

    pub fn counters(&self) -> &WindowCounters {
        &self.counters
    }

    pub fn outputs(&self) -> &OutputRegistry {
        &self.outputs
    }

    pub fn placement(&self) -> &PlacementMapping {
        &self.placement
    }

    pub fn dirty(&self) -> Dirty {
        self.dirty
    }

    /// Replaces the exact placement rules; takes effect at the next
    /// `advise_end`.
    pub fn set_layout_metadata(&mut self, layout: LayoutMetadata) {
        if self.layout != layout {
            self.layout = layout;
            self.dirty |= Dirty::LAYOUT;
        }
    }

    fn is_eligible(spec: &WindowSpecification, info: Option<&WindowInfo>) -> bool {
        let window_type = spec
            .window_type
            .or(info.map(|info| info.window_type))
            .unwrap_or_default();
        if !matches!(window_type, WindowType::Normal | WindowType::Freestyle) {
            return false;
        }

        let Some(state) = spec.state.or(info.map(|info| info.state)) else {
            return false;
        };
        if matches!(
            state,
            WindowState::Minimized | WindowState::Hidden | WindowState::Attached
        ) {
            return false;
        }

        spec.parent.or(info.and_then(|info| info.parent)).is_none()
    }

    /// Exact rule, else fullscreen on the resolved output. Returns whether
    /// `spec` was rewritten.
    fn apply_kiosk_layout(
        &self,
        tools: &dyn WindowManagerTools,
        spec: &mut WindowSpecification,
        info: Option<&WindowInfo>,
        app: &AppInfo,
    ) -> bool {
        if !Self::is_eligible(spec, info) {
            return false;
        }

        let title = spec
            .name
            .clone()
            .or_else(|| info.map(|info| info.name.clone()))
            .filter(|title| !title.is_empty());
        let title = title.as_deref();
        let snap_name = app.snap_name.as_str();

        if self.layout.try_layout(spec, title, snap_name) {
            if self.placement.is_mapped(title, snap_name) {
                tracing::warn!(
                    title,
                    snap_name,
                    "window matches both a layout rule and an output mapping; using the layout rule"
                );
            }
            spec.output_id = None;
            return true;
        }

        self.assign_output(tools, spec, title, snap_name);
        spec.state = Some(WindowState::Fullscreen);
        spec.size = None;
        spec.top_left = None;
        fullscreen_via_maximize(tools, spec, info);
        true
    }

    fn assign_output(
        &self,
        tools: &dyn WindowManagerTools,
        spec: &mut WindowSpecification,
        title: Option<&str>,
        snap_name: &str,
    ) {
        if self.placement.set_output_for_snap(spec, snap_name)
            || title.is_some_and(|title| self.placement.set_output_for_surface(spec, title))
        {
            return;
        }

        if spec
            .output_id
            .is_some_and(|output| self.outputs.contains(output))
        {
            return;
        }

        if let Some(output) = self.round_robin_output() {
            spec.output_id = Some(output);
            return;
        }

        // With no known outputs the host falls back to its active zone.
        // Relayout and modify requests never get here without one.
        spec.output_id = None;
        if tools.active_zone().is_none() {
            panic!("window placement requested before any application zone exists");
        }
    }

    fn round_robin_output(&self) -> Option<OutputId> {
        if self.outputs.is_empty() {
            return None;
        }
        let index = self.counters.currently_open() % self.outputs.len() as u64;
        self.outputs.nth(index as usize).map(|output| output.id)
    }

    fn relayout_all(&self, tools: &mut dyn WindowManagerTools) {
        if tools.active_zone().is_none() {
            tracing::debug!("no application zone; windows keep their placement");
            return;
        }
        for id in tools.window_ids() {
            let Some(info) = tools.info_for(id) else {
                continue;
            };

            let mut spec = WindowSpecification {
                state: Some(info.state),
                output_id: info.output_id,
                ..Default::default()
            };
            if self.apply_kiosk_layout(tools, &mut spec, Some(&info), &info.app) {
                tracing::debug!(window = ?id, state = ?spec.state, output = ?spec.output_id, "relayout");
                tools.modify_window(id, &spec);
            }
        }
    }

    fn refit_fullscreen(&self, tools: &mut dyn WindowManagerTools) {
        if tools.active_zone().is_none() {
            return;
        }
        for id in tools.window_ids() {
            let Some(info) = tools.info_for(id) else {
                continue;
            };
            if info.state != WindowState::Fullscreen {
                continue;
            }

            let mut spec = WindowSpecification {
                output_id: info.output_id.filter(|output| self.outputs.contains(*output)),
                ..Default::default()
            };
            fullscreen_via_maximize(tools, &mut spec, Some(&info));
            tools.modify_window(id, &spec);
        }
    }
}

/// Sizes the window as maximized (so reserved areas are honored) and then
/// labels it fullscreen.
fn fullscreen_via_maximize(
    tools: &dyn WindowManagerTools,
    spec: &mut WindowSpecification,
    info: Option<&WindowInfo>,
) {
    spec.state = Some(WindowState::Maximized);
    tools.place_and_size_for_state(spec, info);
    spec.state = Some(WindowState::Fullscreen);
}

impl WindowManagementPolicy for FrameWindowManagerPolicy {
    fn place_new_window(
        &mut self,
        tools: &mut dyn WindowManagerTools,
        app: &AppInfo,
        requested: &WindowSpecification,
    ) -> WindowSpecification {
        let mut spec = tools.canonical_placement(app, requested);

        self.apply_kiosk_layout(tools, &mut spec, None, app);

        if app.is_own_process() {
            spec.depth_layer = Some(DepthLayer::Background);
        }

        tracing::debug!(
            snap_name = %app.snap_name,
            title = spec.name.as_deref(),
            state = ?spec.state,
            output = ?spec.output_id,
            rect = ?spec.rectangle(),
            "placed new window"
        );
        spec
    }

    fn handle_modify_window(
        &mut self,
        tools: &mut dyn WindowManagerTools,
        window: &WindowInfo,
        modifications: &WindowSpecification,
    ) -> WindowSpecification {
        let mut spec = modifications.clone();
        // With every output gone there is nothing to lay out against.
        if spec.touches_placement() && tools.active_zone().is_some() {
            self.apply_kiosk_layout(tools, &mut spec, Some(window), &window.app);
        }
        tools.modify_window(window.id, &spec);
        spec
    }

    fn confirm_placement_on_display(
        &mut self,
        tools: &mut dyn WindowManagerTools,
        window: &WindowInfo,
        new_state: WindowState,
        proposed: Rectangle<i32, Logical>,
    ) -> Rectangle<i32, Logical> {
        if new_state != WindowState::Fullscreen {
            return proposed;
        }

        let mut spec = WindowSpecification {
            output_id: window.output_id,
            ..Default::default()
        };
        fullscreen_via_maximize(tools, &mut spec, Some(window));
        spec.rectangle().unwrap_or(proposed)
    }

    fn advise_output_create(&mut self, output: &OutputInfo) {
        tracing::info!(output = %output.name, extents = ?output.extents, "output created");
        self.outputs.insert(output.clone());
        self.placement.update(output);
        self.dirty |= Dirty::LAYOUT;
    }

    fn advise_output_update(&mut self, updated: &OutputInfo, original: &OutputInfo) {
        tracing::info!(
            output = %updated.name,
            from = ?original.extents,
            to = ?updated.extents,
            "output updated"
        );
        self.outputs.insert(updated.clone());
        self.placement.update(updated);
        self.dirty |= Dirty::LAYOUT;
    }

    fn advise_output_delete(&mut self, output: &OutputInfo) {
        tracing::info!(output = %output.name, "output removed");
        self.outputs.remove(output.id);
        self.placement.clear(output.id);
        self.dirty |= Dirty::LAYOUT;
    }

    fn advise_application_zone_create(&mut self, zone: &Zone) {
        tracing::debug!(zone = ?zone.id, extents = ?zone.extents, "application zone created");
        self.dirty |= Dirty::ZONES;
    }

    fn advise_application_zone_update(&mut self, updated: &Zone, original: &Zone) {
        tracing::debug!(
            zone = ?updated.id,
            from = ?original.extents,
            to = ?updated.extents,
            "application zone updated"
        );
        self.dirty |= Dirty::ZONES;
    }

    fn advise_application_zone_delete(&mut self, zone: &Zone) {
        tracing::debug!(zone = ?zone.id, "application zone removed");
        self.dirty |= Dirty::ZONES;
    }

    fn advise_new_window(&mut self, window: &WindowInfo) {
        if window.is_application() {
            self.counters.window_opened();
            tracing::debug!(
                window = ?window.id,
                open = self.counters.currently_open(),
                "application window opened"
            );
        }
    }

    fn advise_delete_window(&mut self, window: &WindowInfo) {
        if window.is_application() {
            self.counters.window_closed();
            tracing::debug!(
                window = ?window.id,
                open = self.counters.currently_open(),
                "application window closed"
            );
        }
    }

    fn advise_end(&mut self, tools: &mut dyn WindowManagerTools) {
        if self.dirty.contains(Dirty::LAYOUT) {
            self.relayout_all(tools);
        } else if self.dirty.contains(Dirty::ZONES) {
            self.refit_fullscreen(tools);
        }
        self.dirty = Dirty::empty();
    }
}
