//! Host side of the window management policy: the Smithay space, the
//! managed windows and the outputs they live on.

use std::collections::BTreeMap;

use smithay::{
    desktop::{Space, Window, layer_map_for_output},
    output::Output,
    reexports::{
        wayland_protocols::xdg::shell::server::xdg_toplevel,
        wayland_server::protocol::wl_surface::WlSurface,
    },
    utils::{Logical, Point, Rectangle, Size},
};

use crate::{
    output::{OutputId, OutputInfo, Zone, ZoneId},
    policy::{
        AppInfo, DepthLayer, WindowId, WindowInfo, WindowManagerTools, WindowSpecification,
        WindowState, WindowType,
    },
};

/// A toplevel known to the shell, placed or waiting for its first commit.
#[derive(Debug)]
pub struct ManagedWindow {
    pub window: Window,
    pub info: WindowInfo,
    /// What the client asked for before it was placed.
    pub requested: WindowSpecification,
    pub placed: bool,
}

#[derive(Debug)]
struct ShellOutput {
    id: OutputId,
    output: Output,
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct Shell {
    pub space: Space<Window>,
    pub pointer_location: Point<f64, Logical>,
    windows: BTreeMap<WindowId, ManagedWindow>,
    outputs: Vec<ShellOutput>,
    next_window_id: u64,
    next_output_id: u32,
    active: Option<WindowId>,
    focus_request: Option<Option<WindowId>>,
}

impl Shell {
    /// Maps `output` to the right of the existing ones.
    pub fn add_output(&mut self, output: Output) -> OutputId {
        let x = self
            .space
            .outputs()
            .filter_map(|output| self.space.output_geometry(output))
            .map(|geometry| geometry.loc.x + geometry.size.w)
            .max()
            .unwrap_or(0);
        self.space.map_output(&output, (x, 0));

        let id = OutputId(self.next_output_id);
        self.next_output_id += 1;
        tracing::info!(output = %output.name(), ?id, x, "output added");
        self.outputs.push(ShellOutput {
            id,
            output,
            attributes: BTreeMap::new(),
        });
        id
    }

    /// Unmaps the output. Windows on it stay where they are until the
    /// policy lays them out again.
    pub fn remove_output(&mut self, id: OutputId) -> Option<Output> {
        let index = self.outputs.iter().position(|entry| entry.id == id)?;
        let entry = self.outputs.remove(index);
        {
            let mut layers = layer_map_for_output(&entry.output);
            let mapped: Vec<_> = layers.layers().cloned().collect();
            for layer in mapped {
                layer.layer_surface().send_close();
                layers.unmap_layer(&layer);
            }
        }
        self.space.unmap_output(&entry.output);
        tracing::info!(output = %entry.output.name(), ?id, "output removed");
        Some(entry.output)
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| &entry.output)
    }

    pub fn output_id(&self, output: &Output) -> Option<OutputId> {
        self.outputs
            .iter()
            .find(|entry| &entry.output == output)
            .map(|entry| entry.id)
    }

    pub fn output_ids(&self) -> Vec<OutputId> {
        self.outputs.iter().map(|entry| entry.id).collect()
    }

    pub fn set_output_attributes(&mut self, id: OutputId, attributes: BTreeMap<String, String>) {
        if let Some(entry) = self.outputs.iter_mut().find(|entry| entry.id == id) {
            entry.attributes = attributes;
        }
    }

    pub fn output_info(&self, id: OutputId) -> Option<OutputInfo> {
        let entry = self.outputs.iter().find(|entry| entry.id == id)?;
        let extents = self.space.output_geometry(&entry.output)?;
        let mut info = OutputInfo::new(id, entry.output.name(), extents);
        info.transform = entry.output.current_transform();
        info.scale = entry.output.current_scale().fractional_scale();
        info.attributes = entry.attributes.clone();
        Some(info)
    }

    fn output_extents(&self, id: OutputId) -> Option<Rectangle<i32, Logical>> {
        self.space.output_geometry(self.output(id)?)
    }

    /// The non-exclusive area of the output, in global coordinates.
    fn zone_for(&self, id: OutputId) -> Option<Zone> {
        let output = self.output(id)?;
        let geometry = self.space.output_geometry(output)?;
        let mut zone = layer_map_for_output(output).non_exclusive_zone();
        if zone.size.w <= 0 || zone.size.h <= 0 {
            zone = Rectangle::from_size(geometry.size);
        }
        zone.loc += geometry.loc;
        Some(Zone {
            id: ZoneId(id.0),
            extents: zone,
        })
    }

    pub fn zones(&self) -> Vec<Zone> {
        self.outputs
            .iter()
            .filter_map(|entry| self.zone_for(entry.id))
            .collect()
    }

    fn active_output(&self) -> Option<OutputId> {
        self.outputs
            .iter()
            .find(|entry| {
                self.space
                    .output_geometry(&entry.output)
                    .is_some_and(|geometry| geometry.to_f64().contains(self.pointer_location))
            })
            .or_else(|| self.outputs.first())
            .map(|entry| entry.id)
    }

    /// Registers a new toplevel; it stays unmapped until placed.
    pub fn add_window(&mut self, window: Window, app: AppInfo) -> WindowId {
        let id = WindowId(self.next_window_id);
        self.next_window_id += 1;
        self.windows.insert(
            id,
            ManagedWindow {
                window,
                info: WindowInfo::new(id, app),
                requested: WindowSpecification::default(),
                placed: false,
            },
        );
        id
    }

    pub fn remove_window(&mut self, id: WindowId) -> Option<ManagedWindow> {
        let managed = self.windows.remove(&id)?;
        self.space.unmap_elem(&managed.window);
        if self.active == Some(id) {
            self.active = None;
        }
        Some(managed)
    }

    pub fn window(&self, id: WindowId) -> Option<&ManagedWindow> {
        self.windows.get(&id)
    }

    pub fn window_mut(&mut self, id: WindowId) -> Option<&mut ManagedWindow> {
        self.windows.get_mut(&id)
    }

    pub fn window_id_for_surface(&self, surface: &WlSurface) -> Option<WindowId> {
        self.windows
            .iter()
            .find(|(_, managed)| {
                managed
                    .window
                    .toplevel()
                    .is_some_and(|toplevel| toplevel.wl_surface() == surface)
            })
            .map(|(id, _)| *id)
    }

    pub fn window_for_surface(&self, surface: &WlSurface) -> Option<Window> {
        let id = self.window_id_for_surface(surface)?;
        self.windows.get(&id).map(|managed| managed.window.clone())
    }

    pub fn active_window(&self) -> Option<WindowId> {
        self.active
    }

    /// Focus change asked for by the policy since the last call.
    pub fn take_focus_request(&mut self) -> Option<Option<WindowId>> {
        self.focus_request.take()
    }

    /// Records the policy's placement and maps the window.
    pub fn commit_placement(&mut self, id: WindowId, spec: &WindowSpecification) {
        if let Some(managed) = self.windows.get_mut(&id) {
            managed.placed = true;
        }
        self.modify_window(id, spec);
    }

    /// Topmost visible application window, for refocusing.
    pub fn topmost_application(&self) -> Option<WindowId> {
        self.space
            .elements()
            .rev()
            .filter_map(|window| {
                self.windows
                    .iter()
                    .find(|(_, managed)| &managed.window == window)
            })
            .find(|(_, managed)| managed.info.is_application())
            .map(|(id, _)| *id)
    }

    /// Keeps the space stacked by depth layer, preserving order within a
    /// layer.
    fn restack(&mut self) {
        let mut mapped: Vec<(DepthLayer, Window)> = self
            .space
            .elements()
            .filter_map(|window| {
                self.windows
                    .values()
                    .find(|managed| &managed.window == window)
                    .map(|managed| (managed.info.depth_layer, window.clone()))
            })
            .collect();
        mapped.sort_by_key(|(layer, _)| *layer);
        for (_, window) in mapped {
            self.space.raise_element(&window, false);
        }
    }

    fn apply_to_toplevel(managed: &ManagedWindow) {
        let Some(toplevel) = managed.window.toplevel() else {
            return;
        };
        let info = &managed.info;
        toplevel.with_pending_state(|state| {
            state.states.unset(xdg_toplevel::State::Maximized);
            state.states.unset(xdg_toplevel::State::Fullscreen);
            match info.state {
                WindowState::Maximized => state.states.set(xdg_toplevel::State::Maximized),
                WindowState::Fullscreen => state.states.set(xdg_toplevel::State::Fullscreen),
                _ => {}
            }
            state.size = (info.size.w > 0 && info.size.h > 0).then_some(info.size);
        });
        if toplevel.is_initial_configure_sent() {
            toplevel.send_pending_configure();
        }
    }
}

impl WindowManagerTools for Shell {
    fn canonical_placement(
        &self,
        _app: &AppInfo,
        requested: &WindowSpecification,
    ) -> WindowSpecification {
        // Only an output the client asked for; the policy picks the rest.
        let output_id = requested.output_id.filter(|id| self.output(*id).is_some());
        let zone = output_id
            .and_then(|id| self.zone_for(id))
            .or_else(|| self.active_zone())
            .map(|zone| zone.extents)
            .unwrap_or_default();

        let size = requested
            .size
            .unwrap_or_else(|| Size::from((zone.size.w / 2, zone.size.h / 2)));
        let top_left = requested.top_left.unwrap_or_else(|| {
            Point::from((
                zone.loc.x + (zone.size.w - size.w) / 2,
                zone.loc.y + (zone.size.h - size.h) / 2,
            ))
        });

        WindowSpecification {
            window_type: Some(requested.window_type.unwrap_or(WindowType::Normal)),
            state: Some(requested.state.unwrap_or(WindowState::Restored)),
            parent: requested.parent,
            top_left: Some(top_left),
            size: Some(size),
            output_id,
            depth_layer: Some(requested.depth_layer.unwrap_or_default()),
            name: requested.name.clone(),
        }
    }

    fn place_and_size_for_state(&self, spec: &mut WindowSpecification, info: Option<&WindowInfo>) {
        let state = spec
            .state
            .or(info.map(|info| info.state))
            .unwrap_or_default();
        let output = spec
            .output_id
            .or(info.and_then(|info| info.output_id))
            .filter(|id| self.output(*id).is_some());

        let rectangle = match state {
            WindowState::Fullscreen => output
                .and_then(|id| self.output_extents(id))
                .or_else(|| self.active_zone().map(|zone| zone.extents)),
            WindowState::Maximized => output
                .and_then(|id| self.zone_for(id))
                .or_else(|| self.active_zone())
                .map(|zone| zone.extents),
            _ => match (spec.top_left, spec.size) {
                (Some(top_left), Some(size)) => Some(Rectangle::new(top_left, size)),
                _ => info.map(|info| {
                    Rectangle::new(
                        spec.top_left.unwrap_or(info.top_left),
                        spec.size.unwrap_or(info.size),
                    )
                }),
            },
        };

        if let Some(rectangle) = rectangle {
            spec.top_left = Some(rectangle.loc);
            spec.size = Some(rectangle.size);
        }
    }

    fn active_zone(&self) -> Option<Zone> {
        self.active_output().and_then(|id| self.zone_for(id))
    }

    fn window_ids(&self) -> Vec<WindowId> {
        self.windows
            .iter()
            .filter(|(_, managed)| managed.placed)
            .map(|(id, _)| *id)
            .collect()
    }

    fn info_for(&self, window: WindowId) -> Option<WindowInfo> {
        self.windows.get(&window).map(|managed| managed.info.clone())
    }

    fn modify_window(&mut self, window: WindowId, spec: &WindowSpecification) {
        let Some(managed) = self.windows.get_mut(&window) else {
            tracing::warn!(?window, "modify for unknown window");
            return;
        };
        managed.info.apply(spec);
        Self::apply_to_toplevel(managed);

        if !managed.placed {
            return;
        }
        let element = managed.window.clone();
        let info = managed.info.clone();
        match info.state {
            WindowState::Minimized | WindowState::Hidden => self.space.unmap_elem(&element),
            _ => {
                self.space.map_element(element, info.top_left, false);
                self.restack();
            }
        }
        tracing::debug!(
            ?window,
            state = ?info.state,
            rect = ?info.extents(),
            output = ?info.output_id,
            "window modified"
        );
    }

    fn window_at(&self, cursor: Point<f64, Logical>) -> Option<WindowId> {
        let (window, _) = self.space.element_under(cursor)?;
        self.windows
            .iter()
            .find(|(_, managed)| &managed.window == window)
            .map(|(id, _)| *id)
    }

    fn select_active_window(&mut self, window: Option<WindowId>) {
        self.active = window;
        self.focus_request = Some(window);
    }
}
