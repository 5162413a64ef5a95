use smithay::{
    backend::input::TouchSlot,
    desktop::{PopupManager, WindowSurfaceType, layer_map_for_output},
    input::{Seat, SeatState, pointer::PointerHandle},
    output::{Mode, Output},
    reexports::{
        calloop::{Interest, LoopHandle, LoopSignal, Mode as TriggerMode, PostAction, generic::Generic},
        wayland_protocols::xdg::shell::server::xdg_toplevel,
        wayland_server::{
            Display, DisplayHandle, Resource,
            backend::{ClientData, ClientId, DisconnectReason},
            protocol::wl_surface::WlSurface,
        },
    },
    utils::{Logical, Point, SERIAL_COUNTER, Serial},
    wayland::{
        compositor::{CompositorClientState, CompositorState, with_states},
        output::OutputManagerState,
        selection::data_device::DataDeviceState,
        shell::{
            wlr_layer::{Layer as WlrLayer, WlrLayerShellState},
            xdg::{XdgShellState, XdgToplevelSurfaceData},
        },
        shm::ShmState,
        socket::ListeningSocketSource,
    },
};
use std::{
    collections::BTreeSet,
    ffi::OsString,
    os::unix::net::UnixStream,
    sync::Arc,
};

use crate::{
    CompositorError,
    auth::{AuthModel, ExtensionPreferences, LAYER_SHELL},
    backend::virtual_output::VirtualOutputs,
    config::RuntimeConfig,
    display_config::DisplayConfig,
    output::{OutputId, Zone},
    policy::{
        AppInfo, FrameWindowManagerPolicy, WindowId, WindowManagementPolicy, WindowManagerTools,
        WindowSpecification, WindowState,
    },
    shell::Shell,
    snap,
};

pub struct Frame {
    pub display_handle: DisplayHandle,
    pub loop_handle: LoopHandle<'static, Frame>,
    pub loop_signal: LoopSignal,
    pub socket_name: OsString,
    pub start_time: std::time::Instant,

    pub shell: Shell,
    pub policy: FrameWindowManagerPolicy,
    pub config: RuntimeConfig,
    pub display_config: DisplayConfig,
    pub auth: AuthModel,
    pub virtual_outputs: VirtualOutputs,
    /// Application zones last reported to the policy.
    zones: Vec<Zone>,
    pub touch_points: Vec<(TouchSlot, Point<f64, Logical>)>,

    // smithay state
    pub compositor_state: CompositorState,
    pub xdg_shell_state: XdgShellState,
    pub shm_state: ShmState,
    pub output_manager_state: OutputManagerState,
    pub data_device_state: DataDeviceState,
    pub seat_state: SeatState<Self>,
    pub popups: PopupManager,
    pub layer_shell_state: WlrLayerShellState,
    pub seat: Seat<Self>,
}

impl Frame {
    pub fn new(
        display: Display<Self>,
        loop_handle: LoopHandle<'static, Frame>,
        loop_signal: LoopSignal,
        config: RuntimeConfig,
        display_config: DisplayConfig,
    ) -> Result<Self, CompositorError> {
        let start_time = std::time::Instant::now();

        let display_handle = display.handle();

        let compositor_state = CompositorState::new::<Self>(&display_handle);
        let xdg_shell_state = XdgShellState::new::<Self>(&display_handle);
        let shm_state = ShmState::new::<Self>(&display_handle, vec![]);
        let output_manager_state = OutputManagerState::new_with_xdg_output::<Self>(&display_handle);
        let data_device_state = DataDeviceState::new::<Self>(&display_handle);
        let popups = PopupManager::default();
        let layer_shell_state =
            WlrLayerShellState::new_with_filter::<Self, _>(&display_handle, |client| {
                client
                    .get_data::<ClientState>()
                    .is_some_and(|data| data.can_view(LAYER_SHELL))
            });
        let mut seat_state = SeatState::new();

        let mut seat = seat_state.new_wl_seat(&display_handle, "seat0");
        seat.add_keyboard(Default::default(), 200, 25)
            .map_err(|err| CompositorError::Backend(format!("failed to add keyboard: {err}")))?;
        seat.add_pointer();
        seat.add_touch();

        let socket_name = init_wayland_listener(display, &loop_handle)?;
        let policy = FrameWindowManagerPolicy::new(display_config.layout_metadata().clone());

        Ok(Self {
            display_handle,
            loop_handle,
            loop_signal,
            socket_name,
            start_time,

            shell: Shell::default(),
            policy,
            config,
            display_config,
            auth: AuthModel::builtin(),
            virtual_outputs: VirtualOutputs::default(),
            zones: Vec::new(),
            touch_points: Vec::new(),

            compositor_state,
            xdg_shell_state,
            shm_state,
            output_manager_state,
            data_device_state,
            seat_state,
            popups,
            layer_shell_state,
            seat,
        })
    }

    /// Connects the in-process fullscreen client over one end of a socket
    /// pair. It sees every global.
    pub fn insert_internal_client(&mut self, stream: UnixStream) -> Result<(), CompositorError> {
        let client_state = ClientState {
            pid: i32::try_from(std::process::id()).ok(),
            internal: true,
            ..ClientState::default()
        };
        self.display_handle
            .insert_client(stream, Arc::new(client_state))
            .map_err(|err| CompositorError::Backend(format!("failed to insert internal client: {err}")))?;
        tracing::info!("internal client connected");
        Ok(())
    }

    fn client_state_for(&self, stream: &UnixStream) -> ClientState {
        let pid = match snap::peer_pid(stream) {
            Ok(pid) => Some(pid),
            Err(err) => {
                tracing::warn!("cannot read peer credentials: {err}");
                None
            }
        };
        let fallback = self.config.authorise_without_apparmor;
        let (snap_name, snap_instance) = pid
            .map(|pid| {
                (
                    snap::snap_name_of(pid, fallback),
                    snap::snap_instance_name_of(pid, fallback),
                )
            })
            .unwrap_or_default();
        ClientState::new(pid, snap_name, snap_instance, &self.auth, &self.config.extensions)
    }

    pub fn pointer(&self) -> Option<PointerHandle<Self>> {
        self.seat.get_pointer()
    }

    /// Registers a new output with the shell and reports it to the policy.
    pub fn add_output(&mut self, output: Output) -> OutputId {
        let id = self.shell.add_output(output);
        if let Some(info) = self.shell.output_info(id) {
            let info = self.display_config.apply_attributes(info);
            self.shell.set_output_attributes(id, info.attributes.clone());
            self.policy.advise_output_create(&info);
        }
        self.refresh_zones();
        self.policy.advise_end(&mut self.shell);
        id
    }

    pub fn resize_output(&mut self, output: &Output, mode: Mode) {
        let Some(id) = self.shell.output_id(output) else {
            tracing::warn!(output = %output.name(), "resize of unknown output");
            return;
        };
        let original = self.shell.output_info(id);
        output.change_current_state(Some(mode), None, None, None);
        output.set_preferred(mode);
        layer_map_for_output(output).arrange();

        if let (Some(original), Some(updated)) = (original, self.shell.output_info(id)) {
            self.policy.advise_output_update(&updated, &original);
        }
        self.refresh_zones();
        self.policy.advise_end(&mut self.shell);
    }

    /// Unmaps an output and lets the policy move its windows elsewhere.
    pub fn remove_output(&mut self, output: &Output) {
        let Some(id) = self.shell.output_id(output) else {
            tracing::warn!(output = %output.name(), "removal of unknown output");
            return;
        };
        let info = self.shell.output_info(id);
        self.shell.remove_output(id);
        if let Some(info) = info {
            self.policy.advise_output_delete(&info);
        }
        self.refresh_zones();
        self.policy.advise_end(&mut self.shell);
    }

    /// Reports application zone changes since the last call. Callers close
    /// the batch with `advise_end`.
    pub fn refresh_zones(&mut self) {
        let current = self.shell.zones();
        for zone in &current {
            match self.zones.iter().find(|old| old.id == zone.id) {
                None => self.policy.advise_application_zone_create(zone),
                Some(old) if old != zone => self.policy.advise_application_zone_update(zone, old),
                Some(_) => {}
            }
        }
        for old in &self.zones {
            if !current.iter().any(|zone| zone.id == old.id) {
                self.policy.advise_application_zone_delete(old);
            }
        }
        self.zones = current;
    }

    /// Re-reads the display configuration and lays every window out again.
    pub fn reload_display_config(&mut self) {
        self.display_config.reload();

        for id in self.shell.output_ids() {
            let Some(original) = self.shell.output_info(id) else {
                continue;
            };
            let updated = self.display_config.apply_attributes(original.clone());
            if updated != original {
                self.shell.set_output_attributes(id, updated.attributes.clone());
                self.policy.advise_output_update(&updated, &original);
            }
        }
        self.policy
            .set_layout_metadata(self.display_config.layout_metadata().clone());
        self.policy.advise_end(&mut self.shell);
    }

    pub fn app_info_for(&self, surface: &WlSurface) -> AppInfo {
        self.display_handle
            .get_client(surface.id())
            .ok()
            .and_then(|client| {
                client
                    .get_data::<ClientState>()
                    .map(|data| AppInfo::new(data.pid, data.snap_instance.clone()))
            })
            .unwrap_or_default()
    }

    /// Places a toplevel on its first commit, before the initial configure.
    pub fn place_window(&mut self, id: WindowId) {
        let Some(managed) = self.shell.window(id) else {
            return;
        };
        let app = managed.info.app.clone();
        let mut requested = managed.requested.clone();
        if let Some(toplevel) = managed.window.toplevel() {
            if let Some(title) = toplevel_title(toplevel.wl_surface()) {
                requested.name = Some(title);
            }
            if requested.parent.is_none() {
                requested.parent = toplevel
                    .parent()
                    .and_then(|parent| self.shell.window_id_for_surface(&parent));
            }
        }

        let spec = self.policy.place_new_window(&mut self.shell, &app, &requested);
        self.shell.commit_placement(id, &spec);

        let Some(info) = self.shell.info_for(id) else {
            return;
        };
        self.policy.advise_new_window(&info);
        if info.is_application() {
            self.shell.select_active_window(Some(id));
            self.apply_focus_request();
        }
    }

    pub fn refresh_title(&mut self, id: WindowId) {
        let Some(managed) = self.shell.window_mut(id) else {
            return;
        };
        if let Some(title) = managed
            .window
            .toplevel()
            .and_then(|toplevel| toplevel_title(toplevel.wl_surface()))
            && title != managed.info.name
        {
            managed.info.name = title;
        }
    }

    /// A client asked for a new window state. Before placement the request is
    /// remembered and honoured when the window is placed.
    pub fn request_state(
        &mut self,
        surface: &WlSurface,
        state: WindowState,
        output: Option<OutputId>,
    ) {
        let Some(id) = self.shell.window_id_for_surface(surface) else {
            return;
        };
        let Some(managed) = self.shell.window_mut(id) else {
            return;
        };
        if !managed.placed {
            managed.requested.state = Some(state);
            if output.is_some() {
                managed.requested.output_id = output;
            }
            return;
        }

        let info = managed.info.clone();
        let modifications = WindowSpecification {
            state: Some(state),
            output_id: output,
            ..Default::default()
        };
        tracing::debug!(window = ?id, ?state, ?output, "state requested");
        self.policy
            .handle_modify_window(&mut self.shell, &info, &modifications);

        if let Some(info) = self.shell.info_for(id) {
            let proposed = info.extents();
            let confirmed = self.policy.confirm_placement_on_display(
                &mut self.shell,
                &info,
                info.state,
                proposed,
            );
            if confirmed != proposed {
                let spec = WindowSpecification {
                    top_left: Some(confirmed.loc),
                    size: Some(confirmed.size),
                    ..Default::default()
                };
                self.shell.modify_window(id, &spec);
            }
        }
        self.apply_focus_request();
    }

    pub fn close_window(&mut self, surface: &WlSurface) {
        let Some(id) = self.shell.window_id_for_surface(surface) else {
            return;
        };
        let was_active = self.shell.active_window() == Some(id);
        let Some(managed) = self.shell.remove_window(id) else {
            return;
        };
        if managed.placed {
            self.policy.advise_delete_window(&managed.info);
        }
        if was_active {
            let next = self.shell.topmost_application();
            self.shell.select_active_window(next);
            self.apply_focus_request();
        }
    }

    /// Moves keyboard focus to whatever the policy last selected.
    pub fn apply_focus_request(&mut self) {
        let Some(target) = self.shell.take_focus_request() else {
            return;
        };
        let surface = target
            .and_then(|id| self.shell.window(id))
            .and_then(|managed| managed.window.toplevel())
            .map(|toplevel| toplevel.wl_surface().clone());
        self.set_keyboard_focus(surface, SERIAL_COUNTER.next_serial());
    }

    pub fn sync_window_activation(&self, focused: Option<&WlSurface>) {
        for window in self.shell.space.elements() {
            let Some(toplevel) = window.toplevel() else {
                continue;
            };
            let is_focused = focused.is_some_and(|surface| toplevel.wl_surface() == surface);
            toplevel.with_pending_state(|state| {
                if is_focused {
                    state.states.set(xdg_toplevel::State::Activated);
                } else {
                    state.states.unset(xdg_toplevel::State::Activated);
                }
            });
            if toplevel.is_initial_configure_sent() {
                toplevel.send_pending_configure();
            }
        }
    }

    pub fn set_keyboard_focus(&mut self, target: Option<WlSurface>, serial: Serial) {
        self.sync_window_activation(target.as_ref());
        if let Some(keyboard) = self.seat.get_keyboard() {
            keyboard.set_focus(self, target, serial);
        }
    }

    /// Topmost surface at `position`, layer surfaces included.
    pub fn surface_under(
        &self,
        position: Point<f64, Logical>,
    ) -> Option<(WlSurface, Point<f64, Logical>)> {
        let space = &self.shell.space;
        let (output, output_geo) = space.outputs().find_map(|output| {
            let geometry = space.output_geometry(output)?;
            geometry
                .to_f64()
                .contains(position)
                .then_some((output, geometry))
        })?;

        let layer_map = layer_map_for_output(output);
        let position_within_output = position - output_geo.loc.to_f64();

        let surface_on_layer = |layer: WlrLayer| {
            layer_map.layers_on(layer).rev().find_map(|layer_surface| {
                let layer_geo = layer_map.layer_geometry(layer_surface)?;
                layer_surface
                    .surface_under(
                        position_within_output - layer_geo.loc.to_f64(),
                        WindowSurfaceType::ALL,
                    )
                    .map(|(surface, local_pos)| {
                        (
                            surface,
                            output_geo.loc.to_f64() + layer_geo.loc.to_f64() + local_pos.to_f64(),
                        )
                    })
            })
        };

        surface_on_layer(WlrLayer::Overlay)
            .or_else(|| surface_on_layer(WlrLayer::Top))
            .or_else(|| {
                space.element_under(position).and_then(|(window, location)| {
                    window
                        .surface_under(position - location.to_f64(), WindowSurfaceType::ALL)
                        .map(|(surface, local_pos)| (surface, (local_pos + location).to_f64()))
                })
            })
            .or_else(|| surface_on_layer(WlrLayer::Bottom))
            .or_else(|| surface_on_layer(WlrLayer::Background))
    }
}

fn toplevel_title(surface: &WlSurface) -> Option<String> {
    with_states(surface, |states| {
        let role = states.data_map.get::<XdgToplevelSurfaceData>()?.lock().ok()?;
        role.title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_owned)
    })
}

pub fn init_wayland_listener(
    display: Display<Frame>,
    loop_handle: &LoopHandle<'static, Frame>,
) -> Result<OsString, CompositorError> {
    let listening_socket = ListeningSocketSource::new_auto()
        .map_err(|err| CompositorError::Backend(format!("failed to create socket: {err}")))?;
    let socket_name = listening_socket.socket_name().to_os_string();

    loop_handle
        .insert_source(listening_socket, move |client_stream, _, state| {
            let client_state = state.client_state_for(&client_stream);
            tracing::debug!(
                pid = ?client_state.pid,
                snap_name = %client_state.snap_name,
                "accepting client"
            );
            if let Err(err) = state
                .display_handle
                .insert_client(client_stream, Arc::new(client_state))
            {
                tracing::warn!("failed to insert client: {err}");
            }
        })
        .map_err(|err| CompositorError::EventLoop(format!("failed to init wayland listener: {err}")))?;

    loop_handle
        .insert_source(
            Generic::new(display, Interest::READ, TriggerMode::Level),
            move |_, display, state| {
                // Safety: we don't drop the display
                unsafe {
                    display.get_mut().dispatch_clients(state)?;
                }
                Ok(PostAction::Continue)
            },
        )
        .map_err(|err| CompositorError::EventLoop(format!("failed to init display source: {err}")))?;

    tracing::info!(socket = ?socket_name, "listening on wayland socket");
    Ok(socket_name)
}

/// Per-connection data: who the client is and which restricted globals it
/// may bind.
#[derive(Default)]
pub struct ClientState {
    pub compositor_state: CompositorClientState,
    pub pid: Option<i32>,
    pub snap_name: String,
    /// Placement key for snap routing.
    pub snap_instance: String,
    pub internal: bool,
    hidden_protocols: BTreeSet<String>,
}

impl ClientState {
    pub fn new(
        pid: Option<i32>,
        snap_name: String,
        snap_instance: String,
        auth: &AuthModel,
        preferences: &ExtensionPreferences,
    ) -> Self {
        let hidden_protocols = auth
            .protocols()
            .chain(std::iter::once(LAYER_SHELL))
            .filter(|protocol| !auth.is_allowed(protocol, &snap_name, preferences))
            .map(str::to_owned)
            .collect();
        Self {
            pid,
            snap_name,
            snap_instance,
            hidden_protocols,
            ..Self::default()
        }
    }

    pub fn can_view(&self, protocol: &str) -> bool {
        self.internal || !self.hidden_protocols.contains(protocol)
    }
}

impl ClientData for ClientState {
    fn initialized(&self, client_id: ClientId) {
        tracing::info!(?client_id, pid = ?self.pid, snap_name = %self.snap_name, "wayland client initialized");
    }

    fn disconnected(&self, client_id: ClientId, reason: DisconnectReason) {
        tracing::info!(?client_id, ?reason, "wayland client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{SCREENCOPY, VIRTUAL_KEYBOARD};

    #[test]
    fn restricted_globals_follow_the_auth_model() {
        let auth = AuthModel::builtin();
        let prefs = ExtensionPreferences::default();

        let osk = ClientState::new(
            Some(10),
            "ubuntu-frame-osk".into(),
            "ubuntu-frame-osk".into(),
            &auth,
            &prefs,
        );
        assert!(osk.can_view(LAYER_SHELL));
        assert!(osk.can_view(VIRTUAL_KEYBOARD));
        assert!(!osk.can_view(SCREENCOPY));

        let app = ClientState::new(Some(11), String::new(), String::new(), &auth, &prefs);
        assert!(!app.can_view(LAYER_SHELL));
        assert!(app.can_view("wl_compositor"));
    }

    #[test]
    fn operator_preferences_override_the_model() {
        let auth = AuthModel::builtin();
        let prefs = ExtensionPreferences::from_lists(LAYER_SHELL, "");
        let app = ClientState::new(Some(11), String::new(), String::new(), &auth, &prefs);
        assert!(app.can_view(LAYER_SHELL));
    }

    #[test]
    fn the_internal_client_sees_everything() {
        let internal = ClientState {
            internal: true,
            hidden_protocols: [LAYER_SHELL.to_owned()].into(),
            ..ClientState::default()
        };
        assert!(internal.can_view(LAYER_SHELL));
    }
}
