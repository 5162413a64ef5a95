use smithay::{
    delegate_xdg_shell,
    desktop::{
        PopupKind, PopupManager, Window, find_popup_root_surface, get_popup_toplevel_coords,
    },
    output::Output,
    reexports::wayland_server::protocol::{wl_output::WlOutput, wl_seat, wl_surface::WlSurface},
    utils::Serial,
    wayland::shell::xdg::{
        PopupSurface, PositionerState, ToplevelSurface, XdgShellHandler, XdgShellState,
    },
};

use crate::{Frame, policy::WindowState};

impl XdgShellHandler for Frame {
    fn xdg_shell_state(&mut self) -> &mut XdgShellState {
        &mut self.xdg_shell_state
    }

    fn new_toplevel(&mut self, surface: ToplevelSurface) {
        let app = self.app_info_for(surface.wl_surface());
        let window = Window::new_wayland_window(surface);
        let id = self.shell.add_window(window, app);
        tracing::debug!(window = ?id, "new toplevel");
    }

    fn new_popup(&mut self, surface: PopupSurface, _positioner: PositionerState) {
        self.unconstrain_popup(&surface);
        if let Err(err) = self.popups.track_popup(PopupKind::Xdg(surface)) {
            tracing::warn!("error while tracking popup: {err:?}");
        }
    }

    fn grab(&mut self, _surface: PopupSurface, _seat: wl_seat::WlSeat, _serial: Serial) {}

    fn reposition_request(
        &mut self,
        surface: PopupSurface,
        positioner: PositionerState,
        token: u32,
    ) {
        surface.with_pending_state(|state| {
            state.geometry = positioner.get_geometry();
            state.positioner = positioner;
        });
        self.unconstrain_popup(&surface);
        surface.send_repositioned(token);
    }

    fn maximize_request(&mut self, surface: ToplevelSurface) {
        self.request_state(surface.wl_surface(), WindowState::Maximized, None);
    }

    fn unmaximize_request(&mut self, surface: ToplevelSurface) {
        self.request_state(surface.wl_surface(), WindowState::Restored, None);
    }

    fn fullscreen_request(&mut self, surface: ToplevelSurface, wl_output: Option<WlOutput>) {
        let output = wl_output
            .as_ref()
            .and_then(Output::from_resource)
            .and_then(|output| self.shell.output_id(&output));
        self.request_state(surface.wl_surface(), WindowState::Fullscreen, output);
    }

    fn unfullscreen_request(&mut self, surface: ToplevelSurface) {
        self.request_state(surface.wl_surface(), WindowState::Restored, None);
    }

    fn minimize_request(&mut self, surface: ToplevelSurface) {
        self.request_state(surface.wl_surface(), WindowState::Minimized, None);
    }

    fn toplevel_destroyed(&mut self, surface: ToplevelSurface) {
        self.close_window(surface.wl_surface());
    }
}

delegate_xdg_shell!(Frame);

/// Should be called on `WlSurface::commit`
pub fn handle_commit(popups: &mut PopupManager, surface: &WlSurface) {
    popups.commit(surface);
    if let Some(PopupKind::Xdg(xdg)) = popups.find_popup(surface)
        && !xdg.is_initial_configure_sent()
        && let Err(err) = xdg.send_configure()
    {
        tracing::warn!("initial popup configure failed: {err:?}");
    }
}

impl Frame {
    /// Keeps popups inside the output of their toplevel.
    pub fn unconstrain_popup(&self, popup: &PopupSurface) {
        let Ok(root) = find_popup_root_surface(&PopupKind::Xdg(popup.clone())) else {
            return;
        };
        let Some(window) = self.shell.window_for_surface(&root) else {
            return;
        };

        let space = &self.shell.space;
        let Some(output) = space
            .outputs_for_element(&window)
            .into_iter()
            .next()
            .or_else(|| space.outputs().next().cloned())
        else {
            return;
        };
        let Some(output_geo) = space.output_geometry(&output) else {
            return;
        };
        let window_geo = space
            .element_geometry(&window)
            .unwrap_or_else(|| window.geometry());

        // Relative to the parent's geometry.
        let mut target = output_geo;
        target.loc -= get_popup_toplevel_coords(&PopupKind::Xdg(popup.clone()));
        target.loc -= window_geo.loc;

        popup.with_pending_state(|state| {
            state.geometry = state.positioner.get_unconstrained_geometry(target);
        });
    }
}
