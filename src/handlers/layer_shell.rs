use smithay::{
    delegate_layer_shell,
    desktop::{LayerSurface, Space, Window, WindowSurfaceType, layer_map_for_output},
    output::Output,
    reexports::wayland_server::protocol::{wl_output::WlOutput, wl_surface::WlSurface},
    wayland::{
        compositor::{self, get_parent},
        shell::{
            wlr_layer::{
                Layer, LayerSurface as WlrLayerSurface, LayerSurfaceData, WlrLayerShellHandler,
                WlrLayerShellState,
            },
            xdg::PopupSurface,
        },
    },
};

use crate::{Frame, policy::WindowManagementPolicy};

impl WlrLayerShellHandler for Frame {
    fn shell_state(&mut self) -> &mut WlrLayerShellState {
        &mut self.layer_shell_state
    }

    fn new_layer_surface(
        &mut self,
        surface: WlrLayerSurface,
        wl_output: Option<WlOutput>,
        layer: Layer,
        namespace: String,
    ) {
        let output = wl_output
            .as_ref()
            .and_then(Output::from_resource)
            .or_else(|| self.shell.space.outputs().next().cloned());

        let Some(output) = output else {
            tracing::warn!(namespace, "no output for new layer surface");
            return;
        };

        tracing::debug!(
            namespace,
            requested_layer = ?layer,
            output = %output.name(),
            "new layer surface"
        );

        let layer_surface = LayerSurface::new(surface, namespace);
        let mut layer_map = layer_map_for_output(&output);
        if let Err(err) = layer_map.map_layer(&layer_surface) {
            tracing::warn!("failed to map layer surface: {err:?}");
        }
    }

    fn layer_destroyed(&mut self, surface: WlrLayerSurface) {
        let unmapped = self.shell.space.outputs().any(|output| {
            let mut map = layer_map_for_output(output);
            let layer = map
                .layers()
                .find(|layer| layer.layer_surface() == &surface)
                .cloned();
            layer.map(|layer| map.unmap_layer(&layer)).is_some()
        });

        // Exclusive zones may have shrunk.
        if unmapped {
            self.refresh_zones();
            self.policy.advise_end(&mut self.shell);
        }
    }

    fn new_popup(&mut self, _parent: WlrLayerSurface, popup: PopupSurface) {
        self.unconstrain_popup(&popup);
    }
}

delegate_layer_shell!(Frame);

/// Should be called on `WlSurface::commit`. Returns whether a layer surface
/// was rearranged, so application zones may have changed.
pub fn handle_commit(space: &Space<Window>, surface: &WlSurface) -> bool {
    let mut root_surface = surface.clone();
    while let Some(parent) = get_parent(&root_surface) {
        root_surface = parent;
    }

    for output in space.outputs() {
        let mut layer_map = layer_map_for_output(output);
        let Some(layer) = layer_map
            .layer_for_surface(&root_surface, WindowSurfaceType::TOPLEVEL)
            .cloned()
        else {
            continue;
        };
        layer_map.arrange();

        let initial_configure_sent = compositor::with_states(&root_surface, |states| {
            states
                .data_map
                .get::<LayerSurfaceData>()
                .and_then(|data| data.lock().ok().map(|data| data.initial_configure_sent))
                .unwrap_or(true)
        });

        tracing::trace!(
            namespace = layer.namespace(),
            layer = ?layer.layer(),
            initial_configure_sent,
            geometry = ?layer_map.layer_geometry(&layer),
            "layer commit"
        );

        if !initial_configure_sent {
            layer.layer_surface().send_configure();
        }
        return true;
    }

    false
}
