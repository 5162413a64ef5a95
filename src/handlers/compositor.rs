use smithay::{
    backend::renderer::utils::on_commit_buffer_handler,
    delegate_compositor, delegate_shm,
    reexports::wayland_server::{
        Client,
        protocol::{wl_buffer, wl_surface::WlSurface},
    },
    wayland::{
        buffer::BufferHandler,
        compositor::{
            CompositorClientState, CompositorHandler, CompositorState, get_parent,
            is_sync_subsurface,
        },
        shm::{ShmHandler, ShmState},
    },
};

use crate::{
    Frame,
    handlers::{layer_shell, xdg_shell},
    policy::WindowManagementPolicy,
    state::ClientState,
};

impl CompositorHandler for Frame {
    fn compositor_state(&mut self) -> &mut CompositorState {
        &mut self.compositor_state
    }

    fn client_compositor_state<'a>(&self, client: &'a Client) -> &'a CompositorClientState {
        // Every client is inserted with a `ClientState`.
        &client
            .get_data::<ClientState>()
            .expect("client without ClientState")
            .compositor_state
    }

    fn commit(&mut self, surface: &WlSurface) {
        on_commit_buffer_handler::<Self>(surface);

        if !is_sync_subsurface(surface) {
            let mut root = surface.clone();
            while let Some(parent) = get_parent(&root) {
                root = parent;
            }

            if let Some(id) = self.shell.window_id_for_surface(&root)
                && let Some(managed) = self.shell.window(id)
            {
                managed.window.on_commit();
                let first_commit = !managed.placed
                    && managed
                        .window
                        .toplevel()
                        .is_some_and(|toplevel| !toplevel.is_initial_configure_sent());

                if first_commit {
                    self.place_window(id);
                    if let Some(toplevel) = self
                        .shell
                        .window(id)
                        .and_then(|managed| managed.window.toplevel())
                    {
                        toplevel.send_configure();
                    }
                } else if root == *surface {
                    self.refresh_title(id);
                }
            }
        }

        xdg_shell::handle_commit(&mut self.popups, surface);

        if layer_shell::handle_commit(&self.shell.space, surface) {
            self.refresh_zones();
            self.policy.advise_end(&mut self.shell);
        }
    }
}

impl BufferHandler for Frame {
    fn buffer_destroyed(&mut self, _buffer: &wl_buffer::WlBuffer) {}
}

impl ShmHandler for Frame {
    fn shm_state(&self) -> &ShmState {
        &self.shm_state
    }
}

delegate_shm!(Frame);
delegate_compositor!(Frame);
