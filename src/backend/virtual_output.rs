//! Outputs with no host window behind them, mapped to the right of the
//! winit output. They come and go at runtime like hotplugged monitors.
//! Nothing is rendered for them; clients still see their `wl_output`
//! globals and windows are placed on them.

use smithay::{
    output::{Mode, Output, PhysicalProperties, Subpixel},
    reexports::wayland_server::backend::GlobalId,
    utils::{Physical, Size, Transform},
};

use crate::{Frame, output::OutputId};

const REFRESH_MHZ: i32 = 60_000;
const FALLBACK_SIZE: (i32, i32) = (1280, 720);

#[derive(Debug)]
struct VirtualOutput {
    output: Output,
    global: GlobalId,
}

#[derive(Debug, Default)]
pub struct VirtualOutputs {
    outputs: Vec<VirtualOutput>,
    next_index: u32,
}

impl VirtualOutputs {
    fn next_name(&mut self) -> String {
        let name = format!("virtual-{}", self.next_index);
        self.next_index += 1;
        name
    }
}

impl Frame {
    /// Adds an output with the current mode of the first output.
    pub fn add_virtual_output(&mut self) -> OutputId {
        let size: Size<i32, Physical> = self
            .shell
            .output_ids()
            .first()
            .and_then(|id| self.shell.output(*id))
            .and_then(Output::current_mode)
            .map_or_else(|| FALLBACK_SIZE.into(), |mode| mode.size);
        let mode = Mode {
            size,
            refresh: REFRESH_MHZ,
        };

        let output = Output::new(
            self.virtual_outputs.next_name(),
            PhysicalProperties {
                size: (0, 0).into(),
                subpixel: Subpixel::Unknown,
                make: "Frame".into(),
                model: "Virtual".into(),
                serial_number: "Unknown".into(),
            },
        );
        let global = output.create_global::<Frame>(&self.display_handle);
        output.change_current_state(Some(mode), Some(Transform::Normal), None, None);
        output.set_preferred(mode);

        let id = self.add_output(output.clone());
        tracing::info!(output = %output.name(), ?id, size = ?mode.size, "virtual output added");
        self.virtual_outputs.outputs.push(VirtualOutput { output, global });
        id
    }

    /// Removes the most recently added virtual output. The winit output is
    /// never removed.
    pub fn remove_virtual_output(&mut self) -> bool {
        let Some(removed) = self.virtual_outputs.outputs.pop() else {
            tracing::info!("no virtual output to remove");
            return false;
        };
        self.remove_output(&removed.output);
        self.display_handle.remove_global::<Frame>(removed.global);
        tracing::info!(output = %removed.output.name(), "virtual output removed");
        true
    }
}
