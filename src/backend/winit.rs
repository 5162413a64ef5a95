//! Nested host: one winit window standing in for the first output.

use std::time::Duration;

use smithay::{
    backend::{
        renderer::{
            damage::OutputDamageTracker, element::surface::WaylandSurfaceRenderElement,
            gles::GlesRenderer,
        },
        winit::{self, WinitEvent, WinitGraphicsBackend},
    },
    desktop::{layer_map_for_output, space::render_output},
    output::{Mode, Output, PhysicalProperties, Subpixel},
    reexports::calloop::EventLoop,
    utils::{Rectangle, Transform},
};

use crate::{CompositorError, Frame};

pub const OUTPUT_NAME: &str = "winit";
const REFRESH_MHZ: i32 = 60_000;
const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

pub fn init_winit(
    event_loop: &mut EventLoop<'static, Frame>,
    state: &mut Frame,
) -> Result<(), CompositorError> {
    let (mut backend, winit) = winit::init::<GlesRenderer>()
        .map_err(|err| CompositorError::Backend(format!("failed to init winit: {err}")))?;

    let mode = Mode {
        size: backend.window_size(),
        refresh: REFRESH_MHZ,
    };
    let output = Output::new(
        OUTPUT_NAME.to_owned(),
        PhysicalProperties {
            size: (0, 0).into(),
            subpixel: Subpixel::Unknown,
            make: "Frame".into(),
            model: "Winit".into(),
            serial_number: "Unknown".into(),
        },
    );
    let _global = output.create_global::<Frame>(&state.display_handle);
    output.change_current_state(
        Some(mode),
        Some(Transform::Flipped180),
        None,
        Some((0, 0).into()),
    );
    output.set_preferred(mode);
    let output_id = state.add_output(output.clone());
    tracing::info!(?output_id, size = ?mode.size, "winit output ready");

    let mut damage_tracker = OutputDamageTracker::from_output(&output);
    backend.window().request_redraw();

    event_loop
        .handle()
        .insert_source(winit, move |event, _, state| match event {
            WinitEvent::Resized { size, .. } => {
                let mode = Mode {
                    size,
                    refresh: REFRESH_MHZ,
                };
                state.resize_output(&output, mode);
                damage_tracker = OutputDamageTracker::from_output(&output);
            }
            WinitEvent::Input(event) => state.handle_input_event(event),
            WinitEvent::Redraw => {
                redraw(state, &mut backend, &output, &mut damage_tracker);
                backend.window().request_redraw();
            }
            WinitEvent::CloseRequested => {
                tracing::info!("host window closed");
                state.loop_signal.stop();
            }
            _ => {}
        })
        .map_err(|err| CompositorError::EventLoop(format!("failed to init winit source: {err}")))?;

    Ok(())
}

fn redraw(
    state: &mut Frame,
    backend: &mut WinitGraphicsBackend<GlesRenderer>,
    output: &Output,
    damage_tracker: &mut OutputDamageTracker,
) {
    let size = backend.window_size();
    {
        let (renderer, mut framebuffer) = match backend.bind() {
            Ok(bound) => bound,
            Err(err) => {
                tracing::error!("failed to bind winit backend: {err}");
                return;
            }
        };

        if let Err(err) = render_output::<_, WaylandSurfaceRenderElement<GlesRenderer>, _, _>(
            output,
            renderer,
            &mut framebuffer,
            1.0,
            0,
            [&state.shell.space],
            &[],
            damage_tracker,
            CLEAR_COLOR,
        ) {
            tracing::error!("render error: {err:?}");
            return;
        }
    }

    if let Err(err) = backend.submit(Some(&[Rectangle::from_size(size)])) {
        tracing::warn!("failed to submit frame: {err}");
    }

    let elapsed = state.start_time.elapsed();
    state.shell.space.elements().for_each(|window| {
        window.send_frame(output, elapsed, Some(Duration::ZERO), |_, _| {
            Some(output.clone())
        });
    });
    // Virtual outputs are never drawn; their layers follow this output's
    // frame clock.
    for layer_output in state.shell.space.outputs() {
        layer_map_for_output(layer_output).layers().for_each(|layer| {
            layer.send_frame(output, elapsed, Some(Duration::ZERO), |_, _| {
                Some(output.clone())
            });
        });
    }

    state.shell.space.refresh();
    state.popups.cleanup();
    if let Err(err) = state.display_handle.flush_clients() {
        tracing::warn!("failed to flush clients: {err}");
    }
}
