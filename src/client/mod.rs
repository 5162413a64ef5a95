//! The in-process Wayland client painting the wallpaper and the diagnostic
//! screen on every output.

mod shm;
mod surfaces;

use std::{
    collections::HashMap,
    fs,
    os::{fd::AsFd, unix::net::UnixStream},
    path::PathBuf,
    thread::JoinHandle,
    time::Duration,
};

use anyhow::Context;
use calloop::{
    EventLoop, Interest, Mode as PollMode, PostAction,
    channel::{self, Channel, Sender},
    generic::Generic,
    ping::{self, Ping, PingSource},
    timer::{TimeoutAction, Timer},
};
use smithay::utils::{Logical, Rectangle};
use tracing::{debug, error, info, trace, warn};
use wayland_client::{
    Connection, Dispatch, EventQueue, QueueHandle, WEnum,
    protocol::{
        wl_buffer::{self, WlBuffer},
        wl_compositor::{self, WlCompositor},
        wl_output::{self, WlOutput},
        wl_registry::{self, WlRegistry},
        wl_shm::{self, WlShm},
        wl_shm_pool::{self, WlShmPool},
        wl_surface::{self, WlSurface},
    },
};
use wayland_protocols::xdg::shell::client::{
    xdg_surface::{self, XdgSurface},
    xdg_toplevel::{self, XdgToplevel},
    xdg_wm_base::{self, XdgWmBase},
};

use crate::{
    config::RuntimeConfig,
    policy::WindowManagerObserver,
    render::{self, BYTES_PER_PIXEL, Colour, TextRenderer},
};

pub use shm::ShmFile;
pub use surfaces::{Changed, Disposition, SurfaceTable};

/// Title of the fullscreen surfaces this client creates.
pub const BACKGROUND_TITLE: &str = "frame-background";

const THREAD_NAME: &str = "frame-client";
const OUTPUT_VERSION: u32 = 3;

/// What the fullscreen client paints with.
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub wallpaper_top: Colour,
    pub wallpaper_bottom: Colour,
    pub diagnostic_background: Colour,
    pub diagnostic_text: Colour,
    pub diagnostic_path: Option<PathBuf>,
    pub diagnostic_delay: Duration,
    pub font_path: Option<PathBuf>,
}

impl From<&RuntimeConfig> for ClientSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            wallpaper_top: config.wallpaper_top,
            wallpaper_bottom: config.wallpaper_bottom,
            diagnostic_background: config.diagnostic_background,
            diagnostic_text: config.diagnostic_text,
            diagnostic_path: config.diagnostic_path.clone(),
            diagnostic_delay: config.diagnostic_delay,
            font_path: config.font_path.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// Repaint every surfaced output.
    Redraw,
    /// Wake the loop so queued requests get written.
    Flush,
}

/// Cloneable, thread-safe way to poke the client loop.
#[derive(Clone)]
pub struct ClientHandle {
    sender: Sender<ClientEvent>,
    stop: Ping,
}

impl ClientHandle {
    pub fn request_redraw(&self) {
        self.send(ClientEvent::Redraw);
    }

    pub fn flush(&self) {
        self.send(ClientEvent::Flush);
    }

    pub fn stop(&self) {
        self.stop.ping();
    }

    #[cfg(test)]
    pub(crate) fn for_tests(sender: Sender<ClientEvent>, stop: Ping) -> Self {
        Self { sender, stop }
    }

    fn send(&self, event: ClientEvent) {
        if self.sender.send(event).is_err() {
            trace!(?event, "fullscreen client is gone; dropping request");
        }
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle").finish_non_exhaustive()
    }
}

/// The running client thread.
pub struct FullscreenClient {
    handle: ClientHandle,
    thread: Option<JoinHandle<anyhow::Result<()>>>,
}

impl FullscreenClient {
    /// Starts the client on `stream`, the client end of a socket pair the
    /// compositor serves.
    pub fn spawn(
        stream: UnixStream,
        settings: ClientSettings,
        observer: WindowManagerObserver,
    ) -> anyhow::Result<Self> {
        let (sender, events) = channel::channel();
        let (stop, stop_source) = ping::make_ping().context("failed to create stop ping")?;
        let handle = ClientHandle { sender, stop };

        let opened = handle.clone();
        observer.register_opened_callback(move || opened.request_redraw());
        let closed = handle.clone();
        observer.register_closed_callback(move || closed.request_redraw());

        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || {
                let result = run(stream, settings, observer, events, stop_source);
                if let Err(err) = &result {
                    error!("fullscreen client failed: {err:#}");
                }
                result
            })
            .context("failed to spawn fullscreen client thread")?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    pub fn stop_and_join(mut self) {
        self.handle.stop();
        let Some(thread) = self.thread.take() else {
            return;
        };
        match thread.join() {
            Ok(Ok(())) => info!("fullscreen client stopped"),
            Ok(Err(_)) => {}
            Err(_) => error!("fullscreen client thread panicked"),
        }
    }
}

struct LoopData {
    client: Client,
    queue: EventQueue<Client>,
    connection: Connection,
    readable: bool,
    shutdown: bool,
}

fn run(
    stream: UnixStream,
    settings: ClientSettings,
    observer: WindowManagerObserver,
    events: Channel<ClientEvent>,
    stop: PingSource,
) -> anyhow::Result<()> {
    let connection =
        Connection::from_socket(stream).context("failed to connect to the compositor")?;
    let queue = connection.new_event_queue::<Client>();
    let qh = queue.handle();
    connection.display().get_registry(&qh, ());

    let mut event_loop: EventLoop<'_, LoopData> =
        EventLoop::try_new().context("failed to create client event loop")?;
    let handle = event_loop.handle();

    let poll_fd = connection
        .backend()
        .poll_fd()
        .try_clone_to_owned()
        .context("failed to duplicate connection fd")?;
    handle
        .insert_source(
            Generic::new(poll_fd, Interest::READ, PollMode::Level),
            |_, _, data: &mut LoopData| {
                data.readable = true;
                Ok(PostAction::Continue)
            },
        )
        .map_err(|err| anyhow::anyhow!("failed to watch connection: {}", err.error))?;

    handle
        .insert_source(stop, |_, _, data: &mut LoopData| {
            debug!("fullscreen client asked to stop");
            data.shutdown = true;
        })
        .map_err(|err| anyhow::anyhow!("failed to insert stop ping: {}", err.error))?;

    handle
        .insert_source(events, |event, _, data: &mut LoopData| match event {
            channel::Event::Msg(ClientEvent::Redraw) => data.client.redraw_all(),
            channel::Event::Msg(ClientEvent::Flush) => {}
            channel::Event::Closed => {}
        })
        .map_err(|err| anyhow::anyhow!("failed to insert client channel: {}", err.error))?;

    let delay = settings.diagnostic_delay;
    let delay_expired = delay.is_zero();
    if !delay_expired {
        handle
            .insert_source(Timer::from_duration(delay), |_, _, data: &mut LoopData| {
                debug!("diagnostic delay expired");
                data.client.delay_expired = true;
                data.client.redraw_all();
                TimeoutAction::Drop
            })
            .map_err(|err| anyhow::anyhow!("failed to insert delay timer: {}", err.error))?;
    }

    let text = settings
        .font_path
        .as_deref()
        .and_then(|path| match TextRenderer::from_path(path) {
            Ok(renderer) => Some(renderer),
            Err(err) => {
                warn!("diagnostic text disabled: {err}");
                None
            }
        });

    let mut data = LoopData {
        client: Client {
            qh,
            settings,
            text,
            observer,
            compositor: None,
            shm: None,
            wm_base: None,
            outputs: HashMap::new(),
            table: SurfaceTable::default(),
            delay_expired,
            fatal: None,
        },
        queue,
        connection,
        readable: false,
        shutdown: false,
    };

    info!("fullscreen client running");
    while !data.shutdown {
        data.queue
            .dispatch_pending(&mut data.client)
            .context("failed to dispatch compositor events")?;
        if let Some(err) = data.client.fatal.take() {
            return Err(err);
        }
        data.connection
            .flush()
            .context("failed to flush requests to the compositor")?;

        data.readable = false;
        let guard = data.queue.prepare_read();
        // Events already queued: only poll the other sources.
        let timeout = if guard.is_some() {
            None
        } else {
            Some(Duration::ZERO)
        };
        event_loop
            .dispatch(timeout, &mut data)
            .context("failed to dispatch client event loop")?;

        if let Some(guard) = guard
            && data.readable
        {
            guard
                .read()
                .context("failed to read events from the compositor")?;
        }
        if let Some(err) = data.client.fatal.take() {
            return Err(err);
        }
    }

    data.client.destroy_all();
    // The compositor may already be gone.
    let _ = data.connection.flush();
    Ok(())
}

#[derive(Clone, Copy, Debug, Default)]
struct OutputGeometry {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    scale: i32,
    rotated: bool,
}

impl OutputGeometry {
    /// Logical extents in the global space.
    fn extents(&self) -> Rectangle<i32, Logical> {
        let scale = self.scale.max(1);
        let (width, height) = if self.rotated {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };
        Rectangle::new((self.x, self.y).into(), (width / scale, height / scale).into())
    }
}

struct Surface {
    wl_surface: WlSurface,
    xdg_surface: XdgSurface,
    toplevel: XdgToplevel,
    configured: bool,
    /// Size from the last toplevel configure, zero if unset.
    size: (i32, i32),
    buffer: Option<WlBuffer>,
}

impl Surface {
    fn destroy(self) {
        self.toplevel.destroy();
        self.xdg_surface.destroy();
        self.wl_surface.destroy();
        if let Some(buffer) = self.buffer {
            buffer.destroy();
        }
    }
}

struct OutputState {
    output: WlOutput,
    geometry: OutputGeometry,
    announced: bool,
    surface: Option<Surface>,
}

struct Client {
    qh: QueueHandle<Client>,
    settings: ClientSettings,
    text: Option<TextRenderer>,
    observer: WindowManagerObserver,
    compositor: Option<WlCompositor>,
    shm: Option<WlShm>,
    wm_base: Option<XdgWmBase>,
    /// Keyed by registry global name.
    outputs: HashMap<u32, OutputState>,
    table: SurfaceTable<u32>,
    delay_expired: bool,
    fatal: Option<anyhow::Error>,
}

impl Client {
    fn redraw_all(&mut self) {
        let surfaced: Vec<u32> = self.table.surfaced().collect();
        for name in surfaced {
            self.draw(name);
        }
    }

    fn surface_all(&mut self) {
        let surfaced: Vec<u32> = self.table.surfaced().collect();
        for name in surfaced {
            self.ensure_surface(name);
        }
    }

    /// Creates the fullscreen toplevel for a surfaced output. Drawing waits
    /// for the first configure.
    fn ensure_surface(&mut self, name: u32) {
        let (Some(compositor), Some(wm_base)) = (&self.compositor, &self.wm_base) else {
            return;
        };
        let Some(output) = self.outputs.get_mut(&name) else {
            return;
        };
        if output.surface.is_some() {
            return;
        }

        let wl_surface = compositor.create_surface(&self.qh, ());
        let xdg_surface = wm_base.get_xdg_surface(&wl_surface, &self.qh, name);
        let toplevel = xdg_surface.get_toplevel(&self.qh, name);
        toplevel.set_title(BACKGROUND_TITLE.to_owned());
        toplevel.set_fullscreen(Some(&output.output));
        wl_surface.commit();

        debug!(output = name, "created fullscreen surface");
        output.surface = Some(Surface {
            wl_surface,
            xdg_surface,
            toplevel,
            configured: false,
            size: (0, 0),
            buffer: None,
        });
    }

    fn destroy_all(&mut self) {
        for (_, output) in self.outputs.drain() {
            if let Some(surface) = output.surface {
                surface.destroy();
            }
        }
    }

    /// The diagnostic text to show instead of the wallpaper, if any.
    fn diagnostic_text(&self) -> Option<Vec<u8>> {
        let path = self.settings.diagnostic_path.as_ref()?;
        if !self.delay_expired || self.observer.currently_open_windows() != 0 {
            return None;
        }
        match fs::read(path) {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(err) => {
                trace!(path = %path.display(), "no diagnostic to show: {err}");
                None
            }
        }
    }

    fn draw(&mut self, name: u32) {
        if let Err(err) = self.draw_screen(name) {
            self.fatal.get_or_insert(err);
        }
    }

    fn draw_screen(&mut self, name: u32) -> anyhow::Result<()> {
        let diagnostic = self.diagnostic_text();
        let Some(shm) = &self.shm else {
            return Ok(());
        };
        let Some(output) = self.outputs.get_mut(&name) else {
            return Ok(());
        };
        let Some(surface) = output.surface.as_mut() else {
            return Ok(());
        };
        if !surface.configured {
            return Ok(());
        }

        let (width, height) = match surface.size {
            (width, height) if width > 0 && height > 0 => (width, height),
            _ => {
                let extents = output.geometry.extents();
                (extents.size.w, extents.size.h)
            }
        };
        if width <= 0 || height <= 0 {
            trace!(output = name, "output has no size yet");
            return Ok(());
        }

        let stride = width * BYTES_PER_PIXEL as i32;
        let len = usize::try_from(stride)? * usize::try_from(height)?;
        let mut file = ShmFile::new(len).context("failed to allocate shm buffer")?;
        let pixels = file.pixels_mut();
        let (w, h) = (width as u32, height as u32);

        let settings = &self.settings;
        match &diagnostic {
            Some(text) => {
                render::render_solid(w, h, pixels, settings.diagnostic_background);
                match &self.text {
                    Some(renderer) => {
                        render::render_diagnostic(
                            renderer,
                            w,
                            h,
                            pixels,
                            text,
                            settings.diagnostic_text,
                        );
                    }
                    None => warn!("no usable font; diagnostic text not rendered"),
                }
            }
            None => render::render_background(
                w,
                h,
                pixels,
                settings.wallpaper_bottom,
                settings.wallpaper_top,
            ),
        }

        let pool = shm.create_pool(file.as_fd(), i32::try_from(len)?, &self.qh, ());
        let buffer = pool.create_buffer(
            0,
            width,
            height,
            stride,
            wl_shm::Format::Argb8888,
            &self.qh,
            (),
        );
        pool.destroy();

        surface.wl_surface.attach(Some(&buffer), 0, 0);
        surface.wl_surface.damage(0, 0, width, height);
        surface.wl_surface.commit();
        if let Some(old) = surface.buffer.replace(buffer) {
            old.destroy();
        }

        trace!(
            output = name,
            width,
            height,
            diagnostic = diagnostic.is_some(),
            "drew fullscreen surface"
        );
        Ok(())
    }

    fn output_done(&mut self, name: u32) {
        let Some(output) = self.outputs.get_mut(&name) else {
            return;
        };
        let extents = output.geometry.extents();

        if !output.announced {
            output.announced = true;
            match self.table.output_new(name, extents) {
                Disposition::Surfaced => self.ensure_surface(name),
                Disposition::Hidden => {
                    debug!(output = name, ?extents, "output overlaps the display area; hidden")
                }
            }
            return;
        }

        let Changed { redraw, promoted } = self.table.output_changed(name, extents);
        if redraw {
            self.draw(name);
        }
        if let Some(promoted) = promoted {
            debug!(output = promoted, "surfacing previously hidden output");
            self.ensure_surface(promoted);
        }
    }

    fn output_gone(&mut self, name: u32) {
        let Some(output) = self.outputs.remove(&name) else {
            return;
        };
        if let Some(surface) = output.surface {
            surface.destroy();
        }
        if output.announced
            && let Some(promoted) = self.table.output_gone(name)
        {
            debug!(output = promoted, "surfacing previously hidden output");
            self.ensure_surface(promoted);
        }
    }
}

impl Dispatch<WlRegistry, ()> for Client {
    fn event(
        state: &mut Self,
        registry: &WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => match &interface[..] {
                "wl_compositor" => {
                    state.compositor = Some(registry.bind(name, version.min(4), qh, ()));
                    state.surface_all();
                }
                "wl_shm" => {
                    state.shm = Some(registry.bind(name, 1, qh, ()));
                    state.redraw_all();
                }
                "xdg_wm_base" => {
                    state.wm_base = Some(registry.bind(name, 1, qh, ()));
                    state.surface_all();
                }
                "wl_output" if version >= 2 => {
                    let output = registry.bind(name, version.min(OUTPUT_VERSION), qh, name);
                    state.outputs.insert(
                        name,
                        OutputState {
                            output,
                            geometry: OutputGeometry::default(),
                            announced: false,
                            surface: None,
                        },
                    );
                }
                _ => {}
            },
            wl_registry::Event::GlobalRemove { name } => state.output_gone(name),
            _ => {}
        }
    }
}

impl Dispatch<WlOutput, u32> for Client {
    fn event(
        state: &mut Self,
        _: &WlOutput,
        event: wl_output::Event,
        name: &u32,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(output) = state.outputs.get_mut(name) else {
            return;
        };
        match event {
            wl_output::Event::Geometry {
                x, y, transform, ..
            } => {
                output.geometry.x = x;
                output.geometry.y = y;
                output.geometry.rotated = matches!(
                    transform,
                    WEnum::Value(
                        wl_output::Transform::_90
                            | wl_output::Transform::_270
                            | wl_output::Transform::Flipped90
                            | wl_output::Transform::Flipped270
                    )
                );
            }
            wl_output::Event::Mode {
                flags: WEnum::Value(flags),
                width,
                height,
                ..
            } if flags.contains(wl_output::Mode::Current) => {
                output.geometry.width = width;
                output.geometry.height = height;
            }
            wl_output::Event::Scale { factor } => output.geometry.scale = factor,
            wl_output::Event::Done => state.output_done(*name),
            _ => {}
        }
    }
}

impl Dispatch<XdgWmBase, ()> for Client {
    fn event(
        _: &mut Self,
        wm_base: &XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<XdgSurface, u32> for Client {
    fn event(
        state: &mut Self,
        xdg_surface: &XdgSurface,
        event: xdg_surface::Event,
        name: &u32,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            xdg_surface.ack_configure(serial);
            if let Some(surface) = state
                .outputs
                .get_mut(name)
                .and_then(|output| output.surface.as_mut())
            {
                surface.configured = true;
            }
            state.draw(*name);
        }
    }
}

impl Dispatch<XdgToplevel, u32> for Client {
    fn event(
        state: &mut Self,
        _: &XdgToplevel,
        event: xdg_toplevel::Event,
        name: &u32,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            xdg_toplevel::Event::Configure { width, height, .. } => {
                if let Some(surface) = state
                    .outputs
                    .get_mut(name)
                    .and_then(|output| output.surface.as_mut())
                {
                    surface.size = (width, height);
                }
            }
            xdg_toplevel::Event::Close => {
                debug!(output = *name, "compositor asked to close a fullscreen surface");
            }
            _ => {}
        }
    }
}

impl Dispatch<WlBuffer, ()> for Client {
    fn event(
        _: &mut Self,
        _: &WlBuffer,
        _: wl_buffer::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<WlCompositor, ()> for Client {
    fn event(
        _: &mut Self,
        _: &WlCompositor,
        _: wl_compositor::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<WlSurface, ()> for Client {
    fn event(
        _: &mut Self,
        _: &WlSurface,
        _: wl_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<WlShm, ()> for Client {
    fn event(
        _: &mut Self,
        _: &WlShm,
        _: wl_shm::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<WlShmPool, ()> for Client {
    fn event(
        _: &mut Self,
        _: &WlShmPool,
        _: wl_shm_pool::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotated_outputs_swap_their_extents() {
        let geometry = OutputGeometry {
            x: 100,
            y: 0,
            width: 1920,
            height: 1080,
            scale: 2,
            rotated: true,
        };
        assert_eq!(
            geometry.extents(),
            Rectangle::new((100, 0).into(), (540, 960).into())
        );
    }

    #[test]
    fn unscaled_outputs_keep_their_mode() {
        let geometry = OutputGeometry {
            width: 800,
            height: 600,
            ..Default::default()
        };
        assert_eq!(
            geometry.extents(),
            Rectangle::new((0, 0).into(), (800, 600).into())
        );
    }

    #[test]
    fn settings_follow_the_runtime_config() {
        let config = RuntimeConfig {
            diagnostic_path: Some(PathBuf::from("/tmp/diag.txt")),
            diagnostic_delay: Duration::from_secs(3),
            ..RuntimeConfig::default()
        };
        let settings = ClientSettings::from(&config);
        assert_eq!(settings.wallpaper_top, config.wallpaper_top);
        assert_eq!(settings.diagnostic_path, config.diagnostic_path);
        assert_eq!(settings.diagnostic_delay, Duration::from_secs(3));
    }

    #[test]
    fn handle_survives_a_stopped_client() {
        let (sender, events) = channel::channel();
        let (stop, _source) = ping::make_ping().expect("ping");
        let handle = ClientHandle::for_tests(sender, stop);
        drop(events);
        handle.request_redraw();
        handle.flush();
        handle.stop();
    }
}
