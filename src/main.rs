use frame::{
    CompositorError, Frame, Result,
    client::{ClientSettings, FullscreenClient},
    config::{self, RuntimeConfig},
    display_config::DisplayConfig,
    watcher::DiagnosticWatcher,
};
use smithay::reexports::{
    calloop::{
        EventLoop,
        signals::{Signal, Signals},
    },
    wayland_server::Display,
};
use std::{backtrace::Backtrace, fs, os::unix::net::UnixStream, path::PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    init_backtrace_defaults();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = RuntimeConfig::load(&args)?;
    if config.help {
        print!("{}", config::usage());
        return Ok(());
    }

    init_logging()?;
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::force_capture();
        tracing::error!("panic: {panic_info}\n{backtrace}");
        eprintln!("panic: {panic_info}\n{backtrace}");
    }));

    let mut event_loop: EventLoop<Frame> =
        EventLoop::try_new().map_err(|e| CompositorError::EventLoop(e.to_string()))?;

    // Block the signals before any helper thread starts so only the loop
    // sees them.
    let signals = Signals::new(&[Signal::SIGHUP, Signal::SIGUSR1, Signal::SIGUSR2])
        .map_err(|e| CompositorError::EventLoop(e.to_string()))?;
    event_loop
        .handle()
        .insert_source(signals, |event, _, state| match event.signal() {
            Signal::SIGHUP => {
                tracing::info!("SIGHUP: reloading display configuration");
                state.reload_display_config();
            }
            Signal::SIGUSR1 => {
                state.add_virtual_output();
            }
            Signal::SIGUSR2 => {
                state.remove_virtual_output();
            }
            other => tracing::debug!(signal = ?other, "ignoring signal"),
        })
        .map_err(|e| CompositorError::EventLoop(e.error.to_string()))?;

    let display_config = DisplayConfig::load(&config.display_config, &config.display_layout);
    let display = Display::new().map_err(|e| CompositorError::Backend(e.to_string()))?;
    let mut state = Frame::new(
        display,
        event_loop.handle(),
        event_loop.get_signal(),
        config.clone(),
        display_config,
    )?;

    // WAYLAND_DISPLAY still names the parent compositor here; winit
    // connects through it. Applications get the socket name from the log.
    frame::backend::winit::init_winit(&mut event_loop, &mut state)?;
    for _ in 0..config.virtual_outputs {
        state.add_virtual_output();
    }
    tracing::info!(socket = ?state.socket_name, "frame started");

    let (server_end, client_end) = UnixStream::pair()?;
    state.insert_internal_client(server_end)?;
    let client = FullscreenClient::spawn(
        client_end,
        ClientSettings::from(&config),
        state.policy.observer(),
    )
    .map_err(|err| CompositorError::Backend(format!("{err:#}")))?;

    let watcher = match &config.diagnostic_path {
        Some(path) => match DiagnosticWatcher::spawn(path, client.handle()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                tracing::warn!("not watching diagnostic file: {err}");
                None
            }
        },
        None => None,
    };

    let result = event_loop
        .run(None, &mut state, |state| {
            state.shell.space.refresh();
            state.popups.cleanup();
            if let Err(err) = state.display_handle.flush_clients() {
                tracing::warn!("failed to flush clients: {err}");
            }
        })
        .map_err(|e| CompositorError::EventLoop(e.to_string()));

    if let Some(watcher) = watcher {
        watcher.stop();
    }
    client.stop_and_join();
    result
}

fn init_backtrace_defaults() {
    if std::env::var_os("RUST_BACKTRACE").is_none() {
        // Safety: called at startup before creating any threads.
        unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
    }
    if std::env::var_os("RUST_LIB_BACKTRACE").is_none() {
        // Safety: called at startup before creating any threads.
        unsafe { std::env::set_var("RUST_LIB_BACKTRACE", "0") };
    }
}

const DEFAULT_LOG_FILTER: &str = concat!(
    "frame=debug,",
    "frame::client=info,",
    "smithay::backend::renderer::gles=error"
);

fn log_dir() -> PathBuf {
    if let Some(state_home) = std::env::var_os("XDG_STATE_HOME")
        && !state_home.is_empty()
    {
        return PathBuf::from(state_home).join("frame");
    }
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(".local/state/frame"))
        .unwrap_or_else(|| std::env::temp_dir().join("frame"))
}

fn init_logging() -> Result<()> {
    let log_dir = log_dir();
    fs::create_dir_all(&log_dir).map_err(|err| {
        CompositorError::Backend(format!(
            "failed to create log directory {}: {err}",
            log_dir.display()
        ))
    })?;

    let file_appender = tracing_appender::rolling::never(&log_dir, "frame.log");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender),
        )
        .init();

    let log_file = log_dir.join("frame.log");
    tracing::info!(path = %log_file.display(), "logging initialized");

    Ok(())
}
