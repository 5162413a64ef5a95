//! Repaints the fullscreen client when the diagnostic file changes.

use std::{
    ffi::{CString, OsStr},
    io,
    os::{
        fd::{AsFd, AsRawFd, FromRawFd, OwnedFd},
        unix::ffi::OsStrExt,
    },
    path::Path,
    thread::JoinHandle,
};

use calloop::{
    EventLoop, Interest, Mode, PostAction,
    generic::Generic,
    ping::{self, Ping},
};
use tracing::{debug, error, info, trace};

use crate::{CompositorError, client::ClientHandle};

const THREAD_NAME: &str = "frame-diagnostic-watcher";
const WATCH_MASK: u32 = libc::IN_CREATE
    | libc::IN_CLOSE_WRITE
    | libc::IN_MOVED_TO
    | libc::IN_DELETE
    | libc::IN_MOVED_FROM;
/// `struct inotify_event` without the trailing name.
const EVENT_HEADER_LEN: usize = 16;

/// Watches the parent directory of the diagnostic file, since the file
/// itself may not exist yet.
pub struct DiagnosticWatcher {
    stop: Ping,
    thread: Option<JoinHandle<()>>,
}

impl DiagnosticWatcher {
    pub fn spawn(path: &Path, client: ClientHandle) -> Result<Self, CompositorError> {
        let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(CompositorError::Config(format!(
                "cannot watch diagnostic path {}",
                path.display()
            )));
        };
        let file_name = file_name.to_owned();
        let inotify = watch_directory(dir)?;

        let (stop, stop_source) = ping::make_ping()?;
        let dir_display = dir.display().to_string();
        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || {
                if let Err(err) = run(inotify, stop_source, &file_name, client) {
                    error!("diagnostic watcher failed: {err}");
                }
            })?;

        info!(dir = %dir_display, "watching for diagnostic changes");
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Signals the watcher thread and waits for it to exit.
    pub fn stop(mut self) {
        self.stop.ping();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("diagnostic watcher thread panicked");
        }
    }
}

fn watch_directory(dir: &Path) -> io::Result<OwnedFd> {
    // Safety: plain syscall; a non-negative return is a descriptor we own.
    let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Safety: see above.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let dir = CString::new(dir.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    // Safety: `fd` is a live inotify descriptor and `dir` is NUL-terminated.
    let wd = unsafe { libc::inotify_add_watch(fd.as_raw_fd(), dir.as_ptr(), WATCH_MASK) };
    if wd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

struct WatchData {
    shutdown: bool,
}

fn run(
    inotify: OwnedFd,
    stop: ping::PingSource,
    file_name: &OsStr,
    client: ClientHandle,
) -> Result<(), CompositorError> {
    let mut event_loop: EventLoop<'_, WatchData> =
        EventLoop::try_new().map_err(|e| CompositorError::EventLoop(e.to_string()))?;
    let handle = event_loop.handle();

    handle
        .insert_source(stop, |_, _, data: &mut WatchData| data.shutdown = true)
        .map_err(|e| CompositorError::EventLoop(e.error.to_string()))?;

    let mut buffer = vec![0u8; 4096];
    handle
        .insert_source(
            Generic::new(inotify, Interest::READ, Mode::Level),
            move |_, fd, _: &mut WatchData| {
                loop {
                    // Safety: `buffer` outlives the call and its length is passed.
                    let read = unsafe {
                        libc::read(
                            fd.as_fd().as_raw_fd(),
                            buffer.as_mut_ptr().cast(),
                            buffer.len(),
                        )
                    };
                    if read < 0 {
                        let err = io::Error::last_os_error();
                        if err.kind() == io::ErrorKind::WouldBlock {
                            break;
                        }
                        return Err(err);
                    }
                    if read == 0 {
                        break;
                    }
                    if touches(&buffer[..read as usize], file_name) {
                        debug!("diagnostic file changed");
                        client.request_redraw();
                    }
                }
                Ok(PostAction::Continue)
            },
        )
        .map_err(|e| CompositorError::EventLoop(e.error.to_string()))?;

    let mut data = WatchData { shutdown: false };
    while !data.shutdown {
        event_loop
            .dispatch(None, &mut data)
            .map_err(|e| CompositorError::EventLoop(e.to_string()))?;
    }
    trace!("diagnostic watcher stopped");
    Ok(())
}

/// Whether a buffer of inotify events mentions `file_name`.
fn touches(mut events: &[u8], file_name: &OsStr) -> bool {
    let mut touched = false;
    while events.len() >= EVENT_HEADER_LEN {
        let field = |offset: usize| {
            u32::from_ne_bytes([
                events[offset],
                events[offset + 1],
                events[offset + 2],
                events[offset + 3],
            ])
        };
        let mask = field(4);
        let len = field(12) as usize;
        let Some(name) = events.get(EVENT_HEADER_LEN..EVENT_HEADER_LEN + len) else {
            break;
        };
        let name = name.split(|byte| *byte == 0).next().unwrap_or_default();

        if mask & WATCH_MASK != 0 && name == file_name.as_bytes() {
            touched = true;
        }
        events = &events[EVENT_HEADER_LEN + len..];
    }
    touched
}
