use std::{
    fs,
    io,
    os::{fd::AsRawFd, unix::net::UnixStream},
    path::PathBuf,
};

const LABEL_PREFIX: &str = "snap.";

/// Snap name from an AppArmor label such as `snap.kiosk.app (enforce)`.
pub fn parse_snap_label(label: &str) -> Option<&str> {
    let label = label.trim_end_matches('\0').trim();
    let label = label
        .split_once(" (")
        .map_or(label, |(label, _mode)| label);
    let rest = label.strip_prefix(LABEL_PREFIX)?;
    let name = rest.split_once('.').map_or(rest, |(name, _)| name);
    (!name.is_empty()).then_some(name)
}

/// Snap name of the process, or the empty string for unconfined clients.
///
/// When no AppArmor label is readable and `fallback_without_apparmor` is
/// set, the `SNAP_NAME` variable of the process is trusted instead.
pub fn snap_name_of(pid: i32, fallback_without_apparmor: bool) -> String {
    match apparmor_label(pid) {
        Some(label) => parse_snap_label(&label).unwrap_or_default().to_owned(),
        None if fallback_without_apparmor => {
            tracing::debug!(pid, "no apparmor label; falling back to SNAP_NAME");
            environment_variable(pid, "SNAP_NAME").unwrap_or_default()
        }
        None => String::new(),
    }
}

/// Instance name used for output routing; parallel installs of one snap
/// differ here.
pub fn snap_instance_name_of(pid: i32, fallback_without_apparmor: bool) -> String {
    let snap_name = snap_name_of(pid, fallback_without_apparmor);
    if snap_name.is_empty() {
        return snap_name;
    }
    environment_variable(pid, "SNAP_INSTANCE_NAME")
        .filter(|instance| instance == &snap_name || instance.starts_with(&format!("{snap_name}_")))
        .unwrap_or(snap_name)
}

pub fn peer_pid(stream: &UnixStream) -> io::Result<i32> {
    let mut credentials = libc::ucred {
        pid: 0,
        uid: 0,
        gid: 0,
    };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // Safety: `credentials` and `len` outlive the call and describe a buffer
    // of the size the kernel expects for SO_PEERCRED.
    let rc = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&mut credentials as *mut libc::ucred).cast(),
            &mut len,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(credentials.pid)
}

fn apparmor_label(pid: i32) -> Option<String> {
    let proc_dir = PathBuf::from(format!("/proc/{pid}/attr"));
    [proc_dir.join("apparmor/current"), proc_dir.join("current")]
        .into_iter()
        .find_map(|path| fs::read_to_string(path).ok())
        .map(|label| label.trim_end_matches(['\0', '\n']).to_owned())
        .filter(|label| !label.is_empty())
}

fn environment_variable(pid: i32, name: &str) -> Option<String> {
    let environ = fs::read(format!("/proc/{pid}/environ")).ok()?;
    parse_environ(&environ, name)
}

fn parse_environ(environ: &[u8], name: &str) -> Option<String> {
    environ
        .split(|byte| *byte == 0)
        .filter_map(|entry| std::str::from_utf8(entry).ok())
        .find_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            (key == name).then(|| value.to_owned())
        })
}
