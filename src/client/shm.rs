use std::{
    ffi::CString,
    fs::File,
    io,
    os::{
        fd::{AsFd, BorrowedFd, FromRawFd},
        unix::ffi::OsStrExt,
    },
    path::{Path, PathBuf},
};

use memmap2::MmapMut;

/// An anonymous, mapped, shared-memory file backing one `wl_shm_pool`.
#[derive(Debug)]
pub struct ShmFile {
    file: File,
    map: MmapMut,
}

impl ShmFile {
    pub fn new(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shm buffer size must not be zero",
            ));
        }

        let file = create_anonymous_file(size)?;
        // Safety: the file is private to this process and never truncated
        // while mapped.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { file, map })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

impl AsFd for ShmFile {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(runtime) = std::env::var_os("XDG_RUNTIME_DIR")
        && !runtime.is_empty()
    {
        dirs.push(PathBuf::from(runtime));
    }
    dirs.push(PathBuf::from("/dev/shm"));
    dirs.push(PathBuf::from("/tmp"));
    dirs
}

fn create_anonymous_file(size: usize) -> io::Result<File> {
    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no directory for shm files");

    for dir in candidate_dirs() {
        match open_tmpfile(&dir) {
            Ok(file) => {
                allocate(&file, size)?;
                return Ok(file);
            }
            Err(err) => {
                tracing::debug!(dir = %dir.display(), "cannot create shm file: {err}");
                last_error = err;
            }
        }
    }

    Err(last_error)
}

fn open_tmpfile(dir: &Path) -> io::Result<File> {
    let dir = CString::new(dir.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    // Safety: `dir` is a valid NUL-terminated path for the duration of the
    // call; a non-negative return is a fresh descriptor we take ownership of.
    let fd = unsafe {
        libc::open(
            dir.as_ptr(),
            libc::O_TMPFILE | libc::O_RDWR | libc::O_EXCL | libc::O_CLOEXEC,
            0o600,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Safety: see above.
    Ok(unsafe { File::from_raw_fd(fd) })
}

fn allocate(file: &File, size: usize) -> io::Result<()> {
    let len = libc::off_t::try_from(size)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    use std::os::fd::AsRawFd;
    // Safety: the descriptor is valid for the lifetime of `file`.
    let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, len) };
    match rc {
        0 => Ok(()),
        // Some filesystems do not support fallocate.
        libc::EOPNOTSUPP | libc::EINVAL => file.set_len(size as u64),
        errno => Err(io::Error::from_raw_os_error(errno)),
    }
}
