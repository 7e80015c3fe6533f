use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Set both access and modification time to `seconds` since the epoch.
#[cfg(unix)]
pub fn set_file_times(path: &Path, seconds: i64) {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).expect("path without NUL");
    let time = libc::timespec {
        tv_sec: seconds,
        tv_nsec: 0,
    };
    let times = [time, time];
    let result = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
    assert_eq!(result, 0, "utimensat failed for {}", path.display());
}

/// Publish `name` in `dir` the way a database does: write a temp file, stamp
/// its mtime, then rename it into place.
#[cfg(unix)]
pub fn publish(dir: &Path, name: &str, payload: &[u8], mtime: i64) -> PathBuf {
    let temp = dir.join(format!("temp-{name}"));
    fs::write(&temp, payload).expect("write temp dump");
    set_file_times(&temp, mtime);
    let target = dir.join(name);
    fs::rename(&temp, &target).expect("rename dump into place");
    target
}

/// Sorted entry names of `dir`; empty when it does not exist.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|entry| {
                entry
                    .expect("dir entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Poll `check` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}
