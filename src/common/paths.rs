//! Socket, home and configuration paths
//!
//! Unix/macOS: debuggee sockets live at $XDG_RUNTIME_DIR/console-harness or
//! /tmp/console-harness-<uid>
//! Windows: named sockets under the temp directory

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Name used for directories owned by the harness
const APP_NAME: &str = "console-harness";

static SOCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Directory holding debuggee sockets
#[cfg(unix)]
pub fn socket_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join(APP_NAME);
        }
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
}

#[cfg(windows)]
pub fn socket_dir() -> PathBuf {
    std::env::temp_dir().join(APP_NAME)
}

/// Ensure the socket directory exists with proper permissions
///
/// On Unix, creates the directory with mode 0700
pub fn ensure_socket_dir() -> io::Result<PathBuf> {
    let dir = socket_dir();

    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }

    Ok(dir)
}

/// A socket path no other debuggee of this process will use
pub fn unique_socket_path() -> io::Result<PathBuf> {
    let dir = ensure_socket_dir()?;
    let n = SOCKET_COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
    let path = dir.join(format!("debuggee-{}-{}.sock", std::process::id(), n));
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(path)
}

/// HOME given to PTY children
///
/// On CI the real home is used since CI machines rarely allow overriding it
/// and carry no user rc files. Elsewhere a throwaway directory keeps the
/// developer's own debugger rc files out of the test.
#[derive(Debug)]
pub enum PtyHome {
    Real(PathBuf),
    Temp(tempfile::TempDir),
}

impl PtyHome {
    pub fn create() -> io::Result<Self> {
        if std::env::var_os("CI").is_some() {
            if let Some(dirs) = directories::BaseDirs::new() {
                return Ok(Self::Real(dirs.home_dir().to_path_buf()));
            }
        }
        Ok(Self::Temp(tempfile::Builder::new().prefix("pty-home-").tempdir()?))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Real(path) => path,
            Self::Temp(dir) => dir.path(),
        }
    }
}

/// Get the configuration directory path
///
/// - Linux: `~/.config/console-harness/`
/// - macOS: `~/Library/Application Support/console-harness/`
/// - Windows: `%APPDATA%\console-harness\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_paths_are_unique() {
        let a = unique_socket_path().unwrap();
        let b = unique_socket_path().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.parent(), b.parent());
        assert!(a.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn test_pty_home_exists() {
        let home = PtyHome::create().unwrap();
        assert!(home.path().is_dir());
    }

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
