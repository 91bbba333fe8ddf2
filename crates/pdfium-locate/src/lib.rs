//! # pdfium-locate
//!
//! Find the [PDFium](https://pdfium.googlesource.com/pdfium/) shared library
//! that `pdfium-render` should bind to, and bind to it.
//!
//! ## How it works
//!
//! A [`ToolchainResolver`] answers one question: which directory holds the
//! pdfium library? `None` means "let pdfium-render use its own default
//! resolution" ([`Pdfium::bind_to_system_library`]).
//!
//! [`BundledToolchain`] probes, in strict priority order:
//!
//! 1. `<app dir>/pdfium/{bin,lib}` next to the running executable.
//! 2. `<source dir>/pdfium/{bin,lib}` in the source tree (development builds).
//! 3. Every directory on the process search path (`PATH`).
//!
//! A bundled copy always wins over one installed on the host, so output does
//! not depend on whatever happens to be installed.
//!
//! [`SystemToolchain`] never probes and always answers `None`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pdfium_locate::{bind_pdfium, platform_resolver};
//!
//! let resolver = platform_resolver(None);
//! let dir = resolver.resolve();
//! let pdfium = bind_pdfium(dir.as_deref()).expect("PDFium unavailable");
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pdfium_render::prelude::Pdfium;
use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Location of a bundled pdfium, relative to the application or source root.
///
/// Mirrors the layout of the bblanchon/pdfium-binaries archives, which keep
/// `pdfium.dll` under `bin/` and the Unix libraries under `lib/`.
#[cfg(windows)]
pub const BUNDLED_RELATIVE_DIR: &str = "pdfium/bin";

/// Location of a bundled pdfium, relative to the application or source root.
#[cfg(not(windows))]
pub const BUNDLED_RELATIVE_DIR: &str = "pdfium/lib";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned when binding to pdfium.
#[derive(Error, Debug)]
pub enum LocateError {
    /// `libloading` / `pdfium-render` could not load the library.
    #[error("Failed to bind PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },

    /// No library was located and the system default could not be loaded.
    #[error("Failed to bind the system PDFium library: {reason}")]
    SystemBind { reason: String },
}

// ── Resolvers ────────────────────────────────────────────────────────────────

/// Strategy for finding the directory that holds the pdfium library.
pub trait ToolchainResolver: Send + Sync {
    /// The directory containing the library, or `None` to defer to
    /// pdfium-render's default resolution.
    fn resolve(&self) -> Option<PathBuf>;
}

/// Resolver for platforms where pdfium is expected to be pre-installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolchain;

impl ToolchainResolver for SystemToolchain {
    fn resolve(&self) -> Option<PathBuf> {
        None
    }
}

/// Resolver that probes bundled locations before the search path.
#[derive(Debug, Clone, Default)]
pub struct BundledToolchain {
    app_dir: Option<PathBuf>,
    source_dir: Option<PathBuf>,
    search_path: Option<OsString>,
}

impl BundledToolchain {
    /// Probe next to the running executable, the given source tree, and the
    /// process `PATH`.
    pub fn for_current_process(source_dir: Option<PathBuf>) -> Self {
        let app_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        Self {
            app_dir,
            source_dir,
            search_path: std::env::var_os("PATH"),
        }
    }

    /// Probe explicit locations; `search_path` uses the `PATH` syntax of the
    /// host platform.
    pub fn new(
        app_dir: Option<PathBuf>,
        source_dir: Option<PathBuf>,
        search_path: Option<OsString>,
    ) -> Self {
        Self {
            app_dir,
            source_dir,
            search_path,
        }
    }

    fn bundled_in(root: &Path) -> Option<PathBuf> {
        let dir = root.join(BUNDLED_RELATIVE_DIR);
        has_library(&dir).then_some(dir)
    }

    fn on_search_path(&self) -> Option<PathBuf> {
        let paths = self.search_path.as_ref()?;
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        which::which_in(library_name(), Some(paths), cwd)
            .ok()
            .and_then(|lib| lib.parent().map(Path::to_path_buf))
    }
}

impl ToolchainResolver for BundledToolchain {
    fn resolve(&self) -> Option<PathBuf> {
        self.app_dir
            .as_deref()
            .and_then(Self::bundled_in)
            .or_else(|| self.source_dir.as_deref().and_then(Self::bundled_in))
            .or_else(|| self.on_search_path())
    }
}

/// The resolver for the platform this binary was built for.
///
/// Windows has no system-wide pdfium, so it probes bundled locations and the
/// search path. Everywhere else pdfium-render's own resolution is used.
pub fn platform_resolver(source_dir: Option<PathBuf>) -> Arc<dyn ToolchainResolver> {
    if cfg!(windows) {
        Arc::new(BundledToolchain::for_current_process(source_dir))
    } else {
        Arc::new(SystemToolchain)
    }
}

// ── Binding ──────────────────────────────────────────────────────────────────

/// Platform file name of the pdfium library, e.g. `libpdfium.so`.
pub fn library_name() -> OsString {
    Pdfium::pdfium_platform_library_name()
}

/// Whether `dir` contains the platform pdfium library.
pub fn has_library(dir: &Path) -> bool {
    dir.join(library_name()).is_file()
}

/// Bind to the library in `dir`, or to the system library when `dir` is `None`.
pub fn bind_pdfium(dir: Option<&Path>) -> Result<Pdfium, LocateError> {
    match dir {
        Some(dir) => {
            let path = dir.join(library_name());
            Pdfium::bind_to_library(&path)
                .map(Pdfium::new)
                .map_err(|e| LocateError::Bind {
                    path,
                    reason: e.to_string(),
                })
        }
        None => Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| LocateError::SystemBind {
                reason: e.to_string(),
            }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn install_fake_library(dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let lib = dir.join(library_name());
        std::fs::write(&lib, b"not really a library").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&lib, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        lib
    }

    #[test]
    fn system_toolchain_never_resolves() {
        assert_eq!(SystemToolchain.resolve(), None);
    }

    #[test]
    fn nothing_found_is_absent() {
        let empty = TempDir::new().unwrap();
        let resolver = BundledToolchain::new(
            Some(empty.path().to_path_buf()),
            Some(empty.path().to_path_buf()),
            Some(empty.path().as_os_str().to_os_string()),
        );
        assert_eq!(resolver.resolve(), None);
    }

    #[test]
    fn bundled_next_to_app_wins_over_everything() {
        let app = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let sys = TempDir::new().unwrap();
        install_fake_library(&app.path().join(BUNDLED_RELATIVE_DIR));
        install_fake_library(&src.path().join(BUNDLED_RELATIVE_DIR));
        install_fake_library(sys.path());

        let resolver = BundledToolchain::new(
            Some(app.path().to_path_buf()),
            Some(src.path().to_path_buf()),
            Some(sys.path().as_os_str().to_os_string()),
        );
        assert_eq!(
            resolver.resolve(),
            Some(app.path().join(BUNDLED_RELATIVE_DIR))
        );
    }

    #[test]
    fn source_tree_wins_over_search_path() {
        let app = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let sys = TempDir::new().unwrap();
        install_fake_library(&src.path().join(BUNDLED_RELATIVE_DIR));
        install_fake_library(sys.path());

        let resolver = BundledToolchain::new(
            Some(app.path().to_path_buf()),
            Some(src.path().to_path_buf()),
            Some(sys.path().as_os_str().to_os_string()),
        );
        assert_eq!(
            resolver.resolve(),
            Some(src.path().join(BUNDLED_RELATIVE_DIR))
        );
    }

    #[test]
    fn search_path_is_last_resort() {
        let app = TempDir::new().unwrap();
        let sys = TempDir::new().unwrap();
        install_fake_library(sys.path());

        let resolver = BundledToolchain::new(
            Some(app.path().to_path_buf()),
            None,
            Some(sys.path().as_os_str().to_os_string()),
        );
        assert_eq!(resolver.resolve(), Some(sys.path().to_path_buf()));
    }

    #[test]
    fn empty_bundled_dir_does_not_count() {
        let app = TempDir::new().unwrap();
        std::fs::create_dir_all(app.path().join(BUNDLED_RELATIVE_DIR)).unwrap();
        let resolver = BundledToolchain::new(Some(app.path().to_path_buf()), None, None);
        assert_eq!(resolver.resolve(), None);
    }

    #[test]
    fn binding_a_bogus_library_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        install_fake_library(dir.path());
        let err = bind_pdfium(Some(dir.path())).err().expect("bind must fail");
        assert!(matches!(err, LocateError::Bind { .. }));
        assert!(err.to_string().contains("Failed to bind PDFium"));
    }
}
