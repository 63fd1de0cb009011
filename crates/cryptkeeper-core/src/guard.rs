//! Path safety policy.
//!
//! Every root handed to the scanner, every directory it descends into, and
//! every file about to be moved in or out of the graveyard goes through
//! [`PathGuard::check`] first.

use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::error::ConfigError;

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Inside a pre-approved location.
    Allowed,
    /// Not forbidden, but outside the pre-approved locations; confirm with
    /// the user before acting.
    AllowedWithWarning(String),
    /// Never touch this path.
    Forbidden(String),
}

impl GuardVerdict {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }

    pub fn is_allowed(&self) -> bool {
        !self.is_forbidden()
    }

    /// The reason attached to a warning or refusal.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::AllowedWithWarning(r) | Self::Forbidden(r) => Some(r),
        }
    }
}

#[derive(Debug, Clone)]
struct DenyPattern {
    original: String,
    compiled: Regex,
}

/// Deny-list and safe-location policy for filesystem paths.
#[derive(Debug, Clone)]
pub struct PathGuard {
    deny_roots: Vec<PathBuf>,
    deny_patterns: Vec<DenyPattern>,
    safe_roots: Vec<PathBuf>,
}

#[cfg(unix)]
const SYSTEM_ROOTS: &[&str] = &[
    "/bin",
    "/boot",
    "/dev",
    "/etc",
    "/lib",
    "/lib32",
    "/lib64",
    "/proc",
    "/run",
    "/sbin",
    "/sys",
    "/usr",
    "/var/lib",
    "/var/log",
    "/snap",
    "/System",
    "/Library",
    "/Applications",
    "/private/etc",
    "/private/var/db",
    "/cores",
];

#[cfg(windows)]
const SYSTEM_ROOTS: &[&str] = &[
    r"C:\Windows",
    r"C:\Program Files",
    r"C:\Program Files (x86)",
    r"C:\ProgramData",
    r"C:\$Recycle.Bin",
    r"C:\Recovery",
    r"C:\System Volume Information",
];

#[cfg(not(any(unix, windows)))]
const SYSTEM_ROOTS: &[&str] = &[];

/// Sensitive subtrees, matched against the path with `/` separators.
const SYSTEM_PATTERNS: &[&str] = &[
    r"(^|/)\.git(/|$)",
    r"(^|/)\.hg(/|$)",
    r"(^|/)\.svn(/|$)",
    r"(^|/)\.Trash(es)?(-\d+)?(/|$)",
    r"(^|/)\.local/share/Trash(/|$)",
    r"(?i)(^|/)\$Recycle\.Bin(/|$)",
    r"(^|/)\.ssh(/|$)",
    r"(^|/)\.gnupg(/|$)",
    r"(^|/)\.cargo/(registry|git)(/|$)",
    r"(^|/)\.rustup(/|$)",
    r"(^|/)\.gradle/caches(/|$)",
    r"(^|/)\.m2/repository(/|$)",
    r"(^|/)\.npm(/|$)",
    r"(^|/)node_modules/\.cache(/|$)",
    r"(^|/)Library/(Keychains|Mobile Documents)(/|$)",
];

impl PathGuard {
    /// The platform policy: system roots, sensitive patterns and the user's
    /// Downloads/Desktop/Documents/Pictures as safe locations.
    pub fn system() -> Self {
        let deny_patterns = SYSTEM_PATTERNS
            .iter()
            .filter_map(|p| compile(p).ok())
            .collect();
        let safe_roots = [
            dirs::download_dir(),
            dirs::desktop_dir(),
            dirs::document_dir(),
            dirs::picture_dir(),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self {
            deny_roots: SYSTEM_ROOTS.iter().map(PathBuf::from).collect(),
            deny_patterns,
            safe_roots,
        }
    }

    /// A guard with no rules at all beyond refusing the filesystem root.
    pub fn permissive() -> Self {
        Self {
            deny_roots: Vec::new(),
            deny_patterns: Vec::new(),
            safe_roots: Vec::new(),
        }
    }

    /// Refuse everything under `root` as well.
    pub fn deny_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let normalized = normalize(&root);
        if normalized != root {
            self.deny_roots.push(normalized);
        }
        self.deny_roots.push(root);
        self
    }

    /// Refuse every path matching `pattern`.
    pub fn deny_pattern(mut self, pattern: &str) -> Result<Self, ConfigError> {
        self.deny_patterns.push(compile(pattern)?);
        Ok(self)
    }

    /// Treat everything under `root` as pre-approved.
    pub fn safe_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let normalized = normalize(&root);
        if normalized != root {
            self.safe_roots.push(normalized);
        }
        self.safe_roots.push(root);
        self
    }

    /// Classify `path` against the policy. Pure; touches the filesystem only
    /// to resolve symlinks when the path exists.
    pub fn check(&self, path: &Path) -> GuardVerdict {
        let lexical = lexical_normalize(path);
        let resolved = normalize(path);

        for candidate in [&lexical, &resolved] {
            if let Some(reason) = self.forbidden_reason(candidate) {
                return GuardVerdict::Forbidden(reason);
            }
        }

        let safe = self
            .safe_roots
            .iter()
            .any(|root| lexical.starts_with(root) || resolved.starts_with(root));
        if safe {
            GuardVerdict::Allowed
        } else {
            GuardVerdict::AllowedWithWarning(format!(
                "{} is outside the usual cleanup locations",
                path.display()
            ))
        }
    }

    fn forbidden_reason(&self, path: &Path) -> Option<String> {
        if is_filesystem_root(path) {
            return Some("the filesystem root cannot be scanned".to_string());
        }

        if let Some(root) = self.deny_roots.iter().find(|r| path.starts_with(r)) {
            return Some(format!("{} is a protected location", root.display()));
        }

        let text = slash_path(path);
        self.deny_patterns
            .iter()
            .find(|p| p.compiled.is_match(&text))
            .map(|p| format!("matches protected pattern {}", p.original))
    }
}

impl Default for PathGuard {
    fn default() -> Self {
        Self::system()
    }
}

fn compile(pattern: &str) -> Result<DenyPattern, ConfigError> {
    Regex::new(pattern)
        .map(|compiled| DenyPattern {
            original: pattern.to_string(),
            compiled,
        })
        .map_err(|e| ConfigError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn is_filesystem_root(path: &Path) -> bool {
    path.has_root()
        && path
            .components()
            .all(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
}

/// Resolve symlinks when the path exists, otherwise fall back to a purely
/// lexical cleanup.
fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| lexical_normalize(path))
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn slash_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        text.into_owned()
    } else {
        text.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_system_roots_forbidden() {
        let guard = PathGuard::system();
        assert!(guard.check(Path::new("/")).is_forbidden());
        assert!(guard.check(Path::new("/usr/lib/libc.so")).is_forbidden());
        assert!(guard.check(Path::new("/etc")).is_forbidden());
    }

    #[test]
    fn test_patterns_forbidden() {
        let guard = PathGuard::system();
        let verdict = guard.check(Path::new("/home/alex/project/.git/objects"));
        assert!(verdict.is_forbidden());
        assert!(verdict.reason().unwrap().contains(".git"));
        assert!(guard.check(Path::new("/home/alex/.cargo/registry/cache")).is_forbidden());
        assert!(guard.check(Path::new("/home/alex/.local/share/Trash/files")).is_forbidden());
        assert!(!guard.check(Path::new("/home/alex/gitstuff")).is_forbidden());
    }

    #[test]
    fn test_parent_components_cannot_escape() {
        let guard = PathGuard::permissive().deny_root("/srv/keep");
        assert!(guard.check(Path::new("/srv/other/../keep/file")).is_forbidden());
    }

    #[test]
    fn test_safe_and_warning() {
        let guard = PathGuard::permissive().safe_root("/home/alex/Downloads");
        assert_eq!(
            guard.check(Path::new("/home/alex/Downloads/big.iso")),
            GuardVerdict::Allowed
        );
        let verdict = guard.check(Path::new("/home/alex/code"));
        assert!(matches!(verdict, GuardVerdict::AllowedWithWarning(_)));
        assert!(verdict.is_allowed());
    }

    #[test]
    fn test_custom_deny_pattern() {
        let guard = PathGuard::permissive().deny_pattern(r"\.keep$").unwrap();
        assert!(guard.check(Path::new("/data/thing.keep")).is_forbidden());
        assert!(PathGuard::permissive().deny_pattern("(").is_err());
    }
}
