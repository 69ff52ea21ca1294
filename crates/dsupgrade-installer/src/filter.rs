use std::path::{Component, Path};

use crate::layout::{INSTANCE_LOC_FILE_NAME, LAUNCHER_FILE_NAME};

/// Top-level runtime state never taken from a stage nor moved into a backup.
pub const RUNTIME_ROOTS: &[&str] = &[
    "changelogDb",
    "db",
    "logs",
    "locks",
    "history",
    "tmp",
    INSTANCE_LOC_FILE_NAME,
];

/// Files kept in place and migrated instead of replaced.
pub const PRESERVED_FILES: &[&str] = &[
    "config/tools.properties",
    "config/java.properties",
    "config/admin-backend.ldif",
];

/// Entries that belong to the install root when it differs from the instance root.
pub const INSTALL_ROOT_ENTRIES: &[&str] = &[
    "bin",
    "lib",
    "bat",
    "setup",
    "setup.bat",
    "uninstall",
    "uninstall.bat",
    "install.html",
    "install.txt",
    "legal-notices",
    "opends_logo.png",
    "README",
    "upgrade",
    LAUNCHER_FILE_NAME,
    "QuickSetup.app",
    "Uninstall.app",
    "tmpl_instance",
];

const INSTALL_SUBTREES: &[&str] = &["config/schema"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSide {
    Combined,
    Install,
    Instance,
}

impl RootSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::Install => "install",
            Self::Instance => "instance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Take the whole entry.
    Accept,
    /// Directory holding excluded descendants; walk its children.
    Descend,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFilter {
    side: RootSide,
    exempt_launcher: bool,
}

impl FileFilter {
    pub fn new(side: RootSide) -> Self {
        Self {
            side,
            exempt_launcher: false,
        }
    }

    /// Filter for moving the live tree into a backup. On Windows the launcher stays
    /// in place and is only copied into the backup once the run succeeded.
    pub fn for_backup(side: RootSide) -> Self {
        Self {
            side,
            exempt_launcher: cfg!(windows),
        }
    }

    pub fn with_launcher_exempt(mut self, exempt: bool) -> Self {
        self.exempt_launcher = exempt;
        self
    }

    pub fn side(&self) -> RootSide {
        self.side
    }

    pub fn accepts(&self, relative: &Path) -> bool {
        self.decide(relative) != Decision::Reject
    }

    pub fn decide(&self, relative: &Path) -> Decision {
        let key = relative_key(relative);
        let first = key.split('/').next().unwrap_or_default();

        if RUNTIME_ROOTS.contains(&first) {
            return Decision::Reject;
        }
        if PRESERVED_FILES.contains(&key.as_str()) {
            return Decision::Reject;
        }
        if self.exempt_launcher && key == LAUNCHER_FILE_NAME {
            return Decision::Reject;
        }

        let prefix = format!("{key}/");
        match self.side {
            RootSide::Install if !is_install_side(&key) => {
                if INSTALL_SUBTREES.iter().any(|tree| tree.starts_with(&prefix)) {
                    return Decision::Descend;
                }
                return Decision::Reject;
            }
            RootSide::Instance if is_install_side(&key) => return Decision::Reject,
            _ => {}
        }

        let excluded_below = PRESERVED_FILES.iter().any(|file| file.starts_with(&prefix))
            || (self.side == RootSide::Instance
                && INSTALL_SUBTREES.iter().any(|tree| tree.starts_with(&prefix)));
        if excluded_below {
            Decision::Descend
        } else {
            Decision::Accept
        }
    }
}

fn is_install_side(key: &str) -> bool {
    let first = key.split('/').next().unwrap_or_default();
    INSTALL_ROOT_ENTRIES.contains(&first)
        || INSTALL_SUBTREES
            .iter()
            .any(|tree| key == *tree || key.starts_with(&format!("{tree}/")))
}

/// Relative path rendered with `/` separators.
pub fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
