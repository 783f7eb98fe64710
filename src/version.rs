//! Build metadata embedded by `build.rs`
//!
//! Printed by the `version` command and logged once at startup so operators
//! can tie a coordinator's logs to the exact binary that produced them.

use std::fmt;

/// Compile-time facts about this binary
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// Short commit hash, or "unknown" outside a git checkout
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    git_dirty: &'static str,
    /// UTC, "%Y-%m-%d %H:%M:%S UTC"
    pub built_at: &'static str,
    pub target: &'static str,
    pub host: &'static str,
    pub profile: &'static str,
    pub rustc: &'static str,
}

const BUILD: BuildInfo = BuildInfo {
    name: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
    git_hash: env!("FEDAVG_GIT_HASH"),
    git_branch: env!("FEDAVG_GIT_BRANCH"),
    git_dirty: env!("FEDAVG_GIT_DIRTY"),
    built_at: env!("FEDAVG_BUILD_TIMESTAMP"),
    target: env!("FEDAVG_TARGET"),
    host: env!("FEDAVG_HOST"),
    profile: env!("FEDAVG_PROFILE"),
    rustc: env!("FEDAVG_RUSTC_VERSION"),
};

impl BuildInfo {
    /// Whether the tree had uncommitted changes when built
    pub fn git_dirty(&self) -> bool {
        self.git_dirty == "true"
    }

    /// `<version>-<hash>`, with `-dirty` appended for uncommitted builds
    pub fn full_version(&self) -> String {
        let suffix = if self.git_dirty() { "-dirty" } else { "" };
        format!("{}-{}{}", self.version, self.git_hash, suffix)
    }

    /// Labelled rows for the detailed listing, grouped by section
    fn sections(&self) -> [(&'static str, Vec<(&'static str, &'static str)>); 3] {
        [
            (
                "Build Information",
                vec![
                    ("Version", self.version),
                    ("Git Hash", self.git_hash),
                    ("Git Branch", self.git_branch),
                    ("Built", self.built_at),
                    ("Profile", self.profile),
                ],
            ),
            ("Target", vec![("Triple", self.target), ("Host", self.host)]),
            ("Compiler", vec![("rustc", self.rustc)]),
        ]
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;

        for (title, rows) in self.sections() {
            writeln!(f)?;
            writeln!(f, "{}:", title)?;
            for (label, value) in rows {
                writeln!(f, "  {:<11} {}", format!("{}:", label), value)?;
            }
        }
        Ok(())
    }
}

pub fn build_info() -> BuildInfo {
    BUILD
}

/// Print the detailed listing to stdout
pub fn print_version() {
    print!("{}", BUILD);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info_names_the_coordinator() {
        let info = build_info();
        assert_eq!(info.name, "fedavg-coordinator");
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_full_version_format() {
        let info = build_info();
        let full = info.full_version();

        assert!(full.starts_with(&format!("{}-{}", info.version, info.git_hash)));
        assert_eq!(full.ends_with("-dirty"), info.git_dirty());
    }

    #[test]
    fn test_display_lists_every_section() {
        let text = build_info().to_string();

        for expected in ["Build Information:", "Git Hash:", "Target:", "Triple:", "Compiler:"] {
            assert!(text.contains(expected), "missing {:?} in\n{}", expected, text);
        }
        assert!(text.starts_with("fedavg-coordinator "));
    }
}
