//! Backup version strings: `MAJOR.MINOR.PATCH-BRANCH.BUILD` where BUILD is a
//! `YYYYMMDD_HHMMSS` stamp, e.g. `1.2.3-main.20250310_143052`.

use std::fmt;
use std::str::FromStr;

use crate::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncrementLevel {
    Major,
    Minor,
    #[default]
    Patch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub branch: String,
    pub build: String,
}

impl BackupVersion {
    /// First version assigned on a fresh branch.
    pub fn initial(branch: &str, build: &str) -> Self {
        Self {
            major: 1,
            minor: 0,
            patch: 0,
            branch: branch.to_string(),
            build: build.to_string(),
        }
    }

    pub fn from_parts(major: u32, minor: u32, patch: u32, branch: &str, build: &str) -> Self {
        Self {
            major,
            minor,
            patch,
            branch: branch.to_string(),
            build: build.to_string(),
        }
    }

    /// The incremented version with a fresh build stamp; the branch carries
    /// over unchanged.
    pub fn bump(&self, level: IncrementLevel, build: &str) -> Self {
        let (major, minor, patch) = match level {
            IncrementLevel::Major => (self.major + 1, 0, 0),
            IncrementLevel::Minor => (self.major, self.minor + 1, 0),
            IncrementLevel::Patch => (self.major, self.minor, self.patch + 1),
        };
        Self {
            major,
            minor,
            patch,
            branch: self.branch.clone(),
            build: build.to_string(),
        }
    }

    /// Strict ordering within a branch: `(major, minor, patch, build)`
    /// lexicographic. The build stamp's fixed layout makes string comparison
    /// chronological.
    pub fn is_newer_than(&self, other: &BackupVersion) -> bool {
        (self.major, self.minor, self.patch, self.build.as_str())
            > (other.major, other.minor, other.patch, other.build.as_str())
    }

    /// Same major means restore-compatible lineage.
    pub fn is_compatible_with(&self, other: &BackupVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for BackupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}-{}.{}",
            self.major, self.minor, self.patch, self.branch, self.build
        )
    }
}

impl FromStr for BackupVersion {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            OrchestratorError::Config(format!(
                "invalid version string '{s}' (expected MAJOR.MINOR.PATCH-BRANCH.BUILD)"
            ))
        };

        let (numbers, rest) = s.split_once('-').ok_or_else(invalid)?;
        let mut parts = numbers.split('.');
        let major = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let minor = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let patch = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        let (branch, build) = rest.rsplit_once('.').ok_or_else(invalid)?;
        if branch.is_empty() || build.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            major,
            minor,
            patch,
            branch: branch.to_string(),
            build: build.to_string(),
        })
    }
}
