//! Miner package retrieval.
//!
//! A [`PackageProvider`] lists released versions and hands out a
//! [`Package`] for one of them. The deployment workflow extracts the
//! package and copies it into the binary directory on the target host.
//!
//! [`LocalPackageProvider`] serves packages that are already unpacked on
//! local disk, one directory per version:
//!
//! ```text
//! packages/
//!   0.2.4/
//!     XDaggerMinerDaemon.exe
//!     ...
//!   0.3.0/
//! ```

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::executor::paths;
use crate::protocol::DAEMON_EXECUTABLE;
use crate::tracing::prelude::*;
use crate::types::MachineName;

/// Versions offered by a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseVersions {
    pub latest: String,
    /// Newest first.
    pub available: Vec<String>,
}

/// Where a package is placed: a host-local directory on a machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageTarget {
    pub host: MachineName,
    pub path: String,
}

impl PackageTarget {
    /// Administrative-share path of the target directory.
    pub fn unc(&self) -> String {
        paths::unc(self.host.as_str(), &self.path)
    }
}

#[async_trait]
pub trait PackageProvider: Send + Sync {
    async fn versions(&self) -> Result<ReleaseVersions>;

    async fn fetch(&self, version: &str) -> Result<Box<dyn Package>>;
}

#[async_trait]
pub trait Package: Send + Sync {
    fn version(&self) -> &str;

    /// Unpack the package locally. Must succeed before [`copy_to`](Self::copy_to).
    async fn extract(&mut self) -> Result<()>;

    async fn copy_to(&self, target: &PackageTarget) -> Result<()>;
}

/// Provider over a directory of unpacked packages.
#[derive(Clone, Debug)]
pub struct LocalPackageProvider {
    root: PathBuf,
}

impl LocalPackageProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn error(version: &str, reason: impl ToString) -> Error {
        Error::Package {
            version: version.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl PackageProvider for LocalPackageProvider {
    async fn versions(&self) -> Result<ReleaseVersions> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            Self::error("*", format!("cannot list {}: {e}", self.root.display()))
        })?;

        let mut available = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::error("*", e))?
        {
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                available.push(name.to_string());
            }
        }

        available.sort_by(|a, b| compare_versions(b, a));
        let latest = available
            .first()
            .cloned()
            .ok_or_else(|| Self::error("*", format!("no packages in {}", self.root.display())))?;

        Ok(ReleaseVersions { latest, available })
    }

    async fn fetch(&self, version: &str) -> Result<Box<dyn Package>> {
        let dir = self.root.join(version);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(Box::new(LocalPackage {
                version: version.to_string(),
                dir,
                extracted: false,
            })),
            Ok(_) => Err(Self::error(version, format!("{} is not a directory", dir.display()))),
            Err(e) => Err(Self::error(version, format!("{}: {e}", dir.display()))),
        }
    }
}

struct LocalPackage {
    version: String,
    dir: PathBuf,
    extracted: bool,
}

#[async_trait]
impl Package for LocalPackage {
    fn version(&self) -> &str {
        &self.version
    }

    async fn extract(&mut self) -> Result<()> {
        let daemon = self.dir.join(DAEMON_EXECUTABLE);
        if !tokio::fs::try_exists(&daemon).await.unwrap_or(false) {
            return Err(LocalPackageProvider::error(
                &self.version,
                format!("{} is missing", daemon.display()),
            ));
        }
        self.extracted = true;
        Ok(())
    }

    async fn copy_to(&self, target: &PackageTarget) -> Result<()> {
        if !self.extracted {
            return Err(LocalPackageProvider::error(&self.version, "not extracted"));
        }

        let destination = PathBuf::from(target.unc());
        let files = copy_dir(&self.dir, &destination)
            .await
            .map_err(|e| Error::path(target.path.clone(), e))?;
        info!(
            version = %self.version,
            host = %target.host,
            path = %target.path,
            files,
            "Copied package"
        );
        Ok(())
    }
}

/// Copy `source` recursively into `destination`, creating it as needed.
/// Returns the number of files copied.
pub(crate) async fn copy_dir(source: &Path, destination: &Path) -> std::io::Result<usize> {
    let mut pending = vec![(source.to_path_buf(), destination.to_path_buf())];
    let mut files = 0;

    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                trace!(from = %entry.path().display(), to = %target.display(), "Copying");
                tokio::fs::copy(entry.path(), &target).await?;
                files += 1;
            }
        }
    }

    Ok(files)
}

/// Dotted numeric comparison, falling back to text for non-numeric parts.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.trim_start_matches('v').split('.');
    let mut right = b.trim_start_matches('v').split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
