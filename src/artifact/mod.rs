// src/artifact/mod.rs
//! Named, versioned artifacts. `use_artifact` resolves `name[:alias]` to local files;
//! `log_artifact` stores files under the next version together with a manifest.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    ffi::OsStr,
    fmt,
    path::{Path, PathBuf},
};
use tokio::{fs::File, io::AsyncReadExt};
use url::Url;

pub mod local;
pub mod remote;

pub use local::LocalStore;
pub use remote::RemoteStore;

pub const MANIFEST_FILE: &str = "manifest.json";

static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[A-Za-z0-9][A-Za-z0-9_.\-]*)(?::(?P<alias>[A-Za-z0-9_.\-]+))?$")
        .expect("artifact reference regex should be valid")
});

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v(?P<n>\d+)$").expect("version regex should be valid"));

/// Which version of an artifact a reference points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alias {
    Latest,
    Version(u32),
}

impl Alias {
    pub fn parse(s: &str) -> Option<Self> {
        if s == "latest" {
            return Some(Alias::Latest);
        }
        VERSION_RE
            .captures(s)
            .and_then(|c| c["n"].parse().ok())
            .map(Alias::Version)
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alias::Latest => write!(f, "latest"),
            Alias::Version(n) => write!(f, "v{}", n),
        }
    }
}

/// `name[:alias]`, alias defaulting to `latest`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactRef {
    pub name: String,
    pub alias: Alias,
}

impl ArtifactRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let caps = REFERENCE_RE
            .captures(reference.trim())
            .ok_or_else(|| anyhow!("invalid artifact reference {:?}", reference))?;
        let alias = match caps.name("alias") {
            None => Alias::Latest,
            Some(a) => Alias::parse(a.as_str()).ok_or_else(|| {
                anyhow!(
                    "invalid alias {:?} in {:?}: expected `latest` or `v<N>`",
                    a.as_str(),
                    reference
                )
            })?,
        };
        Ok(Self {
            name: caps["name"].to_string(),
            alias,
        })
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.alias)
    }
}

/// Reject artifact names that would not survive a round trip through [`ArtifactRef::parse`].
pub fn validate_name(name: &str) -> Result<()> {
    match ArtifactRef::parse(name) {
        Ok(r) if r.name == name => Ok(()),
        _ => bail!("invalid artifact name {:?}", name),
    }
}

/// A manifest file name must be a single path component.
pub(crate) fn validate_file_name(name: &str) -> Result<()> {
    let single = Path::new(name).file_name() == Some(OsStr::new(name));
    if !single || name.contains(['/', '\\']) {
        bail!("invalid artifact file name {:?}", name);
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub sha256: String,
}

/// Stored description of one artifact version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub name: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub description: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub run_id: Option<String>,
    pub files: Vec<FileEntry>,
}

impl ArtifactManifest {
    /// `name:v<N>`
    pub fn qualified_name(&self) -> String {
        format!("{}:v{}", self.name, self.version)
    }
}

/// An artifact about to be logged.
#[derive(Clone, Debug)]
pub struct NewArtifact {
    pub name: String,
    pub artifact_type: String,
    pub description: String,
    pub files: Vec<PathBuf>,
}

impl NewArtifact {
    pub fn new(
        name: impl Into<String>,
        artifact_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_type: artifact_type.into(),
            description: description.into(),
            files: Vec::new(),
        }
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>) {
        self.files.push(path.into());
    }
}

/// A resolved artifact version whose files are available locally.
#[derive(Clone, Debug)]
pub struct ArtifactHandle {
    pub manifest: ArtifactManifest,
    pub dir: PathBuf,
}

impl ArtifactHandle {
    /// Path of the artifact's only file.
    pub fn file(&self) -> Result<PathBuf> {
        match self.manifest.files.as_slice() {
            [only] => Ok(self.dir.join(&only.name)),
            files => bail!(
                "artifact {} holds {} files, expected exactly one",
                self.manifest.qualified_name(),
                files.len()
            ),
        }
    }
}

/// Where artifacts live: a directory tree or a remote HTTP service.
pub enum ArtifactStore {
    Local(LocalStore),
    Remote(RemoteStore),
}

impl ArtifactStore {
    /// `http(s)://…` selects the remote store, anything else is a local directory.
    pub fn from_location(location: &str, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let base = Url::parse(location)
                .with_context(|| format!("parsing artifact store URL {}", location))?;
            Ok(ArtifactStore::Remote(RemoteStore::new(base, cache_dir)?))
        } else {
            Ok(ArtifactStore::Local(LocalStore::new(location)))
        }
    }

    pub async fn use_artifact(&self, reference: &str) -> Result<ArtifactHandle> {
        let reference = ArtifactRef::parse(reference)?;
        match self {
            ArtifactStore::Local(s) => s.use_artifact(&reference).await,
            ArtifactStore::Remote(s) => s.use_artifact(&reference).await,
        }
    }

    pub async fn log_artifact(
        &self,
        artifact: &NewArtifact,
        run_id: &str,
    ) -> Result<ArtifactManifest> {
        validate_name(&artifact.name)?;
        if artifact.files.is_empty() {
            bail!("artifact {} has no files", artifact.name);
        }
        match self {
            ArtifactStore::Local(s) => s.log_artifact(artifact, run_id).await,
            ArtifactStore::Remote(s) => s.log_artifact(artifact, run_id).await,
        }
    }
}

/// File name used inside the artifact for a local path.
pub(crate) fn entry_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("cannot derive a file name from {}", path.display()))
}

/// Size and SHA-256 of a local file.
pub(crate) async fn describe_file(path: &Path) -> Result<FileEntry> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok(FileEntry {
        name: entry_name(path)?,
        size,
        sha256: hex::encode(hasher.finalize()),
    })
}
