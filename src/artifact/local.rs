use super::{
    describe_file, entry_name, Alias, ArtifactHandle, ArtifactManifest, ArtifactRef, NewArtifact,
    MANIFEST_FILE,
};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, instrument};

/// Artifacts as a directory tree: `<root>/<name>/v<N>/{files…, manifest.json}`.
/// A version exists once its manifest has been written.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn version_dir(&self, name: &str, version: u32) -> PathBuf {
        self.root.join(name).join(format!("v{}", version))
    }

    /// All committed versions of `name`, ascending.
    pub async fn versions(&self, name: &str) -> Result<Vec<u32>> {
        self.scan_versions(name, true).await
    }

    /// Version directories of `name`; with `committed_only`, just those holding a manifest.
    async fn scan_versions(&self, name: &str, committed_only: bool) -> Result<Vec<u32>> {
        let dir = self.root.join(name);
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        let mut rd = fs::read_dir(&dir)
            .await
            .with_context(|| format!("listing {}", dir.display()))?;
        while let Some(entry) = rd.next_entry().await? {
            let file_name = entry.file_name();
            let Some(Alias::Version(v)) = file_name.to_str().and_then(Alias::parse) else {
                continue;
            };
            let committed = fs::try_exists(entry.path().join(MANIFEST_FILE))
                .await
                .unwrap_or(false);
            if committed || !committed_only {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    async fn resolve(&self, reference: &ArtifactRef) -> Result<u32> {
        let versions = self.versions(&reference.name).await?;
        match reference.alias {
            Alias::Latest => versions
                .last()
                .copied()
                .with_context(|| format!("artifact {} not found", reference)),
            Alias::Version(v) if versions.contains(&v) => Ok(v),
            Alias::Version(_) => bail!("artifact {} not found", reference),
        }
    }

    #[instrument(level = "debug", skip(self, reference), fields(reference = %reference))]
    pub async fn use_artifact(&self, reference: &ArtifactRef) -> Result<ArtifactHandle> {
        let version = self.resolve(reference).await?;
        let dir = self.version_dir(&reference.name, version);
        let raw = fs::read(dir.join(MANIFEST_FILE))
            .await
            .with_context(|| format!("reading manifest of {}", reference))?;
        let manifest: ArtifactManifest = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing manifest of {}", reference))?;

        for file in &manifest.files {
            let path = dir.join(&file.name);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                bail!(
                    "artifact {} is missing file {}",
                    manifest.qualified_name(),
                    file.name
                );
            }
        }

        debug!(artifact = %manifest.qualified_name(), "resolved local artifact");
        Ok(ArtifactHandle { manifest, dir })
    }

    #[instrument(level = "debug", skip(self, artifact), fields(name = %artifact.name))]
    pub async fn log_artifact(
        &self,
        artifact: &NewArtifact,
        run_id: &str,
    ) -> Result<ArtifactManifest> {
        // abandoned version directories still count, so a version number is never reused
        let version = self
            .scan_versions(&artifact.name, false)
            .await?
            .last()
            .map_or(0, |v| v + 1);
        let dir = self.version_dir(&artifact.name, version);
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).await?;
        }
        // `create_dir` fails when another writer already claimed this version
        fs::create_dir(&dir)
            .await
            .with_context(|| format!("claiming {}", dir.display()))?;

        let mut files = Vec::with_capacity(artifact.files.len());
        for src in &artifact.files {
            let name = entry_name(src)?;
            let dest = dir.join(&name);
            fs::copy(src, &dest)
                .await
                .with_context(|| format!("copying {} into artifact store", src.display()))?;
            files.push(describe_file(&dest).await?);
        }

        let manifest = ArtifactManifest {
            name: artifact.name.clone(),
            artifact_type: artifact.artifact_type.clone(),
            description: artifact.description.clone(),
            version,
            created_at: Utc::now(),
            run_id: Some(run_id.to_string()),
            files,
        };

        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(&manifest)?).await?;
        fs::rename(&tmp, dir.join(MANIFEST_FILE)).await?;

        info!(artifact = %manifest.qualified_name(), files = manifest.files.len(), "logged artifact");
        Ok(manifest)
    }
}
