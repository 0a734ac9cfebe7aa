use super::{
    describe_file, validate_file_name, validate_name, Alias, ArtifactHandle, ArtifactManifest,
    ArtifactRef, FileEntry, NewArtifact,
};
use anyhow::{anyhow, bail, Context, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, instrument};
use url::Url;

/// Artifact service reached over HTTP.
///
/// * `GET  {base}/artifacts/{name}/{alias}/manifest`
/// * `GET  {base}/artifacts/{name}/v{N}/files/{file}`
/// * `POST {base}/artifacts/{name}` (JSON body, answers with the new manifest)
/// * `PUT  {base}/artifacts/{name}/v{N}/files/{file}`
///
/// Downloaded files are cached under `<cache_dir>/<name>/v<N>/`.
pub struct RemoteStore {
    client: Client,
    base: Url,
    cache_dir: PathBuf,
}

#[derive(Serialize)]
struct CreateArtifact<'a> {
    #[serde(rename = "type")]
    artifact_type: &'a str,
    description: &'a str,
    run_id: &'a str,
    files: &'a [FileEntry],
}

impl RemoteStore {
    pub fn new(base: Url, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        if base.cannot_be_a_base() {
            bail!("artifact store URL {} cannot be a base", base);
        }
        Ok(Self {
            client: Client::new(),
            base,
            cache_dir: cache_dir.into(),
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("artifact store URL {} cannot be a base", self.base))?
            .pop_if_empty()
            .push("artifacts")
            .extend(segments);
        Ok(url)
    }

    #[instrument(level = "debug", skip(self, reference), fields(reference = %reference))]
    pub async fn use_artifact(&self, reference: &ArtifactRef) -> Result<ArtifactHandle> {
        let alias = reference.alias.to_string();
        let url = self.endpoint(&[reference.name.as_str(), alias.as_str(), "manifest"])?;
        let manifest: ArtifactManifest = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("decoding manifest from {}", url))?;
        check_manifest(&manifest, reference)?;

        let version = format!("v{}", manifest.version);
        let dir = self.cache_dir.join(&manifest.name).join(&version);
        fs::create_dir_all(&dir).await?;

        for entry in &manifest.files {
            let url = self.endpoint(&[
                manifest.name.as_str(),
                version.as_str(),
                "files",
                entry.name.as_str(),
            ])?;
            self.download_file(&url, &dir.join(&entry.name), entry)
                .await
                .with_context(|| {
                    format!("downloading {} of {}", entry.name, manifest.qualified_name())
                })?;
        }

        info!(artifact = %manifest.qualified_name(), dir = %dir.display(), "downloaded artifact");
        Ok(ArtifactHandle { manifest, dir })
    }

    /// Stream `url` to `dest`, checking size and digest against the manifest entry.
    async fn download_file(&self, url: &Url, dest: &Path, expected: &FileEntry) -> Result<()> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;

        let tmp = dest.with_file_name(format!("{}.part", expected.name));
        let mut out = fs::File::create(&tmp).await?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        drop(out);

        let digest = hex::encode(hasher.finalize());
        if size != expected.size || digest != expected.sha256 {
            let _ = fs::remove_file(&tmp).await;
            bail!(
                "{} does not match its manifest entry (size {} vs {}, sha256 {} vs {})",
                url,
                size,
                expected.size,
                digest,
                expected.sha256
            );
        }
        fs::rename(&tmp, dest).await?;
        debug!(file = %dest.display(), bytes = size, "downloaded");
        Ok(())
    }

    #[instrument(level = "debug", skip(self, artifact), fields(name = %artifact.name))]
    pub async fn log_artifact(
        &self,
        artifact: &NewArtifact,
        run_id: &str,
    ) -> Result<ArtifactManifest> {
        let mut entries = Vec::with_capacity(artifact.files.len());
        for path in &artifact.files {
            entries.push(describe_file(path).await?);
        }

        let url = self.endpoint(&[artifact.name.as_str()])?;
        let manifest: ArtifactManifest = self
            .client
            .post(url.clone())
            .json(&CreateArtifact {
                artifact_type: &artifact.artifact_type,
                description: &artifact.description,
                run_id,
                files: &entries,
            })
            .send()
            .await
            .with_context(|| format!("POST {}", url))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("decoding manifest from {}", url))?;

        let version = format!("v{}", manifest.version);
        for (path, entry) in artifact.files.iter().zip(&entries) {
            let url = self.endpoint(&[
                artifact.name.as_str(),
                version.as_str(),
                "files",
                entry.name.as_str(),
            ])?;
            let body = fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            self.client
                .put(url.clone())
                .body(body)
                .send()
                .await
                .with_context(|| format!("PUT {}", url))?
                .error_for_status()?;
        }

        info!(artifact = %manifest.qualified_name(), "logged artifact");
        Ok(manifest)
    }
}

/// Manifest names become cache paths; they must match what was asked for and stay inside it.
fn check_manifest(manifest: &ArtifactManifest, reference: &ArtifactRef) -> Result<()> {
    validate_name(&manifest.name)?;
    if manifest.name != reference.name {
        bail!(
            "store answered {} with a manifest for {}",
            reference,
            manifest.name
        );
    }
    if let Alias::Version(n) = reference.alias {
        if manifest.version != n {
            bail!("store answered {} with version v{}", reference, manifest.version);
        }
    }
    for entry in &manifest.files {
        validate_file_name(&entry.name)
            .with_context(|| format!("manifest of {}", manifest.qualified_name()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// `"METHOD /path"` → (status, body).
    type Routes = HashMap<String, (u16, Vec<u8>)>;

    #[derive(Clone, Debug)]
    struct Request {
        method: String,
        path: String,
        body: Vec<u8>,
    }

    async fn read_request(sock: &mut tokio::net::TcpStream) -> Option<Request> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = sock.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut first = head.split_whitespace();
        let method = first.next()?.to_string();
        let path = first.next()?.to_string();
        let length = head
            .lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + length {
            let n = sock.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Some(Request {
            method,
            path,
            body: buf[header_end..].to_vec(),
        })
    }

    /// Answer requests from a fixed route table, recording every request seen.
    async fn serve(routes: Routes) -> Result<(Url, Arc<Mutex<Vec<Request>>>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let routes = routes.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let Some(request) = read_request(&mut sock).await else {
                        return;
                    };
                    let key = format!("{} {}", request.method, request.path);
                    log.lock().unwrap().push(request);
                    let (status, body) = routes
                        .get(&key)
                        .cloned()
                        .unwrap_or((404, b"not found".to_vec()));
                    let reason = match status {
                        200 => "OK",
                        404 => "Not Found",
                        _ => "Error",
                    };
                    let head = format!(
                        "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        status,
                        reason,
                        body.len()
                    );
                    let _ = sock.write_all(head.as_bytes()).await;
                    let _ = sock.write_all(&body).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        Ok((Url::parse(&format!("http://{}/api/", addr))?, seen))
    }

    fn local_client() -> Result<Client> {
        Ok(Client::builder().no_proxy().build()?)
    }

    fn manifest_named(
        name: &str,
        file: &str,
        version: u32,
        body: &[u8],
        sha256: String,
    ) -> ArtifactManifest {
        ArtifactManifest {
            name: name.into(),
            artifact_type: "raw_data".into(),
            description: "raw listings".into(),
            version,
            created_at: Utc::now(),
            run_id: None,
            files: vec![FileEntry {
                name: file.into(),
                size: body.len() as u64,
                sha256,
            }],
        }
    }

    fn manifest_for(body: &[u8], sha256: String) -> ArtifactManifest {
        manifest_named("sample.csv", "sample.csv", 2, body, sha256)
    }

    fn routes_for(manifest: &ArtifactManifest, body: &[u8]) -> Routes {
        let mut routes = HashMap::new();
        routes.insert(
            "GET /api/artifacts/sample.csv/latest/manifest".to_string(),
            (200, serde_json::to_vec(manifest).unwrap()),
        );
        routes.insert(
            "GET /api/artifacts/sample.csv/v2/files/sample.csv".to_string(),
            (200, body.to_vec()),
        );
        routes
    }

    #[test]
    fn endpoints_are_nested_under_base_path() -> Result<()> {
        let store = RemoteStore::new(Url::parse("https://store.example/api/")?, "cache")?;
        let url = store.endpoint(&["clean sample.csv", "v3", "files", "clean_sample.csv"])?;
        assert_eq!(
            url.as_str(),
            "https://store.example/api/artifacts/clean%20sample.csv/v3/files/clean_sample.csv"
        );
        Ok(())
    }

    #[tokio::test]
    async fn downloads_and_verifies_latest() -> Result<()> {
        let body = b"price,last_review\n50,2021-01-01\n";
        let manifest = manifest_for(body, hex::encode(Sha256::digest(body)));
        let (base, _) = serve(routes_for(&manifest, body)).await?;

        let cache = tempfile::tempdir()?;
        let store = RemoteStore::new(base, cache.path())?.with_client(local_client()?);
        let handle = store
            .use_artifact(&ArtifactRef {
                name: "sample.csv".into(),
                alias: Alias::Latest,
            })
            .await?;

        assert_eq!(handle.manifest.version, 2);
        let path = handle.file()?;
        assert!(path.starts_with(cache.path().join("sample.csv").join("v2")));
        assert_eq!(fs::read(&path).await?, body.to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn digest_mismatch_is_rejected() -> Result<()> {
        let body = b"price\n1\n";
        let manifest = manifest_for(body, "00".repeat(32));
        let (base, _) = serve(routes_for(&manifest, body)).await?;

        let cache = tempfile::tempdir()?;
        let store = RemoteStore::new(base, cache.path())?.with_client(local_client()?);
        let result = store
            .use_artifact(&ArtifactRef::parse("sample.csv")?)
            .await;
        assert!(result.is_err());
        assert!(!cache.path().join("sample.csv/v2/sample.csv").exists());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_artifact_is_an_error() -> Result<()> {
        let (base, _) = serve(HashMap::new()).await?;
        let cache = tempfile::tempdir()?;
        let store = RemoteStore::new(base, cache.path())?.with_client(local_client()?);
        assert!(store
            .use_artifact(&ArtifactRef::parse("missing.csv:v1")?)
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn manifest_paths_cannot_leave_the_cache() -> Result<()> {
        let body = b"owned\n";
        let sha = hex::encode(Sha256::digest(body));
        let hostile = [
            manifest_named("../../escaped", "evil.txt", 2, body, sha.clone()),
            manifest_named("other.csv", "evil.txt", 2, body, sha.clone()),
            manifest_named("sample.csv", "../../evil.txt", 2, body, sha.clone()),
            manifest_named("sample.csv", "/tmp/evil.txt", 2, body, sha),
        ];

        for manifest in hostile {
            let mut routes = HashMap::new();
            routes.insert(
                "GET /api/artifacts/sample.csv/latest/manifest".to_string(),
                (200, serde_json::to_vec(&manifest)?),
            );
            let (base, seen) = serve(routes).await?;

            let root = tempfile::tempdir()?;
            let cache = root.path().join("a").join("cache");
            let store = RemoteStore::new(base, &cache)?.with_client(local_client()?);
            let result = store.use_artifact(&ArtifactRef::parse("sample.csv")?).await;

            assert!(result.is_err(), "{:?} should be rejected", manifest.name);
            assert!(!root.path().join("escaped").exists());
            assert!(!root.path().join("a").join("evil.txt").exists());
            // nothing beyond the manifest is fetched
            assert_eq!(seen.lock().unwrap().len(), 1);
        }
        Ok(())
    }

    async fn staged_file(dir: &Path) -> Result<(PathBuf, Vec<u8>)> {
        let path = dir.join("clean_sample.csv");
        let body = b"id,price,last_review\n1,50,2021-01-01\n".to_vec();
        fs::write(&path, &body).await?;
        Ok((path, body))
    }

    fn created(version: u32, body: &[u8]) -> Result<Vec<u8>> {
        let mut manifest = manifest_named(
            "clean_sample.csv",
            "clean_sample.csv",
            version,
            body,
            hex::encode(Sha256::digest(body)),
        );
        manifest.artifact_type = "clean_sample".into();
        manifest.description = "Data with outliers removed".into();
        manifest.run_id = Some("run-7".into());
        Ok(serde_json::to_vec(&manifest)?)
    }

    #[tokio::test]
    async fn logs_artifact_with_post_then_put() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (path, body) = staged_file(dir.path()).await?;

        let mut routes = HashMap::new();
        routes.insert(
            "POST /api/artifacts/clean_sample.csv".to_string(),
            (200, created(4, &body)?),
        );
        routes.insert(
            "PUT /api/artifacts/clean_sample.csv/v4/files/clean_sample.csv".to_string(),
            (200, Vec::new()),
        );
        let (base, seen) = serve(routes).await?;

        let store = RemoteStore::new(base, dir.path().join("cache"))?.with_client(local_client()?);
        let mut artifact =
            NewArtifact::new("clean_sample.csv", "clean_sample", "Data with outliers removed");
        artifact.add_file(&path);
        let manifest = store.log_artifact(&artifact, "run-7").await?;
        assert_eq!(manifest.qualified_name(), "clean_sample.csv:v4");

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);

        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].path, "/api/artifacts/clean_sample.csv");
        let sent: serde_json::Value = serde_json::from_slice(&seen[0].body)?;
        assert_eq!(sent["type"], "clean_sample");
        assert_eq!(sent["description"], "Data with outliers removed");
        assert_eq!(sent["run_id"], "run-7");
        assert_eq!(sent["files"][0]["name"], "clean_sample.csv");
        assert_eq!(sent["files"][0]["size"], body.len() as u64);
        assert_eq!(
            sent["files"][0]["sha256"],
            hex::encode(Sha256::digest(&body)).as_str()
        );

        assert_eq!(seen[1].method, "PUT");
        assert_eq!(
            seen[1].path,
            "/api/artifacts/clean_sample.csv/v4/files/clean_sample.csv"
        );
        assert_eq!(seen[1].body, body);
        Ok(())
    }

    #[tokio::test]
    async fn failed_upload_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (path, body) = staged_file(dir.path()).await?;

        let mut routes = HashMap::new();
        routes.insert(
            "POST /api/artifacts/clean_sample.csv".to_string(),
            (200, created(0, &body)?),
        );
        routes.insert(
            "PUT /api/artifacts/clean_sample.csv/v0/files/clean_sample.csv".to_string(),
            (500, b"disk full".to_vec()),
        );
        let (base, _) = serve(routes).await?;

        let store = RemoteStore::new(base, dir.path().join("cache"))?.with_client(local_client()?);
        let mut artifact = NewArtifact::new("clean_sample.csv", "clean_sample", "desc");
        artifact.add_file(&path);
        assert!(store.log_artifact(&artifact, "run-7").await.is_err());
        Ok(())
    }
}
