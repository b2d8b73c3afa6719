//! Loading meshes, materials and whole models from external files.
//!
//! Everything here is asynchronous and GPU independent: the decoders produce
//! [`SceneNode`](crate::data_structures::scene_graph::SceneNode) trees with
//! CPU-side geometry, the renderer uploads them on first use.
//!
//! - [`Fetch`] is the byte source: [`HttpFetcher`] for real URLs (and plain
//!   paths on native), [`MemoryFetcher`] for assets bundled in memory
//! - [`loader`] sniffs the format and drives fetch and decode
//! - [`gltf`] and [`fbx`] are the two decoders
//! - [`primitives`] builds the built-in box, light and backdrop quad

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use anyhow::{Context as _, anyhow};

use crate::flow::Task;

pub mod fbx;
pub mod gltf;
pub mod loader;
pub mod primitives;

/// Deepest node hierarchy a decoder accepts. Files nesting deeper are decode
/// errors.
pub const MAX_NODE_DEPTH: usize = 64;

/// One progress report of a running download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadProgress {
    pub url: String,
    pub loaded: u64,
    pub total: Option<u64>,
}

impl LoadProgress {
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.loaded as f64 / total as f64 * 100.0),
            _ => None,
        }
    }
}

impl fmt::Display for LoadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percent() {
            Some(percent) => write!(f, "Loading progress: {percent}%"),
            None => write!(f, "Loading progress: {} bytes loaded", self.loaded),
        }
    }
}

/// Receives progress reports. Called inline from the download, so it must
/// return quickly.
pub type ProgressSink = Arc<dyn Fn(&LoadProgress) + Send + Sync>;

pub fn log_progress() -> ProgressSink {
    Arc::new(|progress: &LoadProgress| log::info!("{} ({})", progress, progress.url))
}

/// Source of raw bytes for a URL.
pub trait Fetch: Send + Sync {
    /// Fetch `url` exactly as given. Implementations report progress for
    /// every chunk they receive.
    fn fetch(&self, url: &str, progress: ProgressSink) -> Task<anyhow::Result<Vec<u8>>>;
}

/// Largest buffer reserved up front from a server's `Content-Length`.
#[cfg(not(target_arch = "wasm32"))]
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Initial capacity for a download announcing `total` bytes. The header is
/// only a hint; longer bodies grow the buffer.
#[cfg(not(target_arch = "wasm32"))]
fn prealloc_len(total: Option<u64>) -> usize {
    usize::try_from(total.unwrap_or(0).min(MAX_PREALLOC)).unwrap_or(0)
}

fn is_remote(url: &str) -> bool {
    url.contains("://") && !url.starts_with("file://")
}

/// Resolve `relative` against the location of `base`.
///
/// Absolute URLs and `data:` URIs are returned unchanged. Bases that are not
/// URLs are treated as filesystem paths.
pub fn sibling_url(base: &str, relative: &str) -> String {
    if relative.starts_with("data:") || reqwest::Url::parse(relative).is_ok() {
        return relative.to_string();
    }
    if let Ok(base) = reqwest::Url::parse(base) {
        if let Ok(joined) = base.join(relative) {
            return joined.to_string();
        }
    }
    match base.rfind(['/', '\\']) {
        Some(idx) => format!("{}{}", &base[..=idx], relative),
        None => relative.to_string(),
    }
}

/// Fetches over HTTP(S) with `reqwest`.
///
/// On native, anything that is not a remote URL is read from the filesystem.
/// On the web, relative URLs are resolved against the page location.
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    #[cfg(not(target_arch = "wasm32"))]
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str, progress: ProgressSink) -> Task<anyhow::Result<Vec<u8>>> {
        let client = self.client.clone();
        let url = url.to_string();
        Box::pin(async move {
            if !is_remote(&url) {
                let path = url.strip_prefix("file://").unwrap_or(&url);
                let data = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading {path}"))?;
                let len = data.len() as u64;
                progress(&LoadProgress {
                    url,
                    loaded: len,
                    total: Some(len),
                });
                return Ok(data);
            }

            let mut response = client.get(&url).send().await?.error_for_status()?;
            let total = response.content_length();
            let mut data = Vec::with_capacity(prealloc_len(total));
            while let Some(chunk) = response.chunk().await? {
                data.extend_from_slice(&chunk);
                progress(&LoadProgress {
                    url: url.clone(),
                    loaded: data.len() as u64,
                    total,
                });
            }
            Ok(data)
        })
    }
}

#[cfg(target_arch = "wasm32")]
fn page_url(url: &str) -> anyhow::Result<reqwest::Url> {
    if let Ok(absolute) = reqwest::Url::parse(url) {
        return Ok(absolute);
    }
    let href = web_sys::window()
        .ok_or_else(|| anyhow!("no window"))?
        .location()
        .href()
        .map_err(|e| anyhow!("cannot read page location: {e:?}"))?;
    Ok(reqwest::Url::parse(&href)?.join(url)?)
}

#[cfg(target_arch = "wasm32")]
impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str, progress: ProgressSink) -> Task<anyhow::Result<Vec<u8>>> {
        let url = url.to_string();
        Box::pin(async move {
            let target = page_url(&url)?;
            let response = reqwest::get(target).await?.error_for_status()?;
            let total = response.content_length();
            let data = response.bytes().await?.to_vec();
            progress(&LoadProgress {
                url,
                loaded: data.len() as u64,
                total,
            });
            Ok(data)
        })
    }
}

/// Serves bytes registered up front. Every request is recorded.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(url, data);
        self
    }

    pub fn insert(&self, url: impl Into<String>, data: impl Into<Vec<u8>>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(url.into(), data.into());
        }
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl Fetch for MemoryFetcher {
    fn fetch(&self, url: &str, progress: ProgressSink) -> Task<anyhow::Result<Vec<u8>>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        let found = self
            .files
            .lock()
            .ok()
            .and_then(|files| files.get(url).cloned());
        let url = url.to_string();
        Box::pin(async move {
            let data = found.ok_or_else(|| anyhow!("404 Not Found: {url}"))?;
            let len = data.len() as u64;
            progress(&LoadProgress {
                url,
                loaded: len,
                total: Some(len),
            });
            Ok(data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_lines() {
        let mut progress = LoadProgress {
            url: "a.glb".into(),
            loaded: 50,
            total: Some(200),
        };
        assert_eq!(progress.to_string(), "Loading progress: 25%");
        progress.total = None;
        assert_eq!(progress.to_string(), "Loading progress: 50 bytes loaded");
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn content_length_only_hints_the_capacity() {
        assert_eq!(prealloc_len(None), 0);
        assert_eq!(prealloc_len(Some(1024)), 1024);
        assert_eq!(prealloc_len(Some(u64::MAX)), MAX_PREALLOC as usize);
    }

    #[test]
    fn sibling_urls() {
        assert_eq!(
            sibling_url("https://cdn.test/models/a.gltf?sig=1", "a.bin"),
            "https://cdn.test/models/a.bin"
        );
        assert_eq!(
            sibling_url("https://cdn.test/models/a.gltf", "https://other.test/b.png"),
            "https://other.test/b.png"
        );
        assert_eq!(sibling_url("assets/models/a.gltf", "tex/b.png"), "assets/models/tex/b.png");
        assert_eq!(sibling_url("a.gltf", "a.bin"), "a.bin");
        assert_eq!(
            sibling_url("a.gltf", "data:application/octet-stream;base64,AAAA"),
            "data:application/octet-stream;base64,AAAA"
        );
    }

    #[test]
    fn memory_fetcher_records_requests() {
        let fetcher = MemoryFetcher::new().with("a.glb", vec![1, 2, 3]);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink: ProgressSink = {
            let reports = reports.clone();
            Arc::new(move |p: &LoadProgress| reports.lock().unwrap().push(p.clone()))
        };

        let data = futures::executor::block_on(fetcher.fetch("a.glb", sink.clone())).unwrap();
        assert_eq!(data, [1, 2, 3]);
        assert!(futures::executor::block_on(fetcher.fetch("missing.glb", sink)).is_err());

        assert_eq!(fetcher.requests(), ["a.glb", "missing.glb"]);
        assert_eq!(reports.lock().unwrap().len(), 1);
    }
}
