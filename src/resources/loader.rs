//! Format dispatch and the asynchronous model pipeline.
//!
//! [`ModelLoader::load`] decides the decoder from the URL alone. Unknown
//! formats fail right there, before anything is fetched. Known formats yield a
//! [`PendingLoad`]: a future that performs one GET of the URL as given, decodes
//! the bytes and resolves to a single [`SceneNode`]. Loads share nothing, so
//! any number of them may run at once.

use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::FutureExt;

use crate::{
    data_structures::scene_graph::SceneNode,
    error::LoadError,
    flow::Task,
    resources::{Fetch, HttpFetcher, ProgressSink, fbx, gltf::GltfAsset, log_progress},
};

/// The decoders this viewer ships.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    /// `.glb` and `.gltf`
    Gltf,
    /// `.fbx`
    Fbx,
}

/// The lowercased extension of the URL's path, ignoring query and fragment.
///
/// The fragment is stripped as well as the query: it never reaches the server,
/// so `model.glb#view` is still a GLB file.
pub fn extension_of(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let file = path.rsplit(['/', '\\']).next().unwrap_or_default();
    match file.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Last path segment without the extension, used to name loaded roots.
fn file_stem(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let file = path.rsplit(['/', '\\']).next().unwrap_or_default();
    file.rsplit_once('.').map_or(file, |(stem, _)| stem)
}

impl ModelFormat {
    pub fn sniff(url: &str) -> Result<Self, LoadError> {
        match extension_of(url).as_str() {
            "glb" | "gltf" => Ok(ModelFormat::Gltf),
            "fbx" => Ok(ModelFormat::Fbx),
            _ => Err(LoadError::UnsupportedFormat {
                extension: extension_of(url),
            }),
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFormat::Gltf => f.write_str("glTF"),
            ModelFormat::Fbx => f.write_str("FBX"),
        }
    }
}

/// What a decoder hands back before normalization.
///
/// glTF files describe several scenes plus animations, the content to show
/// lives under `scene` and the clip names move onto it. FBX decoding yields
/// the content group directly.
#[derive(Debug)]
pub enum DecodedModel {
    Gltf(GltfAsset),
    Fbx(SceneNode),
}

impl DecodedModel {
    pub fn into_node(self) -> SceneNode {
        match self {
            DecodedModel::Gltf(asset) => {
                let mut root = asset.scene;
                root.animations = asset.animations;
                root
            }
            DecodedModel::Fbx(group) => group,
        }
    }
}

/// An in-flight model load for one URL.
pub struct PendingLoad {
    url: String,
    format: ModelFormat,
    future: Task<Result<SceneNode, LoadError>>,
}

impl PendingLoad {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn format(&self) -> ModelFormat {
        self.format
    }
}

impl fmt::Debug for PendingLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLoad")
            .field("url", &self.url)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl Future for PendingLoad {
    type Output = Result<SceneNode, LoadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.poll_unpin(cx)
    }
}

#[derive(Clone)]
pub struct ModelLoader {
    fetcher: Arc<dyn Fetch>,
    progress: ProgressSink,
}

impl fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLoader").finish_non_exhaustive()
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new(Arc::new(HttpFetcher::new()))
    }
}

impl ModelLoader {
    /// A loader reporting progress to the log.
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            fetcher,
            progress: log_progress(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Start loading `url`.
    ///
    /// Returns `Err(LoadError::UnsupportedFormat)` without fetching when the
    /// extension maps to no decoder. Nothing happens until the returned
    /// future is polled.
    pub fn load(&self, url: &str) -> Result<PendingLoad, LoadError> {
        let format = ModelFormat::sniff(url)?;
        log::debug!("Loading {} as {}", url, format);
        let fetcher = self.fetcher.clone();
        let progress = self.progress.clone();
        let owned_url = url.to_string();
        let future = async move { fetch_and_decode(fetcher, progress, owned_url, format).await };
        Ok(PendingLoad {
            url: url.to_string(),
            format,
            future: Box::pin(future),
        })
    }
}

async fn fetch_and_decode(
    fetcher: Arc<dyn Fetch>,
    progress: ProgressSink,
    url: String,
    format: ModelFormat,
) -> Result<SceneNode, LoadError> {
    let bytes = fetcher
        .fetch(&url, progress.clone())
        .await
        .map_err(|source| LoadError::Fetch {
            url: url.clone(),
            source,
        })?;
    let name = file_stem(&url).to_string();
    let decoded = match format {
        ModelFormat::Gltf => DecodedModel::Gltf(
            super::gltf::load(&url, &name, bytes, fetcher.as_ref(), &progress).await?,
        ),
        ModelFormat::Fbx => {
            DecodedModel::Fbx(fbx::load(&name, &bytes).map_err(|source| LoadError::Decode {
                url: url.clone(),
                source,
            })?)
        }
    };
    let node = decoded.into_node();
    log::info!("Loaded {} ({} nodes)", url, node.subtree_len());
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sniff(url: &str) -> Option<ModelFormat> {
        ModelFormat::sniff(url).ok()
    }

    #[test]
    fn sniffing_ignores_case_query_and_fragment() {
        assert_eq!(sniff("model.glb?token=abc"), Some(ModelFormat::Gltf));
        assert_eq!(sniff("https://cdn.test/a/Scene.GLTF"), Some(ModelFormat::Gltf));
        assert_eq!(sniff("rig.FbX#frag"), Some(ModelFormat::Fbx));
        assert_eq!(sniff("https://cdn.test/model.fbx?X-Sig=a.glb"), Some(ModelFormat::Fbx));
    }

    #[test]
    fn unknown_or_missing_extensions_are_unsupported() {
        for url in ["model.xyz", "model", "https://cdn.test/dir.glb/model", "model.obj?x=.glb"] {
            match ModelFormat::sniff(url) {
                Err(LoadError::UnsupportedFormat { .. }) => {}
                other => panic!("{url}: expected unsupported format, got {other:?}"),
            }
        }
        match ModelFormat::sniff("model.XYZ") {
            Err(LoadError::UnsupportedFormat { extension }) => assert_eq!(extension, "xyz"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stems_name_the_loaded_root() {
        assert_eq!(file_stem("https://cdn.test/models/duck.glb?sig=1"), "duck");
        assert_eq!(file_stem("noext"), "noext");
    }
}
