//! Error types at the module seams.
//!
//! Setup and I/O plumbing use `anyhow`; the errors a caller is expected to
//! match on are spelled out here.

use thiserror::Error;

/// Why a model could not be turned into a scene node.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The URL's extension maps to no decoder. Raised before any fetch.
    #[error("unsupported model format {extension:?}")]
    UnsupportedFormat { extension: String },
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to decode {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: anyhow::Error,
    },
}

impl LoadError {
    pub fn url(&self) -> Option<&str> {
        match self {
            LoadError::UnsupportedFormat { .. } => None,
            LoadError::Fetch { url, .. } | LoadError::Decode { url, .. } => Some(url),
        }
    }
}

/// Why a camera stream could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("camera permission denied")]
    Denied,
    #[error("no camera available")]
    NoDevice,
    #[error("camera backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_url() {
        let err = LoadError::Fetch {
            url: "http://host/model.glb".into(),
            source: anyhow::anyhow!("404 Not Found"),
        };
        assert_eq!(
            err.to_string(),
            "failed to fetch http://host/model.glb: 404 Not Found"
        );
        assert_eq!(err.url(), Some("http://host/model.glb"));
    }

    #[test]
    fn unsupported_format_has_no_url() {
        let err = LoadError::UnsupportedFormat {
            extension: "xyz".into(),
        };
        assert_eq!(err.url(), None);
        assert_eq!(err.to_string(), "unsupported model format \"xyz\"");
    }
}
