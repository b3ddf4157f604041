//! Part byte fetching — local files, plus HTTP when the `http` feature is on.

use std::path::{Path, PathBuf};

use crate::effects::Fetch;
use crate::error::FetchError;

/// Reads part locators as filesystem paths, optionally relative to a root.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    root: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative locators against `root` (usually the descriptor's directory).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        let path = Path::new(locator);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl Fetch for FileFetcher {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.resolve(locator);
        std::fs::read(&path).map_err(|e| FetchError::new(locator, e))
    }
}

/// Dispatches on the locator scheme: `http(s)://` goes over the network,
/// everything else is a file.
#[derive(Default)]
pub struct SourceFetcher {
    files: FileFetcher,
    #[cfg(feature = "http")]
    http: super::http::HttpFetcher,
}

impl SourceFetcher {
    pub fn new(files: FileFetcher) -> Self {
        Self {
            files,
            #[cfg(feature = "http")]
            http: super::http::HttpFetcher::new(),
        }
    }
}

impl Fetch for SourceFetcher {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        if is_http_url(locator) {
            return self.fetch_http(locator);
        }
        self.files.fetch(locator)
    }
}

impl SourceFetcher {
    #[cfg(feature = "http")]
    fn fetch_http(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        self.http.fetch(locator)
    }

    #[cfg(not(feature = "http"))]
    fn fetch_http(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::new(locator, "built without http support"))
    }
}

/// Extract a lowercase file extension from a path or URL, ignoring query
/// parameters and fragments.
///
/// `"https://example.com/song.mp3?token=abc"` → `Some("mp3")`
pub fn extension_hint(locator: &str) -> Option<String> {
    let path = locator.split('?').next().unwrap_or(locator);
    let path = path.split('#').next().unwrap_or(path);
    let segment = path.rsplit(['/', '\\']).next()?;
    let ext = segment.rsplit('.').next()?;
    if ext == segment || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Check if a locator looks like an HTTP URL.
pub fn is_http_url(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}
