//! Byte sources for assets: plain HTTP(S) GET or the local filesystem.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;

/// Retrieves the raw bytes behind an asset path. Called from worker threads.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches paths relative to a base URL with blocking GET requests.
pub struct HttpFetcher {
    base: String,
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(30))
            .build();
        Self { base, agent }
    }

    fn url_for(&self, path: &str) -> String {
        if is_url(path) {
            path.to_string()
        } else {
            format!("{}{}", self.base, path.trim_start_matches('/'))
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.url_for(path);
        let response = self.agent.get(&url).call().map_err(|e| match e {
            ureq::Error::Status(status, _) => FetchError::Status {
                url: url.clone(),
                status,
            },
            ureq::Error::Transport(t) => FetchError::Transport {
                url: url.clone(),
                message: t.to_string(),
            },
        })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Transport {
                url,
                message: e.to_string(),
            })?;
        Ok(bytes)
    }
}

/// Reads paths relative to a root directory.
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let full = self.root.join(path);
        std::fs::read(&full).map_err(|source| FetchError::Io { path: full, source })
    }
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// HTTP fetcher for URL bases, file fetcher for everything else.
pub fn fetcher_for(base: &str) -> Arc<dyn Fetcher> {
    if is_url(base) {
        Arc::new(HttpFetcher::new(base))
    } else {
        Arc::new(FileFetcher::new(base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_fetcher_reads_relative() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("textures")).unwrap();
        std::fs::write(dir.path().join("textures/a.bin"), [1u8, 2, 3]).unwrap();
        let f = FileFetcher::new(dir.path());
        assert_eq!(f.fetch("textures/a.bin").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_file_fetcher_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let f = FileFetcher::new(dir.path());
        assert!(matches!(f.fetch("nope.png"), Err(FetchError::Io { .. })));
    }

    #[test]
    fn test_http_url_joining() {
        let f = HttpFetcher::new("https://cdn.example.com/boats");
        assert_eq!(f.url_for("hull.glb"), "https://cdn.example.com/boats/hull.glb");
        assert_eq!(f.url_for("/tex/a.png"), "https://cdn.example.com/boats/tex/a.png");
        assert_eq!(f.url_for("http://other/x.png"), "http://other/x.png");
    }
}
