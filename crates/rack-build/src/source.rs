//! Source artifact fetch and unpack.
//!
//! Build sources are gzipped tarballs addressed as
//! `object://<app>/<key>`; any other scheme is rejected before the
//! pipeline touches the workspace.

use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use rack_provider::Provider;
use tokio::io::AsyncReadExt;

use crate::error::{BuildError, BuildResult};

/// Split an `object://<app>/<key>` url into its app and key.
pub fn parse_url(url: &str) -> BuildResult<(String, String)> {
    let rest = url
        .strip_prefix("object://")
        .ok_or_else(|| BuildError::Source(url.to_string()))?;
    let (app, key) = rest
        .split_once('/')
        .ok_or_else(|| BuildError::Source(url.to_string()))?;
    if app.is_empty() || key.is_empty() {
        return Err(BuildError::Source(url.to_string()));
    }
    Ok((app.to_string(), key.to_string()))
}

/// Fetch the source object and unpack it into `dir`.
pub async fn fetch(
    provider: &Arc<dyn Provider>,
    app: &str,
    key: &str,
    dir: &Path,
) -> BuildResult<()> {
    let mut reader = provider.object_fetch(app, key).await?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data).await?;

    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> BuildResult<()> {
        let decoder = GzDecoder::new(std::io::Cursor::new(data));
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(&dir)?;
        Ok(())
    })
    .await
    .map_err(|e| BuildError::Command(format!("unpack: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_urls() {
        let (app, key) = parse_url("object://app1/object.tgz").unwrap();
        assert_eq!(app, "app1");
        assert_eq!(key, "object.tgz");

        let (app, key) = parse_url("object://app1/tmp/source.tgz").unwrap();
        assert_eq!(app, "app1");
        assert_eq!(key, "tmp/source.tgz");
    }

    #[test]
    fn rejects_other_schemes() {
        for url in ["https://example.org/x.tgz", "file:///x.tgz", "object://", "object://app1"] {
            let err = parse_url(url).unwrap_err();
            assert!(err.to_string().starts_with("unsupported source url"));
        }
    }
}
