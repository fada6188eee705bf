//! Mirror-list chooser: resolve `mirror://` URIs against a fetched
//! list of mirrors, falling through the list in order on failure.

use std::collections::HashMap;

use depot_acquire::{
    AcquireError, Capabilities, FetchItem, FetchResult, MethodHandler, MethodIo, Result,
};
use depot_hashes::MultiHasher;
use depot_util::Uri;

use crate::http::HttpMethod;

pub struct MirrorMethod {
    /// fetched lists keyed by their (rewritten) list URI
    lists: HashMap<String, Vec<String>>,
    /// next mirror to try per list
    cursor: HashMap<String, usize>,
    http: HttpMethod,
}

impl Default for MirrorMethod {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorMethod {
    pub fn new() -> Self {
        Self {
            lists: HashMap::new(),
            cursor: HashMap::new(),
            http: HttpMethod::new(),
        }
    }

    pub fn capabilities() -> Capabilities {
        Capabilities::new("mirror", "1.0")
            .send_config()
            .send_uri_encoded()
    }

    /// Split `mirror://host/list-file/remaining/path` at the list file:
    /// the first path segment with an extension ends the list part.
    fn split_list_uri(uri: &str) -> Result<(String, String)> {
        let parsed = Uri::parse(uri);
        let segments: Vec<&str> = parsed.path.split('/').filter(|s| !s.is_empty()).collect();
        let Some(list_end) = segments.iter().position(|s| s.contains('.')) else {
            return Err(AcquireError::Other(format!(
                "cannot locate the mirror list inside {uri}"
            )));
        };
        let list_path = format!("/{}", segments[..=list_end].join("/"));
        let file_path = format!("/{}", segments[list_end + 1..].join("/"));
        let list_uri = format!("http://{}{}", parsed.host, list_path);
        Ok((list_uri, file_path))
    }

    fn load_list(&mut self, io: &mut MethodIo, list_uri: &str) -> Result<()> {
        if self.lists.contains_key(list_uri) {
            return Ok(());
        }
        io.status(&format!("Downloading mirror list {list_uri}"))?;

        let temp = tempfile::Builder::new().prefix("depot-mirrors.").tempfile()?;
        let list_item = FetchItem {
            uri: list_uri.to_string(),
            dest_file: temp.path().to_path_buf(),
            ..FetchItem::default()
        };
        let mut inner = MethodIo::discard(io.config.clone());
        self.http.fetch(&mut inner, &list_item)?;

        let text = std::fs::read_to_string(temp.path())?;
        let mirrors: Vec<String> = text
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| l.trim_end_matches('/').to_string())
            .collect();
        if mirrors.is_empty() {
            return Err(AcquireError::Other(format!(
                "mirror list {list_uri} is empty"
            )));
        }
        tracing::debug!(list_uri, count = mirrors.len(), "loaded mirror list");
        self.lists.insert(list_uri.to_string(), mirrors);
        Ok(())
    }
}

impl MethodHandler for MirrorMethod {
    fn fetch(&mut self, io: &mut MethodIo, item: &FetchItem) -> Result<()> {
        let (list_uri, file_path) = Self::split_list_uri(&item.uri)?;
        self.load_list(io, &list_uri)?;

        let mirrors = self.lists[&list_uri].clone();
        let start = *self.cursor.get(&list_uri).unwrap_or(&0);

        let mut last_error = AcquireError::Other("no mirror could be tried".into());
        for offset in 0..mirrors.len() {
            let index = (start + offset) % mirrors.len();
            let mirror = &mirrors[index];
            let rewritten = FetchItem {
                uri: format!("{mirror}{file_path}"),
                ..item.clone()
            };
            io.status(&format!("Trying mirror {mirror}"))?;

            let mut inner = MethodIo::discard(io.config.clone());
            match self.http.fetch(&mut inner, &rewritten) {
                Ok(()) => {
                    self.cursor.insert(list_uri.clone(), index);
                    let mut hasher = if item.expected_hashes.is_empty() {
                        MultiHasher::new()
                    } else {
                        MultiHasher::for_list(&item.expected_hashes)
                    };
                    hasher.add_file(&mut std::fs::File::open(&item.dest_file)?, None)?;
                    let mut result = FetchResult {
                        filename: item.dest_file.clone(),
                        alt_uris: vec![rewritten.uri.clone()],
                        ..FetchResult::default()
                    };
                    result.take_hashes(hasher);
                    io.uri_start(item, Some(result.size), None, 0)?;
                    return io.uri_done(item, &result);
                }
                Err(error) => {
                    // move on to the next mirror before surfacing it
                    self.cursor.insert(list_uri.clone(), (index + 1) % mirrors.len());
                    io.warning(&format!("Mirror {mirror} failed: {error}"))?;
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_list_and_file() {
        let (list, file) =
            MirrorMethod::split_list_uri("mirror://example.org/mirrors.txt/dists/stable/Release")
                .unwrap();
        assert_eq!(list, "http://example.org/mirrors.txt");
        assert_eq!(file, "/dists/stable/Release");
    }

    #[test]
    fn rejects_unsplittable_uris() {
        assert!(MirrorMethod::split_list_uri("mirror://example.org/plain/path").is_err());
    }
}
