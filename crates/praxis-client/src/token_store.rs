use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ClientError;

/// Bearer token persisted in a single file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored token, or `None` when the file is missing, unreadable or blank.
    pub fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let token = raw.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read token file {}: {e}", self.path.display());
                None
            }
        }
    }

    pub fn save(&self, token: &str) -> Result<(), ClientError> {
        let token = token.trim();
        if token.is_empty() {
            return self.clear();
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, token)?;
        debug!("Saved token to {}", self.path.display());
        Ok(())
    }

    pub fn clear(&self) -> Result<(), ClientError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a one-time `token` override carried by a sign-in link, either a
    /// full URL (`https://host/app?chat=1&token=abc#top`) or just its query.
    /// A non-empty token replaces the stored one and is returned.
    pub fn absorb_link(&self, link: &str) -> Result<Option<String>, ClientError> {
        let link = link.trim();
        let link = link.split_once('#').map_or(link, |(before, _)| before);
        let query = match link.split_once('?') {
            Some((_, query)) => query,
            None if link.contains("://") => return Ok(None),
            None => link,
        };
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key != "token" {
                continue;
            }
            let value = value.replace('+', " ");
            let decoded = urlencoding::decode(&value)
                .map_err(|e| ClientError::InvalidInput(format!("bad token encoding: {e}")))?;
            let token = decoded.trim();
            if token.is_empty() {
                continue;
            }
            self.save(token)?;
            debug!("Took session token from link");
            return Ok(Some(token.to_string()));
        }
        Ok(None)
    }

    /// Token to use for this session: an explicit override wins and is
    /// persisted, otherwise whatever is stored.
    pub fn resolve(&self, override_token: Option<&str>) -> Result<Option<String>, ClientError> {
        match override_token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => {
                self.save(token)?;
                Ok(Some(token.to_string()))
            }
            None => Ok(self.load()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_token_path;

    fn cleanup(store: &TokenStore) {
        if let Some(dir) = store.path().parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_load_missing_is_none() {
        let store = TokenStore::new(temp_token_path());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_load_clear() {
        let store = TokenStore::new(temp_token_path());
        store.save("  abc.def.ghi\n").unwrap();
        assert_eq!(store.load().as_deref(), Some("abc.def.ghi"));
        store.clear().unwrap();
        assert!(store.load().is_none());
        store.clear().unwrap();
        cleanup(&store);
    }

    #[test]
    fn test_blank_token_is_absent() {
        let store = TokenStore::new(temp_token_path());
        store.save("tok").unwrap();
        store.save("   ").unwrap();
        assert!(store.load().is_none());
        cleanup(&store);
    }

    #[test]
    fn test_absorb_link_overrides_and_decodes() {
        let store = TokenStore::new(temp_token_path());
        store.save("old").unwrap();
        let got = store.absorb_link("?chat=7&token=a%2Eb%2Ec").unwrap();
        assert_eq!(got.as_deref(), Some("a.b.c"));
        assert_eq!(store.load().as_deref(), Some("a.b.c"));
        cleanup(&store);
    }

    #[test]
    fn test_absorb_link_accepts_full_url() {
        let store = TokenStore::new(temp_token_path());
        let got = store
            .absorb_link(" https://erp.example/assistant?chat=7&token=x.y.z#latest ")
            .unwrap();
        assert_eq!(got.as_deref(), Some("x.y.z"));
        assert_eq!(store.resolve(None).unwrap().as_deref(), Some("x.y.z"));
        cleanup(&store);
    }

    #[test]
    fn test_absorb_link_without_token_keeps_store() {
        let store = TokenStore::new(temp_token_path());
        store.save("kept").unwrap();
        assert!(store.absorb_link("chat=7&token=").unwrap().is_none());
        assert!(store.absorb_link("").unwrap().is_none());
        assert!(store.absorb_link("https://erp.example/token=nope").unwrap().is_none());
        assert_eq!(store.load().as_deref(), Some("kept"));
        cleanup(&store);
    }

    #[test]
    fn test_resolve_prefers_override() {
        let store = TokenStore::new(temp_token_path());
        assert!(store.resolve(None).unwrap().is_none());
        store.save("stored").unwrap();
        assert_eq!(store.resolve(None).unwrap().as_deref(), Some("stored"));
        assert_eq!(store.resolve(Some(" ")).unwrap().as_deref(), Some("stored"));
        assert_eq!(store.resolve(Some("fresh")).unwrap().as_deref(), Some("fresh"));
        assert_eq!(store.load().as_deref(), Some("fresh"));
        cleanup(&store);
    }
}
