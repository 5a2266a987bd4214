use crate::dictionary::Dictionary;
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Read-only registry of the dictionaries a server publishes.
///
/// Built once from an ordered list; every dictionary is reachable by its
/// publication URL and by its client hash.
#[derive(Debug, Clone, Default)]
pub struct DictionaryIndex {
    dictionaries: Vec<Arc<Dictionary>>,
    by_url: HashMap<String, Arc<Dictionary>>,
    by_client_hash: HashMap<String, Arc<Dictionary>>,
}

impl DictionaryIndex {
    /// Creates an index, rejecting duplicate URLs, client hashes or etags.
    pub fn new(dictionaries: Vec<Dictionary>) -> Result<Self, ConfigError> {
        let mut index = Self::default();
        let mut etags = HashSet::new();

        for dictionary in dictionaries {
            let dictionary = Arc::new(dictionary);

            if index.by_url.contains_key(dictionary.url()) {
                return Err(ConfigError::DuplicateUrl(dictionary.url().to_string()));
            }
            if index.by_client_hash.contains_key(dictionary.client_hash()) {
                return Err(ConfigError::DuplicateClientHash(
                    dictionary.client_hash().to_string(),
                ));
            }
            if !etags.insert(dictionary.etag().to_string()) {
                return Err(ConfigError::DuplicateEtag(dictionary.etag().to_string()));
            }

            index
                .by_url
                .insert(dictionary.url().to_string(), Arc::clone(&dictionary));
            index
                .by_client_hash
                .insert(dictionary.client_hash().to_string(), Arc::clone(&dictionary));
            index.dictionaries.push(dictionary);
        }

        Ok(index)
    }

    /// Looks a dictionary up by its publication URL.
    pub fn by_url(&self, url: &str) -> Option<&Arc<Dictionary>> {
        self.by_url.get(url)
    }

    /// Looks a dictionary up by the hash clients advertise for it.
    pub fn by_client_hash(&self, hash: &str) -> Option<&Arc<Dictionary>> {
        self.by_client_hash.get(hash)
    }

    /// All dictionaries in registration order.
    pub fn all(&self) -> &[Arc<Dictionary>] {
        &self.dictionaries
    }

    /// Number of registered dictionaries.
    pub fn len(&self) -> usize {
        self.dictionaries.len()
    }

    /// Whether the index holds no dictionaries.
    pub fn is_empty(&self) -> bool {
        self.dictionaries.is_empty()
    }
}
