//! Per-provider record of rejected tool definitions.

use std::collections::HashMap;
use std::sync::Arc;

use clarion_types::{BlacklistEntry, BlacklistStore, StorageError, ToolDefinition};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

/// Cached view over a [`BlacklistStore`].
///
/// A provider's entries are loaded from the store on first use and kept in
/// memory afterwards. One async mutex guards the cache, so recording is
/// single-writer and a key is checked before it is inserted.
///
/// Share one `Arc<Blacklist>` between every negotiator talking to the same
/// store.
pub struct Blacklist {
    store: Arc<dyn BlacklistStore>,
    cache: Mutex<HashMap<String, Vec<BlacklistEntry>>>,
}

impl Blacklist {
    /// Create a blacklist over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BlacklistStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fingerprint of a tool definition.
    ///
    /// Covers name, description, and parameters, so editing a rejected
    /// tool's schema gives it another chance.
    #[must_use]
    pub fn fingerprint(tool: &ToolDefinition) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tool.name.as_bytes());
        hasher.update([0]);
        hasher.update(tool.description.as_bytes());
        hasher.update([0]);
        let params = serde_json::to_vec(&tool.parameters).unwrap_or_default();
        hasher.update(&params);
        hex::encode(hasher.finalize())
    }

    /// Ensure `provider`'s entries are cached and return them.
    ///
    /// A store failure is logged and the provider starts from an empty
    /// list for the rest of the process.
    async fn load<'a>(
        &self,
        cache: &'a mut HashMap<String, Vec<BlacklistEntry>>,
        provider: &str,
    ) -> &'a mut Vec<BlacklistEntry> {
        if !cache.contains_key(provider) {
            let entries = match self.store.get(provider).await {
                Ok(entries) => {
                    tracing::debug!(provider, count = entries.len(), "loaded tool blacklist");
                    entries
                }
                Err(e) => {
                    tracing::warn!(provider, error = %e, "failed to load tool blacklist");
                    Vec::new()
                }
            };
            cache.insert(provider.to_string(), entries);
        }
        cache.entry(provider.to_string()).or_default()
    }

    /// The tools in `tools` not blacklisted for `provider`, in order.
    pub async fn filter(&self, provider: &str, tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
        let mut cache = self.cache.lock().await;
        let entries = self.load(&mut cache, provider).await;
        tools
            .iter()
            .filter(|tool| !matches(entries, provider, tool))
            .cloned()
            .collect()
    }

    /// Whether `tool` is blacklisted for `provider`.
    pub async fn is_blacklisted(&self, provider: &str, tool: &ToolDefinition) -> bool {
        let mut cache = self.cache.lock().await;
        let entries = self.load(&mut cache, provider).await;
        matches(entries, provider, tool)
    }

    /// Record that `provider` rejected `tool`. Returns `true` when the
    /// entry is new.
    ///
    /// The entry is cached even if persisting it fails, so this process
    /// still stops offering the tool.
    pub async fn record(&self, provider: &str, tool: &ToolDefinition, reason: &str) -> bool {
        let mut cache = self.cache.lock().await;
        let entries = self.load(&mut cache, provider).await;
        if matches(entries, provider, tool) {
            return false;
        }

        let entry = BlacklistEntry::new(provider, &tool.name, Self::fingerprint(tool), reason);
        entries.push(entry.clone());
        tracing::info!(provider, tool = %tool.name, reason, "tool blacklisted");
        if let Err(e) = self.store.put(entry).await {
            tracing::warn!(provider, tool = %tool.name, error = %e, "failed to persist blacklist entry");
        }
        true
    }

    /// Entries currently recorded for `provider`.
    pub async fn entries(&self, provider: &str) -> Vec<BlacklistEntry> {
        let mut cache = self.cache.lock().await;
        self.load(&mut cache, provider).await.clone()
    }

    /// Forget entries for one provider, or for all when `None`.
    pub async fn clear(&self, provider: Option<&str>) -> Result<(), StorageError> {
        let mut cache = self.cache.lock().await;
        match provider {
            Some(key) => {
                cache.remove(key);
            }
            None => cache.clear(),
        }
        self.store.clear(provider).await
    }
}

fn matches(entries: &[BlacklistEntry], provider: &str, tool: &ToolDefinition) -> bool {
    let fingerprint = Blacklist::fingerprint(tool);
    entries.iter().any(|entry| {
        entry.provider_key == provider
            && entry.tool_name == tool.name
            && entry.description_hash == fingerprint
    })
}
