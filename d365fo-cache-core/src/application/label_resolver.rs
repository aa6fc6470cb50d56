// d365fo-cache-core/src/application/label_resolver.rs
//
// §4.7: label lookup order L1 -> L2 -> DB -> remote batch fetch, with
// English fallback memoized back under the original language so repeated
// lookups for a language D365 F&O never localized don't re-fallback every
// time. Every miss — whether it arrives through `get_label` or
// `get_labels_batch` — is funneled through one `resolve_one`: a
// `SingleFlight` collapses concurrent callers asking for the exact same
// `(global_version_id, lang, id)`, and a `LabelBatchCoalescer` per
// `(global_version_id, lang)` merges whatever distinct ids land within the
// same 50ms window into one remote `GetLabels` call. The generic
// `ResolveLabels` walk drives `LabelWalker` over any metadata tree with a
// single batched lookup.

use crate::domain::label::LabelWalker;
use crate::error::CoreError;
use crate::infrastructure::cache::{CacheKey, CacheKind, DiskCache, LabelBatchCoalescer, MemoryCache, SingleFlight};
use crate::infrastructure::db::repository::MetadataRepository;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::odata::{HttpError, ODataClient};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

pub const ENGLISH: &str = "en-US";

pub struct LabelResolver {
    repo: MetadataRepository,
    memory: MemoryCache,
    disk: DiskCache,
    client: Arc<dyn ODataClient>,
    fallback_to_english: bool,
    /// One coalescing window per `(global_version_id, lang)` pair — ids for
    /// different versions/languages must never be merged into the same
    /// remote call.
    coalescers: Arc<DashMap<(i64, String), LabelBatchCoalescer>>,
    /// Collapses concurrent misses on the same `(global_version_id, lang,
    /// id)` key into one in-flight lookup (§4.6/§5's "single-flight per
    /// key" requirement).
    single_flight: SingleFlight<String, Option<String>>,
    /// Scratch space a coalesced flush writes into before releasing its
    /// waiters, so each caller can read back the outcome for its own id.
    pending_outcomes: Arc<DashMap<String, Result<Option<String>, String>>>,
}

impl LabelResolver {
    pub fn new(
        repo: MetadataRepository,
        memory: MemoryCache,
        disk: DiskCache,
        client: Arc<dyn ODataClient>,
        fallback_to_english: bool,
    ) -> Self {
        LabelResolver {
            repo,
            memory,
            disk,
            client,
            fallback_to_english,
            coalescers: Arc::new(DashMap::new()),
            single_flight: SingleFlight::new(),
            pending_outcomes: Arc::new(DashMap::new()),
        }
    }

    #[instrument(skip(self), fields(label_id, lang))]
    pub async fn get_label(
        &self,
        global_version_id: i64,
        label_id: &str,
        lang: &str,
    ) -> Result<Option<String>, CoreError> {
        self.resolve_one(global_version_id, label_id, lang).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len(), lang))]
    pub async fn get_labels_batch(
        &self,
        global_version_id: i64,
        ids: &[String],
        lang: &str,
    ) -> Result<HashMap<String, String>, CoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        // Every id resolves through the same single-flight + coalescing
        // path `get_label` uses: ids already cached locally settle
        // immediately, the rest are merged into shared remote batches
        // alongside whatever concurrent `get_label`/`get_labels_batch`
        // callers land in the same 50ms window.
        let outcomes = futures::future::join_all(
            ids.iter().map(|id| self.resolve_one(global_version_id, id, lang)),
        )
        .await;

        let mut resolved = HashMap::new();
        for (id, outcome) in ids.iter().zip(outcomes) {
            if let Some(text) = outcome? {
                resolved.insert(id.clone(), text);
            }
        }
        Ok(resolved)
    }

    fn coalescer_for(&self, global_version_id: i64, lang: &str) -> LabelBatchCoalescer {
        self.coalescers
            .entry((global_version_id, lang.to_string()))
            .or_insert_with(LabelBatchCoalescer::new)
            .clone()
    }

    /// Local fast path first; on miss, single-flights the remote lookup so
    /// concurrent callers for the same key share one fetch instead of
    /// stampeding the remote environment.
    async fn resolve_one(&self, global_version_id: i64, label_id: &str, lang: &str) -> Result<Option<String>, CoreError> {
        if let Some(text) = lookup_local(&self.repo, &self.memory, &self.disk, global_version_id, label_id, lang).await? {
            return Ok(Some(text));
        }

        let single_flight_key = format!("{global_version_id}:{lang}:{label_id}");
        self.single_flight
            .run(single_flight_key, || self.coalesced_remote_lookup(global_version_id, label_id.to_string(), lang.to_string()))
            .await
    }

    /// Registers `label_id` with this `(global_version_id, lang)`'s
    /// coalescing window, waits for the shared flush, then reads back the
    /// outcome the flush recorded for this specific id.
    async fn coalesced_remote_lookup(&self, global_version_id: i64, label_id: String, lang: String) -> Result<Option<String>, CoreError> {
        let outcome_key = format!("{global_version_id}:{lang}:{label_id}");
        let coalescer = self.coalescer_for(global_version_id, &lang);

        let pending_outcomes = Arc::clone(&self.pending_outcomes);
        let repo = self.repo.clone();
        let memory = self.memory.clone();
        let disk = self.disk.clone();
        let client = Arc::clone(&self.client);
        let fallback_to_english = self.fallback_to_english;
        let flush_lang = lang.clone();

        coalescer
            .request(label_id, move |ids| {
                let pending_outcomes = Arc::clone(&pending_outcomes);
                let repo = repo.clone();
                let memory = memory.clone();
                let disk = disk.clone();
                let client = Arc::clone(&client);
                let lang = flush_lang.clone();
                async move {
                    fetch_and_record_batch(client, repo, memory, disk, fallback_to_english, pending_outcomes, global_version_id, ids, lang).await;
                }
            })
            .await;

        match self.pending_outcomes.remove(&outcome_key) {
            Some((_, Ok(text))) => Ok(text),
            Some((_, Err(message))) => Err(CoreError::Infrastructure(InfrastructureError::Transport(HttpError::transient(message)))),
            None => Ok(None),
        }
    }
}

/// L1 -> L2 -> DB, in that order; populates the tiers above wherever the
/// value was actually found.
async fn lookup_local(
    repo: &MetadataRepository,
    memory: &MemoryCache,
    disk: &DiskCache,
    global_version_id: i64,
    id: &str,
    lang: &str,
) -> Result<Option<String>, CoreError> {
    let key = CacheKey::new(global_version_id, CacheKind::Label, format!("{lang}:{id}"));

    if let Some(bytes) = memory.get(&key).await {
        return Ok(String::from_utf8(bytes.as_ref().clone()).ok());
    }
    if let Some(bytes) = disk.get(&key) {
        let text = String::from_utf8(bytes).ok();
        if let Some(text) = &text {
            memory.put(key, Arc::new(text.clone().into_bytes())).await;
        }
        return Ok(text);
    }

    let from_db = repo.get_label(global_version_id, id, lang)?;
    if let Some(text) = &from_db {
        cache_locally(memory, disk, global_version_id, id, lang, text).await;
    }
    Ok(from_db)
}

async fn cache_locally(memory: &MemoryCache, disk: &DiskCache, global_version_id: i64, id: &str, lang: &str, text: &str) {
    let key = CacheKey::new(global_version_id, CacheKind::Label, format!("{lang}:{id}"));
    let bytes = Arc::new(text.as_bytes().to_vec());
    memory.put(key.clone(), bytes).await;
    let _ = disk.put(&key, text.as_bytes());
}

async fn store(
    repo: &MetadataRepository,
    memory: &MemoryCache,
    disk: &DiskCache,
    global_version_id: i64,
    id: &str,
    lang: &str,
    text: &str,
) -> Result<(), CoreError> {
    repo.write_labels(&[crate::domain::label::Label {
        global_version_id,
        label_id: id.to_string(),
        language: lang.to_string(),
        label_text: text.to_string(),
        expires_at: None,
    }])?;
    cache_locally(memory, disk, global_version_id, id, lang, text).await;
    Ok(())
}

/// Issues one `GetLabels` call per <=50-id chunk (spec §4.3 step 5 /
/// §4.7), storing every resolved id as it comes back.
async fn fetch_remote_batch(
    client: &Arc<dyn ODataClient>,
    repo: &MetadataRepository,
    memory: &MemoryCache,
    disk: &DiskCache,
    global_version_id: i64,
    ids: &[String],
    lang: &str,
) -> Result<HashMap<String, String>, CoreError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut out = HashMap::new();
    for chunk in ids.chunks(50) {
        let params = serde_json::json!({ "labelIds": chunk, "language": lang });
        let response = client
            .call_action("SystemNotifications", "GetLabels", &params)
            .await
            .map_err(|e| CoreError::Infrastructure(InfrastructureError::Transport(e)))?;

        let pairs = response.get("value").and_then(|v| v.as_object()).cloned().unwrap_or_default();

        for (id, text) in pairs {
            if let Some(text) = text.as_str() {
                store(repo, memory, disk, global_version_id, &id, lang, text).await?;
                out.insert(id, text.to_string());
            }
        }
    }
    Ok(out)
}

/// The coalesced flush body: fetches the whole merged id set in one remote
/// round trip, applies the English fallback per id still missing
/// afterwards, then records every id's outcome (success, miss, or error)
/// for its waiters to read back.
async fn fetch_and_record_batch(
    client: Arc<dyn ODataClient>,
    repo: MetadataRepository,
    memory: MemoryCache,
    disk: DiskCache,
    fallback_to_english: bool,
    pending_outcomes: Arc<DashMap<String, Result<Option<String>, String>>>,
    global_version_id: i64,
    ids: Vec<String>,
    lang: String,
) {
    let mut resolved = match fetch_remote_batch(&client, &repo, &memory, &disk, global_version_id, &ids, &lang).await {
        Ok(map) => map,
        Err(e) => {
            let message = e.to_string();
            for id in &ids {
                pending_outcomes.insert(format!("{global_version_id}:{lang}:{id}"), Err(message.clone()));
            }
            return;
        }
    };

    if fallback_to_english && lang != ENGLISH {
        let still_missing: Vec<String> = ids.iter().filter(|id| !resolved.contains_key(*id)).cloned().collect();
        if !still_missing.is_empty() {
            match fetch_remote_batch(&client, &repo, &memory, &disk, global_version_id, &still_missing, ENGLISH).await {
                Ok(english) => {
                    for (id, text) in english {
                        // Memoize under the *original* language so the next
                        // lookup for `lang` doesn't re-fallback.
                        let _ = store(&repo, &memory, &disk, global_version_id, &id, &lang, &text).await;
                        resolved.insert(id, text);
                    }
                }
                Err(e) => warn!(error = %e, "english fallback batch fetch failed"),
            }
        }
    }

    for id in &ids {
        pending_outcomes.insert(format!("{global_version_id}:{lang}:{id}"), Ok(resolved.get(id).cloned()));
    }
}

/// Walks any `LabelWalker` tree, collecting every unique label id (including
/// nested collections), performs a single batch lookup, then patches
/// `label_text` back in place.
pub async fn resolve_labels<T: LabelWalker>(
    resolver: &LabelResolver,
    global_version_id: i64,
    lang: &str,
    node: &mut T,
) -> Result<(), CoreError> {
    let mut ids = Vec::new();
    node.collect_label_ids(&mut ids);
    ids.sort();
    ids.dedup();

    if ids.is_empty() {
        return Ok(());
    }

    let resolved = resolver.get_labels_batch(global_version_id, &ids, lang).await?;
    node.apply_labels(&resolved);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metadata::enumeration::{Enumeration, EnumerationMember};
    use crate::infrastructure::db::pool::MetadataDb;
    use crate::infrastructure::db::schema;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeClient {
        calls: Arc<AtomicUsize>,
        ids_per_call: Arc<std::sync::Mutex<Vec<usize>>>,
    }

    impl FakeClient {
        fn new() -> Self {
            FakeClient {
                calls: Arc::new(AtomicUsize::new(0)),
                ids_per_call: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl ODataClient for FakeClient {
        async fn get(&self, _path: &str, _query: &StdHashMap<String, String>) -> Result<serde_json::Value, crate::ports::odata::HttpError> {
            unimplemented!()
        }
        async fn post(&self, _path: &str, _body: &serde_json::Value) -> Result<serde_json::Value, crate::ports::odata::HttpError> {
            unimplemented!()
        }
        async fn call_action(&self, _entity_set: &str, _action_name: &str, params: &serde_json::Value) -> Result<serde_json::Value, crate::ports::odata::HttpError> {
            let ids = params["labelIds"].as_array().cloned().unwrap_or_default();
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ids_per_call.lock().unwrap().push(ids.len());
            // Simulate network latency so concurrent callers actually land
            // inside the same coalescing window instead of racing serially.
            tokio::time::sleep(Duration::from_millis(5)).await;
            let mut map = serde_json::Map::new();
            for id in ids {
                let id = id.as_str().unwrap().to_string();
                map.insert(id.clone(), serde_json::Value::String(format!("Text for {id}")));
            }
            Ok(serde_json::json!({ "value": map }))
        }
    }

    fn resolver_with(client: Arc<FakeClient>) -> LabelResolver {
        let db = MetadataDb::in_memory().unwrap();
        {
            let conn = db.writer().unwrap();
            schema::apply(&conn).unwrap();
            crate::infrastructure::db::fts::create_fts(&conn).unwrap();
        }
        let repo = MetadataRepository::new(db);
        LabelResolver::new(
            repo,
            MemoryCache::new(1000, Duration::from_secs(300)),
            DiskCache::new(tempfile::tempdir().unwrap().keep(), 1024 * 1024).unwrap(),
            client,
            true,
        )
    }

    fn resolver() -> LabelResolver {
        resolver_with(Arc::new(FakeClient::new()))
    }

    #[tokio::test]
    async fn fetches_and_caches_a_single_label() {
        let r = resolver();
        let text = r.get_label(1, "@SYS1", "en-US").await.unwrap();
        assert_eq!(text, Some("Text for @SYS1".to_string()));
    }

    #[tokio::test]
    async fn resolve_labels_is_idempotent() {
        let r = resolver();
        let mut e = Enumeration {
            global_version_id: 1,
            name: "NoYes".into(),
            label_id: Some("@SYS1".into()),
            label_text: None,
            members: vec![EnumerationMember {
                name: "No".into(),
                value: 0,
                configuration_enabled: true,
                label_id: Some("@SYS2".into()),
                label_text: None,
            }],
        };

        resolve_labels(&r, 1, "en-US", &mut e).await.unwrap();
        let first_pass = e.label_text.clone();
        resolve_labels(&r, 1, "en-US", &mut e).await.unwrap();

        assert_eq!(e.label_text, first_pass);
        assert_eq!(e.label_text, Some("Text for @SYS1".to_string()));
        assert_eq!(e.members[0].label_text, Some("Text for @SYS2".to_string()));
    }

    /// S4: 10 concurrent `get_label` calls for disjoint ids in the same
    /// language collapse into a single remote `GetLabels` request carrying
    /// all 10 ids.
    #[tokio::test]
    async fn concurrent_get_label_calls_coalesce_into_one_remote_request() {
        let client = Arc::new(FakeClient::new());
        let r = Arc::new(resolver_with(Arc::clone(&client)));

        let mut handles = Vec::new();
        for i in 1..=10 {
            let r = Arc::clone(&r);
            handles.push(tokio::spawn(async move { r.get_label(1, &format!("@SYS{i}"), "en-US").await }));
        }

        let mut texts = Vec::new();
        for h in handles {
            texts.push(h.await.unwrap().unwrap());
        }

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.ids_per_call.lock().unwrap().as_slice(), &[10]);
        for (i, text) in texts.into_iter().enumerate() {
            assert_eq!(text, Some(format!("Text for @SYS{}", i + 1)));
        }
    }

    /// Concurrent misses on the *same* id single-flight into one fetch
    /// instead of duplicating the remote call.
    #[tokio::test]
    async fn concurrent_lookups_of_the_same_id_single_flight() {
        let client = Arc::new(FakeClient::new());
        let r = Arc::new(resolver_with(Arc::clone(&client)));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let r = Arc::clone(&r);
            handles.push(tokio::spawn(async move { r.get_label(1, "@SYS1", "en-US").await }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), Some("Text for @SYS1".to_string()));
        }

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
