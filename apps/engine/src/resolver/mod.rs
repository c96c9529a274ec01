//! Field resolver: turns a page snapshot into a [`FieldMap`].
//!
//! Resolution is cache-first: every profile field with a cached locator for
//! this form signature is checked on the live page, and entries that no
//! longer resolve are invalidated on the spot. If the caller's known fields
//! and the cache cover every fillable control the oracle is never called; otherwise the snapshot is chunked, each chunk is
//! resolved (one retry on a bad response) and the fragments are merged.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::browser::BrowserSession;
use crate::cache::{CacheKey, LocatorCache};
use crate::models::UserProfile;
use crate::oracle::{ChunkRequest, FieldFragment, FieldKind, FieldOracle, OracleError};

pub mod chunking;
pub mod field_map;
pub mod merge;
pub mod signature;

pub use chunking::{chunk_snapshot, Chunk};
pub use field_map::{FieldEntry, FieldMap, FieldSource};
pub use merge::merge_fragments;
pub use signature::{extract_controls, form_signature, visible_text, FormControl};

/// Calls per chunk before it is recorded as unresolved.
const ORACLE_ATTEMPTS_PER_CHUNK: u32 = 2;

/// Non-profile fields whose locators are worth caching.
const DOCUMENT_FIELDS: [&str; 2] = ["resume", "cover_letter"];

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub max_chunk_chars: usize,
    pub overlap_segments: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 50_000,
            overlap_segments: 1,
        }
    }
}

/// Result of resolving one page.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub fields: FieldMap,
    /// Controls nobody could map, plus chunks that failed outright.
    pub unresolved: Vec<String>,
    pub form_signature: String,
}

pub struct FieldResolver {
    oracle: Option<Arc<dyn FieldOracle>>,
    cache: Arc<dyn LocatorCache>,
    config: ResolverConfig,
}

impl FieldResolver {
    pub fn new(
        oracle: Option<Arc<dyn FieldOracle>>,
        cache: Arc<dyn LocatorCache>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            oracle,
            cache,
            config,
        }
    }

    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    /// Resolves one page. `known` holds fields the caller already mapped;
    /// they win over cache and oracle alike and count toward coverage.
    pub async fn resolve(
        &self,
        session: &dyn BrowserSession,
        ats_type: &str,
        snapshot: &str,
        profile: &UserProfile,
        known: FieldMap,
    ) -> Resolution {
        let controls = extract_controls(snapshot);
        let form_signature = form_signature(&controls);
        let fillable: Vec<&FormControl> = controls.iter().filter(|c| c.is_fillable()).collect();

        let mut fields = known;
        let preset = fields.len();
        for entry in self
            .cached_fields(session, ats_type, &form_signature, profile)
            .await
            .iter()
        {
            fields.insert_if_absent(entry.clone());
        }
        let cache_hits = fields.len() - preset;

        if !fillable.is_empty() && covers_all(&fields, &fillable) {
            info!(
                "{preset} known and {cache_hits} cached field(s) cover all {} control(s) for form {form_signature}; skipping oracle",
                fillable.len()
            );
            return Resolution {
                fields,
                form_signature,
                ..Default::default()
            };
        }

        let Some(oracle) = self.oracle.as_ref() else {
            debug!("No oracle configured; returning {} known or cached field(s)", fields.len());
            return Resolution {
                fields,
                form_signature,
                unresolved: vec!["oracle unavailable".to_string()],
            };
        };

        let chunks = chunk_snapshot(
            snapshot,
            self.config.max_chunk_chars,
            self.config.overlap_segments,
        );
        let known_fields = fields.names();
        let mut fragments = Vec::with_capacity(chunks.len());
        let mut unresolved = Vec::new();
        let mut chunks_failed = 0;

        for chunk in &chunks {
            let request = ChunkRequest {
                chunk,
                ats_type,
                profile,
                known_fields: &known_fields,
            };
            match resolve_chunk(oracle.as_ref(), &request).await {
                Ok(fragment) => {
                    unresolved.extend(fragment.unresolved.iter().cloned());
                    fragments.push(fragment);
                }
                Err(e) => {
                    chunks_failed += 1;
                    warn!(
                        "Chunk {}/{} unresolved after {} attempts: {e}",
                        chunk.index + 1,
                        chunk.total,
                        ORACLE_ATTEMPTS_PER_CHUNK
                    );
                    unresolved.push(format!("chunk {}/{}: {e}", chunk.index + 1, chunk.total));
                }
            }
        }

        for entry in merge_fragments(fragments).iter() {
            if fields.contains(&entry.name) {
                debug!("Keeping the mapped locator for {} over the oracle's", entry.name);
                continue;
            }
            fields.insert(entry.clone());
        }

        info!(
            "Resolved {} field(s) on form {} ({} known, {} from cache, {}/{} chunk(s) failed)",
            fields.len(),
            form_signature,
            preset,
            cache_hits,
            chunks_failed,
            chunks.len()
        );

        Resolution {
            fields,
            unresolved,
            form_signature,
        }
    }

    /// Looks up every cacheable field and keeps only entries that still resolve.
    async fn cached_fields(
        &self,
        session: &dyn BrowserSession,
        ats_type: &str,
        form_signature: &str,
        profile: &UserProfile,
    ) -> FieldMap {
        let mut fields = FieldMap::new();
        let candidates = profile
            .field_names()
            .into_iter()
            .chain(DOCUMENT_FIELDS.iter().map(|s| s.to_string()));

        for name in candidates {
            let key = CacheKey::new(ats_type, form_signature, &name);
            let cached = match self.cache.get(&key).await {
                Ok(Some(cached)) => cached,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Locator cache read failed for {}: {e}", key.render());
                    continue;
                }
            };

            match session.find(&cached.locator).await {
                Ok(Some(_)) => {
                    debug!("Cache hit for {} -> {}", name, cached.locator);
                    fields.insert(FieldEntry::new(
                        name,
                        cached.locator,
                        cached.kind,
                        FieldSource::Cache,
                    ));
                }
                Ok(None) | Err(_) => {
                    warn!(
                        "Cached locator {} for {} no longer resolves; invalidating",
                        cached.locator, name
                    );
                    self.invalidate(&key).await;
                }
            }
        }
        fields
    }

    /// Drops a cache entry. Failures are logged, never propagated.
    pub async fn invalidate(&self, key: &CacheKey) {
        if let Err(e) = self.cache.invalidate(key).await {
            warn!("Failed to invalidate {}: {e}", key.render());
        }
    }
}

/// Whether `fields` leave no fillable control unmapped. A field whose
/// locator names no control directly (an oracle selector, say) is assumed
/// to cover one of the controls not otherwise matched.
fn covers_all(fields: &FieldMap, fillable: &[&FormControl]) -> bool {
    let unmatched_controls = fillable
        .iter()
        .filter(|control| !fields.iter().any(|f| control.is_addressed_by(&f.locator)))
        .count();
    let unmatched_fields = fields
        .iter()
        .filter(|f| f.kind != FieldKind::Submit)
        .filter(|f| !fillable.iter().any(|control| control.is_addressed_by(&f.locator)))
        .count();
    unmatched_controls <= unmatched_fields
}

async fn resolve_chunk(
    oracle: &dyn FieldOracle,
    request: &ChunkRequest<'_>,
) -> Result<FieldFragment, OracleError> {
    let mut last_error = OracleError::Empty;
    for attempt in 1..=ORACLE_ATTEMPTS_PER_CHUNK {
        match oracle.resolve_fields(request).await {
            Ok(fragment) => return Ok(fragment),
            Err(e) => {
                warn!(
                    "Oracle attempt {attempt}/{ORACLE_ATTEMPTS_PER_CHUNK} failed for chunk {}/{}: {e}",
                    request.chunk.index + 1,
                    request.chunk.total
                );
                last_error = e;
            }
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::browser::Locator;
    use crate::cache::{CachedLocator, MemoryLocatorCache};
    use crate::oracle::QuestionRequest;
    use crate::test_support::{oracle_field, profile, FakePage, ScriptedOracle};

    const PAGE: &str = r#"<form>
<label for="first_name">First name</label><input id="first_name">
<label for="email">Email</label><input id="email" type="email">
</form>"#;

    fn resolver(oracle: Arc<ScriptedOracle>, cache: Arc<MemoryLocatorCache>) -> FieldResolver {
        FieldResolver::new(Some(oracle as Arc<dyn FieldOracle>), cache, ResolverConfig::default())
    }

    #[tokio::test]
    async fn test_oracle_fields_are_merged() {
        let oracle = Arc::new(ScriptedOracle::new());
        oracle.push_fragment(Ok(FieldFragment {
            fields: vec![
                oracle_field("first_name", "#first_name", FieldKind::Text, 0.9),
                oracle_field("email", "#email", FieldKind::Email, 0.9),
            ],
            unresolved: vec!["mystery widget".into()],
        }));
        let page = FakePage::new(PAGE);
        let session = page.session();

        let resolution = resolver(oracle.clone(), Arc::new(MemoryLocatorCache::new()))
            .resolve(&session, "lever", PAGE, &profile(), FieldMap::new())
            .await;

        assert_eq!(resolution.fields.names(), vec!["first_name", "email"]);
        assert_eq!(resolution.unresolved, vec!["mystery widget"]);
        assert_eq!(oracle.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn test_full_cache_coverage_skips_oracle() {
        let oracle = Arc::new(ScriptedOracle::new());
        let cache = Arc::new(MemoryLocatorCache::new());
        let signature = form_signature(&extract_controls(PAGE));
        for (field, css, kind) in [("first_name", "#first_name", FieldKind::Text), ("email", "#email", FieldKind::Email)] {
            cache
                .put(
                    &CacheKey::new("lever", &signature, field),
                    CachedLocator::new(Locator::css(css), kind),
                )
                .await
                .unwrap();
        }
        let page = FakePage::new(PAGE);
        page.add_element(Locator::css("#first_name"));
        page.add_element(Locator::css("#email"));
        let session = page.session();

        let resolution = resolver(oracle.clone(), cache)
            .resolve(&session, "lever", PAGE, &profile(), FieldMap::new())
            .await;

        assert_eq!(resolution.fields.len(), 2);
        assert_eq!(oracle.resolve_calls(), 0);
        assert!(resolution
            .fields
            .iter()
            .all(|f| f.source == FieldSource::Cache));
    }

    #[tokio::test]
    async fn test_stale_cache_entry_is_invalidated_and_oracle_consulted() {
        let oracle = Arc::new(ScriptedOracle::new());
        oracle.push_fragment(Ok(FieldFragment {
            fields: vec![oracle_field("email", "#email", FieldKind::Email, 0.9)],
            unresolved: vec![],
        }));
        let cache = Arc::new(MemoryLocatorCache::new());
        let signature = form_signature(&extract_controls(PAGE));
        let key = CacheKey::new("lever", &signature, "email");
        cache
            .put(&key, CachedLocator::new(Locator::css("#old-email"), FieldKind::Email))
            .await
            .unwrap();
        let page = FakePage::new(PAGE);
        let session = page.session();

        let resolution = resolver(oracle.clone(), cache.clone())
            .resolve(&session, "lever", PAGE, &profile(), FieldMap::new())
            .await;

        assert!(cache.get(&key).await.unwrap().is_none());
        assert_eq!(oracle.resolve_calls(), 1);
        let email = resolution.fields.get("email").unwrap();
        assert_eq!(email.source, FieldSource::Oracle);
        assert_eq!(email.locator, Locator::css("#email"));
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_retried_once_then_recorded() {
        let oracle = Arc::new(ScriptedOracle::new());
        oracle.push_fragment(Err(OracleError::Schema("bad".into())));
        oracle.push_fragment(Err(OracleError::Schema("still bad".into())));
        let page = FakePage::new(PAGE);
        let session = page.session();

        let resolution = resolver(oracle.clone(), Arc::new(MemoryLocatorCache::new()))
            .resolve(&session, "lever", PAGE, &profile(), FieldMap::new())
            .await;

        assert_eq!(oracle.resolve_calls(), 2);
        assert_eq!(resolution.unresolved.len(), 1);
        assert!(resolution.fields.is_empty());
        assert!(resolution.unresolved[0].starts_with("chunk 1/1"));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_one_bad_response() {
        let oracle = Arc::new(ScriptedOracle::new());
        oracle.push_fragment(Err(OracleError::Empty));
        oracle.push_fragment(Ok(FieldFragment {
            fields: vec![oracle_field("email", "#email", FieldKind::Email, 0.7)],
            unresolved: vec![],
        }));
        let page = FakePage::new(PAGE);
        let session = page.session();

        let resolution = resolver(oracle, Arc::new(MemoryLocatorCache::new()))
            .resolve(&session, "lever", PAGE, &profile(), FieldMap::new())
            .await;

        assert!(resolution.unresolved.is_empty());
        assert!(resolution.fields.contains("email"));
    }

    /// Maps every fillable control it is shown, by id.
    #[derive(Default)]
    struct PageReadingOracle {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl FieldOracle for PageReadingOracle {
        async fn resolve_fields(&self, request: &ChunkRequest<'_>) -> Result<FieldFragment, OracleError> {
            *self.calls.lock().unwrap() += 1;
            let fields = extract_controls(&request.chunk.text)
                .iter()
                .filter(|c| c.is_fillable())
                .filter_map(|c| c.id.as_deref().map(|id| (id, c.kind())))
                .map(|(id, kind)| oracle_field(id, &format!("#{id}"), kind, 0.9))
                .collect();
            Ok(FieldFragment {
                fields,
                unresolved: vec![],
            })
        }

        async fn answer_question(&self, _request: &QuestionRequest<'_>) -> Result<String, OracleError> {
            Err(OracleError::Empty)
        }
    }

    const LONG_PAGE: &str = r#"<form>
<label for="first_name">First name</label><input id="first_name">
<label for="last_name">Last name</label><input id="last_name">
<label for="email">Email</label><input id="email" type="email">
<label for="phone">Phone</label><input id="phone" type="tel">
<label for="country">Country</label><select id="country"><option>Canada</option><option>Peru</option></select>
<label for="resume">Resume</label><input id="resume" type="file">
<label for="why">Why us?</label><textarea id="why"></textarea>
</form>"#;

    async fn resolve_with(config: ResolverConfig) -> (Resolution, usize) {
        let oracle = Arc::new(PageReadingOracle::default());
        let resolver = FieldResolver::new(
            Some(oracle.clone() as Arc<dyn FieldOracle>),
            Arc::new(MemoryLocatorCache::new()),
            config,
        );
        let page = FakePage::new(LONG_PAGE);
        let session = page.session();
        let resolution = resolver
            .resolve(&session, "lever", LONG_PAGE, &profile(), FieldMap::new())
            .await;
        let calls = *oracle.calls.lock().unwrap();
        (resolution, calls)
    }

    #[tokio::test]
    async fn test_chunked_resolution_matches_single_pass() {
        let (single, single_calls) = resolve_with(ResolverConfig::default()).await;
        let (chunked, chunked_calls) = resolve_with(ResolverConfig {
            max_chunk_chars: 120,
            overlap_segments: 1,
        })
        .await;

        assert_eq!(single_calls, 1);
        assert!(chunked_calls > 1);
        assert_eq!(single.fields.len(), 7);

        let mut expected = single.fields.names();
        let mut actual = chunked.fields.names();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
        for entry in chunked.fields.iter() {
            assert_eq!(entry.locator, Locator::css(format!("#{}", entry.name)));
        }
        assert!(chunked.unresolved.is_empty());
    }

    #[tokio::test]
    async fn test_known_fields_win_and_are_not_reasked() {
        let oracle = Arc::new(ScriptedOracle::new());
        oracle.push_fragment(Ok(FieldFragment {
            fields: vec![
                oracle_field("email", "input[type=email]", FieldKind::Email, 0.9),
                oracle_field("first_name", "#first_name", FieldKind::Text, 0.9),
            ],
            unresolved: vec![],
        }));
        let mut known = FieldMap::new();
        known.insert(FieldEntry::new(
            "email",
            Locator::Id("email".into()),
            FieldKind::Email,
            FieldSource::Static,
        ));
        let page = FakePage::new(PAGE);
        let session = page.session();

        let resolution = resolver(oracle.clone(), Arc::new(MemoryLocatorCache::new()))
            .resolve(&session, "lever", PAGE, &profile(), known)
            .await;

        assert_eq!(oracle.resolve_calls(), 1);
        let email = resolution.fields.get("email").unwrap();
        assert_eq!(email.source, FieldSource::Static);
        assert_eq!(email.locator, Locator::Id("email".into()));
        assert_eq!(resolution.fields.get("first_name").unwrap().source, FieldSource::Oracle);
    }

    #[tokio::test]
    async fn test_known_fields_covering_the_page_skip_oracle() {
        let oracle = Arc::new(ScriptedOracle::new());
        let mut known = FieldMap::new();
        for (name, kind) in [("first_name", FieldKind::Text), ("email", FieldKind::Email)] {
            known.insert(FieldEntry::new(name, Locator::Id(name.into()), kind, FieldSource::Static));
        }
        let page = FakePage::new(PAGE);
        let session = page.session();

        let resolution = resolver(oracle.clone(), Arc::new(MemoryLocatorCache::new()))
            .resolve(&session, "lever", PAGE, &profile(), known)
            .await;

        assert_eq!(oracle.resolve_calls(), 0);
        assert_eq!(resolution.fields.len(), 2);
        assert!(resolution.unresolved.is_empty());
    }
}
