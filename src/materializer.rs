//! The item materializer.
//!
//! An item passes through a fixed, linear pipeline before it may be committed:
//!
//! 1. `Pending` → required fields are checked; a blank title, description or
//!    seller, or a preset slug that is not URL-safe once lowercased, aborts
//!    here with [`BazaarError::Validation`].
//! 2. `Validated` → a slug is derived from the title unless one is already set.
//! 3. `Identified` → a missing image is requested from the [`ImageGenerator`].
//!    Any enrichment failure is logged and swallowed.
//! 4. `Ready` → the item may be inserted.
//!
//! [`Materializer::commit`] runs the pipeline and claims the slug through
//! [`Storage::insert_unique`], drawing a fresh suffix when the slug is taken.
//! The favorites counter is never touched by the pipeline; it is recomputed
//! only through [`Materializer::refresh_favorite_count`] and may be stale in
//! between.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use crate::config::{EnrichmentConfiguration, IdentifierConfiguration, DEFAULT_ENRICHMENT_TIMEOUT, DEFAULT_SLUG_ATTEMPTS};
use crate::enrichment::{ImageGenerator, ImageRequest};
use crate::entities::{InsertResult, Item, ItemId};
use crate::error::{BazaarError, EnrichmentError};
use crate::slug::{compose_slug, RandomSuffix, SuffixGenerator};
use crate::storage::Storage;
use crate::utils::str_utils::{is_url_safe, StringExtensions};

const BLANK: &str = "can't be blank";
const INVALID: &str = "is invalid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Validated,
    Identified,
    Ready,
}

#[derive(Debug)]
pub enum EnrichmentOutcome {
    /// The item already had an image; nothing was called.
    Skipped,
    Generated(String),
    Failed(EnrichmentError),
}

impl EnrichmentOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, EnrichmentOutcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct Materialized {
    pub item: Item,
    pub stage: Stage,
    pub enrichment: EnrichmentOutcome,
}

pub struct Materializer {
    storage: Arc<dyn Storage>,
    images: Arc<dyn ImageGenerator>,
    suffixes: Arc<dyn SuffixGenerator>,
    enrichment_timeout: Duration,
    max_slug_attempts: usize,
}

impl Materializer {
    pub fn new(storage: Arc<dyn Storage>, images: Arc<dyn ImageGenerator>) -> Self {
        Self {
            storage,
            images,
            suffixes: Arc::new(RandomSuffix::default()),
            enrichment_timeout: DEFAULT_ENRICHMENT_TIMEOUT,
            max_slug_attempts: DEFAULT_SLUG_ATTEMPTS,
        }
    }

    pub fn configured(
        storage: Arc<dyn Storage>,
        images: Arc<dyn ImageGenerator>,
        enrichment: &EnrichmentConfiguration,
        identifiers: &IdentifierConfiguration,
    ) -> Self {
        Self::new(storage, images)
            .with_enrichment_timeout(enrichment.timeout)
            .with_max_slug_attempts(identifiers.max_attempts)
    }

    pub fn with_suffix_generator(mut self, suffixes: Arc<dyn SuffixGenerator>) -> Self {
        self.suffixes = suffixes;
        self
    }

    pub fn with_enrichment_timeout(mut self, timeout: Duration) -> Self {
        self.enrichment_timeout = timeout;
        self
    }

    pub fn with_max_slug_attempts(mut self, attempts: usize) -> Self {
        self.max_slug_attempts = attempts.max(1);
        self
    }

    pub fn validate(&self, item: &Item) -> Result<(), BazaarError> {
        let mut errors = Vec::new();
        if item.title.is_blank() {
            errors.push(("title", BLANK));
        }
        if item.description.is_blank() {
            errors.push(("description", BLANK));
        }
        if item.seller.is_blank() {
            errors.push(("seller", BLANK));
        }
        if item.slug.as_deref().is_some_and(|x| !is_url_safe(&normalize_slug(x))) {
            errors.push(("slug", INVALID));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(BazaarError::validation(errors))
        }
    }

    /// Derive a slug from the title. An item that already has one keeps it,
    /// lowercased, as long as it is URL-safe.
    pub fn assign_identifier(&self, item: &mut Item) -> Result<ItemId, BazaarError> {
        if let Some(slug) = item.slug.as_deref() {
            let slug = normalize_slug(slug);
            if !is_url_safe(&slug) {
                return Err(BazaarError::validation([("slug", INVALID)]));
            }
            item.slug = Some(slug.clone());
            return Ok(slug);
        }
        if item.title.is_blank() {
            return Err(BazaarError::validation([("title", BLANK)]));
        }
        let slug = compose_slug(&item.title, &self.suffixes.next_suffix());
        debug!("assigned slug {}", slug);
        item.slug = Some(slug.clone());
        Ok(slug)
    }

    /// Fill in a missing image. Never fails: the outcome says what happened.
    pub async fn materialize_derived_fields(&self, item: &mut Item) -> EnrichmentOutcome {
        if item.has_image() {
            return EnrichmentOutcome::Skipped;
        }
        let request = ImageRequest::for_prompt(&item.title);
        let result = match tokio::time::timeout(self.enrichment_timeout, self.images.generate(&request)).await {
            Ok(result) => result,
            Err(_) => Err(EnrichmentError::Timeout(self.enrichment_timeout)),
        };
        match result {
            Ok(url) => {
                debug!("generated image for '{}': {}", item.title, url);
                item.image = Some(url.clone());
                EnrichmentOutcome::Generated(url)
            }
            Err(e) => {
                warn!("Error generating image for '{}': {}", item.title, e);
                EnrichmentOutcome::Failed(e)
            }
        }
    }

    /// Recount the users favoriting this item and persist the count.
    pub async fn refresh_favorite_count(&self, item: &mut Item) -> Result<u64, BazaarError> {
        let slug = item.slug.clone()
            .ok_or_else(|| BazaarError::validation([("slug", BLANK)]))?;
        let count = self.storage.find_favorites_count(&slug).await?;
        item.favorites_count = count;
        item.updated_at = Utc::now();
        self.storage.save(item).await?;
        debug!("favorites count of {} is {}", slug, count);
        Ok(count)
    }

    /// Run the pipeline up to `Ready` without touching storage.
    pub async fn materialize(&self, mut item: Item) -> Result<Materialized, BazaarError> {
        let mut stage = Stage::Pending;
        debug!("materializing '{}' ({:?})", item.title, stage);

        self.validate(&item)?;
        stage = Stage::Validated;
        debug!("'{}' {:?}", item.title, stage);

        self.assign_identifier(&mut item)?;
        stage = Stage::Identified;
        debug!("'{}' {:?}", item.title, stage);

        let enrichment = self.materialize_derived_fields(&mut item).await;
        stage = Stage::Ready;
        debug!("'{}' {:?}", item.title, stage);

        Ok(Materialized { item, stage, enrichment })
    }

    /// Materialize and insert, redrawing the slug suffix on collisions.
    ///
    /// A slug supplied by the caller is never redrawn; a collision on it is
    /// reported straight away. Cancellation is observed while materializing
    /// and before every insert attempt. The insert itself is not raced against
    /// the token: it is the only claim on the slug namespace and must either
    /// happen completely or not at all.
    pub async fn commit(&self, item: Item, cancel: &CancellationToken) -> Result<Materialized, BazaarError> {
        let caller_slug = item.slug.is_some();
        let mut materialized = cancellable(cancel, self.materialize(item)).await?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            if cancel.is_cancelled() {
                return Err(BazaarError::Cancelled);
            }
            let now = Utc::now();
            materialized.item.created_at = now;
            materialized.item.updated_at = now;
            match self.storage.insert_unique(&materialized.item).await? {
                InsertResult::New(item) => {
                    info!("committed item {}", item.slug.as_deref().unwrap_or_default());
                    materialized.item = item;
                    return Ok(materialized);
                }
                InsertResult::Existing(existing) => {
                    let slug = existing.slug.unwrap_or_default();
                    if caller_slug || attempts >= self.max_slug_attempts {
                        return Err(BazaarError::UniquenessConflict { slug, attempts });
                    }
                    warn!("slug {} is already taken, drawing a new one ({}/{})", slug, attempts, self.max_slug_attempts);
                    materialized.item.slug = None;
                    self.assign_identifier(&mut materialized.item)?;
                }
            }
        }
    }
}

fn normalize_slug(slug: &str) -> String {
    slug.trim().to_lowercase()
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T, BazaarError>>,
) -> Result<T, BazaarError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BazaarError::Cancelled),
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::ScriptedImageGenerator;
    use crate::entities::User;
    use crate::slug::SequenceSuffix;
    use crate::storage::InMemoryStorage;

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        images: Arc<ScriptedImageGenerator>,
        materializer: Materializer,
    }

    fn fixture(images: ScriptedImageGenerator, suffixes: Option<SequenceSuffix>) -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let images = Arc::new(images);
        let mut materializer = Materializer::new(storage.clone(), images.clone())
            .with_enrichment_timeout(Duration::from_millis(200));
        if let Some(suffixes) = suffixes {
            materializer = materializer.with_suffix_generator(Arc::new(suffixes));
        }
        Fixture { storage, images, materializer }
    }

    fn lamp() -> Item {
        Item::new("Vintage Lamp", "Brass base", "alice")
    }

    #[test]
    fn assigns_url_safe_slug_prefixed_by_title() {
        let f = fixture(ScriptedImageGenerator::default(), None);
        for title in ["Vintage Lamp", "Crème Brûlée Set", "50% off!!", "Ölkanne & Tasse"] {
            let mut item = Item::new(title, "d", "alice");
            let slug = f.materializer.assign_identifier(&mut item).unwrap();
            assert!(is_url_safe(&slug), "{slug} is not url safe");
            let base = title.slugify();
            assert!(slug.starts_with(&format!("{base}-")), "{slug} does not start with {base}");
            assert_eq!(item.slug.as_deref(), Some(slug.as_str()));
        }
    }

    #[test]
    fn assign_identifier_is_idempotent() {
        let f = fixture(ScriptedImageGenerator::default(), None);
        let mut item = lamp();
        let first = f.materializer.assign_identifier(&mut item).unwrap();
        let second = f.materializer.assign_identifier(&mut item).unwrap();
        assert_eq!(first, second);
        assert_eq!(item.slug, Some(first));
    }

    #[test]
    fn same_title_gets_different_slugs() {
        let f = fixture(ScriptedImageGenerator::default(), None);
        let mut a = lamp();
        let mut b = lamp();
        let first = f.materializer.assign_identifier(&mut a).unwrap();
        let second = f.materializer.assign_identifier(&mut b).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn blank_title_cannot_be_identified() {
        let f = fixture(ScriptedImageGenerator::default(), None);
        let mut item = Item::new("   ", "d", "alice");
        assert!(matches!(f.materializer.assign_identifier(&mut item), Err(BazaarError::Validation { .. })));
        assert!(item.slug.is_none());
    }

    #[tokio::test]
    async fn present_image_is_left_alone() {
        let f = fixture(ScriptedImageGenerator::returning("img://new"), None);
        let mut item = lamp().with_image("img://mine");
        let outcome = f.materializer.materialize_derived_fields(&mut item).await;
        assert!(matches!(outcome, EnrichmentOutcome::Skipped));
        assert_eq!(item.image.as_deref(), Some("img://mine"));
        assert_eq!(f.images.calls(), 0);
    }

    #[tokio::test]
    async fn enrichment_sends_title_as_prompt() {
        let f = fixture(ScriptedImageGenerator::returning("img://abc"), None);
        let mut item = lamp();
        let outcome = f.materializer.materialize_derived_fields(&mut item).await;
        assert!(matches!(outcome, EnrichmentOutcome::Generated(ref url) if url == "img://abc"));
        assert_eq!(f.images.requests(), vec![ImageRequest::for_prompt("Vintage Lamp")]);
    }

    #[tokio::test]
    async fn enrichment_failure_still_reaches_ready() {
        let error = EnrichmentError::Status { code: 500, body: "boom".into() };
        let f = fixture(ScriptedImageGenerator::failing(error), None);
        let materialized = f.materializer.materialize(lamp()).await.unwrap();
        assert_eq!(materialized.stage, Stage::Ready);
        assert!(materialized.enrichment.is_failed());
        assert!(materialized.item.image.is_none());
        assert!(materialized.item.slug.is_some());
    }

    #[tokio::test]
    async fn slow_enrichment_times_out() {
        let images = ScriptedImageGenerator::returning("img://late").with_delay(Duration::from_secs(10));
        let f = fixture(images, None);
        let materialized = f.materializer.materialize(lamp()).await.unwrap();
        assert!(matches!(materialized.enrichment, EnrichmentOutcome::Failed(EnrichmentError::Timeout(_))));
        assert!(materialized.item.image.is_none());
    }

    #[tokio::test]
    async fn missing_fields_abort_before_identifier() {
        let f = fixture(ScriptedImageGenerator::returning("img://abc"), None);
        let err = f.materializer.materialize(Item::new("Lamp", " ", "")).await.unwrap_err();
        match err {
            BazaarError::Validation { errors } => {
                assert!(errors.contains_key("description"));
                assert!(errors.contains_key("seller"));
                assert!(!errors.contains_key("title"));
            }
            e => panic!("unexpected error {e}"),
        }
        assert_eq!(f.images.calls(), 0);
    }

    #[tokio::test]
    async fn commit_retries_on_collision() {
        let suffixes = SequenceSuffix::new(["aaaaaa", "aaaaaa", "bbbbbb"]);
        let images = ScriptedImageGenerator::new([Ok("img://1".to_string()), Ok("img://2".to_string())]);
        let f = fixture(images, Some(suffixes));
        let cancel = CancellationToken::new();

        let first = f.materializer.commit(lamp(), &cancel).await.unwrap();
        assert_eq!(first.item.slug.as_deref(), Some("vintage-lamp-aaaaaa"));

        let second = f.materializer.commit(lamp(), &cancel).await.unwrap();
        assert_eq!(second.item.slug.as_deref(), Some("vintage-lamp-bbbbbb"));
        assert_eq!(f.storage.item_count(), 2);
    }

    #[tokio::test]
    async fn commit_gives_up_after_max_attempts() {
        let suffixes = SequenceSuffix::new(["aaaaaa", "aaaaaa", "aaaaaa", "aaaaaa"]);
        let f = fixture(ScriptedImageGenerator::default(), Some(suffixes));
        let materializer = f.materializer.with_max_slug_attempts(3);
        let cancel = CancellationToken::new();

        materializer.commit(lamp().with_image("img://x"), &cancel).await.unwrap();
        let err = materializer.commit(lamp().with_image("img://y"), &cancel).await.unwrap_err();
        assert!(matches!(err, BazaarError::UniquenessConflict { attempts: 3, .. }));
        assert_eq!(f.storage.item_count(), 1);
    }

    #[tokio::test]
    async fn caller_slug_conflict_is_not_redrawn() {
        let f = fixture(ScriptedImageGenerator::default(), None);
        let cancel = CancellationToken::new();
        f.materializer.commit(lamp().with_slug("lamp").with_image("img://x"), &cancel).await.unwrap();
        let err = f.materializer
            .commit(lamp().with_slug("lamp").with_image("img://y"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BazaarError::UniquenessConflict { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn malformed_caller_slug_is_rejected() {
        let f = fixture(ScriptedImageGenerator::default(), None);
        let cancel = CancellationToken::new();
        for slug in ["My Lamp!", "  ", "", "Lamp/../x"] {
            let item = lamp().with_slug(slug).with_image("img://x");
            let err = f.materializer.commit(item, &cancel).await.unwrap_err();
            match err {
                BazaarError::Validation { errors } => {
                    assert_eq!(errors.get("slug").map(|x| x.len()), Some(1), "{slug:?}");
                }
                other => panic!("unexpected error for {slug:?}: {other}"),
            }
        }
        assert_eq!(f.storage.item_count(), 0);
    }

    #[tokio::test]
    async fn caller_slug_is_lowercased() {
        let f = fixture(ScriptedImageGenerator::default(), None);
        let item = lamp().with_slug(" Vintage-Lamp-2 ").with_image("img://x");
        let committed = f.materializer.commit(item, &CancellationToken::new()).await.unwrap();
        assert_eq!(committed.item.slug.as_deref(), Some("vintage-lamp-2"));
        assert!(f.storage.find_item("vintage-lamp-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancelled_commit_claims_nothing() {
        let images = ScriptedImageGenerator::returning("img://late").with_delay(Duration::from_millis(150));
        let f = fixture(images, None);
        let materializer = f.materializer.with_enrichment_timeout(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = materializer.commit(lamp(), &cancel).await.unwrap_err();
        assert!(matches!(err, BazaarError::Cancelled));
        assert_eq!(f.storage.item_count(), 0);
    }

    #[tokio::test]
    async fn refresh_counts_favorites() {
        let f = fixture(ScriptedImageGenerator::default(), None);
        let cancel = CancellationToken::new();
        let mut item = f.materializer.commit(lamp().with_image("img://x"), &cancel).await.unwrap().item;
        let slug = item.slug.clone().unwrap();
        for name in ["alice", "bob", "carol"] {
            f.storage.insert_user(&User::new(name)).await.unwrap();
            f.storage.add_favorite(name, &slug).await.unwrap();
        }
        assert_eq!(item.favorites_count, 0);

        assert_eq!(f.materializer.refresh_favorite_count(&mut item).await.unwrap(), 3);
        assert_eq!(f.storage.find_item(&slug).await.unwrap().unwrap().favorites_count, 3);

        f.storage.remove_favorite("bob", &slug).await.unwrap();
        assert_eq!(f.materializer.refresh_favorite_count(&mut item).await.unwrap(), 2);
        assert_eq!(item.favorites_count, 2);
    }
}
