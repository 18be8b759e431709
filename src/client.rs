use std::sync::Arc;
use log::info;
use tokio_util::sync::CancellationToken;
use crate::config::Config;
use crate::enrichment::{self, ImageGenerator};
use crate::entities::{InsertResult, Item, ItemResponse, User};
use crate::error::BazaarError;
use crate::materializer::{Materialized, Materializer};
use crate::storage::{FileStorage, Storage};

pub struct BazaarClient {
    storage: Arc<dyn Storage>,
    materializer: Materializer,
}

impl BazaarClient {
    pub fn new(storage: Arc<dyn Storage>, materializer: Materializer) -> Self {
        Self { storage, materializer }
    }

    /// Open the file database under the configured workdir and wire up the
    /// configured image generator.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        crate::config::get_or_create_workdir(&config.storage.workdir)?;
        info!("db_path: {}", config.storage.db_path.display());
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(&config.storage.db_path).await?);
        let images: Arc<dyn ImageGenerator> = Arc::from(enrichment::create_generator(&config.enrichment)?);
        let materializer = Materializer::configured(storage.clone(), images, &config.enrichment, &config.identifiers);
        Ok(Self::new(storage, materializer))
    }

    pub async fn create_user(&self, user: User) -> Result<InsertResult<User>, BazaarError> {
        self.storage.insert_user(&user).await
    }

    pub async fn follow(&self, username: &str, target: &str) -> Result<bool, BazaarError> {
        self.storage.follow(username, target).await
    }

    /// Materialize and commit a new item. The seller must exist.
    pub async fn create_item(&self, item: Item, cancel: &CancellationToken) -> Result<Materialized, BazaarError> {
        self.require_user(&item.seller).await?;
        self.materializer.commit(item, cancel).await
    }

    pub async fn get_item(&self, slug: &str) -> Result<Item, BazaarError> {
        self.storage.find_item(slug).await?
            .ok_or_else(|| BazaarError::item_not_found(slug))
    }

    pub async fn list_items(&self) -> Result<Vec<Item>, BazaarError> {
        self.storage.all_items().await
    }

    /// The public representation of an item as seen by `viewer`.
    pub async fn render_item(&self, item: &Item, viewer: Option<&str>) -> Result<ItemResponse, BazaarError> {
        let seller = self.require_user(&item.seller).await?;
        let viewer = match viewer {
            Some(username) => Some(self.require_user(username).await?),
            None => None,
        };
        Ok(item.to_response(&seller, viewer.as_ref()))
    }

    pub async fn favorite(&self, username: &str, slug: &str) -> Result<Item, BazaarError> {
        if self.storage.add_favorite(username, slug).await? {
            info!("{} favorited {}", username, slug);
        }
        self.refresh_favorite_count(slug).await
    }

    pub async fn unfavorite(&self, username: &str, slug: &str) -> Result<Item, BazaarError> {
        if self.storage.remove_favorite(username, slug).await? {
            info!("{} unfavorited {}", username, slug);
        }
        self.refresh_favorite_count(slug).await
    }

    pub async fn refresh_favorite_count(&self, slug: &str) -> Result<Item, BazaarError> {
        let mut item = self.get_item(slug).await?;
        self.materializer.refresh_favorite_count(&mut item).await?;
        Ok(item)
    }

    async fn require_user(&self, username: &str) -> Result<User, BazaarError> {
        self.storage.find_user(username).await?
            .ok_or_else(|| BazaarError::user_not_found(username))
    }
}
