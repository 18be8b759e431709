use std::path::{Path, PathBuf};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use crate::entities::{InsertResult, Item, ItemId, User, UserId};
use crate::error::BazaarError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DbOperation {
    CreateItem { item: Item },
    UpdateItem { item: Item },
    CreateUser { user: User },
    AddFavorite { username: UserId, slug: ItemId },
    RemoveFavorite { username: UserId, slug: ItemId },
    Follow { username: UserId, target: UserId },
}

/// Persistence collaborator of the materializer and the client.
///
/// `insert_unique` is the single claim on the slug namespace: it either stores
/// the item or hands back the one already holding that slug.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_unique(&self, item: &Item) -> Result<InsertResult<Item>, BazaarError>;
    async fn save(&self, item: &Item) -> Result<(), BazaarError>;
    async fn find_item(&self, slug: &str) -> Result<Option<Item>, BazaarError>;
    async fn all_items(&self) -> Result<Vec<Item>, BazaarError>;
    async fn find_favorites_count(&self, slug: &str) -> Result<u64, BazaarError>;

    async fn insert_user(&self, user: &User) -> Result<InsertResult<User>, BazaarError>;
    async fn find_user(&self, username: &str) -> Result<Option<User>, BazaarError>;
    async fn add_favorite(&self, username: &str, slug: &str) -> Result<bool, BazaarError>;
    async fn remove_favorite(&self, username: &str, slug: &str) -> Result<bool, BazaarError>;
    async fn follow(&self, username: &str, target: &str) -> Result<bool, BazaarError>;
}

fn require_slug(item: &Item) -> Result<&ItemId, BazaarError> {
    item.slug.as_ref()
        .filter(|x| !x.is_empty())
        .ok_or_else(|| BazaarError::validation([("slug", "can't be blank")]))
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    items: DashMap<ItemId, Item>,
    users: DashMap<UserId, User>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    fn insert_item_no_wal(&self, item: &Item) -> Result<InsertResult<Item>, BazaarError> {
        let slug = require_slug(item)?;
        match self.items.entry(slug.clone()) {
            Entry::Occupied(existing) => Ok(InsertResult::Existing(existing.get().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(item.clone());
                Ok(InsertResult::New(item.clone()))
            }
        }
    }

    fn update_item_no_wal(&self, item: &Item) -> Result<(), BazaarError> {
        let slug = require_slug(item)?;
        match self.items.get_mut(slug) {
            Some(mut kvp) => {
                *kvp.value_mut() = item.clone();
                Ok(())
            }
            None => Err(BazaarError::item_not_found(slug)),
        }
    }

    fn insert_user_no_wal(&self, user: &User) -> InsertResult<User> {
        match self.users.entry(user.username.clone()) {
            Entry::Occupied(existing) => InsertResult::Existing(existing.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(user.clone());
                InsertResult::New(user.clone())
            }
        }
    }

    fn add_favorite_no_wal(&self, username: &str, slug: &str) -> Result<bool, BazaarError> {
        if !self.items.contains_key(slug) {
            return Err(BazaarError::item_not_found(slug));
        }
        let mut user = self.users.get_mut(username).ok_or_else(|| BazaarError::user_not_found(username))?;
        if user.is_favorite(slug) {
            return Ok(false);
        }
        user.favorites.push(slug.to_string());
        Ok(true)
    }

    fn remove_favorite_no_wal(&self, username: &str, slug: &str) -> Result<bool, BazaarError> {
        let mut user = self.users.get_mut(username).ok_or_else(|| BazaarError::user_not_found(username))?;
        if !user.is_favorite(slug) {
            return Ok(false);
        }
        user.favorites.retain(|x| x != slug);
        Ok(true)
    }

    fn follow_no_wal(&self, username: &str, target: &str) -> Result<bool, BazaarError> {
        if !self.users.contains_key(target) {
            return Err(BazaarError::user_not_found(target));
        }
        let mut user = self.users.get_mut(username).ok_or_else(|| BazaarError::user_not_found(username))?;
        if user.is_following(target) {
            return Ok(false);
        }
        user.following.push(target.to_string());
        Ok(true)
    }

    fn apply_no_wal(&self, operation: &DbOperation) -> Result<(), BazaarError> {
        match operation {
            DbOperation::CreateItem { item } => { self.insert_item_no_wal(item)?; }
            DbOperation::UpdateItem { item } => { self.update_item_no_wal(item)?; }
            DbOperation::CreateUser { user } => { self.insert_user_no_wal(user); }
            DbOperation::AddFavorite { username, slug } => { self.add_favorite_no_wal(username, slug)?; }
            DbOperation::RemoveFavorite { username, slug } => { self.remove_favorite_no_wal(username, slug)?; }
            DbOperation::Follow { username, target } => { self.follow_no_wal(username, target)?; }
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn insert_unique(&self, item: &Item) -> Result<InsertResult<Item>, BazaarError> {
        self.insert_item_no_wal(item)
    }

    async fn save(&self, item: &Item) -> Result<(), BazaarError> {
        self.update_item_no_wal(item)
    }

    async fn find_item(&self, slug: &str) -> Result<Option<Item>, BazaarError> {
        Ok(self.items.get(slug).map(|x| x.value().clone()))
    }

    async fn all_items(&self) -> Result<Vec<Item>, BazaarError> {
        let mut items = self.items.iter().map(|x| x.value().clone()).collect::<Vec<Item>>();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn find_favorites_count(&self, slug: &str) -> Result<u64, BazaarError> {
        let count = self.users.iter().filter(|x| x.value().is_favorite(slug)).count();
        Ok(count as u64)
    }

    async fn insert_user(&self, user: &User) -> Result<InsertResult<User>, BazaarError> {
        Ok(self.insert_user_no_wal(user))
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>, BazaarError> {
        Ok(self.users.get(username).map(|x| x.value().clone()))
    }

    async fn add_favorite(&self, username: &str, slug: &str) -> Result<bool, BazaarError> {
        self.add_favorite_no_wal(username, slug)
    }

    async fn remove_favorite(&self, username: &str, slug: &str) -> Result<bool, BazaarError> {
        self.remove_favorite_no_wal(username, slug)
    }

    async fn follow(&self, username: &str, target: &str) -> Result<bool, BazaarError> {
        self.follow_no_wal(username, target)
    }
}

/// Append-only JSON-lines log replayed into memory on open.
pub struct FileStorage {
    db_path: PathBuf,
    memory: InMemoryStorage,
    wal_lock: Mutex<()>,
}

impl FileStorage {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, BazaarError> {
        let db_path = db_path.as_ref().to_path_buf();
        if !tokio::fs::try_exists(&db_path).await.map_err(BazaarError::DbIOError)? {
            tokio::fs::write(&db_path, "").await.map_err(BazaarError::DbIOError)?;
        }
        let storage = Self { db_path, memory: InMemoryStorage::new(), wal_lock: Mutex::new(()) };

        info!("Starting DB import from WAL...");
        let operations = storage.read_all().await?;
        for operation in &operations {
            storage.memory.apply_no_wal(operation)?;
        }
        info!("DB Imported! {} operations, {} items", operations.len(), storage.memory.item_count());
        Ok(storage)
    }

    async fn read_all(&self) -> Result<Vec<DbOperation>, BazaarError> {
        let file_str = tokio::fs::read_to_string(&self.db_path).await
            .map_err(BazaarError::DbIOError)?;
        let operations = file_str.split('\n')
            .filter(|x| !x.is_empty())
            .map(|x| serde_json::from_str(x).map_err(BazaarError::DbSerializationError))
            .collect::<Result<Vec<DbOperation>, BazaarError>>()?;
        Ok(operations)
    }

    fn existing_user(&self, username: &str) -> Result<User, BazaarError> {
        self.memory.users.get(username)
            .map(|x| x.value().clone())
            .ok_or_else(|| BazaarError::user_not_found(username))
    }

    async fn write_wal(&self, operation: &DbOperation) -> Result<(), BazaarError> {
        debug!("Writing to WAL: {:?}", operation);
        let serialized_operation = serde_json::to_string(operation)
            .map_err(BazaarError::DbSerializationError)?;
        let line = format!("{}\n", serialized_operation);
        let mut file = tokio::fs::OpenOptions::new().append(true).open(&self.db_path).await
            .map_err(BazaarError::DbIOError)?;
        file.write_all(line.as_bytes()).await
            .map_err(BazaarError::DbIOError)?;
        file.flush().await.map_err(BazaarError::DbIOError)?;
        Ok(())
    }
}

// Every mutation checks against memory, appends to the log, and only then
// applies to memory. The log append is the only await point, so a dropped
// future never leaves an in-memory claim the log does not have.
#[async_trait]
impl Storage for FileStorage {
    async fn insert_unique(&self, item: &Item) -> Result<InsertResult<Item>, BazaarError> {
        let _guard = self.wal_lock.lock().await;
        let slug = require_slug(item)?;
        if let Some(existing) = self.memory.items.get(slug) {
            return Ok(InsertResult::Existing(existing.value().clone()));
        }
        self.write_wal(&DbOperation::CreateItem { item: item.clone() }).await?;
        self.memory.insert_item_no_wal(item)
    }

    async fn save(&self, item: &Item) -> Result<(), BazaarError> {
        let _guard = self.wal_lock.lock().await;
        let slug = require_slug(item)?;
        if !self.memory.items.contains_key(slug) {
            return Err(BazaarError::item_not_found(slug));
        }
        self.write_wal(&DbOperation::UpdateItem { item: item.clone() }).await?;
        self.memory.update_item_no_wal(item)?;
        Ok(())
    }

    async fn find_item(&self, slug: &str) -> Result<Option<Item>, BazaarError> {
        self.memory.find_item(slug).await
    }

    async fn all_items(&self) -> Result<Vec<Item>, BazaarError> {
        self.memory.all_items().await
    }

    async fn find_favorites_count(&self, slug: &str) -> Result<u64, BazaarError> {
        self.memory.find_favorites_count(slug).await
    }

    async fn insert_user(&self, user: &User) -> Result<InsertResult<User>, BazaarError> {
        let _guard = self.wal_lock.lock().await;
        if let Some(existing) = self.memory.users.get(&user.username) {
            return Ok(InsertResult::Existing(existing.value().clone()));
        }
        self.write_wal(&DbOperation::CreateUser { user: user.clone() }).await?;
        Ok(self.memory.insert_user_no_wal(user))
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>, BazaarError> {
        self.memory.find_user(username).await
    }

    async fn add_favorite(&self, username: &str, slug: &str) -> Result<bool, BazaarError> {
        let _guard = self.wal_lock.lock().await;
        if !self.memory.items.contains_key(slug) {
            return Err(BazaarError::item_not_found(slug));
        }
        if self.existing_user(username)?.is_favorite(slug) {
            return Ok(false);
        }
        let op = DbOperation::AddFavorite { username: username.to_string(), slug: slug.to_string() };
        self.write_wal(&op).await?;
        self.memory.add_favorite_no_wal(username, slug)
    }

    async fn remove_favorite(&self, username: &str, slug: &str) -> Result<bool, BazaarError> {
        let _guard = self.wal_lock.lock().await;
        if !self.existing_user(username)?.is_favorite(slug) {
            return Ok(false);
        }
        let op = DbOperation::RemoveFavorite { username: username.to_string(), slug: slug.to_string() };
        self.write_wal(&op).await?;
        self.memory.remove_favorite_no_wal(username, slug)
    }

    async fn follow(&self, username: &str, target: &str) -> Result<bool, BazaarError> {
        let _guard = self.wal_lock.lock().await;
        if !self.memory.users.contains_key(target) {
            return Err(BazaarError::user_not_found(target));
        }
        if self.existing_user(username)?.is_following(target) {
            return Ok(false);
        }
        let op = DbOperation::Follow { username: username.to_string(), target: target.to_string() };
        self.write_wal(&op).await?;
        self.memory.follow_no_wal(username, target)
    }
}
