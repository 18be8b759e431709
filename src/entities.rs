use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub type ItemId = String;
pub type UserId = String;

#[derive(Debug)]
pub enum InsertResult<T> {
    Existing(T),
    New(T),
}

impl<T> InsertResult<T> {
    pub fn is_new(&self) -> bool {
        matches!(self, InsertResult::New(_))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub slug: Option<ItemId>,
    pub title: String,
    pub description: String,
    pub image: Option<String>,
    pub favorites_count: u64,
    pub tag_list: Vec<String>,
    pub seller: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// A fresh, unmaterialized item. Timestamps are placeholders until commit.
    pub fn new(title: impl Into<String>, description: impl Into<String>, seller: impl Into<UserId>) -> Self {
        let now = Utc::now();
        Self {
            slug: None,
            title: title.into(),
            description: description.into(),
            image: None,
            favorites_count: 0,
            tag_list: Vec::new(),
            seller: seller.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tag_list = normalize_tags(tags);
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_slug(mut self, slug: impl Into<ItemId>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn has_image(&self) -> bool {
        self.image.as_deref().is_some_and(|x| !x.trim().is_empty())
    }

    pub fn to_response(&self, seller: &User, viewer: Option<&User>) -> ItemResponse {
        let slug = self.slug.clone().unwrap_or_default();
        ItemResponse {
            favorited: viewer.is_some_and(|user| user.is_favorite(&slug)),
            slug,
            title: self.title.clone(),
            description: self.description.clone(),
            image: self.image.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            tag_list: self.tag_list.clone(),
            favorites_count: self.favorites_count,
            seller: seller.to_profile(viewer),
        }
    }
}

/// Tags keep insertion order; blanks and repeats are dropped.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|x| x.as_ref().trim().to_string())
        .filter(|x| !x.is_empty())
        .unique()
        .collect()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub username: UserId,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub favorites: Vec<ItemId>,
    pub following: Vec<UserId>,
}

impl User {
    pub fn new(username: impl Into<UserId>) -> Self {
        Self {
            username: username.into(),
            bio: None,
            image: None,
            favorites: Vec::new(),
            following: Vec::new(),
        }
    }

    pub fn is_favorite(&self, slug: &str) -> bool {
        self.favorites.iter().any(|x| x == slug)
    }

    pub fn is_following(&self, username: &str) -> bool {
        self.following.iter().any(|x| x == username)
    }

    pub fn to_profile(&self, viewer: Option<&User>) -> Profile {
        Profile {
            username: self.username.clone(),
            bio: self.bio.clone(),
            image: self.image.clone(),
            following: viewer.is_some_and(|x| x.is_following(&self.username)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub username: UserId,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub following: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ItemResponse {
    pub slug: ItemId,
    pub title: String,
    pub description: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tag_list: Vec<String>,
    pub favorited: bool,
    pub favorites_count: u64,
    pub seller: Profile,
}
