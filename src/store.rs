//! Backing store contract for content entities, an in-process implementation of it, and the
//! batch functions the request loaders use to read from it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::batch_function::BatchFunction;
use crate::content::{
    paginate, slugify, Category, CategoryFilter, CreateCategory, CreatePost, Post, PostFilter,
    UpdateCategory, UpdatePost,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content store is unavailable")]
    Unavailable,
    #[error("entity {0} does not exist")]
    NotFound(Uuid),
    #[error("referenced category {0} does not exist")]
    InvalidReference(Uuid),
    #[error("category {0} still has posts")]
    InUse(Uuid),
    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] regex::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage operations the content service needs.
///
/// The `*_by_ids` lookups back the request loaders: they return whatever subset of the ids exists,
/// in any order, and fail as a whole.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn categories_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Category>>;
    async fn posts_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Post>>;
    async fn list_categories(&self, filter: &CategoryFilter) -> StoreResult<Vec<Category>>;
    async fn list_posts(&self, filter: &PostFilter) -> StoreResult<Vec<Post>>;

    async fn create_category(&self, data: CreateCategory) -> StoreResult<Category>;
    async fn update_category(&self, id: Uuid, data: UpdateCategory) -> StoreResult<Category>;
    async fn delete_category(&self, id: Uuid) -> StoreResult<()>;

    async fn create_post(&self, data: CreatePost) -> StoreResult<Post>;
    async fn update_post(&self, id: Uuid, data: UpdatePost) -> StoreResult<Post>;
    async fn delete_post(&self, id: Uuid) -> StoreResult<()>;
}

/// Loads categories by id for a `Loader<Uuid, Category>`.
pub struct CategoryBatch;

#[async_trait]
impl BatchFunction<Uuid, Category> for CategoryBatch {
    type Context = Arc<dyn ContentRepository>;
    type Error = StoreError;

    async fn load(keys: &[Uuid], repository: &Self::Context) -> StoreResult<Vec<(Uuid, Category)>> {
        let categories = repository.categories_by_ids(keys).await?;
        Ok(categories.into_iter().map(|c| (c.id, c)).collect())
    }
}

/// Loads posts by id for a `Loader<Uuid, Post>`.
pub struct PostBatch;

#[async_trait]
impl BatchFunction<Uuid, Post> for PostBatch {
    type Context = Arc<dyn ContentRepository>;
    type Error = StoreError;

    async fn load(keys: &[Uuid], repository: &Self::Context) -> StoreResult<Vec<(Uuid, Post)>> {
        let posts = repository.posts_by_ids(keys).await?;
        Ok(posts.into_iter().map(|p| (p.id, p)).collect())
    }
}

#[derive(Default)]
struct Tables {
    categories: HashMap<Uuid, Category>,
    posts: HashMap<Uuid, Post>,
}

/// In-process [`ContentRepository`].
///
/// [`MemoryStore::set_available`] simulates a backend outage: while unavailable every call fails
/// with [`StoreError::Unavailable`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContentRepository for MemoryStore {
    async fn categories_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Category>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(ids.iter().filter_map(|id| tables.categories.get(id).cloned()).collect())
    }

    async fn posts_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Post>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(ids.iter().filter_map(|id| tables.posts.get(id).cloned()).collect())
    }

    async fn list_categories(&self, filter: &CategoryFilter) -> StoreResult<Vec<Category>> {
        self.check_available()?;
        let matcher = filter.matcher()?;
        let tables = self.tables.read().await;
        let mut categories =
            tables.categories.values().filter(|c| matcher(*c)).cloned().collect::<Vec<_>>();
        categories.sort_by(|a, b| filter.sort.compare(a, b));
        Ok(paginate(categories, filter.skip, filter.limit))
    }

    async fn list_posts(&self, filter: &PostFilter) -> StoreResult<Vec<Post>> {
        self.check_available()?;
        let matcher = filter.matcher()?;
        let tables = self.tables.read().await;
        let mut posts = tables.posts.values().filter(|p| matcher(*p)).cloned().collect::<Vec<_>>();
        posts.sort_by(|a, b| filter.sort.compare(a, b));
        Ok(paginate(posts, filter.skip, filter.limit))
    }

    async fn create_category(&self, data: CreateCategory) -> StoreResult<Category> {
        self.check_available()?;
        let now = Utc::now();
        let category = Category {
            id: Uuid::new_v4(),
            slug: slugify(data.slug.as_deref().unwrap_or(&data.name)),
            name: data.name,
            status: data.status.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn update_category(&self, id: Uuid, data: UpdateCategory) -> StoreResult<Category> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let category = tables.categories.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(name) = data.name {
            category.name = name;
        }
        if let Some(slug) = data.slug {
            category.slug = slugify(&slug);
        }
        if let Some(status) = data.status {
            category.status = status;
        }
        category.updated_at = Utc::now();
        Ok(category.clone())
    }

    async fn delete_category(&self, id: Uuid) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if tables.posts.values().any(|p| p.category_id == id) {
            return Err(StoreError::InUse(id));
        }
        tables.categories.remove(&id).map(|_| ()).ok_or(StoreError::NotFound(id))
    }

    async fn create_post(&self, data: CreatePost) -> StoreResult<Post> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if !tables.categories.contains_key(&data.category_id) {
            return Err(StoreError::InvalidReference(data.category_id));
        }
        let now = Utc::now();
        let post = Post {
            id: Uuid::new_v4(),
            slug: slugify(data.slug.as_deref().unwrap_or(&data.title)),
            title: data.title,
            category_id: data.category_id,
            status: data.status,
            content: data.content,
            created_at: now,
            updated_at: now,
        };
        tables.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn update_post(&self, id: Uuid, data: UpdatePost) -> StoreResult<Post> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if let Some(category_id) = data.category_id {
            if !tables.categories.contains_key(&category_id) {
                return Err(StoreError::InvalidReference(category_id));
            }
        }
        let post = tables.posts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(title) = data.title {
            post.title = title;
        }
        if let Some(slug) = data.slug {
            post.slug = slugify(&slug);
        }
        if let Some(category_id) = data.category_id {
            post.category_id = category_id;
        }
        if let Some(status) = data.status {
            post.status = status;
        }
        if let Some(content) = data.content {
            post.content = Some(content);
        }
        post.updated_at = Utc::now();
        Ok(post.clone())
    }

    async fn delete_post(&self, id: Uuid) -> StoreResult<()> {
        self.check_available()?;
        self.tables.write().await.posts.remove(&id).map(|_| ()).ok_or(StoreError::NotFound(id))
    }
}
