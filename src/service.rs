//! Request-scoped resolver layer.
//!
//! A [`RequestContext`] is built for each incoming query and owns one loader per entity type.
//! Resolvers go through it for every entity read so that sibling field resolutions share batches
//! and the request's cache; writes go to the repository and invalidate the affected keys.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::content::{
    Category, CategoryFilter, CreateCategory, CreatePost, Post, PostFilter, UpdateCategory,
    UpdatePost,
};
use crate::store::{CategoryBatch, ContentRepository, PostBatch, StoreError};
use crate::{LoadError, Loader, LoaderConfig};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// A post together with its resolved category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostWithCategory {
    pub post: Post,
    /// `None` if the referenced category no longer exists.
    pub category: Option<Category>,
}

pub struct RequestContext {
    repository: Arc<dyn ContentRepository>,
    categories: Loader<Uuid, Category>,
    posts: Loader<Uuid, Post>,
}

impl RequestContext {
    /// Must be called from within a tokio runtime.
    pub fn new(repository: Arc<dyn ContentRepository>, config: &LoaderConfig) -> Self {
        Self {
            categories: Loader::with_config(CategoryBatch, Arc::clone(&repository), config.clone()),
            posts: Loader::with_config(PostBatch, Arc::clone(&repository), config.clone()),
            repository,
        }
    }

    pub fn categories(&self) -> &Loader<Uuid, Category> {
        &self.categories
    }

    pub fn posts(&self) -> &Loader<Uuid, Post> {
        &self.posts
    }

    pub async fn category(&self, id: Uuid) -> ServiceResult<Option<Category>> {
        optional(self.categories.load(id).await)
    }

    pub async fn post(&self, id: Uuid) -> ServiceResult<Option<Post>> {
        optional(self.posts.load(id).await)
    }

    pub async fn post_category(&self, post: &Post) -> ServiceResult<Option<Category>> {
        self.category(post.category_id).await
    }

    /// Runs a list query against the repository and seeds the category loader with the rows.
    #[tracing::instrument(skip(self))]
    pub async fn list_categories(&self, filter: &CategoryFilter) -> ServiceResult<Vec<Category>> {
        let categories = self.repository.list_categories(filter).await?;
        self.categories.prime_many(categories.iter().map(|c| (c.id, c.clone())).collect()).await;
        Ok(categories)
    }

    /// Runs a list query against the repository and seeds the post loader with the rows.
    #[tracing::instrument(skip(self))]
    pub async fn list_posts(&self, filter: &PostFilter) -> ServiceResult<Vec<Post>> {
        let posts = self.repository.list_posts(filter).await?;
        self.posts.prime_many(posts.iter().map(|p| (p.id, p.clone())).collect()).await;
        Ok(posts)
    }

    /// Resolves each post and then each post's category. Each level goes to its loader as a single
    /// `load_many`, so each level costs one batch. Missing posts are skipped.
    #[tracing::instrument(skip(self))]
    pub async fn posts_with_categories(&self, ids: Vec<Uuid>) -> ServiceResult<Vec<PostWithCategory>> {
        let posts = self
            .posts
            .load_many(ids)
            .await
            .into_iter()
            .filter_map(|loaded| optional(loaded).transpose())
            .collect::<ServiceResult<Vec<_>>>()?;

        let category_ids = posts.iter().map(|post| post.category_id).collect();
        let categories = self.categories.load_many(category_ids).await;

        posts
            .into_iter()
            .zip(categories)
            .map(|(post, category)| {
                optional(category).map(|category| PostWithCategory { post, category })
            })
            .collect()
    }

    pub async fn create_category(&self, data: CreateCategory) -> ServiceResult<Category> {
        Ok(self.repository.create_category(data).await?)
    }

    pub async fn update_category(&self, id: Uuid, data: UpdateCategory) -> ServiceResult<Category> {
        let category = self.repository.update_category(id, data).await?;
        self.categories.clear(id).await;
        Ok(category)
    }

    pub async fn delete_category(&self, id: Uuid) -> ServiceResult<()> {
        self.repository.delete_category(id).await?;
        self.categories.clear(id).await;
        Ok(())
    }

    pub async fn create_post(&self, data: CreatePost) -> ServiceResult<Post> {
        Ok(self.repository.create_post(data).await?)
    }

    pub async fn update_post(&self, id: Uuid, data: UpdatePost) -> ServiceResult<Post> {
        let post = self.repository.update_post(id, data).await?;
        self.posts.clear(id).await;
        Ok(post)
    }

    pub async fn delete_post(&self, id: Uuid) -> ServiceResult<()> {
        self.repository.delete_post(id).await?;
        self.posts.clear(id).await;
        Ok(())
    }

    /// Releases every resolver still waiting on this request's loaders.
    pub async fn cancel(&self) {
        self.categories.cancel().await;
        self.posts.cancel().await;
    }
}

/// Maps a not-found outcome to `None`; fetch failures and cancellation stay errors.
fn optional<V>(loaded: Result<V, LoadError>) -> ServiceResult<Option<V>> {
    match loaded {
        Ok(value) => Ok(Some(value)),
        Err(LoadError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
