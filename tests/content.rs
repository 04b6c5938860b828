use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use inkwell_loader::content::{
    Category, CategoryFilter, CategorySortField, CategoryStatus, CreateCategory, CreatePost, Post,
    PostFilter, PostSortField, PostStatus, Sort, SortOrder, StringFilter, UpdateCategory,
    UpdatePost,
};
use inkwell_loader::service::{RequestContext, ServiceError};
use inkwell_loader::store::{ContentRepository, MemoryStore, StoreError, StoreResult};
use inkwell_loader::{LoadError, LoaderConfig};
use uuid::Uuid;

/// Records the id sets passed to the batch lookups of an inner `MemoryStore`.
#[derive(Default)]
struct CountingRepository {
    inner: MemoryStore,
    category_calls: Mutex<Vec<Vec<Uuid>>>,
    post_calls: Mutex<Vec<Vec<Uuid>>>,
}

impl CountingRepository {
    fn category_calls(&self) -> Vec<Vec<Uuid>> {
        self.category_calls.lock().unwrap().clone()
    }

    fn post_calls(&self) -> Vec<Vec<Uuid>> {
        self.post_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentRepository for CountingRepository {
    async fn categories_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Category>> {
        self.category_calls.lock().unwrap().push(ids.to_vec());
        self.inner.categories_by_ids(ids).await
    }

    async fn posts_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Post>> {
        self.post_calls.lock().unwrap().push(ids.to_vec());
        self.inner.posts_by_ids(ids).await
    }

    async fn list_categories(&self, filter: &CategoryFilter) -> StoreResult<Vec<Category>> {
        self.inner.list_categories(filter).await
    }

    async fn list_posts(&self, filter: &PostFilter) -> StoreResult<Vec<Post>> {
        self.inner.list_posts(filter).await
    }

    async fn create_category(&self, data: CreateCategory) -> StoreResult<Category> {
        self.inner.create_category(data).await
    }

    async fn update_category(&self, id: Uuid, data: UpdateCategory) -> StoreResult<Category> {
        self.inner.update_category(id, data).await
    }

    async fn delete_category(&self, id: Uuid) -> StoreResult<()> {
        self.inner.delete_category(id).await
    }

    async fn create_post(&self, data: CreatePost) -> StoreResult<Post> {
        self.inner.create_post(data).await
    }

    async fn update_post(&self, id: Uuid, data: UpdatePost) -> StoreResult<Post> {
        self.inner.update_post(id, data).await
    }

    async fn delete_post(&self, id: Uuid) -> StoreResult<()> {
        self.inner.delete_post(id).await
    }
}

struct Fixture {
    store: Arc<CountingRepository>,
    categories: Vec<Category>,
    posts: Vec<Post>,
}

impl Fixture {
    /// Two categories and three posts; the first and last post share a category.
    async fn new() -> Self {
        let store = Arc::new(CountingRepository::default());
        let mut categories = Vec::new();
        for name in ["Rust", "Databases"] {
            let category = store
                .create_category(CreateCategory {
                    name: name.to_owned(),
                    status: Some(CategoryStatus::Active),
                    ..Default::default()
                })
                .await
                .unwrap();
            categories.push(category);
        }

        let mut posts = Vec::new();
        for (title, category) in [
            ("Batching loads", &categories[0]),
            ("Indexing tables", &categories[1]),
            ("Borrowing rules", &categories[0]),
        ] {
            let post = store
                .create_post(CreatePost {
                    title: title.to_owned(),
                    slug: None,
                    status: PostStatus::Active,
                    category_id: category.id,
                    content: Some(format!("About {}", title)),
                })
                .await
                .unwrap();
            posts.push(post);
        }

        Self { store, categories, posts }
    }

    fn request(&self) -> RequestContext {
        let repository: Arc<dyn ContentRepository> = self.store.clone();
        RequestContext::new(repository, &LoaderConfig::default())
    }

    fn post_ids(&self) -> Vec<Uuid> {
        self.posts.iter().map(|p| p.id).collect()
    }
}

#[tokio::test]
async fn post_list_with_categories_costs_one_batch_per_entity() {
    let fixture = Fixture::new().await;
    let request = fixture.request();

    let resolved = request.posts_with_categories(fixture.post_ids()).await.unwrap();

    assert_eq!(resolved.len(), 3);
    for (view, post) in resolved.iter().zip(&fixture.posts) {
        assert_eq!(&view.post, post);
        assert_eq!(view.category.as_ref().map(|c| c.id), Some(post.category_id));
    }
    assert_eq!(fixture.store.post_calls(), vec![fixture.post_ids()]);
    assert_eq!(
        fixture.store.category_calls(),
        vec![vec![fixture.categories[0].id, fixture.categories[1].id]]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn post_list_with_categories_is_batched_on_a_multi_thread_runtime() {
    for _ in 0..10 {
        let fixture = Fixture::new().await;
        let request = fixture.request();

        let resolved = request.posts_with_categories(fixture.post_ids()).await.unwrap();

        assert_eq!(resolved.len(), 3);
        assert_eq!(fixture.store.post_calls(), vec![fixture.post_ids()]);
        assert_eq!(
            fixture.store.category_calls(),
            vec![vec![fixture.categories[0].id, fixture.categories[1].id]]
        );
    }
}

#[tokio::test]
async fn missing_entities_resolve_to_none() {
    let fixture = Fixture::new().await;
    let request = fixture.request();

    assert_eq!(request.category(Uuid::new_v4()).await.unwrap(), None);
    assert_eq!(request.post(Uuid::new_v4()).await.unwrap(), None);

    let mut ids = fixture.post_ids();
    ids.insert(1, Uuid::new_v4());
    let resolved = request.posts_with_categories(ids).await.unwrap();
    assert_eq!(resolved.iter().map(|v| v.post.id).collect::<Vec<_>>(), fixture.post_ids());
}

#[tokio::test]
async fn update_invalidates_the_cached_category() {
    let fixture = Fixture::new().await;
    let request = fixture.request();
    let id = fixture.categories[0].id;

    assert_eq!(request.category(id).await.unwrap().unwrap().name, "Rust");
    let updated = request
        .update_category(
            id,
            UpdateCategory { name: Some("Systems".to_owned()), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Systems");
    assert_eq!(request.category(id).await.unwrap().unwrap().name, "Systems");
    assert_eq!(fixture.store.category_calls(), vec![vec![id], vec![id]]);
}

#[tokio::test]
async fn moving_a_post_resolves_its_new_category() {
    let fixture = Fixture::new().await;
    let request = fixture.request();
    let post_id = fixture.posts[0].id;

    let post = request.post(post_id).await.unwrap().unwrap();
    assert_eq!(request.post_category(&post).await.unwrap().unwrap().name, "Rust");

    request
        .update_post(
            post_id,
            UpdatePost { category_id: Some(fixture.categories[1].id), ..Default::default() },
        )
        .await
        .unwrap();
    let post = request.post(post_id).await.unwrap().unwrap();
    assert_eq!(request.post_category(&post).await.unwrap().unwrap().name, "Databases");
}

#[tokio::test]
async fn deleted_post_is_not_served_from_cache() {
    let fixture = Fixture::new().await;
    let request = fixture.request();
    let post_id = fixture.posts[1].id;

    assert!(request.post(post_id).await.unwrap().is_some());
    request.delete_post(post_id).await.unwrap();
    assert_eq!(request.post(post_id).await.unwrap(), None);
}

#[tokio::test]
async fn listed_posts_are_primed() {
    let fixture = Fixture::new().await;
    let request = fixture.request();

    let filter = PostFilter {
        category_ids: Some(vec![fixture.categories[0].id]),
        ..Default::default()
    };
    let listed = request.list_posts(&filter).await.unwrap();
    assert_eq!(listed.len(), 2);

    for post in &listed {
        assert_eq!(request.post(post.id).await.unwrap().as_ref(), Some(post));
    }
    assert!(fixture.store.post_calls().is_empty());
}

#[tokio::test]
async fn listed_categories_are_primed() {
    let fixture = Fixture::new().await;
    let request = fixture.request();

    let listed = request.list_categories(&CategoryFilter::default()).await.unwrap();
    assert_eq!(listed.len(), 2);

    let resolved = request.posts_with_categories(fixture.post_ids()).await.unwrap();
    assert!(resolved.iter().all(|view| view.category.is_some()));
    assert!(fixture.store.category_calls().is_empty());
}

#[tokio::test]
async fn categories_filter_by_name_slug_and_status() {
    let fixture = Fixture::new().await;
    let request = fixture.request();
    request
        .create_category(CreateCategory {
            name: "Rust Internals".to_owned(),
            status: Some(CategoryStatus::Archived),
            ..Default::default()
        })
        .await
        .unwrap();

    let names = |categories: Vec<Category>| {
        let mut names = categories.into_iter().map(|c| c.name).collect::<Vec<_>>();
        names.sort();
        names
    };

    let filter = CategoryFilter { name: Some(StringFilter::regex("^Rust")), ..Default::default() };
    assert_eq!(names(request.list_categories(&filter).await.unwrap()), ["Rust", "Rust Internals"]);

    let filter = CategoryFilter { name: Some(StringFilter::eq("Rust")), ..Default::default() };
    assert_eq!(names(request.list_categories(&filter).await.unwrap()), ["Rust"]);

    let filter = CategoryFilter { slug: Some(StringFilter::regex("-internals$")), ..Default::default() };
    assert_eq!(names(request.list_categories(&filter).await.unwrap()), ["Rust Internals"]);

    let filter = CategoryFilter {
        name: Some(StringFilter::regex("^Rust")),
        status: Some(CategoryStatus::Active),
        ..Default::default()
    };
    assert_eq!(names(request.list_categories(&filter).await.unwrap()), ["Rust"]);
}

#[tokio::test]
async fn lists_are_sorted_and_paginated() {
    let fixture = Fixture::new().await;
    let request = fixture.request();

    let by_name = CategoryFilter {
        sort: Sort::new(CategorySortField::Name, SortOrder::Asc),
        ..Default::default()
    };
    let listed = request.list_categories(&by_name).await.unwrap();
    assert_eq!(listed.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), ["Databases", "Rust"]);

    let by_title = PostFilter {
        sort: Sort::new(PostSortField::Title, SortOrder::Desc),
        skip: Some(1),
        limit: Some(1),
        ..Default::default()
    };
    let page = request.list_posts(&by_title).await.unwrap();
    assert_eq!(page.iter().map(|p| p.title.as_str()).collect::<Vec<_>>(), ["Borrowing rules"]);
}

#[tokio::test]
async fn posts_filter_by_title_and_slug() {
    let fixture = Fixture::new().await;
    let request = fixture.request();

    let filter = PostFilter { title: Some(StringFilter::regex("(?i)^b")), ..Default::default() };
    let mut titles =
        request.list_posts(&filter).await.unwrap().into_iter().map(|p| p.title).collect::<Vec<_>>();
    titles.sort();
    assert_eq!(titles, ["Batching loads", "Borrowing rules"]);

    let filter = PostFilter {
        slug: Some(StringFilter::eq("indexing-tables")),
        category_ids: Some(vec![fixture.categories[1].id]),
        ..Default::default()
    };
    let listed = request.list_posts(&filter).await.unwrap();
    assert_eq!(listed, vec![fixture.posts[1].clone()]);
}

#[tokio::test]
async fn invalid_pattern_is_a_store_error() {
    let fixture = Fixture::new().await;
    let request = fixture.request();

    let filter = CategoryFilter { name: Some(StringFilter::regex("[unclosed")), ..Default::default() };
    let err = request.list_categories(&filter).await.unwrap_err();
    assert!(matches!(err, ServiceError::Store(StoreError::InvalidFilter(_))));
}

#[tokio::test]
async fn requests_do_not_share_caches() {
    let fixture = Fixture::new().await;
    let id = fixture.categories[1].id;

    fixture.request().category(id).await.unwrap();
    fixture.request().category(id).await.unwrap();
    assert_eq!(fixture.store.category_calls(), vec![vec![id], vec![id]]);
}

#[tokio::test]
async fn backend_outage_surfaces_as_fetch_error() {
    let fixture = Fixture::new().await;
    let request = fixture.request();

    fixture.store.inner.set_available(false);
    let err = request.category(fixture.categories[0].id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Load(LoadError::Fetch(_))));

    fixture.store.inner.set_available(true);
    assert!(request.category(fixture.categories[0].id).await.unwrap().is_some());
}

#[tokio::test]
async fn invalid_writes_are_store_errors() {
    let fixture = Fixture::new().await;
    let request = fixture.request();

    let missing = Uuid::new_v4();
    let err = request
        .create_post(CreatePost {
            title: "Orphan".to_owned(),
            slug: None,
            status: PostStatus::Pending,
            category_id: missing,
            content: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Store(StoreError::InvalidReference(id)) if id == missing));

    let err = request.delete_category(fixture.categories[0].id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Store(StoreError::InUse(_))));
}

#[tokio::test]
async fn cancelled_request_releases_resolvers() {
    let fixture = Fixture::new().await;
    let request = fixture.request();

    let (post, ()) = tokio::join!(request.post(fixture.posts[0].id), request.cancel());
    assert!(matches!(post, Err(ServiceError::Load(LoadError::Cancelled))));
}

#[tokio::test]
async fn slugs_are_derived_from_titles() {
    let fixture = Fixture::new().await;
    assert_eq!(fixture.posts[0].slug, "batching-loads");
    assert_eq!(fixture.categories[1].slug, "databases");
}
