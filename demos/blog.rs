//! Resolves a small post listing the way a GraphQL executor would, with loader activity logged.
//!
//! Run with `RUST_LOG=inkwell_loader=debug cargo run --example blog`.

use std::sync::Arc;

use inkwell_loader::content::{
    CategoryFilter, CategorySortField, CreateCategory, CreatePost, PostFilter, PostStatus, Sort,
    SortOrder, StringFilter,
};
use inkwell_loader::service::{RequestContext, ServiceError};
use inkwell_loader::store::{ContentRepository, MemoryStore};
use inkwell_loader::LoaderConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = LoaderConfig::from_env()?;
    let store: Arc<dyn ContentRepository> = Arc::new(MemoryStore::new());

    let mut category_ids = Vec::new();
    for name in ["Announcements", "Engineering"] {
        let category = store
            .create_category(CreateCategory { name: name.to_owned(), ..Default::default() })
            .await?;
        category_ids.push(category.id);
    }
    for (i, title) in ["Hello world", "Batching in practice", "Release notes"].iter().enumerate() {
        store
            .create_post(CreatePost {
                title: title.to_string(),
                slug: None,
                status: PostStatus::Active,
                category_id: category_ids[i % 2],
                content: None,
            })
            .await?;
    }

    // One context per incoming query.
    let request = RequestContext::new(Arc::clone(&store), &config);
    let ids = request.list_posts(&PostFilter::default()).await?.iter().map(|p| p.id).collect();
    for view in request.posts_with_categories(ids).await? {
        let category = view.category.map(|c| c.name).unwrap_or_else(|| "-".to_owned());
        println!("{:<24} {:<22} {}", view.post.title, view.post.slug, category);
    }

    // A second query: categories by name pattern, then their posts by title.
    let request = RequestContext::new(Arc::clone(&store), &config);
    let categories = request
        .list_categories(&CategoryFilter {
            name: Some(StringFilter::regex("(?i)^eng")),
            sort: Sort::new(CategorySortField::Name, SortOrder::Asc),
            ..Default::default()
        })
        .await?;
    let posts = request
        .list_posts(&PostFilter {
            title: Some(StringFilter::regex("(?i)batch")),
            category_ids: Some(categories.iter().map(|c| c.id).collect()),
            ..Default::default()
        })
        .await?;
    for post in posts {
        let category = request.post_category(&post).await?.map(|c| c.name).unwrap_or_default();
        println!("{:<24} {}", post.title, category);
    }

    let missing = request.category(uuid::Uuid::new_v4()).await?;
    println!("unknown category resolves to {:?}", missing);

    let err: Option<ServiceError> = request.delete_category(category_ids[0]).await.err();
    println!("deleting a category with posts: {}", err.map(|e| e.to_string()).unwrap_or_default());
    Ok(())
}
