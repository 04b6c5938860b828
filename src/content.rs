//! Content entities served by the API: categories and the posts filed under them.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CategoryStatus {
    Active,
    #[default]
    Pending,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostStatus {
    Active,
    Pending,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: CategoryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub category_id: Uuid,
    pub status: PostStatus,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateCategory {
    pub name: String,
    /// Derived from `name` when absent.
    pub slug: Option<String>,
    pub status: Option<CategoryStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateCategory {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub status: Option<CategoryStatus>,
}

#[derive(Debug, Clone)]
pub struct CreatePost {
    pub title: String,
    /// Derived from `title` when absent.
    pub slug: Option<String>,
    pub status: PostStatus,
    pub category_id: Uuid,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdatePost {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub category_id: Option<Uuid>,
    pub status: Option<PostStatus>,
    pub content: Option<String>,
}

/// Matches a string field exactly, by pattern, or both.
#[derive(Debug, Clone, Default)]
pub struct StringFilter {
    pub eq: Option<String>,
    /// Unanchored; use `^...$` for a full match.
    pub regex: Option<String>,
}

impl StringFilter {
    pub fn eq(value: impl Into<String>) -> Self {
        Self { eq: Some(value.into()), regex: None }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self { eq: None, regex: Some(pattern.into()) }
    }

    fn compile(&self) -> Result<StringMatcher, regex::Error> {
        Ok(StringMatcher {
            eq: self.eq.clone(),
            regex: self.regex.as_deref().map(Regex::new).transpose()?,
        })
    }
}

#[derive(Debug)]
struct StringMatcher {
    eq: Option<String>,
    regex: Option<Regex>,
}

impl StringMatcher {
    fn matches(&self, value: &str) -> bool {
        self.eq.as_deref().map_or(true, |eq| eq == value)
            && self.regex.as_ref().map_or(true, |re| re.is_match(value))
    }
}

fn compile(filter: &Option<StringFilter>) -> Result<Option<StringMatcher>, regex::Error> {
    filter.as_ref().map(StringFilter::compile).transpose()
}

fn matches(matcher: &Option<StringMatcher>, value: &str) -> bool {
    matcher.as_ref().map_or(true, |m| m.matches(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategorySortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Name,
    Slug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Title,
    Slug,
}

/// List ordering. The default is newest first. Ties are broken by id so pages are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sort<F> {
    pub by: F,
    pub order: SortOrder,
}

impl<F> Sort<F> {
    pub fn new(by: F, order: SortOrder) -> Self {
        Self { by, order }
    }

    fn directed(&self, ordering: Ordering) -> Ordering {
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

impl Sort<CategorySortField> {
    pub fn compare(&self, a: &Category, b: &Category) -> Ordering {
        let ordering = match self.by {
            CategorySortField::CreatedAt => a.created_at.cmp(&b.created_at),
            CategorySortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            CategorySortField::Name => a.name.cmp(&b.name),
            CategorySortField::Slug => a.slug.cmp(&b.slug),
        };
        self.directed(ordering).then_with(|| a.id.cmp(&b.id))
    }
}

impl Sort<PostSortField> {
    pub fn compare(&self, a: &Post, b: &Post) -> Ordering {
        let ordering = match self.by {
            PostSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            PostSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            PostSortField::Title => a.title.cmp(&b.title),
            PostSortField::Slug => a.slug.cmp(&b.slug),
        };
        self.directed(ordering).then_with(|| a.id.cmp(&b.id))
    }
}

/// Selection for category list queries.
#[derive(Debug, Clone, Default)]
pub struct CategoryFilter {
    pub name: Option<StringFilter>,
    pub slug: Option<StringFilter>,
    pub status: Option<CategoryStatus>,
    pub sort: Sort<CategorySortField>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl CategoryFilter {
    /// Compiles the string filters. Fails on an invalid pattern.
    pub fn matcher(&self) -> Result<impl Fn(&Category) -> bool, regex::Error> {
        let name = compile(&self.name)?;
        let slug = compile(&self.slug)?;
        let status = self.status;
        Ok(move |category: &Category| {
            matches(&name, &category.name)
                && matches(&slug, &category.slug)
                && status.map_or(true, |status| status == category.status)
        })
    }
}

/// Selection for post list queries.
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub title: Option<StringFilter>,
    pub slug: Option<StringFilter>,
    pub category_ids: Option<Vec<Uuid>>,
    pub status: Option<PostStatus>,
    pub sort: Sort<PostSortField>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl PostFilter {
    /// Compiles the string filters. Fails on an invalid pattern.
    pub fn matcher(&self) -> Result<impl Fn(&Post) -> bool + '_, regex::Error> {
        let title = compile(&self.title)?;
        let slug = compile(&self.slug)?;
        Ok(move |post: &Post| {
            matches(&title, &post.title)
                && matches(&slug, &post.slug)
                && self.category_ids.as_ref().map_or(true, |ids| ids.contains(&post.category_id))
                && self.status.map_or(true, |status| status == post.status)
        })
    }
}

/// Applies `skip` then `limit` to an already sorted list.
pub fn paginate<T>(items: Vec<T>, skip: Option<usize>, limit: Option<usize>) -> Vec<T> {
    items.into_iter().skip(skip.unwrap_or(0)).take(limit.unwrap_or(usize::MAX)).collect()
}

/// Lowercases `text` and joins its ASCII alphanumeric runs with single dashes.
///
/// ```
/// assert_eq!(inkwell_loader::content::slugify("  Hello, World! 2024 "), "hello-world-2024");
/// ```
pub fn slugify(text: &str) -> String {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}
