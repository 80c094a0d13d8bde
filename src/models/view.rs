//! Display-ready shapes handed to the UI layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a file can be previewed, decided from its display name.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "kind", content = "sub_kind", rename_all = "lowercase")]
pub enum PreviewKind {
    Image,
    Text(TextKind),
    Document,
    None,
}

/// Rendering flavour for text previews.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextKind {
    Plain,
    Markdown,
    Tabular,
}

/// One row of the file listing.
#[derive(Serialize, Clone, Debug)]
pub struct ViewEntry {
    pub storage_key: String,
    pub display_name: String,
    pub size_bytes: u64,
    /// Human-readable size, e.g. `1.5 KB`.
    pub size: String,
    pub content_type: String,
    /// `createdAt`, or the modification time when creation is unknown.
    pub timestamp: Option<DateTime<Utc>>,
    /// `timestamp` rendered as `YYYY-MM-DD HH:MM`, empty when unknown.
    pub date: String,
    pub preview: PreviewKind,
    /// Syntax highlighting hint for code-like text previews.
    pub language: Option<String>,
}

/// Aggregate numbers shown next to the listing.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Totals {
    pub count: usize,
    pub total_bytes: u64,
    pub total_size: String,
}

/// Complete listing response.
#[derive(Serialize, Clone, Debug)]
pub struct ListingView {
    pub entries: Vec<ViewEntry>,
    pub totals: Totals,
    /// Set when the backend could not be reached and the listing is empty
    /// because of it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}
