//! Listing presenter: turns raw gateway output into the listing view.
//!
//! Everything here is a pure function of its input.

use crate::{
    models::{
        stored_object::StoredObject,
        view::{ListingView, PreviewKind, TextKind, Totals, ViewEntry},
    },
    services::name_codec,
};
use chrono::{DateTime, Utc};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "bmp"];
const TEXT_EXTENSIONS: [&str; 8] = ["txt", "md", "py", "json", "csv", "html", "css", "js"];
const HIGHLIGHT_LANGUAGES: [&str; 5] = ["py", "json", "html", "css", "js"];

/// Build the view for a set of listed objects, newest first.
pub fn present(objects: Vec<StoredObject>) -> ListingView {
    let totals = totals(&objects);

    let mut objects = objects;
    // `sort_by` is stable; `None` orders below any timestamp, so undated
    // entries end up last in listing order.
    objects.sort_by(|a, b| b.sort_time().cmp(&a.sort_time()));

    let entries = objects.into_iter().map(view_entry).collect();

    ListingView {
        entries,
        totals,
        warning: None,
    }
}

/// Count and byte sum across `objects`.
pub fn totals(objects: &[StoredObject]) -> Totals {
    let total_bytes = objects.iter().map(|o| o.size_bytes).sum();
    Totals {
        count: objects.len(),
        total_bytes,
        total_size: format_size(total_bytes),
    }
}

fn view_entry(object: StoredObject) -> ViewEntry {
    let display_name = if object.display_name.is_empty() {
        name_codec::decode(&object.storage_key)
    } else {
        object.display_name
    };
    let timestamp = object.created_at.or(object.modified_at);
    let preview = preview_kind(&display_name);
    let language = highlight_language(&display_name).map(str::to_string);

    ViewEntry {
        storage_key: object.storage_key,
        size: format_size(object.size_bytes),
        size_bytes: object.size_bytes,
        content_type: object.content_type,
        date: timestamp.as_ref().map(format_timestamp).unwrap_or_default(),
        timestamp,
        preview,
        language,
        display_name,
    }
}

/// Human-readable size: bytes below 1 KiB, then KB and MB with one decimal.
pub fn format_size(bytes: u64) -> String {
    if bytes < KIB {
        format!("{} B", bytes)
    } else if bytes < MIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

/// Lower-cased extension of a display name, if it has one.
fn extension(display_name: &str) -> Option<String> {
    display_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Classify a display name by its extension (case-insensitive, exact match).
pub fn preview_kind(display_name: &str) -> PreviewKind {
    let Some(ext) = extension(display_name) else {
        return PreviewKind::None;
    };
    let ext = ext.as_str();

    if IMAGE_EXTENSIONS.contains(&ext) {
        PreviewKind::Image
    } else if TEXT_EXTENSIONS.contains(&ext) {
        match ext {
            "md" => PreviewKind::Text(TextKind::Markdown),
            "csv" => PreviewKind::Text(TextKind::Tabular),
            _ => PreviewKind::Text(TextKind::Plain),
        }
    } else if ext == "pdf" {
        PreviewKind::Document
    } else {
        PreviewKind::None
    }
}

/// Code-highlight language for text previews that are source code.
pub fn highlight_language(display_name: &str) -> Option<&'static str> {
    let ext = extension(display_name)?;
    HIGHLIGHT_LANGUAGES
        .iter()
        .copied()
        .find(|lang| *lang == ext)
}
