//! Plain-text rendering of catalog pages and manifests for the terminal.

use crate::catalog::{CatalogView, ViewMode};
use crate::models::Manifest;

const GRID_COLUMNS: usize = 3;

/// Render one page of results, followed by a pager line.
///
/// Grid mode lays names out in columns; list mode shows each entry with its
/// category, description, and tags.
///
/// Example output (list):
/// ```text
/// Button (Inputs)
///     A clickable button
///     #click #ui
///
/// Page 1 of 1 (1 component)
/// ```
pub fn render_page(view: &CatalogView<'_>, mode: ViewMode) -> String {
    if view.items.is_empty() {
        return "No components found\n".to_string();
    }

    let mut output = match mode {
        ViewMode::Grid => render_grid(&view.items),
        ViewMode::List => render_list(&view.items),
    };
    output.push('\n');
    output.push_str(&pager_line(view));
    output.push('\n');
    output
}

fn render_grid(items: &[&Manifest]) -> String {
    let width = items
        .iter()
        .map(|m| m.name.as_str().chars().count())
        .max()
        .unwrap_or(0);

    let mut output = String::new();
    for row in items.chunks(GRID_COLUMNS) {
        let cells: Vec<String> = row
            .iter()
            .map(|m| format!("{:<width$}", m.name.as_str(), width = width))
            .collect();
        output.push_str(cells.join("  ").trim_end());
        output.push('\n');
    }
    output
}

fn render_list(items: &[&Manifest]) -> String {
    let mut output = String::new();
    for (i, manifest) in items.iter().enumerate() {
        if i > 0 {
            output.push('\n');
        }
        output.push_str(&format!("{} ({})\n", manifest.name, manifest.category));
        if !manifest.description.is_empty() {
            output.push_str(&format!("    {}\n", manifest.description));
        }
        if !manifest.tags.is_empty() {
            let tags: Vec<String> = manifest.tags.iter().map(|t| format!("#{}", t)).collect();
            output.push_str(&format!("    {}\n", tags.join(" ")));
        }
    }
    output
}

fn pager_line(view: &CatalogView<'_>) -> String {
    let noun = if view.total_items == 1 {
        "component"
    } else {
        "components"
    };
    format!(
        "Page {} of {} ({} {})",
        view.page, view.total_pages, view.total_items, noun
    )
}

/// Render every field of a manifest.
pub fn render_manifest(manifest: &Manifest) -> String {
    let tags: Vec<&str> = manifest.tags.iter().map(String::as_str).collect();
    let rows = [
        ("Category", manifest.category.clone()),
        ("Author", manifest.author.clone()),
        ("Description", manifest.description.clone()),
        ("Tags", join_or_none(&tags)),
        ("Languages", join_or_none(&manifest.languages)),
        ("Dependencies", join_or_none(&manifest.dependencies)),
    ];

    let mut output = format!("{}\n", manifest.name);
    for (label, value) in rows {
        output.push_str(&format!("{:<14}{}\n", format!("{}:", label), value));
    }
    output
}

fn join_or_none<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items
            .iter()
            .map(|item| item.as_ref())
            .collect::<Vec<&str>>()
            .join(", ")
    }
}
