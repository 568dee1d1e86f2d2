//! Directory listings: entries, README detection, sorting, breadcrumbs and gallery paging.

use std::{
    cmp::Ordering,
    fs::{self, Metadata},
    io::{self, Read},
    path::Path,
};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::thumb;
use crate::types::{Component, FileEntry, ListingResponse, SortKey};

const README_LIMIT: u64 = 1024 * 1024;
const MARKDOWN_READMES: &[&str] = &["readme.md", "readme.mkd", "readme.mkdown", "readme.markdown"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadmeKind {
    Plain,
    Markdown,
}

pub fn readme_kind(name: &str) -> Option<ReadmeKind> {
    let lower = name.to_lowercase();
    if lower == "readme" {
        Some(ReadmeKind::Plain)
    } else if MARKDOWN_READMES.contains(&lower.as_str()) {
        Some(ReadmeKind::Markdown)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ListingOptions {
    pub sort: Option<SortKey>,
    pub reverse: bool,
    /// 1-based gallery page; values below 1 are treated as 1.
    pub page: i64,
    pub page_size: usize,
    pub show_modes: bool,
}

/// Lists `dir`, which is served under `url_path`.
pub fn list_directory(dir: &Path, url_path: &str, opts: &ListingOptions) -> io::Result<ListingResponse> {
    let mut children: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    children.sort_by_key(|c| c.file_name());

    let mut entries = Vec::with_capacity(children.len());
    let mut readme: Option<(ReadmeKind, String)> = None;

    for child in children {
        let name = child.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let path = child.path();
        let link_md = child.metadata()?;
        let is_link = link_md.file_type().is_symlink();
        let md = if is_link {
            fs::metadata(&path).unwrap_or_else(|e| {
                debug!("dangling link {}: {}", path.display(), e);
                link_md.clone()
            })
        } else {
            link_md
        };

        if readme.is_none() && md.is_file() {
            if let Some(kind) = readme_kind(&name) {
                readme = Some((kind, read_readme(&path)));
            }
        }

        let num_entries = if md.is_dir() { count_visible(&path) } else { 0 };
        entries.push(FileEntry {
            path: join_url(url_path, &name),
            size: md.len(),
            is_dir: md.is_dir(),
            is_link,
            modified: md.modified().ok().map(DateTime::<Utc>::from),
            num_entries,
            mode: opts.show_modes.then(|| mode_string(&md, is_link)),
            name,
        });
    }

    if let Some(key) = opts.sort {
        sort_entries(&mut entries, key, opts.reverse);
    }

    let (mut image_files, non_images): (Vec<_>, Vec<_>) =
        entries.iter().cloned().partition(|e| !e.is_dir && thumb::is_supported(Path::new(&e.name)));
    let gallery = image_files.len() > entries.len() / 2;

    let page = opts.page.max(1) as usize;
    let mut gallery_pages = 0;
    if gallery {
        entries = non_images;
        let page_size = opts.page_size.max(1);
        gallery_pages = image_files.len().div_ceil(page_size);
        image_files = paginate(image_files, page, page_size);
    }

    let (plain_readme, readme) = match readme {
        Some((kind, text)) => (kind == ReadmeKind::Plain, Some(text)),
        None => (false, None),
    };

    Ok(ListingResponse {
        path: url_path.to_string(),
        components: breadcrumbs(url_path),
        entries,
        image_files,
        readme,
        plain_readme,
        sort: opts.sort,
        reverse: opts.reverse,
        gallery,
        gallery_page: page,
        next_page: page + 1,
        prev_page: page - 1,
        gallery_pages,
    })
}

/// Stable sort by `key`; `reverse` flips the comparison, keeping ties in their original order.
pub fn sort_entries(entries: &mut [FileEntry], key: SortKey, reverse: bool) {
    entries.sort_by(|a, b| {
        let ord = compare(a, b, key);
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    });
}

fn compare(a: &FileEntry, b: &FileEntry, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Size => a.size.cmp(&b.size),
        SortKey::Modified => a.modified.cmp(&b.modified),
    }
}

/// Page `page` (1-based) of `items`; empty past the end.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Vec<T> {
    let offset = page.saturating_sub(1).saturating_mul(page_size);
    items.into_iter().skip(offset).take(page_size).collect()
}

/// Breadcrumb trail for a request path, starting with the root.
pub fn breadcrumbs(url_path: &str) -> Vec<Component> {
    let mut components = vec![Component { name: "/".to_string(), path: "/".to_string() }];
    let mut prefix = String::new();
    for part in url_path.split('/').filter(|p| !p.is_empty()) {
        prefix.push('/');
        prefix.push_str(part);
        components.push(Component { name: format!("{}/", part), path: prefix.clone() });
    }
    components
}

fn join_url(base: &str, name: &str) -> String {
    let mut out = String::new();
    for part in base.split('/').filter(|p| !p.is_empty()).chain(std::iter::once(name)) {
        out.push('/');
        out.push_str(&urlencoding::encode(part));
    }
    out
}

fn count_visible(dir: &Path) -> usize {
    match fs::read_dir(dir) {
        Ok(rd) => rd.flatten().filter(|e| !e.file_name().to_string_lossy().starts_with('.')).count(),
        Err(e) => {
            debug!("cannot count entries of {}: {}", dir.display(), e);
            0
        }
    }
}

fn read_readme(path: &Path) -> String {
    let mut buf = Vec::new();
    let read = fs::File::open(path).and_then(|f| f.take(README_LIMIT).read_to_end(&mut buf));
    match read {
        Ok(_) => String::from_utf8_lossy(&buf).into_owned(),
        Err(e) => e.to_string(),
    }
}

/// `ls -l` style mode string, e.g. `drwxr-xr-x`.
pub fn mode_string(md: &Metadata, is_link: bool) -> String {
    let kind = if is_link {
        'L'
    } else if md.is_dir() {
        'd'
    } else {
        '-'
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    let bits = permission_bits(md);
    for shift in [6u32, 3, 0] {
        let triple = (bits >> shift) & 0o7;
        out.push(if triple & 0o4 != 0 { 'r' } else { '-' });
        out.push(if triple & 0o2 != 0 { 'w' } else { '-' });
        out.push(if triple & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(unix)]
fn permission_bits(md: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(md: &Metadata) -> u32 {
    if md.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
