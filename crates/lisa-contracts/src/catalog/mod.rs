use indexmap::IndexMap;

use crate::chat::ImageAttachment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSpec {
    pub name: String,
    pub display_name: String,
    pub file_name: Option<String>,
    pub view: Option<String>,
}

impl PartSpec {
    /// Raw-content URL for this part: `{base}/{hyphenated-category}/{file}`.
    /// `file_name` wins when present and is taken verbatim (it already
    /// carries its extension); otherwise the view name becomes `{view}.jpg`.
    pub fn image_url(&self, asset_base: &str, category: &str) -> String {
        let base = asset_base.trim_end_matches('/');
        let file = match &self.file_name {
            Some(file_name) => file_name.clone(),
            None => format!("{}.jpg", self.view.as_deref().unwrap_or("front")),
        };
        format!("{base}/{}/{file}", slug(category))
    }

    pub fn attachment(&self, asset_base: &str, category: &str) -> ImageAttachment {
        ImageAttachment {
            url: self.image_url(asset_base, category),
            alt_text: self.display_name.clone(),
            display_name: self.display_name.clone(),
            source_name: Some(self.name.clone()),
        }
    }
}

/// Category names with internal whitespace are normalized to hyphens before
/// being placed in a URL path segment.
pub fn slug(category: &str) -> String {
    category
        .trim()
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join("-")
}

/// Ordered keyword -> candidate-parts table. The table is injected at
/// construction so distinct sessions and tests can carry distinct mappings;
/// iteration order is insertion order and doubles as the interceptor's scan
/// order.
#[derive(Debug, Clone)]
pub struct PartCatalog {
    parts: IndexMap<String, Vec<PartSpec>>,
}

impl PartCatalog {
    pub fn new(parts: Option<IndexMap<String, Vec<PartSpec>>>) -> Self {
        Self {
            parts: parts.unwrap_or_else(default_parts),
        }
    }

    /// First candidate for a keyword. Candidate order is stable, so the
    /// pick is deterministic.
    pub fn first(&self, keyword: &str) -> Option<&PartSpec> {
        self.parts.get(keyword).and_then(|candidates| candidates.first())
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }
}

/// Maps a recognized keyword to zero or one image resource descriptor.
/// A miss is a negative result, never an error; callers fall through to the
/// remote assistant.
pub trait ResolveImage {
    fn resolve(&self, keyword: &str) -> Option<ImageAttachment>;
}

/// Static resolver backed by an in-memory catalog table.
#[derive(Debug, Clone)]
pub struct CatalogResolver {
    catalog: PartCatalog,
    asset_base: String,
}

impl CatalogResolver {
    pub fn new(catalog: PartCatalog, asset_base: impl Into<String>) -> Self {
        Self {
            catalog,
            asset_base: asset_base.into(),
        }
    }
}

impl ResolveImage for CatalogResolver {
    fn resolve(&self, keyword: &str) -> Option<ImageAttachment> {
        self.catalog
            .first(keyword)
            .map(|part| part.attachment(&self.asset_base, keyword))
    }
}

fn default_parts() -> IndexMap<String, Vec<PartSpec>> {
    let mut map = IndexMap::new();

    let mut insert = |keyword: &str, candidates: &[(&str, &str, Option<&str>, Option<&str>)]| {
        map.insert(
            keyword.to_string(),
            candidates
                .iter()
                .map(|(name, display_name, file_name, view)| PartSpec {
                    name: (*name).to_string(),
                    display_name: (*display_name).to_string(),
                    file_name: file_name.map(str::to_string),
                    view: view.map(str::to_string),
                })
                .collect(),
        );
    };

    insert(
        "event recorder",
        &[
            ("event_recorder", "Event Recorder", None, Some("front")),
            ("event_recorder_open", "Event Recorder (open)", None, Some("internals")),
        ],
    );
    insert(
        "caboose",
        &[
            ("caboose", "Caboose", None, Some("rear")),
            ("caboose_interior", "Caboose Interior", Some("interior.png"), None),
        ],
    );
    insert(
        "pantograph",
        &[("pantograph", "Pantograph", None, Some("raised"))],
    );
    insert(
        "coupler",
        &[
            ("knuckle_coupler", "Knuckle Coupler", None, Some("side")),
            ("coupler_detail", "Coupler Detail", Some("detail.jpeg"), None),
        ],
    );
    insert(
        "bogie",
        &[("bogie", "Bogie", None, Some("underframe"))],
    );
    insert(
        "air brake",
        &[("air_brake", "Air Brake", None, Some("valve"))],
    );
    insert(
        "horn",
        &[("air_horn", "Air Horn", None, Some("cluster"))],
    );

    map
}
