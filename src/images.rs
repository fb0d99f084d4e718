//! Image selection for news articles.
//!
//! Every article leaves the pipeline with an absolute image URL. A candidate
//! URL supplied by the source is kept when [`ImageCatalog::valid_image_url`]
//! accepts it; otherwise a keyword-matched stock image is picked from the
//! article text, and failing that a random space placeholder.

use std::sync::Mutex;

use once_cell::sync::Lazy;
use rand::{rngs::StdRng, seq::IndexedRandom, Rng, SeedableRng};
use regex::Regex;
use serde::Deserialize;

static YOUTUBE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.*(youtu\.be/|v/|u/\w/|embed/|watch\?v=|&v=)([^#&?]*).*")
        .expect("youtube id pattern is valid")
});

static ABSOLUTE_HTTP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://").expect("http pattern is valid"));

const DEFAULT_BLOCKED: &[&str] = &["google", "gstatic"];

const DEFAULT_PLACEHOLDERS: &[&str] = &[
    "https://images.unsplash.com/photo-1451187580459-43490279c0fa?q=80&w=1000&auto=format&fit=crop",
    "https://images.unsplash.com/photo-1446776811953-b23d57bd21aa?q=80&w=1000&auto=format&fit=crop",
    "https://images.unsplash.com/photo-1462331940025-496dfbfc7564?q=80&w=1000&auto=format&fit=crop",
    "https://images.unsplash.com/photo-1541873676-a18131494184?q=80&w=1000&auto=format&fit=crop",
    "https://images.unsplash.com/photo-1614730341194-75c60740a070?q=80&w=1000&auto=format&fit=crop",
    "https://images.unsplash.com/photo-1454789548728-85d2696cfb93?q=80&w=1000&auto=format&fit=crop",
    "https://images.unsplash.com/photo-1516339901601-2e1b62dc0c45?q=80&w=1000&auto=format&fit=crop",
    "https://images.unsplash.com/photo-1614728853975-69c960c72217?q=80&w=1000&auto=format&fit=crop",
    "https://images.unsplash.com/photo-1517976487492-5750f3195933?q=80&w=1000&auto=format&fit=crop",
];

// Order matters: the first keyword found in the text wins.
const DEFAULT_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "rocket",
        &[
            "https://images.unsplash.com/photo-1517976487492-5750f3195933?q=80&w=1000&auto=format&fit=crop",
            "https://images.unsplash.com/photo-1541873676-a18131494184?q=80&w=1000&auto=format&fit=crop",
        ],
    ),
    (
        "launch",
        &[
            "https://images.unsplash.com/photo-1517976487492-5750f3195933?q=80&w=1000&auto=format&fit=crop",
            "https://images.unsplash.com/photo-1636819488524-1f019c4e1c44?q=80&w=1000&auto=format&fit=crop",
        ],
    ),
    (
        "mars",
        &[
            "https://images.unsplash.com/photo-1614728853975-69c960c72217?q=80&w=1000&auto=format&fit=crop",
            "https://images.unsplash.com/photo-1571275339838-c43cb88d6dc0?q=80&w=1000&auto=format&fit=crop",
        ],
    ),
    (
        "moon",
        &[
            "https://images.unsplash.com/photo-1522030299830-16b8d3d049fe?q=80&w=1000&auto=format&fit=crop",
            "https://images.unsplash.com/photo-1532274402911-5a369e4c4bb5?q=80&w=1000&auto=format&fit=crop",
        ],
    ),
    (
        "galaxy",
        &[
            "https://images.unsplash.com/photo-1462331940025-496dfbfc7564?q=80&w=1000&auto=format&fit=crop",
            "https://images.unsplash.com/photo-1538370965046-79c0d6907d00?q=80&w=1000&auto=format&fit=crop",
        ],
    ),
    (
        "star",
        &["https://images.unsplash.com/photo-1614730341194-75c60740a070?q=80&w=1000&auto=format&fit=crop"],
    ),
    (
        "sun",
        &["https://images.unsplash.com/photo-1532187863486-abf9dbad1b69?q=80&w=1000&auto=format&fit=crop"],
    ),
    (
        "nasa",
        &["https://images.unsplash.com/photo-1454789548728-85d2696cfb93?q=80&w=1000&auto=format&fit=crop"],
    ),
];

/// Static image tables: blocked hosts, keyword image sets and the
/// placeholder pool. Loaded once from the `[images]` config section.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageCatalog {
    /// Substrings that disqualify a candidate image URL
    pub blocked: Vec<String>,
    /// Space-themed images used when nothing better is found
    pub placeholders: Vec<String>,
    pub keywords: Vec<KeywordImages>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct KeywordImages {
    pub keyword: String,
    pub images: Vec<String>,
}

impl Default for ImageCatalog {
    fn default() -> Self {
        Self {
            blocked: DEFAULT_BLOCKED.iter().map(|s| s.to_string()).collect(),
            placeholders: DEFAULT_PLACEHOLDERS.iter().map(|s| s.to_string()).collect(),
            keywords: DEFAULT_KEYWORDS
                .iter()
                .map(|(keyword, images)| KeywordImages {
                    keyword: keyword.to_string(),
                    images: images.iter().map(|s| s.to_string()).collect(),
                })
                .collect(),
        }
    }
}

impl ImageCatalog {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.placeholders.is_empty() {
            anyhow::bail!("images.placeholders must not be empty");
        }
        for url in self.placeholders.iter().chain(self.keywords.iter().flat_map(|k| &k.images)) {
            if !ABSOLUTE_HTTP.is_match(url) {
                anyhow::bail!("image '{}' is not an absolute http(s) URL", url);
            }
        }
        for entry in &self.keywords {
            if entry.keyword.trim().is_empty() || entry.images.is_empty() {
                anyhow::bail!("keyword image entry '{}' needs a keyword and at least one image", entry.keyword);
            }
        }
        Ok(())
    }

    /// Returns the URL to use for a candidate image, or `None` when the
    /// candidate is unusable. YouTube links become their thumbnail.
    pub fn valid_image_url(&self, url: &str) -> Option<String> {
        if url.is_empty() {
            return None;
        }

        let lower = url.to_lowercase();

        if lower.contains("youtube.com") || lower.contains("youtu.be") {
            if let Some(thumb) = youtube_thumbnail(url) {
                return Some(thumb);
            }
        }

        if !ABSOLUTE_HTTP.is_match(url) {
            return None;
        }

        if self.blocked.iter().any(|b| lower.contains(&b.to_lowercase())) {
            return None;
        }

        Some(url.to_string())
    }

    /// First keyword entry whose keyword appears in `text`.
    pub fn keyword_for(&self, text: &str) -> Option<&KeywordImages> {
        let lower = text.to_lowercase();
        self.keywords
            .iter()
            .find(|entry| !entry.images.is_empty() && lower.contains(&entry.keyword.to_lowercase()))
    }

    pub fn image_for_keyword<R: Rng + ?Sized>(&self, text: &str, rng: &mut R) -> Option<String> {
        self.keyword_for(text)
            .and_then(|entry| entry.images.choose(rng))
            .cloned()
    }

    pub fn random_placeholder<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        match self.placeholders.choose(rng) {
            Some(url) => url.clone(),
            None => DEFAULT_PLACEHOLDERS[rng.random_range(0..DEFAULT_PLACEHOLDERS.len())].to_string(),
        }
    }
}

/// Thumbnail URL for a YouTube link with an 11 character video id.
pub fn youtube_thumbnail(url: &str) -> Option<String> {
    let caps = YOUTUBE_ID.captures(url)?;
    let id = caps.get(2)?.as_str();
    if id.len() == 11 {
        Some(format!("https://img.youtube.com/vi/{}/maxresdefault.jpg", id))
    } else {
        None
    }
}

/// Resolves a final image for an article. Owns the catalog and the random
/// source used by the keyword and placeholder tiers.
pub struct ImageResolver {
    catalog: ImageCatalog,
    rng: Mutex<StdRng>,
}

impl ImageResolver {
    pub fn new(catalog: ImageCatalog) -> Self {
        Self::with_rng(catalog, StdRng::from_os_rng())
    }

    pub fn with_seed(catalog: ImageCatalog, seed: u64) -> Self {
        Self::with_rng(catalog, StdRng::seed_from_u64(seed))
    }

    fn with_rng(catalog: ImageCatalog, rng: StdRng) -> Self {
        Self {
            catalog,
            rng: Mutex::new(rng),
        }
    }

    pub fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    /// Never returns an empty string.
    pub fn resolve(&self, candidate: Option<&str>, context: &str) -> String {
        if let Some(valid) = candidate.and_then(|c| self.catalog.valid_image_url(c)) {
            return valid;
        }

        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.catalog
            .image_for_keyword(context, &mut *rng)
            .unwrap_or_else(|| self.catalog.random_placeholder(&mut *rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ImageResolver {
        ImageResolver::with_seed(ImageCatalog::default(), 7)
    }

    mod valid_image_url_tests {
        use super::*;

        #[test]
        fn test_accepts_plain_https_url() {
            let catalog = ImageCatalog::default();
            let url = "https://cdn.example.com/launch.jpg";
            assert_eq!(catalog.valid_image_url(url), Some(url.to_string()));
        }

        #[test]
        fn test_accepts_uppercase_scheme() {
            let catalog = ImageCatalog::default();
            assert!(catalog.valid_image_url("HTTP://cdn.example.com/a.png").is_some());
        }

        #[test]
        fn test_rejects_relative_and_other_schemes() {
            let catalog = ImageCatalog::default();
            assert_eq!(catalog.valid_image_url("/images/a.png"), None);
            assert_eq!(catalog.valid_image_url("ftp://example.com/a.png"), None);
            assert_eq!(catalog.valid_image_url("data:image/png;base64,AAAA"), None);
            assert_eq!(catalog.valid_image_url(""), None);
        }

        #[test]
        fn test_rejects_blocked_hosts() {
            let catalog = ImageCatalog::default();
            assert_eq!(
                catalog.valid_image_url("https://lh3.googleusercontent.com/abc=s0-w300"),
                None
            );
            assert_eq!(
                catalog.valid_image_url("https://encrypted-tbn0.GSTATIC.com/images?q=tbn"),
                None
            );
            assert_eq!(catalog.valid_image_url("https://news.google.com/logo.png"), None);
        }

        #[test]
        fn test_custom_block_list() {
            let catalog = ImageCatalog {
                blocked: vec!["badcdn".to_string()],
                ..ImageCatalog::default()
            };
            assert_eq!(catalog.valid_image_url("https://badcdn.net/x.jpg"), None);
            assert!(catalog.valid_image_url("https://lh3.googleusercontent.com/x").is_some());
        }
    }

    mod youtube_tests {
        use super::*;

        #[test]
        fn test_short_link() {
            assert_eq!(
                youtube_thumbnail("https://youtu.be/dQw4w9WgXcQ"),
                Some("https://img.youtube.com/vi/dQw4w9WgXcQ/maxresdefault.jpg".to_string())
            );
        }

        #[test]
        fn test_watch_link_with_extra_params() {
            assert_eq!(
                youtube_thumbnail("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s"),
                Some("https://img.youtube.com/vi/dQw4w9WgXcQ/maxresdefault.jpg".to_string())
            );
        }

        #[test]
        fn test_embed_link() {
            assert_eq!(
                youtube_thumbnail("https://www.youtube.com/embed/dQw4w9WgXcQ"),
                Some("https://img.youtube.com/vi/dQw4w9WgXcQ/maxresdefault.jpg".to_string())
            );
        }

        #[test]
        fn test_wrong_id_length() {
            assert_eq!(youtube_thumbnail("https://youtu.be/short"), None);
        }

        #[test]
        fn test_catalog_rewrites_youtube_candidates() {
            let catalog = ImageCatalog::default();
            assert_eq!(
                catalog.valid_image_url("https://youtu.be/dQw4w9WgXcQ"),
                Some("https://img.youtube.com/vi/dQw4w9WgXcQ/maxresdefault.jpg".to_string())
            );
        }

        #[test]
        fn test_youtube_without_id_kept_as_plain_url() {
            let catalog = ImageCatalog::default();
            let url = "https://www.youtube.com/channel/UC123";
            assert_eq!(catalog.valid_image_url(url), Some(url.to_string()));
        }
    }

    mod keyword_tests {
        use super::*;

        #[test]
        fn test_first_matching_keyword_wins() {
            let catalog = ImageCatalog::default();
            // "rocket" precedes "mars" in the table
            let entry = catalog.keyword_for("A Rocket bound for MARS").unwrap();
            assert_eq!(entry.keyword, "rocket");
        }

        #[test]
        fn test_keyword_image_comes_from_its_set() {
            let catalog = ImageCatalog::default();
            let mut rng = StdRng::seed_from_u64(1);
            let image = catalog.image_for_keyword("new galaxy survey", &mut rng).unwrap();
            let galaxy = catalog.keywords.iter().find(|k| k.keyword == "galaxy").unwrap();
            assert!(galaxy.images.contains(&image));
        }

        #[test]
        fn test_no_keyword_match() {
            let catalog = ImageCatalog::default();
            let mut rng = StdRng::seed_from_u64(1);
            assert_eq!(catalog.image_for_keyword("budget hearing", &mut rng), None);
        }

        #[test]
        fn test_placeholder_from_pool() {
            let catalog = ImageCatalog::default();
            let mut rng = StdRng::seed_from_u64(3);
            let image = catalog.random_placeholder(&mut rng);
            assert!(catalog.placeholders.contains(&image));
        }

        #[test]
        fn test_empty_pool_still_yields_image() {
            let catalog = ImageCatalog {
                placeholders: vec![],
                ..ImageCatalog::default()
            };
            let mut rng = StdRng::seed_from_u64(3);
            assert!(catalog.random_placeholder(&mut rng).starts_with("https://"));
        }
    }

    mod resolve_tests {
        use super::*;

        #[test]
        fn test_valid_candidate_is_kept() {
            let url = "https://cdn.example.com/artemis.jpg";
            assert_eq!(resolver().resolve(Some(url), "anything"), url);
        }

        #[test]
        fn test_blocked_candidate_falls_back_to_keyword() {
            let r = resolver();
            let image = r.resolve(Some("https://lh3.googleusercontent.com/x"), "Mars rover update");
            let mars = r.catalog().keywords.iter().find(|k| k.keyword == "mars").unwrap();
            assert!(mars.images.contains(&image));
        }

        #[test]
        fn test_missing_candidate_without_keyword_uses_placeholder() {
            let r = resolver();
            let image = r.resolve(None, "quarterly report");
            assert!(r.catalog().placeholders.contains(&image));
        }

        #[test]
        fn test_same_seed_same_choices() {
            let a = ImageResolver::with_seed(ImageCatalog::default(), 99);
            let b = ImageResolver::with_seed(ImageCatalog::default(), 99);
            for _ in 0..10 {
                assert_eq!(a.resolve(None, ""), b.resolve(None, ""));
            }
        }

        #[test]
        fn test_result_is_always_absolute_and_unblocked() {
            let r = resolver();
            let candidates = [
                None,
                Some(""),
                Some("not a url"),
                Some("//cdn.example.com/a.jpg"),
                Some("https://www.gstatic.com/logo.png"),
                Some("https://youtu.be/abc"),
                Some("https://example.com/ok.jpg"),
            ];
            let contexts = ["", "rocket launch", "sunrise", "nothing relevant"];

            for candidate in candidates {
                for context in contexts {
                    let image = r.resolve(candidate, context);
                    assert!(!image.is_empty());
                    assert!(ABSOLUTE_HTTP.is_match(&image), "not absolute: {}", image);
                    assert!(!image.contains("google") && !image.contains("gstatic"));
                }
            }
        }
    }

    mod validate_tests {
        use super::*;

        #[test]
        fn test_default_catalog_is_valid() {
            assert!(ImageCatalog::default().validate().is_ok());
        }

        #[test]
        fn test_rejects_empty_pool() {
            let catalog = ImageCatalog {
                placeholders: vec![],
                ..ImageCatalog::default()
            };
            assert!(catalog.validate().is_err());
        }

        #[test]
        fn test_rejects_relative_placeholder() {
            let catalog = ImageCatalog {
                placeholders: vec!["/static/space.jpg".to_string()],
                ..ImageCatalog::default()
            };
            assert!(catalog.validate().is_err());
        }

        #[test]
        fn test_rejects_keyword_without_images() {
            let mut catalog = ImageCatalog::default();
            catalog.keywords.push(KeywordImages {
                keyword: "comet".to_string(),
                images: vec![],
            });
            assert!(catalog.validate().is_err());
        }
    }
}
