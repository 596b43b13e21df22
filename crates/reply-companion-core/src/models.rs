//! Core data models used throughout Reply Companion.
//!
//! These types describe the observed post, the generated reply bundle that
//! is cached per post, and the snapshot of panel state that survives a
//! panel being closed and reopened. All of them serialize to camelCase JSON,
//! which is the shape the extension scripts exchange with the host.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Number of leading characters of a post's text that make up its
/// [`Fingerprint`].
pub const FINGERPRINT_CHARS: usize = 200;

/// A single observed piece of content (e.g. a tweet).
///
/// A `Post` is never mutated after extraction. Observing a "new" post
/// replaces whatever was cached before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl Post {
    /// Creates a post, rejecting blank text.
    ///
    /// Extraction failures must surface as "no post", never as a `Post`
    /// with empty text.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let post = Self {
            text: text.into(),
            author: None,
            source_url: None,
        };
        post.validate()?;
        Ok(post)
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Checks the non-empty text invariant, for posts that arrived through
    /// deserialization rather than [`Post::new`].
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            bail!("post text must not be empty");
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

/// Identifier of a host execution context, usually a browser tab.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ContextId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for ContextId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Stable cache key derived from a post's text.
///
/// The fingerprint is the first [`FINGERPRINT_CHARS`] characters of the
/// text. Two posts sharing that prefix are the same post as far as the
/// result cache is concerned, even if author or URL differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(post: &Post) -> Self {
        Self::from_text(&post.text)
    }

    pub fn from_text(text: &str) -> Self {
        Self(text.chars().take(FINGERPRINT_CHARS).collect())
    }

    /// Wraps an already-computed key, e.g. one read back from storage.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token counts reported by the generation API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Monetary cost derived from [`UsageMetrics`], in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostMetrics {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

/// Cached output bundle for one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationArtifact {
    pub generated_text: String,
    #[serde(default)]
    pub usage: Option<UsageMetrics>,
    #[serde(default)]
    pub cost: Option<CostMetrics>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub explanation: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub last_updated: i64,
}

impl GenerationArtifact {
    pub fn new(generated_text: impl Into<String>, model: impl Into<String>, last_updated: i64) -> Self {
        Self {
            generated_text: generated_text.into(),
            usage: None,
            cost: None,
            model: model.into(),
            explanation: None,
            last_updated,
        }
    }

    /// Overrides the fields set in `patch`, leaving the rest untouched.
    pub fn apply(&mut self, patch: &ArtifactPatch) {
        if let Some(explanation) = &patch.explanation {
            self.explanation = Some(explanation.clone());
        }
        if let Some(usage) = patch.usage {
            self.usage = Some(usage);
        }
        if let Some(cost) = patch.cost {
            self.cost = Some(cost);
        }
        if let Some(model) = &patch.model {
            self.model = model.clone();
        }
        if let Some(ts) = patch.last_updated {
            self.last_updated = ts;
        }
    }
}

/// Field-level override for an existing [`GenerationArtifact`].
///
/// `generated_text` is deliberately absent: replacing the reply itself is
/// a `put`, not an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPatch {
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub usage: Option<UsageMetrics>,
    #[serde(default)]
    pub cost: Option<CostMetrics>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub last_updated: Option<i64>,
}

impl ArtifactPatch {
    pub fn explanation(text: impl Into<String>, last_updated: i64) -> Self {
        Self {
            explanation: Some(text.into()),
            last_updated: Some(last_updated),
            ..Self::default()
        }
    }
}

/// Everything the panel was last showing.
///
/// Holds the current post by value so it survives the post's cache entry
/// being replaced. A snapshot may carry a post with empty `generated_text`
/// (nothing generated yet, or generation failed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub current_post: Option<Post>,
    #[serde(default)]
    pub generated_text: String,
    #[serde(default)]
    pub usage: Option<UsageMetrics>,
    #[serde(default)]
    pub cost: Option<CostMetrics>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub last_updated: i64,
}

impl SessionSnapshot {
    pub fn current_fingerprint(&self) -> Option<Fingerprint> {
        self.current_post.as_ref().map(Fingerprint::of)
    }

    /// The cacheable artifact for the current post, if there is a post and
    /// it has a non-empty reply.
    pub fn to_artifact(&self) -> Option<(Fingerprint, GenerationArtifact)> {
        let post = self.current_post.as_ref()?;
        if self.generated_text.is_empty() {
            return None;
        }
        Some((
            Fingerprint::of(post),
            GenerationArtifact {
                generated_text: self.generated_text.clone(),
                usage: self.usage,
                cost: self.cost,
                model: self.model.clone(),
                explanation: self.explanation.clone(),
                last_updated: self.last_updated,
            },
        ))
    }

    /// Replaces every generation field with the artifact's.
    pub fn adopt(&mut self, artifact: &GenerationArtifact) {
        self.generated_text = artifact.generated_text.clone();
        self.usage = artifact.usage;
        self.cost = artifact.cost;
        self.model = artifact.model.clone();
        self.explanation = artifact.explanation.clone();
        self.last_updated = artifact.last_updated;
    }

    pub fn clear_generation(&mut self) {
        self.generated_text.clear();
        self.usage = None;
        self.cost = None;
        self.model.clear();
        self.explanation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_rejects_blank_text() {
        assert!(Post::new("").is_err());
        assert!(Post::new("   \n").is_err());
        assert!(Post::new("Hello world").is_ok());
    }

    #[test]
    fn test_fingerprint_is_prefix() {
        let short = Post::new("Hello world").unwrap();
        assert_eq!(short.fingerprint().as_str(), "Hello world");

        let long_text = "x".repeat(FINGERPRINT_CHARS + 50);
        let long = Post::new(long_text.clone()).unwrap();
        assert_eq!(long.fingerprint().as_str(), &long_text[..FINGERPRINT_CHARS]);
    }

    #[test]
    fn test_fingerprint_counts_chars_not_bytes() {
        let text = "é".repeat(FINGERPRINT_CHARS + 1);
        let fp = Fingerprint::from_text(&text);
        assert_eq!(fp.as_str().chars().count(), FINGERPRINT_CHARS);
    }

    #[test]
    fn test_fingerprint_ignores_author_and_url() {
        let a = Post::new("same text").unwrap().with_author("alice");
        let b = Post::new("same text")
            .unwrap()
            .with_author("bob")
            .with_source_url("https://x.com/bob/status/1");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_post_wire_shape() {
        let post = Post::new("hi").unwrap().with_source_url("https://x.com/a/status/1");
        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["text"], "hi");
        assert_eq!(json["sourceUrl"], "https://x.com/a/status/1");
        assert!(json.get("author").is_none());
    }

    #[test]
    fn test_patch_keeps_generated_text() {
        let mut artifact = GenerationArtifact::new("Great point", "gemini-2.0-flash", 1000);
        artifact.apply(&ArtifactPatch::explanation("Because.", 1500));
        assert_eq!(artifact.generated_text, "Great point");
        assert_eq!(artifact.explanation.as_deref(), Some("Because."));
        assert_eq!(artifact.last_updated, 1500);
        assert_eq!(artifact.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_snapshot_without_text_is_not_cacheable() {
        let snapshot = SessionSnapshot {
            current_post: Some(Post::new("X").unwrap()),
            ..SessionSnapshot::default()
        };
        assert!(snapshot.to_artifact().is_none());
        assert!(SessionSnapshot::default().to_artifact().is_none());
    }
}
