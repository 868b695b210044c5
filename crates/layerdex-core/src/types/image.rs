//! Image provenance attached to indexed layers.

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};

/// Registry assumed for references without an explicit host.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Namespace of single-segment references on the default registry.
pub const DEFAULT_NAMESPACE: &str = "library";

const DEFAULT_TAG: &str = "latest";

/// Which image reference a layer scan came from.
///
/// Empty strings mean "unknown" and are persisted as NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageContext {
    /// e.g. `ghcr.io`, `docker.io`
    #[serde(default)]
    pub registry: String,
    /// First path segment, e.g. `chainguard`, `library`
    #[serde(default)]
    pub namespace: String,
    /// Remaining path after the namespace, e.g. `nginx`
    #[serde(default)]
    pub repository: String,
    /// Empty for digest-only references
    #[serde(default)]
    pub tag: String,
    /// Full normalized reference, e.g. `ghcr.io/chainguard/nginx:latest`
    #[serde(default)]
    pub image_ref: String,
}

impl ImageContext {
    /// Parse and normalize an image reference.
    ///
    /// ```
    /// use layerdex_core::ImageContext;
    ///
    /// let ctx = ImageContext::parse("ubuntu").unwrap();
    /// assert_eq!(ctx.registry, "docker.io");
    /// assert_eq!(ctx.namespace, "library");
    /// assert_eq!(ctx.repository, "ubuntu");
    /// assert_eq!(ctx.tag, "latest");
    /// assert_eq!(ctx.image_ref, "docker.io/library/ubuntu:latest");
    /// ```
    pub fn parse(reference: &str) -> Result<Self> {
        let parts = ReferenceParts::parse(reference)?;
        let tag = match (&parts.tag, &parts.digest) {
            (Some(tag), _) => tag.clone(),
            (None, None) => DEFAULT_TAG.to_string(),
            (None, Some(_)) => String::new(),
        };

        let mut image_ref = format!("{}/", parts.registry);
        if !parts.namespace.is_empty() {
            image_ref.push_str(&parts.namespace);
            image_ref.push('/');
        }
        image_ref.push_str(&parts.repository);
        if !tag.is_empty() {
            image_ref.push(':');
            image_ref.push_str(&tag);
        }
        if let Some(digest) = &parts.digest {
            image_ref.push('@');
            image_ref.push_str(digest);
        }

        Ok(Self {
            registry: parts.registry,
            namespace: parts.namespace,
            repository: parts.repository,
            tag,
            image_ref,
        })
    }

    pub fn registry(&self) -> Option<&str> {
        non_empty(&self.registry)
    }

    pub fn namespace(&self) -> Option<&str> {
        non_empty(&self.namespace)
    }

    pub fn repository(&self) -> Option<&str> {
        non_empty(&self.repository)
    }

    pub fn tag(&self) -> Option<&str> {
        non_empty(&self.tag)
    }

    pub fn image_ref(&self) -> Option<&str> {
        non_empty(&self.image_ref)
    }
}

/// Provenance filter for layer and file queries.
///
/// Every field is optional; set fields are combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFilter {
    pub registry: Option<String>,
    pub namespace: Option<String>,
    pub repository: Option<String>,
    pub tag: Option<String>,
    pub image_ref: Option<String>,
}

impl ImageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the parts spelled out in `reference`.
    ///
    /// Unlike [`ImageContext::parse`] no default tag is assumed, so `nginx`
    /// matches every tag of `docker.io/library/nginx`.
    pub fn from_reference(reference: &str) -> Result<Self> {
        let parts = ReferenceParts::parse(reference)?;
        Ok(Self {
            registry: Some(parts.registry),
            namespace: non_empty(&parts.namespace).map(str::to_string),
            repository: Some(parts.repository),
            tag: parts.tag,
            image_ref: None,
        })
    }

    pub fn registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions().next().is_none()
    }

    /// `(column, value)` pairs for every set field.
    ///
    /// Empty strings count as unset: missing provenance is stored as NULL, so
    /// an empty value could never match and is dropped instead.
    pub fn conditions(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("registry", &self.registry),
            ("namespace", &self.namespace),
            ("repository", &self.repository),
            ("tag", &self.tag),
            ("image_ref", &self.image_ref),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.as_deref().and_then(non_empty).map(|v| (column, v)))
    }
}

impl From<&ImageContext> for ImageFilter {
    fn from(ctx: &ImageContext) -> Self {
        Self {
            registry: ctx.registry().map(str::to_string),
            namespace: ctx.namespace().map(str::to_string),
            repository: ctx.repository().map(str::to_string),
            tag: ctx.tag().map(str::to_string),
            image_ref: None,
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

struct ReferenceParts {
    registry: String,
    namespace: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ReferenceParts {
    fn parse(reference: &str) -> Result<Self> {
        let invalid = |why: &str| {
            IndexError::Validation(format!("invalid image reference '{}': {}", reference, why))
        };

        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (name_and_tag, digest) = match trimmed.split_once('@') {
            Some((_, "")) => return Err(invalid("empty digest")),
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (trimmed, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones are host ports
        let last_slash = name_and_tag.rfind('/');
        let (name, tag) = match name_and_tag.rfind(':') {
            Some(idx) if last_slash.map_or(true, |slash| idx > slash) => {
                (&name_and_tag[..idx], Some(&name_and_tag[idx + 1..]))
            }
            _ => (name_and_tag, None),
        };
        if tag == Some("") {
            return Err(invalid("empty tag"));
        }

        let mut segments: Vec<&str> = name.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("empty path segment"));
        }

        let registry = if segments.len() > 1 && is_registry_host(segments[0]) {
            normalize_registry(segments.remove(0))
        } else {
            DEFAULT_REGISTRY.to_string()
        };

        let (namespace, repository) = match segments.as_slice() {
            [repo] if registry == DEFAULT_REGISTRY => {
                (DEFAULT_NAMESPACE.to_string(), repo.to_string())
            }
            [repo] => (String::new(), repo.to_string()),
            [ns, rest @ ..] => (ns.to_string(), rest.join("/")),
            [] => return Err(invalid("missing repository")),
        };

        Ok(Self {
            registry,
            namespace,
            repository,
            tag: tag.map(str::to_string),
            digest,
        })
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

fn normalize_registry(host: &str) -> String {
    match host {
        "index.docker.io" | "registry-1.docker.io" => DEFAULT_REGISTRY.to_string(),
        other => other.to_string(),
    }
}
