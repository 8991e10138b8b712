use std::fmt;

pub static DEFAULT_REGISTRY: &str = "docker.io";
static DEFAULT_TAG: &str = "latest";
static OFFICIAL_IMAGE_NAMESPACE: &str = "library";

/// A compose `image:` value normalized into registry, repository and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub raw: String,
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

#[derive(Debug)]
pub enum ParseError {
    Empty,
    MissingRepository(String),
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "image reference is empty"),
            ParseError::MissingRepository(image) => {
                write!(f, "repository is missing in image reference: {}", image)
            }
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl ImageReference {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let s = raw.trim().trim_matches('"').trim_matches('\'');

        // digests are ignored, only the tag drives upgrade suggestions
        let s = match s.split_once('@') {
            Some((name, _digest)) => name.trim(),
            None => s,
        };
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        // A colon only separates the tag when it comes after the last slash,
        // otherwise it belongs to a registry port
        let (name, tag) = match s.rfind(':') {
            Some(pos) if s.rfind('/').is_none_or(|slash| pos > slash) => {
                (s[..pos].trim(), s[pos + 1..].trim().to_string())
            }
            _ => (s, DEFAULT_TAG.to_string()),
        };

        let (registry, repository) = match name.split_once('/') {
            None => (
                DEFAULT_REGISTRY.to_string(),
                format!("{}/{}", OFFICIAL_IMAGE_NAMESPACE, name),
            ),
            Some((first, rest)) if is_registry_host(first) => (first.to_string(), rest.to_string()),
            Some(_) => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if repository.is_empty() || repository.ends_with('/') {
            return Err(ParseError::MissingRepository(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            registry,
            repository,
            tag,
        })
    }

    pub fn is_docker_hub(&self) -> bool {
        self.registry == DEFAULT_REGISTRY
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(raw: &str) -> (String, String, String) {
        let r = ImageReference::parse(raw).expect("reference should parse");
        (r.registry, r.repository, r.tag)
    }

    #[test]
    fn test_official_image_gets_library_namespace() {
        assert_eq!(
            parts("nginx:1.25"),
            ("docker.io".into(), "library/nginx".into(), "1.25".into())
        );
    }

    #[test]
    fn test_missing_tag_defaults_to_latest() {
        assert_eq!(
            parts("homeassistant/home-assistant"),
            (
                "docker.io".into(),
                "homeassistant/home-assistant".into(),
                "latest".into()
            )
        );
    }

    #[test]
    fn test_registry_host_is_detected() {
        assert_eq!(
            parts("ghcr.io/home-assistant/home-assistant:2024.6"),
            (
                "ghcr.io".into(),
                "home-assistant/home-assistant".into(),
                "2024.6".into()
            )
        );
        assert_eq!(
            parts("localhost/app"),
            ("localhost".into(), "app".into(), "latest".into())
        );
    }

    #[test]
    fn test_registry_port_is_not_a_tag() {
        assert_eq!(
            parts("registry.local:5000/team/app"),
            (
                "registry.local:5000".into(),
                "team/app".into(),
                "latest".into()
            )
        );
        assert_eq!(
            parts("registry.local:5000/team/app:1.2.3"),
            ("registry.local:5000".into(), "team/app".into(), "1.2.3".into())
        );
    }

    #[test]
    fn test_digest_and_quotes_are_stripped() {
        let r = ImageReference::parse("\"redis:7-alpine@sha256:abcdef\"").unwrap();
        assert_eq!(r.repository, "library/redis");
        assert_eq!(r.tag, "7-alpine");
        assert_eq!(r.raw, "\"redis:7-alpine@sha256:abcdef\"");
        assert_eq!(r.to_string(), "docker.io/library/redis:7-alpine");
    }

    #[test]
    fn test_empty_reference_is_rejected() {
        assert!(matches!(ImageReference::parse("  "), Err(ParseError::Empty)));
        assert!(matches!(
            ImageReference::parse("@sha256:abc"),
            Err(ParseError::Empty)
        ));
    }

    #[test]
    fn test_is_docker_hub() {
        assert!(ImageReference::parse("nodered/node-red:3.1").unwrap().is_docker_hub());
        assert!(!ImageReference::parse("quay.io/org/app:1").unwrap().is_docker_hub());
    }
}
