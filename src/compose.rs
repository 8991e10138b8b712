//! Discovery of compose files and extraction of their `image:` references.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

pub static DEFAULT_COMPOSE_GLOB: &str = "**/docker-compose*.yml";

static IMAGE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*image\s*:\s*(.+?)\s*$").expect("image line pattern is valid")
});

/// Raw image string -> compose files (relative to the search root) using it.
pub type ImageUsage = BTreeMap<String, BTreeSet<String>>;

/// Returns the sorted regular files under `root` whose root-relative path
/// matches `pattern`.
pub fn find_compose_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .with_context(|| format!("Invalid compose file glob: {}", pattern))?
        .compile_matcher();

    let mut files = Vec::new();
    collect_matching(root, root, &matcher, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_matching(
    root: &Path,
    dir: &Path,
    matcher: &GlobMatcher,
    out: &mut Vec<PathBuf>,
) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_matching(root, &path, matcher, out)?;
        } else if path.is_file() {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if matcher.is_match(relative) {
                out.push(path);
            }
        }
    }
    Ok(())
}

pub fn extract_images(path: &Path) -> Result<BTreeSet<String>> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read compose file {}", path.display()))?;
    let content = String::from_utf8_lossy(&bytes);

    match extract_images_structured(&content) {
        Ok(images) if !images.is_empty() => return Ok(images),
        Ok(_) => debug!("No services.*.image found in {}, scanning lines", path.display()),
        Err(e) => warn!(
            "Failed to parse {} as YAML ({}), scanning lines",
            path.display(),
            e
        ),
    }

    Ok(extract_images_by_line(&content))
}

fn extract_images_structured(content: &str) -> Result<BTreeSet<String>, serde_yaml_ng::Error> {
    let mut images = BTreeSet::new();

    for document in serde_yaml_ng::Deserializer::from_str(content) {
        let value = serde_yaml_ng::Value::deserialize(document)?;
        let Some(services) = value.get("services").and_then(|s| s.as_mapping()) else {
            continue;
        };
        for service in services.values() {
            if let Some(image) = service.get("image").and_then(|i| i.as_str()) {
                let image = image.trim();
                if !image.is_empty() {
                    images.insert(image.to_string());
                }
            }
        }
    }
    Ok(images)
}

fn extract_images_by_line(content: &str) -> BTreeSet<String> {
    content
        .lines()
        .filter_map(|line| IMAGE_LINE.captures(line))
        .map(|caps| {
            caps[1]
                .trim()
                .trim_matches('"')
                .trim_matches('\'')
                .to_string()
        })
        .filter(|image| !image.is_empty())
        .collect()
}

/// Collects every image referenced by `files`, keyed by raw image string.
pub fn collect_usage(root: &Path, files: &[PathBuf]) -> Result<ImageUsage> {
    let mut usage = ImageUsage::new();
    for file in files {
        let relative = file
            .strip_prefix(root)
            .unwrap_or(file)
            .to_string_lossy()
            .into_owned();
        for image in extract_images(file)? {
            usage.entry(image).or_default().insert(relative.clone());
        }
    }
    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) -> PathBuf {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_find_compose_files_matches_root_and_nested() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "docker-compose.yml", "");
        write(dir.path(), "stacks/media/docker-compose.override.yml", "");
        write(dir.path(), "stacks/media/compose.yaml", "");
        write(dir.path(), "stacks/docker-compose.yml.bak", "");

        let files = find_compose_files(dir.path(), DEFAULT_COMPOSE_GLOB).unwrap();
        let relative: Vec<_> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            relative,
            vec![
                "docker-compose.yml",
                "stacks/media/docker-compose.override.yml"
            ]
        );
    }

    #[test]
    fn test_find_compose_files_single_star_stays_in_directory() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "docker-compose.yml", "");
        write(dir.path(), "nested/docker-compose.yml", "");

        let files = find_compose_files(dir.path(), "docker-compose*.yml").unwrap();

        assert_eq!(files, vec![dir.path().join("docker-compose.yml")]);
    }

    #[test]
    fn test_find_compose_files_rejects_invalid_glob() {
        let dir = TempDir::new().unwrap();
        assert!(find_compose_files(dir.path(), "**/[docker").is_err());
    }

    #[test]
    fn test_extract_images_from_all_documents() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "docker-compose.yml",
            r#"
services:
  homeassistant:
    image: "ghcr.io/home-assistant/home-assistant:2024.6"
  mqtt:
    image: eclipse-mosquitto:2.0
  builder:
    build: .
---
services:
  nodered:
    image: nodered/node-red:3.1
  blank:
    image: "  "
"#,
        );

        let images = extract_images(&path).unwrap();

        assert_eq!(
            images.into_iter().collect::<Vec<_>>(),
            vec![
                "eclipse-mosquitto:2.0",
                "ghcr.io/home-assistant/home-assistant:2024.6",
                "nodered/node-red:3.1",
            ]
        );
    }

    #[test]
    fn test_extract_images_falls_back_to_line_scan() {
        let dir = TempDir::new().unwrap();
        // unterminated flow sequence makes the document invalid YAML
        let path = write(
            dir.path(),
            "docker-compose.yml",
            "services:\n  app:\n    image: 'redis:7-alpine'\n    ports: [6379\n",
        );

        let images = extract_images(&path).unwrap();

        assert_eq!(images.into_iter().collect::<Vec<_>>(), vec!["redis:7-alpine"]);
    }

    #[test]
    fn test_collect_usage_groups_files_per_image() {
        let dir = TempDir::new().unwrap();
        let a = write(
            dir.path(),
            "a/docker-compose.yml",
            "services:\n  db:\n    image: postgres:16\n",
        );
        let b = write(
            dir.path(),
            "b/docker-compose.yml",
            "services:\n  db:\n    image: postgres:16\n  cache:\n    image: redis:7\n",
        );

        let usage = collect_usage(dir.path(), &[a, b]).unwrap();

        assert_eq!(usage.len(), 2);
        assert_eq!(
            usage["postgres:16"].iter().collect::<Vec<_>>(),
            vec!["a/docker-compose.yml", "b/docker-compose.yml"]
        );
        assert_eq!(
            usage["redis:7"].iter().collect::<Vec<_>>(),
            vec!["b/docker-compose.yml"]
        );
    }
}
