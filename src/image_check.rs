use crate::compose::ImageUsage;
use crate::docker_hub::{CachedTagLister, TagLister};
use crate::image_reference::ImageReference;
use crate::tag_heuristic::{choose_newer_tag, is_floating, NoUpgradeReason, Suggestion};
use colored::Colorize;
use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, warn};

static UNSUPPORTED_NOTE: &str = "non-Docker Hub registry; tag listing not implemented";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Upgrade,
    Current,
    Floating,
    Unsupported,
    Error,
}

impl ImageStatus {
    fn label(&self) -> &'static str {
        match self {
            ImageStatus::Upgrade => "UPGRADE",
            ImageStatus::Current => "CURRENT",
            ImageStatus::Floating => "FLOATING",
            ImageStatus::Unsupported => "UNSUPPORTED",
            ImageStatus::Error => "ERROR",
        }
    }

    fn paint(&self, text: &str) -> String {
        match self {
            ImageStatus::Upgrade | ImageStatus::Error => text.red().to_string(),
            ImageStatus::Current => text.green().to_string(),
            ImageStatus::Floating | ImageStatus::Unsupported => text.yellow().to_string(),
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// One row of the report: an image, its verdict and where it is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCheck {
    pub reference: ImageReference,
    pub status: ImageStatus,
    pub new_tag: Option<String>,
    pub note: String,
    pub used_in: BTreeSet<String>,
}

/// Output options decided by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    pub color: bool,
}

/// Evaluates every image in `usage`, in raw-string order.
///
/// Every image yields one row. Only Docker Hub images are looked up. An
/// unparsable image or a failed lookup turns into an [`ImageStatus::Error`]
/// row and does not stop the remaining images.
pub async fn check_images<L: TagLister>(
    usage: &ImageUsage,
    lister: &mut CachedTagLister<L>,
) -> Vec<ImageCheck> {
    let mut checks = Vec::with_capacity(usage.len());

    for (raw, used_in) in usage {
        let (reference, (status, new_tag, note)) = match ImageReference::parse(raw) {
            Ok(reference) => {
                let verdict = check_image(&reference, lister).await;
                (reference, verdict)
            }
            Err(e) => {
                warn!("Cannot parse image {:?}: {}", raw, e);
                (unparsed(raw), (ImageStatus::Error, None, e.to_string()))
            }
        };
        debug!("{} -> {} ({})", reference, status.label(), note);

        checks.push(ImageCheck {
            reference,
            status,
            new_tag,
            note,
            used_in: used_in.clone(),
        });
    }
    checks
}

/// Placeholder reference for a row whose image could not be parsed.
fn unparsed(raw: &str) -> ImageReference {
    ImageReference {
        raw: raw.to_string(),
        registry: "-".to_string(),
        repository: raw.trim().to_string(),
        tag: "-".to_string(),
    }
}

async fn check_image<L: TagLister>(
    reference: &ImageReference,
    lister: &mut CachedTagLister<L>,
) -> (ImageStatus, Option<String>, String) {
    if !reference.is_docker_hub() {
        return (ImageStatus::Unsupported, None, UNSUPPORTED_NOTE.to_string());
    }

    if is_floating(&reference.tag) {
        let note = NoUpgradeReason::Floating(reference.tag.clone()).to_string();
        return (ImageStatus::Floating, None, note);
    }

    let tags = match lister.list_tags(&reference.repository).await {
        Ok(tags) => tags,
        Err(e) => {
            warn!("Failed to list tags for {}: {}", reference.repository, e);
            return (ImageStatus::Error, None, e.to_string());
        }
    };

    let suggestion = choose_newer_tag(&reference.tag, tags);
    let status = match suggestion {
        Suggestion::Upgrade(_) => ImageStatus::Upgrade,
        Suggestion::NoUpgrade(_) => ImageStatus::Current,
    };
    (
        status,
        suggestion.new_tag().map(str::to_string),
        suggestion.note(),
    )
}

pub fn write_header<W: Write>(
    out: &mut W,
    root: &Path,
    compose_files: usize,
    unique_images: usize,
) -> io::Result<()> {
    writeln!(out, "Root: {}", root.display())?;
    writeln!(
        out,
        "Compose files: {}  |  Unique images: {}\n",
        compose_files, unique_images
    )?;
    writeln!(
        out,
        "{:<10} {:<10} {:<40} {:<16} {:<16} NOTE",
        "STATUS", "REGISTRY", "IMAGE", "OLD", "NEW"
    )?;
    writeln!(out, "{}", "-".repeat(115))
}

pub fn write_row<W: Write>(
    out: &mut W,
    check: &ImageCheck,
    options: ReportOptions,
) -> io::Result<()> {
    // pad before painting so escape codes do not count towards the width
    let status = format!("{:<10}", check.status);
    let status = if options.color {
        check.status.paint(&status)
    } else {
        status
    };

    writeln!(
        out,
        "{} {:<10} {:<40} {:<16} {:<16} {}",
        status,
        check.reference.registry,
        check.reference.repository,
        check.reference.tag,
        check.new_tag.as_deref().unwrap_or("-"),
        check.note
    )?;
    let used_in = check.used_in.iter().cloned().collect::<Vec<_>>().join(", ");
    writeln!(out, "{:<10} {:<40} {}\n", "", "used in:", used_in)
}

pub fn write_report<W: Write>(
    out: &mut W,
    root: &Path,
    compose_files: usize,
    checks: &[ImageCheck],
    options: ReportOptions,
) -> io::Result<()> {
    write_header(out, root, compose_files, checks.len())?;
    for check in checks {
        write_row(out, check, options)?;
    }
    Ok(())
}
