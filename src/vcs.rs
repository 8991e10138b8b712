use crate::command::{self, CommandError};
use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;

/// Version control operations needed to record synced files.
#[cfg_attr(test, automock)]
pub trait Vcs {
    /// Porcelain status lines; empty when the tree is clean.
    fn status(&self) -> Result<Vec<String>, CommandError>;

    /// Stages `paths` and commits them. Returns false when there was nothing
    /// to commit.
    fn commit(&self, paths: &[PathBuf], message: &str) -> Result<bool, CommandError>;
}

pub struct GitCli {
    repo: PathBuf,
}

impl GitCli {
    pub fn new(repo: &Path) -> Self {
        Self {
            repo: repo.to_path_buf(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<String, CommandError> {
        command::run("git", args, Some(&self.repo))
    }
}

impl Vcs for GitCli {
    fn status(&self) -> Result<Vec<String>, CommandError> {
        let stdout = self.git(&["status", "--porcelain"])?;
        Ok(stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    fn commit(&self, paths: &[PathBuf], message: &str) -> Result<bool, CommandError> {
        let paths: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut add = vec!["add", "--"];
        add.extend(paths.iter().map(String::as_str));
        self.git(&add)?;

        let staged = self.git(&["diff", "--cached", "--name-only"])?;
        if staged.trim().is_empty() {
            return Ok(false);
        }

        self.git(&["commit", "-m", message])?;
        Ok(true)
    }
}

pub fn default_commit_message<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "Auto-sync config changes - {}",
        now.format("%Y-%m-%d %H:%M:%S")
    )
}
