use crate::command::{self, CommandError};
use serde::Deserialize;
use std::path::PathBuf;

#[cfg(test)]
use mockall::automock;

/// Maps a logical volume name to the host directory backing it.
#[cfg_attr(test, automock)]
pub trait VolumeResolver {
    fn resolve_volume_path(&self, volume: &str) -> Result<PathBuf, CommandError>;
}

#[derive(Debug, Deserialize)]
struct VolumeInspect {
    #[serde(rename = "Mountpoint")]
    mountpoint: PathBuf,
}

/// Resolves volumes through `docker volume inspect`, prefixing the compose
/// project name.
pub struct DockerVolumes {
    prefix: String,
}

impl DockerVolumes {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn volume_name(&self, volume: &str) -> String {
        format!("{}{}", self.prefix, volume)
    }
}

impl VolumeResolver for DockerVolumes {
    fn resolve_volume_path(&self, volume: &str) -> Result<PathBuf, CommandError> {
        let name = self.volume_name(volume);
        let stdout = command::run("docker", &["volume", "inspect", &name], None)?;
        parse_mountpoint(&stdout)
    }
}

fn parse_mountpoint(inspect_output: &str) -> Result<PathBuf, CommandError> {
    let invalid = |reason: String| CommandError::InvalidOutput {
        program: "docker".to_string(),
        reason,
    };

    let volumes: Vec<VolumeInspect> =
        serde_json::from_str(inspect_output).map_err(|e| invalid(e.to_string()))?;
    volumes
        .into_iter()
        .next()
        .map(|v| v.mountpoint)
        .ok_or_else(|| invalid("volume inspect returned no volumes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mountpoint() {
        let output = r#"[
            {
                "CreatedAt": "2024-05-01T10:00:00Z",
                "Driver": "local",
                "Mountpoint": "/var/lib/docker/volumes/home-automation_node_red_data/_data",
                "Name": "home-automation_node_red_data",
                "Scope": "local"
            }
        ]"#;

        assert_eq!(
            parse_mountpoint(output).unwrap(),
            PathBuf::from("/var/lib/docker/volumes/home-automation_node_red_data/_data")
        );
    }

    #[test]
    fn test_parse_mountpoint_rejects_empty_list() {
        assert!(matches!(
            parse_mountpoint("[]"),
            Err(CommandError::InvalidOutput { .. })
        ));
    }

    #[test]
    fn test_parse_mountpoint_rejects_garbage() {
        assert!(matches!(
            parse_mountpoint("Error: No such volume"),
            Err(CommandError::InvalidOutput { .. })
        ));
    }

    #[test]
    fn test_volume_name_uses_prefix() {
        let docker = DockerVolumes::new("home-automation_");
        assert_eq!(
            docker.volume_name("zwave_data"),
            "home-automation_zwave_data"
        );
    }
}
