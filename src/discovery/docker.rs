//! Docker Engine inventory over the local socket (or `DOCKER_HOST`).

use bollard::container::ListContainersOptions;
use bollard::models::ContainerSummary;
use bollard::Docker;

use crate::discovery::{Inventory, Unit};
use crate::error::AppError;

pub struct DockerInventory {
    docker: Docker,
}

impl DockerInventory {
    /// Build a client from the environment. Does not contact the daemon;
    /// reachability problems surface on the first sweep.
    pub fn connect() -> Result<Self, AppError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

impl Inventory for DockerInventory {
    async fn list_units(&self) -> Result<Vec<Unit>, AppError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String>::default()))
            .await?;
        Ok(containers.into_iter().filter_map(unit_from_summary).collect())
    }
}

/// Name without the leading `/`; host-network iff `NetworkMode == "host"`.
fn unit_from_summary(container: ContainerSummary) -> Option<Unit> {
    let name = container
        .names?
        .into_iter()
        .next()?
        .trim_start_matches('/')
        .to_string();
    if name.is_empty() {
        return None;
    }
    let host_network = container
        .host_config
        .and_then(|config| config.network_mode)
        .as_deref()
        == Some("host");
    Some(Unit { name, host_network })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::ContainerSummaryHostConfig;

    fn summary(names: Option<Vec<&str>>, network_mode: Option<&str>) -> ContainerSummary {
        ContainerSummary {
            names: names.map(|n| n.into_iter().map(String::from).collect()),
            host_config: Some(ContainerSummaryHostConfig {
                network_mode: network_mode.map(String::from),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_strips_leading_slash() {
        let unit = unit_from_summary(summary(Some(vec!["/nextcloud"]), Some("bridge"))).unwrap();
        assert_eq!(unit.name, "nextcloud");
        assert!(!unit.host_network);
    }

    #[test]
    fn test_host_network_mode_detected() {
        let unit = unit_from_summary(summary(Some(vec!["/emby"]), Some("host"))).unwrap();
        assert!(unit.host_network);
    }

    #[test]
    fn test_custom_network_is_isolated() {
        let unit = unit_from_summary(summary(Some(vec!["/db"]), Some("proxy_net"))).unwrap();
        assert!(!unit.host_network);

        let unit = unit_from_summary(summary(Some(vec!["/db"]), None)).unwrap();
        assert!(!unit.host_network);
    }

    #[test]
    fn test_first_name_wins() {
        let unit =
            unit_from_summary(summary(Some(vec!["/app", "/legacy/app"]), Some("default"))).unwrap();
        assert_eq!(unit.name, "app");
    }

    #[test]
    fn test_nameless_containers_are_skipped() {
        assert!(unit_from_summary(summary(None, Some("bridge"))).is_none());
        assert!(unit_from_summary(summary(Some(vec![]), Some("bridge"))).is_none());
        assert!(unit_from_summary(summary(Some(vec!["/"]), Some("bridge"))).is_none());
    }
}
