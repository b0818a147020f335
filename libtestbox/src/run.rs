//! Run plan assembly.
//!
//! Converts a request into the configuration a container is created with.
//! Assembly is deterministic: the same request always yields the same plan.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::error::RequestError;
use crate::types::{
    ContainerConfig, ContainerFile, ContainerMount, ContainerRequest, EndpointSettings,
    EngineMount, HostConfig, MountSource, MountType, PortBinding,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "tcp" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            "sctp" => Some(Self::Sctp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
        };
        f.write_str(name)
    }
}

/// One parsed exposed-port declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortSpec {
    /// Container-side key, e.g. `8080/tcp`.
    pub fn port_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// Parse `PORT`, `PORT/PROTO`, `HOST:PORT[/PROTO]` or `IP:HOST:PORT[/PROTO]`.
/// An empty host port (`IP::PORT`) leaves the host port to the engine.
pub fn parse_port_spec(spec: &str) -> Result<PortSpec, RequestError> {
    let invalid = || RequestError::InvalidPortSpec(spec.to_string());

    let (ports, protocol) = match spec.rsplit_once('/') {
        Some((ports, proto)) => (ports, Protocol::parse(proto).ok_or_else(invalid)?),
        None => (spec, Protocol::Tcp),
    };
    let parts: Vec<&str> = ports.split(':').collect();
    let (host_ip, host_port, container_port) = match parts.as_slice() {
        [container] => (None, "", *container),
        [host, container] => (None, *host, *container),
        [ip, host, container] if !ip.is_empty() => (Some(ip.to_string()), *host, *container),
        _ => return Err(invalid()),
    };

    let container_port = match container_port.parse::<u16>() {
        Ok(port) if port > 0 => port,
        _ => return Err(invalid()),
    };
    let host_port = if host_port.is_empty() {
        None
    } else {
        Some(host_port.parse::<u16>().map_err(|_| invalid())?)
    };

    Ok(PortSpec {
        host_ip,
        host_port,
        container_port,
        protocol,
    })
}

/// Everything needed to create and prepare one container.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    /// Keyed by network name.
    pub endpoint_settings: HashMap<String, EndpointSettings>,
    /// Copied into the container after creation, in order.
    #[serde(skip)]
    pub files: Vec<ContainerFile>,
    pub always_pull: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

fn engine_mount(mount: &ContainerMount) -> EngineMount {
    let (kind, source, tmpfs_size_bytes) = match &mount.source {
        MountSource::Bind { host_path } => {
            (MountType::Bind, host_path.to_string_lossy().into_owned(), None)
        }
        MountSource::Volume { name } => (MountType::Volume, name.clone(), None),
        MountSource::Tmpfs { size_bytes } => (MountType::Tmpfs, String::new(), *size_bytes),
    };
    EngineMount {
        kind,
        source,
        target: mount.target.clone(),
        read_only: mount.read_only,
        tmpfs_size_bytes,
    }
}

/// Assemble the run plan of `req` for `image`.
///
/// Declared fields are laid down first, then every config, host config and
/// endpoint settings modifier runs in order over the result. The request is
/// expected to have been validated.
pub fn run_plan(req: &ContainerRequest, image: &str) -> Result<RunPlan, RequestError> {
    let ports = req
        .exposed_ports
        .iter()
        .map(|spec| parse_port_spec(spec))
        .collect::<Result<Vec<_>, _>>()?;

    let mut env: Vec<(&String, &String)> = req.env.iter().collect();
    env.sort();
    let mut config = ContainerConfig {
        image: image.to_string(),
        env: env.into_iter().map(|(k, v)| format!("{k}={v}")).collect(),
        cmd: req.cmd.clone(),
        entrypoint: req.entrypoint.clone(),
        labels: req.labels.clone(),
        exposed_ports: ports.iter().map(PortSpec::port_key).collect(),
        hostname: req.hostname.clone(),
        working_dir: req.working_dir.clone(),
        user: req.user.clone(),
    };
    for modifier in &req.config_modifiers {
        modifier(&mut config);
    }

    let mut port_bindings: BTreeMap<String, Vec<PortBinding>> = BTreeMap::new();
    for port in ports.iter().filter(|p| p.host_port.is_some() || p.host_ip.is_some()) {
        port_bindings
            .entry(port.port_key())
            .or_default()
            .push(PortBinding {
                host_ip: port.host_ip.clone().unwrap_or_default(),
                host_port: port.host_port.map(|p| p.to_string()).unwrap_or_default(),
            });
    }
    let mut host_config = HostConfig {
        mounts: req.mounts.iter().map(engine_mount).collect(),
        tmpfs: req.tmpfs.clone(),
        privileged: req.privileged,
        shm_size: req.shm_size,
        port_bindings,
        publish_all_ports: ports.iter().any(|p| p.host_port.is_none()),
        network_mode: req.networks.first().cloned(),
        resources: req.resources.clone(),
        ..Default::default()
    };
    for modifier in &req.host_config_modifiers {
        modifier(&mut host_config);
    }

    let mut endpoint_settings: HashMap<String, EndpointSettings> = req
        .networks
        .iter()
        .map(|network| {
            let aliases = req
                .network_aliases
                .get(network)
                .cloned()
                .unwrap_or_default();
            (network.clone(), EndpointSettings { aliases })
        })
        .collect();
    for modifier in &req.endpoint_settings_modifiers {
        modifier(&mut endpoint_settings);
    }

    debug!(
        image,
        ports = ports.len(),
        mounts = host_config.mounts.len(),
        networks = endpoint_settings.len(),
        "assembled run plan"
    );
    Ok(RunPlan {
        name: req.name.clone().filter(|n| !n.is_empty()),
        config,
        host_config,
        endpoint_settings,
        files: req.files.clone(),
        always_pull: req.always_pull_image,
        platform: req.image_platform.clone().filter(|p| !p.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::types::{
        ConfigModifier, EndpointSettingsModifier, HostConfigModifier, Resources,
    };

    #[test]
    fn port_spec_forms() {
        assert_eq!(
            parse_port_spec("80").unwrap(),
            PortSpec {
                host_ip: None,
                host_port: None,
                container_port: 80,
                protocol: Protocol::Tcp,
            }
        );
        let udp = parse_port_spec("53/UDP").unwrap();
        assert_eq!(udp.protocol, Protocol::Udp);
        assert_eq!(udp.port_key(), "53/udp");

        let mapped = parse_port_spec("8080:80/tcp").unwrap();
        assert_eq!(mapped.host_port, Some(8080));
        assert_eq!(mapped.container_port, 80);

        let bound = parse_port_spec("127.0.0.1:9000:9000/sctp").unwrap();
        assert_eq!(bound.host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(bound.protocol, Protocol::Sctp);

        let random = parse_port_spec("127.0.0.1::5432").unwrap();
        assert_eq!(random.host_port, None);
    }

    #[test]
    fn bad_port_specs() {
        for spec in ["", "http", "0", "70000", "80/icmp", "a:80", "1:2:3:4", ":80:80"] {
            assert!(
                matches!(parse_port_spec(spec), Err(RequestError::InvalidPortSpec(ref s)) if s == spec),
                "{spec} should be rejected"
            );
        }
    }

    fn request() -> ContainerRequest {
        ContainerRequest {
            image: Some("redis:7".into()),
            env: HashMap::from([
                ("B".to_string(), "2".to_string()),
                ("A".to_string(), "1".to_string()),
            ]),
            exposed_ports: vec!["6379".into(), "127.0.0.1:8080:80".into()],
            mounts: vec![
                ContainerMount::volume("data", "/data").read_only(),
                ContainerMount::tmpfs("/scratch"),
            ],
            networks: vec!["backend".into(), "frontend".into()],
            network_aliases: HashMap::from([("backend".to_string(), vec!["cache".to_string()])]),
            resources: Resources {
                memory: Some(256 * 1024 * 1024),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn assembles_declared_fields() {
        let plan = run_plan(&request(), "redis:7").unwrap();
        assert_eq!(plan.config.image, "redis:7");
        assert_eq!(plan.config.env, vec!["A=1", "B=2"]);
        assert!(plan.config.exposed_ports.contains("6379/tcp"));
        assert!(plan.config.exposed_ports.contains("80/tcp"));

        assert!(plan.host_config.publish_all_ports);
        assert_eq!(
            plan.host_config.port_bindings["80/tcp"],
            vec![PortBinding {
                host_ip: "127.0.0.1".into(),
                host_port: "8080".into(),
            }]
        );
        assert!(!plan.host_config.port_bindings.contains_key("6379/tcp"));
        assert_eq!(plan.host_config.network_mode.as_deref(), Some("backend"));
        assert_eq!(plan.host_config.resources.memory, Some(256 * 1024 * 1024));

        let volume = &plan.host_config.mounts[0];
        assert_eq!(volume.kind, MountType::Volume);
        assert_eq!(volume.source, "data");
        assert!(volume.read_only);
        assert_eq!(plan.host_config.mounts[1].kind, MountType::Tmpfs);

        assert_eq!(plan.endpoint_settings["backend"].aliases, vec!["cache"]);
        assert!(plan.endpoint_settings["frontend"].aliases.is_empty());
    }

    #[test]
    fn modifiers_run_after_declared_fields() {
        let mut req = request();
        let config: ConfigModifier = Arc::new(|c: &mut ContainerConfig| {
            assert_eq!(c.env.len(), 2);
            c.env.push("C=3".into());
        });
        let host: HostConfigModifier = Arc::new(|hc: &mut HostConfig| {
            hc.binds.push("/host:/host".into());
            hc.network_mode = Some("host".into());
        });
        let endpoints: EndpointSettingsModifier =
            Arc::new(|es: &mut HashMap<String, EndpointSettings>| {
                es.remove("frontend");
            });
        req.config_modifiers = vec![config];
        req.host_config_modifiers = vec![host];
        req.endpoint_settings_modifiers = vec![endpoints];

        let plan = run_plan(&req, "redis:7").unwrap();
        assert_eq!(plan.config.env, vec!["A=1", "B=2", "C=3"]);
        assert_eq!(plan.host_config.binds, vec!["/host:/host"]);
        assert_eq!(plan.host_config.network_mode.as_deref(), Some("host"));
        assert_eq!(plan.endpoint_settings.len(), 1);
    }

    #[test]
    fn no_ports_means_no_publish_all() {
        let req = ContainerRequest {
            image: Some("alpine".into()),
            ..Default::default()
        };
        let plan = run_plan(&req, "alpine").unwrap();
        assert!(!plan.host_config.publish_all_ports);
        assert!(plan.host_config.network_mode.is_none());
    }

    #[test]
    fn invalid_port_fails_assembly() {
        let req = ContainerRequest {
            image: Some("alpine".into()),
            exposed_ports: vec!["80/icmp".into()],
            ..Default::default()
        };
        assert!(matches!(
            run_plan(&req, "alpine"),
            Err(RequestError::InvalidPortSpec(ref s)) if s == "80/icmp"
        ));
    }
}
