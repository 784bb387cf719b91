//! Server configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-process server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerOptions {
    pub listen: SocketAddr,
    /// Root directory for working copies.
    pub data_dir: PathBuf,
    /// PostgreSQL connection string. In-memory stores are used when absent.
    pub database_url: Option<String>,
    /// Address of the designated code node. Single-node mode when absent.
    pub code_node_url: Option<Url>,
    /// Key used to sign liveness probe tokens.
    pub shared_secret: Option<String>,
    pub probe: ProbeOptions,
    pub queue: QueueOptions,
    pub scheduler: SchedulerOptions,
    pub worker: WorkerOptions,
    /// Repositories kept converged by the clone scheduler, in sweep order.
    pub repos: Vec<RepoConfig>,
}

/// A configured repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub url: String,
    /// Program and arguments that prepare a checked-out workspace, if any.
    #[serde(default)]
    pub init: Vec<String>,
}

impl RepoConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            init: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOptions {
    pub interval: Duration,
    /// Number of probe attempts; unbounded when absent.
    pub retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueOptions {
    pub poll_interval: Duration,
    /// Running jobs are cancelled once they exceed this duration.
    pub timeout: Duration,
    /// How long finished jobs stay queryable before they are pruned.
    pub retention: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerOptions {
    /// How often the update scheduler ticks.
    pub update_frequency: Duration,
    /// How often the index scheduler ticks.
    pub index_frequency: Duration,
    /// Age after which a repository is due for an update.
    pub update_repo_frequency: Duration,
    /// Age after which a repository is due for a re-index.
    pub index_repo_frequency: Duration,
    pub disable_scheduler: bool,
    pub disable_index_scheduler: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOptions {
    /// How long a delete waits for cancelled jobs to settle.
    pub drain_timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            retries: None,
        }
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: HOUR,
            retention: DAY,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            update_frequency: 5 * MINUTE,
            index_frequency: DAY,
            update_repo_frequency: HOUR,
            index_repo_frequency: DAY,
            disable_scheduler: false,
            disable_index_scheduler: false,
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            data_dir: std::env::temp_dir().join("codefleet"),
            database_url: None,
            code_node_url: None,
            shared_secret: None,
            probe: ProbeOptions::default(),
            queue: QueueOptions::default(),
            scheduler: SchedulerOptions::default(),
            worker: WorkerOptions::default(),
            repos: Vec::new(),
        }
    }
}

/// Read and parse a configuration file.
pub fn load_server_options(path: &Path) -> ConfigResult<ServerOptions> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_server_options(&text)
}

/// Parse server configuration from KDL text. Unset fields keep their defaults.
pub fn parse_server_options(kdl: &str) -> ConfigResult<ServerOptions> {
    let doc: KdlDocument = kdl.parse()?;
    let mut options = ServerOptions::default();

    for node in doc.nodes() {
        match node.name().value() {
            "listen" => {
                let addr = require_string_arg(node, "listen")?;
                options.listen = addr.parse().map_err(|e| ConfigError::InvalidValue {
                    field: "listen".to_string(),
                    message: format!("{}", e),
                })?;
            }
            "data-dir" => {
                options.data_dir = PathBuf::from(require_string_arg(node, "data-dir")?);
            }
            "database-url" => {
                options.database_url = Some(require_string_arg(node, "database-url")?);
            }
            "code-node-url" => {
                let raw = require_string_arg(node, "code-node-url")?;
                let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                    field: "code-node-url".to_string(),
                    message: e.to_string(),
                })?;
                options.code_node_url = Some(url);
            }
            "shared-secret" => {
                options.shared_secret = Some(require_string_arg(node, "shared-secret")?);
            }
            "probe" => {
                if let Some(ms) = get_u64_prop(node, "interval-ms")? {
                    options.probe.interval = Duration::from_millis(ms);
                }
                if let Some(retries) = get_u64_prop(node, "retries")? {
                    options.probe.retries =
                        Some(u32::try_from(retries).map_err(|_| ConfigError::InvalidValue {
                            field: "probe retries".to_string(),
                            message: format!("{} is out of range", retries),
                        })?);
                }
            }
            "queue" => {
                if let Some(ms) = get_u64_prop(node, "poll-interval-ms")? {
                    options.queue.poll_interval = Duration::from_millis(ms);
                }
                if let Some(ms) = get_u64_prop(node, "timeout-ms")? {
                    options.queue.timeout = Duration::from_millis(ms);
                }
                if let Some(ms) = get_u64_prop(node, "retention-ms")? {
                    options.queue.retention = Duration::from_millis(ms);
                }
            }
            "scheduler" => parse_scheduler(node, &mut options.scheduler)?,
            "disable-scheduler" => {
                options.scheduler.disable_scheduler = get_first_bool_arg(node).unwrap_or(true);
            }
            "disable-index-scheduler" => {
                options.scheduler.disable_index_scheduler =
                    get_first_bool_arg(node).unwrap_or(true);
            }
            "worker" => {
                if let Some(ms) = get_u64_prop(node, "drain-timeout-ms")? {
                    options.worker.drain_timeout = Duration::from_millis(ms);
                }
            }
            "repos" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        if child.name().value() != "repo" {
                            return Err(ConfigError::UnknownNode(format!(
                                "repos.{}",
                                child.name().value()
                            )));
                        }
                        let repo = parse_repo(child)?;
                        if options.repos.iter().any(|r| r.url == repo.url) {
                            return Err(ConfigError::Duplicate(format!("repo {}", repo.url)));
                        }
                        options.repos.push(repo);
                    }
                }
            }
            other => return Err(ConfigError::UnknownNode(other.to_string())),
        }
    }

    if options.probe.interval.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: "probe interval-ms".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    Ok(options)
}

fn parse_repo(node: &KdlNode) -> ConfigResult<RepoConfig> {
    let mut repo = RepoConfig::new(require_string_arg(node, "repo")?);
    let Some(children) = node.children() else {
        return Ok(repo);
    };
    for child in children.nodes() {
        match child.name().value() {
            "init" => {
                repo.init = child
                    .entries()
                    .iter()
                    .filter(|e| e.name().is_none())
                    .map(|e| {
                        e.value().as_string().map(str::to_string).ok_or_else(|| {
                            ConfigError::InvalidValue {
                                field: format!("repo {} init", repo.url),
                                message: "arguments must be strings".to_string(),
                            }
                        })
                    })
                    .collect::<ConfigResult<_>>()?;
                if repo.init.is_empty() {
                    return Err(ConfigError::MissingField(format!("repo {} init", repo.url)));
                }
            }
            other => return Err(ConfigError::UnknownNode(format!("repo.{}", other))),
        }
    }
    Ok(repo)
}

fn parse_scheduler(node: &KdlNode, scheduler: &mut SchedulerOptions) -> ConfigResult<()> {
    let fields: [(&str, &mut Duration); 4] = [
        ("update-frequency-ms", &mut scheduler.update_frequency),
        ("index-frequency-ms", &mut scheduler.index_frequency),
        ("update-repo-frequency-ms", &mut scheduler.update_repo_frequency),
        ("index-repo-frequency-ms", &mut scheduler.index_repo_frequency),
    ];
    for (name, slot) in fields {
        if let Some(ms) = get_u64_prop(node, name)? {
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("scheduler {}", name),
                    message: "must be greater than zero".to_string(),
                });
            }
            *slot = Duration::from_millis(ms);
        }
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn require_string_arg(node: &KdlNode, field: &str) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

fn get_first_bool_arg(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

fn get_u64_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    let invalid = || ConfigError::InvalidValue {
        field: format!("{} {}", node.name().value(), name),
        message: "expected a non-negative integer".to_string(),
    };
    let n = value.as_integer().ok_or_else(invalid)?;
    u64::try_from(n).map(Some).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let options = parse_server_options("").unwrap();
        assert_eq!(options.listen.to_string(), "0.0.0.0:3000");
        assert!(options.code_node_url.is_none());
        assert_eq!(options.scheduler.update_frequency, Duration::from_secs(300));
        assert_eq!(options.scheduler.index_repo_frequency, DAY);
        assert_eq!(options.queue.timeout, HOUR);
        assert_eq!(options.queue.retention, DAY);
        assert_eq!(options.probe.interval, Duration::from_secs(3));
        assert!(options.probe.retries.is_none());
    }

    #[test]
    fn test_parse_full_document() {
        let kdl = r#"
            listen "127.0.0.1:4000"
            data-dir "/var/lib/codefleet"
            code-node-url "http://code-node:3000"
            shared-secret "s3cret"
            probe interval-ms=500 retries=4
            queue poll-interval-ms=250 timeout-ms=60000 retention-ms=120000
            scheduler update-frequency-ms=1000 index-repo-frequency-ms=2000
            disable-index-scheduler #true
            worker drain-timeout-ms=1500
            repos {
                repo "https://github.com/elastic/code.git"
                repo "https://github.com/rust-lang/log.git" {
                    init "cargo" "fetch"
                }
            }
        "#;

        let options = parse_server_options(kdl).unwrap();
        assert_eq!(options.listen.port(), 4000);
        assert_eq!(options.data_dir, PathBuf::from("/var/lib/codefleet"));
        assert_eq!(
            options.code_node_url.as_ref().map(|u| u.as_str()),
            Some("http://code-node:3000/")
        );
        assert_eq!(options.shared_secret.as_deref(), Some("s3cret"));
        assert_eq!(options.probe.interval, Duration::from_millis(500));
        assert_eq!(options.probe.retries, Some(4));
        assert_eq!(options.queue.poll_interval, Duration::from_millis(250));
        assert_eq!(options.queue.retention, Duration::from_secs(120));
        assert_eq!(options.scheduler.update_frequency, Duration::from_secs(1));
        assert_eq!(options.scheduler.index_repo_frequency, Duration::from_secs(2));
        assert_eq!(options.scheduler.index_frequency, DAY);
        assert!(options.scheduler.disable_index_scheduler);
        assert!(!options.scheduler.disable_scheduler);
        assert_eq!(options.worker.drain_timeout, Duration::from_millis(1500));
        assert_eq!(options.repos.len(), 2);
        assert_eq!(options.repos[0], RepoConfig::new("https://github.com/elastic/code.git"));
        assert_eq!(options.repos[1].init, vec!["cargo", "fetch"]);
    }

    #[test]
    fn test_duplicate_repo_rejected() {
        let kdl = r#"
            repos {
                repo "https://github.com/a/b.git"
                repo "https://github.com/a/b.git"
            }
        "#;
        assert!(matches!(
            parse_server_options(kdl),
            Err(ConfigError::Duplicate(_))
        ));
    }

    #[test]
    fn test_repo_init_must_be_strings() {
        let kdl = r#"
            repos {
                repo "https://github.com/a/b.git" {
                    init "make" 3
                }
            }
        "#;
        assert!(matches!(
            parse_server_options(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));

        let kdl = "repos {\n    repo \"https://github.com/a/b.git\" {\n        init\n    }\n}";
        assert!(matches!(
            parse_server_options(kdl),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_invalid_listen_address() {
        let result = parse_server_options(r#"listen "not-an-address""#);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_negative_interval_rejected() {
        let result = parse_server_options("queue timeout-ms=-5");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_zero_frequency_rejected() {
        let result = parse_server_options("scheduler update-frequency-ms=0");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_unknown_node_rejected() {
        let result = parse_server_options("disable-schedulers #true");
        assert!(matches!(result, Err(ConfigError::UnknownNode(name)) if name == "disable-schedulers"));

        let result = parse_server_options("repos {\n    mirror \"x\"\n}");
        assert!(matches!(result, Err(ConfigError::UnknownNode(_))));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = load_server_options(Path::new("/nonexistent/codefleet.kdl")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/codefleet.kdl"));
    }

    #[test]
    fn test_bare_disable_flag() {
        let options = parse_server_options("disable-scheduler").unwrap();
        assert!(options.scheduler.disable_scheduler);
    }
}
