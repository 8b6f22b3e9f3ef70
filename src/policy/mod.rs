//! Declarative workspace policy: loading, template expansion, validation.
//!
//! A policy is a YAML document declaring resource sets (bundles of
//! permissions and bindings) and apply rules that activate them for
//! workspace-relative paths. The loader expands `${{ env.X }}`,
//! `${{ vars.X }}`, and `${{ conf.X }}` references, validates the document,
//! and produces an immutable [`Policy`] whose resolver answers "which
//! resource sets and which image apply to these paths".
//!
//! Expansion happens in two passes: `user` and `workspace` are expanded
//! first with only `env` and `vars` in scope, then `conf` is derived from
//! them (`TARGET_USER`, `WORKSPACE`) and every other string field is
//! expanded with all three scopes.

pub mod resolver;
pub mod template;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

pub use resolver::{ResolvedResource, path_segments, rule_matches};
pub use template::Scopes;

/// Required value of the policy's `type` key.
pub const POLICY_TYPE: &str = "shai-sandbox";
/// Required value of the policy's `version` key.
pub const POLICY_VERSION: i64 = 1;
/// Target user when the policy does not name one.
pub const DEFAULT_USER: &str = "shai";
/// In-container workspace path when the policy does not name one.
pub const DEFAULT_WORKSPACE: &str = "/src";
/// Directory under the host workspace holding the policy file.
pub const POLICY_DIR: &str = ".shai";
/// Policy file name inside [`POLICY_DIR`].
pub const POLICY_FILE_NAME: &str = "sandbox.yaml";

const DEFAULT_POLICY: &str = include_str!("default_policy.yaml");

/// Bind-mount mode for a resource mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    Ro,
    Rw,
}

impl MountMode {
    pub fn is_read_only(self) -> bool {
        self == MountMode::Ro
    }
}

/// Transport protocol for an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Host environment variable forwarded into the container, optionally under
/// a different name.
#[derive(Debug, Clone, Serialize)]
pub struct EnvVarMapping {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl EnvVarMapping {
    /// In-container name: the target when set and non-empty, else the source.
    pub fn target_name(&self) -> &str {
        self.target
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.source)
    }
}

/// Additional bind mount contributed by a resource set.
#[derive(Debug, Clone, Serialize)]
pub struct MountSpec {
    pub source: String,
    pub target: String,
    pub mode: MountMode,
}

/// A curated host command exposed to the container through the alias
/// endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CallSpec {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub command: String,
    #[serde(rename = "allowed-args", skip_serializing_if = "Option::is_none")]
    pub allowed_args: Option<String>,
}

/// A (host, TCP port) pair allowed as direct egress from the container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A host→container published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExposedPort {
    pub host: u16,
    pub container: u16,
    pub protocol: Protocol,
}

/// Container options requested by a resource set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceOptions {
    pub privileged: bool,
}

impl ResourceOptions {
    fn is_default(&self) -> bool {
        *self == ResourceOptions::default()
    }
}

/// A named bundle of permissions and bindings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceSet {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<EnvVarMapping>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<HostPort>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expose: Vec<ExposedPort>,
    #[serde(rename = "root-commands", skip_serializing_if = "Vec::is_empty")]
    pub root_commands: Vec<String>,
    #[serde(skip_serializing_if = "ResourceOptions::is_default")]
    pub options: ResourceOptions,
}

/// One apply rule: activate `resources` for `path` and its descendants,
/// optionally overriding the image.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyRule {
    pub path: String,
    pub resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Loaded, expanded, validated policy. Immutable after load.
#[derive(Debug)]
pub struct Policy {
    pub image: String,
    pub user: String,
    pub workspace: String,
    pub resources: HashMap<String, ResourceSet>,
    pub apply: Vec<ApplyRule>,
}

/// Result of [`Policy::load`]: the policy plus whether the embedded default
/// document was used because the file was absent.
#[derive(Debug)]
pub struct PolicyLoad {
    pub policy: Policy,
    pub used_default: bool,
}

// ---------------------------------------------------------------------------
// Raw (pre-expansion) document shapes.

#[derive(Debug, Deserialize)]
struct RawPolicy {
    #[serde(rename = "type")]
    type_tag: String,
    version: i64,
    image: String,
    user: Option<String>,
    workspace: Option<String>,
    #[serde(default)]
    resources: HashMap<String, RawResourceSet>,
    #[serde(default)]
    apply: serde_yaml::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResourceSet {
    #[serde(default)]
    vars: Vec<RawVar>,
    #[serde(default)]
    mounts: Vec<RawMount>,
    #[serde(default)]
    calls: Vec<RawCall>,
    #[serde(default)]
    http: Vec<String>,
    #[serde(default)]
    ports: Vec<RawHostPort>,
    #[serde(default)]
    expose: Vec<RawExpose>,
    #[serde(default, rename = "root-commands")]
    root_commands: Vec<String>,
    #[serde(default)]
    options: RawOptions,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawVar {
    Name(String),
    Mapping {
        source: String,
        #[serde(default)]
        target: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMount {
    source: String,
    target: String,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCall {
    name: String,
    #[serde(default)]
    description: String,
    command: String,
    #[serde(default, rename = "allowed-args")]
    allowed_args: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHostPort {
    host: String,
    port: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawExpose {
    Port(i64),
    Full {
        host: i64,
        #[serde(default)]
        container: Option<i64>,
        #[serde(default)]
        protocol: Option<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOptions {
    #[serde(default)]
    privileged: bool,
}

#[derive(Debug, Deserialize)]
struct RawApplyRule {
    path: String,
    resources: Vec<String>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawApplyBody {
    resources: Vec<String>,
    #[serde(default)]
    image: Option<String>,
}

/// The `apply` key accepts two spellings: an ordered mapping
/// (`./bar: [git]` or `./bar: {resources: [git], image: x}`) and a sequence
/// of `{path, resources, image}` objects. Both preserve declaration order.
fn parse_apply(value: serde_yaml::Value) -> Result<Vec<RawApplyRule>, PolicyError> {
    match value {
        serde_yaml::Value::Null => Ok(Vec::new()),
        serde_yaml::Value::Mapping(map) => {
            let mut rules = Vec::with_capacity(map.len());
            for (key, body) in map {
                let path = key
                    .as_str()
                    .ok_or_else(|| {
                        PolicyError::Parse("apply keys must be path strings".to_string())
                    })?
                    .to_string();
                let (resources, image) = match body {
                    serde_yaml::Value::Sequence(_) => {
                        let names: Vec<String> = serde_yaml::from_value(body)
                            .map_err(|e| PolicyError::Parse(e.to_string()))?;
                        (names, None)
                    }
                    body @ serde_yaml::Value::Mapping(_) => {
                        let body: RawApplyBody = serde_yaml::from_value(body)
                            .map_err(|e| PolicyError::Parse(e.to_string()))?;
                        (body.resources, body.image)
                    }
                    other => {
                        return Err(PolicyError::Parse(format!(
                            "apply rule for {path:?} must be a resource list or a mapping, \
                             found {other:?}"
                        )));
                    }
                };
                rules.push(RawApplyRule {
                    path,
                    resources,
                    image,
                });
            }
            Ok(rules)
        }
        serde_yaml::Value::Sequence(_) => {
            serde_yaml::from_value(value).map_err(|e| PolicyError::Parse(e.to_string()))
        }
        other => Err(PolicyError::Parse(format!(
            "apply must be a mapping or a sequence, found {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Loading.

impl Policy {
    /// Load the policy file at `path`, falling back to the embedded default
    /// document when the file does not exist.
    pub fn load(
        path: &Path,
        env: &HashMap<String, String>,
        vars: &HashMap<String, String>,
    ) -> Result<PolicyLoad, PolicyError> {
        let (text, used_default) = match std::fs::read_to_string(path) {
            Ok(text) => (text, false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "policy file absent, using default");
                (DEFAULT_POLICY.to_string(), true)
            }
            Err(e) => return Err(e.into()),
        };
        let policy = Self::parse(&text, env, vars)?;
        Ok(PolicyLoad {
            policy,
            used_default,
        })
    }

    /// Parse, expand, and validate a policy document.
    pub fn parse(
        text: &str,
        env: &HashMap<String, String>,
        vars: &HashMap<String, String>,
    ) -> Result<Policy, PolicyError> {
        let raw: RawPolicy =
            serde_yaml::from_str(text).map_err(|e| PolicyError::Parse(e.to_string()))?;

        if raw.type_tag != POLICY_TYPE {
            return Err(PolicyError::WrongType { found: raw.type_tag });
        }
        if raw.version != POLICY_VERSION {
            return Err(PolicyError::WrongVersion { found: raw.version });
        }

        // user/workspace expand before conf exists.
        let early = Scopes {
            env,
            vars,
            conf: None,
        };
        let user = template::expand(raw.user.as_deref().unwrap_or(DEFAULT_USER), &early)?;
        let workspace =
            template::expand(raw.workspace.as_deref().unwrap_or(DEFAULT_WORKSPACE), &early)?;

        let conf: HashMap<String, String> = [
            ("TARGET_USER".to_string(), user.clone()),
            ("WORKSPACE".to_string(), workspace.clone()),
        ]
        .into_iter()
        .collect();
        let scopes = Scopes {
            env,
            vars,
            conf: Some(&conf),
        };

        let image = template::expand(&raw.image, &scopes)?;
        if image.is_empty() {
            return Err(PolicyError::EmptyImage);
        }

        if raw.resources.is_empty() {
            return Err(PolicyError::NoResources);
        }
        let mut resources = HashMap::with_capacity(raw.resources.len());
        for (name, raw_set) in raw.resources {
            let set = convert_resource_set(&name, raw_set, &scopes, env)?;
            resources.insert(name, set);
        }

        let raw_apply = parse_apply(raw.apply)?;
        if raw_apply.is_empty() {
            return Err(PolicyError::NoApplyRules);
        }
        let mut apply = Vec::with_capacity(raw_apply.len());
        for rule in raw_apply {
            let path = template::expand(&rule.path, &scopes)?;
            let rule_image = match rule.image {
                Some(img) => Some(template::expand(&img, &scopes)?),
                None => None,
            };
            if path_segments(&path).is_empty() && rule_image.is_some() {
                return Err(PolicyError::RootImageOverride);
            }
            for name in &rule.resources {
                if !resources.contains_key(name) {
                    return Err(PolicyError::UnknownResource {
                        path: path.clone(),
                        name: name.clone(),
                    });
                }
            }
            apply.push(ApplyRule {
                path,
                resources: rule.resources,
                image: rule_image,
            });
        }

        let policy = Policy {
            image,
            user,
            workspace,
            resources,
            apply,
        };
        policy.validate_path_conflicts()?;
        Ok(policy)
    }

    /// Serialize back to YAML. Loading the result yields a policy whose
    /// resolver behaves identically.
    pub fn to_yaml(&self) -> String {
        #[derive(Serialize)]
        struct PolicyDoc<'a> {
            #[serde(rename = "type")]
            type_tag: &'static str,
            version: i64,
            image: &'a str,
            user: &'a str,
            workspace: &'a str,
            resources: BTreeMap<&'a str, &'a ResourceSet>,
            apply: &'a [ApplyRule],
        }

        let doc = PolicyDoc {
            type_tag: POLICY_TYPE,
            version: POLICY_VERSION,
            image: &self.image,
            user: &self.user,
            workspace: &self.workspace,
            resources: self
                .resources
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect(),
            apply: &self.apply,
        };
        serde_yaml::to_string(&doc).unwrap_or_default()
    }
}

fn convert_resource_set(
    name: &str,
    raw: RawResourceSet,
    scopes: &Scopes<'_>,
    env: &HashMap<String, String>,
) -> Result<ResourceSet, PolicyError> {
    let mut vars = Vec::with_capacity(raw.vars.len());
    for var in raw.vars {
        let (source, target) = match var {
            RawVar::Name(source) => (source, None),
            RawVar::Mapping { source, target } => (source, target),
        };
        let source = template::expand(&source, scopes)?;
        let target = match target {
            Some(t) => Some(template::expand(&t, scopes)?),
            None => None,
        };
        if !env.contains_key(&source) {
            return Err(PolicyError::MissingEnvVar {
                resource: name.to_string(),
                var: source,
            });
        }
        vars.push(EnvVarMapping { source, target });
    }

    let mut mounts = Vec::with_capacity(raw.mounts.len());
    for mount in raw.mounts {
        let mode_text = match &mount.mode {
            Some(m) => template::expand(m, scopes)?,
            None => "ro".to_string(),
        };
        let mode = match mode_text.as_str() {
            "ro" => MountMode::Ro,
            "rw" => MountMode::Rw,
            other => {
                return Err(PolicyError::InvalidMode {
                    resource: name.to_string(),
                    mode: other.to_string(),
                });
            }
        };
        mounts.push(MountSpec {
            source: template::expand(&mount.source, scopes)?,
            target: template::expand(&mount.target, scopes)?,
            mode,
        });
    }

    let mut calls = Vec::with_capacity(raw.calls.len());
    for call in raw.calls {
        let call_name = template::expand(&call.name, scopes)?;
        if call_name.is_empty()
            || !call_name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(PolicyError::InvalidCallName {
                resource: name.to_string(),
                name: call_name,
            });
        }
        let allowed_args = match call.allowed_args {
            Some(pattern) => {
                let pattern = template::expand(&pattern, scopes)?;
                // Compile the anchored form now so a bad pattern fails the
                // load, not the first call.
                regex::Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                    PolicyError::InvalidRegex {
                        call: call_name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Some(pattern)
            }
            None => None,
        };
        calls.push(CallSpec {
            name: call_name,
            description: template::expand(&call.description, scopes)?,
            command: template::expand(&call.command, scopes)?,
            allowed_args,
        });
    }

    let mut http = Vec::with_capacity(raw.http.len());
    for host in raw.http {
        http.push(template::expand(&host, scopes)?);
    }

    let mut ports = Vec::with_capacity(raw.ports.len());
    for port in raw.ports {
        ports.push(HostPort {
            host: template::expand(&port.host, scopes)?,
            port: check_port(name, port.port)?,
        });
    }

    let mut expose = Vec::with_capacity(raw.expose.len());
    let mut seen_expose = HashSet::new();
    for entry in raw.expose {
        let port = convert_expose(name, entry, scopes)?;
        if !seen_expose.insert((port.host, port.protocol)) {
            return Err(PolicyError::DuplicateExpose {
                resource: name.to_string(),
                host_port: port.host,
                protocol: port.protocol.to_string(),
            });
        }
        expose.push(port);
    }

    let mut root_commands = Vec::with_capacity(raw.root_commands.len());
    for cmd in raw.root_commands {
        root_commands.push(template::expand(&cmd, scopes)?);
    }

    Ok(ResourceSet {
        vars,
        mounts,
        calls,
        http,
        ports,
        expose,
        root_commands,
        options: ResourceOptions {
            privileged: raw.options.privileged,
        },
    })
}

fn check_port(resource: &str, value: i64) -> Result<u16, PolicyError> {
    if (1..=65535).contains(&value) {
        Ok(value as u16)
    } else {
        Err(PolicyError::InvalidPort {
            resource: resource.to_string(),
            value,
        })
    }
}

fn convert_expose(
    resource: &str,
    raw: RawExpose,
    scopes: &Scopes<'_>,
) -> Result<ExposedPort, PolicyError> {
    let (host, container, protocol) = match raw {
        RawExpose::Port(port) => (port, None, None),
        RawExpose::Full {
            host,
            container,
            protocol,
        } => (host, container, protocol),
    };
    let host = check_port(resource, host)?;
    let container = match container {
        Some(c) => check_port(resource, c)?,
        None => host,
    };
    let protocol = match protocol {
        None => Protocol::Tcp,
        Some(p) => {
            let p = template::expand(&p, scopes)?;
            match p.to_ascii_lowercase().as_str() {
                "tcp" => Protocol::Tcp,
                "udp" => Protocol::Udp,
                other => {
                    return Err(PolicyError::InvalidProtocol {
                        resource: resource.to_string(),
                        value: other.to_string(),
                    });
                }
            }
        }
    };
    Ok(ExposedPort {
        host,
        container,
        protocol,
    })
}
