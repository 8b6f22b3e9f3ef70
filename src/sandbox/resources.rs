//! Resource aggregation: collapse the policy's resolved resource sets plus
//! CLI-supplied extras into the concrete inputs the container spec needs.

use std::path::Path;

use crate::error::ResourceError;
use crate::policy::{CallSpec, ExposedPort, HostPort, Policy, ResolvedResource};
use crate::sandbox::mounts::MountEntry;

/// The resource sets selected for one invocation, in effect order:
/// CLI-supplied extras first (caller order), then apply-rule matches.
#[derive(Debug)]
pub struct SelectedResources<'a> {
    pub resources: Vec<ResolvedResource<'a>>,
    /// Image override from the matched non-root apply rules, if any.
    pub image_override: Option<String>,
}

/// Select resources for the given read-write paths and CLI extras.
///
/// An empty path list queries the workspace root, so root apply rules still
/// match. Unknown extra names are fatal. The image override scans the
/// caller-supplied paths in order and takes the first path that yields one
/// (each path resolving to its most specific non-root rule).
pub fn select_resources<'a>(
    policy: &'a Policy,
    rw_paths: &[String],
    extras: &[String],
) -> Result<SelectedResources<'a>, ResourceError> {
    let mut resources: Vec<ResolvedResource<'a>> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for name in extras {
        let set = policy
            .resources
            .get(name)
            .ok_or_else(|| ResourceError::UnknownResource { name: name.clone() })?;
        if seen.insert(name.clone()) {
            resources.push(ResolvedResource {
                name: name.clone(),
                set,
            });
        }
    }

    let root_query = vec![".".to_string()];
    let query: &[String] = if rw_paths.is_empty() {
        &root_query
    } else {
        rw_paths
    };
    for resolved in policy.resolve_resources(query) {
        if seen.insert(resolved.name.clone()) {
            resources.push(resolved);
        }
    }

    let image_override = rw_paths
        .iter()
        .find_map(|p| policy.image_for_path(p))
        .map(str::to_string);

    Ok(SelectedResources {
        resources,
        image_override,
    })
}

impl<'a> SelectedResources<'a> {
    /// Display names, parallel to `resources`.
    pub fn names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }

    /// Environment mappings as (in-container name, host value) pairs.
    ///
    /// The target name defaults to the source name. A source that is missing
    /// from the host environment at run time is skipped with a warning; load
    /// already validated presence, so this only happens when the environment
    /// changed underneath us.
    pub fn env_mappings(
        &self,
        host_env: &std::collections::HashMap<String, String>,
    ) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for resource in &self.resources {
            for var in &resource.set.vars {
                match host_env.get(&var.source) {
                    Some(value) => out.push((var.target_name().to_string(), value.clone())),
                    None => {
                        tracing::warn!(
                            resource = resource.name,
                            var = var.source,
                            "host environment variable disappeared, skipping"
                        );
                    }
                }
            }
        }
        out
    }

    /// Additional bind mounts, with relative sources resolved against
    /// `workdir`. A source that does not exist is skipped with a warning.
    pub fn mounts(&self, workdir: &Path) -> Vec<MountEntry> {
        let mut out = Vec::new();
        for resource in &self.resources {
            for mount in &resource.set.mounts {
                let source = if Path::new(&mount.source).is_absolute() {
                    Path::new(&mount.source).to_path_buf()
                } else {
                    workdir.join(&mount.source)
                };
                if !source.exists() {
                    tracing::warn!(
                        resource = resource.name,
                        source = %source.display(),
                        "mount source does not exist, skipping"
                    );
                    continue;
                }
                out.push(MountEntry {
                    source,
                    target: mount.target.clone(),
                    read_only: mount.mode.is_read_only(),
                });
            }
        }
        out
    }

    /// Hosts allowed through the HTTP/HTTPS proxy, sorted and deduplicated.
    pub fn http_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .resources
            .iter()
            .flat_map(|r| r.set.http.iter().cloned())
            .collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// (host, TCP port) pairs allowed as direct egress, sorted and
    /// deduplicated.
    pub fn port_allows(&self) -> Vec<HostPort> {
        let mut ports: Vec<HostPort> = self
            .resources
            .iter()
            .flat_map(|r| r.set.ports.iter().cloned())
            .collect();
        ports.sort();
        ports.dedup();
        ports
    }

    /// Published ports, deduplicated on (host port, protocol) keeping the
    /// first occurrence.
    pub fn exposed_ports(&self) -> Vec<ExposedPort> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for resource in &self.resources {
            for port in &resource.set.expose {
                if seen.insert((port.host, port.protocol)) {
                    out.push(*port);
                }
            }
        }
        out
    }

    /// Root commands in resource order.
    pub fn root_commands(&self) -> Vec<String> {
        self.resources
            .iter()
            .flat_map(|r| r.set.root_commands.iter().cloned())
            .collect()
    }

    /// Whether any selected resource requests a privileged container.
    pub fn privileged(&self) -> bool {
        self.resources.iter().any(|r| r.set.options.privileged)
    }

    /// All alias calls in resource order.
    pub fn calls(&self) -> Vec<&'a CallSpec> {
        self.resources
            .iter()
            .flat_map(|r| r.set.calls.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::policy::Policy;

    fn load(yaml: &str, env: &HashMap<String, String>) -> Policy {
        Policy::parse(yaml, env, &HashMap::new()).expect("test policy loads")
    }

    const POLICY: &str = r#"
type: shai-sandbox
version: 1
image: img:1
resources:
  base:
    http: [github.com, crates.io]
  git:
    http: [github.com]
    ports:
      - host: git.internal
        port: 9418
  npm:
    http: [registry.npmjs.org]
    options:
      privileged: true
apply:
  - path: ./
    resources: [base]
  - path: ./bar
    resources: [git]
    image: bar-img
  - path: ./bar/baz
    resources: [npm]
    image: baz-img
"#;

    #[test]
    fn test_empty_paths_match_root_rules() {
        let env = HashMap::new();
        let policy = load(POLICY, &env);
        let selected = select_resources(&policy, &[], &[]).unwrap();
        assert_eq!(selected.names(), vec!["base"]);
        assert!(selected.image_override.is_none());
    }

    #[test]
    fn test_extras_come_first_in_given_order() {
        let env = HashMap::new();
        let policy = load(POLICY, &env);
        let selected = select_resources(
            &policy,
            &[],
            &["npm".to_string(), "git".to_string()],
        )
        .unwrap();
        assert_eq!(selected.names(), vec!["npm", "git", "base"]);
    }

    #[test]
    fn test_unknown_extra_is_fatal() {
        let env = HashMap::new();
        let policy = load(POLICY, &env);
        let err = select_resources(&policy, &[], &["nope".to_string()]).unwrap_err();
        assert!(matches!(err, ResourceError::UnknownResource { .. }));
    }

    #[test]
    fn test_extra_duplicating_apply_set_kept_once() {
        let env = HashMap::new();
        let policy = load(POLICY, &env);
        let selected = select_resources(&policy, &[], &["base".to_string()]).unwrap();
        assert_eq!(selected.names(), vec!["base"]);
    }

    #[test]
    fn test_image_override_most_specific_per_path() {
        let env = HashMap::new();
        let policy = load(POLICY, &env);
        let selected =
            select_resources(&policy, &["bar/baz/qux".to_string()], &[]).unwrap();
        assert_eq!(selected.image_override.as_deref(), Some("baz-img"));
    }

    #[test]
    fn test_image_override_first_supplied_path_wins() {
        let env = HashMap::new();
        let policy = load(POLICY, &env);
        let selected = select_resources(
            &policy,
            &["other".to_string(), "bar/qux".to_string()],
            &[],
        )
        .unwrap();
        // "other" matches no non-root rule, so the next supplied path decides.
        assert_eq!(selected.image_override.as_deref(), Some("bar-img"));
    }

    #[test]
    fn test_http_hosts_sorted_dedup() {
        let env = HashMap::new();
        let policy = load(POLICY, &env);
        let selected =
            select_resources(&policy, &["bar".to_string()], &[]).unwrap();
        assert_eq!(selected.http_hosts(), vec!["crates.io", "github.com"]);
    }

    #[test]
    fn test_port_allows_collected() {
        let env = HashMap::new();
        let policy = load(POLICY, &env);
        let selected = select_resources(&policy, &["bar".to_string()], &[]).unwrap();
        let ports = selected.port_allows();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].host, "git.internal");
        assert_eq!(ports[0].port, 9418);
    }

    #[test]
    fn test_privileged_or_reduced() {
        let env = HashMap::new();
        let policy = load(POLICY, &env);
        let without = select_resources(&policy, &["bar".to_string()], &[]).unwrap();
        assert!(!without.privileged());
        let with = select_resources(&policy, &["bar/baz".to_string()], &[]).unwrap();
        assert!(with.privileged());
    }

    #[test]
    fn test_env_mappings_with_rename() {
        let env: HashMap<String, String> = [
            ("TOKEN".to_string(), "secret".to_string()),
            ("HOME".to_string(), "/home/dev".to_string()),
        ]
        .into_iter()
        .collect();
        let policy = load(
            r#"
type: shai-sandbox
version: 1
image: img:1
resources:
  base:
    vars:
      - TOKEN
      - source: HOME
        target: HOST_HOME
apply:
  ./: [base]
"#,
            &env,
        );
        let selected = select_resources(&policy, &[], &[]).unwrap();
        let mappings = selected.env_mappings(&env);
        assert_eq!(
            mappings,
            vec![
                ("TOKEN".to_string(), "secret".to_string()),
                ("HOST_HOME".to_string(), "/home/dev".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_mount_source_skipped() {
        let env = HashMap::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("exists")).unwrap();
        let policy = load(
            r#"
type: shai-sandbox
version: 1
image: img:1
resources:
  base:
    mounts:
      - source: exists
        target: /mnt/exists
      - source: missing
        target: /mnt/missing
        mode: rw
apply:
  ./: [base]
"#,
            &env,
        );
        let selected = select_resources(&policy, &[], &[]).unwrap();
        let mounts = selected.mounts(dir.path());
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].source, dir.path().join("exists"));
        assert_eq!(mounts[0].target, "/mnt/exists");
        assert!(mounts[0].read_only);
    }

    #[test]
    fn test_exposed_ports_dedup_keeps_first() {
        let env = HashMap::new();
        let policy = load(
            r#"
type: shai-sandbox
version: 1
image: img:1
resources:
  a:
    expose:
      - host: 8080
        container: 80
  b:
    expose:
      - host: 9090
apply:
  - path: ./
    resources: [a]
  - path: ./svc
    resources: [b]
"#,
            &env,
        );
        let selected = select_resources(&policy, &["svc".to_string()], &[]).unwrap();
        let ports = selected.exposed_ports();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].host, 8080);
        assert_eq!(ports[0].container, 80);
        assert_eq!(ports[1].host, 9090);
    }
}
