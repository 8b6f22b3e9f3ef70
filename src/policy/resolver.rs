//! Apply-rule resolution: which resource sets and image apply to a path.
//!
//! Rule paths match on whole path segments. `"bar"` matches `"bar"` and
//! `"bar/baz"` but not `"bar-boo"`; `"."` and `"./"` match every candidate.
//! Image overrides come from the longest matching non-root rule, with ties
//! resolved to the earliest declared rule.

use std::collections::HashSet;

use crate::error::PolicyError;
use crate::policy::{Policy, ResourceSet};

/// A resource set selected for the current invocation, borrowing the set
/// from the policy it came from.
#[derive(Debug, Clone)]
pub struct ResolvedResource<'a> {
    pub name: String,
    pub set: &'a ResourceSet,
}

/// Split a workspace-relative path into its meaningful segments.
///
/// Empty segments and `"."` are dropped, so `"./"`, `"."`, and `""` all
/// normalize to the root (no segments).
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

/// Whether `rule_path` applies to `candidate`: the candidate's segments must
/// begin with the rule's segments. A root rule matches everything.
pub fn rule_matches(rule_path: &str, candidate: &str) -> bool {
    let rule = path_segments(rule_path);
    if rule.is_empty() {
        return true;
    }
    let cand = path_segments(candidate);
    cand.len() >= rule.len() && cand[..rule.len()] == rule[..]
}

impl Policy {
    /// Resolve the ordered, deduplicated resource sets that apply to `paths`.
    ///
    /// Rules contribute in declaration order; a rule contributes when it
    /// matches any of the query paths. Duplicate set names keep their first
    /// position.
    pub fn resolve_resources(&self, paths: &[String]) -> Vec<ResolvedResource<'_>> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();

        for rule in &self.apply {
            if !paths.iter().any(|p| rule_matches(&rule.path, p)) {
                continue;
            }
            for name in &rule.resources {
                if !seen.insert(name.clone()) {
                    continue;
                }
                if let Some(set) = self.resources.get(name) {
                    resolved.push(ResolvedResource {
                        name: name.clone(),
                        set,
                    });
                }
            }
        }

        resolved
    }

    /// The image override for a single path: longest matching non-root rule
    /// that carries an image; ties go to the earliest declared rule.
    pub fn image_for_path(&self, path: &str) -> Option<&str> {
        let mut best: Option<(usize, &str)> = None;

        for rule in &self.apply {
            let depth = path_segments(&rule.path).len();
            if depth == 0 {
                continue;
            }
            if !rule_matches(&rule.path, path) {
                continue;
            }
            if let Some(image) = rule.image.as_deref()
                && !image.is_empty()
                && best.is_none_or(|(d, _)| depth > d)
            {
                best = Some((depth, image));
            }
        }

        best.map(|(_, image)| image)
    }

    /// Cross-resource-set invariants, checked once per declared rule path:
    /// call names and (host port, protocol) pairs must be unique across the
    /// resource sets resolved for that path.
    pub(crate) fn validate_path_conflicts(&self) -> Result<(), PolicyError> {
        for rule in &self.apply {
            let resolved = self.resolve_resources(std::slice::from_ref(&rule.path));

            let mut calls = HashSet::new();
            let mut ports = HashSet::new();
            for resource in &resolved {
                for call in &resource.set.calls {
                    if !calls.insert(call.name.clone()) {
                        return Err(PolicyError::ConflictingCalls {
                            path: rule.path.clone(),
                            name: call.name.clone(),
                        });
                    }
                }
                for expose in &resource.set.expose {
                    if !ports.insert((expose.host, expose.protocol)) {
                        return Err(PolicyError::ConflictingPorts {
                            path: rule.path.clone(),
                            host_port: expose.host,
                            protocol: expose.protocol.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
