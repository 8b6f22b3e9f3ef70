//! `${{ scope.name }}` template expansion for policy documents.
//!
//! Three scopes exist: `env` (host environment), `vars` (caller-supplied
//! variables), and `conf` (values derived from the policy itself:
//! `TARGET_USER` and `WORKSPACE`). The `user` and `workspace` fields are
//! expanded before `conf` exists, so they only see `env` and `vars`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::PolicyError;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*([A-Za-z]+)\.([A-Za-z0-9_]+)\s*\}\}").expect("static pattern compiles")
});

/// Lookup scopes available to one expansion pass.
pub struct Scopes<'a> {
    pub env: &'a HashMap<String, String>,
    pub vars: &'a HashMap<String, String>,
    /// `None` while expanding the fields `conf` is derived from.
    pub conf: Option<&'a HashMap<String, String>>,
}

impl<'a> Scopes<'a> {
    fn lookup(&self, scope: &str, name: &str) -> Result<Option<&'a str>, PolicyError> {
        let map = match scope {
            "env" => Some(self.env),
            "vars" => Some(self.vars),
            "conf" => self.conf,
            other => {
                return Err(PolicyError::UnknownTemplateScope {
                    scope: other.to_string(),
                    reference: format!("{scope}.{name}"),
                });
            }
        };
        Ok(map.and_then(|m| m.get(name)).map(String::as_str))
    }
}

/// Expand every `${{ scope.name }}` reference in `input`.
///
/// Any reference that does not resolve is fatal, including leftover `${{`
/// text the reference syntax did not match.
pub fn expand(input: &str, scopes: &Scopes<'_>) -> Result<String, PolicyError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in REFERENCE.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        let scope = &caps[1];
        let name = &caps[2];

        let value = scopes
            .lookup(scope, name)?
            .ok_or_else(|| PolicyError::UnresolvedTemplate {
                reference: format!("{scope}.{name}"),
            })?;

        out.push_str(&input[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&input[last..]);

    if let Some(idx) = out.find("${{") {
        let tail: String = out[idx..].chars().take(40).collect();
        return Err(PolicyError::UnresolvedTemplate { reference: tail });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes<'a>(
        env: &'a HashMap<String, String>,
        vars: &'a HashMap<String, String>,
    ) -> Scopes<'a> {
        Scopes {
            env,
            vars,
            conf: None,
        }
    }

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_expand_env_reference() {
        let env = map(&[("HOME", "/home/dev")]);
        let vars = map(&[]);
        let out = expand("${{ env.HOME }}/.cache", &scopes(&env, &vars)).unwrap();
        assert_eq!(out, "/home/dev/.cache");
    }

    #[test]
    fn test_expand_vars_reference_without_spaces() {
        let env = map(&[]);
        let vars = map(&[("branch", "main")]);
        let out = expand("refs/${{vars.branch}}", &scopes(&env, &vars)).unwrap();
        assert_eq!(out, "refs/main");
    }

    #[test]
    fn test_expand_conf_reference() {
        let env = map(&[]);
        let vars = map(&[]);
        let conf = map(&[("WORKSPACE", "/src")]);
        let s = Scopes {
            env: &env,
            vars: &vars,
            conf: Some(&conf),
        };
        assert_eq!(expand("${{ conf.WORKSPACE }}/out", &s).unwrap(), "/src/out");
    }

    #[test]
    fn test_conf_unavailable_is_unresolved() {
        let env = map(&[]);
        let vars = map(&[]);
        let err = expand("${{ conf.WORKSPACE }}", &scopes(&env, &vars)).unwrap_err();
        match err {
            PolicyError::UnresolvedTemplate { reference } => {
                assert_eq!(reference, "conf.WORKSPACE");
            }
            other => panic!("expected UnresolvedTemplate, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_reference_names_it() {
        let env = map(&[]);
        let vars = map(&[]);
        let err = expand("x ${{ env.MISSING }} y", &scopes(&env, &vars)).unwrap_err();
        assert!(err.to_string().contains("env.MISSING"));
    }

    #[test]
    fn test_unknown_scope_is_fatal() {
        let env = map(&[]);
        let vars = map(&[]);
        let err = expand("${{ secrets.TOKEN }}", &scopes(&env, &vars)).unwrap_err();
        match err {
            PolicyError::UnknownTemplateScope { scope, .. } => assert_eq!(scope, "secrets"),
            other => panic!("expected UnknownTemplateScope, got {other:?}"),
        }
    }

    #[test]
    fn test_multiple_references_in_one_string() {
        let env = map(&[("A", "1")]);
        let vars = map(&[("b", "2")]);
        let out = expand("${{ env.A }}-${{ vars.b }}-${{ env.A }}", &scopes(&env, &vars)).unwrap();
        assert_eq!(out, "1-2-1");
    }

    #[test]
    fn test_leftover_open_braces_are_fatal() {
        let env = map(&[]);
        let vars = map(&[]);
        assert!(expand("${{ not a reference", &scopes(&env, &vars)).is_err());
    }

    #[test]
    fn test_plain_string_passes_through() {
        let env = map(&[]);
        let vars = map(&[]);
        assert_eq!(
            expand("no templates here", &scopes(&env, &vars)).unwrap(),
            "no templates here"
        );
    }

    #[test]
    fn test_empty_value_substitutes() {
        let env = map(&[("EMPTY", "")]);
        let vars = map(&[]);
        assert_eq!(expand("[${{ env.EMPTY }}]", &scopes(&env, &vars)).unwrap(), "[]");
    }
}
