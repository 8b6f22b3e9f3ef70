//! Alias entries: curated host commands with argument validation.

use std::collections::HashMap;

use regex::Regex;

use crate::error::AliasError;
use crate::policy::CallSpec;

/// One callable host command. Lives for the duration of the endpoint.
#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub name: String,
    pub description: String,
    pub command: String,
    /// Anchored form of the policy's `allowed-args` pattern; `None` means
    /// no additional arguments are accepted.
    pattern: Option<Regex>,
}

impl AliasEntry {
    /// Build an entry from a policy call, compiling the argument pattern as
    /// a whole-string match (`^(?:pattern)$`).
    pub fn from_call(call: &CallSpec) -> Result<Self, AliasError> {
        let pattern = match &call.allowed_args {
            Some(raw) => Some(Regex::new(&format!("^(?:{raw})$")).map_err(|e| {
                AliasError::InvalidPattern {
                    call: call.name.clone(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };
        Ok(Self {
            name: call.name.clone(),
            description: call.description.clone(),
            command: call.command.clone(),
            pattern,
        })
    }

    /// Validate the additional arguments for this entry.
    ///
    /// Arguments are joined with single spaces and matched as one string.
    /// Without a pattern, only empty/whitespace argument lists pass.
    pub fn validate_args(&self, args: &[String]) -> Result<(), AliasError> {
        let joined = args.join(" ");
        let joined = joined.trim();

        let ok = match &self.pattern {
            Some(pattern) => pattern.is_match(joined),
            None => joined.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(AliasError::ArgumentsRejected {
                name: self.name.clone(),
                args: joined.to_string(),
            })
        }
    }

    /// The shell command line for this entry with `args` appended,
    /// single-space joined and trimmed.
    pub fn command_line(&self, args: &[String]) -> String {
        let mut line = self.command.clone();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line.trim().to_string()
    }
}

/// Build the endpoint's entry table from the selected calls. Duplicate
/// names are fatal; the policy loader rules them out per apply path, but
/// CLI-supplied extra resource sets can still collide.
pub fn build_entries(calls: &[&CallSpec]) -> Result<HashMap<String, AliasEntry>, AliasError> {
    let mut entries = HashMap::with_capacity(calls.len());
    for call in calls {
        let entry = AliasEntry::from_call(call)?;
        if entries.insert(entry.name.clone(), entry).is_some() {
            return Err(AliasError::DuplicateTool {
                name: call.name.clone(),
            });
        }
    }
    Ok(entries)
}
