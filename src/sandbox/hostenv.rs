//! Host environment and identity: the invoking process's environment as a
//! map, and its UID/GID with the root-substitution rule.

use std::collections::HashMap;

use crate::util::split_key_value;

/// UID/GID used inside the sandbox when the host process runs as root, so
/// firewall rules never bind to UID 0.
pub const ROOT_SUBSTITUTE_ID: u32 = 4747;

/// The invoking user's identity as seen by the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostIds {
    pub uid: u32,
    pub gid: u32,
}

/// Build an environment map from raw `KEY=VALUE` entries, splitting each on
/// the first `=` and preserving value bytes verbatim. Entries without a key
/// are dropped.
pub fn env_from_entries<I, S>(entries: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut map = HashMap::new();
    for entry in entries {
        if let Some((key, value)) = split_key_value(entry.as_ref()) {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

/// Snapshot the host process environment.
pub fn host_env() -> HashMap<String, String> {
    std::env::vars_os()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        })
        .collect()
}

/// Apply the root-substitution rule: UID 0 maps both ids to
/// [`ROOT_SUBSTITUTE_ID`].
pub fn substitute_root(uid: u32, gid: u32) -> HostIds {
    if uid == 0 {
        HostIds {
            uid: ROOT_SUBSTITUTE_ID,
            gid: ROOT_SUBSTITUTE_ID,
        }
    } else {
        HostIds { uid, gid }
    }
}

/// The invoking process's UID/GID, with the root substitution applied.
pub fn host_ids() -> HostIds {
    // SAFETY: getuid/getgid are always safe to call.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    substitute_root(uid, gid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_from_entries_basic() {
        let map = env_from_entries(["PATH=/usr/bin", "HOME=/root"]);
        assert_eq!(map["PATH"], "/usr/bin");
        assert_eq!(map["HOME"], "/root");
    }

    #[test]
    fn test_env_value_bytes_preserved() {
        let map = env_from_entries(["A=", "B= x ", "C=a=b", "D=line1\nline2", "E=héllo"]);
        assert_eq!(map["A"], "");
        assert_eq!(map["B"], " x ");
        assert_eq!(map["C"], "a=b");
        assert_eq!(map["D"], "line1\nline2");
        assert_eq!(map["E"], "héllo");
    }

    #[test]
    fn test_env_keyless_entries_dropped() {
        let map = env_from_entries(["=value", "novalue"]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_env_last_duplicate_wins() {
        let map = env_from_entries(["K=first", "K=second"]);
        assert_eq!(map["K"], "second");
    }

    #[test]
    fn test_root_substitution() {
        assert_eq!(
            substitute_root(0, 0),
            HostIds {
                uid: ROOT_SUBSTITUTE_ID,
                gid: ROOT_SUBSTITUTE_ID
            }
        );
        // Root uid forces both ids even when the gid is not 0.
        assert_eq!(
            substitute_root(0, 100),
            HostIds {
                uid: ROOT_SUBSTITUTE_ID,
                gid: ROOT_SUBSTITUTE_ID
            }
        );
        assert_eq!(substitute_root(1000, 1000), HostIds { uid: 1000, gid: 1000 });
    }

    #[test]
    fn test_host_env_contains_path() {
        // PATH is present in any reasonable test environment.
        let env = host_env();
        assert!(env.contains_key("PATH"));
    }
}
