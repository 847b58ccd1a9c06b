// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Layered environment composition for spawned children.
//!
//! Order: daemon's own process environment, overlaid by profile-provided
//! variables, `${VAR}`-expanded against the process environment, then
//! overlaid by the authentication variables last so they can never be
//! shadowed by a profile override.

use std::collections::HashMap;

/// Variables that carry authentication material and must win any conflict.
pub const RESERVED_AUTH_KEYS: &[&str] = &["ANTHROPIC_API_KEY", "OPENAI_API_KEY", "P2PD_AUTH_TOKEN"];

#[derive(Debug)]
pub struct EnvExpansionError {
    pub outer_var: String,
    pub missing_ref: String,
}

impl std::fmt::Display for EnvExpansionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unexpanded reference `{}` left in auth variable `{}` after expansion",
            self.missing_ref, self.outer_var
        )
    }
}

impl std::error::Error for EnvExpansionError {}

/// Compose a child's environment following the layering contract above.
///
/// `process_env` is the daemon's own environment (or a fake for tests),
/// `profile_overrides` are profile-supplied variables, and `auth_vars` are
/// the authentication variables that must be overlaid last.
pub fn compose_child_env(
    process_env: &HashMap<String, String>,
    profile_overrides: &HashMap<String, String>,
    auth_vars: &HashMap<String, String>,
) -> Result<HashMap<String, String>, EnvExpansionError> {
    let mut env = process_env.clone();
    for (k, v) in profile_overrides {
        env.insert(k.clone(), v.clone());
    }

    let expanded: HashMap<String, String> =
        env.iter().map(|(k, v)| (k.clone(), expand(v, process_env))).collect();
    env = expanded;

    for (k, v) in auth_vars {
        env.insert(k.clone(), v.clone());
    }

    for key in RESERVED_AUTH_KEYS {
        if let Some(value) = env.get(*key) {
            if let Some(missing) = find_unexpanded_reference(value) {
                return Err(EnvExpansionError { outer_var: (*key).to_owned(), missing_ref: missing });
            }
        }
    }

    Ok(env)
}

/// Expand `${VAR}` references in `value` against `env`. Unknown references
/// are left verbatim (detected afterward for auth variables specifically).
fn expand(value: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after_marker = &rest[start + 2..];
        let Some(end) = after_marker.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let var_name = &after_marker[..end];
        match env.get(var_name) {
            Some(resolved) => out.push_str(resolved),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after_marker[end + 1..];
    }
    out.push_str(rest);
    out
}

fn find_unexpanded_reference(value: &str) -> Option<String> {
    let start = value.find("${")?;
    let end = value[start + 2..].find('}')? + start + 2;
    Some(value[start..=end].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn profile_overrides_shadow_process_env() {
        let process = map(&[("HOME", "/root")]);
        let profile = map(&[("HOME", "/custom")]);
        let env = compose_child_env(&process, &profile, &HashMap::new()).unwrap();
        assert_eq!(env.get("HOME").unwrap(), "/custom");
    }

    #[test]
    fn auth_vars_cannot_be_shadowed_by_profile() {
        let process = map(&[]);
        let profile = map(&[("ANTHROPIC_API_KEY", "fake")]);
        let auth = map(&[("ANTHROPIC_API_KEY", "real")]);
        let env = compose_child_env(&process, &profile, &auth).unwrap();
        assert_eq!(env.get("ANTHROPIC_API_KEY").unwrap(), "real");
    }

    #[test]
    fn expands_var_reference_against_process_env() {
        let process = map(&[("BASE_URL", "https://example.com"), ("FULL_URL", "${BASE_URL}/api")]);
        let env = compose_child_env(&process, &HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(env.get("FULL_URL").unwrap(), "https://example.com/api");
    }

    #[test]
    fn profile_override_expands_against_process_env_not_other_overrides() {
        let process = map(&[("BASE_URL", "https://example.com")]);
        let profile = map(&[("FULL_URL", "${BASE_URL}/api"), ("OTHER", "${FULL_URL}/x")]);
        let env = compose_child_env(&process, &profile, &HashMap::new()).unwrap();
        // FULL_URL references a process-env var: resolves.
        assert_eq!(env.get("FULL_URL").unwrap(), "https://example.com/api");
        // OTHER references a profile-only var, which is not visible to
        // expansion (expansion runs against process_env, before profile
        // overrides are merged in): left verbatim.
        assert_eq!(env.get("OTHER").unwrap(), "${FULL_URL}/x");
    }

    #[test]
    fn unexpanded_reference_in_auth_variable_fails_fast() {
        let process = map(&[]);
        let auth = map(&[("ANTHROPIC_API_KEY", "${MISSING_SECRET}")]);
        let err = compose_child_env(&process, &HashMap::new(), &auth).unwrap_err();
        assert_eq!(err.outer_var, "ANTHROPIC_API_KEY");
        assert_eq!(err.missing_ref, "${MISSING_SECRET}");
    }
}
