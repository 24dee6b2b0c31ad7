//! Remote registry: deployable targets resolved from git remotes plus
//! environment configuration.
//!
//! The working tree's configured push remotes name the fleet; per-remote
//! environment variables (`<NAME>_HOST`, `<NAME>_REMOTE_WORKTREE`,
//! `<NAME>_REMOTE_GITDIR`) supply connection details, with `REMOTE_WORKTREE`
//! and `REMOTE_GITDIR` as fleet-wide fallbacks.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// What a remote is for. `origin` is the canonical source host, `build`
/// triggers a CI build, everything else is a live application server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteRole {
    Origin,
    Build,
    Server,
}

/// One resolved push target.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTarget {
    pub name: String,
    pub url: String,
    pub role: RemoteRole,
    /// SSH host address. Empty for origin/build remotes, which are push-only.
    pub host: String,
    pub ssh_user: String,
    /// Private key path for the push. Empty when no key is configured.
    pub private_key: String,
    pub work_tree: String,
    pub git_dir: String,
}

impl RemoteTarget {
    /// Server remotes get a session and a deploy sequence; origin and build
    /// remotes only receive pushes.
    pub fn is_deployable(&self) -> bool {
        self.role == RemoteRole::Server
    }
}

/// Environment-derived deployment configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    vars: HashMap<String, String>,
}

impl RemoteConfig {
    pub fn from_env() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.as_str()).filter(|v| !v.is_empty())
    }

    /// SSH user for server remotes. `DEPLOY_USER` wins over the legacy
    /// `DEPLOY_USERNAME`; unconfigured fleets default to `ec2-user`.
    pub fn ssh_user(&self) -> String {
        self.get("DEPLOY_USER")
            .or_else(|| self.get("DEPLOY_USERNAME"))
            .unwrap_or("ec2-user")
            .to_string()
    }

    pub fn deploy_key(&self) -> Option<&str> {
        self.get("DEPLOY_KEY")
    }

    pub fn require_deploy_key(&self) -> Result<&str> {
        self.deploy_key()
            .ok_or_else(|| Error::config_missing_key("DEPLOY_KEY", None))
    }

    pub fn build_key(&self) -> Option<&str> {
        self.get("BUILD_KEY")
    }

    pub fn require_build_key(&self) -> Result<&str> {
        self.build_key()
            .ok_or_else(|| Error::config_missing_key("BUILD_KEY", None))
    }

    /// Per-remote value with fleet-wide fallback: `<NAME>_<SUFFIX>` first,
    /// then the bare `<SUFFIX>` variable.
    fn scoped(&self, remote: &str, suffix: &str) -> Option<&str> {
        let key = format!("{}_{}", env_prefix(remote), suffix);
        self.get(&key).or_else(|| self.get(suffix))
    }

    fn require_scoped(&self, remote: &str, suffix: &str) -> Result<String> {
        self.scoped(remote, suffix)
            .map(|v| v.to_string())
            .ok_or_else(|| {
                Error::config_missing_key(
                    format!("{}_{}", env_prefix(remote), suffix),
                    Some(remote.to_string()),
                )
            })
    }

    /// Resolve one named remote into a target. Server remotes require a
    /// host, a work tree and a git dir; origin and build remotes only need
    /// their push key.
    pub fn target(&self, name: &str, url: &str) -> Result<RemoteTarget> {
        let role = role_for(name);

        match role {
            RemoteRole::Origin => Ok(RemoteTarget {
                name: name.to_string(),
                url: url.to_string(),
                role,
                host: String::new(),
                ssh_user: self.ssh_user(),
                private_key: self.deploy_key().unwrap_or("").to_string(),
                work_tree: String::new(),
                git_dir: String::new(),
            }),
            RemoteRole::Build => Ok(RemoteTarget {
                name: name.to_string(),
                url: url.to_string(),
                role,
                host: String::new(),
                ssh_user: self.ssh_user(),
                private_key: self.build_key().unwrap_or("").to_string(),
                work_tree: String::new(),
                git_dir: String::new(),
            }),
            RemoteRole::Server => {
                let host = self
                    .get(&format!("{}_HOST", env_prefix(name)))
                    .map(|v| v.to_string())
                    .ok_or_else(|| {
                        Error::config_missing_key(
                            format!("{}_HOST", env_prefix(name)),
                            Some(name.to_string()),
                        )
                    })?;
                let work_tree = self.require_scoped(name, "REMOTE_WORKTREE")?;
                let git_dir = self.require_scoped(name, "REMOTE_GITDIR")?;

                Ok(RemoteTarget {
                    name: name.to_string(),
                    url: url.to_string(),
                    role,
                    host,
                    ssh_user: self.ssh_user(),
                    private_key: self.require_deploy_key()?.to_string(),
                    work_tree,
                    git_dir,
                })
            }
        }
    }

    /// Build the registry from raw `git remote -v` output.
    ///
    /// Only push entries count, `upstream` is never a deploy target, and a
    /// server remote with incomplete configuration is skipped with a notice
    /// rather than failing the whole registry.
    pub fn resolve_all(&self, remote_lines: &[String]) -> Result<Vec<RemoteTarget>> {
        let mut targets = Vec::new();

        for (name, url) in parse_push_remotes(remote_lines) {
            if name == "upstream" {
                continue;
            }

            match self.target(&name, &url) {
                Ok(target) => targets.push(target),
                Err(err) if role_for(&name) == RemoteRole::Server => {
                    log_status!(
                        "remotes",
                        "Skipping remote '{}': {}",
                        name,
                        err.message
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(targets)
    }
}

/// Extract `(name, url)` pairs for push remotes from `git remote -v` lines.
pub fn parse_push_remotes(lines: &[String]) -> Vec<(String, String)> {
    let mut remotes = Vec::new();

    for line in lines {
        if !line.contains("(push)") {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(name), Some(url)) = (parts.next(), parts.next()) else {
            continue;
        };
        if remotes.iter().any(|(n, _)| n == name) {
            continue;
        }
        remotes.push((name.to_string(), url.to_string()));
    }

    remotes
}

fn role_for(name: &str) -> RemoteRole {
    match name {
        "origin" => RemoteRole::Origin,
        "build" => RemoteRole::Build,
        _ => RemoteRole::Server,
    }
}

fn env_prefix(remote: &str) -> String {
    remote.to_uppercase().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> RemoteConfig {
        RemoteConfig::from_map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn remote_lines(entries: &[(&str, &str)]) -> Vec<String> {
        entries
            .iter()
            .flat_map(|(name, url)| {
                vec![
                    format!("{}\t{} (fetch)", name, url),
                    format!("{}\t{} (push)", name, url),
                ]
            })
            .collect()
    }

    #[test]
    fn push_remotes_are_deduplicated() {
        let lines = remote_lines(&[("origin", "git@example.com:app.git")]);
        let remotes = parse_push_remotes(&lines);
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].0, "origin");
    }

    #[test]
    fn ssh_user_falls_back_to_default() {
        assert_eq!(config(&[]).ssh_user(), "ec2-user");
        assert_eq!(config(&[("DEPLOY_USERNAME", "deployer")]).ssh_user(), "deployer");
        assert_eq!(
            config(&[("DEPLOY_USER", "app"), ("DEPLOY_USERNAME", "deployer")]).ssh_user(),
            "app"
        );
    }

    #[test]
    fn server_remote_resolves_with_scoped_overrides() {
        let cfg = config(&[
            ("DEPLOY_KEY", "~/.ssh/deploy"),
            ("STAGING_HOST", "staging.example.com"),
            ("REMOTE_WORKTREE", "/srv/app"),
            ("REMOTE_GITDIR", "/srv/app.git"),
            ("STAGING_REMOTE_WORKTREE", "/srv/staging"),
        ]);

        let target = cfg.target("staging", "ssh://staging/app").unwrap();
        assert_eq!(target.host, "staging.example.com");
        assert_eq!(target.work_tree, "/srv/staging");
        assert_eq!(target.git_dir, "/srv/app.git");
        assert!(target.is_deployable());
    }

    #[test]
    fn missing_host_is_a_config_error() {
        let cfg = config(&[
            ("DEPLOY_KEY", "~/.ssh/deploy"),
            ("REMOTE_WORKTREE", "/srv/app"),
            ("REMOTE_GITDIR", "/srv/app.git"),
        ]);
        let err = cfg.target("staging", "ssh://staging/app").unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::ConfigMissingKey);
    }

    #[test]
    fn registry_skips_upstream_and_misconfigured_servers() {
        let cfg = config(&[
            ("DEPLOY_KEY", "~/.ssh/deploy"),
            ("STAGING_HOST", "staging.example.com"),
            ("REMOTE_WORKTREE", "/srv/app"),
            ("REMOTE_GITDIR", "/srv/app.git"),
        ]);
        let lines = remote_lines(&[
            ("origin", "git@example.com:app.git"),
            ("upstream", "git@example.com:upstream.git"),
            ("staging", "ssh://staging/app"),
            ("unconfigured", "ssh://mystery/app"),
        ]);

        let targets = cfg.resolve_all(&lines).unwrap();
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["origin", "staging"]);
    }

    #[test]
    fn build_remote_uses_build_key() {
        let cfg = config(&[("BUILD_KEY", "~/.ssh/ci"), ("DEPLOY_KEY", "~/.ssh/deploy")]);
        let target = cfg.target("build", "ssh://build/app").unwrap();
        assert_eq!(target.role, RemoteRole::Build);
        assert_eq!(target.private_key, "~/.ssh/ci");
        assert!(!target.is_deployable());
    }
}
