//! Database credentials and backup/restore command composition.
//!
//! Credentials are read from the remote's own env file and only ever used
//! inside commands executed on that remote; they are never persisted
//! locally. Every key is required. A deploy with an unreadable database
//! configuration fails closed rather than proceeding without a backup.

use chrono::Utc;

use crate::envfile;
use crate::error::{Error, Result};
use crate::remotes::RemoteTarget;
use crate::utils::shell;

/// Backups live in a world-writable path present on every fleet host.
pub const BACKUP_DIR: &str = "/var/tmp";

const REQUIRED_KEYS: [&str; 4] = ["DB_HOST", "DB_DATABASE", "DB_USERNAME", "DB_PASSWORD"];

#[derive(Debug, Clone)]
pub struct DbCredentials {
    pub host: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbCredentials {
    /// Extract credentials from env file content fetched from a remote.
    /// All four connection keys must be present and non-empty.
    pub fn from_env_content(content: &str, remote: &str) -> Result<Self> {
        let mut values = Vec::with_capacity(REQUIRED_KEYS.len());
        for key in REQUIRED_KEYS {
            let value = envfile::lookup(content, key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::config_missing_key(key, Some(remote.to_string())))?;
            values.push(value);
        }

        let mut values = values.into_iter();
        Ok(Self {
            host: values.next().unwrap_or_default(),
            database: values.next().unwrap_or_default(),
            username: values.next().unwrap_or_default(),
            password: values.next().unwrap_or_default(),
        })
    }

    fn connection_args(&self) -> String {
        format!(
            "-h {} -u {} -p{}",
            shell::quote_arg(&self.host),
            shell::quote_arg(&self.username),
            shell::quote_arg(&self.password)
        )
    }

    /// Dump the database into `backup_path`.
    pub fn dump_command(&self, backup_path: &str) -> String {
        format!(
            "mysqldump {} {} > {}",
            self.connection_args(),
            shell::quote_arg(&self.database),
            shell::quote_path(backup_path)
        )
    }

    /// Drop and recreate the database, leaving it empty for a restore.
    pub fn drop_and_create_command(&self) -> String {
        format!(
            "mysql {} -e {}",
            self.connection_args(),
            shell::quote_arg(&format!(
                "DROP DATABASE {db}; CREATE DATABASE {db};",
                db = self.database
            ))
        )
    }

    /// Reload the database from `backup_path`.
    pub fn restore_command(&self, backup_path: &str) -> String {
        format!(
            "mysql {} {} < {}",
            self.connection_args(),
            shell::quote_arg(&self.database),
            shell::quote_path(backup_path)
        )
    }
}

/// One timestamped backup file on a remote.
#[derive(Debug, Clone)]
pub struct BackupPlan {
    pub file_name: String,
    pub remote_path: String,
}

impl BackupPlan {
    pub fn new(credentials: &DbCredentials) -> Self {
        Self::at(credentials, Utc::now().timestamp())
    }

    pub fn at(credentials: &DbCredentials, epoch_secs: i64) -> Self {
        let file_name = format!("{}_{}.sql", credentials.database, epoch_secs);
        let remote_path = format!("{}/{}", BACKUP_DIR, file_name);
        Self {
            file_name,
            remote_path,
        }
    }
}

/// Mirror a remote backup file into the local backup directory.
pub fn scp_mirror_command(target: &RemoteTarget, plan: &BackupPlan) -> String {
    let mut cmd = String::from("scp ");
    if !target.private_key.is_empty() {
        // The quotes would hide a leading tilde from the shell, so expand
        // it here before quoting.
        let key = shellexpand::tilde(&target.private_key).to_string();
        cmd.push_str(&format!("-i {} ", shell::quote_path(&key)));
    }
    cmd.push_str(&format!(
        "{}@{}:{} {}/",
        target.ssh_user, target.host, plan.remote_path, BACKUP_DIR
    ));
    cmd
}

/// A backup is only considered written when it appears in a directory
/// listing of the backup path.
pub fn listing_contains(listing: &[String], file_name: &str) -> bool {
    listing.iter().any(|line| line.contains(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remotes::RemoteRole;

    const REMOTE_ENV: &str = "\
APP_ENV=production
DB_HOST=10.0.0.2
DB_DATABASE=app
DB_USERNAME=app_user
DB_PASSWORD='s3cret!'
";

    fn credentials() -> DbCredentials {
        DbCredentials::from_env_content(REMOTE_ENV, "staging").unwrap()
    }

    #[test]
    fn parses_all_four_connection_keys() {
        let creds = credentials();
        assert_eq!(creds.host, "10.0.0.2");
        assert_eq!(creds.database, "app");
        assert_eq!(creds.username, "app_user");
        assert_eq!(creds.password, "s3cret!");
    }

    #[test]
    fn any_missing_key_fails_closed() {
        let content = "DB_HOST=10.0.0.2\nDB_DATABASE=app\nDB_USERNAME=app_user\n";
        let err = DbCredentials::from_env_content(content, "staging").unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::ConfigMissingKey);
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let content = REMOTE_ENV.replace("DB_PASSWORD='s3cret!'", "DB_PASSWORD=");
        assert!(DbCredentials::from_env_content(&content, "staging").is_err());
    }

    #[test]
    fn backup_file_is_timestamped_under_var_tmp() {
        let plan = BackupPlan::at(&credentials(), 1700000000);
        assert_eq!(plan.file_name, "app_1700000000.sql");
        assert_eq!(plan.remote_path, "/var/tmp/app_1700000000.sql");
    }

    #[test]
    fn dump_and_restore_round_the_same_path() {
        let creds = credentials();
        let plan = BackupPlan::at(&creds, 1700000000);
        let dump = creds.dump_command(&plan.remote_path);
        assert!(dump.starts_with("mysqldump -h 10.0.0.2 -u app_user -p"));
        assert!(dump.ends_with("> '/var/tmp/app_1700000000.sql'"));

        let restore = creds.restore_command(&plan.remote_path);
        assert!(restore.contains(" app < '/var/tmp/app_1700000000.sql'"));
    }

    #[test]
    fn drop_and_create_targets_the_configured_database() {
        let cmd = credentials().drop_and_create_command();
        assert!(cmd.contains("'DROP DATABASE app; CREATE DATABASE app;'"));
    }

    #[test]
    fn scp_mirror_addresses_the_remote_backup() {
        let target = RemoteTarget {
            name: "staging".to_string(),
            url: "ssh://staging/app".to_string(),
            role: RemoteRole::Server,
            host: "staging.example.com".to_string(),
            ssh_user: "ec2-user".to_string(),
            private_key: "~/.ssh/deploy".to_string(),
            work_tree: "/srv/app".to_string(),
            git_dir: "/srv/app.git".to_string(),
        };
        let plan = BackupPlan::at(&credentials(), 1700000000);
        let cmd = scp_mirror_command(&target, &plan);
        let key = shellexpand::tilde("~/.ssh/deploy").to_string();
        assert_eq!(
            cmd,
            format!(
                "scp -i '{}' ec2-user@staging.example.com:/var/tmp/app_1700000000.sql /var/tmp/",
                key
            )
        );
        // The identity path must reach scp expanded; a quoted tilde would
        // never be resolved by the shell.
        assert!(!cmd.contains("'~"));
    }

    #[test]
    fn listing_check_is_substring_containment() {
        let listing = vec!["app_1699.sql".to_string(), "app_1700000000.sql".to_string()];
        assert!(listing_contains(&listing, "app_1700000000.sql"));
        assert!(!listing_contains(&listing, "app_1800000000.sql"));
    }
}
