//! Rollback: restore a remote to the anchor captured before the push.
//!
//! The database comes back from the verified backup (when one was taken),
//! the repository is hard-reset to the anchor commit, and the result is
//! verified by a verbatim hash comparison. Any failure in here is terminal;
//! no further automated recovery is ever attempted.

use crate::error::{Error, Result};
use crate::git::remote_git_prefix;
use crate::pipeline::{app_batch, DeployRun, RUN_TESTS};
use crate::session::{CommandSession, SessionOutput};

const TEST_FAILURE_TOKEN: &str = "FAILURES!";

/// Restore the run's remote to its rollback anchor.
///
/// `Ok(())` means the remote is back at the anchor with a passing test
/// suite; the overall deployment is still reported as failed by the caller.
pub fn run(session: &dyn CommandSession, run: &DeployRun) -> Result<()> {
    let target = &run.target;
    let anchor = run
        .rollback_commit
        .as_deref()
        .ok_or_else(|| Error::rollback_failed("no rollback anchor was captured"))?;

    log_status!("rollback", "Rolling back '{}' to {}", target.name, anchor);

    // Only restore the database when a verified backup exists; migrations
    // never ran without one, so the database is untouched otherwise.
    if let (Some(credentials), Some(backup)) = (&run.db_credentials, &run.backup) {
        log_status!("rollback", "Restoring database from {}", backup.remote_path);
        exec(session, &[credentials.drop_and_create_command()], "drop and recreate database")?;
        exec(
            session,
            &[credentials.restore_command(&backup.remote_path)],
            "reload database from backup",
        )?;
    }

    let prefix = remote_git_prefix(&target.git_dir, &target.work_tree);
    exec(
        session,
        &[
            format!("{} reset --hard {}", prefix, anchor),
            format!("{} submodule update --init --recursive", prefix),
            format!("{} clean -fd", prefix),
        ],
        "reset repository to anchor",
    )?;

    let head = exec(
        session,
        &[format!("{} rev-parse --verify HEAD", prefix)],
        "re-read remote HEAD",
    )?;
    let remote_head = head.lines.first().cloned().unwrap_or_default();
    if remote_head != anchor {
        return Err(Error::rollback_failed(format!(
            "remote HEAD is {} after reset, expected {}",
            remote_head, anchor
        )));
    }

    let tests = session.run_capture(&app_batch(&target.work_tree, RUN_TESTS))?;
    if !tests.success() || tests.contains(TEST_FAILURE_TOKEN) {
        return Err(Error::rollback_failed(format!(
            "test suite still failing on '{}' after rollback",
            target.name
        )));
    }

    log_status!("rollback", "'{}' restored to {}", target.name, anchor);
    Ok(())
}

fn exec(
    session: &dyn CommandSession,
    commands: &[String],
    what: &str,
) -> Result<SessionOutput> {
    let output = session.run_capture(commands)?;
    if !output.success() {
        return Err(Error::rollback_failed(format!(
            "{} failed (exit {}): {}",
            what,
            output.exit_code,
            output.lines.last().cloned().unwrap_or_default()
        )));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BackupPlan, DbCredentials};
    use crate::flags::DeployFlags;
    use crate::remotes::{RemoteRole, RemoteTarget};
    use crate::testing::{ScriptedReply, ScriptedSession};
    use crate::ErrorCode;

    const ANCHOR: &str = "0a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b";

    fn target() -> RemoteTarget {
        RemoteTarget {
            name: "staging".to_string(),
            url: "ssh://staging/app".to_string(),
            role: RemoteRole::Server,
            host: "staging.example.com".to_string(),
            ssh_user: "ec2-user".to_string(),
            private_key: "~/.ssh/deploy".to_string(),
            work_tree: "/srv/app".to_string(),
            git_dir: "/srv/app.git".to_string(),
        }
    }

    fn credentials() -> DbCredentials {
        DbCredentials {
            host: "10.0.0.2".to_string(),
            database: "app".to_string(),
            username: "app_user".to_string(),
            password: "secret".to_string(),
        }
    }

    fn run_record(with_backup: bool) -> DeployRun {
        let creds = credentials();
        let backup = BackupPlan::at(&creds, 1700000000);
        DeployRun {
            flags: DeployFlags::default(),
            target: target(),
            push_timestamp: 1700000000,
            branch: Some("master".to_string()),
            db_credentials: with_backup.then_some(creds),
            backup: with_backup.then_some(backup),
            migrations_pending: with_backup,
            rollback_commit: Some(ANCHOR.to_string()),
            pushed_commit: Some("feedfacefeedfacefeedfacefeedfacefeedface".to_string()),
        }
    }

    #[test]
    fn full_rollback_restores_db_then_repo_then_tests() {
        let session = ScriptedSession::new(vec![
            ScriptedReply::ok("DROP DATABASE app", &[]),
            ScriptedReply::ok("mysql", &[]),
            ScriptedReply::ok("reset --hard", &[]),
            ScriptedReply::ok("rev-parse --verify HEAD", &[ANCHOR]),
            ScriptedReply::ok("phpunit", &["OK (12 tests, 30 assertions)"]),
        ]);

        run(&session, &run_record(true)).unwrap();
        assert!(session.exhausted());

        let batches = session.ran();
        assert!(batches[2].contains(&format!("reset --hard {}", ANCHOR)));
        assert!(batches[2].contains("clean -fd"));
    }

    #[test]
    fn database_is_left_alone_without_a_verified_backup() {
        let session = ScriptedSession::new(vec![
            ScriptedReply::ok("reset --hard", &[]),
            ScriptedReply::ok("rev-parse --verify HEAD", &[ANCHOR]),
            ScriptedReply::ok("phpunit", &["OK (12 tests, 30 assertions)"]),
        ]);

        run(&session, &run_record(false)).unwrap();
        assert!(!session.ran().iter().any(|b| b.contains("mysql")));
    }

    #[test]
    fn head_mismatch_after_reset_is_terminal() {
        let session = ScriptedSession::new(vec![
            ScriptedReply::ok("reset --hard", &[]),
            ScriptedReply::ok("rev-parse --verify HEAD", &["deadbeef"]),
        ]);

        let err = run(&session, &run_record(false)).unwrap_err();
        assert_eq!(err.code, ErrorCode::DeployRollbackFailed);
        assert!(!err.hints.is_empty());
    }

    #[test]
    fn tests_failing_after_rollback_compound_the_failure() {
        let session = ScriptedSession::new(vec![
            ScriptedReply::ok("reset --hard", &[]),
            ScriptedReply::ok("rev-parse --verify HEAD", &[ANCHOR]),
            ScriptedReply::ok("phpunit", &["FAILURES!", "Tests: 12, Failures: 2."]),
        ]);

        let err = run(&session, &run_record(false)).unwrap_err();
        assert_eq!(err.code, ErrorCode::DeployRollbackFailed);
    }

    #[test]
    fn missing_anchor_never_touches_the_remote() {
        let session = ScriptedSession::new(vec![]);
        let mut record = run_record(false);
        record.rollback_commit = None;

        let err = run(&session, &record).unwrap_err();
        assert_eq!(err.code, ErrorCode::DeployRollbackFailed);
        assert!(session.ran().is_empty());
    }
}
