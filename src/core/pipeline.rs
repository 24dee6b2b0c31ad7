//! The push-to-deploy pipeline.
//!
//! One `push()` call walks a linear state machine: flags, remote selection,
//! commit, server preflight, env parity, rollback-anchor capture,
//! maintenance mode, push, deploy sequence, maintenance off. Every stage
//! either continues, aborts the run cleanly, or fails with an error that
//! unwinds the run. Only a migration or test failure inside the deploy
//! sequence triggers an automatic rollback; a failed push never does.

use chrono::Utc;

use crate::db::{self, BackupPlan, DbCredentials};
use crate::envfile;
use crate::error::{Error, ErrorCode, RemoteCommandFailedDetails, Result};
use crate::flags::DeployFlags;
use crate::git::{remote_git_prefix, DeployKeyKind, GitFlag, Repo};
use crate::prompt::Prompt;
use crate::remotes::{RemoteConfig, RemoteRole, RemoteTarget};
use crate::rollback;
use crate::session::{self, CommandSession, LocalSession, SessionOutput};
use crate::utils::shell;

pub const MAINTENANCE_ON: &str = "php artisan down";
pub const MAINTENANCE_OFF: &str = "php artisan up";
pub const MAINTENANCE_ON_ACK: &str = "Application is now in maintenance mode.";
pub const MAINTENANCE_OFF_ACK: &str = "Application is now live.";
pub const MIGRATE_STATUS: &str = "php artisan migrate:status";
pub const MIGRATE: &str = "php artisan migrate --force";
pub const COMPOSER_UPDATE: &str = "composer update";
pub const RUN_TESTS: &str = "vendor/phpunit/phpunit/phpunit --no-coverage";
pub const GENERATE_DOCS: &str = "php artisan docs:generate";

/// Env files whose variable names must agree between control host and remote.
pub const ENV_FILES: [&str; 2] = [".env", ".env.testing"];

/// Migration status rows mark pending migrations with `N` somewhere in the
/// fixed-width leading status column.
const MIGRATION_STATUS_COLUMN: usize = 8;
const MIGRATION_PENDING_MARKER: char = 'N';
const MIGRATION_ERROR_TOKEN: &str = "SQLSTATE";
const TEST_FAILURE_TOKEN: &str = "FAILURES!";

/// Stage result: keep going, or end the run cleanly with a reason.
pub enum Flow {
    Continue,
    Abort(String),
}

/// Per-run record. Created at the start of `push()`, discarded at the end.
/// `rollback_commit` is the sole recovery anchor; `db_credentials` and
/// `backup` are write-once, set only when the migrate branch runs.
pub struct DeployRun {
    pub flags: DeployFlags,
    pub target: RemoteTarget,
    pub push_timestamp: i64,
    pub branch: Option<String>,
    pub db_credentials: Option<DbCredentials>,
    pub backup: Option<BackupPlan>,
    pub migrations_pending: bool,
    pub rollback_commit: Option<String>,
    pub pushed_commit: Option<String>,
}

/// What a finished (or cleanly aborted) run did.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    pub remote: String,
    pub branch: Option<String>,
    pub pushed: bool,
    pub deployed: bool,
    pub migrations_ran: bool,
    pub aborted: Option<String>,
}

impl PushOutcome {
    fn aborted(remote: &str, reason: impl Into<String>) -> Self {
        Self {
            remote: remote.to_string(),
            branch: None,
            pushed: false,
            deployed: false,
            migrations_ran: false,
            aborted: Some(reason.into()),
        }
    }
}

/// Commands run in the remote application directory.
pub fn app_batch(work_tree: &str, command: &str) -> Vec<String> {
    vec![
        format!("cd {}", shell::quote_path(work_tree)),
        command.to_string(),
    ]
}

/// A migration is pending when any status line carries the pending marker
/// inside its leading status column.
pub fn migration_pending(lines: &[String]) -> bool {
    lines.iter().any(|line| {
        line.chars()
            .take(MIGRATION_STATUS_COLUMN)
            .any(|c| c == MIGRATION_PENDING_MARKER)
    })
}

/// Factory for the per-run remote session.
pub type OpenRemote = Box<dyn Fn(&RemoteTarget) -> Result<Box<dyn CommandSession>>>;

pub struct Pipeline<'a> {
    repo: &'a mut Repo,
    config: RemoteConfig,
    prompt: &'a mut dyn Prompt,
    control: Box<dyn CommandSession>,
    open_remote: OpenRemote,
    timestamp_override: Option<i64>,
}

impl<'a> Pipeline<'a> {
    pub fn new(repo: &'a mut Repo, config: RemoteConfig, prompt: &'a mut dyn Prompt) -> Self {
        Self {
            repo,
            config,
            prompt,
            control: Box::new(LocalSession::new()),
            open_remote: Box::new(|target| session::open(target)),
            timestamp_override: None,
        }
    }

    /// Swap in explicit control and remote sessions.
    pub fn with_sessions(mut self, control: Box<dyn CommandSession>, open_remote: OpenRemote) -> Self {
        self.control = control;
        self.open_remote = open_remote;
        self
    }

    /// Pin the run timestamp instead of taking the wall clock.
    pub fn at_timestamp(mut self, epoch_secs: i64) -> Self {
        self.timestamp_override = Some(epoch_secs);
        self
    }

    /// Run the full pipeline for one service push.
    pub fn push(&mut self, packed_flags: &str) -> Result<PushOutcome> {
        let flags = DeployFlags::parse(packed_flags);

        let remote_lines = self.repo.remotes()?;
        let targets = self.config.resolve_all(&remote_lines)?;
        if targets.is_empty() {
            return Err(Error::config_invalid_value(
                "remotes",
                "no usable push remotes configured",
            ));
        }

        let names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();
        let Some(choice) = self.prompt.select("Push to which remote?", &names)? else {
            log_status!("push", "No remote selected, nothing pushed");
            return Ok(PushOutcome::aborted("", "no remote selected"));
        };
        let target = targets
            .into_iter()
            .find(|t| t.name == choice)
            .ok_or_else(|| Error::internal_unexpected(format!("selected remote vanished: {}", choice)))?;

        if target.name == "production"
            && !self
                .prompt
                .confirm("Target is production. Are you sure?")?
        {
            return Ok(PushOutcome::aborted(&target.name, "production push declined"));
        }

        // Server targets get exactly one session for the whole run.
        let remote_session = if target.is_deployable() {
            Some((self.open_remote)(&target)?)
        } else {
            None
        };

        self.repo.state.current_remote = Some(target.name.clone());
        let mut run = DeployRun {
            flags,
            target,
            push_timestamp: self
                .timestamp_override
                .unwrap_or_else(|| Utc::now().timestamp()),
            branch: None,
            db_credentials: None,
            backup: None,
            migrations_pending: false,
            rollback_commit: None,
            pushed_commit: None,
        };

        if let Flow::Abort(reason) = self.commit_stage(&mut run)? {
            return Ok(self.abort(&run, reason));
        }

        if let Some(session) = remote_session.as_deref() {
            if let Flow::Abort(reason) = self.preflight_stage(session, &run)? {
                return Ok(self.abort(&run, reason));
            }
            if let Flow::Abort(reason) = self.env_parity_stage(session, &run)? {
                return Ok(self.abort(&run, reason));
            }
            self.capture_rollback_anchor(session, &mut run)?;
            if let Flow::Abort(reason) = self.maintenance_on_stage(session, &run)? {
                return Ok(self.abort(&run, reason));
            }
        }

        if run.target.name == "production"
            && !self
                .prompt
                .confirm("Push and deploy to production now?")?
        {
            return Ok(self.abort(&run, "production deploy declined".to_string()));
        }

        self.push_stage(&mut run)?;

        let mut outcome = PushOutcome {
            remote: run.target.name.clone(),
            branch: run.branch.clone(),
            pushed: true,
            deployed: false,
            migrations_ran: false,
            aborted: None,
        };

        let Some(session) = remote_session.as_deref() else {
            log_status!("push", "Pushed to '{}', no deploy sequence for this remote", run.target.name);
            return Ok(outcome);
        };

        match self.deploy_stage(session, &mut run) {
            Ok(migrations_ran) => {
                outcome.deployed = true;
                outcome.migrations_ran = migrations_ran;
                self.maintenance_off_stage(session, &run)?;
                log_status!("push", "Deploy of '{}' complete", run.target.name);
                Ok(outcome)
            }
            Err(err)
                if matches!(
                    err.code,
                    ErrorCode::DeployMigrationFailed | ErrorCode::DeployTestsFailed
                ) =>
            {
                log_status!("push", "Deploy failed ({}), rolling back", err.code.as_str());
                rollback::run(session, &run)?;
                // Site comes back up on the restored code without a prompt.
                self.maintenance_off(session, &run);
                Err(err.with_hint(format!(
                    "Rolled back '{}' to {}; the deployment did not land",
                    run.target.name,
                    run.rollback_commit.as_deref().unwrap_or("the captured anchor")
                )))
            }
            Err(err) => Err(err),
        }
    }

    fn abort(&self, run: &DeployRun, reason: String) -> PushOutcome {
        log_status!("push", "Run aborted: {}", reason);
        PushOutcome::aborted(&run.target.name, reason)
    }

    /// Commit whatever the run needs committed. A clean tree skips straight
    /// through; untracked files are staged unless `l` was passed; `a` amends
    /// after an explicit confirmation.
    fn commit_stage(&mut self, run: &mut DeployRun) -> Result<Flow> {
        run.branch = Some(self.repo.current_branch()?);

        let status = self.repo.status()?;
        if status.is_empty() {
            log_status!("push", "Working tree clean, nothing to commit");
            return Ok(Flow::Continue);
        }

        let untracked: Vec<&String> = status.iter().filter(|l| l.starts_with("??")).collect();
        let tracked_changes = status.len() > untracked.len();

        if run.flags.leave_untracked && !tracked_changes {
            log_status!("push", "Only untracked files present and `l` set, nothing to commit");
            return Ok(Flow::Continue);
        }

        if !untracked.is_empty() && !run.flags.leave_untracked {
            self.repo.add_all()?;
        }

        if run.flags.amend {
            if !self
                .prompt
                .confirm("Amend the last commit? This rewrites published history")?
            {
                return Ok(Flow::Abort("amend declined".to_string()));
            }
            self.repo.commit("", true)?;
        } else {
            let message = self.prompt.ask("Commit message")?;
            if message.is_empty() || message == "abort" {
                return Ok(Flow::Abort("no commit message given".to_string()));
            }
            self.repo.commit(&message, false)?;
        }

        Ok(Flow::Continue)
    }

    /// Server preflight: a deploy key the remote can pull origin with, the
    /// bare repository and work tree, and no server-side post-receive hook
    /// competing with this pipeline.
    fn preflight_stage(&mut self, session: &dyn CommandSession, run: &DeployRun) -> Result<Flow> {
        let target = &run.target;

        let key_check = session.run_capture(&[
            "test -f ~/.ssh/id_rsa && echo exists".to_string()
        ])?;
        if !key_check.contains("exists") {
            if !self
                .prompt
                .confirm("No deploy key found on the remote. Generate one now?")?
            {
                return Ok(Flow::Abort("remote deploy key missing".to_string()));
            }
            let keygen = self.remote_ok(
                session,
                target,
                &[
                    "ssh-keygen -t rsa -N '' -f ~/.ssh/id_rsa".to_string(),
                    "cat ~/.ssh/id_rsa.pub".to_string(),
                ],
                "generate remote deploy key",
            )?;
            for line in &keygen.lines {
                log_status!("push", "{}", line);
            }
            if !self
                .prompt
                .confirm("Add the key above to the origin repository, then confirm")?
            {
                return Ok(Flow::Abort("remote deploy key not installed".to_string()));
            }
        }

        let layout_check = session.run_capture(&[format!(
            "test -d {} && test -d {} && echo exists",
            shell::quote_path(&target.git_dir),
            shell::quote_path(&target.work_tree)
        )])?;
        if !layout_check.contains("exists") {
            if !self.prompt.confirm(&format!(
                "'{}' is missing its bare repository or work tree. Create them?",
                target.name
            ))? {
                return Ok(Flow::Abort("remote repository layout missing".to_string()));
            }
            self.remote_ok(
                session,
                target,
                &[
                    format!("mkdir -p {}", shell::quote_path(&target.work_tree)),
                    format!("git init --bare {}", shell::quote_path(&target.git_dir)),
                ],
                "create remote repository layout",
            )?;
        }

        // Only this pipeline drives post-deploy actions.
        self.remote_ok(
            session,
            target,
            &[format!(
                "rm -f {}/hooks/post-receive",
                shell::quote_path(&target.git_dir)
            )],
            "strip post-receive hook",
        )?;

        Ok(Flow::Continue)
    }

    /// Compare variable names between the local and remote copies of each
    /// well-known env file. Values are never read off the remote here.
    fn env_parity_stage(&mut self, session: &dyn CommandSession, run: &DeployRun) -> Result<Flow> {
        let target = &run.target;

        for file in ENV_FILES {
            let local_path = self.repo.path().join(file);
            let Ok(local) = std::fs::read_to_string(&local_path) else {
                log_status!("push", "No local {} to compare, skipping", file);
                continue;
            };

            let remote = session.run_capture(&[format!(
                "cat {}/{}",
                shell::quote_path(&target.work_tree),
                file
            )])?;
            if !remote.success() {
                if !self.prompt.confirm(&format!(
                    "Remote '{}' has no {}. Continue without it?",
                    target.name, file
                ))? {
                    return Ok(Flow::Abort(format!("remote {} missing", file)));
                }
                continue;
            }

            let comparison = envfile::compare(file, &local, &remote.text());
            if comparison.in_sync() {
                continue;
            }

            log_status!("push", "Variable names in {} differ between local and '{}':", file, target.name);
            for row in envfile::tabulate(&comparison) {
                log_status!("push", "{}", row);
            }
            if !self
                .prompt
                .confirm(&format!("{} differs on the remote. Continue anyway?", file))?
            {
                return Ok(Flow::Abort(format!("{} out of sync", file)));
            }
        }

        Ok(Flow::Continue)
    }

    /// Record the remote HEAD before anything destructive happens.
    fn capture_rollback_anchor(
        &mut self,
        session: &dyn CommandSession,
        run: &mut DeployRun,
    ) -> Result<()> {
        let target = &run.target;
        let prefix = remote_git_prefix(&target.git_dir, &target.work_tree);
        let output = self.remote_ok(
            session,
            target,
            &[format!("{} rev-parse --verify HEAD", prefix)],
            "capture rollback anchor",
        )?;
        let anchor = output
            .lines
            .first()
            .cloned()
            .ok_or_else(|| Error::internal_unexpected("remote reported no HEAD hash"))?;
        log_status!("push", "Rollback anchor for '{}': {}", target.name, anchor);
        run.rollback_commit = Some(anchor);
        Ok(())
    }

    fn maintenance_on_stage(&mut self, session: &dyn CommandSession, run: &DeployRun) -> Result<Flow> {
        let target = &run.target;

        // A wrong REMOTE_WORKTREE would put the whole deploy in the wrong
        // directory; verify it resolves before taking the app down.
        let pwd = session.run_capture(&app_batch(&target.work_tree, "pwd"))?;
        let resolved = pwd.lines.iter().any(|l| l.trim() == target.work_tree);
        if !pwd.success() || !resolved {
            return Err(Error::config_invalid_value(
                "REMOTE_WORKTREE",
                format!(
                    "'{}' does not resolve on '{}'",
                    target.work_tree, target.name
                ),
            ));
        }

        let output = session.run_capture(&app_batch(&target.work_tree, MAINTENANCE_ON))?;

        if !output.success() || !output.contains(MAINTENANCE_ON_ACK) {
            log_status!("push", "Maintenance mode on '{}' was not acknowledged", target.name);
            if !self
                .prompt
                .confirm("Maintenance mode could not be verified. Continue anyway?")?
            {
                return Ok(Flow::Abort("maintenance mode not verified".to_string()));
            }
        }
        Ok(Flow::Continue)
    }

    /// Push the current branch, forcing when requested or after an amend,
    /// with the deploy-key export matched to the target. A `b` flag chases
    /// an origin push with a CI build push.
    fn push_stage(&mut self, run: &mut DeployRun) -> Result<()> {
        let mut cmd = self.repo.push_command()?;
        if run.flags.force || self.repo.state.amend_requested {
            cmd.add_flag(GitFlag::Force)?;
        }
        if run.target.is_deployable() {
            let key = self.config.require_deploy_key()?.to_string();
            cmd.add_deploy_key(DeployKeyKind::Server, &key);
        }

        log_status!(
            "push",
            "Pushing {} to '{}'",
            run.branch.as_deref().unwrap_or("HEAD"),
            run.target.name
        );
        self.repo.push(cmd)?;
        run.pushed_commit = Some(self.repo.current_commit_hash()?);

        if run.flags.build {
            if run.target.role != RemoteRole::Origin {
                log_status!("push", "`b` only applies to origin pushes, skipping CI build push");
                return Ok(());
            }
            let branch = run.branch.clone().unwrap_or_else(|| "HEAD".to_string());
            let key = self.config.require_build_key()?.to_string();
            let mut build = self.repo.command(format!("git push build {}", branch));
            // CI history is disposable; the build remote is always forced.
            build.add_flag(GitFlag::Force)?;
            build.add_deploy_key(DeployKeyKind::Build, &key);
            log_status!("push", "Pushing {} to 'build' for CI", branch);
            self.repo.push(build)?;
        }

        Ok(())
    }

    /// The deploy sequence proper. Returns whether migrations ran. Migration
    /// and test failures come back as their own error codes so the caller
    /// can route them to rollback.
    fn deploy_stage(&mut self, session: &dyn CommandSession, run: &mut DeployRun) -> Result<bool> {
        let target = run.target.clone();
        let branch = run.branch.clone().unwrap_or_else(|| "master".to_string());
        let prefix = remote_git_prefix(&target.git_dir, &target.work_tree);

        // Sync the remote work tree to the pushed commit.
        self.remote_ok(
            session,
            &target,
            &[
                format!("{} reset --hard", prefix),
                format!("{} checkout -f {}", prefix, branch),
                format!("{} submodule update --init --recursive", prefix),
                format!("cd {}", shell::quote_path(&target.work_tree)),
                COMPOSER_UPDATE.to_string(),
            ],
            "sync remote work tree",
        )?;

        let head = self.remote_ok(
            session,
            &target,
            &[format!("{} rev-parse --verify HEAD", prefix)],
            "verify deployed commit",
        )?;
        let remote_head = head.lines.first().cloned().unwrap_or_default();
        let expected = run.pushed_commit.clone().unwrap_or_default();
        if remote_head != expected {
            return Err(Error::verification_failed(expected, remote_head, target.name.as_str()));
        }

        let status = session.run_capture(&app_batch(&target.work_tree, MIGRATE_STATUS))?;
        if !status.success() {
            return Err(Error::migration_failed(format!(
                "migration status check failed on '{}': {}",
                target.name,
                status.lines.last().cloned().unwrap_or_default()
            )));
        }
        run.migrations_pending = migration_pending(&status.lines);

        if run.migrations_pending && !run.flags.skip_migrations {
            self.migrate_branch(session, run, &target)?;
        } else {
            log_status!("push", "No migrations to run, verifying with the test suite");
            let tests = session.run_capture(&app_batch(&target.work_tree, RUN_TESTS))?;
            if !tests.success() || tests.contains(TEST_FAILURE_TOKEN) {
                return Err(Error::tests_failed(format!(
                    "test suite failed on '{}'",
                    target.name
                )));
            }
        }

        if run.flags.docs {
            let docs = session.run_capture(&app_batch(&target.work_tree, GENERATE_DOCS))?;
            if !docs.success() {
                log_status!("push", "Documentation generation failed, continuing");
            }
        }

        Ok(run.migrations_pending && !run.flags.skip_migrations)
    }

    /// Back up the database, verify the backup on both ends, then migrate.
    fn migrate_branch(
        &mut self,
        session: &dyn CommandSession,
        run: &mut DeployRun,
        target: &RemoteTarget,
    ) -> Result<()> {
        let env = self.remote_ok(
            session,
            target,
            &[format!("cat {}/.env", shell::quote_path(&target.work_tree))],
            "read remote env file",
        )?;
        let credentials = DbCredentials::from_env_content(&env.text(), &target.name)?;
        let plan = BackupPlan::at(&credentials, run.push_timestamp);

        log_status!("push", "Backing up '{}' to {}", credentials.database, plan.remote_path);
        self.remote_ok(
            session,
            target,
            &[credentials.dump_command(&plan.remote_path)],
            "database backup",
        )?;

        let remote_listing = self.remote_ok(
            session,
            target,
            &[format!("ls {}", db::BACKUP_DIR)],
            "list remote backups",
        )?;
        if !db::listing_contains(&remote_listing.lines, &plan.file_name) {
            return Err(Error::migration_failed(format!(
                "backup {} not present on '{}' after dump",
                plan.file_name, target.name
            )));
        }

        let mirror = self
            .control
            .run_capture(&[db::scp_mirror_command(target, &plan)])?;
        if !mirror.success() {
            return Err(Error::migration_failed(format!(
                "could not mirror backup {} to the control host",
                plan.file_name
            )));
        }
        let local_listing = self
            .control
            .run_capture(&[format!("ls {}", db::BACKUP_DIR)])?;
        if !db::listing_contains(&local_listing.lines, &plan.file_name) {
            return Err(Error::migration_failed(format!(
                "backup {} not present locally after mirror",
                plan.file_name
            )));
        }

        // Backup verified on both ends; rollback may now restore from it.
        run.db_credentials = Some(credentials);
        run.backup = Some(plan);

        log_status!("push", "Running migrations on '{}'", target.name);
        let output = session.run_capture(&app_batch(&target.work_tree, MIGRATE))?;
        if !output.success() || output.contains(MIGRATION_ERROR_TOKEN) {
            return Err(Error::migration_failed(format!(
                "migrations failed on '{}': {}",
                target.name,
                output.lines.last().cloned().unwrap_or_default()
            )));
        }

        Ok(())
    }

    fn maintenance_off_stage(&mut self, session: &dyn CommandSession, run: &DeployRun) -> Result<()> {
        if !self.prompt.confirm(&format!(
            "Bring '{}' out of maintenance mode?",
            run.target.name
        ))? {
            log_status!("push", "Leaving '{}' in maintenance mode", run.target.name);
            return Ok(());
        }
        self.maintenance_off(session, run);
        Ok(())
    }

    fn maintenance_off(&self, session: &dyn CommandSession, run: &DeployRun) {
        match session.run_capture(&app_batch(&run.target.work_tree, MAINTENANCE_OFF)) {
            Ok(output) if output.success() && output.contains(MAINTENANCE_OFF_ACK) => {
                log_status!("push", "'{}' is live again", run.target.name);
            }
            _ => {
                log_status!(
                    "push",
                    "Could not verify that '{}' left maintenance mode",
                    run.target.name
                );
            }
        }
    }

    fn remote_ok(
        &self,
        session: &dyn CommandSession,
        target: &RemoteTarget,
        commands: &[String],
        what: &str,
    ) -> Result<SessionOutput> {
        let output = session.run_capture(commands)?;
        if !output.success() {
            return Err(Error::remote_command_failed(RemoteCommandFailedDetails {
                command: format!("{} ({})", commands.join(" && "), what),
                exit_code: output.exit_code,
                host: target.host.clone(),
                last_line: output.lines.last().cloned(),
            }));
        }
        Ok(output)
    }
}
