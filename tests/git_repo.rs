//! Repository handle tests against real git repositories in temp dirs.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use shipmate::git::Repo;
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn init_repo() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().expect("temp dir");
    let work = tmp.path().join("work");
    fs::create_dir_all(&work).expect("create work dir");

    git(&work, &["init", "-b", "master"]);
    git(&work, &["config", "user.email", "ops@example.com"]);
    git(&work, &["config", "user.name", "Ops"]);

    fs::write(work.join("app.txt"), "v1\n").expect("write app.txt");
    git(&work, &["add", "--all"]);
    git(&work, &["commit", "-m", "initial"]);

    (tmp, work)
}

fn add_bare_remote(tmp: &TempDir, work: &Path, name: &str) -> PathBuf {
    let bare = tmp.path().join(format!("{}.git", name));
    git(tmp.path(), &["init", "--bare", bare.to_str().unwrap()]);
    git(work, &["remote", "add", name, bare.to_str().unwrap()]);
    bare
}

#[test]
fn status_reports_untracked_and_modified_files() {
    let (_tmp, work) = init_repo();
    fs::write(work.join("app.txt"), "v2\n").unwrap();
    fs::write(work.join("notes.txt"), "scratch\n").unwrap();

    let mut repo = Repo::open(&work);
    let status = repo.status().unwrap();

    assert!(status.iter().any(|l| l.contains("app.txt") && !l.starts_with("??")));
    assert!(status.iter().any(|l| l.starts_with("??") && l.contains("notes.txt")));
}

#[test]
fn commit_clears_tracked_changes() {
    let (_tmp, work) = init_repo();
    fs::write(work.join("app.txt"), "v2\n").unwrap();

    let mut repo = Repo::open(&work);
    repo.commit("update app", false).unwrap();

    assert!(repo.status().unwrap().is_empty());
    let log = git(&work, &["log", "-1", "--format=%s"]);
    assert_eq!(log, "update app");
}

#[test]
fn untracked_files_survive_a_commit_that_leaves_them_out() {
    let (_tmp, work) = init_repo();
    fs::write(work.join("app.txt"), "v2\n").unwrap();
    fs::write(work.join("notes.txt"), "scratch\n").unwrap();

    let mut repo = Repo::open(&work);
    let before = repo.status().unwrap();
    assert!(before.iter().any(|l| l.starts_with("??")));

    // No add_all: only tracked changes go into the commit.
    repo.commit("update app only", false).unwrap();

    let after = repo.status().unwrap();
    assert!(after.iter().any(|l| l.starts_with("??") && l.contains("notes.txt")));
    assert!(!after.iter().any(|l| l.contains("app.txt")));
}

#[test]
fn current_branch_matches_git() {
    let (_tmp, work) = init_repo();
    let mut repo = Repo::open(&work);
    assert_eq!(repo.current_branch().unwrap(), "master");
    assert_eq!(repo.state.current_branch.as_deref(), Some("master"));
}

#[test]
fn push_lands_head_on_the_remote() {
    let (tmp, work) = init_repo();
    let bare = add_bare_remote(&tmp, &work, "staging");

    let mut repo = Repo::open(&work);
    repo.current_branch().unwrap();
    repo.state.current_remote = Some("staging".to_string());

    let cmd = repo.push_command().unwrap();
    assert_eq!(cmd.as_str(), "git push staging master");
    repo.push(cmd).unwrap();

    let local = repo.current_commit_hash().unwrap();
    let remote = git(&bare, &["rev-parse", "--verify", "HEAD"]);
    assert_eq!(local, remote);
}

#[test]
fn push_without_a_selected_remote_is_a_config_error() {
    let (_tmp, work) = init_repo();
    let mut repo = Repo::open(&work);
    repo.current_branch().unwrap();

    let err = repo.push_command().unwrap_err();
    assert_eq!(err.code, shipmate::ErrorCode::ConfigInvalidValue);
}

#[test]
fn update_tag_moves_a_published_tag_to_head() {
    let (tmp, work) = init_repo();
    let bare = add_bare_remote(&tmp, &work, "staging");

    let mut repo = Repo::open(&work);
    repo.current_branch().unwrap();
    repo.state.current_remote = Some("staging".to_string());
    let cmd = repo.push_command().unwrap();
    repo.push(cmd).unwrap();

    repo.tag("release").unwrap();
    git(&work, &["push", "staging", "release"]);

    fs::write(work.join("app.txt"), "v2\n").unwrap();
    repo.commit("next release", false).unwrap();
    let cmd = repo.push_command().unwrap();
    repo.push(cmd).unwrap();

    repo.update_tag("release", None).unwrap();

    let tagged = git(&work, &["rev-parse", "release^{commit}"]);
    assert_eq!(tagged, repo.current_commit_hash().unwrap());
    // The stale remote tag was deleted rather than left behind.
    let remote_tags = git(&bare, &["tag", "--list"]);
    assert!(!remote_tags.contains("release"));
}

#[test]
fn add_all_stages_untracked_files() {
    let (_tmp, work) = init_repo();
    fs::write(work.join("notes.txt"), "scratch\n").unwrap();

    let mut repo = Repo::open(&work);
    repo.add_all().unwrap();
    repo.commit("add notes", false).unwrap();

    assert!(repo.status().unwrap().is_empty());
}

#[test]
fn last_commit_shows_name_status() {
    let (_tmp, work) = init_repo();
    let mut repo = Repo::open(&work);
    let summary = repo.last_commit().unwrap();
    assert!(summary.iter().any(|l| l.contains("initial")));
    assert!(summary.iter().any(|l| l.contains("app.txt")));
}
