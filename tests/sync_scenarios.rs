//! End-to-end sync scenarios driven through the [`tbd::Tbd`] facade
//! against real `git` subprocesses: a bare remote plus one or more
//! clones, no mocking of the DVCS layer.

mod common;

use tbd::Tbd;
use tbd::issue::{Kind, Priority};

fn tbd_for(clone: &common::Clone) -> Tbd {
    Tbd::at(clone.path())
}

#[test]
fn clean_clone_create_and_push_reaches_the_remote() {
    let remote = common::init_bare_remote();
    let a = common::clone_from(&remote, "a");
    let tbd_a = tbd_for(&a);
    tbd_a.init().unwrap();

    let (issue, _short) = tbd_a.create_issue("first bug", Kind::Bug, Priority::new(1).unwrap()).unwrap();
    let outcome = tbd_a.sync().unwrap();
    assert!(matches!(outcome, tbd::sync::SyncOutcome::Synced { .. }));

    // A second, fresh clone of the same remote should see the pushed
    // branch and be able to adopt it without creating a divergent
    // history of its own.
    let b = common::clone_from(&remote, "b");
    let tbd_b = tbd_for(&b);
    tbd_b.init().unwrap();
    let issues = tbd_b.list_issues().unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].id, issue.id);
}

#[test]
fn second_sync_with_nothing_changed_is_a_no_op() {
    let remote = common::init_bare_remote();
    let a = common::clone_from(&remote, "a");
    let tbd_a = tbd_for(&a);
    tbd_a.init().unwrap();
    tbd_a.create_issue("only issue", Kind::Task, Priority::new(2).unwrap()).unwrap();
    tbd_a.sync().unwrap();

    let again = tbd_a.sync().unwrap();
    assert!(matches!(again, tbd::sync::SyncOutcome::AlreadyInSync));
}

#[test]
fn two_clones_converge_and_short_id_collisions_are_reassigned_not_dropped() {
    let remote = common::init_bare_remote();
    let a = common::clone_from(&remote, "a");
    let b = common::clone_from(&remote, "b");

    let tbd_a = tbd_for(&a);
    let tbd_b = tbd_for(&b);
    tbd_a.init().unwrap();
    tbd_b.init().unwrap();

    // Both clones allocate their first short id from a fresh generation
    // counter before either has seen the other's mapping, so they are
    // expected to collide on the same token.
    let (issue_a, short_a) = tbd_a.create_issue("from a", Kind::Bug, Priority::new(1).unwrap()).unwrap();
    let (issue_b, short_b) = tbd_b.create_issue("from b", Kind::Feature, Priority::new(3).unwrap()).unwrap();
    assert_eq!(short_a.as_str(), short_b.as_str());

    tbd_a.sync().unwrap();
    tbd_b.sync().unwrap();
    // A second round lets A pick up B's push.
    tbd_a.sync().unwrap();

    let issues_a = tbd_a.list_issues().unwrap();
    let issues_b = tbd_b.list_issues().unwrap();
    assert_eq!(issues_a.len(), 2);
    assert_eq!(issues_b.len(), 2);

    assert!(tbd_a.get_issue(issue_a.id.as_str()).is_ok());
    assert!(tbd_a.get_issue(issue_b.id.as_str()).is_ok());
    assert!(tbd_b.get_issue(issue_a.id.as_str()).is_ok());
    assert!(tbd_b.get_issue(issue_b.id.as_str()).is_ok());
}

#[test]
fn disjoint_field_edits_merge_without_conflicts() {
    let remote = common::init_bare_remote();
    let a = common::clone_from(&remote, "a");
    let tbd_a = tbd_for(&a);
    tbd_a.init().unwrap();
    let (issue, _short) = tbd_a.create_issue("shared issue", Kind::Task, Priority::new(2).unwrap()).unwrap();
    tbd_a.sync().unwrap();

    let b = common::clone_from(&remote, "b");
    let tbd_b = tbd_for(&b);
    tbd_b.init().unwrap();
    assert_eq!(tbd_b.list_issues().unwrap().len(), 1);

    // A edits priority, B edits assignee: disjoint scalar fields, should
    // merge cleanly with no attic entries.
    let mut local_a = tbd_a.get_issue(issue.id.as_str()).unwrap();
    local_a.priority = Priority::new(0).unwrap();
    local_a.updated_at = "2030-01-01T00:00:00Z".into();
    tbd::storage::write(&a.path().join(".tbd/worktree/issues"), &local_a).unwrap();

    let mut local_b = tbd_b.get_issue(issue.id.as_str()).unwrap();
    local_b.assignee = Some("dev@example.com".into());
    local_b.updated_at = "2030-01-01T00:00:00Z".into();
    tbd::storage::write(&b.path().join(".tbd/worktree/issues"), &local_b).unwrap();

    tbd_a.sync().unwrap();
    let outcome_b = tbd_b.sync().unwrap();
    match outcome_b {
        tbd::sync::SyncOutcome::Synced { conflicts, .. } => assert!(conflicts.is_empty()),
        other => panic!("expected a clean merge, got {other:?}"),
    }

    let merged = tbd_b.get_issue(issue.id.as_str()).unwrap();
    assert_eq!(merged.priority.value(), 0);
    assert_eq!(merged.assignee.as_deref(), Some("dev@example.com"));
}

#[test]
fn permanent_push_failure_preserves_work_in_the_outbox() {
    let remote = common::init_bare_remote();
    let a = common::clone_from(&remote, "a");
    let tbd_a = tbd_for(&a);
    tbd_a.init().unwrap();
    tbd_a.create_issue("orphaned by remote loss", Kind::Bug, Priority::new(1).unwrap()).unwrap();

    // Simulate the remote vanishing (deleted repository, revoked access)
    // between clone time and sync time.
    std::fs::remove_dir_all(remote.url()).unwrap();

    let outcome = tbd_a.sync().unwrap();
    match outcome {
        tbd::sync::SyncOutcome::PushFailed { outbox_saved, .. } => {
            assert!(outbox_saved);
        }
        other => panic!("expected a push failure, got {other:?}"),
    }

    // The outbox lives on the main branch, under the repo's `.tbd/`
    // directory, not inside the sync worktree.
    let outbox_dir = a.path().join(".tbd/workspaces/outbox/issues");
    assert!(outbox_dir.is_dir());
    assert_eq!(std::fs::read_dir(&outbox_dir).unwrap().count(), 1);
    assert!(!a.path().join(".tbd/worktree/workspaces").exists());
}

#[test]
fn worktree_deleted_between_sessions_is_repaired_by_sync() {
    let remote = common::init_bare_remote();
    let a = common::clone_from(&remote, "a");
    let tbd_a = tbd_for(&a);
    tbd_a.init().unwrap();
    tbd_a.create_issue("survives a worktree wipe", Kind::Chore, Priority::new(4).unwrap()).unwrap();
    tbd_a.sync().unwrap();

    std::fs::remove_dir_all(a.path().join(".tbd/worktree")).unwrap();

    let diagnostics = tbd_a.doctor().unwrap();
    assert!(diagnostics.iter().any(|d| d.name == "worktree_state" && d.status != tbd::doctor::Status::Ok));

    let fixed = tbd_a.doctor_fix().unwrap();
    assert!(fixed.iter().any(|d| d.name == "worktree_state" && d.status == tbd::doctor::Status::Ok));
    assert_eq!(tbd_a.list_issues().unwrap().len(), 1);
}

#[test]
fn a_third_clone_adopting_remote_history_sees_the_same_short_id() {
    let remote = common::init_bare_remote();
    let a = common::clone_from(&remote, "a");
    let tbd_a = tbd_for(&a);
    tbd_a.init().unwrap();
    let (issue, short) = tbd_a.create_issue("known by its short id", Kind::Bug, Priority::new(2).unwrap()).unwrap();
    tbd_a.sync().unwrap();

    // A clone created after the sync branch already exists on the remote
    // adopts its history wholesale, so the mapping committed by `a` is
    // visible from the very first `init` — no reconciliation pass needed.
    let c = common::clone_from(&remote, "c");
    let tbd_c = tbd_for(&c);
    tbd_c.init().unwrap();

    let seen = tbd_c.get_issue(short.as_str()).unwrap();
    assert_eq!(seen.id, issue.id);
}
