//! Field-level three-way merge and attic recording (`spec.md` §4.5
//! "Field-level merge").
//!
//! One record per field that required a choice, written append-only
//! rather than mutated.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::issue::Issue;

/// One field-level conflict resolution, written to the attic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub issue_id: String,
    pub field: String,
    pub local: String,
    pub remote: String,
    pub chosen: String,
    pub timestamp: String,
}

/// Merge `local` and `remote` versions of the same issue.
///
/// When `ancestor` is known, a field that only one side moved away from
/// the ancestor's value is taken from that side without being logged as
/// a conflict — only fields both sides independently changed to
/// different values are a real conflict. Without an ancestor (the issue
/// is brand new on at least one side), any disagreement is treated as a
/// conflict and resolved by recency.
///
/// Returns the merged issue and the list of fields whose values
/// disagreed and required a choice (destined for the attic).
#[must_use]
pub fn merge_issue(ancestor: Option<&Issue>, local: &Issue, remote: &Issue) -> (Issue, Vec<ConflictEntry>) {
    let mut conflicts = Vec::new();
    let local_wins = scalar_wins_by_recency(&local.updated_at, local.version, &remote.updated_at, remote.version);
    let winner_updated_at = if local.updated_at >= remote.updated_at { local.updated_at.clone() } else { remote.updated_at.clone() };

    let mut merged = if local_wins { local.clone() } else { remote.clone() };

    macro_rules! scalar_field {
        ($field:ident, $name:literal) => {
            if local.$field == remote.$field {
                // Agree; whichever clone `merged` started from already
                // carries the right value.
            } else {
                let local_changed = ancestor.is_none_or(|a| a.$field != local.$field);
                let remote_changed = ancestor.is_none_or(|a| a.$field != remote.$field);
                if remote_changed && !local_changed {
                    merged.$field = remote.$field.clone();
                } else if local_changed && !remote_changed {
                    merged.$field = local.$field.clone();
                } else {
                    merged.$field = if local_wins { local.$field.clone() } else { remote.$field.clone() };
                    conflicts.push(ConflictEntry {
                        issue_id: local.id.to_string(),
                        field: $name.to_owned(),
                        local: format!("{:?}", local.$field),
                        remote: format!("{:?}", remote.$field),
                        chosen: format!("{:?}", merged.$field),
                        timestamp: winner_updated_at.clone(),
                    });
                }
            }
        };
    }

    scalar_field!(title, "title");
    scalar_field!(description, "description");
    scalar_field!(status, "status");
    scalar_field!(priority, "priority");
    scalar_field!(kind, "kind");
    scalar_field!(assignee, "assignee");
    scalar_field!(due_date, "due_date");
    scalar_field!(deferred_until, "deferred_until");
    scalar_field!(parent_id, "parent_id");
    scalar_field!(spec_path, "spec_path");
    scalar_field!(closed_at, "closed_at");
    scalar_field!(close_reason, "close_reason");
    scalar_field!(external_issue_url, "external_issue_url");

    // Notes are append-oriented: concatenate the suffix each side added
    // rather than picking a winner wholesale. Only log a conflict when
    // neither side's notes are a prefix of the other's — a clean append
    // on either side is not a disagreement.
    merged.notes = merge_notes(&local.notes, &remote.notes);
    let notes_diverged = local.notes != remote.notes
        && !local.notes.is_empty()
        && !remote.notes.is_empty()
        && !remote.notes.starts_with(local.notes.as_str())
        && !local.notes.starts_with(remote.notes.as_str());
    if notes_diverged {
        conflicts.push(ConflictEntry {
            issue_id: local.id.to_string(),
            field: "notes".to_owned(),
            local: local.notes.clone(),
            remote: remote.notes.clone(),
            chosen: merged.notes.clone(),
            timestamp: winner_updated_at.clone(),
        });
    }

    // Sets: union, never a conflict in the "had to choose" sense.
    merged.labels = local.labels.union(&remote.labels).cloned().collect();
    merged.dependencies = local.dependencies.union(&remote.dependencies).cloned().collect();

    // Ordered list: longer wins, ties by updated_at. Only a conflict if
    // both sides changed it away from the ancestor to different lists.
    merged.child_order_hints = merge_child_order_hints(local, remote, local_wins);
    let hints_changed_both_sides = ancestor.is_none_or(|a| a.child_order_hints != local.child_order_hints)
        && ancestor.is_none_or(|a| a.child_order_hints != remote.child_order_hints);
    if local.child_order_hints != remote.child_order_hints
        && local.child_order_hints.is_some()
        && remote.child_order_hints.is_some()
        && hints_changed_both_sides
    {
        conflicts.push(ConflictEntry {
            issue_id: local.id.to_string(),
            field: "child_order_hints".to_owned(),
            local: format!("{:?}", local.child_order_hints),
            remote: format!("{:?}", remote.child_order_hints),
            chosen: format!("{:?}", merged.child_order_hints),
            timestamp: winner_updated_at.clone(),
        });
    }

    merged.version = local.version.max(remote.version) + 1;
    merged.updated_at = winner_updated_at;

    (merged, conflicts)
}

fn scalar_wins_by_recency(local_updated_at: &str, local_version: u64, remote_updated_at: &str, remote_version: u64) -> bool {
    match local_updated_at.cmp(remote_updated_at) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => local_version >= remote_version,
    }
}

/// Concatenate the distinct trailing content each side appended to a
/// shared prefix. If neither is a prefix of the other, concatenate both
/// in full, newest last.
fn merge_notes(local: &str, remote: &str) -> String {
    if local == remote {
        return local.to_owned();
    }
    if local.is_empty() {
        return remote.to_owned();
    }
    if remote.is_empty() {
        return local.to_owned();
    }
    if let Some(suffix) = remote.strip_prefix(local) {
        return format!("{local}{suffix}");
    }
    if let Some(suffix) = local.strip_prefix(remote) {
        return format!("{remote}{suffix}");
    }
    format!("{local}\n{remote}")
}

fn merge_child_order_hints(local: &Issue, remote: &Issue, local_wins_tiebreak: bool) -> Option<Vec<crate::issue::IssueId>> {
    match (&local.child_order_hints, &remote.child_order_hints) {
        (None, None) => None,
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (Some(l), Some(r)) => {
            match l.len().cmp(&r.len()) {
                std::cmp::Ordering::Greater => Some(l.clone()),
                std::cmp::Ordering::Less => Some(r.clone()),
                std::cmp::Ordering::Equal => Some(if local_wins_tiebreak { l.clone() } else { r.clone() }),
            }
        }
    }
}

/// The union of two label/dependency sets, exposed standalone for callers
/// (mapping merge, doctor) that need set-union semantics without a full
/// issue merge.
#[must_use]
pub fn union_labels(a: &BTreeSet<String>, b: &BTreeSet<String>) -> BTreeSet<String> {
    a.union(b).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::generate_issue_id;
    use crate::issue::{Kind, Priority, Status};
    use std::collections::BTreeMap;

    fn base_issue(updated_at: &str, version: u64) -> Issue {
        Issue {
            id: generate_issue_id(),
            version,
            title: "base".into(),
            kind: Kind::Task,
            status: Status::Open,
            priority: Priority::new(2).unwrap(),
            description: String::new(),
            notes: String::new(),
            labels: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            parent_id: None,
            child_order_hints: None,
            spec_path: None,
            assignee: None,
            due_date: None,
            deferred_until: None,
            closed_at: None,
            close_reason: None,
            external_issue_url: None,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: updated_at.into(),
            extensions: BTreeMap::new(),
        }
    }

    #[test]
    fn disjoint_field_edits_merge_without_conflicts() {
        let ancestor = base_issue("2025-01-01T00:00:00Z", 1);

        let mut local = ancestor.clone();
        local.status = Status::InProgress;
        local.labels.insert("urgent".into());

        let mut remote = ancestor.clone();
        remote.priority = Priority::new(0).unwrap();
        remote.labels.insert("triage".into());
        remote.updated_at = "2025-01-02T00:00:00Z".into();
        remote.version = 1;

        let (merged, conflicts) = merge_issue(Some(&ancestor), &local, &remote);

        assert_eq!(merged.status, Status::InProgress);
        assert_eq!(merged.priority, Priority::new(0).unwrap());
        assert_eq!(merged.labels, BTreeSet::from(["urgent".to_owned(), "triage".to_owned()]));
        assert_eq!(merged.version, 2);
        assert_eq!(merged.updated_at, "2025-01-02T00:00:00Z");
        assert!(conflicts.is_empty(), "disjoint edits must not generate conflict entries: {conflicts:?}");
    }

    #[test]
    fn without_an_ancestor_any_disagreement_is_treated_as_a_conflict() {
        let mut local = base_issue("2025-01-01T00:00:00Z", 1);
        local.status = Status::InProgress;

        let mut remote = local.clone();
        remote.priority = Priority::new(0).unwrap();
        remote.updated_at = "2025-01-02T00:00:00Z".into();

        let (_, conflicts) = merge_issue(None, &local, &remote);
        assert_eq!(conflicts.iter().filter(|c| c.field == "priority").count(), 1);
    }

    #[test]
    fn overlapping_scalar_edit_picks_most_recent_and_logs_conflict() {
        let mut local = base_issue("2025-01-01T00:00:00Z", 3);
        local.title = "local title".into();

        let mut remote = local.clone();
        remote.title = "remote title".into();
        remote.updated_at = "2025-01-02T00:00:00Z".into();
        remote.version = 2;

        let (merged, conflicts) = merge_issue(None, &local, &remote);

        assert_eq!(merged.title, "remote title");
        assert_eq!(merged.version, 4);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, "title");
    }

    #[test]
    fn overlapping_description_edit_logs_conflict() {
        let mut local = base_issue("2025-01-01T00:00:00Z", 3);
        local.description = "local description".into();

        let mut remote = local.clone();
        remote.description = "remote description".into();
        remote.updated_at = "2025-01-02T00:00:00Z".into();
        remote.version = 2;

        let (merged, conflicts) = merge_issue(None, &local, &remote);

        assert_eq!(merged.description, "remote description");
        assert_eq!(conflicts.iter().filter(|c| c.field == "description").count(), 1);
    }

    #[test]
    fn tie_on_updated_at_breaks_by_higher_version() {
        let mut local = base_issue("2025-01-01T00:00:00Z", 5);
        local.title = "local title".into();

        let mut remote = local.clone();
        remote.title = "remote title".into();
        remote.version = 2;

        let (merged, _) = merge_issue(None, &local, &remote);
        assert_eq!(merged.title, "local title");
    }

    #[test]
    fn notes_concatenate_when_one_side_extends_the_other() {
        let mut local = base_issue("2025-01-01T00:00:00Z", 1);
        local.notes = "first note".into();

        let mut remote = local.clone();
        remote.notes = "first note\nsecond note".into();
        remote.updated_at = "2025-01-02T00:00:00Z".into();

        let (merged, _) = merge_issue(None, &local, &remote);
        assert_eq!(merged.notes, "first note\nsecond note");
    }

    #[test]
    fn longer_child_order_hints_wins() {
        let mut local = base_issue("2025-01-01T00:00:00Z", 1);
        local.child_order_hints = Some(vec![generate_issue_id()]);

        let mut remote = local.clone();
        remote.child_order_hints = Some(vec![generate_issue_id(), generate_issue_id()]);
        remote.updated_at = local.updated_at.clone();

        let (merged, conflicts) = merge_issue(None, &local, &remote);
        assert_eq!(merged.child_order_hints, remote.child_order_hints);
        assert_eq!(conflicts.iter().filter(|c| c.field == "child_order_hints").count(), 1);
    }

    #[test]
    fn dependencies_union_by_type_and_target() {
        use crate::issue::{Dependency, DependencyKind};
        let mut local = base_issue("2025-01-01T00:00:00Z", 1);
        let dep_a = Dependency { kind: DependencyKind::Blocks, target: generate_issue_id() };
        local.dependencies.insert(dep_a.clone());

        let mut remote = local.clone();
        let dep_b = Dependency { kind: DependencyKind::Blocks, target: generate_issue_id() };
        remote.dependencies.insert(dep_b.clone());

        let (merged, _) = merge_issue(None, &local, &remote);
        assert!(merged.dependencies.contains(&dep_a));
        assert!(merged.dependencies.contains(&dep_b));
    }
}
