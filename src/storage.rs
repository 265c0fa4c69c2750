//! Issue storage: YAML front matter + Markdown files, atomic writes, and
//! directory listing (`spec.md` §4.2).
//!
//! Writes are atomic (temp file then rename) and `parse` rejects
//! malformed front matter up front rather than deferring errors into
//! field access later.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::issue::{Issue, IssueId};

const FRONT_MATTER_DELIM: &str = "---";

/// Parse an issue file's text into an [`Issue`].
///
/// # Errors
/// Returns [`crate::Error::Validation`] if the front matter delimiters
/// are missing or the YAML fails to parse against the [`Issue`] schema.
/// Unknown keys are preserved in [`Issue::extensions`], never rejected.
pub fn parse(text: &str) -> crate::Result<Issue> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text); // tolerate a BOM from editors
    let mut lines = text.lines();
    let first = lines.next().unwrap_or_default().trim();
    if first != FRONT_MATTER_DELIM {
        return Err(crate::Error::Validation { field: "front matter".into(), reason: "file does not start with '---'".into() });
    }

    let remainder: Vec<&str> = lines.collect();
    let Some(close_idx) = remainder.iter().position(|l| l.trim() == FRONT_MATTER_DELIM) else {
        return Err(crate::Error::Validation { field: "front matter".into(), reason: "missing closing '---'".into() });
    };

    let yaml = remainder[..close_idx].join("\n");
    let mut issue: Issue = serde_yaml::from_str(&yaml)
        .map_err(|e| crate::Error::Validation { field: "front matter".into(), reason: e.to_string() })?;

    let body = remainder[close_idx + 1..].join("\n");
    issue.description = extract_section(&body, "Description").unwrap_or_default();
    issue.notes = extract_section(&body, "Notes").unwrap_or_default();

    Ok(issue)
}

/// Extract the text under a level-2 `## <heading>` section, trimmed, up
/// to the next `## ` heading or end of file.
fn extract_section(body: &str, heading: &str) -> Option<String> {
    let marker = format!("## {heading}");
    let start = body.find(&marker)? + marker.len();
    let rest = &body[start..];
    let end = rest.find("\n## ").unwrap_or(rest.len());
    Some(rest[..end].trim().to_owned())
}

/// Serialize an [`Issue`] back to YAML front matter + Markdown, with
/// stable key order (struct-field order) and elided empty optionals.
pub fn serialize(issue: &Issue) -> crate::Result<String> {
    let yaml = serde_yaml::to_string(issue).map_err(|e| crate::Error::Validation { field: "issue".into(), reason: e.to_string() })?;

    let mut out = String::new();
    out.push_str(FRONT_MATTER_DELIM);
    out.push('\n');
    out.push_str(yaml.trim_end());
    out.push('\n');
    out.push_str(FRONT_MATTER_DELIM);
    out.push('\n');

    if !issue.description.is_empty() {
        out.push_str("\n## Description\n");
        out.push_str(issue.description.trim());
        out.push('\n');
    }
    if !issue.notes.is_empty() {
        out.push_str("\n## Notes\n");
        out.push_str(issue.notes.trim());
        out.push('\n');
    }

    Ok(out)
}

/// The file path for `id` inside an issues directory.
#[must_use]
pub fn issue_path(issues_dir: &Path, id: &IssueId) -> PathBuf {
    issues_dir.join(format!("{id}.md"))
}

/// Read and parse the issue file for `id`.
///
/// # Errors
/// Returns [`crate::Error::NotFound`] if the file does not exist, or a
/// validation error if it fails to parse.
pub fn read(issues_dir: &Path, id: &IssueId) -> crate::Result<Issue> {
    let path = issue_path(issues_dir, id);
    let text = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            crate::Error::NotFound { what: "issue".into(), id: id.to_string() }
        } else {
            crate::Error::Io(e)
        }
    })?;
    parse(&text)
}

/// Atomically write `issue` into `issues_dir`: serialize to a sibling
/// `<id>.md.tmp`, fsync it, then rename over the final path. A reader
/// never observes a partially written file; a crash between write and
/// rename leaves at most one sweepable `.tmp` file (`spec.md` §4.2).
pub fn write(issues_dir: &Path, issue: &Issue) -> crate::Result<()> {
    fs::create_dir_all(issues_dir)?;
    let final_path = issue_path(issues_dir, &issue.id);
    let tmp_path = final_path.with_extension("md.tmp");

    let text = serialize(issue)?;
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

/// List every parsed issue in `issues_dir`, skipping `.tmp` siblings.
///
/// A single malformed file fails the whole call with a typed error
/// naming the offending path, rather than silently dropping it — per
/// `spec.md` §4.2 "partial reads fail with a typed error".
pub fn list(issues_dir: &Path) -> crate::Result<Vec<Issue>> {
    if !issues_dir.exists() {
        return Ok(Vec::new());
    }
    let mut issues = Vec::new();
    for entry in fs::read_dir(issues_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let text = fs::read_to_string(&path)?;
        let issue = parse(&text).map_err(|e| crate::Error::Validation {
            field: path.display().to_string(),
            reason: e.to_string(),
        })?;
        issues.push(issue);
    }
    issues.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(issues)
}

/// Find orphaned `.tmp` siblings left behind by a crashed writer.
#[must_use]
pub fn find_orphan_temp_files(issues_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(issues_dir) else { return Vec::new() };
    entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("tmp"))
        .collect()
}

/// Delete every orphan `.tmp` file found by [`find_orphan_temp_files`].
/// Used by doctor's `--fix` path.
pub fn sweep_orphan_temp_files(issues_dir: &Path) -> crate::Result<usize> {
    let orphans = find_orphan_temp_files(issues_dir);
    let count = orphans.len();
    for path in orphans {
        fs::remove_file(path)?;
    }
    Ok(count)
}
