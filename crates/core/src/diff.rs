//! Unified diffs for the audit trail.
//!
//! Every proposed manifest change is rendered as a line diff before it
//! is committed, so operators can review exactly what the reconciler is
//! about to push. Documents are small, so a quadratic LCS is fine.

/// One line of a rendered diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
  Header(String),
  Hunk(String),
  Context(String),
  Removed(String),
  Added(String),
}

const CONTEXT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
  Keep,
  Remove,
  Add,
}

/// Render a unified diff between two documents.
///
/// Returns an empty vector when the documents are identical, which the
/// caller reads as "nothing to report".
pub fn unified(name: &str, old: &str, new: &str) -> Vec<DiffLine> {
  if old == new {
    return Vec::new();
  }

  let old_lines: Vec<&str> = old.lines().collect();
  let new_lines: Vec<&str> = new.lines().collect();
  let edits = edit_script(&old_lines, &new_lines);

  let mut out = vec![
    DiffLine::Header(format!("--- a/{name}")),
    DiffLine::Header(format!("+++ b/{name}")),
  ];

  for hunk in hunks(&edits) {
    let (mut old_at, mut new_at, mut old_n, mut new_n) = (None, None, 0usize, 0usize);
    let mut body = Vec::new();
    let (mut oi, mut ni) = positions_before(&edits, hunk.start);

    for &edit in &edits[hunk.clone()] {
      match edit {
        Edit::Keep => {
          old_at.get_or_insert(oi);
          new_at.get_or_insert(ni);
          body.push(DiffLine::Context(old_lines[oi].to_string()));
          oi += 1;
          ni += 1;
          old_n += 1;
          new_n += 1;
        }
        Edit::Remove => {
          old_at.get_or_insert(oi);
          new_at.get_or_insert(ni);
          body.push(DiffLine::Removed(old_lines[oi].to_string()));
          oi += 1;
          old_n += 1;
        }
        Edit::Add => {
          old_at.get_or_insert(oi);
          new_at.get_or_insert(ni);
          body.push(DiffLine::Added(new_lines[ni].to_string()));
          ni += 1;
          new_n += 1;
        }
      }
    }

    let old_start = old_at.map_or(0, |i| if old_n == 0 { i } else { i + 1 });
    let new_start = new_at.map_or(0, |i| if new_n == 0 { i } else { i + 1 });
    out.push(DiffLine::Hunk(format!("@@ -{old_start},{old_n} +{new_start},{new_n} @@")));
    out.extend(body);
  }

  out
}

/// Plain-text rendering, one line per entry with the usual sigils.
pub fn render(lines: &[DiffLine]) -> String {
  let mut out = String::new();
  for line in lines {
    match line {
      DiffLine::Header(s) | DiffLine::Hunk(s) => out.push_str(s),
      DiffLine::Context(s) => {
        out.push(' ');
        out.push_str(s);
      }
      DiffLine::Removed(s) => {
        out.push('-');
        out.push_str(s);
      }
      DiffLine::Added(s) => {
        out.push('+');
        out.push_str(s);
      }
    }
    out.push('\n');
  }
  out
}

/// LCS edit script: removals ordered before the additions that replace
/// them, as diff tools conventionally print.
fn edit_script(old: &[&str], new: &[&str]) -> Vec<Edit> {
  let (n, m) = (old.len(), new.len());
  // lcs[i][j] = LCS length of old[i..] and new[j..].
  let mut lcs = vec![vec![0usize; m + 1]; n + 1];
  for i in (0..n).rev() {
    for j in (0..m).rev() {
      lcs[i][j] = if old[i] == new[j] {
        lcs[i + 1][j + 1] + 1
      } else {
        lcs[i + 1][j].max(lcs[i][j + 1])
      };
    }
  }

  let mut edits = Vec::with_capacity(n.max(m));
  let (mut i, mut j) = (0, 0);
  while i < n && j < m {
    if old[i] == new[j] {
      edits.push(Edit::Keep);
      i += 1;
      j += 1;
    } else if lcs[i + 1][j] >= lcs[i][j + 1] {
      edits.push(Edit::Remove);
      i += 1;
    } else {
      edits.push(Edit::Add);
      j += 1;
    }
  }
  edits.extend(std::iter::repeat_n(Edit::Remove, n - i));
  edits.extend(std::iter::repeat_n(Edit::Add, m - j));
  edits
}

/// Group the script into hunks with up to `CONTEXT` shared lines on
/// each side, merging hunks whose context would overlap.
fn hunks(edits: &[Edit]) -> Vec<std::ops::Range<usize>> {
  let mut out: Vec<std::ops::Range<usize>> = Vec::new();
  let mut i = 0;
  while i < edits.len() {
    if edits[i] == Edit::Keep {
      i += 1;
      continue;
    }
    let start = i.saturating_sub(CONTEXT);
    let mut end = i + 1;
    let mut last_change = i;
    while end < edits.len() && end <= last_change + 2 * CONTEXT {
      if edits[end] != Edit::Keep {
        last_change = end;
      }
      end += 1;
    }
    let end = (last_change + CONTEXT + 1).min(edits.len());
    match out.last_mut() {
      Some(prev) if prev.end >= start => prev.end = end,
      _ => out.push(start..end),
    }
    i = end;
  }
  out
}

/// Old/new line indices consumed by `edits[..upto]`.
fn positions_before(edits: &[Edit], upto: usize) -> (usize, usize) {
  let mut oi = 0;
  let mut ni = 0;
  for &edit in &edits[..upto] {
    match edit {
      Edit::Keep => {
        oi += 1;
        ni += 1;
      }
      Edit::Remove => oi += 1,
      Edit::Add => ni += 1,
    }
  }
  (oi, ni)
}
