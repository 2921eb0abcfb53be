//! Line-oriented patch engine for manifest documents.
//!
//! Manifests are human-authored YAML with comments, deliberate quoting,
//! and a canonical top-level field order. Edits here are line surgery on
//! exactly the fields being changed; everything else round-trips
//! byte-identically (CRLF documents are edited as LF and re-emitted
//! with their original endings).
//!
//! A commented-out line of the form `# ReleaseNotes:` is a placeholder:
//! a reserved insertion point for an optional field. Patching a field
//! that has a placeholder consumes the placeholder in place, so manual
//! edits around it are never disturbed.

use std::fmt;

use regex::Regex;
use thiserror::Error;

/// Manifest schema version written by this tool.
pub const SCHEMA_VERSION: &str = "1.9.0";

/// Canonical ordering of the optional locale-manifest fields the patch
/// engine may insert, together with enough surrounding required fields
/// to anchor an insertion position.
const FIELD_ORDER: &[&str] = &[
  "ShortDescription",
  "Description",
  "Moniker",
  "Tags",
  "Agreements",
  "ReleaseNotes",
  "ReleaseNotesUrl",
  "PurchaseUrl",
  "InstallationNotes",
  "Documentations",
  "ManifestType",
  "ManifestVersion",
];

/// Errors raised by document edits.
///
/// Shape violations are deliberately fatal: a document that does not
/// look the way the catalog's documents look is more likely corrupted
/// or foreign-edited than novel, and guessing risks destroying manual
/// work.
#[derive(Debug, Error)]
pub enum DocumentError {
  /// More than one placeholder comment for the same field.
  #[error("multiple '# {0}:' placeholder comments in one document")]
  DuplicatePlaceholder(String),

  /// A placeholder comment coexists with a live field of the same name.
  #[error("placeholder '# {0}:' shadows a live '{0}' field")]
  PlaceholderShadowsField(String),

  /// A placeholder can only ever be consumed by a real value.
  #[error("refusing to consume placeholder '# {0}:' with an empty value")]
  EmptyPlaceholderValue(String),

  /// The field is not one the ordering table knows how to place.
  #[error("no canonical position known for field '{0}'")]
  UnknownField(String),

  /// The fields between the insertion anchors are not exactly the
  /// anchors themselves; the document's ordering is unexpected.
  #[error("unexpected field ordering around '{0}'; refusing to guess an insertion position")]
  OrderingGap(String),

  /// No anchor field before or after the insertion slot is present.
  #[error("cannot anchor insertion position for '{0}'")]
  NoAnchor(String),

  /// A field required to be present is missing.
  #[error("document has no '{0}' field")]
  MissingField(String),

  /// Leading comments do not match the expected schema header.
  #[error("unexpected document header: {0}")]
  BadHeader(String),

  /// Bare carriage returns mixed with CRLF line endings.
  #[error("document mixes line ending styles")]
  MixedLineEndings,

  /// The installer list does not have the expected shape.
  #[error("unexpected installer list shape: {0}")]
  InstallerShape(String),
}

/// Original line-ending convention of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
  Lf,
  CrLf,
}

impl fmt::Display for LineEnding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LineEnding::Lf => write!(f, "LF"),
      LineEnding::CrLf => write!(f, "CRLF"),
    }
  }
}

/// Split a document into LF-normalized text plus its original ending.
///
/// A document is either entirely LF or entirely CRLF; anything mixed is
/// a shape violation.
pub fn normalize_newlines(text: &str) -> Result<(String, LineEnding), DocumentError> {
  if !text.contains("\r\n") {
    if text.contains('\r') {
      return Err(DocumentError::MixedLineEndings);
    }
    return Ok((text.to_string(), LineEnding::Lf));
  }
  // A CRLF document must contain no bare CR or LF once every CRLF pair
  // is removed.
  let stripped = text.replace("\r\n", "");
  if stripped.contains('\r') || stripped.contains('\n') {
    return Err(DocumentError::MixedLineEndings);
  }
  Ok((text.replace("\r\n", "\n"), LineEnding::CrLf))
}

/// Re-apply the original line-ending convention.
pub fn restore_newlines(text: String, ending: LineEnding) -> String {
  match ending {
    LineEnding::Lf => text,
    LineEnding::CrLf => text.replace('\n', "\r\n"),
  }
}

/// A top-level field and the line range it occupies.
#[derive(Debug, Clone)]
struct FieldSpan {
  key: String,
  /// First line of the field.
  start: usize,
  /// One past the last line belonging to the field.
  end: usize,
}

fn is_top_level_key_line(line: &str) -> Option<&str> {
  let mut chars = line.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() => {}
    _ => return None,
  }
  let colon = line.find(':')?;
  let key = &line[..colon];
  if !key.chars().all(|c| c.is_ascii_alphanumeric()) {
    return None;
  }
  let rest = &line[colon + 1..];
  if rest.is_empty() || rest.starts_with(' ') {
    Some(key)
  } else {
    None
  }
}

/// Collect the top-level fields of an LF-normalized document.
///
/// A field's span runs until the next top-level key line, a column-zero
/// comment, or end of input; indented lines, blank lines inside block
/// scalars, and column-zero list items all belong to the field above.
fn top_level_fields(lines: &[&str]) -> Vec<FieldSpan> {
  let mut spans: Vec<FieldSpan> = Vec::new();
  for (i, line) in lines.iter().enumerate() {
    if let Some(key) = is_top_level_key_line(line) {
      if let Some(last) = spans.last_mut() {
        if last.end == lines.len() {
          last.end = i;
        }
      }
      spans.push(FieldSpan {
        key: key.to_string(),
        start: i,
        end: lines.len(),
      });
    } else if line.starts_with('#') {
      if let Some(last) = spans.last_mut() {
        if last.end == lines.len() {
          last.end = i;
        }
      }
    }
  }
  // Trim trailing blank lines out of the final span.
  if let Some(last) = spans.last_mut() {
    while last.end > last.start + 1 && lines[last.end - 1].trim().is_empty() {
      last.end -= 1;
    }
  }
  spans
}

fn find_field<'a>(spans: &'a [FieldSpan], key: &str) -> Option<&'a FieldSpan> {
  spans.iter().find(|span| span.key == key)
}

/// Render a scalar value, quoting only when YAML would misread it bare.
fn render_scalar(value: &str) -> String {
  let needs_quoting = value.is_empty()
    || value.starts_with(|c: char| "!&*?|>%@`\"'#-[]{},".contains(c) || c.is_whitespace())
    || value.ends_with(char::is_whitespace)
    || value.contains(": ")
    || value.contains(" #")
    || matches!(
      value.to_ascii_lowercase().as_str(),
      "true" | "false" | "null" | "~" | "yes" | "no" | "on" | "off"
    );
  if needs_quoting {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
  } else {
    value.to_string()
  }
}

/// Render a field as one or more lines. Multi-line values use a literal
/// block scalar, never inline escaping.
fn render_field(key: &str, value: &str) -> Vec<String> {
  if !value.contains('\n') {
    return vec![format!("{key}: {}", render_scalar(value))];
  }
  // Literal block; an indentation indicator is required when the first
  // line itself starts with a space.
  let indicator = if value.starts_with(' ') { "|2-" } else { "|-" };
  let mut lines = vec![format!("{key}: {indicator}")];
  for line in value.split('\n') {
    if line.is_empty() {
      lines.push(String::new());
    } else {
      lines.push(format!("  {line}"));
    }
  }
  lines
}

fn placeholder_pattern(key: &str) -> Regex {
  // Key names come from a fixed whitelist, no escaping needed.
  Regex::new(&format!(r"(?m)^# {key}:[ \t]*$")).unwrap_or_else(|_| unreachable!())
}

/// Insert or update one top-level field.
///
/// Returns `Ok(None)` when the document already satisfies the request
/// (field present without `force`, or empty value for an absent field):
/// the caller reads that as "no change needed". Placeholder comments
/// are consumed regardless of `force`.
pub fn insert_or_update(
  text: &str,
  key: &str,
  value: &str,
  force: bool,
) -> Result<Option<String>, DocumentError> {
  let (normalized, ending) = normalize_newlines(text)?;
  let lines: Vec<&str> = normalized.split('\n').collect();
  let spans = top_level_fields(&lines);
  let existing = find_field(&spans, key);

  let placeholder = placeholder_pattern(key);
  let placeholder_lines: Vec<usize> = lines
    .iter()
    .enumerate()
    .filter(|(_, line)| placeholder.is_match(line))
    .map(|(i, _)| i)
    .collect();

  let mut out: Vec<String>;
  match placeholder_lines.as_slice() {
    [] => {
      if value.is_empty() {
        match existing {
          Some(span) if force => {
            out = splice(&lines, span.start, span.end, &[]);
          }
          _ => return Ok(None),
        }
      } else if let Some(span) = existing {
        if !force {
          return Ok(None);
        }
        out = splice(&lines, span.start, span.end, &render_field(key, value));
      } else if key == "ReleaseDate" {
        // The installer manifest's release date is set in place or
        // appended; the ordering table governs only locale fields.
        let at = lines.iter().rposition(|l| !l.trim().is_empty()).map_or(0, |i| i + 1);
        out = splice(&lines, at, at, &render_field(key, value));
      } else {
        let at = insertion_line(key, &spans)?;
        out = splice(&lines, at, at, &render_field(key, value));
      }
    }
    [line] => {
      if existing.is_some() {
        return Err(DocumentError::PlaceholderShadowsField(key.to_string()));
      }
      if value.is_empty() {
        return Err(DocumentError::EmptyPlaceholderValue(key.to_string()));
      }
      out = splice(&lines, *line, line + 1, &render_field(key, value));
    }
    _ => return Err(DocumentError::DuplicatePlaceholder(key.to_string())),
  }

  // Keep exactly one trailing newline.
  while out.len() > 1 && out.last().is_some_and(|l| l.is_empty()) {
    out.pop();
  }
  let mut joined = out.join("\n");
  joined.push('\n');
  Ok(Some(restore_newlines(joined, ending)))
}

/// Compute the line at which `key` must be inserted, anchored by the
/// nearest present fields before and after its canonical slot.
fn insertion_line(key: &str, spans: &[FieldSpan]) -> Result<usize, DocumentError> {
  let slot = FIELD_ORDER
    .iter()
    .position(|&k| k == key)
    .ok_or_else(|| DocumentError::UnknownField(key.to_string()))?;

  let doc_index = |name: &str| spans.iter().position(|span| span.key == name);

  let before: Vec<usize> = FIELD_ORDER[..slot].iter().filter_map(|k| doc_index(k)).collect();
  let after: Vec<usize> = FIELD_ORDER[slot + 1..].iter().filter_map(|k| doc_index(k)).collect();

  let (&first_before, &first_after, &last_after) = match (before.first(), after.first(), after.last()) {
    (Some(b), Some(f), Some(l)) => (b, f, l),
    _ => return Err(DocumentError::NoAnchor(key.to_string())),
  };

  // The fields sitting between the anchors must be exactly the anchors:
  // an unknown field in the slot means the document's shape is not the
  // one this table describes.
  let expected: Vec<usize> = (first_before..=last_after).collect();
  let mut anchors = before.clone();
  anchors.extend(&after);
  if anchors != expected {
    return Err(DocumentError::OrderingGap(key.to_string()));
  }

  Ok(spans[first_after].start)
}

fn splice(lines: &[&str], start: usize, end: usize, replacement: &[String]) -> Vec<String> {
  let mut out: Vec<String> = lines[..start].iter().map(|s| s.to_string()).collect();
  out.extend(replacement.iter().cloned());
  out.extend(lines[end..].iter().map(|s| s.to_string()));
  out
}

/// Replace the value of a field that must already exist.
pub fn replace_field(text: &str, key: &str, value: &str) -> Result<String, DocumentError> {
  let (normalized, ending) = normalize_newlines(text)?;
  let lines: Vec<&str> = normalized.split('\n').collect();
  let spans = top_level_fields(&lines);
  let span = find_field(&spans, key).ok_or_else(|| DocumentError::MissingField(key.to_string()))?;
  let out = splice(&lines, span.start, span.end, &render_field(key, value));
  Ok(restore_newlines(out.join("\n"), ending))
}

/// Remove a populated field. Placeholder comments are left untouched;
/// returns `None` when the field is not present.
pub fn remove_field(text: &str, key: &str) -> Result<Option<String>, DocumentError> {
  let (normalized, ending) = normalize_newlines(text)?;
  let lines: Vec<&str> = normalized.split('\n').collect();
  let spans = top_level_fields(&lines);
  let Some(span) = find_field(&spans, key) else {
    return Ok(None);
  };
  let out = splice(&lines, span.start, span.end, &[]);
  Ok(Some(restore_newlines(out.join("\n"), ending)))
}

/// Read the single-line value of a top-level field, unquoted.
pub fn field_value(text: &str, key: &str) -> Option<String> {
  let (normalized, _) = normalize_newlines(text).ok()?;
  for line in normalized.split('\n') {
    if is_top_level_key_line(line) == Some(key) {
      let value = line[key.len() + 1..].trim();
      let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
      return Some(value.to_string());
    }
  }
  None
}

/// Rewrite the document header and `ManifestVersion` to the current
/// manifest schema.
///
/// Documents start with up to two column-zero comment lines; the last
/// must be the `# yaml-language-server` schema pointer, and any line
/// before it (a generator watermark) is dropped.
pub fn bump_schema(text: &str) -> Result<String, DocumentError> {
  let (normalized, ending) = normalize_newlines(text)?;
  let lines: Vec<&str> = normalized.split('\n').collect();

  let leading: Vec<usize> = lines
    .iter()
    .enumerate()
    .take_while(|(_, line)| line.starts_with('#') || line.trim().is_empty())
    .filter(|(_, line)| line.starts_with('#'))
    .map(|(i, _)| i)
    .collect();

  let mut out: Vec<String>;
  match leading.as_slice() {
    [] => out = lines.iter().map(|s| s.to_string()).collect(),
    rest => {
      if rest.len() > 2 {
        return Err(DocumentError::BadHeader(format!("{} leading comment lines", rest.len())));
      }
      let schema_line = *rest.last().unwrap_or(&0);
      if !lines[schema_line].starts_with("# yaml-language-server") {
        return Err(DocumentError::BadHeader(lines[schema_line].to_string()));
      }
      let version = Regex::new(r"\d+\.\d+(\.\d+)?").unwrap_or_else(|_| unreachable!());
      let rewritten = version.replace(lines[schema_line], SCHEMA_VERSION).into_owned();
      out = Vec::with_capacity(lines.len());
      for (i, line) in lines.iter().enumerate() {
        if i == schema_line {
          out.push(rewritten.clone());
        } else if rest.len() == 2 && i == rest[0] {
          // drop the watermark line
        } else {
          out.push(line.to_string());
        }
      }
    }
  }

  let joined = restore_newlines(out.join("\n"), ending);
  replace_field(&joined, "ManifestVersion", SCHEMA_VERSION)
}

/// Rewrite each installer entry's URL and checksum positionally.
///
/// `pairs` supplies `(url, sha256)` per entry, in order; the entry
/// count must match and every entry must already carry both fields.
pub fn rewrite_installer_urls(text: &str, pairs: &[(String, String)]) -> Result<String, DocumentError> {
  let (normalized, ending) = normalize_newlines(text)?;
  let lines: Vec<&str> = normalized.split('\n').collect();
  let spans = top_level_fields(&lines);
  let span =
    find_field(&spans, "Installers").ok_or_else(|| DocumentError::MissingField("Installers".to_string()))?;

  let mut out: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
  let mut entry: isize = -1;
  let mut urls_seen = 0usize;
  let mut sha_seen = 0usize;
  let mut entry_indent = 0usize;

  for i in span.start + 1..span.end {
    let line = lines[i];
    let indent = line.len() - line.trim_start().len();
    let trimmed = line.trim_start();
    if trimmed.starts_with("- ") {
      if entry < 0 {
        entry_indent = indent;
      }
      if indent == entry_indent {
        entry += 1;
      }
    }
    if entry < 0 || indent > entry_indent + 2 {
      continue;
    }
    let body = trimmed.strip_prefix("- ").unwrap_or(trimmed);
    let prefix = &line[..line.len() - body.len()];
    let index = entry as usize;
    if body.starts_with("InstallerUrl:") {
      let Some((url, _)) = pairs.get(index) else {
        return Err(DocumentError::InstallerShape(format!("more entries than expected ({index})")));
      };
      out[i] = format!("{prefix}InstallerUrl: {}", render_scalar(url));
      urls_seen += 1;
    } else if body.starts_with("InstallerSha256:") {
      let Some((_, sha)) = pairs.get(index) else {
        return Err(DocumentError::InstallerShape(format!("more entries than expected ({index})")));
      };
      out[i] = format!("{prefix}InstallerSha256: {sha}");
      sha_seen += 1;
    }
  }

  if urls_seen != pairs.len() || sha_seen != pairs.len() {
    return Err(DocumentError::InstallerShape(format!(
      "expected {} InstallerUrl/InstallerSha256 pairs, found {urls_seen}/{sha_seen}",
      pairs.len()
    )));
  }

  Ok(restore_newlines(out.join("\n"), ending))
}

/// Replace the whole `Installers:` block with freshly rendered entries.
pub fn replace_installers_block(
  text: &str,
  entries: &[crate::installer::Installer],
) -> Result<String, DocumentError> {
  let (normalized, ending) = normalize_newlines(text)?;
  let lines: Vec<&str> = normalized.split('\n').collect();
  let spans = top_level_fields(&lines);
  let span =
    find_field(&spans, "Installers").ok_or_else(|| DocumentError::MissingField("Installers".to_string()))?;

  let mut replacement = vec!["Installers:".to_string()];
  for entry in entries {
    replacement.extend(entry.render_yaml_entry());
  }
  let out = splice(&lines, span.start, span.end, &replacement);
  Ok(restore_newlines(out.join("\n"), ending))
}
