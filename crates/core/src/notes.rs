//! Release-notes normalization.
//!
//! Upstream change logs arrive as Markdown; the catalog wants plain
//! text. The pipeline strips link and emphasis markup, flattens
//! headings, shortens same-repository issue/PR/discussion URLs to
//! `#123` (cross-repository ones to `owner/repo#123`), removes commit
//! hashes, and applies CJK spacing for locales that need it. The steps
//! run in a fixed order and each is a standalone rewrite.

use std::sync::LazyLock;

use regex::Regex;

static LINKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+?)\]\(\S+?\)").unwrap());
static HEADINGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(^|\n)#+ (.+?)\n+").unwrap());
// The regex crate has no backreferences, so bold and bold-italic runs
// are matched explicitly, longest first.
static EMPHASIS: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\*{3}([^*`\n]+?)\*{3}|\*{2}([^*`\n]+?)\*{2}").unwrap());
static CROSS_REPO_REFS: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"https://github\.com/([-\w]+)/([-\w]+)/(?:issues|pull|discussions)/(\d+)").unwrap()
});
static COMMIT_HASHES: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?:https://github\.com/\S+?/commit/)?[0-9a-z]{40}").unwrap());
static TRAILING_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)[ \t]+$").unwrap());

static CJK_BEFORE_LATIN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"([\p{Han}\p{Hiragana}\p{Katakana}])([A-Za-z0-9])").unwrap());
static LATIN_BEFORE_CJK: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"([A-Za-z0-9])([\p{Han}\p{Hiragana}\p{Katakana}])").unwrap());

/// Normalize upstream release notes to the catalog's plain-text form.
///
/// `owner_and_repo` (as `owner/repo`) identifies the upstream
/// repository so its own issue links collapse to the short `#123`
/// form; without it, reference rewriting and hash stripping are
/// skipped entirely. Returns an empty string when nothing usable
/// remains.
pub fn normalize(raw: &str, locale: &str, owner_and_repo: Option<&str>) -> String {
  let mut notes = raw.trim().replace("\r\n", "\n");

  notes = LINKS.replace_all(&notes, "$1").into_owned();
  notes = HEADINGS.replace_all(&notes, "$1$2\n").into_owned();
  notes = EMPHASIS
    .replace_all(&notes, |caps: &regex::Captures| {
      caps
        .get(1)
        .or_else(|| caps.get(2))
        .map_or_else(String::new, |m| m.as_str().to_string())
    })
    .into_owned();

  if let Some(repo) = owner_and_repo {
    let same_repo = Regex::new(&format!(
      r"https://github\.com/{}/(?:issues|pull|discussions)/(\d+)",
      regex::escape(repo)
    ))
    .unwrap_or_else(|_| unreachable!());
    notes = same_repo.replace_all(&notes, "#$1").into_owned();
    notes = CROSS_REPO_REFS.replace_all(&notes, "$1/$2#$3").into_owned();
    notes = COMMIT_HASHES.replace_all(&notes, "").into_owned();
  }

  if locale.starts_with("zh") {
    notes = cjk_spacing(&notes);
  }

  TRAILING_SPACE.replace_all(&notes, "").into_owned()
}

/// Insert a space between adjacent CJK and Latin/digit runs.
fn cjk_spacing(text: &str) -> String {
  let text = CJK_BEFORE_LATIN.replace_all(text, "$1 $2");
  LATIN_BEFORE_CJK.replace_all(&text, "$1 $2").into_owned()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strips_links_keeping_text() {
    assert_eq!(
      normalize("See [the docs](https://example.com/docs) for details", "en-US", None),
      "See the docs for details"
    );
  }

  #[test]
  fn flattens_headings() {
    assert_eq!(
      normalize("## What's new\n\n- item one\n- item two", "en-US", None),
      "What's new\n- item one\n- item two"
    );
  }

  #[test]
  fn strips_emphasis() {
    assert_eq!(normalize("**bold** and ***very bold***", "en-US", None), "bold and very bold");
  }

  #[test]
  fn same_repo_refs_collapse_to_number() {
    let notes = normalize(
      "Fixed in https://github.com/acme/widget/issues/123",
      "en-US",
      Some("acme/widget"),
    );
    assert_eq!(notes, "Fixed in #123");
  }

  #[test]
  fn cross_repo_refs_keep_owner_and_repo() {
    let notes = normalize(
      "Upstream fix: https://github.com/other/project/pull/456",
      "en-US",
      Some("acme/widget"),
    );
    assert_eq!(notes, "Upstream fix: other/project#456");
  }

  #[test]
  fn commit_hashes_are_removed() {
    let hash = "abcd1234abcd1234abcd1234abcd1234abcd1234";
    assert_eq!(
      normalize(&format!("Reverted {hash} again"), "en-US", Some("acme/widget")),
      "Reverted  again"
    );
    assert_eq!(
      normalize(
        &format!("See https://github.com/acme/widget/commit/{hash} here"),
        "en-US",
        Some("acme/widget"),
      ),
      "See  here"
    );
  }

  #[test]
  fn refs_untouched_without_repo_context() {
    let raw = "See https://github.com/acme/widget/issues/123";
    assert_eq!(normalize(raw, "en-US", None), raw);
  }

  #[test]
  fn full_pipeline() {
    // Heading stripped, link text kept, hash removed, issue ref
    // shortened for the same repository.
    let notes = normalize(
      "## Changes\n- Fixed [bug](http://x/1) https://github.com/acme/widget/issues/123 abcd1234abcd1234abcd1234abcd1234abcd1234",
      "en-US",
      Some("acme/widget"),
    );
    assert_eq!(notes, "Changes\n- Fixed bug #123");
  }

  #[test]
  fn cjk_spacing_applied_for_zh_locales() {
    assert_eq!(normalize("修复了bug列表", "zh-CN", None), "修复了 bug 列表");
    assert_eq!(normalize("支持Windows 11系统", "zh-CN", None), "支持 Windows 11 系统");
  }

  #[test]
  fn cjk_spacing_skipped_for_other_locales() {
    assert_eq!(normalize("修复了bug列表", "en-US", None), "修复了bug列表");
  }

  #[test]
  fn trailing_whitespace_stripped_per_line() {
    assert_eq!(normalize("line one   \nline two\t", "en-US", None), "line one\nline two");
  }

  #[test]
  fn empty_after_normalization() {
    assert_eq!(normalize("   \n  ", "en-US", None), "");
  }
}
