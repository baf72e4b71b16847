//! Content transformations applied to a target file.
//!
//! Two strategies exist. [`Strategy::ReplaceWholeFile`] substitutes a
//! pre-authored reference file verbatim. [`Strategy::RegexRewrite`] rewrites
//! in place with a primary regular expression and, when upstream formatting
//! has drifted so that it no longer matches, falls back to wrapping a literal
//! anchor in a conditional prologue/epilogue.
//!
//! Every match must be unique. An ambiguous match is never guessed at.

use crate::config::{FallbackConfig, StrategyConfig};
use crate::error::PatchError;
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Which route produced the new content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedVia {
    WholeFile,
    PrimaryPattern,
    FallbackAnchor,
}

impl fmt::Display for AppliedVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppliedVia::WholeFile => write!(f, "reference file"),
            AppliedVia::PrimaryPattern => write!(f, "primary pattern"),
            AppliedVia::FallbackAnchor => write!(f, "fallback anchor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub content: Vec<u8>,
    pub via: AppliedVia,
}

#[derive(Debug, Clone)]
pub enum Strategy {
    /// Reference bytes are read when the strategy is prepared, before any
    /// target is touched.
    ReplaceWholeFile { reference: PathBuf, content: Vec<u8> },
    RegexRewrite(RegexRewrite),
}

impl Strategy {
    /// Build a ready-to-run strategy from configuration.
    ///
    /// Relative reference paths resolve against `root`. A missing reference
    /// is [`PatchError::ReferenceMissing`].
    pub fn prepare(config: &StrategyConfig, root: &Path) -> Result<Self, PatchError> {
        match config {
            StrategyConfig::ReplaceWholeFile { reference } => {
                Self::whole_file(root.join(reference))
            }
            StrategyConfig::RegexRewrite {
                pattern,
                replacement,
                fallback,
            } => {
                let fallback = fallback.as_ref().map(AnchorWrap::from);
                Ok(Strategy::RegexRewrite(RegexRewrite::new(
                    pattern,
                    replacement,
                    fallback,
                )?))
            }
        }
    }

    pub fn whole_file(reference: impl Into<PathBuf>) -> Result<Self, PatchError> {
        let reference = reference.into();
        if !reference.is_file() {
            return Err(PatchError::ReferenceMissing(reference));
        }
        let content = fs::read(&reference).map_err(|e| PatchError::io(&reference, e))?;
        info!(reference = %reference.display(), bytes = content.len(), "reference file loaded");
        Ok(Strategy::ReplaceWholeFile { reference, content })
    }

    /// Compute the new content for `file` without touching the disk.
    pub fn transform(&self, file: &Path, original: &[u8]) -> Result<Transformed, PatchError> {
        let transformed = match self {
            Strategy::ReplaceWholeFile { content, .. } => Transformed {
                content: content.clone(),
                via: AppliedVia::WholeFile,
            },
            Strategy::RegexRewrite(rewrite) => rewrite.transform(file, original)?,
        };

        if transformed.content == original {
            return Err(PatchError::mismatch(
                file,
                format!("{} left the content unchanged", transformed.via),
            ));
        }
        Ok(transformed)
    }
}

#[derive(Debug, Clone)]
pub struct RegexRewrite {
    pattern: Regex,
    replacement: String,
    fallback: Option<AnchorWrap>,
}

impl RegexRewrite {
    /// Compile the pattern and check that every group the replacement
    /// refers to exists; the regex crate would otherwise expand unknown
    /// groups to nothing.
    pub fn new(
        pattern: &str,
        replacement: impl Into<String>,
        fallback: Option<AnchorWrap>,
    ) -> Result<Self, PatchError> {
        let pattern = Regex::new(pattern)?;
        let replacement = replacement.into();

        for group in referenced_groups(&replacement) {
            let known = match group.parse::<usize>() {
                Ok(index) => index < pattern.captures_len(),
                Err(_) => pattern.capture_names().flatten().any(|n| n == group),
            };
            if !known {
                return Err(PatchError::InvalidPattern(format!(
                    "replacement refers to unknown group ${group}"
                )));
            }
        }

        Ok(Self {
            pattern,
            replacement,
            fallback,
        })
    }

    fn transform(&self, file: &Path, original: &[u8]) -> Result<Transformed, PatchError> {
        let text = std::str::from_utf8(original)
            .map_err(|_| PatchError::mismatch(file, "target is not valid UTF-8"))?;

        match self.pattern.find_iter(text).take(2).count() {
            1 => {
                debug!(file = %file.display(), "primary pattern matched");
                let rewritten = self.pattern.replace(text, self.replacement.as_str());
                Ok(Transformed {
                    content: rewritten.into_owned().into_bytes(),
                    via: AppliedVia::PrimaryPattern,
                })
            }
            0 => {
                let fallback = self.fallback.as_ref().ok_or_else(|| {
                    PatchError::mismatch(
                        file,
                        "primary pattern did not match and no fallback is configured",
                    )
                })?;
                info!(
                    file = %file.display(),
                    "primary pattern did not match, trying fallback anchor"
                );
                let wrapped = fallback
                    .wrap(text)
                    .map_err(|reason| PatchError::mismatch(file, reason))?;
                Ok(Transformed {
                    content: wrapped.into_bytes(),
                    via: AppliedVia::FallbackAnchor,
                })
            }
            _ => Err(PatchError::mismatch(
                file,
                format!(
                    "primary pattern is ambiguous ({} matches, expected 1)",
                    self.pattern.find_iter(text).count()
                ),
            )),
        }
    }
}

/// Textual wrap around the lines holding a literal anchor.
///
/// The wrapped block runs from the start of the anchor's line to the end of
/// the line holding the first `until` terminator after the anchor, or to the
/// end of the anchor's own line when no terminator is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorWrap {
    pub anchor: String,
    pub until: Option<String>,
    pub prologue: String,
    pub epilogue: String,
}

impl From<&FallbackConfig> for AnchorWrap {
    fn from(config: &FallbackConfig) -> Self {
        Self {
            anchor: config.anchor.clone(),
            until: config.until.clone(),
            prologue: config.prologue.clone(),
            epilogue: config.epilogue.clone(),
        }
    }
}

impl AnchorWrap {
    pub fn wrap(&self, text: &str) -> Result<String, String> {
        let mut hits = text.match_indices(self.anchor.as_str());
        let (at, _) = hits
            .next()
            .ok_or_else(|| format!("fallback anchor {:?} not found", self.anchor))?;
        if hits.next().is_some() {
            return Err(format!(
                "fallback anchor {:?} is ambiguous ({} matches, expected 1)",
                self.anchor,
                text.matches(self.anchor.as_str()).count()
            ));
        }

        let after_anchor = at + self.anchor.len();
        let block_tail = match &self.until {
            Some(until) => {
                let offset = text[after_anchor..].find(until.as_str()).ok_or_else(|| {
                    format!("terminator {until:?} not found after fallback anchor")
                })?;
                after_anchor + offset + until.len()
            }
            None => after_anchor,
        };

        let start = text[..at].rfind('\n').map_or(0, |i| i + 1);
        let end = text[block_tail..]
            .find('\n')
            .map_or(text.len(), |i| block_tail + i + 1);
        let block = &text[start..end];

        let mut out =
            String::with_capacity(text.len() + self.prologue.len() + self.epilogue.len() + 2);
        out.push_str(&text[..start]);
        out.push_str(&self.prologue);
        if !self.prologue.is_empty() && !self.prologue.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(block);
        if !self.epilogue.is_empty() && !block.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&self.epilogue);
        out.push_str(&text[end..]);
        Ok(out)
    }
}

/// Group names or indices referenced as `$name` / `${name}`; `$$` is a
/// literal dollar.
fn referenced_groups(replacement: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut rest = replacement;

    while let Some(pos) = rest.find('$') {
        rest = &rest[pos + 1..];
        if let Some(stripped) = rest.strip_prefix('$') {
            rest = stripped;
            continue;
        }
        if let Some(braced) = rest.strip_prefix('{') {
            if let Some(close) = braced.find('}') {
                groups.push(braced[..close].to_string());
                rest = &braced[close + 1..];
            }
            continue;
        }
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if len > 0 {
            groups.push(rest[..len].to_string());
        }
        rest = &rest[len..];
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert_eq, proptest};
    use proptest::strategy::Strategy as PropStrategy;

    const GUARDED: &str = "\
int f(void) {
  /* check */
  assert(x);
  return 0;
}
";

    fn rewrite() -> RegexRewrite {
        RegexRewrite::new(
            r"(?m)(?P<comment>^[ \t]*/\* check \*/\n)(?P<guard>[ \t]*assert\(x\);\n)",
            "${comment}#ifdef IOS\n  /* PATCHED */\n#else\n${guard}#endif\n",
            Some(wrap()),
        )
        .unwrap()
    }

    fn wrap() -> AnchorWrap {
        AnchorWrap {
            anchor: "assert(".to_string(),
            until: Some(");".to_string()),
            prologue: "#ifdef IOS\n  /* PATCHED */\n#else\n".to_string(),
            epilogue: "#endif\n".to_string(),
        }
    }

    #[test]
    fn test_primary_pattern_rewrites() {
        let out = rewrite()
            .transform(Path::new("f.c"), GUARDED.as_bytes())
            .unwrap();
        assert_eq!(out.via, AppliedVia::PrimaryPattern);
        let text = String::from_utf8(out.content).unwrap();
        assert!(text.contains("  /* check */\n#ifdef IOS\n  /* PATCHED */\n#else\n  assert(x);\n#endif\n  return 0;"));
    }

    #[test]
    fn test_fallback_when_comment_drifted() {
        let drifted = GUARDED.replace("/* check */", "/* verify */");
        let out = rewrite()
            .transform(Path::new("f.c"), drifted.as_bytes())
            .unwrap();
        assert_eq!(out.via, AppliedVia::FallbackAnchor);
        let text = String::from_utf8(out.content).unwrap();
        assert!(text.contains("/* verify */\n#ifdef IOS\n  /* PATCHED */\n#else\n  assert(x);\n#endif\n"));
    }

    #[test]
    fn test_ambiguous_primary_is_mismatch() {
        let twice = format!("{GUARDED}{GUARDED}");
        let err = rewrite()
            .transform(Path::new("f.c"), twice.as_bytes())
            .unwrap_err();
        match err {
            PatchError::PatternMismatch { reason, .. } => assert!(reason.contains("ambiguous")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_match_without_fallback_is_mismatch() {
        let rewrite = RegexRewrite::new(r"nothing", "x", None).unwrap();
        let err = rewrite
            .transform(Path::new("f.c"), GUARDED.as_bytes())
            .unwrap_err();
        assert!(matches!(err, PatchError::PatternMismatch { .. }));
    }

    #[test]
    fn test_unknown_group_rejected() {
        let err = RegexRewrite::new(r"(?P<a>x)", "${b}", None).unwrap_err();
        assert!(matches!(err, PatchError::InvalidPattern(_)));
        assert!(RegexRewrite::new(r"(?P<a>x)", "$a $1 $$", None).is_ok());
        assert!(RegexRewrite::new(r"(x)", "$2", None).is_err());
    }

    #[test]
    fn test_referenced_groups() {
        assert_eq!(
            referenced_groups("${comment}a$guard b$$c $1"),
            vec!["comment", "guard", "1"]
        );
    }

    #[test]
    fn test_wrap_multiline_statement() {
        let text = "a;\n  assert(x,\n         y);\nb;\n";
        let out = wrap().wrap(text).unwrap();
        assert_eq!(
            out,
            "a;\n#ifdef IOS\n  /* PATCHED */\n#else\n  assert(x,\n         y);\n#endif\nb;\n"
        );
    }

    #[test]
    fn test_wrap_at_end_of_file_without_newline() {
        let out = wrap().wrap("  assert(x);").unwrap();
        assert!(out.ends_with("  assert(x);\n#endif\n"));
    }

    #[test]
    fn test_wrap_missing_terminator() {
        let err = wrap().wrap("assert(x\n").unwrap_err();
        assert!(err.contains("terminator"));
    }

    #[test]
    fn test_wrap_ambiguous_anchor() {
        let err = wrap().wrap("assert(a);\nassert(b);\n").unwrap_err();
        assert!(err.contains("ambiguous"));
    }

    #[test]
    fn test_whole_file_missing_reference() {
        let err = Strategy::whole_file("/nonexistent/reference.c.patched").unwrap_err();
        assert!(matches!(err, PatchError::ReferenceMissing(_)));
    }

    #[test]
    fn test_whole_file_identical_is_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.c");
        fs::write(&reference, "same").unwrap();
        let strategy = Strategy::whole_file(&reference).unwrap();

        assert!(strategy.transform(Path::new("t.c"), b"same").is_err());
        let out = strategy.transform(Path::new("t.c"), b"different").unwrap();
        assert_eq!(out.content, b"same");
        assert_eq!(out.via, AppliedVia::WholeFile);
    }

    fn lines() -> impl PropStrategy<Value = String> {
        proptest::collection::vec("[a-z ]{0,12}", 0..6)
            .prop_map(|lines| lines.into_iter().map(|l| l + "\n").collect())
    }

    proptest! {
        #[test]
        fn prop_wrap_preserves_surroundings(prefix in lines(), suffix in lines()) {
            let text = format!("{prefix}  assert(x);\n{suffix}");
            let out = wrap().wrap(&text).unwrap();
            let expected = format!(
                "{prefix}#ifdef IOS\n  /* PATCHED */\n#else\n  assert(x);\n#endif\n{suffix}"
            );
            prop_assert_eq!(out, expected);
        }
    }
}
