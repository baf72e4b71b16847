use crate::safety::check_relative;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct PatchConfig {
    #[serde(default)]
    pub meta: Metadata,
    pub target: TargetConfig,
    pub markers: MarkerConfig,
    pub strategy: StrategyConfig,
}

impl PatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.target.candidates.is_empty() {
            issues.push(ValidationIssue::EmptyCandidateList);
        }
        for candidate in &self.target.candidates {
            if let Err(e) = check_relative(Path::new(candidate)) {
                issues.push(ValidationIssue::InvalidCandidate {
                    path: candidate.clone(),
                    reason: e.to_string(),
                });
            }
        }

        if self.markers.completion.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                field: "markers.completion",
            });
        }
        if self.markers.legacy.iter().any(|m| m.trim().is_empty()) {
            issues.push(ValidationIssue::InvalidCombo {
                message: "markers.legacy entries must not be empty".to_string(),
            });
        }
        if matches!(&self.markers.required, Some(r) if r.trim().is_empty()) {
            issues.push(ValidationIssue::MissingField {
                field: "markers.required",
            });
        }

        match &self.strategy {
            StrategyConfig::ReplaceWholeFile { reference } => {
                if reference.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        field: "strategy.reference",
                    });
                }
            }
            StrategyConfig::RegexRewrite {
                pattern,
                replacement,
                fallback,
            } => {
                if pattern.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        field: "strategy.pattern",
                    });
                }
                if replacement.is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        field: "strategy.replacement",
                    });
                }
                if let Some(fallback) = fallback {
                    if fallback.anchor.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            field: "strategy.fallback.anchor",
                        });
                    }
                    if fallback.prologue.is_empty() && fallback.epilogue.is_empty() {
                        issues.push(ValidationIssue::InvalidCombo {
                            message: "fallback needs a prologue or an epilogue".to_string(),
                        });
                    }
                    if matches!(&fallback.until, Some(u) if u.is_empty()) {
                        issues.push(ValidationIssue::MissingField {
                            field: "strategy.fallback.until",
                        });
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Bumped whenever the candidate list or rewrite changes
    #[serde(default)]
    pub revision: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    pub candidates: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarkerConfig {
    pub completion: String,
    #[serde(default)]
    pub legacy: Vec<String>,
    /// Post-condition marker; when absent the completion check is reused
    #[serde(default)]
    pub required: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StrategyConfig {
    /// Copy a pre-authored file (path relative to the package root) over the target
    ReplaceWholeFile { reference: String },
    RegexRewrite {
        pattern: String,
        replacement: String,
        #[serde(default)]
        fallback: Option<FallbackConfig>,
    },
}

impl StrategyConfig {
    pub fn label(&self) -> &'static str {
        match self {
            StrategyConfig::ReplaceWholeFile { .. } => "replace-whole-file",
            StrategyConfig::RegexRewrite { .. } => "regex-rewrite",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FallbackConfig {
    pub anchor: String,
    /// Extend the wrapped block to the line holding this terminator
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub prologue: String,
    #[serde(default)]
    pub epilogue: String,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyCandidateList,
    MissingField { field: &'static str },
    InvalidCandidate { path: String, reason: String },
    InvalidCombo { message: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyCandidateList => {
                write!(f, "patch config lists no candidate paths")
            }
            ValidationIssue::MissingField { field } => {
                write!(f, "patch config missing required field '{field}'")
            }
            ValidationIssue::InvalidCandidate { path, reason } => {
                write!(f, "candidate '{path}' is invalid: {reason}")
            }
            ValidationIssue::InvalidCombo { message } => {
                write!(f, "invalid patch configuration: {message}")
            }
        }
    }
}
