//! Pluggable external collaborators.
//!
//! These traits cover functionality the pipeline depends on but that is
//! explicitly out of scope for this crate to implement deeply (grammar-aware
//! lemma parsing, prover-version compatibility filtering, semantic output
//! parsing). Each trait ships a reasonable default implementation so the
//! pipeline is usable end to end without a real prover on hand.

use std::collections::HashMap;
use std::path::Path;

use crate::error::ExpansionError;
use crate::recipe::ProverVariant;

/// Resolves the lemma names declared in a theory file.
pub trait LemmaExtractor: Send + Sync {
    fn lemma_names(&self, theory_file: &Path) -> Result<Vec<String>, ExpansionError>;
}

/// Line-oriented default: recognizes `lemma <name>` / `lemma <name>:`
/// declarations. Good enough to drive expansion and tests without a full
/// grammar-aware parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineScanLemmaExtractor;

impl LemmaExtractor for LineScanLemmaExtractor {
    fn lemma_names(&self, theory_file: &Path) -> Result<Vec<String>, ExpansionError> {
        let contents = std::fs::read_to_string(theory_file).map_err(|source| {
            ExpansionError::LemmaExtraction {
                path: theory_file.to_path_buf(),
                source,
            }
        })?;

        let mut names = Vec::new();
        for line in contents.lines() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("lemma ") {
                let name = rest
                    .trim()
                    .trim_end_matches(':')
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_string();
                if !name.is_empty() {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }
}

/// Drops prover flags unsupported by a given prover variant's version.
pub trait VersionFilter: Send + Sync {
    fn filter(&self, variant: &ProverVariant, argv: Vec<String>) -> Vec<String>;
}

/// Identity default: no flags are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVersionFilter;

impl VersionFilter for NoopVersionFilter {
    fn filter(&self, _variant: &ProverVariant, argv: Vec<String>) -> Vec<String> {
        argv
    }
}

/// Coarse-grained parsed outcome extracted from a prover's stdout.
#[derive(Debug, Default, Clone)]
pub struct ParsedOutcome {
    pub verified: HashMap<String, u32>,
    pub falsified: HashMap<String, u32>,
    pub unterminated: Vec<String>,
    pub warnings: Vec<String>,
}

/// Extracts verified/falsified lemma counts from prover stdout.
pub trait OutputParser: Send + Sync {
    fn parse(&self, stdout: &str) -> ParsedOutcome;
}

/// Tolerant line-scan default matching Tamarin-style summary lines such as
/// `lemma_name (all-traces): verified (12 steps)` or `... falsified (3 steps)`.
/// Unparseable output yields empty counts rather than an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineScanOutputParser;

impl OutputParser for LineScanOutputParser {
    fn parse(&self, stdout: &str) -> ParsedOutcome {
        let mut outcome = ParsedOutcome::default();
        for line in stdout.lines() {
            let line = line.trim();
            let Some((name_part, rest)) = line.split_once(':') else {
                continue;
            };
            let Some(name) = name_part.split_whitespace().next() else {
                continue;
            };
            if let Some(steps) = extract_steps(rest, "verified") {
                outcome.verified.insert(name.to_string(), steps);
            } else if let Some(steps) = extract_steps(rest, "falsified") {
                outcome.falsified.insert(name.to_string(), steps);
            } else if rest.contains("analysis incomplete") || rest.contains("unterminated") {
                outcome.unterminated.push(name.to_string());
            }
        }
        outcome
    }
}

fn extract_steps(text: &str, keyword: &str) -> Option<u32> {
    let idx = text.find(keyword)?;
    let after = &text[idx + keyword.len()..];
    let open = after.find('(')?;
    let close = after.find(')')?;
    let inner = &after[open + 1..close];
    inner
        .split_whitespace()
        .next()
        .and_then(|tok| tok.parse::<u32>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn line_scan_extracts_simple_lemma_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "theory Example begin\nlemma secrecy:\n  \"...\"\nlemma injective_agreement:\nend").unwrap();
        let extractor = LineScanLemmaExtractor;
        let names = extractor.lemma_names(file.path()).unwrap();
        assert_eq!(names, vec!["secrecy", "injective_agreement"]);
    }

    #[test]
    fn output_parser_reads_verified_and_falsified_counts() {
        let stdout = "secrecy (all-traces): verified (12 steps)\n\
                       injective_agreement (all-traces): falsified (3 steps)\n";
        let parsed = LineScanOutputParser.parse(stdout);
        assert_eq!(parsed.verified.get("secrecy"), Some(&12));
        assert_eq!(parsed.falsified.get("injective_agreement"), Some(&3));
    }

    #[test]
    fn output_parser_tolerates_unparseable_output() {
        let parsed = LineScanOutputParser.parse("garbage output with no structure");
        assert!(parsed.verified.is_empty());
        assert!(parsed.falsified.is_empty());
    }

    #[test]
    fn noop_version_filter_is_identity() {
        let variant = ProverVariant::Native { path: "x".into() };
        let argv = vec!["--prove".to_string(), "foo".to_string()];
        assert_eq!(NoopVersionFilter.filter(&variant, argv.clone()), argv);
    }
}
