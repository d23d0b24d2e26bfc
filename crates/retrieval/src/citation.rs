//! Citation verification for replies grounded in retrieved documents.
//!
//! The model is asked to cite retrieved documents as `[Source: <path>]` or
//! `[Source: <n>]`, where `n` is a 1-based index into the most recent
//! query's sources. After the exchange, every citation is resolved and
//! compared with the paths the query tool actually returned. Replies that
//! cite nothing, or cite documents that were never retrieved, are annotated
//! and flagged for a retry.

use std::sync::LazyLock;

use regex_lite::{Captures, Regex};
use serde_json::Value;
use toolbridge_agent::hooks::{ReplyVerifier, VerificationSession, Verdict};
use toolbridge_core::tool::{Tool, ToolOutcome};
use tracing::{error, warn};

use crate::adapter::QUERY_TOOL;
use crate::evidence::PathNormalizer;

/// `[Source: x]`, possibly with several comma-separated sources.
static BRACKETED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[Source:\s*([^\]\[]+)\]").ok());

/// `Source: [x]` and `Source:[x]`.
static TRAILING: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Source:\s*\[([^\]\[]+)\]").ok());

const NO_CITATIONS_WARNING: &str = "\n\n⚠️ **Warning**: No citations were included in this response, \
despite information potentially coming from documents. \
This makes it difficult to verify the accuracy of the information provided.";

/// Result of checking one reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CitationReport {
    /// Reply text with numeric citations replaced by their paths.
    pub content: String,
    /// Every citation found, resolved and normalized, in order.
    pub citations: Vec<String>,
    /// Citations that match no retrieved document.
    pub hallucinated: Vec<String>,
}

impl CitationReport {
    pub fn has_citations(&self) -> bool {
        !self.citations.is_empty()
    }
}

/// Resolve and check the citations in `content`.
///
/// `latest` holds the sources of the most recent query and is what numeric
/// citations index into. `known` holds every source retrieved during the
/// exchange. Both are expected to be normalized already.
pub fn verify_citations(
    content: &str,
    latest: &[String],
    known: &[String],
    normalizer: &PathNormalizer,
) -> CitationReport {
    let mut citations: Vec<String> = Vec::new();
    let mut hallucinated: Vec<String> = Vec::new();

    let mut resolve = |raw: &str| -> String {
        let token = raw.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '`').trim();
        let resolved = match token.parse::<usize>() {
            Ok(index) => match index.checked_sub(1).and_then(|i| latest.get(i)) {
                Some(path) => path.clone(),
                None => {
                    if !hallucinated.iter().any(|h| h == token) {
                        hallucinated.push(token.to_string());
                    }
                    citations.push(token.to_string());
                    return token.to_string();
                }
            },
            Err(_) => normalizer.normalize(token),
        };
        if !known.contains(&resolved) && !hallucinated.contains(&resolved) {
            hallucinated.push(resolved.clone());
        }
        citations.push(resolved.clone());
        resolved
    };

    let mut rewrite = |inner: &str| -> String {
        inner
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(&mut resolve)
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut text = content.to_string();
    if let Some(re) = BRACKETED.as_ref() {
        text = re
            .replace_all(&text, |caps: &Captures<'_>| format!("[Source: {}]", rewrite(&caps[1])))
            .into_owned();
    }
    if let Some(re) = TRAILING.as_ref() {
        text = re
            .replace_all(&text, |caps: &Captures<'_>| format!("Source: [{}]", rewrite(&caps[1])))
            .into_owned();
    }

    CitationReport {
        content: text,
        citations,
        hallucinated,
    }
}

fn hallucination_warning(hallucinated: &[String]) -> String {
    let listing = hallucinated
        .iter()
        .map(|h| format!("- ❌ [{h}]"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "\n\n⚠️ **WARNING: HALLUCINATED SOURCES DETECTED** ⚠️\n\
         The following citations do not match any of the actual document sources:\n\
         {listing}\n\n\
         The information attributed to these non-existent sources may be inaccurate or fabricated. \
         Please disregard these claims or verify them through other means."
    )
}

fn allowed_listing(known: &[String]) -> String {
    known
        .iter()
        .enumerate()
        .map(|(i, path)| format!("[{}] {path}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Checks citations in replies to exchanges that used the query tool.
#[derive(Debug, Clone)]
pub struct CitationVerifier {
    tool_name: String,
    normalizer: PathNormalizer,
}

impl Default for CitationVerifier {
    fn default() -> Self {
        Self::new(PathNormalizer::default())
    }
}

impl CitationVerifier {
    pub fn new(normalizer: PathNormalizer) -> Self {
        Self {
            tool_name: QUERY_TOOL.into(),
            normalizer,
        }
    }

    /// Watch a retrieval tool registered under a different name.
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }
}

impl ReplyVerifier for CitationVerifier {
    fn name(&self) -> &str {
        "citations"
    }

    fn system_prompt_addendum(&self) -> Option<String> {
        Some(format!(
            "You can search the document knowledge base with the `{tool}` tool. \
             When you use information from documents you MUST cite it as \
             [Source: <full path>] or [Source: <number>], using only the paths \
             listed in the `{tool}` result. Never invent document sources. If the \
             documents don't contain the answer, say so.",
            tool = self.tool_name
        ))
    }

    fn start(&self) -> Box<dyn VerificationSession> {
        Box::new(CitationSession {
            tool_name: self.tool_name.clone(),
            normalizer: self.normalizer.clone(),
            retrieval_used: false,
            latest: Vec::new(),
            known: Vec::new(),
        })
    }
}

/// Per-exchange citation state.
#[derive(Debug)]
pub struct CitationSession {
    tool_name: String,
    normalizer: PathNormalizer,
    retrieval_used: bool,
    latest: Vec<String>,
    known: Vec<String>,
}

impl CitationSession {
    pub fn retrieval_used(&self) -> bool {
        self.retrieval_used
    }

    pub fn known_sources(&self) -> &[String] {
        &self.known
    }
}

impl VerificationSession for CitationSession {
    fn observe_tool_result(&mut self, tool: &Tool, _arguments: &Value, outcome: &ToolOutcome) {
        if tool.name != self.tool_name {
            return;
        }
        self.retrieval_used = true;

        let ToolOutcome::Success(value) = outcome else {
            return;
        };
        let paths: Vec<String> = value["source_paths"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(|p| self.normalizer.normalize(p))
            .collect();

        for path in &paths {
            if !self.known.contains(path) {
                self.known.push(path.clone());
            }
        }
        self.latest = paths;
    }

    fn review(&mut self, content: &str) -> Verdict {
        if !self.retrieval_used {
            return Verdict::accept(content);
        }

        let report = verify_citations(content, &self.latest, &self.known, &self.normalizer);

        if !report.has_citations() {
            if self.known.is_empty() {
                return Verdict::accept(report.content);
            }
            warn!("No citations found in reply despite retrieved documents");
            return Verdict {
                content: format!("{}{NO_CITATIONS_WARNING}", report.content),
                needs_retry: true,
                warnings: vec!["reply cites no sources".into()],
                correction: Some(format!(
                    "Your previous answer did not cite its sources. Rewrite it and cite every \
                     fact taken from the documents as [Source: <path>], using only these sources:\n{}",
                    allowed_listing(&self.known)
                )),
            };
        }

        if report.hallucinated.is_empty() {
            return Verdict::accept(report.content);
        }

        error!(
            count = report.hallucinated.len(),
            sources = ?report.hallucinated,
            "Reply cites sources that were never retrieved"
        );
        let allowed = if self.known.is_empty() {
            "No documents were retrieved, so no document may be cited.".to_string()
        } else {
            format!("Cite only these sources:\n{}", allowed_listing(&self.known))
        };
        Verdict {
            content: format!("{}{}", report.content, hallucination_warning(&report.hallucinated)),
            needs_retry: true,
            warnings: report
                .hallucinated
                .iter()
                .map(|h| format!("hallucinated source: {h}"))
                .collect(),
            correction: Some(format!(
                "Your previous answer cited sources that were not returned by the `{}` tool: {}. \
                 Rewrite the answer without them. {allowed}",
                self.tool_name,
                report.hallucinated.join(", ")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PET_POLICY: &str = "handbook.hypha.coop/pet-policy";

    fn query_tool() -> Tool {
        Tool {
            name: QUERY_TOOL.into(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
            adapter: "retrieval".into(),
            glyph: None,
        }
    }

    fn session_with(paths: &[&str]) -> Box<dyn VerificationSession> {
        let mut session = CitationVerifier::default().start();
        session.observe_tool_result(
            &query_tool(),
            &json!({"text": "pets"}),
            &ToolOutcome::Success(json!({"result": "...", "source_paths": paths})),
        );
        session
    }

    #[test]
    fn numeric_citation_round_trip() {
        let report = verify_citations(
            "Pets are allowed. [Source: 1]",
            &[PET_POLICY.to_string()],
            &[PET_POLICY.to_string()],
            &PathNormalizer::default(),
        );
        assert_eq!(report.content, format!("Pets are allowed. [Source: {PET_POLICY}]"));
        assert_eq!(report.citations, vec![PET_POLICY]);
        assert!(report.hallucinated.is_empty());
    }

    #[test]
    fn invented_path_is_hallucinated() {
        let mut session = session_with(&[PET_POLICY]);
        let verdict = session.review("[Source: handbook.hypha.coop/fake-doc]");
        assert!(verdict.needs_retry);
        assert!(verdict.content.contains("HALLUCINATED SOURCES DETECTED"));
        assert!(verdict.content.contains("- ❌ [handbook.hypha.coop/fake-doc]"));
        assert_eq!(verdict.warnings, vec!["hallucinated source: handbook.hypha.coop/fake-doc"]);
        let correction = verdict.correction.unwrap();
        assert!(correction.contains("handbook.hypha.coop/fake-doc"));
        assert!(correction.contains(PET_POLICY));
    }

    #[test]
    fn missing_citations_are_flagged() {
        let mut session = session_with(&[PET_POLICY]);
        let verdict = session.review("Pets are allowed on Fridays.");
        assert!(verdict.needs_retry);
        assert!(verdict.content.starts_with("Pets are allowed on Fridays."));
        assert!(verdict.content.contains("No citations were included"));
    }

    #[test]
    fn valid_citations_are_accepted() {
        let mut session = session_with(&[PET_POLICY, "handbook.hypha.coop/office/hours"]);
        let verdict = session.review(
            "Dogs are fine [Source: handbook.hypha.coop/pet-policy.md] during opening hours Source: [2].",
        );
        assert!(!verdict.needs_retry);
        assert_eq!(
            verdict.content,
            "Dogs are fine [Source: handbook.hypha.coop/pet-policy] during opening hours \
             Source: [handbook.hypha.coop/office/hours]."
        );
    }

    #[test]
    fn comma_separated_sources_are_split() {
        let known = vec![PET_POLICY.to_string(), "handbook.hypha.coop/office/hours".to_string()];
        let report = verify_citations(
            "Both apply. [Source: 1, handbook.hypha.coop/office/hours, 7]",
            &known,
            &known,
            &PathNormalizer::default(),
        );
        assert_eq!(report.citations.len(), 3);
        assert_eq!(report.hallucinated, vec!["7"]);
        assert_eq!(
            report.content,
            "Both apply. [Source: handbook.hypha.coop/pet-policy, handbook.hypha.coop/office/hours, 7]"
        );
    }

    #[test]
    fn numbers_index_the_latest_query() {
        let mut session = CitationVerifier::default().start();
        for paths in [vec!["handbook.hypha.coop/a"], vec!["handbook.hypha.coop/b"]] {
            session.observe_tool_result(
                &query_tool(),
                &json!({}),
                &ToolOutcome::Success(json!({"source_paths": paths})),
            );
        }
        let verdict = session.review("See [Source: 1] and [Source: handbook.hypha.coop/a].");
        assert!(!verdict.needs_retry);
        assert_eq!(
            verdict.content,
            "See [Source: handbook.hypha.coop/b] and [Source: handbook.hypha.coop/a]."
        );
    }

    #[test]
    fn skipped_without_retrieval() {
        let mut session = CitationVerifier::default().start();
        let other = Tool {
            name: "calc".into(),
            ..query_tool()
        };
        session.observe_tool_result(&other, &json!({}), &ToolOutcome::Success(json!({"result": 4})));
        let verdict = session.review("2 + 2 = 4 [Source: my head]");
        assert_eq!(verdict, Verdict::accept("2 + 2 = 4 [Source: my head]"));
    }

    #[test]
    fn empty_retrieval_without_citations_is_fine() {
        let mut session = session_with(&[]);
        let verdict = session.review("I couldn't find anything about that.");
        assert!(!verdict.needs_retry);
    }

    #[test]
    fn addendum_names_the_tool() {
        let verifier = CitationVerifier::default().with_tool_name("handbook_search");
        let addendum = verifier.system_prompt_addendum().unwrap();
        assert!(addendum.contains("`handbook_search`"));
        assert!(addendum.contains("[Source: <full path>]"));
        assert_eq!(verifier.name(), "citations");
    }
}
