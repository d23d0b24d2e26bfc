//! Retrieved evidence: source-path normalization, evidence sets, and the
//! per-document content cache.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// File extensions dropped from source paths.
const DOCUMENT_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "pdf", "docx", "doc", "csv", "html", "htm"];

/// Rewrites index-internal source paths into the form shown to users.
///
/// `file:///srv/md_db/policies/pets.md` becomes
/// `handbook.hypha.coop/policies/pets` with the default marker and prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNormalizer {
    storage_marker: String,
    public_prefix: String,
}

impl Default for PathNormalizer {
    fn default() -> Self {
        Self::new("md_db/", "handbook.hypha.coop/")
    }
}

impl PathNormalizer {
    pub fn new(storage_marker: impl Into<String>, public_prefix: impl Into<String>) -> Self {
        Self {
            storage_marker: storage_marker.into(),
            public_prefix: public_prefix.into(),
        }
    }

    /// Canonical display form. Applying it twice changes nothing.
    pub fn normalize(&self, raw: &str) -> String {
        let mut path = raw.trim().trim_start_matches("file://").replace('\\', "/");

        while path.contains("//") {
            path = path.replace("//", "/");
        }
        let path = path.trim_end_matches('/');

        let path = match path.rsplit_once('.') {
            Some((stem, ext))
                if !ext.contains('/')
                    && DOCUMENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) =>
            {
                stem
            }
            _ => path,
        };

        if !self.storage_marker.is_empty()
            && let Some((_, rest)) = path.split_once(self.storage_marker.as_str())
        {
            return format!("{}{rest}", self.public_prefix);
        }
        path.to_string()
    }
}

/// One retrieved document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Normalized source path.
    pub path: String,
    pub content: String,
}

/// Everything one retrieval call returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSet {
    pub query: String,
    /// Combined answer text from the index.
    pub output: String,
    pub items: Vec<Evidence>,
}

impl EvidenceSet {
    pub fn paths(&self) -> Vec<String> {
        self.items.iter().map(|e| e.path.clone()).collect()
    }

    /// 1-based lookup, as used by `[Source: 2]`.
    pub fn resolve(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.items.get(i))
            .map(|e| e.path.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Text handed to the model: the retrieved content followed by the
    /// numbered list of citable sources.
    pub fn to_tool_text(&self) -> String {
        if self.items.is_empty() {
            return format!("{}\n\nNo document sources were found for this query.", self.output);
        }
        let listing = self
            .items
            .iter()
            .enumerate()
            .map(|(i, e)| format!("- [{}] \"{}\"", i + 1, e.path))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "DOCUMENT CONTEXT FOR YOUR RESPONSE:\n\n\
             The following documents were found for this query. You must ONLY cite these exact documents:\n\
             {listing}\n\n\
             Cite them as [Source: <path>] or [Source: <number>].\n\n\
             Document content:\n{}",
            self.output
        )
    }
}

/// Parse a `/query` response body.
///
/// Accepts `{"result": {"output", "links", "sources"}}` and the flat
/// `{"output", "links", "sources"}`. `sources` entries may be plain paths
/// or `{path, content}` objects. Returns `None` for any other shape.
pub fn parse_query_response(
    body: &Value,
    query: &str,
    normalizer: &PathNormalizer,
) -> Option<EvidenceSet> {
    let inner = match body.get("result") {
        Some(result) if result.get("output").is_some() => result,
        _ if body.get("output").is_some() => body,
        _ => return None,
    };

    let output = match &inner["output"] {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    let mut items: Vec<Evidence> = Vec::new();
    let mut push = |raw: &str, content: Option<&str>| {
        let path = normalizer.normalize(raw);
        if path.is_empty() || items.iter().any(|e| e.path == path) {
            return;
        }
        items.push(Evidence {
            path,
            content: content.unwrap_or(&output).to_string(),
        });
    };

    for link in inner["links"].as_array().into_iter().flatten() {
        if let Some(raw) = link.as_str() {
            push(raw, None);
        }
    }
    for source in inner["sources"].as_array().into_iter().flatten() {
        match source {
            Value::String(raw) => push(raw, None),
            Value::Object(obj) => {
                let raw = ["path", "source", "link"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str));
                let content = ["content", "text"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str));
                if let Some(raw) = raw {
                    push(raw, content);
                }
            }
            _ => {}
        }
    }

    Some(EvidenceSet {
        query: query.to_string(),
        output,
        items,
    })
}

/// A cached document revision.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDocument {
    pub revision: u64,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

/// Latest known content per document id. Only the newest revision is kept.
#[derive(Debug, Default)]
pub struct DocumentCache {
    documents: HashMap<String, CachedDocument>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` for `id`. A change in content bumps the revision and
    /// replaces the old one. Returns the revision now cached.
    pub fn record(&mut self, id: &str, content: &str) -> u64 {
        match self.documents.get_mut(id) {
            Some(doc) if doc.content == content => {
                doc.fetched_at = Utc::now();
                doc.revision
            }
            Some(doc) => {
                doc.revision += 1;
                doc.content = content.to_string();
                doc.fetched_at = Utc::now();
                doc.revision
            }
            None => {
                self.documents.insert(
                    id.to_string(),
                    CachedDocument {
                        revision: 1,
                        content: content.to_string(),
                        fetched_at: Utc::now(),
                    },
                );
                1
            }
        }
    }

    /// Store an explicitly versioned document; older revisions are ignored.
    pub fn insert_revision(&mut self, id: &str, revision: u64, content: &str) -> bool {
        if self
            .documents
            .get(id)
            .is_some_and(|doc| doc.revision >= revision)
        {
            return false;
        }
        self.documents.insert(
            id.to_string(),
            CachedDocument {
                revision,
                content: content.to_string(),
                fetched_at: Utc::now(),
            },
        );
        true
    }

    pub fn get(&self, id: &str) -> Option<&CachedDocument> {
        self.documents.get(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_storage_paths() {
        let n = PathNormalizer::default();
        assert_eq!(
            n.normalize("file:///srv/index/md_db/policies/pet-policy.md"),
            "handbook.hypha.coop/policies/pet-policy"
        );
        assert_eq!(
            n.normalize("C:\\data\\md_db\\guides\\\\onboarding.PDF"),
            "handbook.hypha.coop/guides/onboarding"
        );
    }

    #[test]
    fn leaves_public_paths_alone() {
        let n = PathNormalizer::default();
        assert_eq!(n.normalize("handbook.hypha.coop/pet-policy"), "handbook.hypha.coop/pet-policy");
        assert_eq!(n.normalize(" handbook.hypha.coop/pet-policy/ "), "handbook.hypha.coop/pet-policy");
        let once = n.normalize("file:///x/md_db/a/b.txt");
        assert_eq!(n.normalize(&once), once);
    }

    #[test]
    fn custom_marker_and_prefix() {
        let n = PathNormalizer::new("docs/", "wiki.example.org/");
        assert_eq!(n.normalize("/var/docs/team/rota.md"), "wiki.example.org/team/rota");
    }

    #[test]
    fn parses_nested_response() {
        let body = json!({
            "result": {
                "output": "Pets are welcome in the office.",
                "links": ["file:///db/md_db/pet-policy.md", "file:///db/md_db/pet-policy.md"]
            }
        });
        let set = parse_query_response(&body, "pets", &PathNormalizer::default()).unwrap();
        assert_eq!(set.paths(), vec!["handbook.hypha.coop/pet-policy"]);
        assert_eq!(set.items[0].content, "Pets are welcome in the office.");
        assert_eq!(set.resolve(1), Some("handbook.hypha.coop/pet-policy"));
        assert_eq!(set.resolve(0), None);
        assert_eq!(set.resolve(2), None);
    }

    #[test]
    fn parses_flat_response_with_source_objects() {
        let body = json!({
            "output": "See the guides.",
            "sources": [
                {"path": "md_db/guides/a.md", "content": "A text"},
                "md_db/guides/b.md"
            ]
        });
        let set = parse_query_response(&body, "guides", &PathNormalizer::default()).unwrap();
        assert_eq!(
            set.paths(),
            vec!["handbook.hypha.coop/guides/a", "handbook.hypha.coop/guides/b"]
        );
        assert_eq!(set.items[0].content, "A text");
        assert_eq!(set.items[1].content, "See the guides.");
    }

    #[test]
    fn empty_and_unknown_shapes() {
        let n = PathNormalizer::default();
        let empty = parse_query_response(&json!({"result": {"output": "nothing"}}), "q", &n).unwrap();
        assert!(empty.is_empty());
        assert!(empty.to_tool_text().contains("No document sources"));

        assert!(parse_query_response(&json!({"answer": 1}), "q", &n).is_none());
    }

    #[test]
    fn tool_text_numbers_sources() {
        let set = EvidenceSet {
            query: "q".into(),
            output: "body".into(),
            items: vec![
                Evidence { path: "handbook.hypha.coop/a".into(), content: String::new() },
                Evidence { path: "handbook.hypha.coop/b".into(), content: String::new() },
            ],
        };
        let text = set.to_tool_text();
        assert!(text.contains("- [1] \"handbook.hypha.coop/a\""));
        assert!(text.contains("- [2] \"handbook.hypha.coop/b\""));
        assert!(text.ends_with("body"));
    }

    #[test]
    fn cache_keeps_latest_revision() {
        let mut cache = DocumentCache::new();
        assert_eq!(cache.record("doc", "v1"), 1);
        assert_eq!(cache.record("doc", "v1"), 1);
        assert_eq!(cache.record("doc", "v2"), 2);
        assert_eq!(cache.get("doc").unwrap().content, "v2");

        assert!(!cache.insert_revision("doc", 1, "old"));
        assert!(cache.insert_revision("doc", 5, "v5"));
        assert_eq!(cache.get("doc").unwrap().revision, 5);
        assert_eq!(cache.len(), 1);
    }
}
