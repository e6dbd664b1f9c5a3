//! Paper data model matching Semantic Scholar API schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::AuthorRef;

/// A research paper from Semantic Scholar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    /// Unique Semantic Scholar paper ID.
    ///
    /// Null for unresolved references, hence optional.
    #[serde(default)]
    pub paper_id: Option<String>,

    /// S2 corpus ID, the identifier space of the bulk citation dump.
    #[serde(default)]
    pub corpus_id: Option<u64>,

    /// Paper title.
    #[serde(default)]
    pub title: Option<String>,

    /// Publication year.
    #[serde(default)]
    pub year: Option<i32>,

    /// Publication venue (journal or conference).
    #[serde(default)]
    pub venue: Option<String>,

    /// List of authors.
    #[serde(default)]
    pub authors: Vec<AuthorRef>,

    /// Number of citations this paper has received.
    #[serde(default)]
    pub citation_count: Option<u64>,

    /// Influential citation count.
    #[serde(default)]
    pub influential_citation_count: Option<u64>,

    /// Number of references in this paper.
    #[serde(default)]
    pub reference_count: Option<u64>,

    /// External identifiers (DOI, ArXiv, PubMed, CorpusId, ...).
    ///
    /// Values are strings or integers depending on the id type.
    #[serde(default)]
    pub external_ids: Option<BTreeMap<String, serde_json::Value>>,
}

impl Paper {
    /// Corpus ID from the top-level field or from `externalIds.CorpusId`.
    #[must_use]
    pub fn corpus_id(&self) -> Option<u64> {
        self.corpus_id.or_else(|| {
            let value = self.external_ids.as_ref()?.get("CorpusId")?;
            value.as_u64().or_else(|| value.as_str()?.parse().ok())
        })
    }

    /// External ids flattened to strings, skipping nulls and empty values.
    #[must_use]
    pub fn external_id_strings(&self) -> BTreeMap<String, String> {
        self.external_ids
            .iter()
            .flatten()
            .filter_map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) if !s.is_empty() => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some((k.clone(), value))
            })
            .collect()
    }
}

/// Citation context with citing/cited paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationContext {
    /// The citing or cited paper.
    #[serde(alias = "citingPaper", alias = "citedPaper")]
    pub paper: Option<Paper>,
}

/// Citation list result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationResult {
    /// Offset for pagination.
    #[serde(default)]
    pub offset: u64,

    /// Next offset if more results available.
    #[serde(default)]
    pub next: Option<u64>,

    /// Citation data.
    #[serde(default)]
    pub data: Vec<CitationContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_deserialize_minimal() {
        let json = r#"{"paperId": "abc123"}"#;
        let paper: Paper = serde_json::from_str(json).unwrap();
        assert_eq!(paper.paper_id.as_deref(), Some("abc123"));
        assert!(paper.title.is_none());
        assert!(paper.authors.is_empty());
    }

    #[test]
    fn test_paper_deserialize_full() {
        let json = r#"{
            "paperId": "abc123",
            "title": "Test Paper",
            "year": 2024,
            "citationCount": 42,
            "authors": [{"authorId": "auth1", "name": "John Doe"}],
            "externalIds": {"DOI": "10.1234/test", "CorpusId": 99, "MAG": null}
        }"#;

        let paper: Paper = serde_json::from_str(json).unwrap();
        assert_eq!(paper.title.as_deref(), Some("Test Paper"));
        assert_eq!(paper.year, Some(2024));
        assert_eq!(paper.citation_count, Some(42));
        assert_eq!(paper.corpus_id(), Some(99));

        let ids = paper.external_id_strings();
        assert_eq!(ids.get("DOI").map(String::as_str), Some("10.1234/test"));
        assert_eq!(ids.get("CorpusId").map(String::as_str), Some("99"));
        assert!(!ids.contains_key("MAG"));
    }

    #[test]
    fn test_citation_result_aliases() {
        let json = r#"{
            "offset": 0,
            "next": 2,
            "data": [
                {"citingPaper": {"paperId": "p1", "corpusId": 1}},
                {"citedPaper": {"paperId": null, "title": "Unresolved"}}
            ]
        }"#;

        let result: CitationResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.next, Some(2));
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].paper.as_ref().and_then(|p| p.corpus_id), Some(1));
        assert!(result.data[1].paper.as_ref().unwrap().paper_id.is_none());
    }
}
