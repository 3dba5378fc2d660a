//! Numbered context blocks and the citations that refer back to them
//!
//! The generator is told to cite passages as `[1]`, `[2]`, … matching the
//! numbering of the context it was given. Citation `i` must therefore be
//! built from the same document that produced context block `i`.
//! [`build_context`] and [`format_citations`] rely on being called with the
//! same slice in the same order; [`CitedContext`] builds both from one
//! owned list so they cannot drift apart.

use serde::{Deserialize, Serialize};

use crate::rerank::RerankedDocument;

/// Title used when a document has none.
pub const UNKNOWN: &str = "Unknown";

/// A numbered reference from an answer to a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based, matches the context block number
    pub index: usize,
    pub source: String,
    pub title: String,
}

/// Render documents as numbered context blocks, `"[i] {title}:\n{content}\n"`.
///
/// Missing titles become `"Unknown"` and missing content an empty string.
#[must_use]
pub fn build_context(documents: &[RerankedDocument]) -> String {
    let mut context = String::new();
    for (i, doc) in documents.iter().enumerate() {
        let metadata = &doc.document.metadata;
        let title = metadata.title.as_deref().unwrap_or(UNKNOWN);
        let content = metadata.content.as_deref().unwrap_or("");
        context.push_str(&format!("[{}] {title}:\n{content}\n", i + 1));
    }
    context
}

/// Pair an answer with one citation per source, numbered by position.
///
/// `sources` must be the exact sequence given to [`build_context`].
#[must_use]
pub fn format_citations(answer: String, sources: &[RerankedDocument]) -> (String, Vec<Citation>) {
    let citations = sources
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let metadata = &doc.document.metadata;
            Citation {
                index: i + 1,
                source: metadata.source.clone().unwrap_or_else(|| UNKNOWN.to_string()),
                title: metadata.title.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            }
        })
        .collect();

    (answer, citations)
}

/// Documents frozen in citation order; context text and citations are both
/// derived from this one list.
#[derive(Debug, Clone)]
pub struct CitedContext {
    documents: Vec<RerankedDocument>,
}

impl CitedContext {
    #[must_use]
    pub fn new(documents: Vec<RerankedDocument>) -> Self {
        Self { documents }
    }

    /// Numbered context for the generator.
    #[must_use]
    pub fn text(&self) -> String {
        build_context(&self.documents)
    }

    /// Citations matching [`text`](Self::text).
    #[must_use]
    pub fn cite(&self, answer: String) -> (String, Vec<Citation>) {
        format_citations(answer, &self.documents)
    }

    #[must_use]
    pub fn documents(&self) -> &[RerankedDocument] {
        &self.documents
    }

    #[must_use]
    pub fn into_documents(self) -> Vec<RerankedDocument> {
        self.documents
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Distinct `[n]` markers in `answer`, in order of first appearance.
///
/// Callers can compare these against the citation list to spot markers the
/// model invented.
#[must_use]
pub fn cited_markers(answer: &str) -> Vec<usize> {
    let mut markers = Vec::new();
    let mut rest = answer;

    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find(']') else {
            break;
        };

        let inner = &rest[..close];
        if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = inner.parse::<usize>() {
                if !markers.contains(&n) {
                    markers.push(n);
                }
            }
            rest = &rest[close + 1..];
        }
    }

    markers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkMetadata;
    use crate::store::ScoredDocument;

    fn make_doc(source: &str, title: Option<&str>, content: Option<&str>) -> RerankedDocument {
        RerankedDocument::unscored(ScoredDocument {
            id: format!("{source}_0"),
            score: 0.5,
            metadata: ChunkMetadata {
                source: Some(source.to_string()),
                title: title.map(str::to_string),
                content: content.map(str::to_string),
                ..ChunkMetadata::default()
            },
        })
    }

    #[test]
    fn test_build_context_blocks() {
        let docs = vec![
            make_doc("a.md", Some("Refunds"), Some("Refunds take 5 days.")),
            make_doc("b.md", Some("Shipping"), Some("We ship worldwide.")),
        ];

        let context = build_context(&docs);

        assert_eq!(
            context,
            "[1] Refunds:\nRefunds take 5 days.\n[2] Shipping:\nWe ship worldwide.\n"
        );
    }

    #[test]
    fn test_build_context_block_count() {
        let docs: Vec<_> = (0..4)
            .map(|i| make_doc(&format!("s{i}"), Some(&format!("T{i}")), Some("body")))
            .collect();
        let context = build_context(&docs);

        for i in 1..=4 {
            assert!(context.contains(&format!("[{i}] T{}:\nbody\n", i - 1)));
        }
        assert_eq!(context.matches(":\nbody\n").count(), docs.len());
    }

    #[test]
    fn test_build_context_missing_metadata() {
        let context = build_context(&[make_doc("a.md", None, None)]);
        assert_eq!(context, "[1] Unknown:\n\n");
    }

    #[test]
    fn test_build_context_empty() {
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn test_format_citations_positions() {
        let docs = vec![
            make_doc("a.md", Some("Refunds"), None),
            make_doc("b.md", None, None),
        ];

        let (answer, citations) = format_citations("Five days [1].".to_string(), &docs);

        assert_eq!(answer, "Five days [1].");
        assert_eq!(
            citations,
            vec![
                Citation {
                    index: 1,
                    source: "a.md".to_string(),
                    title: "Refunds".to_string(),
                },
                Citation {
                    index: 2,
                    source: "b.md".to_string(),
                    title: "Unknown".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_cited_context_agrees() {
        let cited = CitedContext::new(vec![
            make_doc("x.md", Some("X"), Some("ex")),
            make_doc("y.md", Some("Y"), Some("why")),
        ]);

        let text = cited.text();
        let (_, citations) = cited.cite(String::new());

        for citation in &citations {
            assert!(text.contains(&format!("[{}] {}:", citation.index, citation.title)));
        }
        assert_eq!(cited.len(), 2);
    }

    #[test]
    fn test_cited_markers() {
        assert_eq!(cited_markers("A [2] and B [1][2], see [10]."), vec![2, 1, 10]);
        assert_eq!(cited_markers("no markers [a] [] [1"), Vec::<usize>::new());
        assert_eq!(cited_markers("nested [[3]]"), vec![3]);
    }
}
