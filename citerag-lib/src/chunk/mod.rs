//! Document chunking
//!
//! Documents are split into overlapping segments small enough to embed and
//! to fit several of them into a single generation context.
//!
//! # Chunk identity
//!
//! A chunk id is `{source}_{position}`, where `position` is the 0-based
//! ordinal of the chunk within its document. Re-ingesting the same document
//! therefore overwrites its chunks in the index instead of duplicating them.
//!
//! # Implementing a Chunker
//!
//! ```ignore
//! use citerag_lib::chunk::{Chunk, Chunker};
//!
//! struct MyChunker { /* ... */ }
//!
//! impl Chunker for MyChunker {
//!     fn chunk(&self, text: &str, source: &str, title: &str, section: Option<&str>) -> Vec<Chunk> {
//!         // Your chunking logic here
//!         todo!()
//!     }
//!
//!     fn name(&self) -> &str {
//!         "mine"
//!     }
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Section label stored when a document has no section.
pub const NO_SECTION: &str = "N/A";

/// A chunk of text with its metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// `{source}_{position}`
    pub id: String,
    /// The text content of this chunk, never empty
    pub content: String,
    /// Metadata about the source and position
    pub metadata: ChunkMetadata,
}

/// Metadata stored alongside every vector in the index.
///
/// Every field is optional on read: records written by other tools, or
/// returned by a remote index, may lack keys. Consumers fall back to defaults
/// rather than failing on a missing key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// Source document identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Human readable document title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Section within the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Position within the source document (0-indexed)
    #[serde(default, deserialize_with = "deserialize_count")]
    pub position: usize,
    /// Length of the chunk content in characters
    #[serde(default, deserialize_with = "deserialize_count")]
    pub chunk_size: usize,
    /// The chunk text, kept so retrieval results are self-contained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Arbitrary additional metadata
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Trait for document chunking strategies
pub trait Chunker: Send + Sync {
    /// Split `text` into ordered chunks belonging to `source`.
    ///
    /// Never returns an empty chunk; empty input yields no chunks.
    fn chunk(&self, text: &str, source: &str, title: &str, section: Option<&str>) -> Vec<Chunk>;

    /// Returns the name of this chunking strategy
    fn name(&self) -> &str;
}

/// Builds the chunk id for a position within a source.
#[must_use]
pub fn chunk_id(source: &str, position: usize) -> String {
    format!("{source}_{position}")
}

/// Assembles a chunk and its metadata from one piece of a document.
fn make_chunk(
    content: String,
    position: usize,
    source: &str,
    title: &str,
    section: Option<&str>,
) -> Chunk {
    let metadata = ChunkMetadata {
        source: Some(source.to_string()),
        title: Some(title.to_string()),
        section: Some(section.unwrap_or(NO_SECTION).to_string()),
        position,
        chunk_size: content.chars().count(),
        content: Some(content.clone()),
        extra: HashMap::new(),
    };

    Chunk {
        id: chunk_id(source, position),
        content,
        metadata,
    }
}

// Remote indexes store every number as a float, so `2` comes back as `2.0`.
fn deserialize_count<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(0),
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|n| n as usize)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid count: {n}"))),
        other => Err(serde::de::Error::custom(format!("invalid count: {other}"))),
    }
}

mod recursive;

pub use recursive::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_format() {
        assert_eq!(chunk_id("handbook.md", 3), "handbook.md_3");
    }

    #[test]
    fn test_make_chunk_metadata() {
        let chunk = make_chunk("héllo".to_string(), 2, "doc", "Doc", None);
        assert_eq!(chunk.id, "doc_2");
        assert_eq!(chunk.metadata.chunk_size, 5);
        assert_eq!(chunk.metadata.section.as_deref(), Some(NO_SECTION));
        assert_eq!(chunk.metadata.content.as_deref(), Some("héllo"));
    }

    #[test]
    fn test_metadata_accepts_float_counts() {
        let json = r#"{"source":"doc","title":"Doc","position":2.0,"chunk_size":120.0,"lang":"en"}"#;
        let metadata: ChunkMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.position, 2);
        assert_eq!(metadata.chunk_size, 120);
        assert_eq!(metadata.extra.get("lang"), Some(&serde_json::json!("en")));
    }

    #[test]
    fn test_metadata_missing_keys_default() {
        let metadata: ChunkMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(metadata, ChunkMetadata::default());
    }

    #[test]
    fn test_metadata_skips_absent_fields() {
        let metadata = ChunkMetadata {
            source: Some("doc".to_string()),
            ..ChunkMetadata::default()
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert!(json.get("title").is_none());
        assert_eq!(json["source"], "doc");
    }
}
