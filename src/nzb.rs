//! NZB descriptor rendering and storage
//!
//! The pipeline hands a fully loaded binary to a [`DescriptorWriter`] and
//! links the returned [`NzbId`] to the release it publishes. [`NzbStore`] is
//! the default writer: it renders an NZB 1.1 document, gzips it and stores it
//! in the `nzbs` table together with the SHA-256 digest of the XML.

use crate::Result;
use crate::db::{BinaryContents, Category, Database};
use crate::types::{NzbId, from_micros};
use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use quick_xml::escape::escape;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::sync::Arc;

/// Serializes a binary into a stored download descriptor
///
/// A failure leaves the binary in place; the pipeline retries it on a later
/// cycle.
#[async_trait]
pub trait DescriptorWriter: Send + Sync {
    /// Build and persist the descriptor, returning its handle
    async fn write(
        &self,
        search_name: &str,
        category: &Category,
        binary: &BinaryContents,
    ) -> Result<NzbId>;
}

/// Default writer storing NZB XML in the database
pub struct NzbStore {
    db: Arc<Database>,
}

impl NzbStore {
    /// Create a store writing to `db`
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DescriptorWriter for NzbStore {
    async fn write(
        &self,
        search_name: &str,
        category: &Category,
        binary: &BinaryContents,
    ) -> Result<NzbId> {
        let xml = render_nzb(search_name, category, binary);

        let mut hasher = Sha256::new();
        hasher.update(xml.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        let data = compress_nzb(&xml)?;
        let id = self.db.insert_nzb(&data, &digest).await?;
        tracing::debug!(
            nzb_id = id.get(),
            binary_id = binary.binary.id.get(),
            bytes = xml.len(),
            compressed = data.len(),
            "Stored NZB"
        );
        Ok(id)
    }
}

/// Gzip an NZB document for storage
pub fn compress_nzb(xml: &str) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Inflate a stored NZB blob back into XML
pub fn decompress_nzb(data: &[u8]) -> Result<String> {
    let mut xml = String::new();
    GzDecoder::new(data).read_to_string(&mut xml)?;
    Ok(xml)
}

/// Render an NZB 1.1 document for a binary
///
/// One `<file>` per part, one `<segment>` per present segment. The file date
/// is the part's posting time in unix seconds; the group list comes from the
/// binary's Xref header.
pub fn render_nzb(search_name: &str, category: &Category, binary: &BinaryContents) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE nzb PUBLIC \"-//newzBin//DTD NZB 1.1//EN\" \"http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd\">\n\
         <nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\">\n",
    );

    // Writing into a String cannot fail
    let _ = writeln!(
        xml,
        "<head><meta type=\"category\">{}</meta><meta type=\"name\">{}</meta></head>",
        escape(&category.name),
        escape(search_name)
    );

    let groups = binary.binary.groups();
    let poster = escape(&binary.binary.posted_by);

    for entry in &binary.parts {
        let part = &entry.part;
        let subject = format!("{} (1/{})", part.subject, part.total_segments);
        let _ = writeln!(
            xml,
            "<file poster=\"{}\" date=\"{}\" subject=\"{}\">",
            poster,
            from_micros(part.posted).timestamp(),
            escape(&subject)
        );

        xml.push_str("<groups>");
        for group in &groups {
            let _ = write!(xml, "<group>{}</group>", escape(group));
        }
        xml.push_str("</groups>\n<segments>\n");

        for segment in &entry.segments {
            let _ = writeln!(
                xml,
                "<segment bytes=\"{}\" number=\"{}\">{}</segment>",
                segment.size,
                segment.segment,
                escape(segment.message_id.trim_matches(|c| c == '<' || c == '>'))
            );
        }
        xml.push_str("</segments>\n</file>\n");
    }

    xml.push_str("</nzb>\n");
    xml
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Binary, Part, PartContents, Segment};
    use crate::types::BinaryId;
    use tempfile::NamedTempFile;

    fn contents() -> BinaryContents {
        let binary = Binary {
            id: BinaryId(7),
            name: "Some.Release-GRP".to_string(),
            group_name: "alt.binaries.test".to_string(),
            posted_by: "Poster <poster@example.com>".to_string(),
            posted: 1_600_000_000_000_000,
            total_parts: 1,
            regex_id: None,
            xref: Some("news alt.binaries.test:1 alt.binaries.misc:2".to_string()),
            created_at: 0,
        };
        let part = Part {
            id: 1,
            binary_id: BinaryId(7),
            message_id: "<p1@example>".to_string(),
            subject: "Some.Release-GRP \"a&b.rar\"".to_string(),
            total_segments: 2,
            posted: 1_600_000_000_000_000,
        };
        let segments = (1..=2)
            .map(|n| Segment {
                id: n,
                part_id: 1,
                segment: n as i32,
                size: 1000 * n,
                message_id: format!("<seg{n}@example>"),
            })
            .collect();
        BinaryContents {
            binary,
            parts: vec![PartContents { part, segments }],
        }
    }

    fn category() -> Category {
        Category {
            id: 8010,
            parent_id: Some(8000),
            name: "Other".to_string(),
        }
    }

    #[test]
    fn test_render_escapes_and_lists_segments() {
        let xml = render_nzb("Some Release GRP", &category(), &contents());

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<meta type=\"category\">Other</meta>"));
        assert!(xml.contains("<meta type=\"name\">Some Release GRP</meta>"));
        assert!(xml.contains("poster=\"Poster &lt;poster@example.com&gt;\""));
        assert!(xml.contains("date=\"1600000000\""));
        assert!(xml.contains("subject=\"Some.Release-GRP &quot;a&amp;b.rar&quot; (1/2)\""));
        assert!(xml.contains("<group>alt.binaries.test</group><group>alt.binaries.misc</group>"));
        assert!(xml.contains("<segment bytes=\"1000\" number=\"1\">seg1@example</segment>"));
        assert!(xml.contains("<segment bytes=\"2000\" number=\"2\">seg2@example</segment>"));
        assert!(xml.trim_end().ends_with("</nzb>"));
    }

    #[test]
    fn test_decompress_rejects_plain_xml() {
        assert!(matches!(decompress_nzb(b"<nzb/>"), Err(crate::Error::Io(_))));
    }

    #[tokio::test]
    async fn test_store_persists_digest() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(temp_file.path()).await.unwrap());
        let store = NzbStore::new(db.clone());

        let id = store.write("Some Release GRP", &category(), &contents()).await.unwrap();
        let stored = db.get_nzb(id).await.unwrap().unwrap();

        let expected = render_nzb("Some Release GRP", &category(), &contents());
        assert_ne!(stored.data, expected.as_bytes());
        // gzip magic
        assert_eq!(&stored.data[..2], &[0x1f, 0x8b]);
        assert_eq!(decompress_nzb(&stored.data).unwrap(), expected);
        assert_eq!(stored.sha256.len(), 64);

        let mut hasher = Sha256::new();
        hasher.update(expected.as_bytes());
        assert_eq!(stored.sha256, format!("{:x}", hasher.finalize()));
    }
}
