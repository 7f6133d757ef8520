
use crate::db::*;
use chrono::{DateTime, Utc};

/// Insert a binary with `parts` parts of `segments` declared segments each,
/// storing `present` of those segments per part, every segment `size` bytes.
pub(super) async fn seed_binary(
    db: &Database,
    name: &str,
    group: &str,
    posted: DateTime<Utc>,
    parts: i32,
    segments: i32,
    present: i32,
    size: i64,
) -> crate::types::BinaryId {
    let binary_id = db
        .insert_binary(&NewBinary {
            name: name.to_string(),
            group_name: group.to_string(),
            posted_by: "poster@example.com".to_string(),
            posted,
            total_parts: parts,
            regex_id: None,
            xref: None,
        })
        .await
        .unwrap();

    for p in 1..=parts {
        let part_id = db
            .insert_part(
                binary_id,
                &NewPart {
                    message_id: format!("<{name}.{p}@example>"),
                    subject: format!("{name} \"file.part{p:02}.rar\" yEnc ({p}/{parts})"),
                    total_segments: segments,
                    posted,
                },
            )
            .await
            .unwrap();

        let segs: Vec<NewSegment> = (1..=present)
            .map(|s| NewSegment {
                segment: s,
                size,
                message_id: format!("<{name}.{p}.{s}@example>"),
            })
            .collect();
        db.insert_segments(part_id, &segs).await.unwrap();
    }

    binary_id
}
