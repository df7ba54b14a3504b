//! Line-oriented import/export format.
//!
//! One identifier per line, optionally followed by `:` and a description.
//! Lines starting with `#` and blank lines are ignored on import and never
//! produced on export.
//!
//! ```text
//! # team ids
//! 200001:Billing service
//! 200002
//! ```

use super::error::{StoreError, StoreResult};
use super::{AllowlistRecord, check_id};

/// One parsed import line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkEntry {
    /// 1-based line number in the source text.
    pub line: usize,
    pub id: String,
    pub description: Option<String>,
}

/// Parse bulk text.
///
/// The description is everything after the first `:`. Fails on the first
/// line whose identifier is empty or unusable.
pub fn parse(text: &str) -> StoreResult<Vec<BulkEntry>> {
    let mut entries = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (id, description) = match line.split_once(':') {
            Some((id, desc)) => {
                let desc = desc.trim();
                (id.trim(), (!desc.is_empty()).then(|| desc.to_string()))
            }
            None => (line, None),
        };

        if let Err(reason) = check_id(id) {
            return Err(StoreError::MalformedBulkLine {
                line: idx + 1,
                content: line.to_string(),
                reason: reason.to_string(),
            });
        }

        entries.push(BulkEntry {
            line: idx + 1,
            id: id.to_string(),
            description,
        });
    }

    Ok(entries)
}

/// Render records in the line format, one per line.
pub fn format(records: &[AllowlistRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.id);
        if let Some(desc) = &record.description {
            out.push(':');
            // a newline would split the entry
            out.push_str(&desc.replace(['\r', '\n'], " "));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let text = "# header\n\n200001:Billing\n   \n200002\n# trailing\n";
        let entries = parse(text).unwrap();
        assert_eq!(
            entries,
            vec![
                BulkEntry {
                    line: 3,
                    id: "200001".to_string(),
                    description: Some("Billing".to_string()),
                },
                BulkEntry {
                    line: 5,
                    id: "200002".to_string(),
                    description: None,
                },
            ]
        );
    }

    #[test]
    fn test_parse_splits_on_first_colon() {
        let entries = parse("300:Ratio 1:2 dashboard").unwrap();
        assert_eq!(entries[0].id, "300");
        assert_eq!(entries[0].description.as_deref(), Some("Ratio 1:2 dashboard"));
    }

    #[test]
    fn test_parse_trims_and_drops_empty_description() {
        let entries = parse("  400 :   \n").unwrap();
        assert_eq!(entries[0].id, "400");
        assert_eq!(entries[0].description, None);
    }

    #[test]
    fn test_parse_empty_id_is_malformed() {
        let err = parse("100\n:no id here\n").unwrap_err();
        match err {
            StoreError::MalformedBulkLine { line, content, .. } => {
                assert_eq!(line, 2);
                assert_eq!(content, ":no id here");
            }
            other => panic!("expected MalformedBulkLine, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_id_with_space_is_malformed() {
        assert!(matches!(
            parse("two words:desc"),
            Err(StoreError::MalformedBulkLine { line: 1, .. })
        ));
    }

    #[test]
    fn test_format() {
        let records = vec![
            AllowlistRecord::new("1", Some("One".to_string())),
            AllowlistRecord::new("2", None),
            AllowlistRecord::new("3", Some("multi\nline".to_string())),
        ];
        assert_eq!(format(&records), "1:One\n2\n3:multi line\n");
    }

    #[test]
    fn test_format_output_parses_back() {
        let records = vec![
            AllowlistRecord::new("alpha", Some("Has: colon".to_string())),
            AllowlistRecord::new("beta", None),
        ];
        let entries = parse(&format(&records)).unwrap();
        let back: Vec<_> = entries
            .into_iter()
            .map(|e| AllowlistRecord::new(e.id, e.description))
            .collect();
        assert_eq!(back, records);
    }
}
