use anyhow::Result;

use crate::record::Record;

/// Format one chunk of records into a self-contained fragment of a JSON
/// array.
///
/// Pure with respect to the sink: the fragment carries its own separators,
/// so concatenating fragments in sequence order yields a valid array body.
/// The fragment for sequence 0 opens the array; every record after the
/// global first is preceded by `",\n"`, which puts each record on its own
/// line with the separator at the end of the previous line.
pub fn format_chunk(seq: u64, records: &[Record]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(records.len() * 96 + 2);

    if seq == 0 {
        buf.extend_from_slice(b"[\n");
    }

    for (i, record) in records.iter().enumerate() {
        if i > 0 || seq > 0 {
            buf.extend_from_slice(b",\n");
        }

        serde_json::to_writer(&mut buf, record)?;
    }

    Ok(buf)
}

/// The closing fragment of the array, submitted with the last sequence
/// number. `empty` means no record fragment preceded it, so the opening
/// bracket still has to be produced here.
pub fn format_footer(empty: bool) -> Vec<u8> {
    if empty {
        b"[\n]\n".to_vec()
    } else {
        b"\n]\n".to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::gen_records;
    use funnel_core::tool::setup_log;

    #[test]
    fn test_first_fragment_opens_array() -> Result<()> {
        setup_log();

        let records = gen_records(2);
        let fragment = format_chunk(0, &records)?;
        let text = String::from_utf8(fragment).unwrap();

        assert!(text.starts_with("[\n{"));
        // One separator between the two records, none trailing.
        assert_eq!(text.matches(",\n").count(), 1);
        assert!(!text.ends_with(','));

        Ok(())
    }

    #[test]
    fn test_later_fragment_leads_with_separator() -> Result<()> {
        setup_log();

        let records = gen_records(1);
        let fragment = format_chunk(5, &records)?;
        let text = String::from_utf8(fragment).unwrap();

        assert!(text.starts_with(",\n{"));

        Ok(())
    }

    #[test]
    fn test_fragments_concatenate_to_valid_array() -> Result<()> {
        setup_log();

        let records = gen_records(5);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&format_chunk(0, &records[0..2])?);
        bytes.extend_from_slice(&format_chunk(1, &records[2..4])?);
        bytes.extend_from_slice(&format_chunk(2, &records[4..5])?);
        bytes.extend_from_slice(&format_footer(false));

        let parsed: Vec<Record> = serde_json::from_slice(&bytes)?;
        assert_eq!(parsed, records);

        Ok(())
    }

    #[test]
    fn test_empty_footer_is_valid_array() -> Result<()> {
        setup_log();

        let parsed: Vec<Record> = serde_json::from_slice(&format_footer(true))?;
        assert!(parsed.is_empty());

        Ok(())
    }
}
