use std::io::Read;

use flate2::read::GzDecoder;
use serde::Deserialize;

use super::OperationResult;
use crate::error::ApiError;

#[derive(Deserialize)]
struct RawResult {
    status_code: u16,
    operation_id: Option<String>,
    #[serde(default)]
    response: Option<String>,
}

/// Decode a batch result archive: a gzipped tarball of JSON arrays.
pub fn parse_archive(bytes: &[u8]) -> Result<Vec<OperationResult>, ApiError> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let entries = archive
        .entries()
        .map_err(|e| ApiError::Malformed(format!("Unreadable result archive: {e}")))?;

    let mut results = Vec::new();
    for entry in entries {
        let mut entry =
            entry.map_err(|e| ApiError::Malformed(format!("Corrupt archive entry: {e}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let mut contents = String::new();
        entry
            .read_to_string(&mut contents)
            .map_err(|e| ApiError::Malformed(format!("Unreadable archive entry: {e}")))?;
        if contents.trim().is_empty() {
            continue;
        }

        let raw: Vec<RawResult> = serde_json::from_str(&contents)
            .map_err(|e| ApiError::Malformed(format!("Invalid result document: {e}")))?;
        results.extend(raw.into_iter().filter_map(|r| {
            Some(OperationResult {
                operation_id: r.operation_id?,
                status_code: r.status_code,
                response: r.response,
            })
        }));
    }

    Ok(results)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    /// Build an archive shaped like the provider's, one file per document.
    pub(crate) fn archive(documents: &[&str]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (i, doc) in documents.iter().enumerate() {
            let mut header = tar::Header::new_gnu();
            header.set_size(doc.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("{i}.json"), doc.as_bytes())
                .unwrap();
        }
        let mut gz = builder.into_inner().unwrap();
        gz.flush().unwrap();
        gz.finish().unwrap()
    }

    #[test]
    fn collects_results_across_files() {
        let bytes = archive(&[
            r#"[{"status_code":200,"operation_id":"subscribe_a","response":"{}"}]"#,
            r#"[{"status_code":400,"operation_id":"subscribe_b","response":"{\"detail\":\"fake\"}"},
                {"status_code":200,"operation_id":null,"response":"{}"}]"#,
        ]);

        let results = parse_archive(&bytes).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].operation_id, "subscribe_a");
        assert!(results[0].is_success());
        assert_eq!(results[1].status_code, 400);
    }

    #[test]
    fn rejects_non_archive_bytes() {
        assert!(matches!(
            parse_archive(b"not a tarball"),
            Err(ApiError::Malformed(_))
        ));
    }
}
