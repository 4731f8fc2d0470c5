//! Reading procedure source files.

use std::path::Path;

use encoding_rs::WINDOWS_1252;

use crate::error::AnalyzerError;

/// Read a file as a string, trying UTF-8 first, then Windows-1252 as fallback
fn read_file_with_encoding_fallback(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(err) => {
            // Scripts exported from SSMS are frequently ANSI-encoded
            let bytes = err.into_bytes();
            let (decoded, _, had_errors) = WINDOWS_1252.decode(&bytes);
            if had_errors {
                Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "File contains invalid characters",
                ))
            } else {
                Ok(decoded.into_owned())
            }
        }
    }
}

/// Read a procedure source file, stripping a leading byte-order mark.
pub fn read_sql_file(path: &Path) -> Result<String, AnalyzerError> {
    let content =
        read_file_with_encoding_fallback(path).map_err(|source| AnalyzerError::InputReadError {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(match content.strip_prefix('\u{FEFF}') {
        Some(stripped) => stripped.to_string(),
        None => content,
    })
}
