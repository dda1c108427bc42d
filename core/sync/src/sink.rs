//! Destinations for discovered (owner, link) pairs.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use drivemigrate_common::{Error, Result};

/// Header row of the owner CSV file.
pub const CSV_HEADER: [&str; 2] = ["Email", "Link"];

/// Receives each owner/link pair as soon as it is discovered.
///
/// Long enumerations can take hours; recording pairs as they appear means
/// an interrupted run still leaves usable output behind.
pub trait OwnerSink: Send {
    /// Record that `email` owns the item at `link`.
    fn record(&mut self, email: &str, link: &str) -> Result<()>;
}

impl OwnerSink for Vec<(String, String)> {
    fn record(&mut self, email: &str, link: &str) -> Result<()> {
        self.push((email.to_string(), link.to_string()));
        Ok(())
    }
}

/// Appends `Email,Link` rows to a CSV file.
///
/// The header is written only when the file is empty, so several runs can
/// append to the same file. Every row is flushed before `record` returns.
pub struct CsvOwnerSink {
    path: PathBuf,
    file: File,
}

impl CsvOwnerSink {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        if file.metadata()?.len() == 0 {
            write_record(&mut file, &CSV_HEADER)?;
        }

        Ok(Self { path, file })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OwnerSink for CsvOwnerSink {
    fn record(&mut self, email: &str, link: &str) -> Result<()> {
        write_record(&mut self.file, &[email, link])
    }
}

fn write_record(out: &mut impl Write, fields: &[&str]) -> Result<()> {
    let line = fields
        .iter()
        .map(|f| escape_field(f))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split one CSV line into fields, honouring double-quoted fields.
///
/// # Errors
/// - An opening quote is never closed
pub fn parse_record(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match (quoted, c) {
            (true, '"') if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            (true, '"') => quoted = false,
            (false, '"') if field.is_empty() => quoted = true,
            (false, ',') => fields.push(std::mem::take(&mut field)),
            (_, c) => field.push(c),
        }
    }

    if quoted {
        return Err(Error::InvalidInput(format!("Unterminated quote in: {}", line)));
    }
    fields.push(field);
    Ok(fields)
}

/// Read the rows of an owner CSV file as `(email, link)` pairs.
///
/// Columns are located by header name; the link column is optional.
pub fn read_owner_rows(path: impl AsRef<Path>) -> Result<Vec<(String, String)>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(line) => parse_record(line?.trim_end_matches('\r'))?,
        None => return Ok(Vec::new()),
    };
    let column = |name: &str| header.iter().position(|h| h.trim() == name);
    let email_col = column(CSV_HEADER[0]).ok_or_else(|| {
        Error::InvalidInput(format!("{} has no '{}' column", path.display(), CSV_HEADER[0]))
    })?;
    let link_col = column(CSV_HEADER[1]);

    let mut rows = Vec::new();
    for line in lines {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let fields = parse_record(line)?;
        let email = fields.get(email_col).cloned().unwrap_or_default();
        let link = link_col
            .and_then(|col| fields.get(col).cloned())
            .unwrap_or_default();
        rows.push((email, link));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_written_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("owners.csv");

        let mut sink = CsvOwnerSink::open(&path).unwrap();
        sink.record("a@example.com", "https://link/1").unwrap();
        drop(sink);

        let mut sink = CsvOwnerSink::open(&path).unwrap();
        sink.record("b@example.com", "https://link/2").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "Email,Link\na@example.com,https://link/1\nb@example.com,https://link/2\n"
        );
    }

    #[test]
    fn test_rows_visible_before_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("owners.csv");

        let mut sink = CsvOwnerSink::open(&path).unwrap();
        sink.record("a@example.com", "x").unwrap();

        let rows = read_owner_rows(&path).unwrap();
        assert_eq!(rows, vec![("a@example.com".to_string(), "x".to_string())]);
    }

    #[test]
    fn test_quoting_survives_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("owners.csv");

        let mut sink = CsvOwnerSink::open(&path).unwrap();
        sink.record("odd@example.com", "https://x/?a=1,b=\"2\"").unwrap();

        let rows = read_owner_rows(&path).unwrap();
        assert_eq!(rows[0].1, "https://x/?a=1,b=\"2\"");
    }

    #[test]
    fn test_parse_record() {
        assert_eq!(parse_record("a,b").unwrap(), vec!["a", "b"]);
        assert_eq!(parse_record("\"a,b\",c").unwrap(), vec!["a,b", "c"]);
        assert_eq!(parse_record("a,").unwrap(), vec!["a", ""]);
        assert!(parse_record("\"open").is_err());
    }

    #[test]
    fn test_missing_email_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("owners.csv");
        std::fs::write(&path, "Name,Link\nx,y\n").unwrap();

        assert!(matches!(
            read_owner_rows(&path).unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[test]
    fn test_vec_sink() {
        let mut sink: Vec<(String, String)> = Vec::new();
        sink.record("a@example.com", "l").unwrap();
        assert_eq!(sink.len(), 1);
    }
}
