use crate::error::ParseError;
use crate::record::LogRecord;
use flate2::read::GzDecoder;
use log::debug;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Sentinel that opens the field-declaration header line
pub const FIELDS_SENTINEL: &str = "#fields";

/// Opens a log file as a byte stream, decompressing when needed
pub trait Decompressor {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>>;
}

/// Decompressor that selects gzip by the `.gz` filename suffix
///
/// Anything else is read as plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDecompressor;

impl Decompressor for FileDecompressor {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        let file = BufReader::new(File::open(path)?);
        let compressed = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        if compressed {
            Ok(Box::new(GzDecoder::new(file)))
        } else {
            Ok(Box::new(file))
        }
    }
}

/// Parses header-declared, tab-separated sensor logs into [`LogRecord`]s
///
/// A file starts with a `#separator` line and a `#fields` line naming the
/// columns; every line not starting with `#` is a data line aligned to those
/// columns. The whole file is read eagerly.
pub struct RecordParser<D: Decompressor = FileDecompressor> {
    decompressor: D,
}

impl Default for RecordParser<FileDecompressor> {
    fn default() -> Self {
        Self::new(FileDecompressor)
    }
}

impl<D: Decompressor> RecordParser<D> {
    pub fn new(decompressor: D) -> Self {
        Self { decompressor }
    }

    /// Parse every data line of `path`
    ///
    /// # Errors
    ///
    /// Returns `ParseError::ReadError` if the file cannot be opened or
    /// decompressed, and `ParseError::MissingHeader` if no `#fields` line
    /// exists.
    pub fn parse(&self, path: &Path) -> Result<Vec<LogRecord>, ParseError> {
        let read_error = |source: io::Error| ParseError::ReadError {
            path: path.to_path_buf(),
            source,
        };

        let mut raw = Vec::new();
        self.decompressor
            .open(path)
            .and_then(|mut reader| reader.read_to_end(&mut raw))
            .map_err(read_error)?;

        let text = String::from_utf8_lossy(&raw);
        let lines: Vec<&str> = text.lines().collect();
        debug!("Read {} lines from file {}", lines.len(), path.display());

        let header = Self::parse_header(&lines)
            .ok_or_else(|| ParseError::MissingHeader(path.to_path_buf()))?;
        debug!("Found header with {} items", header.len());

        let records: Vec<LogRecord> = lines
            .iter()
            .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
            .map(|line| {
                let values: Vec<&str> = line.split('\t').collect();
                LogRecord::from_values(&header, &values, path)
            })
            .collect();

        debug!(
            "Done reading logfile {}: {} records",
            path.display(),
            records.len()
        );
        Ok(records)
    }

    /// Field names from the first `#fields` line, sentinel excluded
    fn parse_header(lines: &[&str]) -> Option<Vec<String>> {
        lines
            .iter()
            .find(|line| line.starts_with(FIELDS_SENTINEL))
            .map(|line| line.split('\t').skip(1).map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    const HEADER: &str = "#separator \\x09\n#fields\tts\tid.orig_h\tid.orig_p\tid.resp_h\tid.resp_p\n";

    fn write_plain(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn write_gzip(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(contents.as_bytes()).unwrap();
        encoder.finish().unwrap();
        path
    }

    #[test]
    fn test_fields_align_with_header() {
        let dir = TempDir::new().unwrap();
        let contents = format!("{}1000\t10.0.0.1\t80\t192.168.1.1\t443\n", HEADER);
        let path = write_plain(&dir, "alert.1000-2000.log", &contents);

        let records = RecordParser::default().parse(&path).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.get("ts"), Some("1000"));
        assert_eq!(record.get("id.resp_h"), Some("192.168.1.1"));
        assert_eq!(record.get("id.resp_p"), Some("443"));
        assert_eq!(record.source_file(), path.as_path());
    }

    #[test]
    fn test_short_line_leaves_fields_absent() {
        let dir = TempDir::new().unwrap();
        let contents = format!("{}1000\t10.0.0.1\t80\n", HEADER);
        let path = write_plain(&dir, "alert.1000-2000.log", &contents);

        let records = RecordParser::default().parse(&path).unwrap();

        assert_eq!(records[0].get("id.orig_p"), Some("80"));
        assert_eq!(records[0].get("id.resp_h"), None);
        assert_eq!(records[0].get("id.resp_p"), None);
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let contents = format!(
            "{}#open\t2024-01-03-10-00-00\n1\ta\tb\tc\td\n\n2\te\tf\tg\th\n#close\t2024-01-03-11-00-00\n",
            HEADER
        );
        let path = write_plain(&dir, "notice.1-2.log", &contents);

        let records = RecordParser::default().parse(&path).unwrap();

        let timestamps: Vec<_> = records.iter().map(|r| r.get("ts").unwrap()).collect();
        assert_eq!(timestamps, vec!["1", "2"]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let dir = TempDir::new().unwrap();
        let contents = "#fields\tts\tmsg\r\n1\thello\r\n";
        let path = write_plain(&dir, "notice.1-2.log", contents);

        let records = RecordParser::default().parse(&path).unwrap();
        assert_eq!(records[0].get("msg"), Some("hello"));
    }

    #[test]
    fn test_missing_header() {
        let dir = TempDir::new().unwrap();
        let path = write_plain(&dir, "alert.1-2.log", "#separator \\x09\n1\t2\t3\n");

        let result = RecordParser::default().parse(&path);
        assert!(matches!(result, Err(ParseError::MissingHeader(p)) if p == path));
    }

    #[test]
    fn test_gzip_is_decompressed_transparently() {
        let dir = TempDir::new().unwrap();
        let contents = format!("{}1000\t10.0.0.1\t80\t203.0.113.5\t443\n", HEADER);
        let path = write_gzip(&dir, "alert.1000-2000.log.gz", &contents);

        let records = RecordParser::default().parse(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("id.resp_h"), Some("203.0.113.5"));
    }

    #[test]
    fn test_corrupt_gzip_is_read_error() {
        let dir = TempDir::new().unwrap();
        let path = write_plain(&dir, "alert.1-2.log.gz", "definitely not gzip");

        let result = RecordParser::default().parse(&path);
        assert!(matches!(result, Err(ParseError::ReadError { .. })));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = RecordParser::default().parse(Path::new("/nonexistent/alert.1-2.log"));
        assert!(matches!(result, Err(ParseError::ReadError { .. })));
    }

    /// Serves fixed contents regardless of path
    struct StaticDecompressor(&'static str);

    impl Decompressor for StaticDecompressor {
        fn open(&self, _path: &Path) -> io::Result<Box<dyn Read>> {
            Ok(Box::new(io::Cursor::new(self.0.as_bytes())))
        }
    }

    #[test]
    fn test_injected_decompressor() {
        let parser = RecordParser::new(StaticDecompressor("#fields\tnote\tmsg\nScan\tport sweep\n"));

        let records = parser.parse(Path::new("notice.5-6.log")).unwrap();
        assert_eq!(records[0].get("note"), Some("Scan"));
        assert_eq!(records[0].get("msg"), Some("port sweep"));
    }
}
