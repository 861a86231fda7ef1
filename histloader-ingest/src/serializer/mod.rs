//! Pluggable CSV → point serializers
//!
//! A serializer turns raw lines of one input file into a lazy, chunked
//! sequence of point batches. Variants differ by column layout and
//! timestamp format and are registered in a static table keyed by a
//! selector; when a session does not pin a selector, the variant is
//! auto-detected from the first data line.

pub mod csv;
pub mod dates;

use chrono::{DateTime, Utc};
use histloader_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Chain, Cursor, Read};
use std::path::Path;

pub use csv::{ColumnLayout, CsvSerializer};
pub use dates::TimestampFormat;

/// Bytes of lookahead when peeking the first data line during detection
const DETECT_LOOKAHEAD: u64 = 500;

/// One parsed sensor measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub metric: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub value: f64,
    pub tags: HashMap<String, String>,
}

/// Ordered batch of points produced by one `next()` call
pub type PointBatch = Vec<Point>;

/// Chunked, stateful file-to-points parser
///
/// `init` must be called exactly once before `next`; `test` must not
/// mutate state observable by a later `init`/`next`.
pub trait PointSerializer: Send {
    /// Registry selector key for this variant
    fn selector(&self) -> &'static str;

    /// Bind to an open line-oriented input; consumes and records the header
    fn init(
        &mut self,
        reader: Box<dyn BufRead + Send>,
        file_name: &str,
        metric: &str,
        tags: &HashMap<String, String>,
    ) -> Result<()>;

    /// Whether this variant can parse a representative data line
    fn test(&self, sample_line: &str) -> bool;

    /// Read up to `max_points` data lines and return the encoded batch,
    /// or None once input is exhausted
    fn next(&mut self, max_points: usize) -> Result<Option<PointBatch>>;

    /// False once a `next` call consumed fewer than `max_points` lines or
    /// returned an empty/absent batch
    fn has_next(&self) -> bool;

    /// A fresh, unbound instance of the same variant
    fn clone_unbound(&self) -> Box<dyn PointSerializer>;

    /// Cumulative minimum/maximum parsed timestamp across all calls
    fn dates(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)>;

    /// Running total of points read
    fn total_points_read(&self) -> u64;

    /// Release the underlying input; safe to call multiple times
    fn close(&mut self);
}

type SerializerFactory = fn() -> Box<dyn PointSerializer>;

/// Process-wide table of available serializer variants
///
/// Explicit registration instead of dynamic discovery; every task gets an
/// isolated instance via `clone_unbound`.
pub struct SerializerRegistry {
    entries: Vec<(&'static str, SerializerFactory)>,
}

impl SerializerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registry with the built-in CSV variants, in detection order
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("epoch-millis", csv::epoch_millis);
        registry.register("epoch-seconds", csv::epoch_seconds);
        registry.register("iso", csv::iso8601);
        registry.register("month-name", csv::month_name);
        registry
    }

    /// Register a variant; detection follows registration order
    pub fn register(&mut self, selector: &'static str, factory: SerializerFactory) {
        self.entries.push((selector, factory));
    }

    /// Registered selector keys, in registration order
    pub fn selectors(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(s, _)| *s).collect()
    }

    /// Instantiate the variant for a selector key
    pub fn create(&self, selector: &str) -> Result<Box<dyn PointSerializer>> {
        self.entries
            .iter()
            .find(|(s, _)| *s == selector)
            .map(|(_, factory)| factory())
            .ok_or_else(|| {
                Error::InvalidInput(format!("unknown serializer selector '{}'", selector))
            })
    }

    /// Open a file and return a serializer bound to it
    ///
    /// With a pinned selector the variant is used directly. Otherwise the
    /// header is read, the first data line is peeked with bounded
    /// lookahead, each registered variant is asked in order, and the first
    /// one answering true is initialized on a replay of the unconsumed
    /// input. A single registered variant skips detection entirely.
    pub fn bind(
        &self,
        pinned: Option<&str>,
        path: &Path,
        metric: &str,
        tags: &HashMap<String, String>,
    ) -> Result<Box<dyn PointSerializer>> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut serializer = match pinned {
            Some(selector) => self.create(selector)?,
            None if self.entries.len() == 1 => self.entries[0].1(),
            None => return self.detect_and_bind(reader, &file_name, metric, tags, path),
        };
        serializer.init(Box::new(reader), &file_name, metric, tags)?;
        Ok(serializer)
    }

    fn detect_and_bind(
        &self,
        mut reader: BufReader<File>,
        file_name: &str,
        metric: &str,
        tags: &HashMap<String, String>,
        path: &Path,
    ) -> Result<Box<dyn PointSerializer>> {
        if self.entries.is_empty() {
            return Err(Error::Config("no serializer variants registered".to_string()));
        }

        // consume the header, then peek the first data line; both raw
        // prefixes are replayed below so the chosen variant sees the
        // original stream
        let mut consumed = String::new();
        reader.read_line(&mut consumed)?;

        let mut sample = String::new();
        let mut limited = reader.take(DETECT_LOOKAHEAD);
        limited.read_line(&mut sample)?;
        let reader = limited.into_inner();
        consumed.push_str(&sample);

        let chosen = self
            .entries
            .iter()
            .map(|(_, factory)| factory())
            .find(|candidate| candidate.test(sample.trim_end_matches(['\r', '\n'])));

        // an empty file has no data line to test; fall back to the first
        // variant, which will surface the no-data condition on next()
        let mut serializer = match chosen {
            Some(serializer) => serializer,
            None if sample.is_empty() => self.entries[0].1(),
            None => {
                return Err(Error::InvalidInput(format!(
                    "no serializer variant recognizes the data in {}",
                    path.display()
                )))
            }
        };

        tracing::debug!(
            file = %path.display(),
            selector = serializer.selector(),
            "serializer variant detected"
        );

        let replay: ReplayReader = BufReader::new(Cursor::new(consumed.into_bytes()).chain(reader));
        serializer.init(Box::new(replay), file_name, metric, tags)?;
        Ok(serializer)
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

type ReplayReader = BufReader<Chain<Cursor<Vec<u8>>, BufReader<File>>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn create_unknown_selector_fails() {
        let registry = SerializerRegistry::with_defaults();
        assert!(registry.create("parquet").is_err());
        assert!(registry.create("iso").is_ok());
    }

    #[test]
    fn detection_picks_the_matching_variant() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "iso.csv",
            "timestamp;value\n2020-01-01T00:00:00Z;1.5\n2020-01-01T00:00:01Z;2.5\n",
        );
        let registry = SerializerRegistry::with_defaults();
        let mut serializer = registry.bind(None, &path, "temp", &HashMap::new()).unwrap();
        assert_eq!(serializer.selector(), "iso");

        // the replayed stream starts after the header
        let batch = serializer.next(10).unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].value, 1.5);
        assert_eq!(batch[0].timestamp, 1_577_836_800_000);
    }

    #[test]
    fn detection_prefers_registration_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "epoch.csv", "ts;v\n1577836800000;1.0\n");
        let registry = SerializerRegistry::with_defaults();
        let serializer = registry.bind(None, &path, "m", &HashMap::new()).unwrap();
        assert_eq!(serializer.selector(), "epoch-millis");
    }

    #[test]
    fn detection_rejects_unrecognized_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "junk.csv", "header\nthis is not csv data\n");
        let registry = SerializerRegistry::with_defaults();
        let result = registry.bind(None, &path, "m", &HashMap::new());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn header_only_file_binds_and_yields_no_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.csv", "timestamp;value\n");
        let registry = SerializerRegistry::with_defaults();
        let mut serializer = registry.bind(None, &path, "m", &HashMap::new()).unwrap();
        assert!(serializer.next(10).unwrap().is_none());
        assert_eq!(serializer.total_points_read(), 0);
    }

    #[test]
    fn pinned_selector_skips_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "pinned.csv", "ts;v\n1577836800;3.0\n");
        let registry = SerializerRegistry::with_defaults();
        let mut serializer = registry
            .bind(Some("epoch-seconds"), &path, "m", &HashMap::new())
            .unwrap();
        assert_eq!(serializer.selector(), "epoch-seconds");
        let batch = serializer.next(10).unwrap().unwrap();
        assert_eq!(batch[0].timestamp, 1_577_836_800_000);
    }
}
