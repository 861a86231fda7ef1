//! Generic delimited-text serializer
//!
//! One implementation covers all built-in variants; a variant is a column
//! layout plus a timestamp format strategy. Lines whose value fails the
//! sanity check contribute no point but do not abort the batch.

use crate::serializer::dates::TimestampFormat;
use crate::serializer::{Point, PointBatch, PointSerializer};
use chrono::{DateTime, Utc};
use histloader_common::{Error, Result};
use std::collections::HashMap;
use std::io::BufRead;

/// Column positions and separator of a CSV dialect
#[derive(Debug, Clone, Copy)]
pub struct ColumnLayout {
    pub separator: char,
    pub timestamp_column: usize,
    pub value_column: usize,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            separator: ';',
            timestamp_column: 0,
            value_column: 1,
        }
    }
}

/// Factory for the `epoch-millis` variant
pub fn epoch_millis() -> Box<dyn PointSerializer> {
    Box::new(CsvSerializer::new(
        "epoch-millis",
        ColumnLayout::default(),
        TimestampFormat::EpochMillis,
    ))
}

/// Factory for the `epoch-seconds` variant
pub fn epoch_seconds() -> Box<dyn PointSerializer> {
    Box::new(CsvSerializer::new(
        "epoch-seconds",
        ColumnLayout::default(),
        TimestampFormat::EpochSeconds,
    ))
}

/// Factory for the `iso` variant
pub fn iso8601() -> Box<dyn PointSerializer> {
    Box::new(CsvSerializer::new(
        "iso",
        ColumnLayout::default(),
        TimestampFormat::Iso8601,
    ))
}

/// Factory for the `month-name` variant
pub fn month_name() -> Box<dyn PointSerializer> {
    Box::new(CsvSerializer::new(
        "month-name",
        ColumnLayout::default(),
        TimestampFormat::MonthName,
    ))
}

struct Binding {
    reader: Box<dyn BufRead + Send>,
    metric: String,
    tags: HashMap<String, String>,
    file_name: String,
}

/// Chunked lazy CSV parser
pub struct CsvSerializer {
    selector: &'static str,
    layout: ColumnLayout,
    format: TimestampFormat,
    binding: Option<Binding>,
    initialized: bool,
    exhausted: bool,
    min_timestamp: Option<i64>,
    max_timestamp: Option<i64>,
    total_read: u64,
}

impl CsvSerializer {
    pub fn new(selector: &'static str, layout: ColumnLayout, format: TimestampFormat) -> Self {
        Self {
            selector,
            layout,
            format,
            binding: None,
            initialized: false,
            exhausted: false,
            min_timestamp: None,
            max_timestamp: None,
            total_read: 0,
        }
    }

    /// Extract the (timestamp, value) tokens of one data line
    fn split_tokens<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let mut columns = line.split(self.layout.separator);
        let last = self.layout.timestamp_column.max(self.layout.value_column);
        let mut timestamp_token = None;
        let mut value_token = None;
        for index in 0..=last {
            let column = columns.next()?;
            if index == self.layout.timestamp_column {
                timestamp_token = Some(column);
            }
            if index == self.layout.value_column {
                value_token = Some(column);
            }
        }
        Some((timestamp_token?, value_token?))
    }

    /// Parse one data line into (epoch millis, value); None if either
    /// token is unusable
    fn parse_line(&self, line: &str) -> Option<(i64, f64)> {
        let (timestamp_token, value_token) = self.split_tokens(line)?;
        let timestamp = self.format.parse(timestamp_token)?;
        let value = value_token.trim().parse::<f64>().ok()?;
        if !value.is_finite() {
            return None;
        }
        Some((timestamp, value))
    }

    fn record_timestamp(&mut self, timestamp: i64) {
        self.min_timestamp = Some(self.min_timestamp.map_or(timestamp, |m| m.min(timestamp)));
        self.max_timestamp = Some(self.max_timestamp.map_or(timestamp, |m| m.max(timestamp)));
    }
}

impl PointSerializer for CsvSerializer {
    fn selector(&self) -> &'static str {
        self.selector
    }

    fn init(
        &mut self,
        mut reader: Box<dyn BufRead + Send>,
        file_name: &str,
        metric: &str,
        tags: &HashMap<String, String>,
    ) -> Result<()> {
        if self.initialized {
            return Err(Error::Internal(format!(
                "serializer '{}' initialized twice",
                self.selector
            )));
        }

        // consume and discard the header line
        let mut header = String::new();
        reader.read_line(&mut header)?;

        self.binding = Some(Binding {
            reader,
            metric: metric.to_string(),
            tags: tags.clone(),
            file_name: file_name.to_string(),
        });
        self.initialized = true;
        Ok(())
    }

    fn test(&self, sample_line: &str) -> bool {
        // detection is stricter than parsing: overlapping formats (the two
        // epoch variants) are discriminated by TimestampFormat::matches
        let Some((timestamp_token, value_token)) = self.split_tokens(sample_line) else {
            return false;
        };
        self.format.matches(timestamp_token)
            && value_token
                .trim()
                .parse::<f64>()
                .map(|v| v.is_finite())
                .unwrap_or(false)
    }

    fn next(&mut self, max_points: usize) -> Result<Option<PointBatch>> {
        if self.exhausted {
            return Ok(None);
        }
        let Some(mut binding) = self.binding.take() else {
            return Err(Error::Internal(format!(
                "serializer '{}' used before init",
                self.selector
            )));
        };

        let mut batch = PointBatch::new();
        let mut lines_read = 0usize;
        let mut line = String::new();
        while lines_read < max_points {
            line.clear();
            let read = match binding.reader.read_line(&mut line) {
                Ok(read) => read,
                Err(e) => {
                    self.binding = Some(binding);
                    return Err(e.into());
                }
            };
            if read == 0 {
                break;
            }
            lines_read += 1;

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                continue;
            }
            match self.parse_line(trimmed) {
                Some((timestamp, value)) => {
                    self.record_timestamp(timestamp);
                    batch.push(Point {
                        metric: binding.metric.clone(),
                        timestamp,
                        value,
                        tags: binding.tags.clone(),
                    });
                }
                None => {
                    tracing::debug!(
                        file = %binding.file_name,
                        line = trimmed,
                        "skipping unparsable line"
                    );
                }
            }
        }
        self.binding = Some(binding);

        if lines_read < max_points || batch.is_empty() {
            self.exhausted = true;
        }
        self.total_read += batch.len() as u64;

        if lines_read == 0 {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }

    fn has_next(&self) -> bool {
        self.initialized && !self.exhausted
    }

    fn clone_unbound(&self) -> Box<dyn PointSerializer> {
        Box::new(CsvSerializer::new(self.selector, self.layout, self.format))
    }

    fn dates(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let min = DateTime::from_timestamp_millis(self.min_timestamp?)?;
        let max = DateTime::from_timestamp_millis(self.max_timestamp?)?;
        Some((min, max))
    }

    fn total_points_read(&self) -> u64 {
        self.total_read
    }

    fn close(&mut self) {
        self.binding = None;
        self.exhausted = true;
    }
}
