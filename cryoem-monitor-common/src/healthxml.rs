//! Health Monitor XML export: data model and reader.
//!
//! The instrument writes a `HealthMonitor` document with three sections:
//!
//! ```text
//! HealthMonitor
//! ├── Enumerations / Enumeration[@Name] / Literal[@Name] = int
//! ├── Instruments / Instrument[@Name] / Component[@Name]* / Parameter[@ID @Name @Type @StorageUnit ...]
//! └── Values / ValueData[@ParameterID @Parameter]
//!     ├── ParameterValues / ParameterValue[@Timestamp] / Value[@Type] = text
//!     └── Limits / Limit[@Timestamp] / Threshold[@Name] / Value = number
//! ```
//!
//! Parsing is streaming (quick-xml) and skips anything it does not know, so
//! newer exports with extra elements or attributes still load. A document cut
//! off mid-write is reported as [`Error::MalformedSource`], never as a panic.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::trace;

use crate::error::{Error, Result};
use crate::schema::Limits;

/// Root element name.
const ROOT: &str = "HealthMonitor";

/// Parsed health monitor document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthDocument {
    /// The instrument described by the `Instruments` section.
    pub instrument: Option<InstrumentInfo>,
    /// `Instrument` attribute of the `Values` section.
    pub values_instrument: Option<String>,
    /// Enumerations keyed by name.
    pub enumerations: BTreeMap<String, Enumeration>,
    /// Parameter declarations in document order.
    pub parameters: Vec<ParameterDecl>,
    /// Value series in document order.
    pub values: Vec<ValueSeries>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentInfo {
    pub name: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enumeration {
    pub name: String,
    pub instrument: Option<String>,
    pub literals: Vec<Literal>,
}

impl Enumeration {
    /// Integer value of a literal, by literal name.
    pub fn literal_value(&self, name: &str) -> Option<i64> {
        self.literals
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub name: String,
    pub value: i64,
}

/// A `Parameter` declared under an instrument component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterDecl {
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    /// Declared data type, or the name of an enumeration.
    pub data_type: Option<String>,
    /// Unit values are stored in.
    pub storage_unit: Option<String>,
    pub display_unit: Option<String>,
    pub event_name: Option<String>,
    /// Component path, e.g. "Vacuum/Column".
    pub subsystem: String,
}

/// One `ValueData` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSeries {
    pub parameter_id: Option<String>,
    pub parameter: String,
    /// Samples in document order.
    pub samples: Vec<Sample>,
    /// Limits of the last `Limit` entry.
    pub limits: Limits,
}

impl ValueSeries {
    /// Whether this series belongs to the given XML parameter name or ID.
    pub fn matches(&self, source: &str) -> bool {
        self.parameter == source || self.parameter_id.as_deref() == Some(source)
    }

    /// The most recent sample.
    ///
    /// Samples are ordered by timestamp; samples without a parseable
    /// timestamp sort first, and ties go to the later one in the document.
    pub fn latest_sample(&self) -> Option<&Sample> {
        self.samples
            .iter()
            .enumerate()
            .max_by_key(|(index, sample)| (sample.timestamp_millis(), *index))
            .map(|(_, sample)| sample)
    }
}

/// One `ParameterValue`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    pub timestamp: Option<String>,
    /// `Type` attribute of the `Value` element.
    pub value_type: Option<String>,
    /// Raw text content of the `Value` element.
    pub raw: String,
}

impl Sample {
    /// Timestamp as Unix epoch milliseconds, if it parses.
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.timestamp.as_deref().and_then(parse_timestamp_millis)
    }
}

impl HealthDocument {
    /// Instrument name: `Instruments/Instrument@Name`, else `Values@Instrument`.
    pub fn instrument_name(&self) -> Option<&str> {
        self.instrument
            .as_ref()
            .map(|i| i.name.as_str())
            .filter(|n| !n.is_empty())
            .or(self.values_instrument.as_deref())
    }

    /// Value series for an XML parameter name or ID (last one wins).
    pub fn series_for(&self, source: &str) -> Option<&ValueSeries> {
        self.values.iter().rev().find(|s| s.matches(source))
    }

    /// Parameter declaration by ID, then by name.
    pub fn declaration(&self, id_or_name: &str) -> Option<&ParameterDecl> {
        self.parameters
            .iter()
            .find(|p| p.id == id_or_name)
            .or_else(|| self.parameters.iter().find(|p| p.name == id_or_name))
    }

    /// Declaration backing a value series.
    pub fn declaration_for(&self, series: &ValueSeries) -> Option<&ParameterDecl> {
        series
            .parameter_id
            .as_deref()
            .and_then(|id| self.parameters.iter().find(|p| p.id == id))
            .or_else(|| self.parameters.iter().find(|p| p.name == series.parameter))
    }
}

/// Parse an instrument timestamp into Unix epoch milliseconds.
///
/// Accepts RFC 3339 and offset-less ISO 8601 (taken as UTC).
pub fn parse_timestamp_millis(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Resolve the XML file to read.
///
/// A file path is used as-is. A directory resolves to the most recently
/// modified file in it matching `pattern`.
pub fn resolve_source(path: &Path, pattern: &str) -> Result<PathBuf> {
    let metadata = std::fs::metadata(path).map_err(|e| Error::unavailable(path, e))?;
    if !metadata.is_dir() {
        return Ok(path.to_path_buf());
    }

    let full_pattern = path.join(pattern);
    let full_pattern = full_pattern.to_string_lossy();
    let entries = glob::glob(&full_pattern)
        .map_err(|e| Error::Config(format!("Invalid file pattern '{}': {}", pattern, e)))?;

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|p| {
            let meta = std::fs::metadata(&p).ok()?;
            if !meta.is_file() {
                return None;
            }
            Some((meta.modified().ok(), p))
        })
        .max()
        .map(|(_, p)| p)
        .ok_or_else(|| {
            Error::unavailable(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no file matching '{}'", pattern),
                ),
            )
        })
}

/// Resolve, read and parse a health monitor document.
pub fn read_document(path: &Path, pattern: &str) -> Result<(PathBuf, HealthDocument)> {
    let resolved = resolve_source(path, pattern)?;
    let bytes = std::fs::read(&resolved).map_err(|e| Error::unavailable(&resolved, e))?;
    let document = parse_document(&resolved, &bytes)?;
    Ok((resolved, document))
}

/// Parse health monitor XML bytes. `path` is only used in error messages.
pub fn parse_document(path: &Path, bytes: &[u8]) -> Result<HealthDocument> {
    let text = decode_text(bytes).map_err(|reason| Error::malformed(path, reason))?;
    if text.trim().is_empty() {
        return Err(Error::malformed(path, "empty document"));
    }

    let mut parser = DocumentParser::default();
    let mut reader = Reader::from_str(&text);
    reader.trim_text(true);

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::malformed(
                path,
                format!("at byte {}: {}", reader.buffer_position(), e),
            )
        })?;

        let step = match event {
            Event::Start(e) => parser.open(&e),
            Event::Empty(e) => parser.open(&e).and_then(|_| parser.close()),
            Event::End(_) => parser.close(),
            Event::Text(t) => t
                .unescape()
                .map_err(|e| e.to_string())
                .map(|s| parser.text(&s)),
            Event::CData(c) => std::str::from_utf8(&c.into_inner())
                .map_err(|e| e.to_string())
                .map(|s| parser.text(s)),
            Event::Eof => break,
            _ => Ok(()),
        };
        step.map_err(|reason| Error::malformed(path, reason))?;
    }

    parser.finish().map_err(|reason| Error::malformed(path, reason))
}

/// Decode raw bytes, honouring UTF-8 and UTF-16 byte order marks.
fn decode_text(bytes: &[u8]) -> std::result::Result<Cow<'_, str>, String> {
    let utf16 = |chunks: std::slice::ChunksExact<'_, u8>, be: bool| {
        let units: Vec<u16> = chunks
            .map(|c| {
                if be {
                    u16::from_be_bytes([c[0], c[1]])
                } else {
                    u16::from_le_bytes([c[0], c[1]])
                }
            })
            .collect();
        String::from_utf16(&units)
            .map(Cow::Owned)
            .map_err(|e| format!("invalid UTF-16: {}", e))
    };

    match bytes {
        [0xEF, 0xBB, 0xBF, rest @ ..] => std::str::from_utf8(rest)
            .map(Cow::Borrowed)
            .map_err(|e| format!("invalid UTF-8: {}", e)),
        [0xFF, 0xFE, rest @ ..] => utf16(rest.chunks_exact(2), false),
        [0xFE, 0xFF, rest @ ..] => utf16(rest.chunks_exact(2), true),
        _ => std::str::from_utf8(bytes)
            .map(Cow::Borrowed)
            .map_err(|e| format!("invalid UTF-8: {}", e)),
    }
}

/// Collect attributes by local name.
fn attributes(e: &BytesStart<'_>) -> std::result::Result<BTreeMap<String, String>, String> {
    let mut out = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        out.insert(key, value.into_owned());
    }
    Ok(out)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Event-driven builder for [`HealthDocument`].
#[derive(Default)]
struct DocumentParser {
    document: HealthDocument,
    /// Open element local names.
    stack: Vec<String>,
    /// Open component names.
    components: Vec<String>,
    /// Text of the innermost element.
    text: String,
    seen_root: bool,

    enumeration: Option<Enumeration>,
    literal: Option<String>,
    series: Option<ValueSeries>,
    sample: Option<Sample>,
    limit: Option<Limits>,
    threshold: Option<String>,
}

impl DocumentParser {
    fn parent(&self) -> Option<&str> {
        self.stack.iter().rev().nth(1).map(String::as_str)
    }

    fn open(&mut self, e: &BytesStart<'_>) -> std::result::Result<(), String> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

        if !self.seen_root {
            if name != ROOT {
                return Err(format!("unexpected root element <{}>", name));
            }
            self.seen_root = true;
        }

        let parent = self.stack.last().cloned();
        self.stack.push(name.clone());
        self.text.clear();

        match (name.as_str(), parent.as_deref()) {
            ("Enumeration", Some("Enumerations")) => {
                let mut attrs = attributes(e)?;
                self.enumeration = Some(Enumeration {
                    name: attrs.remove("Name").unwrap_or_default(),
                    instrument: non_empty(attrs.remove("Instrument")),
                    literals: Vec::new(),
                });
            }
            ("Literal", Some("Enumeration")) => {
                self.literal = Some(attributes(e)?.remove("Name").unwrap_or_default());
            }
            ("Instrument", Some("Instruments")) => {
                let mut attrs = attributes(e)?;
                self.document.instrument = Some(InstrumentInfo {
                    name: attrs.remove("Name").unwrap_or_default(),
                    display_name: non_empty(attrs.remove("DisplayName")),
                });
            }
            ("Component", _) => {
                let component = attributes(e)?.remove("Name").unwrap_or_default();
                self.components.push(component);
            }
            ("Parameter", Some("Component")) => {
                let mut attrs = attributes(e)?;
                let decl = ParameterDecl {
                    id: attrs.remove("ID").unwrap_or_default(),
                    name: attrs.remove("Name").unwrap_or_default(),
                    display_name: non_empty(attrs.remove("DisplayName")),
                    data_type: non_empty(attrs.remove("Type")),
                    storage_unit: non_empty(attrs.remove("StorageUnit")),
                    display_unit: non_empty(attrs.remove("DisplayUnit")),
                    event_name: non_empty(attrs.remove("EventName")),
                    subsystem: self.components.join("/"),
                };
                self.document.parameters.push(decl);
            }
            ("Values", Some(ROOT)) => {
                self.document.values_instrument = non_empty(attributes(e)?.remove("Instrument"));
            }
            ("ValueData", Some("Values")) => {
                let mut attrs = attributes(e)?;
                self.series = Some(ValueSeries {
                    parameter_id: non_empty(attrs.remove("ParameterID")),
                    parameter: attrs.remove("Parameter").unwrap_or_default(),
                    ..Default::default()
                });
            }
            ("ParameterValue", Some("ParameterValues")) if self.series.is_some() => {
                self.sample = Some(Sample {
                    timestamp: non_empty(attributes(e)?.remove("Timestamp")),
                    ..Default::default()
                });
            }
            ("Value", Some("ParameterValue")) => {
                if let Some(sample) = self.sample.as_mut() {
                    sample.value_type = non_empty(attributes(e)?.remove("Type"));
                }
            }
            ("Limit", Some("Limits")) if self.series.is_some() => {
                self.limit = Some(Limits::default());
            }
            ("Threshold", Some("Limit")) => {
                self.threshold = attributes(e)?.remove("Name");
            }
            _ => {}
        }

        Ok(())
    }

    fn text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn close(&mut self) -> std::result::Result<(), String> {
        let parent = self.parent().map(str::to_string);
        let name = self
            .stack
            .pop()
            .ok_or_else(|| "unbalanced end tag".to_string())?;
        let text = std::mem::take(&mut self.text);
        let text = text.trim();

        match (name.as_str(), parent.as_deref()) {
            ("Literal", Some("Enumeration")) => {
                if let (Some(literal), Some(enumeration)) =
                    (self.literal.take(), self.enumeration.as_mut())
                {
                    match text.parse::<i64>() {
                        Ok(value) => enumeration.literals.push(Literal {
                            name: literal,
                            value,
                        }),
                        Err(_) => trace!(literal = %literal, text, "Ignoring non-integer literal"),
                    }
                }
            }
            ("Enumeration", Some("Enumerations")) => {
                if let Some(enumeration) = self.enumeration.take() {
                    self.document
                        .enumerations
                        .insert(enumeration.name.clone(), enumeration);
                }
            }
            ("Component", _) => {
                self.components.pop();
            }
            ("Value", Some("ParameterValue")) => {
                if let Some(sample) = self.sample.as_mut() {
                    sample.raw = text.to_string();
                }
            }
            ("ParameterValue", Some("ParameterValues")) => {
                if let (Some(sample), Some(series)) = (self.sample.take(), self.series.as_mut()) {
                    series.samples.push(sample);
                }
            }
            ("Value", Some("Threshold")) => {
                if let (Some(threshold), Some(limit)) =
                    (self.threshold.as_deref(), self.limit.as_mut())
                    && let Ok(value) = text.parse::<f64>()
                {
                    limit.set_by_name(threshold, value);
                }
            }
            ("Threshold", Some("Limit")) => {
                self.threshold = None;
            }
            ("Limit", Some("Limits")) => {
                if let (Some(limit), Some(series)) = (self.limit.take(), self.series.as_mut()) {
                    series.limits = limit;
                }
            }
            ("ValueData", Some("Values")) => {
                if let Some(series) = self.series.take() {
                    self.document.values.push(series);
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn finish(self) -> std::result::Result<HealthDocument, String> {
        if !self.seen_root {
            return Err("no root element".to_string());
        }
        if let Some(open) = self.stack.last() {
            return Err(format!(
                "truncated document: <{}> not closed ({} open elements)",
                open,
                self.stack.len()
            ));
        }
        Ok(self.document)
    }
}
