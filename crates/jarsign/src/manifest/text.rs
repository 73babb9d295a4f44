//! Manifest text model: attributes, sections, canonical serialization and parsing.
//!
//! The format is the JAR manifest convention: `Key: Value` lines terminated by
//! CRLF, lines longer than 72 bytes continued on lines starting with a single
//! space, and blank-line-terminated sections. The first section holds the main
//! attributes; every following section starts with a `Name:` line.

use std::collections::BTreeMap;

use crate::{Error, Result};

/// Attribute that opens every per-entry section.
pub const NAME: &str = "Name";

/// Maximum line length in bytes, excluding the line terminator.
pub const MAX_LINE_LENGTH: usize = 72;

const CRLF: &[u8] = b"\r\n";

/// Ordered attribute list of one section.
///
/// Attribute names compare case-insensitively, as in JAR manifests; insertion
/// order is the serialization order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, String)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, replacing the value of an existing attribute with the same name.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some(existing) => existing.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        for (key, value) in &self.entries {
            write_line(out, key, value);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Attributes::new();
        for (k, v) in iter {
            attrs.insert(k, v);
        }
        attrs
    }
}

/// A manifest-format document: main attributes plus named entry sections.
///
/// Entries are kept in byte-wise lexicographic order of their names, so the
/// serialized form is a pure function of the content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    main: Attributes,
    entries: BTreeMap<String, Attributes>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_main_attributes(main: Attributes) -> Self {
        Self {
            main,
            entries: BTreeMap::new(),
        }
    }

    pub fn main_attributes(&self) -> &Attributes {
        &self.main
    }

    pub fn main_attributes_mut(&mut self) -> &mut Attributes {
        &mut self.main
    }

    /// Entry sections keyed by name, in serialization order.
    pub fn entries(&self) -> &BTreeMap<String, Attributes> {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&Attributes> {
        self.entries.get(name)
    }

    /// Add an entry section. Names are unique; a duplicate is rejected.
    ///
    /// A name with a line break cannot be written as a single `Name:` line and
    /// is rejected.
    pub fn insert_entry(&mut self, name: impl Into<String>, attributes: Attributes) -> Result<()> {
        let name = name.into();
        if has_line_break(&name) {
            return Err(Error::InvalidManifest(format!(
                "Entry name {name:?} contains a line break"
            )));
        }
        if self.entries.contains_key(&name) {
            return Err(Error::InvalidManifest(format!("Duplicate entry '{name}'")));
        }
        self.entries.insert(name, attributes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical byte form: main section, then every entry stanza in order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.main.write_to(&mut out);
        out.extend_from_slice(CRLF);
        for (name, attrs) in &self.entries {
            write_stanza(&mut out, name, attrs);
        }
        out
    }

    /// Parse a manifest-format document.
    ///
    /// Accepts CRLF, LF or CR line terminators and continuation lines.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut manifest = Manifest::new();
        let mut sections = split_sections(data)?.into_iter();

        if let Some(main) = sections.next() {
            for (key, value) in main {
                manifest.main.insert(key, value);
            }
        }

        for section in sections {
            let mut lines = section.into_iter();
            let name = match lines.next() {
                Some((key, value)) if key.eq_ignore_ascii_case(NAME) => value,
                Some((key, _)) => {
                    return Err(Error::InvalidManifest(format!(
                        "Entry section starts with '{key}' instead of '{NAME}'"
                    )))
                }
                None => continue,
            };
            let attrs: Attributes = lines.collect();
            manifest.insert_entry(name, attrs)?;
        }

        Ok(manifest)
    }
}

/// Whether `value` contains a character that would end a manifest line.
pub(crate) fn has_line_break(value: &str) -> bool {
    value.contains(&['\r', '\n', '\0'][..])
}

/// Serialize a single entry stanza: `Name` line, attribute lines, blank line.
///
/// This is the byte sequence the signature file digests per entry, and the
/// exact bytes [`Manifest::to_bytes`] emits for that entry.
pub fn stanza_bytes(name: &str, attributes: &Attributes) -> Vec<u8> {
    let mut out = Vec::new();
    write_stanza(&mut out, name, attributes);
    out
}

fn write_stanza(out: &mut Vec<u8>, name: &str, attributes: &Attributes) {
    write_line(out, NAME, name);
    attributes.write_to(out);
    out.extend_from_slice(CRLF);
}

/// Write `key: value`, wrapping at [`MAX_LINE_LENGTH`] bytes.
fn write_line(out: &mut Vec<u8>, key: &str, value: &str) {
    let mut line = Vec::with_capacity(key.len() + 2 + value.len());
    line.extend_from_slice(key.as_bytes());
    line.extend_from_slice(b": ");
    line.extend_from_slice(value.as_bytes());

    let (first, mut rest) = line.split_at(line.len().min(MAX_LINE_LENGTH));
    out.extend_from_slice(first);
    out.extend_from_slice(CRLF);

    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rest.len().min(MAX_LINE_LENGTH - 1));
        out.push(b' ');
        out.extend_from_slice(chunk);
        out.extend_from_slice(CRLF);
        rest = tail;
    }
}

type Section = Vec<(String, String)>;

/// Split a document into sections of unfolded `(key, value)` pairs.
fn split_sections(data: &[u8]) -> Result<Vec<Section>> {
    let mut sections = Vec::new();
    let mut section: Vec<Vec<u8>> = Vec::new();

    for line in split_lines(data) {
        if line.is_empty() {
            if !section.is_empty() {
                sections.push(parse_section(std::mem::take(&mut section))?);
            }
            continue;
        }

        if line[0] == b' ' {
            let last = section.last_mut().ok_or_else(|| {
                Error::InvalidManifest("Continuation line without a preceding attribute".into())
            })?;
            last.extend_from_slice(&line[1..]);
        } else {
            section.push(line.to_vec());
        }
    }

    if !section.is_empty() {
        sections.push(parse_section(section)?);
    }

    Ok(sections)
}

fn parse_section(lines: Vec<Vec<u8>>) -> Result<Section> {
    lines
        .into_iter()
        .map(|line| {
            let text = String::from_utf8(line)
                .map_err(|e| Error::InvalidManifest(format!("Attribute is not UTF-8: {e}")))?;
            let (key, value) = text.split_once(": ").ok_or_else(|| {
                Error::InvalidManifest(format!("Malformed attribute line '{text}'"))
            })?;
            if key.is_empty() {
                return Err(Error::InvalidManifest(format!(
                    "Attribute without a name in '{text}'"
                )));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Split on CRLF, LF or CR without allocating.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < data.len() {
        match data[i] {
            b'\r' => {
                lines.push(&data[start..i]);
                if data.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            b'\n' => {
                lines.push(&data[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    if start < data.len() {
        lines.push(&data[start..]);
    }

    lines
}
