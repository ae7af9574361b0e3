// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Stanza (paragraph) primitives of APT index and dpkg status files.

Both `Packages` index files and the dpkg `status` database are series of
*stanzas* separated by blank lines. Each stanza line is either a `Key: value`
field or a continuation line starting with whitespace. Continuation lines are
accumulated verbatim into a synthetic `Long` field.
*/

use {
    crate::error::{OfflineAptError, Result},
    log::debug,
    std::{
        fmt::{Display, Formatter},
        io::{BufRead, Write},
    },
};

/// Name of the synthetic field holding concatenated continuation lines.
pub const LONG_FIELD: &str = "Long";

/// Fields retained when parsing a dpkg status file.
pub const STATUS_FIELDS: &[&str] = &["Package", "Version", "Status", "Provides"];

/// A field in a stanza.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ControlField {
    name: String,
    value: String,
}

impl ControlField {
    /// Construct an instance from a field name and value.
    pub fn new(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// The name of this field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw string value of this field.
    pub fn value_str(&self) -> &str {
        &self.value
    }

    /// Write the contents of this field to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(b": ")?;
        writer.write_all(self.value.as_bytes())?;
        writer.write_all(b"\n")
    }
}

impl Display for ControlField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}: {}", self.name, self.value)
    }
}

/// A stanza: an ordered series of fields.
///
/// Field names are case insensitive on read and case preserving on set.
/// A stanza only holds a single occurrence of a field; setting a field again
/// replaces it, matching how the last occurrence in a file wins.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ControlParagraph {
    fields: Vec<ControlField>,
}

impl ControlParagraph {
    /// Whether the paragraph is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields in this paragraph.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Set the value of a field via a [ControlField].
    ///
    /// If a field with the same name (case insensitive compare) already exists, the old
    /// value is replaced by the incoming value.
    pub fn set_field(&mut self, field: ControlField) {
        self.fields
            .retain(|cf| !cf.name.eq_ignore_ascii_case(&field.name));
        self.fields.push(field);
    }

    /// Set the value of a field defined via strings.
    pub fn set_field_from_string(&mut self, name: impl ToString, value: impl ToString) {
        self.set_field(ControlField::new(name, value));
    }

    /// Remove a field, returning it if it was present.
    pub fn remove_field(&mut self, name: &str) -> Option<ControlField> {
        let pos = self
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))?;

        Some(self.fields.remove(pos))
    }

    /// Whether a named field is present in this paragraph.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterate over fields in this paragraph.
    ///
    /// Iteration order is insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField> {
        self.fields.iter()
    }

    /// Obtain the field with a given name in this paragraph.
    pub fn field(&self, name: &str) -> Option<&ControlField> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Obtain the raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// Obtain the raw string value of a field that must be present.
    pub fn required_field_str(&self, name: &'static str) -> Result<&str> {
        self.field_str(name)
            .ok_or(OfflineAptError::RecordRequiredFieldMissing(name))
    }

    /// Obtain the value of a field parsed as a [u64].
    pub fn field_u64(&self, name: &str) -> Option<Result<u64>> {
        self.field_str(name)
            .map(|v| v.trim().parse::<u64>().map_err(OfflineAptError::from))
    }

    /// Serialize the paragraph to a writer.
    ///
    /// No terminating blank line is written.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for field in &self.fields {
            field.write(writer)?;
        }

        Ok(())
    }
}

impl Display for ControlParagraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for field in &self.fields {
            write!(f, "{}", field)?;
        }

        Ok(())
    }
}

/// Which fields a [StanzaParser] retains.
#[derive(Clone, Copy, Debug)]
pub enum FieldFilter {
    /// Keep every field, including continuation lines in [LONG_FIELD].
    All,
    /// Keep only the listed fields.
    Only(&'static [&'static str]),
}

impl Default for FieldFilter {
    fn default() -> Self {
        Self::All
    }
}

impl FieldFilter {
    fn accepts(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.iter().any(|n| n.eq_ignore_ascii_case(name)),
        }
    }
}

/// Holds parsing state for stanza files.
///
/// Instances are fed lines of text and periodically emit [ControlParagraph]
/// instances as they are completed.
#[derive(Clone, Debug, Default)]
pub struct StanzaParser {
    filter: FieldFilter,
    paragraph: ControlParagraph,
    long: Option<String>,
}

impl StanzaParser {
    /// Construct a parser retaining fields accepted by `filter`.
    pub fn new(filter: FieldFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// A parser for dpkg status files, which retains only [STATUS_FIELDS].
    pub fn status() -> Self {
        Self::new(FieldFilter::Only(STATUS_FIELDS))
    }

    /// Write a line to the parser.
    ///
    /// `line` includes its trailing newline, if any. If the line terminates an
    /// in-progress stanza, that stanza is returned.
    pub fn write_line(&mut self, line: &str) -> Option<ControlParagraph> {
        if line.trim_end_matches(&['\r', '\n'][..]).is_empty() {
            return self.take_paragraph();
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            if self.filter.accepts(LONG_FIELD) {
                self.long.get_or_insert_with(String::new).push_str(line);
            }

            return None;
        }

        match line.split_once(": ") {
            Some((key, value)) => {
                if self.filter.accepts(key) {
                    self.paragraph.set_field_from_string(key, value.trim());
                }
            }
            None => {
                debug!("skipping unparsable stanza line: {:?}", line);
            }
        }

        None
    }

    /// Finish parsing, consuming self.
    ///
    /// Returns the stanza that was in progress when input ended, if any.
    pub fn finish(mut self) -> Option<ControlParagraph> {
        self.take_paragraph()
    }

    fn take_paragraph(&mut self) -> Option<ControlParagraph> {
        if let Some(long) = self.long.take() {
            self.paragraph.set_field_from_string(LONG_FIELD, long);
        }

        if self.paragraph.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.paragraph))
        }
    }
}

/// A lazy reader of stanzas.
///
/// Instances are bound to a reader and consume it; parsing again requires a
/// fresh stream. Each call into the iterator reads one full stanza.
pub struct StanzaReader<R: BufRead> {
    reader: R,
    parser: Option<StanzaParser>,
}

impl<R: BufRead> StanzaReader<R> {
    /// Create a new instance bound to a reader, keeping every field.
    pub fn new(reader: R) -> Self {
        Self::with_parser(reader, StanzaParser::default())
    }

    /// Create a new instance bound to a reader of a dpkg status file.
    pub fn status(reader: R) -> Self {
        Self::with_parser(reader, StanzaParser::status())
    }

    /// Create a new instance using a configured parser.
    pub fn with_parser(reader: R, parser: StanzaParser) -> Self {
        Self {
            reader,
            parser: Some(parser),
        }
    }

    fn get_next(&mut self) -> Result<Option<ControlParagraph>> {
        let mut parser = match self.parser.take() {
            Some(parser) => parser,
            None => return Ok(None),
        };

        let mut buf = vec![];

        loop {
            buf.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut buf)?;

            if bytes_read == 0 {
                return Ok(parser.finish());
            }

            let line = String::from_utf8_lossy(&buf);

            if let Some(paragraph) = parser.write_line(&line) {
                self.parser.replace(parser);
                return Ok(Some(paragraph));
            }
        }
    }
}

impl<R: BufRead> Iterator for StanzaReader<R> {
    type Item = Result<ControlParagraph>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.get_next() {
            Ok(Some(para)) => Some(Ok(para)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    fn parse(s: &str) -> Result<Vec<ControlParagraph>> {
        StanzaReader::new(std::io::Cursor::new(s.as_bytes().to_vec())).collect()
    }

    #[test]
    fn control_paragraph_field_semantics() {
        let mut p = ControlParagraph::default();

        // Same cased field name results in overwrite.
        p.set_field_from_string("foo", "bar");
        p.set_field_from_string("foo", "baz");
        assert_eq!(p.field_str("foo"), Some("baz"));

        // Different case results in overwrite.
        p.set_field_from_string("FOO", "bar");
        assert_eq!(p.field_str("foo"), Some("bar"));
        assert_eq!(p.field_str("FOO"), Some("bar"));
        assert_eq!(p.len(), 1);

        assert!(p.remove_field("Foo").is_some());
        assert!(p.is_empty());
    }

    #[test]
    fn parse_stanzas() -> Result<()> {
        let paragraphs = parse(indoc! {"
            Package: foo
            Version: 1.0-1
            Description: a foo
             Longer text.
             .
             More text.
            Size: 1234

            Package: bar
            Version: 2.0
            Depends: foo (>= 1.0)

        "})?;

        assert_eq!(paragraphs.len(), 2);

        let foo = &paragraphs[0];
        assert_eq!(foo.field_str("Package"), Some("foo"));
        assert_eq!(foo.field_str("Description"), Some("a foo"));
        assert_eq!(
            foo.field_str(LONG_FIELD),
            Some(" Longer text.\n .\n More text.\n")
        );
        assert_eq!(foo.field_u64("Size").unwrap()?, 1234);

        let bar = &paragraphs[1];
        assert_eq!(bar.field_str("Depends"), Some("foo (>= 1.0)"));
        assert!(!bar.has_field(LONG_FIELD));

        Ok(())
    }

    #[test]
    fn unparsable_lines_skipped() -> Result<()> {
        let paragraphs = parse("Package: foo\ngarbage line\nConffiles:\nVersion: 1\n\n")?;

        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].len(), 2);
        assert_eq!(paragraphs[0].field_str("Version"), Some("1"));

        Ok(())
    }

    #[test]
    fn trailing_stanza_without_blank_line() -> Result<()> {
        let paragraphs = parse("\n\nPackage: foo\n\n\n\nPackage: bar\nVersion: 1")?;

        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[1].field_str("Package"), Some("bar"));
        assert_eq!(paragraphs[1].field_str("Version"), Some("1"));

        Ok(())
    }

    #[test]
    fn status_filter() -> Result<()> {
        let data = indoc! {"
            Package: foo
            Status: install ok installed
            Priority: optional
            Version: 1.0
            Conffiles:
             /etc/foo abcdef
            Description: thing
             long

        "};

        let paragraphs = StanzaReader::status(std::io::Cursor::new(data.as_bytes()))
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(paragraphs.len(), 1);
        let names = paragraphs[0]
            .iter_fields()
            .map(|f| f.name())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Package", "Status", "Version"]);

        Ok(())
    }

    #[test]
    fn write_paragraph() -> Result<()> {
        let mut p = ControlParagraph::default();
        p.set_field_from_string("Package", "foo");
        p.set_field_from_string("Version", "1.0");

        let mut buf = vec![];
        p.write(&mut buf)?;
        assert_eq!(buf, b"Package: foo\nVersion: 1.0\n");
        assert_eq!(p.to_string(), "Package: foo\nVersion: 1.0\n");

        Ok(())
    }

    #[test]
    fn test_parse_system_lists() -> Result<()> {
        let paths = glob::glob("/var/lib/apt/lists/*_Packages")
            .unwrap()
            .chain(glob::glob("/var/lib/dpkg/status").unwrap());

        for path in paths {
            let path = path.unwrap();

            eprintln!("parsing {}", path.display());
            let fh = std::fs::File::open(&path)?;
            let reader = std::io::BufReader::new(fh);

            for para in StanzaReader::new(reader) {
                para?;
            }
        }

        Ok(())
    }
}
