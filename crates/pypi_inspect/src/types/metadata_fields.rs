use std::collections::HashMap;
use thiserror::Error;

/// The parsed fields and body of a `METADATA` / `PKG-INFO` file.
///
/// These files are nominally RFC 822 messages but in practice the format is
/// "whatever Python's `email.parser` accepts": header lines with optional
/// continuation lines, then an empty line, then a free-form body which modern
/// metadata uses for the long description. We are slightly stricter than the
/// stdlib parser (an empty field name or a leading continuation line is an
/// error) but just as tolerant of stray trailing newlines.
#[derive(Debug)]
pub struct MetadataFields {
    fields: HashMap<String, Vec<String>>,

    /// The message body, if any.
    pub body: Option<String>,
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum MetadataFieldsError {
    #[error("invalid metadata headers: {0}")]
    Malformed(String),

    #[error("multiple values for singleton key {0}")]
    DuplicateKey(String),

    #[error("missing required key {0}")]
    MissingKey(String),
}

peg::parser! {
    grammar metadata_parser() for str {
        // Real RFC822 requires CRLF; email.parser takes anything.
        rule eol()
            = quiet!{"\r\n" / "\r" / "\n"} / expected!("end of line")

        rule key() -> &'input str
            = quiet!{$(['\x21'..='\x39' | '\x3b'..='\x7e']+)} / expected!("field name")

        // A single " \t" run after the colon is dropped, everything else in
        // the value is preserved.
        rule separator()
            = ":" [' ' | '\t']*

        rule value_line()
            = [^ '\r' | '\n']*

        rule folded_eol()
            = quiet!{eol() [' ' | '\t']} / expected!("continuation line")

        // Continuation lines keep their embedded newlines, matching what the
        // Python parser produces. Trailing newlines are discarded.
        rule value() -> &'input str
            = $(value_line() ** folded_eol())

        rule header() -> (String, String)
            = k:key() separator() v:value() { (k.to_ascii_lowercase(), v.to_owned()) }

        rule headers() -> Vec<(String, String)>
            = header() ** eol()

        rule body() -> String
            = eol() eol() b:$([_]*) { b.to_owned() }

        // The optional eol() absorbs a single trailing newline when there is
        // no body.
        pub rule message() -> MetadataFields
            = h:headers() body:(body()?) eol()? {
                let mut fields: HashMap<String, Vec<String>> = HashMap::new();
                for (key, value) in h {
                    fields.entry(key).or_default().push(value);
                }
                MetadataFields { fields, body }
            }
    }
}

impl MetadataFields {
    /// Parse the headers and body of a metadata file.
    pub fn parse(input: &str) -> Result<MetadataFields, MetadataFieldsError> {
        metadata_parser::message(input).map_err(|e| MetadataFieldsError::Malformed(e.to_string()))
    }

    /// Removes and returns all values recorded for `key`. Key lookup is
    /// case-insensitive.
    pub fn take_all(&mut self, key: &str) -> Vec<String> {
        self.fields.remove(&key.to_ascii_lowercase()).unwrap_or_default()
    }

    /// Removes the value for a key that must occur at most once.
    pub fn take_optional(&mut self, key: &str) -> Result<Option<String>, MetadataFieldsError> {
        let mut values = self.take_all(key);
        match values.len() {
            0 => Ok(None),
            1 => Ok(values.pop()),
            _ => Err(MetadataFieldsError::DuplicateKey(key.to_owned())),
        }
    }

    /// Removes the value for a key that must occur exactly once.
    pub fn take(&mut self, key: &str) -> Result<String, MetadataFieldsError> {
        self.take_optional(key)?
            .ok_or_else(|| MetadataFieldsError::MissingKey(key.to_owned()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_basic_headers() {
        let mut parsed = MetadataFields::parse(
            "Metadata-Version: 2.1\nName: frob\nVersion: 1.0\nClassifier: A\nClassifier: B\n",
        )
        .unwrap();
        assert_eq!(parsed.take("Name").unwrap(), "frob");
        assert_eq!(parsed.take_all("classifier"), vec!["A", "B"]);
        assert_eq!(parsed.take_optional("Requires-Python").unwrap(), None);
        assert!(parsed.body.is_none());
    }

    #[test]
    fn test_continuation_lines_and_body() {
        let mut parsed = MetadataFields::parse(
            "Name: frob\nSummary: first line\n  second line\n\nThe long description.\n",
        )
        .unwrap();
        assert_eq!(parsed.take("Summary").unwrap(), "first line\n  second line");
        assert_eq!(parsed.body.as_deref(), Some("The long description.\n"));
    }

    #[test]
    fn test_duplicate_singleton_is_an_error() {
        let mut parsed = MetadataFields::parse("Version: 1\nVersion: 2\n").unwrap();
        assert!(matches!(
            parsed.take_optional("Version"),
            Err(MetadataFieldsError::DuplicateKey(_))
        ));
    }
}
