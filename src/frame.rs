//! In-memory STOMP frame value, serialization, and version-aware header
//! presence checks.

use std::collections::BTreeMap;

use crate::error::StompError;
use crate::version::StompVersion;

/// One STOMP protocol unit: a command, a set of headers, and a body.
///
/// Headers are stored in a [`BTreeMap`] so serialization always walks them
/// in name-sorted order for free, and so first-occurrence-wins dedup on the
/// wire is simply "insert only if absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Frame {
            command: command.into(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Builder-style variant of [`Frame::set_header`] that also accepts
    /// `Option` so callers don't need to branch for optional headers.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Option<String>>) -> Self {
        if let Some(value) = value.into() {
            self.set_header(name, value);
        }
        self
    }

    /// Inserts `name: value` only if `name` is not already present —
    /// used by the parser to implement first-occurrence-wins.
    pub(crate) fn set_header_if_absent(&mut self, name: String, value: String) {
        self.headers.entry(name).or_insert(value);
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    /// Checks presence of a set of headers against a negotiated version.
    ///
    /// `specs` is a list of `(header name, versions for which the header is
    /// NOT required)`. Checked in name-sorted order; the
    /// first missing, non-excluded header fails the whole call. Returns one
    /// entry per queried header, `None` when the header is legitimately
    /// absent (excluded for this version) and `Some` otherwise.
    pub fn require(
        &self,
        version: StompVersion,
        specs: &[(&str, &[StompVersion])],
    ) -> Result<Vec<Option<String>>, StompError> {
        let mut sorted: Vec<&(&str, &[StompVersion])> = specs.iter().collect();
        sorted.sort_by_key(|(name, _)| *name);

        let mut out = Vec::with_capacity(sorted.len());
        for (name, excluded) in sorted {
            match self.header(name) {
                Some(value) => out.push(Some(value.to_string())),
                None if excluded.contains(&version) => out.push(None),
                None => {
                    return Err(StompError::protocol(format!("Missing '{name}' header"))
                        .with_frame(self.clone()));
                }
            }
        }
        Ok(out)
    }

    /// Convenience for the common single-header case.
    pub fn require_one(&self, version: StompVersion, name: &str) -> Result<String, StompError> {
        Ok(self
            .require(version, &[(name, &[])])?
            .pop()
            .flatten()
            .expect("header checked present above"))
    }

    /// Serializes the frame to wire bytes:
    /// `COMMAND\n` + sorted `name:value\n` headers + `\n` + body + NUL + `\n`.
    ///
    /// `content-length` is added automatically (without mutating the frame)
    /// whenever the body is non-empty and the header isn't already set.
    /// `content-type` likewise defaults to `text/plain` for a non-empty,
    /// untyped body.
    pub fn serialize(&self) -> Vec<u8> {
        let needs_content_length = !self.body.is_empty() && !self.headers.contains_key("content-length");
        let needs_content_type = !self.body.is_empty() && !self.headers.contains_key("content-type");

        let mut out = Vec::with_capacity(
            self.command.len() + self.body.len() + 64 + self.headers.len() * 24,
        );
        out.extend_from_slice(self.command.as_bytes());
        out.push(b'\n');

        if needs_content_length {
            out.extend_from_slice(b"content-length:");
            out.extend_from_slice(self.body.len().to_string().as_bytes());
            out.push(b'\n');
        }
        if needs_content_type {
            out.extend_from_slice(b"content-type:text/plain\n");
        }
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.push(b':');
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out.push(b'\n');
        out
    }

    /// The `Failed frame:\n-----\n...\n-----` body the server embeds in an
    /// ERROR reply, built from the serialized form of `self`
    /// with the trailing NUL stripped.
    pub fn pretty_print(&self) -> String {
        let mut serialized = self.serialize();
        if serialized.last() == Some(&b'\n') {
            serialized.pop();
        }
        if serialized.last() == Some(&0) {
            serialized.pop();
        }
        format!(
            "Failed frame:\n-----\n{}\n-----",
            String::from_utf8_lossy(&serialized)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_sorted_headers_and_terminator() {
        let mut frame = Frame::new("CONNECTED");
        frame.set_header("version", "1.2");
        frame.set_header("session", "abc");
        assert_eq!(frame.serialize(), b"CONNECTED\nsession:abc\nversion:1.2\n\n\x00\n");
    }

    #[test]
    fn non_empty_body_gets_content_length_and_type() {
        let frame = Frame::new("MESSAGE").with_body(b"hi".to_vec());
        let out = frame.serialize();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("content-length:2\n"));
        assert!(text.contains("content-type:text/plain\n"));
    }

    #[test]
    fn require_reports_missing_header() {
        let frame = Frame::new("CONNECT");
        let err = frame.require(StompVersion::V1_2, &[("host", &[])]).unwrap_err();
        assert_eq!(err.message(), "Missing 'host' header");
    }

    #[test]
    fn require_allows_version_exclusion() {
        let frame = Frame::new("SUBSCRIBE");
        let result = frame
            .require(StompVersion::V1_0, &[("id", &[StompVersion::V1_0])])
            .unwrap();
        assert_eq!(result, vec![None]);
    }
}
