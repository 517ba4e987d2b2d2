//! `multipart/form-data` encoding for file uploads.
//!
//! The appliance only accepts two upload shapes: a bare file part, or a file
//! part followed by `name` and `description` text parts. Part headers and
//! text values are small and kept as bytes; file contents are never read
//! ahead of the send. `finish` chains the pieces into one reader the agent
//! streams from.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

use uuid::Uuid;

use crate::error::{Result, SdkError};

/// Form field name the appliance reads the file from.
pub const FILE_FIELD: &str = "file";

#[derive(Debug)]
enum Segment {
    Bytes(Vec<u8>),
    File(File),
}

/// Builds a multipart body part by part.
#[derive(Debug)]
pub struct MultipartForm {
    boundary: String,
    segments: Vec<Segment>,
    len: u64,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    pub fn new() -> Self {
        Self {
            boundary: format!("oneview-{}", Uuid::new_v4().simple()),
            segments: Vec::new(),
            len: 0,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn add_text(&mut self, name: &str, value: &str) {
        let mut part = self.part_header(&format!("form-data; name=\"{}\"", quote_param(name)));
        part.extend_from_slice(b"\r\n");
        part.extend_from_slice(value.as_bytes());
        part.extend_from_slice(b"\r\n");
        self.push_bytes(part);
    }

    /// Append `path` as a file part named after its file name. The file is
    /// opened now and read only while the body is sent.
    pub fn add_file(&mut self, name: &str, path: &Path) -> Result<()> {
        let file = File::open(path)
            .map_err(|e| SdkError::io(format!("cannot read {}: {e}", path.display())))?;
        let size = file
            .metadata()
            .map_err(|e| SdkError::io(format!("cannot stat {}: {e}", path.display())))?
            .len();
        let file_name = upload_file_name(path)?;

        let mut part = self.part_header(&format!(
            "form-data; name=\"{}\"; filename=\"{}\"",
            quote_param(name),
            quote_param(&file_name)
        ));
        part.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        self.push_bytes(part);
        self.segments.push(Segment::File(file));
        self.len += size;
        self.push_bytes(b"\r\n".to_vec());
        Ok(())
    }

    /// Close the form, returning the `Content-Type` header value and the body.
    pub fn finish(mut self) -> (String, MultipartBody) {
        let closing = format!("--{}--\r\n", self.boundary).into_bytes();
        self.push_bytes(closing);

        let mut reader: Box<dyn Read + Send> = Box::new(io::empty());
        for segment in self.segments {
            reader = match segment {
                Segment::Bytes(bytes) => Box::new(reader.chain(Cursor::new(bytes))),
                Segment::File(file) => Box::new(reader.chain(file)),
            };
        }
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            MultipartBody {
                reader,
                len: self.len,
            },
        )
    }

    fn part_header(&self, disposition: &str) -> Vec<u8> {
        format!("--{}\r\nContent-Disposition: {disposition}\r\n", self.boundary).into_bytes()
    }

    fn push_bytes(&mut self, bytes: Vec<u8>) {
        self.len += bytes.len() as u64;
        self.segments.push(Segment::Bytes(bytes));
    }
}

/// A finished form, read front to back exactly once.
pub struct MultipartBody {
    reader: Box<dyn Read + Send>,
    len: u64,
}

impl MultipartBody {
    /// Total size in bytes, file sizes taken when the parts were added.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for MultipartBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl std::fmt::Debug for MultipartBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartBody").field("len", &self.len).finish_non_exhaustive()
    }
}

/// Percent-encode the characters that would end a quoted header parameter.
fn quote_param(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("%22"),
            '\r' => out.push_str("%0D"),
            '\n' => out.push_str("%0A"),
            other => out.push(other),
        }
    }
    out
}

/// File name sent alongside an upload.
pub fn upload_file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            SdkError::invalid_argument(format!("{} has no file name", path.display()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;

    fn read_all(mut body: MultipartBody) -> String {
        let mut out = String::new();
        body.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn text_and_file_parts_are_framed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.zip");
        fs::write(&path, b"PK-bytes").unwrap();

        let mut form = MultipartForm::new();
        form.add_file(FILE_FIELD, &path).unwrap();
        form.add_text("name", "golden");
        form.add_text("description", "base image");
        let boundary = form.boundary().to_string();
        let (content_type, body) = form.finish();
        let len = body.len();
        let body = read_all(body);

        assert_eq!(content_type, format!("multipart/form-data; boundary={boundary}"));
        assert_eq!(len, body.len() as u64);
        assert!(body.starts_with(&format!("--{boundary}\r\n")));
        assert!(body.contains("name=\"file\"; filename=\"image.zip\""));
        assert!(body.contains("\r\n\r\nPK-bytes\r\n"));
        assert!(body.contains("name=\"description\"\r\n\r\nbase image\r\n"));
        assert!(body.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn file_is_read_when_the_body_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        fs::write(&path, b"old").unwrap();

        let mut form = MultipartForm::new();
        form.add_file(FILE_FIELD, &path).unwrap();
        let (_, body) = form.finish();
        // Same length, so the size taken at add time still holds.
        fs::write(&path, b"new").unwrap();

        let body = read_all(body);
        assert!(body.contains("\r\n\r\nnew\r\n"));
        assert!(!body.contains("old"));
    }

    #[test]
    fn header_parameters_cannot_break_the_part_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("we\"ird\r\nname.bin");
        fs::write(&path, b"x").unwrap();

        let mut form = MultipartForm::new();
        form.add_file(FILE_FIELD, &path).unwrap();
        form.add_text("note\"\r\nX-Injected: 1", "value");
        let body = read_all(form.finish().1);

        assert!(body.contains("filename=\"we%22ird%0D%0Aname.bin\""));
        assert!(body.contains("name=\"note%22%0D%0AX-Injected: 1\""));
        assert!(!body.contains("\r\nX-Injected"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let mut form = MultipartForm::new();
        let err = form
            .add_file(FILE_FIELD, Path::new("/nonexistent/upload.bin"))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io { .. }));
    }
}
