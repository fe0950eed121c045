//! `multipart/form-data` payloads.
//!
//! The body is encoded up front so both backends send the same bytes, and
//! the boundary is derived from the parts: equal forms encode to equal
//! bodies and therefore to equal cache keys.

use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

impl Part {
    /// A plain text field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            data: Bytes::from(value.into()),
        }
    }

    /// A file field, sent as `application/octet-stream` unless
    /// [`with_content_type`](Part::with_content_type) says otherwise.
    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some("application/octet-stream".into()),
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Encoded form: the `Content-Type` value and the body.
pub(crate) fn encode(parts: &[Part]) -> (String, Bytes) {
    let boundary = boundary(parts);
    let mut body = BytesMut::new();

    for part in parts {
        body.put_slice(b"--");
        body.put_slice(boundary.as_bytes());
        body.put_slice(b"\r\nContent-Disposition: form-data; name=\"");
        body.put_slice(escape(&part.name).as_bytes());
        body.put_slice(b"\"");
        if let Some(filename) = &part.filename {
            body.put_slice(b"; filename=\"");
            body.put_slice(escape(filename).as_bytes());
            body.put_slice(b"\"");
        }
        body.put_slice(b"\r\n");
        if let Some(content_type) = &part.content_type {
            body.put_slice(b"Content-Type: ");
            body.put_slice(escape(content_type).as_bytes());
            body.put_slice(b"\r\n");
        }
        body.put_slice(b"\r\n");
        body.put_slice(&part.data);
        body.put_slice(b"\r\n");
    }
    body.put_slice(b"--");
    body.put_slice(boundary.as_bytes());
    body.put_slice(b"--\r\n");

    (
        format!("multipart/form-data; boundary={}", boundary),
        body.freeze(),
    )
}

fn boundary(parts: &[Part]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        for field in [
            part.name.as_bytes(),
            part.filename.as_deref().unwrap_or_default().as_bytes(),
            part.content_type.as_deref().unwrap_or_default().as_bytes(),
            part.data.as_ref(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
    }
    let digest = hex::encode(hasher.finalize());
    format!("fetchkeep-{}", &digest[..32])
}

// Quotes and line breaks would end the header early.
fn escape(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
