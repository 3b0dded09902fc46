use crate::VisualizerError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// The only media type accepted for uploads.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Transfer-safe encoding of an uploaded document. Computed once per upload
/// and reused across refine cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPayload {
    data: String,
    media_type: String,
}

impl EncodedPayload {
    #[must_use]
    pub fn from_bytes(bytes: &[u8], media_type: impl Into<String>) -> Self {
        Self {
            data: STANDARD.encode(bytes),
            media_type: media_type.into(),
        }
    }

    /// Accept a `data:<type>;base64,<data>` string or bare base64 text.
    #[must_use]
    pub fn from_data_url(value: &str, media_type: impl Into<String>) -> Self {
        Self {
            data: strip_data_url_prefix(value).to_string(),
            media_type: media_type.into(),
        }
    }

    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    #[must_use]
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the encoded text in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.data)
    }
}

/// Drop a `data:...;base64,` prefix if present.
#[must_use]
pub fn strip_data_url_prefix(value: &str) -> &str {
    if value.starts_with("data:") {
        value.split_once(',').map_or("", |(_, data)| data)
    } else {
        value
    }
}

/// Read a document to the end without blocking and encode it.
pub async fn encode_reader<R>(
    mut reader: R,
    media_type: &str,
) -> Result<EncodedPayload, VisualizerError>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .await
        .map_err(VisualizerError::Encoding)?;

    Ok(EncodedPayload::from_bytes(&bytes, media_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::io::ReadBuf;

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "upload interrupted",
            )))
        }
    }

    #[tokio::test]
    async fn encodes_and_decodes_back_to_original_bytes() {
        let samples: [&[u8]; 4] = [
            b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF",
            b"%PDF-1.4",
            &[0, 255, 1, 254, 2, 253],
            b"",
        ];

        for sample in samples {
            let payload = encode_reader(sample, PDF_MEDIA_TYPE).await.unwrap();
            assert_eq!(payload.media_type(), PDF_MEDIA_TYPE);
            assert_eq!(payload.decode().unwrap(), sample);
        }
    }

    #[tokio::test]
    async fn read_failure_is_an_encoding_error() {
        let error = encode_reader(FailingReader, PDF_MEDIA_TYPE)
            .await
            .unwrap_err();

        match error {
            VisualizerError::Encoding(io_error) => {
                assert_eq!(io_error.kind(), io::ErrorKind::ConnectionReset);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn strips_data_url_prefix() {
        assert_eq!(
            strip_data_url_prefix("data:application/pdf;base64,JVBERi0="),
            "JVBERi0="
        );
        assert_eq!(strip_data_url_prefix("JVBERi0="), "JVBERi0=");
        assert_eq!(strip_data_url_prefix("data:application/pdf;base64"), "");
    }

    #[test]
    fn payload_from_data_url_matches_direct_encoding() {
        let direct = EncodedPayload::from_bytes(b"%PDF-1.4", PDF_MEDIA_TYPE);
        let from_url = EncodedPayload::from_data_url(
            &format!("data:application/pdf;base64,{}", direct.data()),
            PDF_MEDIA_TYPE,
        );
        assert_eq!(direct, from_url);
    }
}
