//! User-provided files: the image to caption and an optional PDF.
//!
//! Attachments are validated when they are created, not when a run starts,
//! so a bad file is reported at selection time. Images are sniffed with the
//! `image` crate (the mime type sent to the backend comes from the detected
//! format, not the file extension); PDFs must start with the `%PDF` magic.

use crate::error::StoryError;
use crate::media::MediaRef;
use crate::model::ModelChoice;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// What an attachment is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Pdf,
}

/// An uploaded file held in memory.
///
/// Bytes are reference counted so snapshotting an upload into a run is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Arc<Vec<u8>>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("kind", &self.kind)
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Attachment {
    /// Wrap image bytes, detecting the format from the content.
    pub fn image_from_bytes(
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, StoryError> {
        let file_name = file_name.into();
        let format = image::guess_format(&bytes).map_err(|_| StoryError::NotAnImage {
            name: file_name.clone(),
        })?;
        let mime_type = format.to_mime_type().to_string();
        debug!("Image '{}' detected as {}", file_name, mime_type);
        Ok(Self {
            kind: AttachmentKind::Image,
            file_name,
            mime_type,
            bytes: Arc::new(bytes),
        })
    }

    /// Wrap PDF bytes, checking the `%PDF` header.
    pub fn pdf_from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, StoryError> {
        let file_name = file_name.into();
        if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
            let mut magic = [0u8; 4];
            let n = bytes.len().min(4);
            magic[..n].copy_from_slice(&bytes[..n]);
            return Err(StoryError::NotAPdf {
                name: file_name,
                magic,
            });
        }
        Ok(Self {
            kind: AttachmentKind::Pdf,
            file_name,
            mime_type: "application/pdf".to_string(),
            bytes: Arc::new(bytes),
        })
    }

    /// Read and validate an image file.
    pub async fn image_from_path(path: impl AsRef<Path>) -> Result<Self, StoryError> {
        let path = path.as_ref();
        let bytes = read_file(path).await?;
        Self::image_from_bytes(file_name_of(path), bytes)
    }

    /// Read and validate a PDF file.
    pub async fn pdf_from_path(path: impl AsRef<Path>) -> Result<Self, StoryError> {
        let path = path.as_ref();
        let bytes = read_file(path).await?;
        Self::pdf_from_bytes(file_name_of(path), bytes)
    }

    /// Render the attachment as a `data:` URI, the preview reference shown
    /// next to the upload control.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(self.bytes.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, StoryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(StoryError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => Err(StoryError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

/// Files and model choice currently held by the session.
///
/// Lives from selection until submission or explicit deletion; never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Upload {
    pub image: Option<Attachment>,
    pub image_preview: Option<MediaRef>,
    pub pdf: Option<Attachment>,
    pub pdf_preview: Option<MediaRef>,
    pub model_choice: ModelChoice,
}

impl Upload {
    pub fn with_model(model_choice: ModelChoice) -> Self {
        Self {
            model_choice,
            ..Default::default()
        }
    }

    pub fn has_image(&self) -> bool {
        self.image.as_ref().is_some_and(|a| !a.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 128, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("encode png");
        buf
    }

    #[test]
    fn image_mime_comes_from_content() {
        // Extension says jpg, content is PNG.
        let a = Attachment::image_from_bytes("photo.jpg", png_bytes()).unwrap();
        assert_eq!(a.mime_type, "image/png");
        assert_eq!(a.kind, AttachmentKind::Image);
    }

    #[test]
    fn rejects_non_image_bytes() {
        let err = Attachment::image_from_bytes("notes.txt", b"hello world".to_vec()).unwrap_err();
        assert!(matches!(err, StoryError::NotAnImage { .. }));
    }

    #[test]
    fn pdf_magic_is_checked() {
        assert!(Attachment::pdf_from_bytes("a.pdf", b"%PDF-1.7\n...".to_vec()).is_ok());
        let err = Attachment::pdf_from_bytes("a.pdf", b"PK\x03\x04".to_vec()).unwrap_err();
        match err {
            StoryError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn short_pdf_is_rejected() {
        assert!(Attachment::pdf_from_bytes("a.pdf", b"%P".to_vec()).is_err());
    }

    #[test]
    fn data_uri_has_mime_prefix() {
        let a = Attachment::image_from_bytes("x.png", png_bytes()).unwrap();
        let uri = a.data_uri();
        assert!(uri.starts_with("data:image/png;base64,"), "got: {uri}");
        let payload = uri.split_once(',').unwrap().1;
        assert_eq!(STANDARD.decode(payload).unwrap(), png_bytes());
    }

    #[tokio::test]
    async fn from_path_reads_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boy_dog.png");
        std::fs::write(&path, png_bytes()).unwrap();
        let a = Attachment::image_from_path(&path).await.unwrap();
        assert_eq!(a.file_name, "boy_dog.png");
        assert_eq!(a.len(), png_bytes().len());
    }

    #[tokio::test]
    async fn missing_path_is_file_not_found() {
        let err = Attachment::image_from_path("/definitely/not/here.png")
            .await
            .unwrap_err();
        assert!(matches!(err, StoryError::FileNotFound { .. }));
    }

    #[test]
    fn upload_without_image() {
        let u = Upload::with_model(ModelChoice::HuggingFace);
        assert!(!u.has_image());
        assert_eq!(u.model_choice, ModelChoice::HuggingFace);
    }
}
