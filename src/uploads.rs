use crate::error::{AppError, AppResult};
use axum::extract::Multipart;
use mime::Mime;
use std::{
    collections::HashMap,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

/// Web prefix under which stored files are served.
pub const UPLOADS_PREFIX: &str = "/uploads";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Document,
}

/// Sniffs the content itself rather than trusting the client's headers.
pub fn classify(bytes: &[u8]) -> MediaKind {
    let Some(mime) = infer::get(bytes).and_then(|t| t.mime_type().parse::<Mime>().ok()) else {
        return MediaKind::Document;
    };
    match mime.type_() {
        mime::IMAGE => MediaKind::Image,
        mime::VIDEO => MediaKind::Video,
        _ => MediaKind::Document,
    }
}

/// `<millis>-<name>` with the client's file name reduced to a safe charset.
pub fn stored_name(millis: u128, original: &str) -> String {
    let base = original.rsplit(&['/', '\\'][..]).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        format!("{millis}-upload")
    } else {
        format!("{millis}-{cleaned}")
    }
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: String,
    pub kind: MediaKind,
}

#[derive(Clone)]
pub struct Uploads {
    dir: PathBuf,
}

impl Uploads {
    pub fn new(dir: impl Into<PathBuf>) -> Uploads {
        Uploads { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub async fn store(&self, file: &UploadedFile) -> AppResult<StoredFile> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let millis = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
        let name = stored_name(millis, &file.file_name);
        tokio::fs::write(self.dir.join(&name), &file.bytes).await?;
        tracing::debug!(%name, size = file.bytes.len(), "stored upload");
        Ok(StoredFile {
            path: format!("{UPLOADS_PREFIX}/{name}"),
            kind: classify(&file.bytes),
        })
    }

    /// Removes files written by `store` for a submission that was then refused.
    /// Failures are logged and otherwise ignored.
    pub async fn discard(&self, paths: &[String]) {
        for path in paths {
            let Some(name) = path.strip_prefix(&format!("{UPLOADS_PREFIX}/")) else {
                continue;
            };
            if let Err(e) = tokio::fs::remove_file(self.dir.join(name)).await {
                tracing::warn!(%name, "failed to discard upload: {e}");
            }
        }
    }

    /// Stores every file submitted under `field`, in submission order.
    pub async fn store_all(&self, form: &FormData, field: &str) -> AppResult<Vec<String>> {
        let mut paths = Vec::new();
        for file in form.files(field) {
            paths.push(self.store(file).await?.path);
        }
        Ok(paths)
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A multipart form read into text fields and files.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: Vec<UploadedFile>,
}

impl FormData {
    pub async fn read(mut multipart: Multipart) -> AppResult<FormData> {
        let mut form = FormData::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|_| AppError::invalid("Malformed form submission"))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let file_name = field.file_name().map(str::to_string);
            match file_name {
                Some(file_name) => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|_| AppError::invalid("Malformed form submission"))?;
                    // browsers send an empty part for untouched file inputs
                    if !bytes.is_empty() {
                        form.files.push(UploadedFile {
                            field: name,
                            file_name,
                            bytes: bytes.to_vec(),
                        });
                    }
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|_| AppError::invalid("Malformed form submission"))?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    pub fn with_field(mut self, name: &str, value: &str) -> FormData {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_file(mut self, field: &str, file_name: &str, bytes: &[u8]) -> FormData {
        self.files.push(UploadedFile {
            field: field.to_string(),
            file_name: file_name.to_string(),
            bytes: bytes.to_vec(),
        });
        self
    }

    /// Trimmed text of a field; blank counts as absent.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn required(&self, name: &str, label: &str) -> AppResult<String> {
        self.text(name)
            .map(str::to_string)
            .ok_or_else(|| AppError::invalid(format!("{label} is required!")))
    }

    pub fn files<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a UploadedFile> + 'a {
        self.files.iter().filter(move |f| f.field == field)
    }

    pub fn file<'a>(&'a self, field: &'a str) -> Option<&'a UploadedFile> {
        self.files(field).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    #[test]
    fn classifies_by_content() {
        assert_eq!(classify(PNG), MediaKind::Image);
        assert_eq!(classify(b"%PDF-1.7 something"), MediaKind::Document);
        assert_eq!(classify(b"plain text"), MediaKind::Document);
    }

    #[test]
    fn stored_names_are_prefixed_and_sanitized() {
        assert_eq!(stored_name(1700, "poster.png"), "1700-poster.png");
        assert_eq!(stored_name(1700, "my cv (final).pdf"), "1700-my_cv__final_.pdf");
        assert_eq!(stored_name(1700, "../../etc/passwd"), "1700-passwd");
        assert_eq!(stored_name(1700, "C:\\temp\\..\\a.jpg"), "1700-a.jpg");
        assert_eq!(stored_name(1700, ".."), "1700-upload");
    }

    #[test]
    fn blank_fields_count_as_missing() {
        let form = FormData::default()
            .with_field("content", "  hello ")
            .with_field("bio", "   ");
        assert_eq!(form.text("content"), Some("hello"));
        assert_eq!(form.text("bio"), None);
        assert!(form.required("bio", "Bio").is_err());
    }

    #[tokio::test]
    async fn stores_files_under_the_upload_dir() {
        let dir = std::env::temp_dir().join(format!("club-hub-uploads-{}", rand::random::<u64>()));
        let uploads = Uploads::new(&dir);
        let form = FormData::default()
            .with_file("photos", "a.png", PNG)
            .with_file("photos", "b.png", PNG)
            .with_file("other", "c.txt", b"x");

        let paths = uploads.store_all(&form, "photos").await.unwrap();
        assert_eq!(paths.len(), 2);
        for path in &paths {
            assert!(path.starts_with("/uploads/"));
            let name = path.trim_start_matches("/uploads/");
            assert!(dir.join(name).exists());
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn discarded_uploads_are_removed() {
        let dir = std::env::temp_dir().join(format!("club-hub-uploads-{}", rand::random::<u64>()));
        let uploads = Uploads::new(&dir);
        let form = FormData::default().with_file("photos", "a.png", PNG);

        let paths = uploads.store_all(&form, "photos").await.unwrap();
        let name = paths[0].trim_start_matches("/uploads/").to_string();
        assert!(dir.join(&name).exists());

        uploads
            .discard(&[paths[0].clone(), "/elsewhere/b.png".to_string()])
            .await;
        assert!(!dir.join(&name).exists());
        let _ = std::fs::remove_dir_all(dir);
    }
}
