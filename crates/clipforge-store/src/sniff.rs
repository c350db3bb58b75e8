//! Content type detection from leading bytes.
//!
//! The detected type is authoritative for downstream processing; the
//! client-declared type is used only for admission checks.

/// Number of leading bytes needed for a reliable sniff.
pub const SNIFF_LEN: usize = 16;

/// Detect a video container from the leading bytes of a file.
///
/// Returns `None` when the bytes match no supported container.
pub fn detect_content_type(head: &[u8]) -> Option<&'static str> {
    if head.len() < 12 {
        return None;
    }

    // ISO BMFF: size(4) + "ftyp" + major brand
    if &head[4..8] == b"ftyp" {
        let brand = &head[8..12];
        if brand.starts_with(b"qt") {
            return Some("video/quicktime");
        }
        if brand == b"M4V " || brand == b"M4VP" {
            return Some("video/x-m4v");
        }
        return Some("video/mp4");
    }

    // EBML header: Matroska and WebM share it; WebM uses a DocType marker
    // further in, so the generic Matroska type is reported here.
    if head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("video/x-matroska");
    }

    // RIFF ... AVI
    if head.starts_with(b"RIFF") && &head[8..12] == b"AVI " {
        return Some("video/x-msvideo");
    }

    None
}

/// File extensions accepted at upload init.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v"];

/// Whether a filename carries an allowed video extension.
pub fn extension_allowed(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Whether a declared content type is plausible for a video upload.
pub fn declared_type_acceptable(content_type: &str) -> bool {
    content_type.starts_with("video/") || content_type == "application/octet-stream"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_mp4() {
        let mut head = vec![0x00, 0x00, 0x00, 0x20];
        head.extend_from_slice(b"ftypisom");
        head.extend_from_slice(&[0; 8]);
        assert_eq!(detect_content_type(&head), Some("video/mp4"));
    }

    #[test]
    fn detects_quicktime() {
        let mut head = vec![0x00, 0x00, 0x00, 0x14];
        head.extend_from_slice(b"ftypqt  ");
        head.extend_from_slice(&[0; 8]);
        assert_eq!(detect_content_type(&head), Some("video/quicktime"));
    }

    #[test]
    fn detects_matroska() {
        let mut head = vec![0x1A, 0x45, 0xDF, 0xA3];
        head.extend_from_slice(&[0; 12]);
        assert_eq!(detect_content_type(&head), Some("video/x-matroska"));
    }

    #[test]
    fn detects_avi() {
        let mut head = Vec::new();
        head.extend_from_slice(b"RIFF");
        head.extend_from_slice(&[0x24, 0x00, 0x00, 0x00]);
        head.extend_from_slice(b"AVI ");
        head.extend_from_slice(&[0; 4]);
        assert_eq!(detect_content_type(&head), Some("video/x-msvideo"));
    }

    #[test]
    fn rejects_unknown_bytes() {
        assert_eq!(detect_content_type(b"not a video container"), None);
        assert_eq!(detect_content_type(b"short"), None);
        assert_eq!(detect_content_type(&[0u8; 16]), None);
    }

    #[test]
    fn extension_allow_list() {
        assert!(extension_allowed("clip.mp4"));
        assert!(extension_allowed("Holiday.MOV"));
        assert!(extension_allowed("a.b.webm"));
        assert!(!extension_allowed("document.pdf"));
        assert!(!extension_allowed("no_extension"));
    }

    #[test]
    fn declared_type_policy() {
        assert!(declared_type_acceptable("video/mp4"));
        assert!(declared_type_acceptable("application/octet-stream"));
        assert!(!declared_type_acceptable("image/png"));
    }
}
