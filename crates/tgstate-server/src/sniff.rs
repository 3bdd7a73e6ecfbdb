//! Content type sniffing
//!
//! Implements the subset of the WHATWG MIME sniffing algorithm that common
//! HTTP stacks apply to the first bytes of a response body.

/// Number of leading bytes considered when sniffing
pub const SNIFF_LEN: usize = 512;

const HTML: &str = "text/html; charset=utf-8";
const TEXT: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// Tags that identify an HTML document when they open the body
const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

const PREFIXES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"\xFE\xFF", "text/plain; charset=utf-16be"),
    (b"\xFF\xFE", "text/plain; charset=utf-16le"),
    (b"\xEF\xBB\xBF", TEXT),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"\x00\x00\x02\x00", "image/x-icon"),
    (b"BM", "image/bmp"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b".snd", "audio/basic"),
    (b"ID3", "audio/mpeg"),
    (b"OggS\x00", "application/ogg"),
    (b"MThd\x00\x00\x00\x06", "audio/midi"),
    (b"\x1A\x45\xDF\xA3", "video/webm"),
    (b"\x00\x01\x00\x00", "font/ttf"),
    (b"OTTO", "font/otf"),
    (b"ttcf", "font/collection"),
    (b"wOFF", "font/woff"),
    (b"wOF2", "font/woff2"),
    (b"\x1F\x8B\x08", "application/x-gzip"),
    (b"PK\x03\x04", "application/zip"),
    (b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    (b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    (b"\x00asm", "application/wasm"),
];

/// Container formats identified by a 4-byte magic, 4 bytes of length, and a form type
const CONTAINERS: &[(&[u8], &[u8], &str)] = &[
    (b"RIFF", b"WEBPVP", "image/webp"),
    (b"RIFF", b"AVI ", "video/avi"),
    (b"RIFF", b"WAVE", "audio/wave"),
    (b"FORM", b"AIFF", "audio/aiff"),
];

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | 0x0C | b'\r' | b' ')
}

fn is_binary(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

/// Case-insensitive tag match that must be followed by a space or `>`
fn matches_html_tag(data: &[u8], tag: &[u8]) -> bool {
    if data.len() < tag.len() + 1 {
        return false;
    }
    let same = tag.iter().zip(data).all(|(&t, &d)| {
        if t.is_ascii_uppercase() {
            t == d & 0xDF
        } else {
            t == d
        }
    });
    same && matches!(data[tag.len()], b' ' | b'>')
}

fn matches_container(data: &[u8], magic: &[u8], form: &[u8]) -> bool {
    data.len() >= 8 + form.len() && data.starts_with(magic) && data[8..].starts_with(form)
}

/// An ISO base media file whose `ftyp` box lists an `mp4*` brand
fn is_mp4(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if data.len() < box_size || box_size % 4 != 0 || &data[4..8] != b"ftyp" {
        return false;
    }
    // Brands start at offset 8; offset 12 holds the minor version
    (8..box_size)
        .step_by(4)
        .filter(|&offset| offset != 12)
        .any(|offset| &data[offset..offset + 3] == b"mp4")
}

/// Detect the content type of a body from its leading bytes
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];
    let first_non_ws = data
        .iter()
        .position(|&b| !is_whitespace(b))
        .unwrap_or(data.len());
    let trimmed = &data[first_non_ws..];

    if HTML_TAGS.iter().any(|tag| matches_html_tag(trimmed, tag)) {
        return HTML;
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    if let Some(&(_, content_type)) = PREFIXES
        .iter()
        .find(|(prefix, _)| data.starts_with(prefix))
    {
        return content_type;
    }

    if let Some(&(_, _, content_type)) = CONTAINERS
        .iter()
        .find(|(magic, form, _)| matches_container(data, magic, form))
    {
        return content_type;
    }

    if is_mp4(data) {
        return "video/mp4";
    }

    if trimmed.iter().any(|&b| is_binary(b)) {
        OCTET_STREAM
    } else {
        TEXT
    }
}

#[cfg(test)]
pub(crate) fn mp4_header() -> Vec<u8> {
    let mut header = vec![0x00, 0x00, 0x00, 0x1C];
    header.extend_from_slice(b"ftypisom");
    header.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
    header.extend_from_slice(b"isomiso2mp41");
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mp4_is_video() {
        let mut data = mp4_header();
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x08, b'f', b'r', b'e', b'e']);
        assert_eq!(detect_content_type(&data), "video/mp4");
    }

    #[test]
    fn test_ftyp_without_mp4_brand() {
        let mut data = vec![0x00, 0x00, 0x00, 0x14];
        data.extend_from_slice(b"ftypqt  \x00\x00\x02\x00qt  ");
        assert_eq!(detect_content_type(&data), OCTET_STREAM);
    }

    #[test]
    fn test_webm_and_avi() {
        assert_eq!(detect_content_type(b"\x1A\x45\xDF\xA3\x01\x00"), "video/webm");
        assert_eq!(
            detect_content_type(b"RIFF\x10\x00\x00\x00AVI LIST"),
            "video/avi"
        );
    }

    #[test]
    fn test_images() {
        assert_eq!(
            detect_content_type(b"\x89PNG\x0D\x0A\x1A\x0A\x00\x00\x00\x0DIHDR"),
            "image/png"
        );
        assert_eq!(detect_content_type(b"\xFF\xD8\xFF\xE0\x00\x10JFIF"), "image/jpeg");
        assert_eq!(detect_content_type(b"GIF89a\x01\x00"), "image/gif");
        assert_eq!(
            detect_content_type(b"RIFF\x24\x00\x00\x00WEBPVP8 "),
            "image/webp"
        );
    }

    #[test]
    fn test_fonts_and_sun_audio() {
        assert_eq!(detect_content_type(b"\x00\x01\x00\x00\x00\x10"), "font/ttf");
        assert_eq!(detect_content_type(b"OTTO\x00\x0B"), "font/otf");
        assert_eq!(detect_content_type(b"ttcf\x00\x01\x00\x00"), "font/collection");
        assert_eq!(detect_content_type(b"wOFF\x00\x01\x00\x00"), "font/woff");
        assert_eq!(detect_content_type(b"wOF2\x00\x01\x00\x00"), "font/woff2");
        assert_eq!(detect_content_type(b".snd\x00\x00\x00\x18"), "audio/basic");
    }

    #[test]
    fn test_html_after_whitespace() {
        assert_eq!(detect_content_type(b"  \n<html><body>"), HTML);
        assert_eq!(detect_content_type(b"<!doctype html>"), HTML);
        // Tag must be terminated
        assert_eq!(detect_content_type(b"<bogus>"), TEXT);
    }

    #[test]
    fn test_xml_and_pdf() {
        assert_eq!(
            detect_content_type(b"<?xml version=\"1.0\"?>"),
            "text/xml; charset=utf-8"
        );
        assert_eq!(detect_content_type(b"%PDF-1.7\n"), "application/pdf");
    }

    #[test]
    fn test_plain_text_and_binary() {
        assert_eq!(detect_content_type(b"hello world"), TEXT);
        assert_eq!(detect_content_type(b""), TEXT);
        assert_eq!(detect_content_type(b"\x01\x02\x03"), OCTET_STREAM);
    }

    #[test]
    fn test_only_leading_bytes_are_inspected() {
        let mut data = vec![b'a'; SNIFF_LEN];
        data.push(0x00);
        assert_eq!(detect_content_type(&data), TEXT);
    }
}
