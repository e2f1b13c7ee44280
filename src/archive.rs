use std::io::{Cursor, Read};

use encoding_rs::Encoding;
use serde::Deserialize;
use tracing::debug;

use crate::error::ArchiveError;
use crate::normalize::decode::sniff_encoding;

/// Extensions that can hold the main body of a filing.
const MARKUP_EXTENSIONS: &[&str] = &["xml", "html", "htm", "xhtml"];
const ZIP_MAGIC: &[&[u8]] = &[b"PK\x03\x04", b"PK\x05\x06"];
pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 64 * 1024 * 1024;

/// The main document of a filing, still undecoded.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub name: String,
    pub bytes: Vec<u8>,
    pub encoding: &'static Encoding,
}

#[derive(Deserialize)]
struct ServicePayload {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

pub fn extract_main_document(bytes: &[u8]) -> Result<ExtractedDocument, ArchiveError> {
    extract_main_document_capped(bytes, DEFAULT_MAX_DOCUMENT_BYTES)
}

/// Pick the largest markup entry of a zip package.
pub fn extract_main_document_capped(
    bytes: &[u8],
    max_bytes: u64,
) -> Result<ExtractedDocument, ArchiveError> {
    sniff_container(bytes)?;

    let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;

    let mut best: Option<(usize, u64, String)> = None;
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        if entry.is_dir() || !has_markup_extension(entry.name()) {
            continue;
        }
        let size = entry.size();
        if best.as_ref().map_or(true, |(_, s, _)| size > *s) {
            best = Some((i, size, entry.name().to_string()));
        }
    }

    let Some((index, size, name)) = best else {
        return Err(ArchiveError::NoMainDocument(zip.len()));
    };
    if size > max_bytes {
        return Err(ArchiveError::Corrupt(format!(
            "{} is {} bytes, above the {} byte limit",
            name, size, max_bytes
        )));
    }
    debug!("main document {} ({} bytes of {} entries)", name, size, zip.len());

    let entry = zip.by_index(index)?;
    let mut buf = Vec::with_capacity(size as usize);
    entry
        .take(max_bytes + 1)
        .read_to_end(&mut buf)
        .map_err(|e| ArchiveError::Corrupt(format!("reading {}: {}", name, e)))?;
    if buf.len() as u64 > max_bytes {
        return Err(ArchiveError::Corrupt(format!("{} exceeds {} bytes", name, max_bytes)));
    }

    let encoding = sniff_encoding(&buf);
    Ok(ExtractedDocument {
        name,
        bytes: buf,
        encoding,
    })
}

/// Reject error payloads served with a success status before touching the zip reader.
fn sniff_container(bytes: &[u8]) -> Result<(), ArchiveError> {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let head = &bytes[start..];

    if head.first() == Some(&b'{') {
        let (status, message) = match serde_json::from_slice::<ServicePayload>(head) {
            Ok(p) => (p.status, p.message),
            Err(_) => (String::new(), String::from_utf8_lossy(&head[..head.len().min(200)]).into_owned()),
        };
        return Err(ArchiveError::ServicePayload { status, message });
    }

    if ZIP_MAGIC.iter().any(|magic| bytes.starts_with(magic)) {
        Ok(())
    } else {
        Err(ArchiveError::NotAnArchive(bytes.iter().take(8).copied().collect()))
    }
}

fn has_markup_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| MARKUP_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)))
        .unwrap_or(false)
}
