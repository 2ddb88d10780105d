use std::path::Path;

use lopdf::{Document, Object};
use serde_json::{Map, Value};
use tracing::debug;

use super::{MediaInfo, MediaInspector, inspector::base_info};
use crate::error::{ContentError, Result};

const INFO_FIELDS: &[(&[u8], &str)] = &[
    (b"Author", "author"),
    (b"Creator", "creator"),
    (b"Producer", "producer"),
    (b"Subject", "subject"),
    (b"Title", "title"),
    (b"CreationDate", "creation_date"),
    (b"ModDate", "modification_date"),
];

/// Page count and document information dictionary of PDF files.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentInspector;

impl MediaInspector for DocumentInspector {
    fn inspect(&self, path: &Path, filename: &str) -> Result<MediaInfo> {
        let mut raw = base_info(path, filename)?;
        let document = Document::load(path).map_err(|err| {
            ContentError::InvalidMedia(format!("cannot read document {filename}: {err}"))
        })?;

        let mut details = Map::new();
        details.insert("pages".into(), document.get_pages().len().into());
        for (key, name) in INFO_FIELDS {
            details.insert(
                (*name).into(),
                info_entry(&document, key).map_or(Value::Null, Value::String),
            );
        }
        debug!(filename, pages = %details["pages"], "parsed document");

        raw.insert("container".into(), "pdf".into());
        raw.insert("document".into(), Value::Object(details));
        Ok(MediaInfo {
            raw,
            ..MediaInfo::default()
        })
    }
}

/// A text entry of the trailer's `/Info` dictionary, if present.
fn info_entry(document: &Document, key: &[u8]) -> Option<String> {
    let info = document.trailer.get(b"Info").ok()?;
    let (_, info) = document.dereference(info).ok()?;
    let value = info.as_dict().ok()?.get(key).ok()?;
    let (_, value) = document.dereference(value).ok()?;
    match value {
        Object::String(bytes, _) => Some(decode_text(bytes)),
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}

/// PDF text strings are UTF-16BE when they carry a byte order mark and
/// single-byte otherwise.
fn decode_text(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&byte| char::from(byte)).collect(),
    }
}
