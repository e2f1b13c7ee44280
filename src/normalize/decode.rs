use std::sync::LazyLock;

use encoding_rs::{Encoding, EUC_KR, UTF_8};
use regex::bytes::Regex;

use crate::error::DecodeError;

static DECLARED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:encoding|charset)\s*=\s*["']?([A-Za-z0-9_.:-]+)"#).unwrap()
});

/// How far into a document an encoding declaration is looked for.
const DECLARATION_WINDOW: usize = 1024;

/// Regional encoding tried when the declared one fails (EUC-KR, decoded as its CP949 superset).
pub fn fallback_encoding() -> &'static Encoding {
    EUC_KR
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Give up when neither encoding decodes cleanly.
    Strict,
    /// Decode with the fallback encoding and replacement characters as a last resort.
    #[default]
    Substitute,
}

/// Which strategy produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    Primary(&'static str),
    Fallback,
    FallbackLossy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub strategy: DecodeStrategy,
}

/// BOM first, then an `encoding=`/`charset=` declaration near the top, else UTF-8.
pub fn sniff_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((enc, _)) = Encoding::for_bom(bytes) {
        return enc;
    }
    let window = &bytes[..bytes.len().min(DECLARATION_WINDOW)];
    DECLARED_RE
        .captures(window)
        .and_then(|caps| Encoding::for_label(&caps[1]))
        // a declared UTF-16 without a BOM is read as UTF-8, as browsers do
        .map(Encoding::output_encoding)
        .unwrap_or(UTF_8)
}

pub fn decode(bytes: &[u8], primary: &'static Encoding, policy: DecodePolicy) -> Result<Decoded, DecodeError> {
    let (primary, body) = match Encoding::for_bom(bytes) {
        Some((enc, bom_len)) => (enc, &bytes[bom_len..]),
        None => (primary, bytes),
    };

    if let Some(text) = primary.decode_without_bom_handling_and_without_replacement(body) {
        return Ok(Decoded {
            text: text.into_owned(),
            strategy: DecodeStrategy::Primary(primary.name()),
        });
    }

    let fallback = fallback_encoding();
    if primary != fallback {
        if let Some(text) = fallback.decode_without_bom_handling_and_without_replacement(body) {
            return Ok(Decoded {
                text: text.into_owned(),
                strategy: DecodeStrategy::Fallback,
            });
        }
    }

    match policy {
        DecodePolicy::Substitute => {
            let (text, _) = fallback.decode_without_bom_handling(body);
            Ok(Decoded {
                text: text.into_owned(),
                strategy: DecodeStrategy::FallbackLossy,
            })
        }
        DecodePolicy::Strict => Err(DecodeError {
            primary: primary.name(),
            fallback: fallback.name(),
        }),
    }
}
