pub mod decode;
pub mod markup;
pub mod sections;

use tracing::debug;

use crate::archive::ExtractedDocument;
use crate::error::DecodeError;
use decode::{DecodePolicy, DecodeStrategy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizerConfig {
    pub decode_policy: DecodePolicy,
    pub suppress_boilerplate: bool,
    pub blocked_sections: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        NormalizerConfig {
            decode_policy: DecodePolicy::default(),
            suppress_boilerplate: true,
            blocked_sections: sections::DEFAULT_BLOCKED_SECTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Decode an extracted document and turn it into plain text.
pub fn normalize(doc: &ExtractedDocument, config: &NormalizerConfig) -> Result<String, DecodeError> {
    let decoded = decode::decode(&doc.bytes, doc.encoding, config.decode_policy)?;
    if !matches!(decoded.strategy, DecodeStrategy::Primary(_)) {
        debug!(
            "{} not valid {}, decoded via {:?}",
            doc.name,
            doc.encoding.name(),
            decoded.strategy
        );
    }
    Ok(normalize_markup(&decoded.text, config))
}

/// Four passes: markup → flat text → collapsed whitespace → boilerplate filter.
pub fn normalize_markup(markup: &str, config: &NormalizerConfig) -> String {
    let flat = markup::markup_to_text(markup);
    let text = sections::collapse_whitespace(&flat);
    if config.suppress_boilerplate {
        sections::suppress_boilerplate(&text, &config.blocked_sections)
    } else {
        text
    }
}
