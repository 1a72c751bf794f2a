//! Query-name fragment codec
//!
//! Encodes ciphertext into DNS-label-safe hex chunks and builds/parses the
//! query-name wire format:
//!
//! ```text
//! <sender_id>.<seq_id>.<index>.<total>.<chunk>.<domain_suffix>
//! ```
//!
//! Hex doubles the payload size but keeps every label inside the DNS
//! hostname alphabet with no case-folding surprises.

use thiserror::Error;

/// Maximum bytes per DNS label (RFC 1035)
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum total query name length
pub const MAX_NAME_LEN: usize = 253;

/// Leading numeric labels before the chunk: sender id, seq id, index, total
const HEADER_LABELS: usize = 4;

/// One protocol-encoded chunk of an encrypted message, carried as a single
/// DNS query name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub sender_id: u32,
    pub seq_id: u64,
    pub index: u32,
    pub total: u32,
    pub payload: String,
}

/// Query-name shapes that are not channel traffic.
///
/// The capture filter sees every query on the DNS port, so a parse failure
/// is expected noise and the packet is dropped without comment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("query name has {0} labels, need at least 6")]
    TooFewLabels(usize),

    #[error("non-numeric protocol field")]
    NonNumericField,

    #[error("zero total chunk count")]
    ZeroTotal,

    #[error("chunk label is not hex")]
    BadChunk,
}

/// Hex-encode ciphertext and split it into chunks of at most `char_limit`
/// characters each, preserving order.
pub fn encode_chunks(ciphertext: &[u8], char_limit: usize) -> Vec<String> {
    let encoded = hex::encode(ciphertext);
    encoded
        .as_bytes()
        .chunks(char_limit.clamp(1, MAX_LABEL_LEN))
        .map(|chunk| std::str::from_utf8(chunk).unwrap().to_string())
        .collect()
}

/// Concatenate chunks back into the hex ciphertext string.
pub fn concat_chunks<'a>(chunks: impl IntoIterator<Item = &'a str>) -> String {
    chunks.into_iter().collect()
}

/// Build the full query name for one fragment.
///
/// The caller keeps the name inside the DNS budget by choosing `chunk`
/// lengths via the adaptive char limit; every label here is ≤63 bytes as
/// long as that holds.
pub fn build_query_name(
    sender_id: u32,
    seq_id: u64,
    index: u32,
    total: u32,
    chunk: &str,
    domain_suffix: &str,
) -> String {
    format!(
        "{}.{}.{}.{}.{}.{}",
        sender_id, seq_id, index, total, chunk, domain_suffix
    )
}

/// Parse a captured query name into a [`Fragment`].
///
/// Requires at least five leading labels (four numeric fields plus the
/// chunk) before the domain suffix; the suffix itself is not validated, so
/// a peer querying through any domain is accepted.
pub fn parse_query_name(name: &str) -> Result<Fragment, ParseError> {
    let name = name.strip_suffix('.').unwrap_or(name);
    let labels: Vec<&str> = name.split('.').collect();

    if labels.len() < HEADER_LABELS + 2 {
        return Err(ParseError::TooFewLabels(labels.len()));
    }

    let sender_id: u32 = parse_decimal(labels[0])?;
    let seq_id: u64 = parse_decimal(labels[1])?;
    let index: u32 = parse_decimal(labels[2])?;
    let total: u32 = parse_decimal(labels[3])?;

    if total == 0 {
        return Err(ParseError::ZeroTotal);
    }

    let payload = labels[HEADER_LABELS];
    if payload.is_empty() || !payload.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseError::BadChunk);
    }

    Ok(Fragment {
        sender_id,
        seq_id,
        index,
        total,
        payload: payload.to_string(),
    })
}

fn parse_decimal<T: std::str::FromStr>(label: &str) -> Result<T, ParseError> {
    if label.is_empty() || !label.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::NonNumericField);
    }
    label.parse().map_err(|_| ParseError::NonNumericField)
}
