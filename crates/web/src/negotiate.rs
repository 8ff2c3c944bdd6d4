//! `Accept` and `Accept-Encoding` negotiation.

use std::fmt;

/// Picks the capability token for an `Accept` header.
///
/// Entries are tried by descending weight, ties keeping header order. For
/// each media range the full range is looked up first, then its minor type,
/// then its major type when the minor type is `*`. The first token
/// `is_satisfied` accepts wins.
///
/// Entries whose weight does not parse, lies outside `[0, 1]`, or is `0` are
/// skipped.
pub fn negotiate_representation<'h>(accept: &'h str, is_satisfied: impl Fn(&str) -> bool) -> Option<&'h str> {
    if accept.is_empty() {
        return None;
    }

    let mut ranges: Vec<(&str, f32)> = accept.split(',').filter_map(parse_range).collect();
    // stable, so equal weights keep header order
    ranges.sort_by(|a, b| b.1.total_cmp(&a.1));

    ranges.into_iter().find_map(|(range, _)| {
        if is_satisfied(range) {
            return Some(range);
        }

        let (major, minor) = range.split_once('/')?;
        if is_satisfied(minor) {
            return Some(minor);
        }
        (minor == "*" && is_satisfied(major)).then_some(major)
    })
}

/// Whether `accept` lists `media_type` itself with a non-zero weight.
pub(crate) fn accepts(accept: &str, media_type: &str) -> bool {
    accept.split(',').filter_map(parse_range).any(|(range, _)| range.eq_ignore_ascii_case(media_type))
}

fn parse_range(entry: &str) -> Option<(&str, f32)> {
    let mut parts = entry.split(';');
    let range = parts.next()?.trim();
    if range.is_empty() {
        return None;
    }

    let mut weight = 1.0_f32;
    for param in parts {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("q") {
            weight = value.trim().parse().ok()?;
        }
    }

    (weight > 0.0 && weight <= 1.0).then_some((range, weight))
}

/// A compression the engine can apply to a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
    Br,
    Zstd,
}

impl ContentEncoding {
    /// The codings negotiated unless a server opts into more.
    pub const STANDARD: [ContentEncoding; 3] = [Self::Gzip, Self::Deflate, Self::Br];

    /// The first of gzip, deflate and br in `Accept-Encoding`, read left to
    /// right.
    ///
    /// Weights and parameters are ignored; `identity` and unknown codings are
    /// passed over.
    pub fn select(accept_encoding: &str) -> Option<Self> {
        Self::select_from(accept_encoding, &Self::STANDARD)
    }

    /// Like [`select`](Self::select), recognizing only the `supported` codings.
    pub fn select_from(accept_encoding: &str, supported: &[ContentEncoding]) -> Option<Self> {
        accept_encoding.split(',').find_map(|entry| {
            let coding = entry.split(';').next().unwrap_or("").trim();
            supported.iter().copied().find(|encoding| encoding.as_str().eq_ignore_ascii_case(coding))
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Br => "br",
            Self::Zstd => "zstd",
        }
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
