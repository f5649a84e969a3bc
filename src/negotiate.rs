/// The `Accept-Encoding` / `Content-Encoding` token for the snappy framing format.
pub const SNAPPY: &str = "snappy";

/// Returns whether any of the given header values lists the [`SNAPPY`] token.
///
/// Each value may be a comma-separated list (e.g. `"gzip, snappy"`). Segments
/// are compared after trimming surrounding whitespace, and the comparison is
/// exact: `"Snappy"` does not match.
///
/// Accepts anything that yields byte slices, so both
/// `headers.get_all(ACCEPT_ENCODING)` and plain `&str` values work.
pub fn has_token<I>(values: I) -> bool
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    values
        .into_iter()
        .any(|value| contains_token(value.as_ref()))
}

fn contains_token(value: &[u8]) -> bool {
    if value.is_empty() {
        return false;
    }

    value
        .split(|b| *b == b',')
        .any(|part| part.trim_ascii() == SNAPPY.as_bytes())
}
