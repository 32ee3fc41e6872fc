use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ESCAPE_RE: Regex = Regex::new(r"\\[n0t\\]").unwrap();
}

/// Expand the recognized escapes of a raw string literal into bytes.
/// Unrecognized backslash sequences are kept verbatim.
pub fn expand_escapes(raw: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut last = 0;

    for m in ESCAPE_RE.find_iter(raw) {
        bytes.extend_from_slice(raw[last..m.start()].as_bytes());
        bytes.push(match m.as_str() {
            r"\n" => b'\n',
            r"\0" => 0,
            r"\t" => b'\t',
            _ => b'\\',
        });
        last = m.end();
    }
    bytes.extend_from_slice(raw[last..].as_bytes());

    bytes
}

/// Operand list for a `db` directive, null terminator included.
pub fn db_list(raw: &str) -> String {
    expand_escapes(raw)
        .into_iter()
        .chain(std::iter::once(0))
        .map(|byte| byte.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
