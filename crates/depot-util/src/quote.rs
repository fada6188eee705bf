/// Parse one word out of `input`, honoring `"…"` and `[…]` groups and
/// decoding `%xx` escapes. Returns the word and the rest of the input
/// with surrounding whitespace consumed, or `None` when the input is
/// exhausted or a group is left open.
pub fn parse_quoted_word(input: &str) -> Option<(String, &str)> {
    let s = input.trim_start_matches(' ');
    if s.is_empty() {
        return None;
    }

    let bytes = s.as_bytes();
    let mut end = 0;
    while end < bytes.len() && !bytes[end].is_ascii_whitespace() {
        match bytes[end] {
            b'"' => {
                end = s[end + 1..].find('"').map(|i| end + 1 + i)?;
            }
            b'[' => {
                end = s[end + 1..].find(']').map(|i| end + 1 + i)?;
            }
            _ => {}
        }
        end += 1;
    }

    let mut word = String::with_capacity(end);
    let raw = &bytes[..end];
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'%' if i + 2 < raw.len()
                && raw[i + 1].is_ascii_hexdigit()
                && raw[i + 2].is_ascii_hexdigit() =>
            {
                let hi = (raw[i + 1] as char).to_digit(16).unwrap_or(0);
                let lo = (raw[i + 2] as char).to_digit(16).unwrap_or(0);
                word.push((hi * 16 + lo) as u8 as char);
                i += 3;
            }
            b'"' => i += 1,
            b => {
                word.push(b as char);
                i += 1;
            }
        }
    }

    Some((word, s[end..].trim_start()))
}

/// `%xx`-escape every byte in `bad`, every control byte, `%` itself and
/// anything outside the printable ASCII range.
pub fn quote_string(input: &str, bad: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        if bad.as_bytes().contains(&b) || b == b'%' || b <= 0x20 || b >= 0x7F {
            out.push_str(&format!("%{b:02x}"));
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Undo [`quote_string`]. Stray `%` sequences pass through untouched.
pub fn dequote_string(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hi = (bytes[i + 1] as char).to_digit(16).unwrap_or(0) as u8;
            let lo = (bytes[i + 2] as char).to_digit(16).unwrap_or(0) as u8;
            out.push(hi * 16 + lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Escape the characters a URI must not carry verbatim when embedded in
/// a wire message.
pub fn url_encode_bad(uri: &str) -> String {
    quote_string(uri, "\\|{}[]<>\"^~_=!@#$%^&*")
}

/// Replace each `$(NAME)` marker with its value from `vars`, in order.
/// Used by the FTP proxy-login script.
pub fn subst_vars(input: &str, vars: &[(&str, &str)]) -> String {
    let mut out = input.to_string();
    for (name, value) in vars {
        out = out.replace(name, value);
    }
    out
}
