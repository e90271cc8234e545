/// CLIXML string escaping.
///
/// Characters the XML layer cannot carry (control characters) are
/// written as `_xHHHH_` code-unit escapes, and a literal `_` that would
/// itself read as the start of such an escape is escaped too so the
/// round trip is lossless.
/// <https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-psrp/301404a9-232f-439c-8644-1a213675bfac>
pub fn encode_ps_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();

    for (idx, &c) in chars.iter().enumerate() {
        if c.is_control() {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("_x{unit:04X}_"));
            }
        } else if c == '_' && looks_like_escape(&chars[idx..]) {
            out.push_str("_x005F_");
        } else {
            out.push(c);
        }
    }

    out
}

fn looks_like_escape(rest: &[char]) -> bool {
    rest.len() >= 7
        && matches!(rest[1], 'x' | 'X')
        && rest[2..6].iter().all(char::is_ascii_hexdigit)
        && rest[6] == '_'
}

/// Decode `_xHHHH_` escapes, pairing surrogate escapes back into their
/// code points. Sequences that do not decode to a valid character are
/// kept verbatim, matching how remote hosts treat bad escapes.
pub fn decode_ps_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut idx = 0;

    while idx < chars.len() {
        let Some(unit) = parse_escape(&chars[idx..]) else {
            out.push(chars[idx]);
            idx += 1;
            continue;
        };

        if (0xD800..=0xDBFF).contains(&unit) {
            // High surrogate: only meaningful with a low surrogate escape
            // immediately after it.
            if let Some(low) = parse_escape(&chars[idx + 8..]) {
                if (0xDC00..=0xDFFF).contains(&low) {
                    let code_point =
                        0x10000 + ((u32::from(unit) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
                    if let Some(c) = char::from_u32(code_point) {
                        out.push(c);
                        idx += 16;
                        continue;
                    }
                }
            }
            out.extend(&chars[idx..idx + 8]);
        } else if let Some(c) = char::from_u32(u32::from(unit)) {
            out.push(c);
        } else {
            out.extend(&chars[idx..idx + 8]);
        }
        idx += 8;
    }

    out
}

fn parse_escape(rest: &[char]) -> Option<u16> {
    if rest.len() < 8 || rest[0] != '_' || !matches!(rest[1], 'x' | 'X') || rest[6] != '_' {
        return None;
    }
    let hex: String = rest[2..6].iter().collect();
    u16::from_str_radix(&hex, 16).ok()
}
