//! Lenient readers for loosely-typed JSON coming back from the portal.

use serde_json::Value;

/// Render a scalar JSON value as trimmed text.
///
/// Strings are trimmed, numbers and booleans are stringified, everything else
/// (null, arrays, objects) yields `None`. Empty results also yield `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    if text.is_empty() { None } else { Some(text) }
}

/// First non-empty scalar among `keys`, in order.
pub fn first_text(row: &Value, keys: &[String]) -> Option<String> {
    keys.iter()
        .filter_map(|key| row.get(key.as_str()))
        .find_map(scalar_text)
}

/// Read a count that may arrive as a number or a numeric string.
pub fn lenient_count(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decode the HTML entities the portal leaves in description text.
///
/// Numeric references are decoded in full. Named ones cover the HTML 4 set
/// minus arrows and math symbols; anything else is left verbatim.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&tail[1..end]).map(|ch| (ch, end)));
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Latin-1 supplement names, U+00A0 through U+00FF.
const LATIN1_ENTITIES: [&str; 96] = [
    "nbsp", "iexcl", "cent", "pound", "curren", "yen", "brvbar", "sect",
    "uml", "copy", "ordf", "laquo", "not", "shy", "reg", "macr",
    "deg", "plusmn", "sup2", "sup3", "acute", "micro", "para", "middot",
    "cedil", "sup1", "ordm", "raquo", "frac14", "frac12", "frac34", "iquest",
    "Agrave", "Aacute", "Acirc", "Atilde", "Auml", "Aring", "AElig", "Ccedil",
    "Egrave", "Eacute", "Ecirc", "Euml", "Igrave", "Iacute", "Icirc", "Iuml",
    "ETH", "Ntilde", "Ograve", "Oacute", "Ocirc", "Otilde", "Ouml", "times",
    "Oslash", "Ugrave", "Uacute", "Ucirc", "Uuml", "Yacute", "THORN", "szlig",
    "agrave", "aacute", "acirc", "atilde", "auml", "aring", "aelig", "ccedil",
    "egrave", "eacute", "ecirc", "euml", "igrave", "iacute", "icirc", "iuml",
    "eth", "ntilde", "ograve", "oacute", "ocirc", "otilde", "ouml", "divide",
    "oslash", "ugrave", "uacute", "ucirc", "uuml", "yacute", "thorn", "yuml",
];

/// Greek capitals from U+0391; the lowercase run at U+03B1 uses the same
/// names with the first letter lowered. U+03A2 is unassigned.
const GREEK_ENTITIES: [&str; 25] = [
    "Alpha", "Beta", "Gamma", "Delta", "Epsilon", "Zeta", "Eta", "Theta", "Iota",
    "Kappa", "Lambda", "Mu", "Nu", "Xi", "Omicron", "Pi", "Rho", "",
    "Sigma", "Tau", "Upsilon", "Phi", "Chi", "Psi", "Omega",
];

/// Named entities from the HTML 4 set: the XML five, Latin-1, Greek letters
/// and typographic punctuation. Arrows and math operators are left as is.
fn decode_entity(name: &str) -> Option<char> {
    let code = match name {
        "amp" => 0x26,
        "lt" => 0x3C,
        "gt" => 0x3E,
        "quot" => 0x22,
        "apos" => 0x27,
        "OElig" => 0x152,
        "oelig" => 0x153,
        "Scaron" => 0x160,
        "scaron" => 0x161,
        "Yuml" => 0x178,
        "fnof" => 0x192,
        "circ" => 0x2C6,
        "tilde" => 0x2DC,
        "sigmaf" => 0x3C2,
        "thetasym" => 0x3D1,
        "upsih" => 0x3D2,
        "piv" => 0x3D6,
        "ensp" => 0x2002,
        "emsp" => 0x2003,
        "thinsp" => 0x2009,
        "zwnj" => 0x200C,
        "zwj" => 0x200D,
        "lrm" => 0x200E,
        "rlm" => 0x200F,
        "ndash" => 0x2013,
        "mdash" => 0x2014,
        "lsquo" => 0x2018,
        "rsquo" => 0x2019,
        "sbquo" => 0x201A,
        "ldquo" => 0x201C,
        "rdquo" => 0x201D,
        "bdquo" => 0x201E,
        "dagger" => 0x2020,
        "Dagger" => 0x2021,
        "bull" => 0x2022,
        "hellip" => 0x2026,
        "permil" => 0x2030,
        "prime" => 0x2032,
        "Prime" => 0x2033,
        "lsaquo" => 0x2039,
        "rsaquo" => 0x203A,
        "oline" => 0x203E,
        "frasl" => 0x2044,
        "euro" => 0x20AC,
        "trade" => 0x2122,
        _ => return numeric_entity(name).or_else(|| table_entity(name)),
    };
    char::from_u32(code)
}

fn numeric_entity(name: &str) -> Option<char> {
    let num = name.strip_prefix('#')?;
    let code = match num.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => num.parse().ok()?,
    };
    char::from_u32(code)
}

fn table_entity(name: &str) -> Option<char> {
    if let Some(idx) = LATIN1_ENTITIES.iter().position(|&n| n == name) {
        return char::from_u32(0xA0 + idx as u32);
    }
    let first = name.chars().next()?;
    let capital = format!("{}{}", first.to_ascii_uppercase(), &name[first.len_utf8()..]);
    let idx = GREEK_ENTITIES
        .iter()
        .position(|&n| !n.is_empty() && n == capital)?;
    let base = if first.is_ascii_uppercase() { 0x391 } else { 0x3B1 };
    char::from_u32(base + idx as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_text_trims_and_stringifies() {
        assert_eq!(scalar_text(&json!("  abc ")), Some("abc".into()));
        assert_eq!(scalar_text(&json!(42)), Some("42".into()));
        assert_eq!(scalar_text(&json!("   ")), None);
        assert_eq!(scalar_text(&json!(null)), None);
        assert_eq!(scalar_text(&json!({"value": 1})), None);
    }

    #[test]
    fn first_text_skips_empty_candidates() {
        let row = json!({"A": "", "B": null, "C": 7});
        let keys = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        assert_eq!(first_text(&row, &keys), Some("7".into()));
    }

    #[test]
    fn lenient_count_accepts_strings() {
        assert_eq!(lenient_count(&json!(12)), Some(12));
        assert_eq!(lenient_count(&json!(" 30 ")), Some(30));
        assert_eq!(lenient_count(&json!("x")), None);
    }

    #[test]
    fn entities_decoded() {
        assert_eq!(decode_entities("A &amp; B"), "A & B");
        assert_eq!(decode_entities("&quot;x&quot; &#39;y&#39;"), "\"x\" 'y'");
        assert_eq!(decode_entities("&#x3A9;"), "Ω");
        assert_eq!(decode_entities("fish & chips"), "fish & chips");
        assert_eq!(decode_entities("&unknown;"), "&unknown;");
    }

    #[test]
    fn named_entities_cover_accents_and_greek() {
        assert_eq!(decode_entities("caf&eacute; &Agrave;"), "café À");
        assert_eq!(decode_entities("&Alpha;&beta;&Omega;&omega;"), "ΑβΩω");
        assert_eq!(decode_entities("&sigmaf; &sigma; &Sigma;"), "ς σ Σ");
        assert_eq!(decode_entities("&laquo;x&raquo; &ndash; &euro;5&hellip;"), "«x» – €5…");
        assert_eq!(decode_entities("a&nbsp;b &yuml;"), "a\u{a0}b ÿ");
        assert_eq!(decode_entities("&rarr; &Eacute"), "&rarr; &Eacute");
    }
}
