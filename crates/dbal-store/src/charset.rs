//! Encoding names, dialect charset tokens and best-effort text conversion.

use std::borrow::Cow;

/// Textual encoding name → MySQL charset token.
const MYSQL_CHARSETS: &[(&str, &str)] = &[
    ("utf-8", "utf8"),
    ("utf8", "utf8"),
    ("utf8mb4", "utf8mb4"),
    ("iso-8859-1", "latin1"),
    ("latin1", "latin1"),
    ("windows-1252", "latin1"),
    ("cp1252", "latin1"),
    ("iso-8859-2", "latin2"),
    ("latin2", "latin2"),
    ("iso-8859-7", "greek"),
    ("iso-8859-8", "hebrew"),
    ("iso-8859-9", "latin5"),
    ("iso-8859-13", "latin7"),
    ("windows-1250", "cp1250"),
    ("cp1250", "cp1250"),
    ("windows-1251", "cp1251"),
    ("cp1251", "cp1251"),
    ("windows-1256", "cp1256"),
    ("windows-1257", "cp1257"),
    ("koi8-r", "koi8r"),
    ("koi8-u", "koi8u"),
    ("us-ascii", "ascii"),
    ("ascii", "ascii"),
    ("big5", "big5"),
    ("gbk", "gbk"),
    ("gb2312", "gb2312"),
    ("gb18030", "gb18030"),
    ("euc-jp", "ujis"),
    ("shift_jis", "sjis"),
    ("sjis", "sjis"),
    ("euc-kr", "euckr"),
];

/// MySQL charset token for an encoding name. Unrecognised names yield `None`.
pub fn mysql_charset(encoding: &str) -> Option<&'static str> {
    let wanted = encoding.trim().to_ascii_lowercase();
    MYSQL_CHARSETS
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, charset)| *charset)
}

/// Whether `encoding` names UTF-8 (`utf-8`, `utf8`, `utf8mb4`).
pub fn is_utf8(encoding: &str) -> bool {
    matches!(mysql_charset(encoding), Some("utf8" | "utf8mb4"))
}

/// MySQL introducer for literals in `encoding`. UTF-8 text always travels as
/// `utf8mb4`, matching the session charset.
pub fn mysql_introducer(encoding: &str) -> Option<&'static str> {
    if is_utf8(encoding) {
        Some("utf8mb4")
    } else {
        mysql_charset(encoding)
    }
}

/// SQLite's `PRAGMA encoding` answer (`UTF-8`, `UTF-16le`, ...) as a label.
pub fn normalize_sqlite_encoding(pragma: &str) -> String {
    pragma.trim().to_ascii_lowercase()
}

/// Encoding of the process locale, from `LC_ALL`, `LC_CTYPE` or `LANG`
/// (`en_US.UTF-8` → `utf-8`). Falls back to `utf-8`.
///
/// `lookup` reads a variable; pass `|var| std::env::var(var).ok()` for the
/// process environment.
pub fn ambient_encoding(lookup: impl Fn(&str) -> Option<String>) -> String {
    ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|var| lookup(var))
        .find(|v| !v.is_empty())
        .and_then(|locale| locale_codeset(&locale))
        .unwrap_or_else(|| "utf-8".to_string())
}

/// The configured encoding, or the locale's when none is set.
pub fn configured_or_ambient(
    configured: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> String {
    match configured.map(str::trim).filter(|e| !e.is_empty()) {
        Some(encoding) => encoding.to_string(),
        None => ambient_encoding(lookup),
    }
}

fn locale_codeset(locale: &str) -> Option<String> {
    let codeset = locale.split_once('.')?.1;
    let codeset = codeset.split('@').next().unwrap_or(codeset).to_ascii_lowercase();
    match codeset.as_str() {
        "" => None,
        "utf8" => Some("utf-8".to_string()),
        _ => Some(codeset),
    }
}

/// Decode raw bytes of unknown origin. Valid UTF-8 is kept; anything else is
/// read as 7-bit ASCII with every non-ASCII byte replaced by `?`.
pub fn decode_detected(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => Cow::Owned(
            bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '?' })
                .collect(),
        ),
    }
}

/// Restrict `text` to what `target` can represent by encoding and decoding it
/// again. Unmappable characters become numeric character references. An
/// unknown target label leaves the text untouched.
pub fn convert_to(text: &str, target: &str) -> String {
    let Some(encoding) = encoding_rs::Encoding::for_label(target.trim().as_bytes()) else {
        return text.to_string();
    };
    if encoding == encoding_rs::UTF_8 {
        return text.to_string();
    }
    let (bytes, used, _) = encoding.encode(text);
    let (decoded, _) = used.decode_without_bom_handling(&bytes);
    decoded.into_owned()
}

/// Bytes of `text` in the `target` encoding. Unmappable characters become
/// numeric character references; UTF-8 and unknown labels keep the UTF-8
/// bytes.
pub fn encode(text: &str, target: &str) -> Vec<u8> {
    match encoding_rs::Encoding::for_label(target.trim().as_bytes()) {
        Some(encoding) if encoding != encoding_rs::UTF_8 => encoding.encode(text).0.into_owned(),
        _ => text.as_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_charsets() {
        assert_eq!(mysql_charset("utf-8"), Some("utf8"));
        assert_eq!(mysql_charset("UTF-8"), Some("utf8"));
        assert_eq!(mysql_charset("iso-8859-1"), Some("latin1"));
        assert_eq!(mysql_charset(" koi8-r "), Some("koi8r"));
        assert_eq!(mysql_charset("shift_jis"), Some("sjis"));
    }

    #[test]
    fn unknown_charset_is_none() {
        assert_eq!(mysql_charset("klingon"), None);
        assert_eq!(mysql_charset(""), None);
    }

    #[test]
    fn sqlite_pragma_normalized() {
        assert_eq!(normalize_sqlite_encoding("UTF-8"), "utf-8");
        assert_eq!(normalize_sqlite_encoding("UTF-16le"), "utf-16le");
    }

    #[test]
    fn locale_codeset_parsing() {
        assert_eq!(locale_codeset("en_US.UTF-8").as_deref(), Some("utf-8"));
        assert_eq!(locale_codeset("de_DE.utf8").as_deref(), Some("utf-8"));
        assert_eq!(locale_codeset("fr_FR.ISO-8859-1@euro").as_deref(), Some("iso-8859-1"));
        assert_eq!(locale_codeset("C"), None);
    }

    #[test]
    fn introducer_prefers_utf8mb4() {
        assert_eq!(mysql_introducer("UTF-8"), Some("utf8mb4"));
        assert_eq!(mysql_introducer("utf8"), Some("utf8mb4"));
        assert_eq!(mysql_introducer("iso-8859-1"), Some("latin1"));
        assert_eq!(mysql_introducer("klingon"), None);
        assert!(!is_utf8("latin1"));
    }

    fn locale(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name: &str| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn ambient_encoding_follows_locale_precedence() {
        assert_eq!(
            ambient_encoding(locale(&[("LANG", "de_DE.ISO-8859-1"), ("LC_ALL", "ru_RU.KOI8-R")])),
            "koi8-r"
        );
        assert_eq!(
            ambient_encoding(locale(&[("LC_ALL", ""), ("LC_CTYPE", "ja_JP.eucJP")])),
            "eucjp"
        );
        assert_eq!(ambient_encoding(locale(&[("LANG", "C")])), "utf-8");
        assert_eq!(ambient_encoding(locale(&[])), "utf-8");
    }

    #[test]
    fn unconfigured_encoding_falls_back_to_locale() {
        let lookup = locale(&[("LANG", "fr_FR.ISO-8859-1")]);
        assert_eq!(configured_or_ambient(None, &lookup), "iso-8859-1");
        assert_eq!(configured_or_ambient(Some("  "), &lookup), "iso-8859-1");
        assert_eq!(configured_or_ambient(Some("cp1251"), &lookup), "cp1251");
    }

    #[test]
    fn encode_to_latin1_bytes() {
        assert_eq!(encode("café", "iso-8859-1"), b"caf\xE9".to_vec());
        assert_eq!(encode("a日", "latin1"), b"a&#26085;".to_vec());
        assert_eq!(encode("é", "utf-8"), "é".as_bytes().to_vec());
    }

    #[test]
    fn utf8_bytes_are_kept() {
        assert_eq!(decode_detected("héllo".as_bytes()), "héllo");
    }

    #[test]
    fn undetectable_bytes_fall_back_to_ascii() {
        assert_eq!(decode_detected(&[b'a', 0xE9, b'b', 0xFF]), "a?b?");
    }

    #[test]
    fn convert_to_utf8_is_identity() {
        assert_eq!(convert_to("日本", "utf-8"), "日本");
    }

    #[test]
    fn convert_to_latin1_keeps_representable_text() {
        assert_eq!(convert_to("café", "iso-8859-1"), "café");
    }

    #[test]
    fn convert_to_latin1_replaces_unmappable() {
        assert_eq!(convert_to("a日", "iso-8859-1"), "a&#26085;");
    }

    #[test]
    fn convert_to_unknown_label_is_identity() {
        assert_eq!(convert_to("x日", "klingon"), "x日");
    }
}
