//! Phone number and WhatsApp JID helpers.

use std::sync::LazyLock;

use regex::Regex;

const WHATSAPP_USER_SUFFIX: &str = "@s.whatsapp.net";
const WHATSAPP_GROUP_SUFFIX: &str = "@g.us";

static PHONE_LIST_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,;\n\r\t]+").expect("static regex"));

/// Digits-only form of a phone number or JID. `None` when no digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let local = raw.split('@').next().unwrap_or(raw);
    let digits = local
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if digits.len() < 6 {
        None
    } else {
        Some(digits)
    }
}

pub fn whatsapp_jid(digits: &str) -> String {
    format!("{digits}{WHATSAPP_USER_SUFFIX}")
}

pub fn is_group_jid(jid: &str) -> bool {
    jid.ends_with(WHATSAPP_GROUP_SUFFIX)
}

/// Every spelling under which a contact may have been stored.
pub fn phone_candidates(raw: &str) -> Vec<String> {
    let Some(digits) = normalize_phone(raw) else {
        return Vec::new();
    };
    let mut candidates = vec![
        digits.clone(),
        format!("+{digits}"),
        whatsapp_jid(&digits),
    ];
    let trimmed = raw.trim().to_string();
    if !candidates.contains(&trimmed) {
        candidates.push(trimmed);
    }
    candidates
}

/// Split a pasted CSV-style list into normalized numbers, keeping first occurrences.
pub fn parse_phone_list(raw: &str) -> Vec<String> {
    let mut seen = Vec::<String>::new();
    for part in PHONE_LIST_SEPARATOR.split(raw) {
        if let Some(digits) = normalize_phone(part) {
            if !seen.contains(&digits) {
                seen.push(digits);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_formatting_and_jid_suffix() {
        assert_eq!(normalize_phone("+55 (11) 98888-7777").as_deref(), Some("5511988887777"));
        assert_eq!(
            normalize_phone("5511988887777@s.whatsapp.net").as_deref(),
            Some("5511988887777")
        );
        assert_eq!(normalize_phone("n/a"), None);
        assert_eq!(normalize_phone("123"), None);
    }

    #[test]
    fn test_candidates_cover_stored_spellings() {
        let candidates = phone_candidates("+1 555 010 9999");
        assert!(candidates.contains(&"15550109999".to_string()));
        assert!(candidates.contains(&"+15550109999".to_string()));
        assert!(candidates.contains(&"15550109999@s.whatsapp.net".to_string()));
        assert!(candidates.contains(&"+1 555 010 9999".to_string()));
        assert!(phone_candidates("none").is_empty());
    }

    #[test]
    fn test_phone_list_dedupes_and_drops_garbage() {
        let list = parse_phone_list("5511999990000, +55 11 99999-0000;\n447700900123\nabc\n\n");
        assert_eq!(list, vec!["5511999990000", "447700900123"]);
    }

    #[test]
    fn test_group_jid_detection() {
        assert!(is_group_jid("120363025@g.us"));
        assert!(!is_group_jid("5511999990000@s.whatsapp.net"));
    }
}
