use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};

use crate::domain::{Nid, NormalizedRecall, RawRecallRecord};
use crate::error::ParseError;

pub const NID_COLUMNS: &[&str] = &["NID"];
pub const TITLE_COLUMNS: &[&str] = &["Title"];
pub const URL_COLUMNS: &[&str] = &["URL", "Link"];
pub const PRODUCT_COLUMNS: &[&str] = &["Product"];
pub const ISSUE_COLUMNS: &[&str] = &["Issue"];
pub const CLASS_COLUMNS: &[&str] = &["Recall class", "Class"];
pub const LAST_UPDATED_COLUMNS: &[&str] = &["Last updated", "Date published"];

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));").unwrap());
static PRODUCT_AFTER_IN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bin (.*)").unwrap());
static PRODUCT_BEFORE_TRIGGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(.*?)\s*(recalled due to|recalled|may contain|may be contaminated with|due to|possible contamination with|possible presence of|may be unsafe)",
    )
    .unwrap()
});
static ECOLI_O157_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(e\.\s*coli)\s+(o157:h7)$").unwrap());
static FOOD_ISSUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)salmonella|listeria|e\.\s*coli").unwrap());
static NON_FOOD_ISSUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)listeria - medical devices").unwrap());

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Turns one scraped record into the canonical field set.
pub fn normalize(raw: &RawRecallRecord) -> Result<NormalizedRecall, ParseError> {
    let nid_text = raw.get(NID_COLUMNS).map(clean_text);
    let title = raw.get(TITLE_COLUMNS).map(clean_text).unwrap_or_default();
    let reject = |reason: String| {
        ParseError::new(
            nid_text.as_deref(),
            Some(title.as_str()).filter(|t| !t.is_empty()),
            reason,
        )
    };

    let nid: Nid = match nid_text.as_deref() {
        Some(text) => text
            .parse()
            .map_err(|err: ParseError| reject(err.reason))?,
        None => return Err(reject("missing NID".to_string())),
    };
    if title.is_empty() {
        return Err(reject("missing title".to_string()));
    }

    let last_updated_text = raw.get(LAST_UPDATED_COLUMNS).map(clean_text).unwrap_or_default();
    let last_updated = parse_date(&last_updated_text)
        .ok_or_else(|| reject(format!("unparseable last updated date {last_updated_text:?}")))?;

    let url = raw.get(URL_COLUMNS).map(clean_text).unwrap_or_default();
    let product = raw
        .get(PRODUCT_COLUMNS)
        .map(clean_text)
        .filter(|product| !product.is_empty())
        .or_else(|| extract_product_name(&title))
        .unwrap_or_else(|| title.clone());
    let issue = canonical_issue(&raw.get(ISSUE_COLUMNS).map(clean_text).unwrap_or_default());
    let class_text = raw.get(CLASS_COLUMNS).map(clean_text).unwrap_or_default();

    Ok(NormalizedRecall {
        nid,
        title,
        url,
        product,
        issue,
        class_text,
        last_updated,
    })
}

/// Strips markup and control characters and collapses whitespace.
pub fn clean_text(value: &str) -> String {
    // Escaped markup (`&lt;b&gt;`) is decoded first so it gets stripped too.
    let decoded = decode_entities(value);
    let without_tags = TAG_RE.replace_all(&decoded, " ");
    let printable = without_tags
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .filter(|ch| *ch != '\u{feff}' && *ch != '\u{200b}')
        .collect::<String>();
    WHITESPACE_RE
        .replace_all(printable.trim(), " ")
        .into_owned()
}

fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    let numeric = NUMERIC_ENTITY_RE.replace_all(value, |caps: &Captures<'_>| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            (None, None) => None,
        };
        match code.and_then(char::from_u32) {
            Some(ch) => ch.to_string(),
            None => caps[0].to_string(),
        }
    });
    numeric
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&rsquo;", "'")
        .replace("&lsquo;", "'")
        .replace("&eacute;", "é")
        .replace("&egrave;", "è")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.date_naive());
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.date());
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// Product name recovered from a title such as
/// `"Undeclared milk in Brand X cookies"` or `"Brand X cheese recalled due to Listeria"`.
pub fn extract_product_name(title: &str) -> Option<String> {
    if let Some(captures) = PRODUCT_AFTER_IN_RE.captures(title) {
        let product = captures.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if !product.is_empty() {
            return Some(product.to_string());
        }
    }
    PRODUCT_BEFORE_TRIGGER_RE
        .captures(title)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|product| !product.is_empty())
}

/// `"E. Coli O157:H7"` is written `"E. Coli - O157:H7"` so the strain lands
/// in its own issue segment.
pub fn canonical_issue(issue: &str) -> String {
    ECOLI_O157_RE.replace(issue, "$1 - $2").into_owned()
}

/// Food-safety recalls are the ones naming Salmonella, Listeria or E. coli,
/// excluding Listeria notices about medical devices.
pub fn is_food_recall(raw: &RawRecallRecord) -> bool {
    let issue = raw.get(ISSUE_COLUMNS).unwrap_or_default();
    FOOD_ISSUE_RE.is_match(issue) && !NON_FOOD_ISSUE_RE.is_match(issue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_strips_markup() {
        assert_eq!(
            clean_text("  <p>Brand&nbsp;X&amp;Y</p>\t\r\n cheese\u{0007} "),
            "Brand X&Y cheese"
        );
    }

    #[test]
    fn clean_text_decodes_numeric_and_escaped_markup() {
        assert_eq!(clean_text("Caf&#233; P&#xE2;t&#233;"), "Café Pâté");
        assert_eq!(clean_text("Brand&#8217;s &lt;b&gt;hummus&lt;/b&gt;"), "Brand\u{2019}s hummus");
        assert_eq!(clean_text("Fish &amp;#233; chips"), "Fish &#233; chips");
        assert_eq!(clean_text("bad &#1114112; code"), "bad &#1114112; code");
    }

    #[test]
    fn canonical_issue_splits_o157() {
        assert_eq!(canonical_issue("E. Coli O157:H7"), "E. Coli - O157:H7");
        assert_eq!(canonical_issue("Listeria - Food"), "Listeria - Food");
    }

    #[test]
    fn parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(parse_date("2024-03-09"), Some(expected));
        assert_eq!(parse_date("2024/03/09"), Some(expected));
        assert_eq!(parse_date("03/09/2024"), Some(expected));
        assert_eq!(parse_date("2024-03-09 14:22:01"), Some(expected));
        assert_eq!(parse_date("2024-03-09T14:22:01-05:00"), Some(expected));
        assert_eq!(parse_date("March 9, 2024"), Some(expected));
        assert_eq!(parse_date("N/A"), None);
    }
}
