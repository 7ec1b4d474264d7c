//! Text normalization shared by the matching strategies
//!
//! Listing and catalog text go through the same pipeline: lowercase, drop
//! parenthesized text, capacity tokens, connectivity variants and chip/part
//! codes, then split on anything that is not a letter or digit.

use once_cell::sync::Lazy;
use regex::Regex;
use strsim::jaro_winkler;

use crate::models::ExternalListing;

/// Minimum Jaro-Winkler similarity for two words to count as the same token
pub const WORD_SIMILARITY: f64 = 0.92;

/// Qualifiers that separate one commercial model from another
const VARIANT_TOKENS: &[&str] = &["pro", "max", "plus", "mini", "ultra", "lite", "fe", "air"];

static PARENTHESIZED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("parenthesized pattern"));

static CAPACITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d+(?:[.,]\d+)?)\s*(gb|tb)\b").expect("capacity pattern"));

static CONNECTIVITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(5g|4g|lte|wi-?fi|wlan|cellular|celular|dual[\s-]?sim|esim)\b")
        .expect("connectivity pattern")
});

static APPLE_A_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(a\d{4})\b").expect("A-number pattern"));

static SAMSUNG_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bsm-?([a-z])(\d{3,4})[a-z0-9]*\b").expect("SM- code pattern")
});

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("separator pattern"));

/// Lowercase and collapse every run of non-alphanumerics into one space
pub fn normalize_text(text: &str) -> String {
    NON_ALPHANUMERIC
        .replace_all(&text.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Remove everything that does not describe the model itself
pub fn strip_noise(text: &str) -> String {
    let text = PARENTHESIZED.replace_all(text, " ");
    let text = CAPACITY.replace_all(&text, " ");
    let text = CONNECTIVITY.replace_all(&text, " ");
    let text = APPLE_A_NUMBER.replace_all(&text, " ");
    SAMSUNG_CODE.replace_all(&text, " ").into_owned()
}

/// Descriptive tokens of a model name, without the brand and without noise
pub fn descriptive_tokens(text: &str, brand: &str) -> Vec<String> {
    let brand_tokens: Vec<String> = normalize_text(brand)
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut tokens: Vec<String> = Vec::new();
    for token in normalize_text(&strip_noise(text)).split_whitespace() {
        if brand_tokens.iter().any(|b| b == token) {
            continue;
        }
        if !tokens.iter().any(|t| t == token) {
            tokens.push(token.to_string());
        }
    }
    tokens
}

/// Canonical model key: descriptive tokens joined by single spaces
pub fn model_key(text: &str, brand: &str) -> String {
    descriptive_tokens(text, brand).join(" ")
}

/// Storage declared in free text ("128GB", "1 TB"). The largest value wins so
/// that RAM figures in the same string are ignored.
pub fn infer_storage_gb(text: &str) -> Option<u32> {
    CAPACITY
        .captures_iter(text)
        .filter_map(|caps| {
            let amount: f64 = caps.get(1)?.as_str().replace(',', ".").parse().ok()?;
            let unit = caps.get(2)?.as_str().to_lowercase();
            let gb = if unit == "tb" { amount * 1024.0 } else { amount };
            (gb >= 1.0).then(|| gb.round() as u32)
        })
        .max()
}

/// Apple model numbers ("A2633") found in the text, uppercased
pub fn apple_a_numbers(text: &str) -> Vec<String> {
    APPLE_A_NUMBER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_uppercase())
        .collect()
}

/// Samsung model code prefix ("SM-G991B" → "SM-G991")
pub fn samsung_code_prefix(text: &str) -> Option<String> {
    let caps = SAMSUNG_CODE.captures(text)?;
    let series = caps.get(1)?.as_str().to_uppercase();
    let number = caps.get(2)?.as_str();
    Some(format!("SM-{}{}", series, number))
}

/// Storage used for a listing: declared, else read from the raw text
pub fn effective_storage(listing: &ExternalListing) -> (Option<u32>, bool) {
    match listing.storage_gb {
        Some(gb) => (Some(gb), false),
        None => {
            let inferred = infer_storage_gb(&listing.model_raw)
                .or_else(|| infer_storage_gb(&listing.model_norm));
            (inferred, inferred.is_some())
        }
    }
}

/// Knowledge Base key of a listing: `brand|model key|storage`
pub fn signature(listing: &ExternalListing) -> String {
    let storage = match effective_storage(listing).0 {
        Some(gb) => format!("{}gb", gb),
        None => "na".to_string(),
    };
    format!(
        "{}|{}|{}",
        normalize_text(&listing.brand),
        model_key(listing.match_text(), &listing.brand),
        storage
    )
}

pub fn is_numeric_token(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
}

pub fn is_variant_token(token: &str) -> bool {
    VARIANT_TOKENS.contains(&token)
}

/// Similarity of two short fields (brand, device family): 1.0 when equal
/// after normalization, the Jaro-Winkler score when close, otherwise 0
pub fn field_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let score = jaro_winkler(&a, &b);
    if score >= WORD_SIMILARITY {
        score
    } else {
        0.0
    }
}

fn tokens_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if is_numeric_token(a) || is_numeric_token(b) {
        return false;
    }
    jaro_winkler(a, b) >= WORD_SIMILARITY
}

/// Dice coefficient over descriptive tokens
///
/// Words match on Jaro-Winkler ≥ 0.92, tokens carrying digits only on
/// equality. Returns `None` when the two names name different models: a
/// variant qualifier present on one side only, or unmatched model numbers
/// on both sides.
pub fn token_dice(left: &[String], right: &[String]) -> Option<f64> {
    if left.is_empty() || right.is_empty() {
        return Some(0.0);
    }

    let mut used = vec![false; right.len()];
    let mut matched = 0usize;
    let mut left_unmatched = Vec::new();

    for token in left {
        let hit = right
            .iter()
            .enumerate()
            .find(|(i, candidate)| !used[*i] && tokens_match(token, candidate));
        match hit {
            Some((i, _)) => {
                used[i] = true;
                matched += 1;
            }
            None => left_unmatched.push(token.as_str()),
        }
    }

    let right_unmatched: Vec<&str> = right
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(t, _)| t.as_str())
        .collect();

    let variant_conflict = left_unmatched
        .iter()
        .chain(right_unmatched.iter())
        .any(|t| is_variant_token(t));
    let number_conflict = left_unmatched.iter().any(|t| is_numeric_token(t))
        && right_unmatched.iter().any(|t| is_numeric_token(t));
    if variant_conflict || number_conflict {
        return None;
    }

    Some((2 * matched) as f64 / (left.len() + right.len()) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeedListing, Price};

    fn tokens(text: &str) -> Vec<String> {
        descriptive_tokens(text, "Apple")
    }

    fn listing(raw: &str, norm: &str, storage: Option<u32>) -> ExternalListing {
        ExternalListing::from_feed(
            1,
            FeedListing {
                modelo_raw: raw.to_string(),
                modelo_norm: norm.to_string(),
                tipo: "Smartphone".to_string(),
                marca: "Apple".to_string(),
                almacenamiento_gb: storage,
                precio_b2b: Price::from_units(450.0),
                vendor_code: None,
                year: None,
                cpu: None,
            },
        )
    }

    #[test]
    fn noise_is_stripped() {
        assert_eq!(
            tokens("Apple iPhone 13 Pro 5G 256GB (A2638) Dual-SIM"),
            vec!["iphone", "13", "pro"]
        );
        assert_eq!(
            descriptive_tokens("Samsung Galaxy S21 SM-G991B/DS LTE", "Samsung"),
            vec!["galaxy", "s21", "ds"]
        );
        assert_eq!(tokens("iPad Air Wi-Fi + Cellular"), vec!["ipad", "air"]);
    }

    #[test]
    fn storage_inference() {
        assert_eq!(infer_storage_gb("iPhone 13 128GB"), Some(128));
        assert_eq!(infer_storage_gb("MacBook Pro 1 TB"), Some(1024));
        assert_eq!(infer_storage_gb("Galaxy A52 6GB RAM 128 GB"), Some(128));
        assert_eq!(infer_storage_gb("iPhone 13"), None);
    }

    #[test]
    fn vendor_codes_are_extracted() {
        assert_eq!(apple_a_numbers("iPhone 13 a2633 / A2482"), vec!["A2633", "A2482"]);
        assert_eq!(samsung_code_prefix("Galaxy S21 SM-G991B"), Some("SM-G991".into()));
        assert_eq!(samsung_code_prefix("Galaxy S21 smg991u1"), Some("SM-G991".into()));
        assert_eq!(samsung_code_prefix("Galaxy S21"), None);
    }

    #[test]
    fn signature_uses_declared_then_inferred_storage() {
        let declared = listing("Apple iPhone 13 (A2633)", "iPhone 13", Some(128));
        assert_eq!(signature(&declared), "apple|iphone 13|128gb");

        let inferred = listing("iPhone 13 256GB", "iPhone 13", None);
        assert_eq!(signature(&inferred), "apple|iphone 13|256gb");

        let unknown = listing("iPhone 13", "iPhone 13", None);
        assert_eq!(signature(&unknown), "apple|iphone 13|na");
    }

    #[test]
    fn dice_rejects_conflicting_model_numbers() {
        assert_eq!(token_dice(&tokens("iPhone 13"), &tokens("iPhone 13")), Some(1.0));
        assert_eq!(token_dice(&tokens("iPhone 13"), &tokens("iPhone 12")), None);
        assert_eq!(token_dice(&tokens("iPhone 13 Pro"), &tokens("iPhone 13")), None);
    }

    #[test]
    fn dice_tolerates_typos_in_words() {
        let score = token_dice(&tokens("iPhone 13 Midnigth"), &tokens("iPhone 13 Midnight"));
        assert_eq!(score, Some(1.0));

        let partial = token_dice(&tokens("iPhone SE 2020"), &tokens("iPhone SE")).unwrap();
        assert!((partial - 0.8).abs() < 1e-9);
    }

    #[test]
    fn field_similarity_bounds() {
        assert_eq!(field_similarity("Apple", "APPLE"), 1.0);
        assert_eq!(field_similarity("Apple", "Samsung"), 0.0);
        assert_eq!(field_similarity("", "Apple"), 0.0);
    }
}
