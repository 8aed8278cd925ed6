use std::collections::HashSet;

use itertools::Itertools;
use rand::distr::Alphanumeric;
use rand::Rng;

const CANARY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Random lowercase canary used as a per-probe anchor. Always long enough to
/// be counted as reflection evidence.
pub fn generate_canary() -> String {
    let mut rng = rand::rng();
    let len = rng.random_range(6..=10);
    let mut out: String = (0..len)
        .map(|_| CANARY_ALPHABET[rng.random_range(0..CANARY_ALPHABET.len())] as char)
        .collect();
    out.push(char::from(b'0' + rng.random_range(0..9u8)));
    out
}

pub fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// One candidate per line, trimmed. Blank lines are dropped and the first
/// occurrence of a duplicate wins.
pub fn parse_wordlist(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .unique()
        .collect()
}

pub fn parse_csv_list(value: &str) -> Result<Vec<String>, String> {
    let raw = value.trim();
    if raw.is_empty() {
        return Err("list is empty".to_string());
    }
    let mut out: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for part in raw.split(',') {
        let item = part.trim();
        if item.is_empty() {
            continue;
        }
        if seen.insert(item.to_ascii_lowercase()) {
            out.push(item.to_string());
        }
    }
    if out.is_empty() {
        return Err("list is empty".to_string());
    }
    Ok(out)
}

pub fn parse_http_method(value: &str) -> Result<reqwest::Method, String> {
    let item = value.trim();
    if item.is_empty() {
        return Err("method is empty".to_string());
    }
    let canonical = item.to_ascii_uppercase();
    reqwest::Method::from_bytes(canonical.as_bytes()).map_err(|_| format!("invalid method '{item}'"))
}
