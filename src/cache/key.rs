//! Deterministic cache-key derivation

/// Reserved prefix marking every key that belongs to the response cache
pub const CACHE_KEY_PREFIX: &str = "cache:";

/// Builds the canonical cache key for an operation and its parameters
///
/// The key has the form `cache:<operation>?<name>=<value>&...`. Parameters
/// are sorted by name (then value) so construction order never matters, and
/// the separator characters are percent-escaped so distinct parameter sets
/// cannot produce the same key.
pub fn build_key<I, K, V>(operation: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .map(|(k, v)| (escape(k.as_ref()), escape(v.as_ref())))
        .collect();
    pairs.sort();

    let mut key = format!("{}{}", CACHE_KEY_PREFIX, escape(operation));
    for (i, (name, value)) in pairs.iter().enumerate() {
        key.push(if i == 0 { '?' } else { '&' });
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    key
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            '?' => out.push_str("%3F"),
            _ => out.push(c),
        }
    }
    out
}
