//! Canonical fingerprint of a race's runner/jockey lineup.
//!
//! Virtual races re-air under different broadcast slots; the only stable
//! identity across those airings is the lineup itself. The signature is
//! order-independent and ignores casing and punctuation noise, so two scrapes
//! of the same race always agree even when the card arrives shuffled or with
//! OCR artefacts in the names.

/// Uppercase, keep ASCII letters/digits/whitespace, trim and collapse
/// whitespace runs to single spaces. Empty or absent input normalizes to "".
fn normalize(raw: &str) -> String {
    raw.to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compute the signature for a lineup of (horse, jockey) pairs.
///
/// Runners whose normalized name is empty contribute nothing. The pair tokens
/// are sorted before joining, which makes the result independent of the order
/// the scraper happened to read the card in. An empty lineup yields "".
pub fn compute_signature<'a, I>(lineup: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<String> = lineup
        .into_iter()
        .filter_map(|(name, jockey)| {
            let horse = normalize(name);
            if horse.is_empty() {
                return None;
            }
            Some(format!("{}:{}", horse, normalize(jockey)))
        })
        .collect();

    pairs.sort();
    pairs.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("O'Brien"), "OBRIEN");
        assert_eq!(normalize("  fast   nag "), "FAST NAG");
        assert_eq!(normalize("J. Smith-Jones"), "J SMITHJONES");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("!!!"), "");
    }

    #[test]
    fn test_signature_order_independent() {
        let a = compute_signature(vec![("Fast Nag", "J Smith"), ("Slow Coach", "P O'Brien")]);
        let b = compute_signature(vec![("Slow Coach", "P O'Brien"), ("Fast Nag", "J Smith")]);
        assert_eq!(a, b);
        assert_eq!(a, "FAST NAG:J SMITH|SLOW COACH:P OBRIEN");
    }

    #[test]
    fn test_signature_case_and_punctuation_invariant() {
        let a = compute_signature(vec![("O'Brien's Pride", "j smith")]);
        let b = compute_signature(vec![("OBRIENS PRIDE", "J SMITH")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_skips_empty_names() {
        let sig = compute_signature(vec![("", "J Smith"), ("Fast Nag", "")]);
        assert_eq!(sig, "FAST NAG:");
    }

    #[test]
    fn test_signature_empty_lineup() {
        assert_eq!(compute_signature(Vec::<(&str, &str)>::new()), "");
        // All-noise names filter down to the empty signature as well.
        assert_eq!(compute_signature(vec![("???", "J Smith")]), "");
    }
}
