//! Size-based variant resolution.
//!
//! Variants are grouped by size label, then each requested size token is
//! mapped to a group in preference order.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::types::{ParseFailure, Variant};

/// Where a site keeps the size label of a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRule {
    /// 1-based variant option carrying the size.
    #[serde(default = "default_option")]
    pub option: usize,
    /// Separator for the title fallback; the first segment is the size.
    #[serde(default = "default_separator")]
    pub title_separator: String,
}

fn default_option() -> usize {
    1
}

fn default_separator() -> String {
    " / ".to_string()
}

impl Default for SizeRule {
    fn default() -> Self {
        Self {
            option: default_option(),
            title_separator: default_separator(),
        }
    }
}

impl SizeRule {
    pub fn label(&self, variant: &Variant) -> String {
        match variant.option(self.option) {
            Some(label) if !label.trim().is_empty() => label.trim().to_string(),
            _ => variant
                .title
                .split(self.title_separator.as_str())
                .next()
                .unwrap_or_default()
                .trim()
                .to_string(),
        }
    }
}

const RANDOM: &str = "random";

struct SizeGroup<'a> {
    label: String,
    variants: Vec<&'a Variant>,
}

impl SizeGroup<'_> {
    fn available(&self) -> Vec<Variant> {
        self.variants
            .iter()
            .filter(|v| v.available)
            .map(|v| (*v).clone())
            .collect()
    }
}

fn group_by_label<'a>(variants: &'a [Variant], rule: &SizeRule) -> Vec<SizeGroup<'a>> {
    let mut groups: Vec<SizeGroup<'a>> = Vec::new();
    for variant in variants {
        let label = rule.label(variant);
        match groups.iter_mut().find(|g| g.label == label) {
            Some(group) => group.variants.push(variant),
            None => groups.push(SizeGroup {
                label,
                variants: vec![variant],
            }),
        }
    }
    groups
}

fn is_numeric_size(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
}

/// Numeric sizes match as a substring that is not part of a longer number.
///
/// This is narrower than a plain substring test: `"9"` matches `"US 9"` and
/// `"9 / 42"` but not `"9.5"` or `"19"`, so a half size is never bought in
/// place of the whole size.
fn numeric_matches(label: &str, size: &str) -> bool {
    let label = label.to_lowercase();
    let size = size.trim().to_lowercase();
    let is_number_char = |c: char| c.is_ascii_digit() || c == '.';

    label.match_indices(&size).any(|(start, _)| {
        let before = label[..start].chars().next_back();
        let after = label[start + size.len()..].chars().next();
        !before.is_some_and(is_number_char) && !after.is_some_and(is_number_char)
    })
}

/// Garment sizes prefix-match after trimming, against labels with no digits.
fn garment_matches(label: &str, size: &str) -> bool {
    let label = label.trim().to_lowercase();
    let size = size.trim().to_lowercase();
    !size.is_empty() && !is_numeric_size(&label) && label.starts_with(&size)
}

fn size_matches(label: &str, size: &str) -> bool {
    if is_numeric_size(size) {
        numeric_matches(label, size)
    } else {
        garment_matches(label, size)
    }
}

/// Resolve which variants of a product a task should buy.
///
/// Tokens are tried in order. The first token that matches a group decides:
/// its available variants are returned, or `VariantsNotAvailable` when it is
/// sold out and `random_in_stock` is off. `"Random"` picks a uniformly random
/// group that has stock. No token matching any group is `VariantsNotMatched`.
/// An empty size list behaves like `["Random"]`.
pub fn resolve_variants<R: Rng>(
    variants: &[Variant],
    sizes: &[String],
    rule: &SizeRule,
    random_in_stock: bool,
    rng: &mut R,
) -> Result<Vec<Variant>, ParseFailure> {
    let groups = group_by_label(variants, rule);
    let stocked: Vec<&SizeGroup> = groups.iter().filter(|g| g.variants.iter().any(|v| v.available)).collect();

    let pick_random = |rng: &mut R| -> Result<Vec<Variant>, ParseFailure> {
        if stocked.is_empty() {
            return Err(ParseFailure::VariantsNotAvailable);
        }
        let group = stocked[rng.gen_range(0..stocked.len())];
        Ok(group.available())
    };

    let random_only = [RANDOM.to_string()];
    let sizes = if sizes.iter().all(|s| s.trim().is_empty()) {
        &random_only[..]
    } else {
        sizes
    };

    for size in sizes {
        let size = size.trim();
        if size.is_empty() {
            continue;
        }
        if size.eq_ignore_ascii_case(RANDOM) {
            return pick_random(rng);
        }

        let matched: Vec<&SizeGroup> = groups.iter().filter(|g| size_matches(&g.label, size)).collect();
        if matched.is_empty() {
            continue;
        }

        let available: Vec<Variant> = matched.iter().flat_map(|g| g.available()).collect();
        if !available.is_empty() {
            return Ok(available);
        }
        if random_in_stock {
            return pick_random(rng);
        }
        return Err(ParseFailure::VariantsNotAvailable);
    }

    Err(ParseFailure::VariantsNotMatched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sizes(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    fn labels(variants: &[Variant]) -> Vec<String> {
        variants.iter().map(|v| v.option1.clone().unwrap_or_default()).collect()
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_sold_out_size_is_not_available_before_random() {
        let product = fixtures::sized_product(&[("8", true), ("9", false), ("10", true)]);
        let result = resolve_variants(
            &product.variants,
            &sizes(&["9", "Random"]),
            &SizeRule::default(),
            false,
            &mut rng(),
        );
        assert_eq!(result, Err(ParseFailure::VariantsNotAvailable));
    }

    #[test]
    fn test_unknown_size_falls_through_to_next_token() {
        let product = fixtures::sized_product(&[("8", true), ("9", false), ("10", true)]);
        let result = resolve_variants(
            &product.variants,
            &sizes(&["13", "10"]),
            &SizeRule::default(),
            false,
            &mut rng(),
        )
        .unwrap();
        assert_eq!(labels(&result), vec!["10"]);
    }

    #[test]
    fn test_no_matching_size_is_not_matched() {
        let product = fixtures::sized_product(&[("8", true), ("9", true)]);
        let result = resolve_variants(
            &product.variants,
            &sizes(&["13"]),
            &SizeRule::default(),
            false,
            &mut rng(),
        );
        assert_eq!(result, Err(ParseFailure::VariantsNotMatched));
    }

    #[test]
    fn test_numeric_size_does_not_match_longer_numbers() {
        let product = fixtures::sized_product(&[("US 9.5", true), ("US 19", true), ("US 9", true)]);
        let result = resolve_variants(
            &product.variants,
            &sizes(&["9"]),
            &SizeRule::default(),
            false,
            &mut rng(),
        )
        .unwrap();
        assert_eq!(labels(&result), vec!["US 9"]);
    }

    #[test]
    fn test_garment_size_prefix_match() {
        let product = fixtures::sized_product(&[("Small", true), ("Medium", true), ("XL", true)]);
        let result = resolve_variants(
            &product.variants,
            &sizes(&[" m "]),
            &SizeRule::default(),
            false,
            &mut rng(),
        )
        .unwrap();
        assert_eq!(labels(&result), vec!["Medium"]);

        let none = resolve_variants(
            &product.variants,
            &sizes(&["L"]),
            &SizeRule::default(),
            false,
            &mut rng(),
        );
        assert_eq!(none, Err(ParseFailure::VariantsNotMatched));
    }

    #[test]
    fn test_random_only_picks_stocked_groups() {
        let product = fixtures::sized_product(&[("8", false), ("9", true), ("10", false)]);
        for seed in 0..20 {
            let result = resolve_variants(
                &product.variants,
                &sizes(&["Random"]),
                &SizeRule::default(),
                false,
                &mut StdRng::seed_from_u64(seed),
            )
            .unwrap();
            assert_eq!(labels(&result), vec!["9"]);
        }
    }

    #[test]
    fn test_random_in_stock_replaces_sold_out_size() {
        let product = fixtures::sized_product(&[("8", true), ("9", false)]);
        let result = resolve_variants(
            &product.variants,
            &sizes(&["9"]),
            &SizeRule::default(),
            true,
            &mut rng(),
        )
        .unwrap();
        assert_eq!(labels(&result), vec!["8"]);
    }

    #[test]
    fn test_everything_sold_out() {
        let product = fixtures::sized_product(&[("8", false), ("9", false)]);
        let result = resolve_variants(&product.variants, &[], &SizeRule::default(), false, &mut rng());
        assert_eq!(result, Err(ParseFailure::VariantsNotAvailable));
    }

    #[test]
    fn test_title_fallback_label() {
        let variant = Variant {
            id: "1".into(),
            title: "10 / Black".into(),
            ..Default::default()
        };
        assert_eq!(SizeRule::default().label(&variant), "10");

        let rule = SizeRule {
            option: 2,
            ..Default::default()
        };
        let variant = Variant {
            option2: Some("XL".into()),
            ..variant
        };
        assert_eq!(rule.label(&variant), "XL");
    }
}
