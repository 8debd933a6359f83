// src/heuristics/proximity.rs

use super::AmountMatch;
use regex::Regex;
use regex::RegexBuilder;

/// Candidates with more digits than this (separators stripped) are account
/// or phone numbers, not amounts.
const MAX_AMOUNT_DIGITS: usize = 8;

pub(super) fn locate(text: &str, keywords: &[String]) -> Option<AmountMatch> {
    if text.is_empty() || keywords.is_empty() {
        return None;
    }

    let numbers = numeric_runs(text);
    if numbers.is_empty() {
        return None;
    }

    let mut best: Option<AmountMatch> = None;

    for keyword in keywords {
        let Ok(re) = RegexBuilder::new(&regex::escape(keyword))
            .case_insensitive(true)
            .build()
        else {
            continue;
        };

        for found in re.find_iter(text) {
            for (offset, raw) in &numbers {
                let distance = found.start().abs_diff(*offset);
                // Strict comparison keeps the first pair on equal distance.
                if best.as_ref().is_none_or(|b| distance < b.distance) {
                    best = Some(AmountMatch {
                        raw: raw.clone(),
                        offset: *offset,
                        keyword: keyword.clone(),
                        distance,
                    });
                }
            }
        }
    }

    best
}

/// Maximal runs of digits, commas and periods that look like amounts.
fn numeric_runs(text: &str) -> Vec<(usize, String)> {
    let re = Regex::new(r"[0-9.,]+").unwrap();
    re.find_iter(text)
        .filter(|m| is_amount_like(m.as_str()))
        .map(|m| (m.start(), m.as_str().to_string()))
        .collect()
}

/// Amounts carry a decimal separator and at most `MAX_AMOUNT_DIGITS` digits
/// once commas, periods and spaces are stripped.
fn is_amount_like(run: &str) -> bool {
    let digits = run
        .chars()
        .filter(|c| !matches!(c, ',' | '.' | ' '))
        .count();
    digits > 0 && digits <= MAX_AMOUNT_DIGITS && run.contains('.')
}

#[cfg(test)]
mod tests {
    use super::super::locate_amount;
    use super::*;

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn empty_text_has_no_match() {
        assert_eq!(locate_amount("", &kw(&["TOTAL"])), None);
    }

    #[test]
    fn text_without_keywords_has_no_match() {
        let text = "line items 12.50 and 99.99 but no labels";
        assert_eq!(locate_amount(text, &kw(&["TOTAL"])), None);
    }

    #[test]
    fn keyword_without_decimal_number_has_no_match() {
        // Integer runs are IDs, not amounts.
        let text = "TOTAL 1234 pieces across 7 cartons";
        assert_eq!(locate_amount(text, &kw(&["TOTAL"])), None);
    }

    #[test]
    fn long_digit_runs_are_excluded() {
        let text = "Invoice Total: 123-456-7890 Amount Due 42.50";
        let found = locate_amount(text, &kw(&["AMOUNT DUE", "TOTAL"])).unwrap();
        assert_eq!(found.raw, "42.50");
    }

    #[test]
    fn phone_number_with_periods_is_excluded() {
        // 10 digits once separators are stripped.
        let text = "TOTAL due, call 123.456.7890 or pay 10.00";
        let found = locate_amount(text, &kw(&["TOTAL"])).unwrap();
        assert_eq!(found.raw, "10.00");
    }

    #[test]
    fn nearest_number_wins_across_occurrences() {
        // "TOTAL" at 0 and 21; "1,234.56" at 6, "99.00" at 27.
        // Both the (0, 6) and (21, 27) pairs sit at distance 6; the first
        // keyword occurrence is visited first, so "1,234.56" wins.
        let text = "TOTAL 1,234.56 extra TOTAL 99.00";
        let found = locate_amount(text, &kw(&["TOTAL"])).unwrap();
        assert_eq!(found.raw, "1,234.56");
        assert_eq!(found.offset, 6);
        assert_eq!(found.distance, 6);
    }

    #[test]
    fn lower_priority_keyword_wins_when_closer() {
        // Global-minimum semantics: "AMOUNT" sits right next to 5.00 while
        // the higher-priority "INVOICE TOTAL" is far from any number.
        let text = "INVOICE TOTAL shown on last page .......... AMOUNT 5.00";
        let found = locate_amount(text, &kw(&["INVOICE TOTAL", "AMOUNT"])).unwrap();
        assert_eq!(found.raw, "5.00");
        assert_eq!(found.keyword, "AMOUNT");
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let text = "total due 17.95";
        let found = locate_amount(text, &kw(&["TOTAL DUE"])).unwrap();
        assert_eq!(found.raw, "17.95");
    }

    #[test]
    fn original_punctuation_is_preserved() {
        let text = "GRAND TOTAL 12,345.67";
        let found = locate_amount(text, &kw(&["GRAND TOTAL"])).unwrap();
        assert_eq!(found.raw, "12,345.67");
    }

    #[test]
    fn locate_is_deterministic() {
        let text = "TOTAL 1,234.56 extra TOTAL 99.00";
        let keywords = kw(&["TOTAL"]);
        let first = locate_amount(text, &keywords);
        let second = locate_amount(text, &keywords);
        assert_eq!(first, second);
    }

    #[test]
    fn separator_only_runs_are_not_amounts() {
        assert!(!is_amount_like("..,,"));
        assert!(is_amount_like("42.50"));
        assert!(!is_amount_like("123456789.00"));
    }
}
