use std::sync::LazyLock;

use regex::Regex;

use crate::types::{Money, ParseMoneyError};

/// `$` + digits, optional thousands groups, optional cents.
static PRICE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\d+(?:,\d{3})*(?:\.\d{2})?").expect("valid price pattern"));

static SOLD_OUT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bsold[\s-]*out\b").expect("valid sold-out pattern"));

/// First dollar amount in `text`, if any. `Some(Err(_))` when the match
/// cannot be turned into a number.
pub fn first_price(text: &str) -> Option<Result<Money, ParseMoneyError>> {
    PRICE_PATTERN.find(text).map(|m| Money::parse(m.as_str()))
}

pub fn is_sold_out(text: &str) -> bool {
    SOLD_OUT_PATTERN.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_first_amount_with_separators() {
        let m = first_price("Tickets from $1,234.56 each").unwrap().unwrap();
        assert_eq!(m.cents(), 123_456);
        assert_eq!(m.to_string(), "$1,234.56");
    }

    #[test]
    fn takes_the_first_of_several() {
        let m = first_price("Sec 112 $89 · Sec 210 $45.50").unwrap().unwrap();
        assert_eq!(m.to_string(), "$89.00");
    }

    #[test]
    fn no_currency_no_match() {
        assert!(first_price("Prices shown include fees").is_none());
        assert!(first_price("1,234.56 USD").is_none());
    }

    #[test]
    fn oversized_amount_is_a_parse_failure() {
        let res = first_price("$123456789012345678901234").unwrap();
        assert!(matches!(res, Err(ParseMoneyError::Overflow(_))));
    }

    #[test]
    fn sold_out_variants() {
        assert!(is_sold_out("This event is Sold Out"));
        assert!(is_sold_out("SOLD-OUT"));
        assert!(is_sold_out("soldout"));
        assert!(!is_sold_out("Tickets available"));
    }
}
