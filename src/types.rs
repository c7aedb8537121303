use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder for a field the page never yielded.
pub const NOT_AVAILABLE: &str = "N/A";
pub const SOLD_OUT_LABEL: &str = "Sold Out";
pub const ERROR_LABEL: &str = "Error";

/// Timestamp layout used in the Time column of both files.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// A non-negative dollar amount held as integer cents.
/// Rendered canonically as `$1,234.56` regardless of how the page formatted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money {
    cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseMoneyError {
    #[error("empty amount")]
    Empty,
    #[error("not a dollar amount: {0:?}")]
    Invalid(String),
    #[error("amount out of range: {0:?}")]
    Overflow(String),
}

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self { cents: cents.max(0) }
    }

    #[cfg(test)]
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Parse `$1,234.56`, `1234.5`, `$80` and friends.
    /// Extra decimals are rounded half-up to the cent.
    pub fn parse(raw: &str) -> Result<Self, ParseMoneyError> {
        let s = raw.trim();
        let s = s.strip_prefix('$').unwrap_or(s).trim();
        if s.is_empty() {
            return Err(ParseMoneyError::Empty);
        }
        let invalid = || ParseMoneyError::Invalid(raw.to_string());
        let overflow = || ParseMoneyError::Overflow(raw.to_string());

        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (s, None),
        };

        if int_part.starts_with(',') || int_part.ends_with(',') || int_part.contains(",,") {
            return Err(invalid());
        }
        let int_digits: String = int_part.chars().filter(|c| *c != ',').collect();
        if !int_digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: i64 = if int_digits.is_empty() {
            0
        } else {
            int_digits.parse().map_err(|_| overflow())?
        };

        let cents = match frac_part {
            None => 0,
            Some(f) => {
                if f.is_empty() || !f.chars().all(|c| c.is_ascii_digit()) {
                    return Err(invalid());
                }
                let digits = f.as_bytes();
                let tens = i64::from(digits[0] - b'0');
                let ones = digits.get(1).map_or(0, |d| i64::from(d - b'0'));
                let round_up = digits.get(2).is_some_and(|d| *d >= b'5');
                tens * 10 + ones + i64::from(round_up)
            }
        };

        if int_digits.is_empty() && frac_part.is_none() {
            return Err(invalid());
        }

        whole
            .checked_mul(100)
            .and_then(|v| v.checked_add(cents))
            .map(Money::from_cents)
            .ok_or_else(overflow)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let whole = (self.cents / 100).to_string();
        let frac = self.cents % 100;
        let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
        for (i, ch) in whole.chars().enumerate() {
            if i > 0 && (whole.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        write!(f, "${grouped}.{frac:02}")
    }
}

// ---------------------------------------------------------------------------
// Price outcome
// ---------------------------------------------------------------------------

/// Tagged result of the price stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceOutcome {
    Money(Money),
    /// The listings region says the event is sold out.
    SoldOut,
    /// The page was readable but no price showed up in time.
    Unknown,
    /// The attempt itself failed. Never treated as an observed price.
    Error,
}

impl PriceOutcome {
    pub fn money(&self) -> Option<Money> {
        match self {
            PriceOutcome::Money(m) => Some(*m),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PriceOutcome::Error)
    }

    /// Read back a persisted Price cell.
    pub fn from_cell(cell: &str) -> Result<Self, ParseMoneyError> {
        let s = cell.trim();
        if s.is_empty() || s.eq_ignore_ascii_case(NOT_AVAILABLE) {
            Ok(PriceOutcome::Unknown)
        } else if s.eq_ignore_ascii_case(SOLD_OUT_LABEL) {
            Ok(PriceOutcome::SoldOut)
        } else if s.eq_ignore_ascii_case(ERROR_LABEL) {
            Ok(PriceOutcome::Error)
        } else {
            Money::parse(s).map(PriceOutcome::Money)
        }
    }
}

impl std::fmt::Display for PriceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceOutcome::Money(m) => write!(f, "{m}"),
            PriceOutcome::SoldOut => write!(f, "{SOLD_OUT_LABEL}"),
            PriceOutcome::Unknown => write!(f, "{NOT_AVAILABLE}"),
            PriceOutcome::Error => write!(f, "{ERROR_LABEL}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure classes
// ---------------------------------------------------------------------------

/// Why an attempt produced no usable data. Stage timeouts and parse
/// failures are not listed here: they only degrade single fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The listings region never became visible.
    PageUnavailable,
    /// The page session failed outright (navigation, driver, panic).
    Session(String),
    /// The batch was cancelled or hit its deadline.
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::PageUnavailable => write!(f, "page_unavailable"),
            FailureKind::Session(msg) => write!(f, "session_failure: {msg}"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// ScrapeResult
// ---------------------------------------------------------------------------

/// One attempt to read one URL at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeResult {
    pub url: String,
    pub timestamp: DateTime<Local>,
    pub title: String,
    pub event_date: String,
    pub location: String,
    pub price: PriceOutcome,
    pub failure: Option<FailureKind>,
}

impl ScrapeResult {
    /// An attempt that failed before any field could be read.
    pub fn failed(url: impl Into<String>, failure: FailureKind) -> Self {
        Self::blank(url, PriceOutcome::Error, Some(failure))
    }

    /// The page loaded but the listings region never showed.
    pub fn unavailable(url: impl Into<String>) -> Self {
        Self::blank(url, PriceOutcome::Unknown, Some(FailureKind::PageUnavailable))
    }

    fn blank(url: impl Into<String>, price: PriceOutcome, failure: Option<FailureKind>) -> Self {
        Self {
            url: url.into(),
            timestamp: Local::now(),
            title: NOT_AVAILABLE.to_string(),
            event_date: NOT_AVAILABLE.to_string(),
            location: NOT_AVAILABLE.to_string(),
            price,
            failure,
        }
    }

    pub fn time_label(&self) -> String {
        self.timestamp.format(TIME_FORMAT).to_string()
    }
}
