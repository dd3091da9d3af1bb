//! Basemap periods: one mosaic per (year, month).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A basemap period identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> anyhow::Result<Self> {
        if !(1..=12).contains(&month) {
            anyhow::bail!("Month must be in 1..=12, got {}", month);
        }
        Ok(Self { year, month })
    }

    /// The period immediately after this one.
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    /// Inclusive range of monthly periods from `start` to `end`.
    pub fn range(start: Period, end: Period) -> Vec<Period> {
        let mut periods = Vec::new();
        let mut current = start;
        while current <= end {
            periods.push(current);
            current = current.next();
        }
        periods
    }

    /// Substitute `{year}` and `{month}` placeholders in a path pattern.
    ///
    /// `{month}` is zero-padded to two digits.
    pub fn resolve_pattern(&self, pattern: &str) -> String {
        pattern
            .replace("{year}", &self.year.to_string())
            .replace("{month}", &format!("{:02}", self.month))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| anyhow::anyhow!("Period must look like YYYY-MM, got '{}'", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid year in period '{}'", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid month in period '{}'", s))?;
        Period::new(year, month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let period: Period = "2023-06".parse().unwrap();
        assert_eq!(period, Period { year: 2023, month: 6 });
        assert_eq!(period.to_string(), "2023-06");
    }

    #[test]
    fn test_parse_rejects_bad_month() {
        assert!("2023-13".parse::<Period>().is_err());
        assert!("2023".parse::<Period>().is_err());
        assert!("abcd-01".parse::<Period>().is_err());
    }

    #[test]
    fn test_range_crosses_year() {
        let start = Period::new(2022, 11).unwrap();
        let end = Period::new(2023, 2).unwrap();
        let periods = Period::range(start, end);
        assert_eq!(periods.len(), 4);
        assert_eq!(periods[1], Period { year: 2022, month: 12 });
        assert_eq!(periods[2], Period { year: 2023, month: 1 });
    }

    #[test]
    fn test_range_empty_when_reversed() {
        let start = Period::new(2023, 5).unwrap();
        let end = Period::new(2023, 4).unwrap();
        assert!(Period::range(start, end).is_empty());
    }

    #[test]
    fn test_resolve_pattern() {
        let period = Period::new(2023, 3).unwrap();
        assert_eq!(
            period.resolve_pattern("/data/mosaics/global_{year}_{month}_mosaic.tif"),
            "/data/mosaics/global_2023_03_mosaic.tif"
        );
    }
}
