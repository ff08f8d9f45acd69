use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Day-of-week labels in bucket order (0 = Sunday).
pub const WEEKDAY_LABELS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

pub const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Image extensions accepted by the upload endpoint (lowercase, no dot).
pub const ALLOWED_IMAGE_EXTENSIONS: [&str; 7] = ["gif", "png", "jpg", "jpeg", "bmp", "webp", "avif"];

pub const DEFAULT_STUDENT_IMAGE: &str = "default_image.jpg";
pub const DEFAULT_ADMIN_IMAGE: &str = "admin_default.jpg";

/// Returns true when `filename` carries one of [`ALLOWED_IMAGE_EXTENSIONS`].
pub fn is_allowed_image(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}

/// Reporting window selector used by the dashboard and exports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateFilter {
    #[default]
    Weekly,
    Monthly,
    Yearly,
    Custom,
}

impl FromStr for DateFilter {
    type Err = std::convert::Infallible;
    /// Unknown values fall back to [`DateFilter::Weekly`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => DateFilter::Monthly,
            "yearly" => DateFilter::Yearly,
            "custom" => DateFilter::Custom,
            _ => DateFilter::Weekly,
        })
    }
}

impl fmt::Display for DateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DateFilter::Weekly => "weekly",
            DateFilter::Monthly => "monthly",
            DateFilter::Yearly => "yearly",
            DateFilter::Custom => "custom",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[default]
    Weekly,
    Monthly,
    Summary,
}

impl FromStr for ChartKind {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => ChartKind::Monthly,
            "summary" => ChartKind::Summary,
            _ => ChartKind::Weekly,
        })
    }
}

/// Age brackets reported on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeBracket {
    #[serde(rename = "Under 18")]
    Under18,
    #[serde(rename = "18-25")]
    From18To25,
    #[serde(rename = "26-35")]
    From26To35,
    #[serde(rename = "36-50")]
    From36To50,
    #[serde(rename = "Above 50")]
    Above50,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl AgeBracket {
    pub const ALL: [AgeBracket; 6] = [
        AgeBracket::Under18,
        AgeBracket::From18To25,
        AgeBracket::From26To35,
        AgeBracket::From36To50,
        AgeBracket::Above50,
        AgeBracket::Unknown,
    ];

    pub fn for_age(age: Option<i32>) -> Self {
        match age {
            Some(a) if a < 0 => AgeBracket::Unknown,
            Some(a) if a < 18 => AgeBracket::Under18,
            Some(a) if a <= 25 => AgeBracket::From18To25,
            Some(a) if a <= 35 => AgeBracket::From26To35,
            Some(a) if a <= 50 => AgeBracket::From36To50,
            Some(_) => AgeBracket::Above50,
            None => AgeBracket::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AgeBracket::Under18 => "Under 18",
            AgeBracket::From18To25 => "18-25",
            AgeBracket::From26To35 => "26-35",
            AgeBracket::From36To50 => "36-50",
            AgeBracket::Above50 => "Above 50",
            AgeBracket::Unknown => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_allow_list() {
        assert!(is_allowed_image("photo.JPG"));
        assert!(is_allowed_image("a.b.webp"));
        assert!(!is_allowed_image("script.php"));
        assert!(!is_allowed_image("noext"));
        assert!(!is_allowed_image(".png"));
    }

    #[test]
    fn unknown_filter_defaults_to_weekly() {
        assert_eq!("MONTHLY".parse::<DateFilter>().unwrap(), DateFilter::Monthly);
        assert_eq!("bogus".parse::<DateFilter>().unwrap(), DateFilter::Weekly);
    }

    #[test]
    fn age_brackets() {
        assert_eq!(AgeBracket::for_age(Some(17)), AgeBracket::Under18);
        assert_eq!(AgeBracket::for_age(Some(18)), AgeBracket::From18To25);
        assert_eq!(AgeBracket::for_age(Some(25)), AgeBracket::From18To25);
        assert_eq!(AgeBracket::for_age(Some(26)), AgeBracket::From26To35);
        assert_eq!(AgeBracket::for_age(Some(50)), AgeBracket::From36To50);
        assert_eq!(AgeBracket::for_age(Some(51)), AgeBracket::Above50);
        assert_eq!(AgeBracket::for_age(None), AgeBracket::Unknown);
    }
}
