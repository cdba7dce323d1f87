use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Solo-friendliness tag a user can attach to a spot rating.
///
/// The vocabulary is closed: anything not listed here is rejected at
/// validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    QuietAtmosphere,
    WifiAvailable,
    SingleSeating,
    GoodLighting,
    PowerOutlets,
    ComfortableSeating,
    MinimalNoise,
    StudyFriendly,
    WorkFriendly,
    ReadingFriendly,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::QuietAtmosphere,
        Category::WifiAvailable,
        Category::SingleSeating,
        Category::GoodLighting,
        Category::PowerOutlets,
        Category::ComfortableSeating,
        Category::MinimalNoise,
        Category::StudyFriendly,
        Category::WorkFriendly,
        Category::ReadingFriendly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::QuietAtmosphere => "quiet_atmosphere",
            Category::WifiAvailable => "wifi_available",
            Category::SingleSeating => "single_seating",
            Category::GoodLighting => "good_lighting",
            Category::PowerOutlets => "power_outlets",
            Category::ComfortableSeating => "comfortable_seating",
            Category::MinimalNoise => "minimal_noise",
            Category::StudyFriendly => "study_friendly",
            Category::WorkFriendly => "work_friendly",
            Category::ReadingFriendly => "reading_friendly",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_category_parses_from_its_name() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let result = "pet_friendly".parse::<Category>();
        assert_eq!(result, Err(UnknownCategory("pet_friendly".to_string())));
    }

    #[test]
    fn test_category_names_are_case_sensitive() {
        assert!("Quiet_Atmosphere".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serializes_as_snake_case() {
        let json = serde_json::to_string(&Category::PowerOutlets).unwrap();
        assert_eq!(json, "\"power_outlets\"");

        let parsed: Category = serde_json::from_str("\"reading_friendly\"").unwrap();
        assert_eq!(parsed, Category::ReadingFriendly);
    }
}
