//! Label tables shared by the detector and the freshness classifier.
//!
//! The classifier emits an ordinal; `FreshnessLabel::ALL` is the only place
//! that ordinal is given meaning. Training exports and inference both go
//! through `from_index` / `index`, so reordering the table is a single edit.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of classifier output classes.
pub const NUM_FRESHNESS_LABELS: usize = 6;

/// COCO class names in detector output order (80 classes).
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Fruit kinds the classifier was trained on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fruit {
    Apple,
    Banana,
    Orange,
}

impl Fruit {
    pub const ALL: [Fruit; 3] = [Fruit::Apple, Fruit::Banana, Fruit::Orange];

    pub fn as_str(self) -> &'static str {
        match self {
            Fruit::Apple => "apple",
            Fruit::Banana => "banana",
            Fruit::Orange => "orange",
        }
    }
}

/// Closed set of freshness outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessLabel {
    AppleFresh,
    AppleRotten,
    BananaFresh,
    BananaRotten,
    OrangeFresh,
    OrangeRotten,
}

impl FreshnessLabel {
    /// Ordinal table: position `i` is classifier output `i`.
    pub const ALL: [FreshnessLabel; NUM_FRESHNESS_LABELS] = [
        FreshnessLabel::AppleFresh,
        FreshnessLabel::AppleRotten,
        FreshnessLabel::BananaFresh,
        FreshnessLabel::BananaRotten,
        FreshnessLabel::OrangeFresh,
        FreshnessLabel::OrangeRotten,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        // ALL is the single source of truth; the lookup cannot miss.
        Self::ALL
            .iter()
            .position(|label| *label == self)
            .unwrap_or_default()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FreshnessLabel::AppleFresh => "apple_fresh",
            FreshnessLabel::AppleRotten => "apple_rotten",
            FreshnessLabel::BananaFresh => "banana_fresh",
            FreshnessLabel::BananaRotten => "banana_rotten",
            FreshnessLabel::OrangeFresh => "orange_fresh",
            FreshnessLabel::OrangeRotten => "orange_rotten",
        }
    }

    pub fn fruit(self) -> Fruit {
        match self {
            FreshnessLabel::AppleFresh | FreshnessLabel::AppleRotten => Fruit::Apple,
            FreshnessLabel::BananaFresh | FreshnessLabel::BananaRotten => Fruit::Banana,
            FreshnessLabel::OrangeFresh | FreshnessLabel::OrangeRotten => Fruit::Orange,
        }
    }

    pub fn is_fresh(self) -> bool {
        matches!(
            self,
            FreshnessLabel::AppleFresh | FreshnessLabel::BananaFresh | FreshnessLabel::OrangeFresh
        )
    }
}

impl fmt::Display for FreshnessLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FreshnessLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| anyhow!("unknown freshness label '{}'", s))
    }
}

/// Look up the COCO class id for a class name.
pub fn coco_class_id(name: &str) -> Option<usize> {
    COCO_CLASSES.iter().position(|class| *class == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_mapping_round_trips() {
        for (i, label) in FreshnessLabel::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
            assert_eq!(FreshnessLabel::from_index(i), Some(*label));
        }
        assert_eq!(FreshnessLabel::from_index(NUM_FRESHNESS_LABELS), None);
    }

    #[test]
    fn ordinal_table_matches_training_order() {
        let names: Vec<&str> = FreshnessLabel::ALL.iter().map(|l| l.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "apple_fresh",
                "apple_rotten",
                "banana_fresh",
                "banana_rotten",
                "orange_fresh",
                "orange_rotten"
            ]
        );
    }

    #[test]
    fn labels_parse_and_serialize() {
        let label: FreshnessLabel = "banana_rotten".parse().unwrap();
        assert_eq!(label, FreshnessLabel::BananaRotten);
        assert_eq!(label.fruit(), Fruit::Banana);
        assert!(!label.is_fresh());
        assert_eq!(
            serde_json::to_string(&FreshnessLabel::OrangeFresh).unwrap(),
            "\"orange_fresh\""
        );
        assert!("kiwi_fresh".parse::<FreshnessLabel>().is_err());
    }

    #[test]
    fn fruit_categories_exist_in_coco() {
        assert_eq!(coco_class_id("banana"), Some(46));
        assert_eq!(coco_class_id("apple"), Some(47));
        assert_eq!(coco_class_id("orange"), Some(49));
        for fruit in Fruit::ALL {
            assert!(coco_class_id(fruit.as_str()).is_some());
        }
    }
}
