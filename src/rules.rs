// 🏷️ Product Category Rules - Rules as Data
// Ordered keyword patterns over product descriptions; first match wins.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const UNCATEGORIZED: &str = "uncategorized";

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Rule ID for tracking
    pub id: String,

    /// Pattern to match (case-insensitive; `*` is a wildcard, otherwise substring)
    pub pattern: String,

    /// Category to assign
    pub category: String,

    /// Description/notes about this rule
    #[serde(default)]
    pub description: Option<String>,

    /// Priority (higher = applied first, ties keep file order)
    #[serde(default)]
    pub priority: i32,
}

impl CategoryRule {
    pub fn new(id: &str, pattern: &str, category: &str) -> Self {
        CategoryRule {
            id: id.to_string(),
            pattern: pattern.to_string(),
            category: category.to_string(),
            description: None,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Check if pattern matches the given text
    pub fn matches(&self, text: &str) -> bool {
        let pattern = self.pattern.to_lowercase();
        let text = text.to_lowercase();

        if !pattern.contains('*') {
            return text.contains(&pattern);
        }

        let parts: Vec<&str> = pattern.split('*').collect();
        let first = parts[0];
        let last = parts[parts.len() - 1];

        if !text.starts_with(first) {
            return false;
        }
        if text.len() < first.len() + last.len() || !text.ends_with(last) {
            return false;
        }

        // Middle parts must appear in order between prefix and suffix
        let mut rest = &text[first.len()..text.len() - last.len()];
        for part in &parts[1..parts.len() - 1] {
            if part.is_empty() {
                continue;
            }
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
        true
    }
}

// ============================================================================
// RULE SET
// ============================================================================

#[derive(Debug, Clone)]
pub struct CategoryRules {
    rules: Vec<CategoryRule>,
}

impl CategoryRules {
    /// Load rules from a JSON array file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Rules {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let rules: Vec<CategoryRule> =
            serde_json::from_str(&content).map_err(|e| ConfigError::Rules {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        Ok(CategoryRules::from_rules(rules))
    }

    pub fn from_rules(mut rules: Vec<CategoryRule>) -> Self {
        // Stable sort: equal priorities keep their listed order
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        CategoryRules { rules }
    }

    /// First rule matching the description
    pub fn classify(&self, text: &str) -> Option<&CategoryRule> {
        self.rules.iter().find(|rule| rule.matches(text))
    }

    /// Category label for an optional description
    pub fn category_for(&self, description: Option<&str>) -> &str {
        description
            .and_then(|d| self.classify(d))
            .map(|rule| rule.category.as_str())
            .unwrap_or(UNCATEGORIZED)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for CategoryRules {
    /// Keyword rules for a giftware catalogue
    fn default() -> Self {
        let table: &[(&str, &[&str])] = &[
            ("fees_postage", &["postage", "carriage", "manual", "bank charges", "amazon fee", "discount"]),
            ("seasonal", &["christmas", "easter", "advent", "halloween"]),
            ("jewellery", &["necklac", "bracelet", "earring", "brooch"]),
            ("lighting", &["t-light", "candle", "lantern", "light holder", "lights"]),
            ("bags", &["bag", "tote", "purse"]),
            ("kitchen_dining", &["mug", "cup", "plate", "bowl", "cake", "tea", "jam", "bottle", "lunch box", "cutlery", "napkin"]),
            ("stationery", &["card", "wrap", "paper", "pen", "pencil", "notebook", "sticker", "ribbon"]),
            ("toys_games", &["toy", "doll", "game", "puzzle", "spaceboy", "children", "playhouse"]),
            ("garden", &["garden", "plant", "flower pot", "watering"]),
            ("home_decor", &["heart", "sign", "frame", "clock", "cushion", "doormat", "decoration", "ornament", "vintage", "hook"]),
        ];

        let mut rules = Vec::new();
        for (category, keywords) in table {
            for keyword in keywords.iter() {
                rules.push(CategoryRule::new(
                    &format!("{}:{}", category, keyword.replace(' ', "_")),
                    keyword,
                    category,
                ));
            }
        }
        CategoryRules::from_rules(rules)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_pattern_match() {
        let rule = CategoryRule::new("mug", "MUG", "kitchen_dining");

        assert!(rule.matches("RETROSPOT MUG"));
        assert!(rule.matches("mug"));
        assert!(!rule.matches("BAG"));
    }

    #[test]
    fn test_wildcard_pattern() {
        let rule = CategoryRule::new("bag", "JUMBO*BAG", "bags");

        assert!(rule.matches("JUMBO BAG RED RETROSPOT BAG"));
        assert!(rule.matches("jumbo shopper bag"));
        assert!(!rule.matches("LUNCH BAG JUMBO"));
        assert!(!rule.matches("JUMBOBA"));
    }

    #[test]
    fn test_wildcard_middle_parts_in_order() {
        let rule = CategoryRule::new("set", "*set*of*", "sets");

        assert!(rule.matches("SET OF 3 CAKE TINS"));
        assert!(!rule.matches("OF SET"));
    }

    #[test]
    fn test_first_listed_rule_wins() {
        let rules = CategoryRules::from_rules(vec![
            CategoryRule::new("xmas", "christmas", "seasonal"),
            CategoryRule::new("light", "lights", "lighting"),
        ]);

        assert_eq!(rules.category_for(Some("CHRISTMAS LIGHTS")), "seasonal");
        assert_eq!(rules.category_for(Some("FAIRY LIGHTS")), "lighting");
    }

    #[test]
    fn test_rule_priority() {
        let rules = CategoryRules::from_rules(vec![
            CategoryRule::new("general", "bag", "bags").with_priority(1),
            CategoryRule::new("specific", "lunch bag", "kitchen_dining").with_priority(100),
        ]);

        let result = rules.classify("LUNCH BAG RED RETROSPOT").unwrap();
        assert_eq!(result.id, "specific");
    }

    #[test]
    fn test_no_match_is_uncategorized() {
        let rules = CategoryRules::from_rules(Vec::new());
        assert!(rules.classify("ANYTHING").is_none());
        assert_eq!(rules.category_for(Some("ANYTHING")), UNCATEGORIZED);
        assert_eq!(CategoryRules::default().category_for(None), UNCATEGORIZED);
    }

    #[test]
    fn test_default_rules() {
        let rules = CategoryRules::default();
        assert!(rules.rule_count() > 20);
        assert_eq!(
            rules.category_for(Some("WHITE HANGING HEART T-LIGHT HOLDER")),
            "lighting"
        );
        assert_eq!(rules.category_for(Some("POSTAGE")), "fees_postage");
        assert_eq!(rules.category_for(Some("PAPER CHAIN KIT 50'S CHRISTMAS")), "seasonal");
        assert_eq!(rules.category_for(Some("ZZZ UNKNOWN THING")), UNCATEGORIZED);
    }

    #[test]
    fn test_rules_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("star-etl-rules-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rules.json");
        std::fs::write(
            &path,
            r#"[{"id": "mug", "pattern": "mug", "category": "drinkware"}]"#,
        )
        .unwrap();

        let rules = CategoryRules::from_file(&path).unwrap();
        assert_eq!(rules.category_for(Some("ENAMEL MUG")), "drinkware");

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            CategoryRules::from_file(&path),
            Err(ConfigError::Rules { .. })
        ));
    }
}
