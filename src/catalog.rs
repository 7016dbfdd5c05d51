//! Static data tables: the estimation deck and the avatar options.

use crate::types::{Card, CatAvatar};

/// Cat deck as (value, description)
const CAT_DECK: &[(&str, &str)] = &[
    ("1", "One sleepy kitten"),
    ("2", "Two playful kittens"),
    ("3", "Three curious cats"),
    ("5", "Five cats during bath time"),
    ("8", "Eight cats in a box"),
    ("13", "Thirteen cats knocking things over"),
    ("21", "Twenty-one cats on a shelf"),
    ("?", "Herd of angry wet cats"),
];

pub const CAT_COLORS: &[&str] = &["orange", "black", "white", "gray", "brown", "calico"];
pub const CAT_ACCESSORIES: &[&str] = &["none", "bowtie", "glasses", "scarf"];
pub const CAT_MOODS: &[&str] = &["happy", "grumpy", "sleepy", "excited"];

/// The full estimation deck in display order
pub fn deck() -> Vec<Card> {
    CAT_DECK
        .iter()
        .map(|(value, description)| Card {
            value: value.to_string(),
            description: description.to_string(),
        })
        .collect()
}

pub fn is_card(value: &str) -> bool {
    CAT_DECK.iter().any(|(v, _)| *v == value)
}

/// Check every avatar option against the known lists
pub fn validate_avatar(avatar: &CatAvatar) -> Result<(), String> {
    if !CAT_COLORS.contains(&avatar.color.as_str()) {
        return Err(format!("Unknown avatar color: {}", avatar.color));
    }
    if !CAT_ACCESSORIES.contains(&avatar.accessory.as_str()) {
        return Err(format!("Unknown avatar accessory: {}", avatar.accessory));
    }
    if !CAT_MOODS.contains(&avatar.mood.as_str()) {
        return Err(format!("Unknown avatar mood: {}", avatar.mood));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deck_order() {
        let values: Vec<_> = deck().into_iter().map(|c| c.value).collect();
        assert_eq!(values, vec!["1", "2", "3", "5", "8", "13", "21", "?"]);
    }

    #[test]
    fn test_is_card() {
        assert!(is_card("13"));
        assert!(is_card("?"));
        assert!(!is_card("4"));
    }

    #[test]
    fn test_default_avatar_is_valid() {
        assert!(validate_avatar(&CatAvatar::default()).is_ok());
    }

    #[test]
    fn test_unknown_mood_rejected() {
        let avatar = CatAvatar {
            mood: "furious".to_string(),
            ..CatAvatar::default()
        };
        let err = validate_avatar(&avatar).unwrap_err();
        assert!(err.contains("furious"));
    }
}
