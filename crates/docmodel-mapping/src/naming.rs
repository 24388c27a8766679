//! Name transforms for collections, fields and discriminator values.

use serde::{Deserialize, Serialize};

/// A string transform applied when deriving storage names from class and
/// property names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStrategy {
    /// Use the name unchanged.
    #[default]
    Identity,
    /// `UserAccount` -> `userAccount`
    CamelCase,
    /// `user_account` -> `UserAccount`
    PascalCase,
    /// `UserAccount` -> `user_account`
    SnakeCase,
}

impl NamingStrategy {
    pub fn apply(self, name: &str) -> String {
        match self {
            NamingStrategy::Identity => name.to_string(),
            NamingStrategy::CamelCase => {
                let pascal = to_pascal(name);
                let mut chars = pascal.chars();
                match chars.next() {
                    Some(first) => first.to_lowercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
            NamingStrategy::PascalCase => to_pascal(name),
            NamingStrategy::SnakeCase => to_snake(name),
        }
    }
}

fn words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' || c == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn to_pascal(name: &str) -> String {
    words(name)
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

fn to_snake(name: &str) -> String {
    words(name)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transforms() {
        assert_eq!(NamingStrategy::Identity.apply("UserAccount"), "UserAccount");
        assert_eq!(NamingStrategy::CamelCase.apply("UserAccount"), "userAccount");
        assert_eq!(NamingStrategy::CamelCase.apply("user_account"), "userAccount");
        assert_eq!(NamingStrategy::PascalCase.apply("user_account"), "UserAccount");
        assert_eq!(NamingStrategy::SnakeCase.apply("UserAccount"), "user_account");
        assert_eq!(NamingStrategy::SnakeCase.apply("createdAt"), "created_at");
        assert_eq!(NamingStrategy::CamelCase.apply(""), "");
    }
}
