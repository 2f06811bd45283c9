use std::fmt;

use crate::{
    aggregate::AggregateResultSet,
    domain::{Category, ErrorRecord},
};

pub const NO_CLS_MESSAGE: &str = "No CLs require your attention";
const DEFAULT_COLOR: &str = "#41AF2B";
const DEFAULT_ICON: &str = "img/ic_assignment_black_24dp_2x.png";
const ERROR_COLOR: &str = "red";
const ERROR_ICON: &str = "img/ic_assignment_late_black_24dp_2x.png";

/// The compact summary shown by the indicator.
#[derive(Clone, Debug, PartialEq)]
pub struct BadgeState {
    pub text: String,
    pub label: String,
    pub count: usize,
    pub color: &'static str,
    pub icon: &'static str,
    pub category: Option<Category>,
    pub is_error: bool,
}

impl BadgeState {
    pub fn nothing() -> Self {
        Self {
            text: String::new(),
            label: NO_CLS_MESSAGE.to_owned(),
            count: 0,
            color: DEFAULT_COLOR,
            icon: DEFAULT_ICON,
            category: None,
            is_error: false,
        }
    }

    pub fn error(detail: impl fmt::Display) -> Self {
        Self {
            text: "!".to_owned(),
            label: format!("Error: {detail}"),
            count: 0,
            color: ERROR_COLOR,
            icon: ERROR_ICON,
            category: None,
            is_error: true,
        }
    }

    fn for_category(category: Category, count: usize) -> Self {
        let info = category.info();
        Self {
            text: count.to_string(),
            label: category.badge_title(count),
            count,
            color: info.color,
            icon: info.icon,
            category: Some(category),
            is_error: false,
        }
    }
}

impl fmt::Display for BadgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            f.write_str(&self.label)
        } else {
            write!(f, "[{}] {}", self.text, self.label)
        }
    }
}

/// Picks the single state that drives the indicator. Any error wins; then the
/// first non-empty category in priority order; otherwise the default.
pub fn select(results: &AggregateResultSet, errors: &[ErrorRecord]) -> BadgeState {
    if let Some(first) = errors.first() {
        return BadgeState::error(first);
    }

    Category::PRIORITY_ORDER
        .into_iter()
        .find_map(|category| {
            let count = results.get(category).len();
            (count > 0).then(|| BadgeState::for_category(category, count))
        })
        .unwrap_or_else(BadgeState::nothing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::fixtures, gerrit::FetchError};

    const A: &str = "https://a-review.example.com";

    fn set(categories: &[Category]) -> AggregateResultSet {
        let cls: Vec<_> = categories
            .iter()
            .enumerate()
            .map(|(idx, category)| fixtures::cl(&format!("I{idx}"), A, *category))
            .collect();
        AggregateResultSet::from_changelists(&cls)
    }

    #[test]
    fn higher_priority_category_wins() {
        let badge = select(
            &set(&[
                Category::OutgoingNeedsAttention,
                Category::IncomingNeedsAttention,
                Category::IncomingNeedsAttention,
            ]),
            &[],
        );
        assert_eq!(badge.category, Some(Category::IncomingNeedsAttention));
        assert_eq!(badge.count, 2);
        assert_eq!(badge.text, "2");
        assert_eq!(badge.label, "2 incoming CLs requiring your attention");
    }

    #[test]
    fn lower_priority_category_used_when_alone() {
        let badge = select(&set(&[Category::OutgoingNeedsAttention]), &[]);
        assert_eq!(badge.category, Some(Category::OutgoingNeedsAttention));
        assert_eq!(badge.label, "1 of your CLs requiring your attention");
        assert!(!badge.is_error);
    }

    #[test]
    fn nothing_to_show_yields_default() {
        let badge = select(&set(&[]), &[]);
        assert_eq!(badge, BadgeState::nothing());
        assert_eq!(badge.to_string(), NO_CLS_MESSAGE);
    }

    #[test]
    fn any_error_overrides_categories() {
        let errors = vec![
            ErrorRecord {
                host: "https://b-review.example.com".into(),
                error: FetchError::Network("Service Unavailable".into()),
            },
            ErrorRecord {
                host: "https://c-review.example.com".into(),
                error: FetchError::Network("timeout".into()),
            },
        ];
        let badge = select(&set(&[Category::IncomingNeedsAttention]), &errors);
        assert!(badge.is_error);
        assert_eq!(badge.text, "!");
        assert_eq!(badge.category, None);
        assert_eq!(
            badge.label,
            "Error: https://b-review.example.com: Service Unavailable"
        );
    }
}
