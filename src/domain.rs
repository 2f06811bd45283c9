use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gerrit::FetchError;

// Domain data structures shared across modules.

/// One monitored review host. The origin URL is its identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    pub url: String,
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// The account the per-host client resolved for the current user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub account_id: u64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reviewer {
    pub name: String,
    pub approval: i32,
}

impl Reviewer {
    pub fn approved(&self) -> bool {
        self.approval > 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Changelist {
    pub change_id: String,
    pub number: u64,
    pub subject: String,
    pub author: String,
    pub reviewers: Vec<Reviewer>,
    pub host: String,
    pub url: String,
    pub updated_at: DateTime<Utc>,
    pub category: Category,
}

/// A host that failed during a refresh cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorRecord {
    pub host: String,
    pub error: FetchError,
}

impl ErrorRecord {
    /// Authentication failures are offered to the user as a login prompt.
    pub fn needs_login(&self) -> bool {
        matches!(self.error, FetchError::Auth(_))
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.host, self.error)
    }
}

/// Why a changelist needs attention. Declaration order is priority order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    IncomingNeedsAttention,
    OutgoingNeedsAttention,
    ReadyToSubmit,
    Stale,
    NoReviewers,
    WorkInProgress,
}

impl Category {
    pub const PRIORITY_ORDER: [Category; 6] = [
        Category::IncomingNeedsAttention,
        Category::OutgoingNeedsAttention,
        Category::ReadyToSubmit,
        Category::Stale,
        Category::NoReviewers,
        Category::WorkInProgress,
    ];

    pub fn info(self) -> &'static CategoryInfo {
        &CATEGORY_TABLE[self as usize]
    }

    pub fn notifiable(self) -> bool {
        self.info().notifiable
    }

    pub fn badge_title(self, count: usize) -> String {
        (self.info().badge_title)(count)
    }

    pub fn section_header(self, count: usize) -> String {
        (self.info().section_header)(count)
    }
}

/// Static presentation and notification metadata for a category.
pub struct CategoryInfo {
    pub notifiable: bool,
    pub color: &'static str,
    pub icon: &'static str,
    pub notification_title: &'static str,
    badge_title: fn(usize) -> String,
    section_header: fn(usize) -> String,
}

fn pluralized_cl(count: usize) -> &'static str {
    if count == 1 { "CL" } else { "CLs" }
}

// Indexed by `Category as usize`; keep in declaration order.
static CATEGORY_TABLE: [CategoryInfo; 6] = [
    CategoryInfo {
        notifiable: true,
        color: "#9a0007",
        icon: "img/ic_assignment_incoming_24dp_2x.png",
        notification_title: "Incoming CL requires your attention",
        badge_title: |count| {
            format!("{count} incoming {} requiring your attention", pluralized_cl(count))
        },
        section_header: |count| {
            format!("Incoming {} requiring your attention", pluralized_cl(count))
        },
    },
    CategoryInfo {
        notifiable: true,
        color: "#4d2c91",
        icon: "img/ic_assignment_outgoing_24dp_2x.png",
        notification_title: "Your CL requires your attention",
        badge_title: |count| format!("{count} of your CLs requiring your attention"),
        section_header: |count| format!("Your {} requiring your attention", pluralized_cl(count)),
    },
    CategoryInfo {
        notifiable: true,
        color: "#004c40",
        icon: "img/ic_assignment_approved_24dp_2x.png",
        notification_title: "Your CL is ready to submit",
        badge_title: |count| format!("{count} of your CLs ready to submit"),
        section_header: |_| "Approved, ready to submit".to_owned(),
    },
    CategoryInfo {
        notifiable: false,
        color: "#004ba0",
        icon: "img/ic_assignment_stale_24dp_2x.png",
        notification_title: "Your CL is stale",
        badge_title: |count| format!("{count} of your stale CLs"),
        section_header: |count| format!("Your stale {}", pluralized_cl(count)),
    },
    CategoryInfo {
        notifiable: false,
        color: "#8d8d8d",
        icon: "img/ic_assignment_not_mailed_24dp_2x.png",
        notification_title: "Your CL has no reviewers",
        badge_title: |count| format!("{count} of your CLs without reviewers"),
        section_header: |count| format!("Your {} without reviewers", pluralized_cl(count)),
    },
    CategoryInfo {
        notifiable: false,
        color: "#8d8d8d",
        icon: "img/ic_assignment_not_mailed_24dp_2x.png",
        notification_title: "Your CL is a work in progress",
        badge_title: |count| format!("{count} of your CLs in progress"),
        section_header: |count| format!("Your work-in-progress {}", pluralized_cl(count)),
    },
];


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_matches_declaration_order() {
        let mut sorted = Category::PRIORITY_ORDER;
        sorted.sort();
        assert_eq!(sorted, Category::PRIORITY_ORDER);
    }

    #[test]
    fn badge_titles_use_singular_and_plural() {
        assert_eq!(
            Category::IncomingNeedsAttention.badge_title(1),
            "1 incoming CL requiring your attention"
        );
        assert_eq!(
            Category::Stale.badge_title(3),
            "3 of your stale CLs"
        );
        assert_eq!(
            Category::ReadyToSubmit.section_header(4),
            "Approved, ready to submit"
        );
    }

    #[test]
    fn only_attention_categories_are_notifiable() {
        let notifiable: Vec<_> = Category::PRIORITY_ORDER
            .into_iter()
            .filter(|category| category.notifiable())
            .collect();
        assert_eq!(
            notifiable,
            vec![
                Category::IncomingNeedsAttention,
                Category::OutgoingNeedsAttention,
                Category::ReadyToSubmit,
            ]
        );
    }

    #[test]
    fn category_serializes_as_snake_case() {
        let json = serde_json::to_string(&Category::ReadyToSubmit).unwrap();
        assert_eq!(json, "\"ready_to_submit\"");
    }
}
