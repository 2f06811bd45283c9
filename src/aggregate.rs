use std::collections::BTreeMap;

use crate::domain::{Category, Changelist};

/// Changelists from every host grouped by category. Iteration follows
/// category priority; within a category, host contribution order is kept.
#[derive(Clone, Debug, Default)]
pub struct AggregateResultSet {
    categories: BTreeMap<Category, Vec<Changelist>>,
}

impl AggregateResultSet {
    pub fn from_changelists<'a>(changelists: impl IntoIterator<Item = &'a Changelist>) -> Self {
        let mut categories: BTreeMap<Category, Vec<Changelist>> = BTreeMap::new();
        for cl in changelists {
            categories.entry(cl.category).or_default().push(cl.clone());
        }
        Self { categories }
    }

    pub fn get(&self, category: Category) -> &[Changelist] {
        self.categories
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Non-empty categories in priority order.
    pub fn sections(&self) -> impl Iterator<Item = (Category, &[Changelist])> {
        self.categories
            .iter()
            .filter(|(_, cls)| !cls.is_empty())
            .map(|(category, cls)| (*category, cls.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.sections().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }
}
