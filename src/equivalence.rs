//! Cross-language pairing of hymns.
//!
//! Only the two language categories take part; user-defined decks never have
//! an equivalent. Which number the translation carries is decided by an
//! [`EquivalenceRule`], so a hymnal with another numbering convention can plug
//! in its own rule without touching the lookup.

use serde::Serialize;
use tracing::debug;

use crate::catalog::{Catalog, Category, HymnNumber};

pub trait EquivalenceRule: Send + Sync {
    /// Number of the translation of `number`, which was found in `found_in`.
    fn equivalent_number(&self, number: HymnNumber, found_in: Category) -> Option<HymnNumber>;
}

/// The Philippine edition numbers each Tagalog hymn one after its English original.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdjacentNumberRule;

impl EquivalenceRule for AdjacentNumberRule {
    fn equivalent_number(&self, number: HymnNumber, found_in: Category) -> Option<HymnNumber> {
        match found_in {
            Category::Primary => number.get().checked_add(1).map(HymnNumber),
            Category::Secondary => number
                .get()
                .checked_sub(1)
                .filter(|n| *n > 0)
                .map(HymnNumber),
            Category::UserDefined => None,
        }
    }
}

pub fn counterpart(category: Category) -> Option<Category> {
    match category {
        Category::Primary => Some(Category::Secondary),
        Category::Secondary => Some(Category::Primary),
        Category::UserDefined => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub title: String,
    pub number: HymnNumber,
    pub category: Option<Category>,
    pub equivalent_title: String,
    pub equivalent_number: Option<HymnNumber>,
    pub equivalent_category: Option<Category>,
    pub equivalence_index: Option<usize>,
}

impl Resolution {
    pub fn placeholder(number: HymnNumber) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }

    /// An empty title means the number is in neither language category.
    pub fn is_match(&self) -> bool {
        !self.title.is_empty()
    }
}

pub struct EquivalenceResolver<'a> {
    catalog: &'a Catalog,
    rule: &'a dyn EquivalenceRule,
}

impl<'a> EquivalenceResolver<'a> {
    pub fn new(catalog: &'a Catalog, rule: &'a dyn EquivalenceRule) -> Self {
        Self { catalog, rule }
    }

    pub fn resolve(&self, number: HymnNumber, known_category: Option<Category>) -> Resolution {
        let mut resolution = Resolution::placeholder(number);

        let found = search_order(known_category).into_iter().find_map(|category| {
            let index = self.catalog.index(category);
            let position = index.position(number)?;
            let (_, title) = index.get(position)?;
            Some((category, title))
        });
        let Some((category, title)) = found else {
            debug!("Hymn #{number} is not in any language category");
            return resolution;
        };

        resolution.title = title.to_string();
        resolution.category = Some(category);

        let Some(other) = counterpart(category) else {
            return resolution;
        };
        resolution.equivalent_category = Some(other);

        let Some(target) = self.rule.equivalent_number(number, category) else {
            return resolution;
        };
        let other_index = self.catalog.index(other);
        match other_index.position(target) {
            Some(idx) => {
                if let Some((eq_number, eq_title)) = other_index.get(idx) {
                    resolution.equivalent_title = eq_title.to_string();
                    resolution.equivalent_number = Some(eq_number);
                    resolution.equivalence_index = Some(idx);
                }
            }
            None => debug!("Hymn #{number} ({category}) has no #{target} in {other}"),
        }

        resolution
    }
}

fn search_order(known_category: Option<Category>) -> [Category; 2] {
    match known_category {
        Some(Category::Secondary) => [Category::Secondary, Category::Primary],
        _ => [Category::Primary, Category::Secondary],
    }
}
