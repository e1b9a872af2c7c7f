//! Suggests a category for a new transaction from its description.

use rusqlite::Connection;

use crate::{
    Error,
    category::{CategoryName, get_or_create_category},
    database_id::CategoryId,
    user::UserID,
};

/// Picks a category for a transaction that does not have one yet.
pub trait Categorizer {
    /// Suggest a category for a transaction belonging to `user_id` with `description`.
    ///
    /// Returns `Ok(None)` when no category fits.
    fn suggest(
        &self,
        user_id: UserID,
        description: &str,
        connection: &Connection,
    ) -> Result<Option<CategoryId>, Error>;
}

/// The built-in category keywords, checked in order.
pub const DEFAULT_RULES: &[(&str, &[&str])] = &[
    (
        "groceries",
        &[
            "woolworths",
            "coles",
            "aldi",
            "iga",
            "foodland",
            "grocery",
            "supermarket",
            "fruit",
            "vegetable",
        ],
    ),
    (
        "dining out",
        &[
            "cafe",
            "restaurant",
            "uber eats",
            "menulog",
            "doordash",
            "coffee",
            "mcdonald",
            "hungry jack",
            "kfc",
        ],
    ),
    (
        "transport",
        &[
            "uber", "lyft", "taxi", "train", "bus", "transport", "fuel", "petrol", "gasoline",
            "parking", "toll",
        ],
    ),
    (
        "utilities",
        &[
            "water",
            "electricity",
            "gas",
            "power",
            "energy",
            "internet",
            "phone",
            "mobile",
            "utility",
        ],
    ),
    (
        "entertainment",
        &[
            "movie",
            "cinema",
            "netflix",
            "spotify",
            "disney",
            "amazon prime",
            "entertainment",
            "game",
            "playstation",
            "xbox",
            "nintendo",
        ],
    ),
    (
        "health",
        &[
            "pharmacy", "doctor", "hospital", "medical", "dental", "gym", "fitness", "health",
        ],
    ),
    (
        "shopping",
        &[
            "amazon", "ebay", "kmart", "target", "big w", "bunnings", "shopping", "retail",
            "clothing", "apparel",
        ],
    ),
];

/// Categorises transactions by reusing the category of a similar, already
/// categorised transaction, falling back to a keyword table.
#[derive(Debug, Clone)]
pub struct KeywordCategorizer {
    rules: &'static [(&'static str, &'static [&'static str])],
}

impl Default for KeywordCategorizer {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES,
        }
    }
}

impl KeywordCategorizer {
    /// Create a categorizer that uses `rules` instead of [DEFAULT_RULES].
    ///
    /// Each rule is a category name and its keywords, keywords must be lower case.
    pub fn with_rules(rules: &'static [(&'static str, &'static [&'static str])]) -> Self {
        Self { rules }
    }

    /// The name of the first category whose keywords appear in `description`.
    pub fn match_keywords(&self, description: &str) -> Option<&'static str> {
        let description = description.to_lowercase();

        self.rules
            .iter()
            .find(|(_, keywords)| {
                keywords
                    .iter()
                    .any(|keyword| description.contains(keyword))
            })
            .map(|(name, _)| *name)
    }
}

impl Categorizer for KeywordCategorizer {
    fn suggest(
        &self,
        user_id: UserID,
        description: &str,
        connection: &Connection,
    ) -> Result<Option<CategoryId>, Error> {
        let description = description.trim();

        if description.is_empty() {
            return Ok(None);
        }

        if let Some(category_id) = find_similar_category(user_id, description, connection)? {
            return Ok(Some(category_id));
        }

        match self.match_keywords(description) {
            Some(name) => {
                let category =
                    get_or_create_category(user_id, &CategoryName::new_unchecked(name), connection)?;
                Ok(Some(category.id))
            }
            None => Ok(None),
        }
    }
}

/// The category of the user's most recently created transaction whose
/// description contains, or is contained in, `description`, ignoring case.
///
/// Case is folded in Rust because SQLite's `lower()` only folds ASCII.
fn find_similar_category(
    user_id: UserID,
    description: &str,
    connection: &Connection,
) -> Result<Option<CategoryId>, Error> {
    let description = description.to_lowercase();
    let mut statement = connection.prepare(
        "SELECT description, category_id FROM \"transaction\"
         WHERE user_id = ?1 AND category_id IS NOT NULL AND description != ''
         ORDER BY created_at DESC, id DESC",
    )?;
    let mut rows = statement.query([user_id.as_i64()])?;

    while let Some(row) = rows.next()? {
        let candidate = row.get::<_, String>(0)?.to_lowercase();

        if candidate.contains(&description) || description.contains(&candidate) {
            return Ok(Some(row.get(1)?));
        }
    }

    Ok(None)
}
