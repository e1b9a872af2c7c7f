//! This file defines the `Category` type and the queries for storing categories.
//! A category groups transactions, e.g. "groceries", and a transaction may only have one category.
//! Categories belong to a single user and names are unique per user.

use std::fmt::Display;

use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::{Error, database_id::CategoryId, user::UserID};

/// The name of a category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct CategoryName(String);

impl CategoryName {
    /// Create a category name.
    ///
    /// Leading and trailing whitespace is removed.
    ///
    /// # Errors
    ///
    /// This function will return an error if `name` is empty after trimming.
    pub fn new(name: &str) -> Result<Self, Error> {
        let name = name.trim();

        if name.is_empty() {
            Err(Error::EmptyCategoryName)
        } else {
            Ok(Self(name.to_string()))
        }
    }

    /// Create a category name without validation.
    ///
    /// The caller should ensure that the string is not empty.
    ///
    /// This function has `_unchecked` in the name but is not `unsafe`, because if the non-empty invariant is violated it will cause incorrect behaviour but not affect memory safety.
    pub fn new_unchecked(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl AsRef<str> for CategoryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for CategoryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A category for expenses and income, e.g., 'groceries', 'dining out', 'transport'.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Category {
    /// The id of the category.
    pub id: CategoryId,

    /// The user that owns the category.
    pub user_id: UserID,

    /// The name of the category.
    pub name: CategoryName,
}

/// Create a category in the database.
///
/// # Errors
/// This function will return an error if there is an SQL error, e.g. the user
/// already has a category with the same name.
pub fn create_category(
    user_id: UserID,
    name: CategoryName,
    connection: &Connection,
) -> Result<Category, Error> {
    connection.execute(
        "INSERT INTO category (user_id, name) VALUES (?1, ?2);",
        (user_id.as_i64(), name.as_ref()),
    )?;

    let id = connection.last_insert_rowid();

    Ok(Category { id, user_id, name })
}

/// Get the user's category called `name`, creating it if it does not exist yet.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_or_create_category(
    user_id: UserID,
    name: &CategoryName,
    connection: &Connection,
) -> Result<Category, Error> {
    connection.execute(
        "INSERT INTO category (user_id, name) VALUES (?1, ?2)
         ON CONFLICT(user_id, name) DO NOTHING;",
        (user_id.as_i64(), name.as_ref()),
    )?;

    connection
        .prepare("SELECT id, user_id, name FROM category WHERE user_id = ?1 AND name = ?2;")?
        .query_row((user_id.as_i64(), name.as_ref()), map_row)
        .map_err(|error| error.into())
}

/// Retrieve the category with `category_id`.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_category(category_id: CategoryId, connection: &Connection) -> Result<Category, Error> {
    connection
        .prepare("SELECT id, user_id, name FROM category WHERE id = :id;")?
        .query_row(&[(":id", &category_id)], map_row)
        .map_err(|error| error.into())
}

/// Find the user's category called `name`.
pub fn find_category_by_name(
    user_id: UserID,
    name: &str,
    connection: &Connection,
) -> Result<Option<Category>, Error> {
    connection
        .prepare("SELECT id, user_id, name FROM category WHERE user_id = ?1 AND name = ?2;")?
        .query_row((user_id.as_i64(), name), map_row)
        .optional()
        .map_err(|error| error.into())
}

/// Retrieve all of a user's categories.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_all_categories(user_id: UserID, connection: &Connection) -> Result<Vec<Category>, Error> {
    connection
        .prepare("SELECT id, user_id, name FROM category WHERE user_id = ?1 ORDER BY name;")?
        .query_map((user_id.as_i64(),), map_row)?
        .map(|maybe_category| maybe_category.map_err(|error| error.into()))
        .collect()
}

/// Create the category table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_category_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS category (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                UNIQUE(user_id, name),
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
            );",
        (),
    )?;

    Ok(())
}

fn map_row(row: &Row) -> Result<Category, rusqlite::Error> {
    let id = row.get(0)?;
    let user_id = UserID::new(row.get(1)?);
    let raw_name: String = row.get(2)?;
    let name = CategoryName::new_unchecked(&raw_name);

    Ok(Category { id, user_id, name })
}
