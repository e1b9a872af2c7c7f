//! Detection of expenses that look like they repeat on a schedule.

use std::fmt::Display;

use rusqlite::Connection;
use rust_decimal::Decimal;
use time::{Date, Duration};

use crate::{Error, transaction::get_transactions_between, user::UserID};

/// How far an interval may be from the mean interval for the group to count as regular.
const INTERVAL_TOLERANCE_DAYS: f64 = 5.0;

/// How often a recurring expense seems to happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    /// Every 6 to 8 days.
    Weekly,
    /// Every 13 to 16 days.
    Fortnightly,
    /// Every 25 to 35 days.
    Monthly,
    /// Every 89 to 93 days.
    Quarterly,
    /// Every 355 to 370 days.
    Yearly,
}

impl Frequency {
    /// The frequency whose day-count band contains `average_interval`.
    pub fn from_average_interval(average_interval: f64) -> Option<Self> {
        match average_interval {
            days if (6.0..=8.0).contains(&days) => Some(Frequency::Weekly),
            days if (13.0..=16.0).contains(&days) => Some(Frequency::Fortnightly),
            days if (25.0..=35.0).contains(&days) => Some(Frequency::Monthly),
            days if (89.0..=93.0).contains(&days) => Some(Frequency::Quarterly),
            days if (355.0..=370.0).contains(&days) => Some(Frequency::Yearly),
            _ => None,
        }
    }
}

impl Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Frequency::Weekly => "WEEKLY",
            Frequency::Fortnightly => "FORTNIGHTLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Quarterly => "QUARTERLY",
            Frequency::Yearly => "YEARLY",
        };

        f.write_str(name)
    }
}

/// A group of similar expenses.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurringPattern {
    /// The description of the first expense in the group.
    pub description: String,
    /// The amount of the first expense in the group.
    pub amount: Decimal,
    /// How many expenses are in the group.
    pub occurrences: usize,
    /// The date of the latest expense.
    pub last_date: Date,
    /// The mean number of days between consecutive expenses.
    pub average_interval_days: f64,
    /// The schedule the expenses follow, `None` if the intervals are irregular
    /// or fit no known schedule.
    pub frequency: Option<Frequency>,
}

struct Group {
    description: String,
    amount: Decimal,
    dates: Vec<Date>,
}

impl Group {
    fn accepts(&self, description: &str, amount: Decimal) -> bool {
        let key = self.description.to_lowercase();
        let description = description.to_lowercase();
        let similar_description = key.contains(&description) || description.contains(&key);
        let tolerance = self.amount.abs() * Decimal::new(1, 1);

        similar_description && (amount.abs() - self.amount.abs()).abs() < tolerance
    }
}

/// Find groups of at least `min_occurrences` similar expenses among the
/// user's transactions of the last `range_days` days up to `today`.
///
/// Expenses are similar when one description contains the other, ignoring
/// case, and their amounts are within 10% of the amount of the first expense
/// in the group. Income is ignored. Groups are returned in the order their
/// first expense happened.
pub fn detect_recurring(
    user_id: UserID,
    today: Date,
    min_occurrences: usize,
    range_days: u32,
    connection: &Connection,
) -> Result<Vec<RecurringPattern>, Error> {
    let from = today
        .checked_sub(Duration::days(i64::from(range_days)))
        .unwrap_or(Date::MIN);
    let transactions = get_transactions_between(user_id, from, today, connection)?;

    let mut groups: Vec<Group> = Vec::new();

    for transaction in transactions
        .iter()
        .filter(|transaction| transaction.amount < Decimal::ZERO)
    {
        match groups
            .iter_mut()
            .find(|group| group.accepts(&transaction.description, transaction.amount))
        {
            Some(group) => group.dates.push(transaction.date),
            None => groups.push(Group {
                description: transaction.description.clone(),
                amount: transaction.amount,
                dates: vec![transaction.date],
            }),
        }
    }

    let patterns = groups
        .into_iter()
        .filter(|group| group.dates.len() >= min_occurrences)
        .filter_map(into_pattern)
        .collect();

    Ok(patterns)
}

fn into_pattern(mut group: Group) -> Option<RecurringPattern> {
    group.dates.sort();

    let intervals: Vec<f64> = group
        .dates
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).whole_days() as f64)
        .collect();

    if intervals.is_empty() {
        return None;
    }

    let average = intervals.iter().sum::<f64>() / intervals.len() as f64;
    let regular = intervals
        .iter()
        .all(|interval| (interval - average).abs() <= INTERVAL_TOLERANCE_DAYS);

    let frequency = if regular {
        Frequency::from_average_interval(average)
    } else {
        None
    };

    Some(RecurringPattern {
        description: group.description,
        amount: group.amount,
        occurrences: group.dates.len(),
        last_date: *group.dates.last()?,
        average_interval_days: average,
        frequency,
    })
}
