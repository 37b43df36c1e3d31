use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Client-assigned identifier of an entry. Browsers tend to send numbers,
/// the CLI sends uuids; both are kept in the form they arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryId {
    Number(i64),
    Text(String),
}

impl EntryId {
    pub fn generate() -> Self {
        EntryId::Text(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Number(n) => write!(f, "{}", n),
            EntryId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntryId {
    fn from(n: i64) -> Self {
        EntryId::Number(n)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        EntryId::Text(s.to_string())
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        EntryId::Text(s)
    }
}

/// Percentage as typed into the form. The raw text is kept so a saved week
/// reads back exactly as it was sent; `value` gives the integer view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Percentage(String);

impl Percentage {
    pub fn new(raw: impl Into<String>) -> Self {
        Percentage(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading-integer coercion: `"40"` is 40, `"12.7"` is 12, and anything
    /// without leading digits is 0. Digit runs too long for an `i64`
    /// saturate at `i64::MAX` (or `i64::MIN` when negative).
    pub fn value(&self) -> i64 {
        let trimmed = self.0.trim_start();
        let (negative, digits) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let end = digits
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(digits.len());
        let run = &digits[..end];
        if run.is_empty() {
            return 0;
        }

        // Parsing with the sign attached lets "-9223372036854775808" land exactly.
        let signed = if negative {
            format!("-{}", run)
        } else {
            run.to_string()
        };
        match signed.parse::<i64>() {
            Ok(value) => value,
            Err(_) if negative => i64::MIN,
            Err(_) => i64::MAX,
        }
    }
}

impl From<i64> for Percentage {
    fn from(value: i64) -> Self {
        Percentage(value.to_string())
    }
}

impl From<&str> for Percentage {
    fn from(raw: &str) -> Self {
        Percentage(raw.to_string())
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Percentage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Integer(i64),
            Float(f64),
            Null,
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Percentage(s),
            Raw::Integer(n) => Percentage::from(n),
            Raw::Float(f) => Percentage(f.to_string()),
            Raw::Null => Percentage::default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub project_id: String,
    #[serde(default)]
    pub percentage: Percentage,
}

impl Entry {
    pub fn new(id: impl Into<EntryId>, project_id: impl Into<String>, percentage: impl Into<Percentage>) -> Self {
        Entry {
            id: id.into(),
            project_id: project_id.into(),
            percentage: percentage.into(),
        }
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Total percentage exceeds 100%")]
    TotalExceeded,

    #[error("Duplicate projects are not allowed")]
    DuplicateProjects,

    #[error("Percentages must be between 0 and 100")]
    OutOfRange(i64),

    #[error("no entry with id {0}")]
    UnknownEntry(EntryId),
}

/// Saturates instead of wrapping, so oversized input can only push the total up.
pub fn calculate_total(entries: &[Entry]) -> i64 {
    sum_values(entries.iter())
}

fn sum_values<'a>(entries: impl Iterator<Item = &'a Entry>) -> i64 {
    entries.fold(0i64, |total, entry| total.saturating_add(entry.percentage.value()))
}

fn check_range(value: i64) -> Result<(), AllocationError> {
    if (0..=100).contains(&value) {
        Ok(())
    } else {
        Err(AllocationError::OutOfRange(value))
    }
}

/// Entries without a project are still being filled in and never clash.
pub fn has_duplicate_projects(entries: &[Entry]) -> bool {
    let mut seen = HashSet::new();
    entries
        .iter()
        .map(|entry| entry.project_id.as_str())
        .filter(|project| !project.is_empty())
        .any(|project| !seen.insert(project))
}

/// The total is checked before duplicates, and both before the per-entry
/// range, so only the first failure is reported.
pub fn check_entries(entries: &[Entry]) -> Result<(), AllocationError> {
    if calculate_total(entries) > 100 {
        return Err(AllocationError::TotalExceeded);
    }
    if has_duplicate_projects(entries) {
        return Err(AllocationError::DuplicateProjects);
    }
    for entry in entries {
        check_range(entry.percentage.value())?;
    }

    Ok(())
}

/// Empty string when the entries are valid, otherwise the message to show.
pub fn validate_entries(entries: &[Entry]) -> String {
    match check_entries(entries) {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}

/// Rebalances every entry that is neither `changed_id` nor in
/// `manually_edited` so the whole list sums toward 100.
///
/// The non-manual entries share `max(0, 100 - manual_sum)` equally and the
/// integer remainder goes to the last of them, so their sum is exact.
/// Manual entries come back untouched and the list order is kept.
pub fn redistribute_percentages(
    entries: &[Entry],
    changed_id: &EntryId,
    manually_edited: &HashSet<EntryId>,
) -> Vec<Entry> {
    distribute(entries, |entry| {
        &entry.id == changed_id || manually_edited.contains(&entry.id)
    })
}

fn distribute(entries: &[Entry], is_manual: impl Fn(&Entry) -> bool) -> Vec<Entry> {
    let manual_sum = sum_values(entries.iter().filter(|entry| is_manual(entry)));

    let auto: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| !is_manual(entry))
        .map(|(index, _)| index)
        .collect();

    let last = match auto.last() {
        Some(&index) => index,
        None => return entries.to_vec(),
    };

    let remaining = 100i64.saturating_sub(manual_sum).max(0);
    let count = auto.len() as i64;
    let share = remaining / count;
    let remainder = remaining - share * count;

    let mut updated = entries.to_vec();
    for &index in &auto {
        updated[index].percentage = Percentage::from(share);
    }
    updated[last].percentage = Percentage::from(share + remainder);

    updated
}

/// Editing state of one week: the entries plus which of them the user has
/// pinned by typing a percentage. Each edit runs the same redistribution
/// the form does.
#[derive(Debug, Clone, Default)]
pub struct AllocationSheet {
    entries: Vec<Entry>,
    manually_edited: HashSet<EntryId>,
}

impl AllocationSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stored week reopens with nothing pinned.
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        AllocationSheet {
            entries,
            manually_edited: HashSet::new(),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    pub fn is_manual(&self, id: &EntryId) -> bool {
        self.manually_edited.contains(id)
    }

    pub fn total(&self) -> i64 {
        calculate_total(&self.entries)
    }

    pub fn validate(&self) -> String {
        validate_entries(&self.entries)
    }

    pub fn add_entry(&mut self, project_id: impl Into<String>) -> EntryId {
        let id = EntryId::generate();
        self.entries.push(Entry::new(id.clone(), project_id, Percentage::new("0")));
        self.rebalance();

        id
    }

    pub fn set_project(&mut self, id: &EntryId, project_id: impl Into<String>) -> Result<(), AllocationError> {
        let entry = self.find_mut(id)?;
        entry.project_id = project_id.into();

        Ok(())
    }

    /// Pins the entry at `percentage` and rebalances everything still unpinned.
    /// Values outside 0..=100 are refused and leave the sheet as it was.
    pub fn set_percentage(&mut self, id: &EntryId, percentage: i64) -> Result<(), AllocationError> {
        check_range(percentage)?;
        self.find_mut(id)?.percentage = Percentage::from(percentage);
        self.entries = redistribute_percentages(&self.entries, id, &self.manually_edited);
        self.manually_edited.insert(id.clone());

        Ok(())
    }

    pub fn remove_entry(&mut self, id: &EntryId) -> Result<Entry, AllocationError> {
        let index = self
            .entries
            .iter()
            .position(|entry| &entry.id == id)
            .ok_or_else(|| AllocationError::UnknownEntry(id.clone()))?;
        let removed = self.entries.remove(index);
        self.manually_edited.remove(id);
        self.rebalance();

        Ok(removed)
    }

    /// Unpins every entry without touching the current values.
    pub fn reset_manual(&mut self) {
        self.manually_edited.clear();
    }

    fn rebalance(&mut self) {
        let manual = &self.manually_edited;
        self.entries = distribute(&self.entries, |entry| manual.contains(&entry.id));
    }

    fn find_mut(&mut self, id: &EntryId) -> Result<&mut Entry, AllocationError> {
        self.entries
            .iter_mut()
            .find(|entry| &entry.id == id)
            .ok_or_else(|| AllocationError::UnknownEntry(id.clone()))
    }
}
