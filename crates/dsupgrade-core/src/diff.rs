use std::collections::{BTreeMap, HashMap, HashSet};

use crate::ldif::{normalize_dn, Attribute, ChangeRecord, Entry, Modification, ModificationKind};

/// Change records that turn `base` into `current`.
///
/// Adds and modifies follow the order of `current`; deletes follow after, in reverse
/// order of `base` so children go before their parents.
pub fn diff_entries(base: &[Entry], current: &[Entry]) -> Vec<ChangeRecord> {
    let base_by_dn: HashMap<String, &Entry> = base
        .iter()
        .map(|entry| (entry.normalized_dn(), entry))
        .collect();
    let current_dns: HashSet<String> = current.iter().map(Entry::normalized_dn).collect();

    let mut records = Vec::new();
    for entry in current {
        match base_by_dn.get(&entry.normalized_dn()) {
            None => records.push(ChangeRecord::add(entry)),
            Some(previous) => {
                let modifications = diff_attributes(previous, entry);
                if !modifications.is_empty() {
                    records.push(ChangeRecord::modify(entry.dn.clone(), &modifications));
                }
            }
        }
    }

    for entry in base.iter().rev() {
        if !current_dns.contains(&entry.normalized_dn()) {
            records.push(ChangeRecord::delete(entry.dn.clone()));
        }
    }

    records
}

pub fn entries_equivalent(left: &[Entry], right: &[Entry]) -> bool {
    diff_entries(left, right).is_empty()
}

/// Per-attribute value changes between two versions of the same entry, in attribute
/// name order with removals ahead of additions.
pub fn diff_attributes(previous: &Entry, current: &Entry) -> Vec<Modification> {
    let mut names: BTreeMap<String, String> = BTreeMap::new();
    for attribute in &previous.attributes {
        names
            .entry(attribute.name.to_ascii_lowercase())
            .or_insert_with(|| attribute.name.clone());
    }
    for attribute in &current.attributes {
        names.insert(attribute.name.to_ascii_lowercase(), attribute.name.clone());
    }

    let mut modifications = Vec::new();
    for name in names.values() {
        let old_values = previous.values(name);
        let new_values = current.values(name);

        let removed: Vec<String> = old_values
            .iter()
            .filter(|value| !new_values.contains(value))
            .cloned()
            .collect();
        let added: Vec<String> = new_values
            .iter()
            .filter(|value| !old_values.contains(value))
            .cloned()
            .collect();

        if !removed.is_empty() {
            modifications.push(Modification {
                kind: ModificationKind::Delete,
                attribute: name.clone(),
                values: removed,
            });
        }
        if !added.is_empty() {
            modifications.push(Modification {
                kind: ModificationKind::Add,
                attribute: name.clone(),
                values: added,
            });
        }
    }
    modifications
}

/// Unions the attribute values of several entries into one entry named `dn`.
pub fn merge_entries<'a>(dn: &str, entries: impl IntoIterator<Item = &'a Entry>) -> Entry {
    let mut merged = Entry::new(dn);
    for entry in entries {
        // Values repeated across inputs (objectClass in every schema file) collapse.
        for Attribute { name, values } in &entry.attributes {
            for value in values {
                merged.add_value(name, value);
            }
        }
    }
    merged
}

pub fn same_dn(left: &str, right: &str) -> bool {
    normalize_dn(left) == normalize_dn(right)
}
