use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use dsupgrade_core::{
    merge_entries, normalize_dn, parent_dn, parse_entries, write_entries, ChangeOperation,
    ChangeRecord, Entry, ModificationKind,
};

pub const SCHEMA_DN: &str = "cn=schema";
const USER_SCHEMA_HEADER: &str =
    "dn: cn=schema\nobjectClass: top\nobjectClass: ldapSubentry\nobjectClass: subschema\n";

/// Target a change record is applied to.
pub trait ConfigStore {
    fn apply(&mut self, record: &ChangeRecord) -> Result<()>;
}

/// Entries of one LDIF file, rewritten after every applied record.
#[derive(Debug, Clone)]
pub struct LdifFileStore {
    path: PathBuf,
    entries: Vec<Entry>,
}

impl LdifFileStore {
    pub fn open(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let entries =
            parse_entries(&raw).with_context(|| format!("failed parsing {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, dn: &str) -> Option<&Entry> {
        let wanted = normalize_dn(dn);
        self.entries
            .iter()
            .find(|entry| entry.normalized_dn() == wanted)
    }

    fn position(&self, dn: &str) -> Option<usize> {
        let wanted = normalize_dn(dn);
        self.entries
            .iter()
            .position(|entry| entry.normalized_dn() == wanted)
    }

    fn apply_in_memory(&mut self, record: &ChangeRecord) -> Result<()> {
        match record.operation {
            ChangeOperation::Add => {
                if self.position(&record.target).is_some() {
                    return Err(anyhow!("entry '{}' already exists", record.target));
                }
                self.entries.push(record.entry()?);
            }
            ChangeOperation::Modify => {
                let index = self
                    .position(&record.target)
                    .ok_or_else(|| anyhow!("entry '{}' does not exist", record.target))?;
                let mut updated = self.entries[index].clone();
                apply_modifications(&mut updated, record)?;
                self.entries[index] = updated;
            }
            ChangeOperation::Delete => {
                let index = self
                    .position(&record.target)
                    .ok_or_else(|| anyhow!("entry '{}' does not exist", record.target))?;
                let target = normalize_dn(&record.target);
                let has_children = self.entries.iter().any(|entry| {
                    parent_dn(&entry.dn).is_some_and(|parent| normalize_dn(parent) == target)
                });
                if has_children {
                    return Err(anyhow!(
                        "entry '{}' cannot be deleted because it has children",
                        record.target
                    ));
                }
                self.entries.remove(index);
            }
        }
        Ok(())
    }
}

impl ConfigStore for LdifFileStore {
    fn apply(&mut self, record: &ChangeRecord) -> Result<()> {
        let previous = self.entries.clone();
        self.apply_in_memory(record)?;
        if let Err(err) = write_atomically(&self.path, &write_entries(&self.entries)) {
            self.entries = previous;
            return Err(err);
        }
        Ok(())
    }
}

fn apply_modifications(entry: &mut Entry, record: &ChangeRecord) -> Result<()> {
    for modification in record.modifications()? {
        let attribute = modification.attribute.as_str();
        match modification.kind {
            ModificationKind::Add => {
                for value in &modification.values {
                    if !entry.add_value(attribute, value) {
                        return Err(anyhow!(
                            "value '{value}' of '{attribute}' already present in '{}'",
                            record.target
                        ));
                    }
                }
            }
            ModificationKind::Delete if modification.values.is_empty() => {
                if !entry.remove_attribute(attribute) {
                    return Err(anyhow!(
                        "attribute '{attribute}' not present in '{}'",
                        record.target
                    ));
                }
            }
            ModificationKind::Delete => {
                for value in &modification.values {
                    if !entry.remove_value(attribute, value) {
                        return Err(anyhow!(
                            "value '{value}' of '{attribute}' not present in '{}'",
                            record.target
                        ));
                    }
                }
            }
            ModificationKind::Replace => entry.replace_attribute(attribute, &modification.values),
        }
    }
    Ok(())
}

/// Live schema spread over the `*.ldif` files of the schema directory. Additions go to
/// the user schema file; removals edit whichever file holds the value.
#[derive(Debug, Clone)]
pub struct SchemaStore {
    schema_dir: PathBuf,
    user_file: PathBuf,
}

impl SchemaStore {
    pub fn new(schema_dir: &Path, user_file: &Path) -> Self {
        Self {
            schema_dir: schema_dir.to_path_buf(),
            user_file: user_file.to_path_buf(),
        }
    }

    pub fn merged_entry(&self) -> Result<Entry> {
        let files = self.load_files()?;
        let entries: Vec<&Entry> = files.iter().flat_map(|(_, entries)| entries).collect();
        Ok(merge_entries(SCHEMA_DN, entries))
    }

    fn load_files(&self) -> Result<Vec<(PathBuf, Vec<Entry>)>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.schema_dir)
            .with_context(|| format!("failed to read {}", self.schema_dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "ldif") {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let entries = parse_entries(&raw)
                    .with_context(|| format!("failed parsing {}", path.display()))?;
                Ok((path, entries))
            })
            .collect()
    }

    fn add_user_value(&self, attribute: &str, value: &str) -> Result<()> {
        let mut entries = if self.user_file.is_file() {
            let raw = fs::read_to_string(&self.user_file)
                .with_context(|| format!("failed to read {}", self.user_file.display()))?;
            parse_entries(&raw)
                .with_context(|| format!("failed parsing {}", self.user_file.display()))?
        } else {
            parse_entries(USER_SCHEMA_HEADER)?
        };
        let schema = entries
            .iter_mut()
            .find(|entry| normalize_dn(&entry.dn) == SCHEMA_DN)
            .ok_or_else(|| anyhow!("{} holds no schema entry", self.user_file.display()))?;
        schema.add_value(attribute, value);
        write_atomically(&self.user_file, &write_entries(&entries))
    }

    fn remove_value_everywhere(&self, attribute: &str, value: Option<&str>) -> Result<bool> {
        let mut removed = false;
        for (path, mut entries) in self.load_files()? {
            let mut changed = false;
            for entry in entries.iter_mut() {
                changed |= match value {
                    Some(value) => entry.remove_value(attribute, value),
                    None => entry.remove_attribute(attribute),
                };
            }
            if changed {
                write_atomically(&path, &write_entries(&entries))?;
                removed = true;
            }
        }
        Ok(removed)
    }
}

impl ConfigStore for SchemaStore {
    fn apply(&mut self, record: &ChangeRecord) -> Result<()> {
        if record.operation != ChangeOperation::Modify || normalize_dn(&record.target) != SCHEMA_DN
        {
            return Err(anyhow!(
                "schema changes must modify '{SCHEMA_DN}', got {} of '{}'",
                record.operation,
                record.target
            ));
        }

        let merged = self.merged_entry()?;
        let modifications = record.modifications()?;
        // Check every modification before touching a file.
        for modification in &modifications {
            let attribute = modification.attribute.as_str();
            match modification.kind {
                ModificationKind::Add => {
                    if let Some(value) = modification
                        .values
                        .iter()
                        .find(|value| merged.has_value(attribute, value))
                    {
                        return Err(anyhow!("schema already defines {attribute}: {value}"));
                    }
                }
                ModificationKind::Delete => {
                    if let Some(value) = modification
                        .values
                        .iter()
                        .find(|value| !merged.has_value(attribute, value))
                    {
                        return Err(anyhow!("schema does not define {attribute}: {value}"));
                    }
                }
                ModificationKind::Replace => {}
            }
        }

        for modification in &modifications {
            let attribute = modification.attribute.as_str();
            match modification.kind {
                ModificationKind::Add => {
                    for value in &modification.values {
                        self.add_user_value(attribute, value)?;
                    }
                }
                ModificationKind::Delete if modification.values.is_empty() => {
                    self.remove_value_everywhere(attribute, None)?;
                }
                ModificationKind::Delete => {
                    for value in &modification.values {
                        self.remove_value_everywhere(attribute, Some(value))?;
                    }
                }
                ModificationKind::Replace => {
                    self.remove_value_everywhere(attribute, None)?;
                    for value in &modification.values {
                        self.add_user_value(attribute, value)?;
                    }
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp-write");
    fs::write(&tmp, content).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
