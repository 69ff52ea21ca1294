use std::fmt;
use std::io::BufRead;

use anyhow::{anyhow, Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub attributes: Vec<Attribute>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    pub fn normalized_dn(&self) -> String {
        normalize_dn(&self.dn)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name.eq_ignore_ascii_case(name))
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.attribute(name)
            .map(|attribute| attribute.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.values(name).iter().any(|existing| existing == value)
    }

    /// Returns `false` when the value is already present.
    pub fn add_value(&mut self, name: &str, value: &str) -> bool {
        match self
            .attributes
            .iter_mut()
            .find(|attribute| attribute.name.eq_ignore_ascii_case(name))
        {
            Some(attribute) => {
                if attribute.values.iter().any(|existing| existing == value) {
                    return false;
                }
                attribute.values.push(value.to_string());
            }
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                values: vec![value.to_string()],
            }),
        }
        true
    }

    /// Returns `false` when the value is absent.
    pub fn remove_value(&mut self, name: &str, value: &str) -> bool {
        let Some(index) = self
            .attributes
            .iter()
            .position(|attribute| attribute.name.eq_ignore_ascii_case(name))
        else {
            return false;
        };
        let attribute = &mut self.attributes[index];
        let before = attribute.values.len();
        attribute.values.retain(|existing| existing != value);
        let removed = attribute.values.len() != before;
        if attribute.values.is_empty() {
            self.attributes.remove(index);
        }
        removed
    }

    pub fn remove_attribute(&mut self, name: &str) -> bool {
        let before = self.attributes.len();
        self.attributes
            .retain(|attribute| !attribute.name.eq_ignore_ascii_case(name));
        self.attributes.len() != before
    }

    pub fn replace_attribute(&mut self, name: &str, values: &[String]) {
        if values.is_empty() {
            self.remove_attribute(name);
            return;
        }
        match self
            .attributes
            .iter_mut()
            .find(|attribute| attribute.name.eq_ignore_ascii_case(name))
        {
            Some(attribute) => attribute.values = values.to_vec(),
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                values: values.to_vec(),
            }),
        }
    }

    pub fn to_ldif(&self) -> String {
        let mut out = format!("dn: {}\n", self.dn);
        for attribute in &self.attributes {
            for value in &attribute.values {
                out.push_str(&render_line(&attribute.name, value));
                out.push('\n');
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperation {
    Add,
    Modify,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "modify" => Ok(Self::Modify),
            "delete" => Ok(Self::Delete),
            other => Err(anyhow!("unsupported changetype: {other}")),
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationKind {
    Add,
    Delete,
    Replace,
}

impl ModificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Replace => "replace",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "add" => Some(Self::Add),
            "delete" => Some(Self::Delete),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub kind: ModificationKind,
    pub attribute: String,
    pub values: Vec<String>,
}

/// One serialized configuration or schema mutation. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub target: String,
    pub operation: ChangeOperation,
    pub payload: Vec<String>,
}

impl ChangeRecord {
    pub fn add(entry: &Entry) -> Self {
        let mut payload = Vec::new();
        for attribute in &entry.attributes {
            for value in &attribute.values {
                payload.push(render_line(&attribute.name, value));
            }
        }
        Self {
            target: entry.dn.clone(),
            operation: ChangeOperation::Add,
            payload,
        }
    }

    pub fn delete(dn: impl Into<String>) -> Self {
        Self {
            target: dn.into(),
            operation: ChangeOperation::Delete,
            payload: Vec::new(),
        }
    }

    pub fn modify(dn: impl Into<String>, modifications: &[Modification]) -> Self {
        let mut payload = Vec::new();
        for modification in modifications {
            payload.push(render_line(
                modification.kind.as_str(),
                &modification.attribute,
            ));
            for value in &modification.values {
                payload.push(render_line(&modification.attribute, value));
            }
            payload.push("-".to_string());
        }
        Self {
            target: dn.into(),
            operation: ChangeOperation::Modify,
            payload,
        }
    }

    /// The entry an `add` record creates.
    pub fn entry(&self) -> Result<Entry> {
        if self.operation != ChangeOperation::Add {
            return Err(anyhow!(
                "record for '{}' is a {} record, not an add",
                self.target,
                self.operation
            ));
        }
        let mut entry = Entry::new(self.target.clone());
        for line in &self.payload {
            let (name, value) = split_line(line)?;
            if name == "-" {
                return Err(anyhow!("unexpected '-' in add record for '{}'", self.target));
            }
            entry.add_value(&name, &value);
        }
        Ok(entry)
    }

    pub fn modifications(&self) -> Result<Vec<Modification>> {
        if self.operation != ChangeOperation::Modify {
            return Err(anyhow!(
                "record for '{}' is a {} record, not a modify",
                self.target,
                self.operation
            ));
        }

        let mut modifications = Vec::new();
        let mut current: Option<Modification> = None;
        for line in &self.payload {
            let (name, value) = split_line(line)?;
            if name == "-" {
                let finished = current.take().ok_or_else(|| {
                    anyhow!("dangling '-' in modify record for '{}'", self.target)
                })?;
                modifications.push(finished);
                continue;
            }
            match current.as_mut() {
                None => {
                    let kind = ModificationKind::parse(&name).ok_or_else(|| {
                        anyhow!(
                            "expected add/delete/replace in modify record for '{}', found '{}'",
                            self.target,
                            name
                        )
                    })?;
                    current = Some(Modification {
                        kind,
                        attribute: value,
                        values: Vec::new(),
                    });
                }
                Some(modification) => {
                    if !name.eq_ignore_ascii_case(&modification.attribute) {
                        return Err(anyhow!(
                            "attribute '{}' does not match modification of '{}' for '{}'",
                            name,
                            modification.attribute,
                            self.target
                        ));
                    }
                    modification.values.push(value);
                }
            }
        }
        if let Some(trailing) = current {
            modifications.push(trailing);
        }
        Ok(modifications)
    }

    pub fn to_ldif(&self) -> String {
        let mut out = format!(
            "dn: {}\nchangetype: {}\n",
            self.target,
            self.operation.as_str()
        );
        for line in &self.payload {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    fn validate(&self) -> Result<()> {
        match self.operation {
            ChangeOperation::Add => self.entry().map(|_| ()),
            ChangeOperation::Modify => self.modifications().map(|_| ()),
            ChangeOperation::Delete => {
                if self.payload.is_empty() {
                    Ok(())
                } else {
                    Err(anyhow!(
                        "delete record for '{}' must not carry a payload",
                        self.target
                    ))
                }
            }
        }
    }
}

/// Streaming reader for entries and change records.
pub struct LdifReader<R> {
    reader: R,
    line_no: usize,
}

impl<R: BufRead> LdifReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line_no: 0 }
    }

    pub fn read_entry(&mut self) -> Result<Option<Entry>> {
        let Some((start_line, lines)) = self.next_content_block()? else {
            return Ok(None);
        };

        let mut iter = lines.into_iter();
        let dn = expect_dn(iter.next(), start_line)?;
        let mut entry = Entry::new(dn);
        for (name, value) in iter {
            if name == "-" || name.eq_ignore_ascii_case("changetype") {
                return Err(anyhow!(
                    "line {start_line}: expected a plain entry for '{}', found a change record",
                    entry.dn
                ));
            }
            entry.add_value(&name, &value);
        }
        Ok(Some(entry))
    }

    pub fn read_change_record(&mut self) -> Result<Option<ChangeRecord>> {
        let Some((start_line, lines)) = self.next_content_block()? else {
            return Ok(None);
        };

        let mut iter = lines.into_iter().peekable();
        let target = expect_dn(iter.next(), start_line)?;
        let operation = match iter.peek() {
            Some((name, _)) if name.eq_ignore_ascii_case("changetype") => {
                let (_, value) = iter.next().unwrap_or_default();
                ChangeOperation::parse(&value)
                    .with_context(|| format!("line {start_line}: record for '{target}'"))?
            }
            _ => ChangeOperation::Add,
        };
        let payload = iter
            .map(|(name, value)| {
                if name == "-" {
                    "-".to_string()
                } else {
                    render_line(&name, &value)
                }
            })
            .collect();

        let record = ChangeRecord {
            target,
            operation,
            payload,
        };
        record
            .validate()
            .with_context(|| format!("invalid change record starting at line {start_line}"))?;
        Ok(Some(record))
    }

    pub fn entries(mut self) -> impl Iterator<Item = Result<Entry>> {
        std::iter::from_fn(move || self.read_entry().transpose())
    }

    pub fn change_records(mut self) -> impl Iterator<Item = Result<ChangeRecord>> {
        std::iter::from_fn(move || self.read_change_record().transpose())
    }

    fn next_content_block(&mut self) -> Result<Option<(usize, Vec<(String, String)>)>> {
        loop {
            let Some((start_line, mut lines)) = self.next_block()? else {
                return Ok(None);
            };
            if lines
                .first()
                .is_some_and(|(name, _)| name.eq_ignore_ascii_case("version"))
            {
                lines.remove(0);
            }
            if !lines.is_empty() {
                return Ok(Some((start_line, lines)));
            }
        }
    }

    fn next_block(&mut self) -> Result<Option<(usize, Vec<(String, String)>)>> {
        let mut logical: Vec<String> = Vec::new();
        let mut start_line = 0;
        let mut in_comment = false;
        let mut buf = String::new();

        loop {
            buf.clear();
            let read = self
                .reader
                .read_line(&mut buf)
                .context("failed reading LDIF input")?;
            if read == 0 {
                break;
            }
            self.line_no += 1;
            let line = buf.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                in_comment = false;
                if logical.is_empty() {
                    continue;
                }
                break;
            }
            if line.starts_with('#') {
                in_comment = true;
                continue;
            }
            if let Some(continued) = line.strip_prefix(' ') {
                if in_comment {
                    continue;
                }
                let last = logical.last_mut().ok_or_else(|| {
                    anyhow!(
                        "line {}: continuation without a preceding line",
                        self.line_no
                    )
                })?;
                last.push_str(continued);
                continue;
            }
            in_comment = false;
            if logical.is_empty() {
                start_line = self.line_no;
            }
            logical.push(line.to_string());
        }

        if logical.is_empty() {
            return Ok(None);
        }

        let parsed = logical
            .iter()
            .map(|line| split_line(line).with_context(|| format!("near line {start_line}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some((start_line, parsed)))
    }
}

pub fn parse_entries(input: &str) -> Result<Vec<Entry>> {
    LdifReader::new(input.as_bytes()).entries().collect()
}

pub fn parse_change_records(input: &str) -> Result<Vec<ChangeRecord>> {
    LdifReader::new(input.as_bytes()).change_records().collect()
}

pub fn write_entries(entries: &[Entry]) -> String {
    entries
        .iter()
        .map(Entry::to_ldif)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn write_change_records(records: &[ChangeRecord]) -> String {
    records
        .iter()
        .map(ChangeRecord::to_ldif)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lowercases and trims each RDN so equivalent DNs compare equal.
pub fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| {
            let rdn = rdn.trim();
            match rdn.split_once('=') {
                Some((attr, value)) => format!(
                    "{}={}",
                    attr.trim().to_ascii_lowercase(),
                    value.trim().to_ascii_lowercase()
                ),
                None => rdn.to_ascii_lowercase(),
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parent_dn(dn: &str) -> Option<&str> {
    dn.split_once(',').map(|(_, parent)| parent.trim())
}

fn expect_dn(first: Option<(String, String)>, start_line: usize) -> Result<String> {
    match first {
        Some((name, value)) if name.eq_ignore_ascii_case("dn") => {
            if value.trim().is_empty() {
                Err(anyhow!("line {start_line}: empty dn"))
            } else {
                Ok(value)
            }
        }
        Some((name, _)) => Err(anyhow!(
            "line {start_line}: record must start with 'dn:', found '{name}'"
        )),
        None => Err(anyhow!("line {start_line}: empty record")),
    }
}

fn render_line(name: &str, value: &str) -> String {
    if value.is_empty() {
        format!("{name}:")
    } else {
        format!("{name}: {value}")
    }
}

fn split_line(line: &str) -> Result<(String, String)> {
    if line == "-" {
        return Ok(("-".to_string(), String::new()));
    }
    let (name, rest) = line
        .split_once(':')
        .ok_or_else(|| anyhow!("malformed LDIF line (missing ':'): {line}"))?;
    if rest.starts_with(':') {
        return Err(anyhow!(
            "base64-encoded values are not supported: {}",
            name.trim()
        ));
    }
    if rest.starts_with('<') {
        return Err(anyhow!("URL values are not supported: {}", name.trim()));
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("malformed LDIF line (empty attribute name): {line}"));
    }
    Ok((name.to_string(), rest.trim_start().to_string()))
}
