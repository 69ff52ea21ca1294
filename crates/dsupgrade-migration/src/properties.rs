/// Keys of a `key=value` / `key: value` properties text, in file order.
pub fn property_keys(raw: &str) -> Vec<String> {
    property_lines(raw).map(|(key, _)| key.to_string()).collect()
}

/// Property lines of `incoming` whose key `existing` does not define.
pub fn missing_properties(existing: &str, incoming: &str) -> Vec<String> {
    let known = property_keys(existing);
    property_lines(incoming)
        .filter(|(key, _)| !known.iter().any(|existing_key| existing_key == key))
        .map(|(_, line)| line.to_string())
        .collect()
}

fn property_lines(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    raw.lines().filter_map(|line| {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            return None;
        }
        let split = trimmed.find(['=', ':']).unwrap_or(trimmed.len());
        let key = trimmed[..split].trim();
        if key.is_empty() {
            return None;
        }
        Some((key, trimmed))
    })
}
