use toml::{Table, Value};

/// Splits a dotted key into lower-cased path segments.
///
/// Keys are case-insensitive, so `APP.Name` and `app.name` address the same
/// entry. Empty segments are dropped.
pub fn key_path(key: &str) -> Vec<String> {
    key.split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Looks up a value by path segments, descending into nested tables.
pub fn lookup_path<'a>(table: &'a Table, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = table.get(first)?;

    for part in rest {
        current = current.as_table()?.get(part)?;
    }

    Some(current)
}

/// Writes `value` at `path`, creating intermediate tables as needed.
///
/// A table written over an existing table is merged recursively; any other
/// value replaces what was there.
pub fn merge_at_path(table: &mut Table, path: &[String], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        if let Value::Table(overlay) = value {
            deep_merge(table, overlay);
        }
        return;
    };

    if rest.is_empty() {
        match (table.get_mut(first), value) {
            (Some(Value::Table(base)), Value::Table(overlay)) => {
                deep_merge(base, overlay);
            }
            (_, value) => {
                table.insert(first.clone(), value);
            }
        }
        return;
    }

    if !matches!(table.get(first), Some(Value::Table(_))) {
        table.insert(first.clone(), Value::Table(Table::new()));
    }

    if let Some(Value::Table(nested)) = table.get_mut(first) {
        merge_at_path(nested, rest, value);
    }
}

/// Lower-cases every key of a table, recursively.
///
/// Dynamic sections hand back tables built by application code, which may use
/// any casing.
pub fn normalize_keys(table: Table) -> Table {
    table
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Table(nested) => Value::Table(normalize_keys(nested)),
                other => other,
            };
            (key.to_lowercase(), value)
        })
        .collect()
}

fn deep_merge(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(base_table)), Value::Table(overlay_table)) => {
                deep_merge(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
