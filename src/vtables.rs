use std::collections::BTreeMap;
use std::io::BufRead;

use color_eyre::{eyre::Context as _, Result};
use tracing::{debug, instrument};

/// Class name → vtable slot → entry text.
pub type VTableMap = BTreeMap<String, BTreeMap<u64, String>>;

/// Parse the vtable dump. Blocks open with `Vtable for <class>` and list
/// `<slot> <entry>` lines; slot 0 is the RTTI offset and is dropped.
/// Anything else (entry counts, separators) is ignored.
#[instrument(skip(reader))]
pub fn read_vtable_dump(reader: impl BufRead) -> Result<VTableMap> {
    let mut map = VTableMap::new();
    let mut current: Option<String> = None;

    for line in reader.lines() {
        let line = line.wrap_err("failed to read vtable dump")?;
        let trimmed = line.trim();

        if let Some(class) = trimmed.strip_prefix("Vtable for ") {
            let class = class.trim().to_owned();
            map.entry(class.clone()).or_default();
            current = Some(class);
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        let Some(class) = current.as_deref() else {
            continue;
        };
        let Some((slot, entry)) = trimmed.split_once(char::is_whitespace) else {
            continue;
        };
        let Ok(slot) = slot.parse::<u64>() else {
            continue;
        };
        if slot == 0 {
            continue;
        }
        map.get_mut(class)
            .expect("current class is always inserted")
            .entry(slot)
            .or_insert_with(|| entry.trim().to_owned());
    }

    debug!(classes = map.len(), "read vtable dump");
    Ok(map)
}
