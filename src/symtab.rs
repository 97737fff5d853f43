use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::BufRead;

use color_eyre::{eyre::Context as _, Result};
use tracing::{debug, instrument};

/// What the ELF side of an object exports and imports.
#[derive(Debug, Default)]
pub struct ElfSymbols {
    /// Exported name → symbol size; data-object sizes are recorded negative
    /// to distinguish them from functions.
    pub exports: BTreeMap<String, i64>,
    pub undefined: BTreeSet<String>,
    /// Base name → versioned name (`foo` → `foo@@LIB_2`).
    pub aliases: BTreeMap<String, String>,
    pub needed: BTreeSet<String>,
    pub soname: Option<String>,
}

impl ElfSymbols {
    pub fn is_exported(&self, name: &str) -> bool {
        self.exports.contains_key(name) || self.aliases.contains_key(name)
    }
}

#[derive(PartialEq, Clone, Copy)]
enum Table {
    None,
    Dynamic,
    Static,
}

/// Parse the symbol-table and dynamic-section dump. The static `.symtab`
/// block only counts for kernel-module debug files; shared objects export
/// through `.dynsym` alone.
#[instrument(skip(reader))]
pub fn read_symbol_dump(reader: impl BufRead, kernel_module: bool) -> Result<ElfSymbols> {
    let mut out = ElfSymbols::default();
    // encounter-ordered rows for version-alias derivation
    let mut rows: Vec<(String, u64)> = Vec::new();
    let mut table = Table::None;

    for line in reader.lines() {
        let line = line.wrap_err("failed to read symbol dump")?;

        if line.contains("Symbol table") {
            table = if line.contains("'.dynsym'") {
                Table::Dynamic
            } else if line.contains("'.symtab'") {
                Table::Static
            } else {
                Table::None
            };
            continue;
        }
        if line.contains("NEEDED") {
            if let Some(lib) = bracketed(&line) {
                out.needed.insert(lib.to_owned());
            }
            continue;
        }
        if line.contains("SONAME") {
            if let Some(lib) = bracketed(&line) {
                out.soname = Some(lib.to_owned());
            }
            continue;
        }

        let usable = table == Table::Dynamic || (table == Table::Static && kernel_module);
        if !usable {
            continue;
        }
        let Some(row) = parse_row(&line) else {
            continue;
        };
        if !accept_row(&row) {
            continue;
        }

        if row.ndx == "UNDEF" || row.ndx == "UND" {
            out.undefined.insert(row.name);
        } else {
            let size = if matches!(row.typ.as_str(), "OBJECT" | "COMMON") {
                -row.size
            } else {
                row.size
            };
            rows.push((row.name.clone(), row.value));
            out.exports.insert(row.name, size);
        }
    }

    derive_aliases(&rows, &mut out.aliases);
    debug!(
        exports = out.exports.len(),
        undefined = out.undefined.len(),
        aliases = out.aliases.len(),
        "read symbol tables"
    );
    Ok(out)
}

struct Row {
    value: u64,
    size: i64,
    typ: String,
    bind: String,
    vis: String,
    ndx: String,
    name: String,
}

fn parse_row(line: &str) -> Option<Row> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 8 {
        return None;
    }
    tokens[0].strip_suffix(':')?.parse::<u64>().ok()?;
    let value = u64::from_str_radix(tokens[1].trim_start_matches("0x"), 16).ok()?;
    let size = tokens[2].parse::<i64>().ok()?;
    Some(Row {
        value,
        size,
        typ: tokens[3].to_owned(),
        bind: tokens[4].to_owned(),
        vis: tokens[5].to_owned(),
        ndx: tokens[6].to_owned(),
        name: tokens[7].to_owned(),
    })
}

fn accept_row(row: &Row) -> bool {
    if !matches!(row.bind.as_str(), "GLOBAL" | "WEAK") {
        return false;
    }
    let undef = row.ndx == "UNDEF" || row.ndx == "UND";
    if !matches!(
        row.typ.as_str(),
        "FUNC" | "IFUNC" | "GNU_IFUNC" | "OBJECT" | "COMMON"
    ) && !undef
    {
        return false;
    }
    if !matches!(row.vis.as_str(), "DEFAULT" | "PROTECTED") {
        return false;
    }
    // versioning pseudo-symbol
    if row.typ == "OBJECT" && row.value == 0 && row.ndx == "ABS" {
        return false;
    }
    true
}

fn bracketed(line: &str) -> Option<&str> {
    let start = line.find('[')?;
    let end = line[start..].find(']')? + start;
    Some(&line[start + 1..end])
}

/// Derive the base-name → versioned-name alias map. A bare export that
/// shares its value with a `@@` export aliases it directly; otherwise the
/// base is synthesized by stripping the version, preferring the default
/// (`@@`) version and breaking ties by first encounter.
fn derive_aliases(rows: &[(String, u64)], aliases: &mut BTreeMap<String, String>) {
    let mut by_value: HashMap<u64, Vec<&str>> = HashMap::new();
    for (name, value) in rows {
        by_value.entry(*value).or_default().push(name);
    }

    for (name, value) in rows {
        if name.contains('@') {
            continue;
        }
        let versioned = by_value[value].iter().find(|n| n.contains("@@"));
        if let Some(versioned) = versioned {
            aliases.entry(name.clone()).or_insert_with(|| (*versioned).to_owned());
        }
    }

    for default_pass in [true, false] {
        for (name, _) in rows {
            let Some(at) = name.find('@') else {
                continue;
            };
            if name[at..].starts_with("@@") != default_pass {
                continue;
            }
            let base = &name[..at];
            aliases
                .entry(base.to_owned())
                .or_insert_with(|| name.clone());
        }
    }
}

/// Architecture and word size from the ELF file-header dump.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub arch: String,
    pub word_size: u64,
}

#[instrument(skip(reader))]
pub fn read_file_header(reader: impl BufRead) -> Result<FileHeader> {
    let mut arch = String::from("unknown");
    let mut word_size = 8;

    for line in reader.lines() {
        let line = line.wrap_err("failed to read file-header dump")?;
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Class:") {
            word_size = if rest.trim() == "ELF32" { 4 } else { 8 };
        } else if let Some(rest) = trimmed.strip_prefix("Machine:") {
            arch = machine_to_arch(rest.trim());
        }
    }

    Ok(FileHeader { arch, word_size })
}

fn machine_to_arch(machine: &str) -> String {
    let lower = machine.to_ascii_lowercase();
    if lower.contains("x86-64") || lower.contains("x86_64") {
        "x86_64".to_owned()
    } else if lower.contains("80386") || lower.contains("i386") {
        "x86".to_owned()
    } else if lower.contains("aarch64") {
        "aarch64".to_owned()
    } else if lower.contains("arm") {
        "arm".to_owned()
    } else {
        lower.split_whitespace().last().unwrap_or("unknown").to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
Symbol table [ 5] '.dynsym' contains 10 entries:
   Num:            Value   Size Type    Bind   Vis          Ndx Name
     0: 0000000000000000      0 NOTYPE  LOCAL  DEFAULT    UNDEF
     1: 0000000000000000      0 FUNC    GLOBAL DEFAULT    UNDEF __cxa_finalize
     2: 0000000000001139     11 FUNC    GLOBAL DEFAULT       13 foo@@LIB_2
     3: 0000000000001139     11 FUNC    GLOBAL DEFAULT       13 foo@LIB_1
     4: 0000000000004010      4 OBJECT  GLOBAL DEFAULT       23 g
     5: 0000000000000000      0 OBJECT  GLOBAL DEFAULT      ABS LIB_2
     6: 0000000000002000      8 FUNC    GLOBAL HIDDEN        13 internal
     7: 0000000000002100      8 FUNC    LOCAL  DEFAULT       13 local_fn
     8: 0000000000002200      9 FUNC    WEAK   DEFAULT       13 weak_fn
     9: 0000000000002300      7 FUNC    GLOBAL DEFAULT       13 bar

Symbol table [ 6] '.symtab' contains 2 entries:
   Num:            Value   Size Type    Bind   Vis          Ndx Name
     0: 0000000000003000      4 OBJECT  GLOBAL DEFAULT       23 static_obj

Dynamic segment contains 3 entries:
  Type              Value
  NEEDED            Shared library: [libc.so.6]
  NEEDED            Shared library: [libm.so.6]
  SONAME            Library soname: [libsample.so.1]
";

    #[test]
    fn filtering_and_classification() {
        let syms = read_symbol_dump(DUMP.as_bytes(), false).unwrap();
        assert!(syms.exports.contains_key("foo@@LIB_2"));
        assert!(syms.exports.contains_key("weak_fn"));
        assert!(syms.exports.contains_key("bar"));
        // object sizes are negated
        assert_eq!(syms.exports["g"], -4);
        assert_eq!(syms.exports["foo@@LIB_2"], 11);
        // locals, hidden, versioning pseudo-symbols stay out
        assert!(!syms.exports.contains_key("internal"));
        assert!(!syms.exports.contains_key("local_fn"));
        assert!(!syms.exports.contains_key("LIB_2"));
        // static table ignored for a shared object
        assert!(!syms.exports.contains_key("static_obj"));
        assert!(syms.undefined.contains("__cxa_finalize"));
    }

    #[test]
    fn static_table_honored_for_kernel_modules() {
        let syms = read_symbol_dump(DUMP.as_bytes(), true).unwrap();
        assert_eq!(syms.exports["static_obj"], -4);
    }

    #[test]
    fn version_alias_prefers_default_version() {
        let syms = read_symbol_dump(DUMP.as_bytes(), false).unwrap();
        assert_eq!(syms.aliases["foo"], "foo@@LIB_2");
    }

    #[test]
    fn bare_name_adopts_same_value_versioned_export() {
        let dump = "\
Symbol table [ 5] '.dynsym' contains 2 entries:
     1: 0000000000001139     11 FUNC    GLOBAL DEFAULT       13 baz
     2: 0000000000001139     11 FUNC    GLOBAL DEFAULT       13 baz@@V3
";
        let syms = read_symbol_dump(dump.as_bytes(), false).unwrap();
        assert_eq!(syms.aliases["baz"], "baz@@V3");
    }

    #[test]
    fn needed_and_soname() {
        let syms = read_symbol_dump(DUMP.as_bytes(), false).unwrap();
        assert!(syms.needed.contains("libc.so.6"));
        assert!(syms.needed.contains("libm.so.6"));
        assert_eq!(syms.soname.as_deref(), Some("libsample.so.1"));
    }

    #[test]
    fn file_header() {
        let dump = "\
ELF Header:
  Class:                             ELF64
  Machine:                           AMD x86-64
";
        let hdr = read_file_header(dump.as_bytes()).unwrap();
        assert_eq!(hdr.arch, "x86_64");
        assert_eq!(hdr.word_size, 8);
    }
}
