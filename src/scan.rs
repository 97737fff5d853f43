use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;

use color_eyre::{eyre::Context as _, Result};
use tracing::{debug, instrument, warn};

use crate::consts::{DIE_TAGS, HEADER_EXTS};
use crate::die::{AttrValue, Die, DieStore, Offset};

/// Result of scanning one DIE dump: the reassembled store plus per-unit
/// environment attributes.
pub struct DieScan {
    pub store: DieStore,
    pub units: BTreeMap<Offset, UnitInfo>,
}

#[derive(Debug, Default, Clone)]
pub struct UnitInfo {
    pub producer: Option<String>,
    pub language: Option<String>,
    pub stmt_list: Option<u64>,
}

/// One entry of a line-program file table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub header: bool,
}

/// File-number → path maps, keyed by the `stmt_list` offset of the owning
/// compile unit.
#[derive(Default)]
pub struct LineTables {
    tables: HashMap<u64, BTreeMap<u64, FileEntry>>,
}

impl LineTables {
    pub fn file(&self, stmt_list: u64, num: u64) -> Option<&FileEntry> {
        self.tables.get(&stmt_list)?.get(&num)
    }
}

/// Parse the disassembled DIE dump. Lines of the shape
/// `[<hex-offset>]<indent><tag-name>` open a DIE; indented
/// `<attr>  (<form>) <value>` lines populate it. Depth is the indent length,
/// and the lexical parent sits two columns up.
#[instrument(skip(reader))]
pub fn scan_die_dump(reader: impl BufRead) -> Result<DieScan> {
    let mut store = DieStore::default();
    // (depth, offset) of every open ancestor, unknown tags included
    let mut stack: Vec<(usize, Offset)> = Vec::new();
    let mut current_unit: Offset = 0;
    let mut current: Option<Die> = None;

    for line in reader.lines() {
        let line = line.wrap_err("failed to read DIE dump")?;

        if let Some((offset, depth, tag_name)) = parse_die_header(&line) {
            if let Some(die) = current.take() {
                store.insert(die);
            }

            while stack.last().is_some_and(|&(d, _)| d >= depth) {
                stack.pop();
            }
            if let Some(&(_, parent)) = stack.last() {
                store.note_parent(offset, parent);
            }
            stack.push((depth, offset));

            let Some(&tag) = DIE_TAGS.get(tag_name) else {
                // Outside the closed tag set; it still nests, so it stays on
                // the stack, but it gets no record.
                continue;
            };
            if tag == crate::die::DieTag::CompileUnit {
                current_unit = offset;
            }
            current = Some(Die::new(offset, tag, depth, current_unit));
        } else if let Some((name, form, rest)) = parse_attr_line(&line) {
            if let Some(die) = current.as_mut() {
                if let Some(value) = decode_attr(name, form, rest) {
                    die.set_attr(name, value);
                }
            }
        }
    }
    if let Some(die) = current.take() {
        store.insert(die);
    }

    store.finalize();

    let mut units = BTreeMap::new();
    for &unit in store.units() {
        let die = store.get(unit).expect("unit offset from the store");
        units.insert(
            unit,
            UnitInfo {
                producer: die.str_attr("producer").map(str::to_owned),
                language: die.keyword("language").map(str::to_owned),
                stmt_list: die.int_attr("stmt_list").map(|n| n as u64),
            },
        );
    }

    debug!(dies = store.len(), units = units.len(), "scanned DIE dump");
    Ok(DieScan { store, units })
}

fn parse_die_header(line: &str) -> Option<(Offset, usize, &str)> {
    let rest = line.strip_prefix(' ').unwrap_or(line);
    let rest = rest.strip_prefix('[')?;
    let (off_str, rest) = rest.split_once(']')?;
    let offset = u64::from_str_radix(off_str.trim(), 16).ok()?;
    let trimmed = rest.trim_start();
    let depth = rest.len() - trimmed.len();
    let tag = trimmed.split_whitespace().next()?;
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((offset, depth, tag))
}

fn parse_attr_line(line: &str) -> Option<(&str, &str, &str)> {
    let trimmed = line.trim_start();
    let (name, rest) = trimmed.split_once(char::is_whitespace)?;
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let rest = rest.trim_start().strip_prefix('(')?;
    let (form, value) = rest.split_once(')')?;
    Some((name, form, value.trim()))
}

fn decode_attr(name: &str, form: &str, rest: &str) -> Option<AttrValue> {
    match form {
        "ref1" | "ref2" | "ref4" | "ref8" | "ref_udata" | "ref_addr" | "GNU_ref_alt" => {
            let inner = rest.strip_prefix('[')?.strip_suffix(']')?;
            let off = u64::from_str_radix(inner.trim().trim_start_matches("0x"), 16).ok()?;
            Some(AttrValue::Ref(off))
        }
        "string" | "strp" | "line_strp" | "strx" | "strx1" | "strx2" | "strx3" | "strx4"
        | "GNU_strp_alt" => Some(AttrValue::Str(unquote(rest).to_owned())),
        "addr" | "addrx" => parse_addr(rest),
        "flag" | "flag_present" => {
            let yes = matches!(
                rest.trim_end_matches("(1)").trim(),
                "yes" | "true" | "1" | ""
            );
            Some(AttrValue::Flag(yes))
        }
        "exprloc" => parse_exprloc(rest),
        "sec_offset" => {
            let num = parse_int(rest)?;
            if name == "location" {
                Some(AttrValue::LocList(num as u64))
            } else {
                Some(AttrValue::Int(num))
            }
        }
        "data1" | "data2" | "data4" | "data8" | "sdata" | "udata" | "implicit_const" => {
            if name == "decl_file" {
                // Newer disassemblers resolve the file name inline and keep
                // the number in a trailing annotation.
                if let Some(n) = trailing_annotation(rest) {
                    return Some(AttrValue::Int(n));
                }
            }
            if let Some(n) = parse_int(rest) {
                return Some(AttrValue::Int(n));
            }
            // Enumerated keyword such as `C_plus_plus (4)` or `public (1)`.
            let keyword = match rest.rfind('(') {
                Some(pos) if rest.ends_with(')') => rest[..pos].trim_end(),
                _ => rest,
            };
            if keyword.is_empty() {
                None
            } else {
                Some(AttrValue::Keyword(keyword.to_owned()))
            }
        }
        _ => None,
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok();
    }
    s.parse().ok()
}

/// `N` from a trailing `(N)` annotation, e.g. `test.cpp (1)`.
fn trailing_annotation(s: &str) -> Option<i64> {
    let pos = s.rfind('(')?;
    s.strip_suffix(')')?;
    s[pos + 1..s.len() - 1].trim().parse().ok()
}

fn parse_addr(rest: &str) -> Option<AttrValue> {
    let mut tokens = rest.split_whitespace();
    let addr = parse_int(tokens.next()?)? as u64;
    let sym = tokens
        .next()
        .and_then(|t| t.strip_prefix('<'))
        .and_then(|t| t.strip_suffix('>'))
        .map(str::to_owned);
    Some(AttrValue::Addr { addr, sym })
}

/// Decode a one-line location expression: `[ 0] fbreg -24`, `[ 0] reg5`,
/// `[ 0] addr 0x2004 <g>`, `[ 0] plus_uconst 8`, `[ 0] constu 2`.
fn parse_exprloc(rest: &str) -> Option<AttrValue> {
    let mut tokens = rest.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        // `[ N]` op indices; the opening bracket may carry the index glued on
        if tok.starts_with('[') || tok.ends_with(']') {
            continue;
        }
        match tok {
            "fbreg" => {
                let off = parse_int(tokens.next()?)?;
                return Some(AttrValue::FrameOffset(off));
            }
            "addr" => {
                let addr = parse_int(tokens.next()?)? as u64;
                let sym = tokens
                    .next()
                    .and_then(|t| t.strip_prefix('<'))
                    .and_then(|t| t.strip_suffix('>'))
                    .map(str::to_owned);
                return Some(AttrValue::Addr { addr, sym });
            }
            "constu" | "const1u" | "const2u" | "const4u" | "plus_uconst" => {
                return Some(AttrValue::Int(parse_int(tokens.next()?)?));
            }
            _ => {
                if let Some(num) = tok.strip_prefix("reg") {
                    if let Ok(reg) = num.parse::<u16>() {
                        return Some(AttrValue::Register(reg));
                    }
                }
            }
        }
    }
    None
}

/// Parse the disassembled line program into per-table file maps. `<built-in>`
/// entries are dropped; paths with a header extension are flagged.
#[instrument(skip(reader))]
pub fn scan_line_dump(reader: impl BufRead) -> Result<LineTables> {
    #[derive(PartialEq)]
    enum Section {
        None,
        Dirs,
        Files,
    }

    let mut tables = LineTables::default();
    let mut current: Option<u64> = None;
    let mut dirs: Vec<String> = Vec::new();
    let mut section = Section::None;

    for line in reader.lines() {
        let line = line.wrap_err("failed to read line-program dump")?;
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("Table at offset ") {
            let off_str = rest.trim_end_matches(':').trim();
            current = parse_int(off_str).map(|n| n as u64);
            dirs.clear();
            section = Section::None;
            continue;
        }
        if trimmed.starts_with("Directory table") {
            section = Section::Dirs;
            continue;
        }
        if trimmed.starts_with("File name table") {
            section = Section::Files;
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }

        match section {
            Section::Dirs => {
                // Either a bare path per line or `N path`.
                let mut tokens = trimmed.split_whitespace();
                let first = tokens.next().unwrap_or_default();
                if let Ok(idx) = first.parse::<usize>() {
                    let path = tokens.collect::<Vec<_>>().join(" ");
                    if dirs.len() <= idx {
                        dirs.resize(idx + 1, String::new());
                    }
                    dirs[idx] = path;
                } else {
                    if dirs.is_empty() {
                        // Pre-DWARF5 tables implicitly number from 1.
                        dirs.push(String::new());
                    }
                    dirs.push(trimmed.to_owned());
                }
            }
            Section::Files => {
                if trimmed.starts_with("Entry") {
                    continue;
                }
                let tokens: Vec<&str> = trimmed.split_whitespace().collect();
                if tokens.len() < 5 {
                    continue;
                }
                let (Ok(entry), Ok(dir)) = (tokens[0].parse::<u64>(), tokens[1].parse::<usize>())
                else {
                    continue;
                };
                let name = tokens[4..].join(" ");
                if name == "<built-in>" {
                    continue;
                }
                let path = match dirs.get(dir) {
                    Some(d) if !d.is_empty() && !name.starts_with('/') => format!("{d}/{name}"),
                    _ => name,
                };
                let Some(table) = current else {
                    warn!(path, "file row outside any line table");
                    continue;
                };
                tables
                    .tables
                    .entry(table)
                    .or_default()
                    .insert(entry, FileEntry {
                        header: is_header(&path),
                        path,
                    });
            }
            Section::None => {}
        }
    }

    Ok(tables)
}

fn is_header(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| HEADER_EXTS.contains(ext.to_ascii_lowercase().as_str()))
}

/// Parse the location-list dump into offset → first-entry value.
#[instrument(skip(reader))]
pub fn scan_loc_dump(reader: impl BufRead) -> Result<HashMap<u64, AttrValue>> {
    let mut table = HashMap::new();
    let mut pending: Option<u64> = None;

    for line in reader.lines() {
        let line = line.wrap_err("failed to read location-list dump")?;
        let trimmed = line.trim_start();
        if trimmed.starts_with("CU ") {
            continue;
        }
        if trimmed.starts_with('[') && line.contains(" range ") {
            let inner = trimmed[1..].split(']').next().unwrap_or_default();
            pending = u64::from_str_radix(inner.trim(), 16).ok();
            continue;
        }
        if let Some(off) = pending {
            if let Some(value) = parse_exprloc(trimmed) {
                table.entry(off).or_insert(value);
                pending = None;
            }
        }
    }

    Ok(table)
}
