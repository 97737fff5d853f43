use std::collections::BTreeSet;

use tracing::{debug, info, instrument, warn};

use crate::symbols::{Bucket, SymbolInfo};
use crate::types::{NameFamily, TypeId, TypeKind, TypeTable, ELLIPSIS_ID, VOID_ID};

#[derive(Debug, Default, Clone)]
pub struct PruneOptions {
    pub all_types: bool,
    pub loud: bool,
}

/// Canonical ID of a type: folded anonymous bases redirect to their
/// absorbing typedef, then the name registry picks the first occurrence.
fn canon(types: &TypeTable, id: TypeId) -> TypeId {
    let id = types.folded.get(&id).copied().unwrap_or(id);
    types.get_first(id)
}

/// Rewrite the graph onto canonical IDs, drop everything no retained
/// symbol reaches, and audit the result. Mutates the tables in place.
#[instrument(skip(types, symbols, opts))]
pub fn prune(types: &mut TypeTable, symbols: &mut SymbolInfo, opts: &PruneOptions) {
    rewrite_references(types, symbols);

    // step 1: everything a kept symbol touches, recursively
    let mut reachable: BTreeSet<TypeId> = BTreeSet::from([VOID_ID, ELLIPSIS_ID]);
    let mut stack: Vec<TypeId> = Vec::new();
    for sym in symbols.records.values() {
        if sym.bucket == Bucket::Keep {
            stack.extend(symbol_roots(sym));
        }
    }
    walk(types, &mut reachable, &mut stack);

    // step 2: deferred symbols survive only when their class or their
    // declaring file is already part of the surface
    let reachable_files: BTreeSet<String> = reachable
        .iter()
        .filter_map(|id| types.get(*id))
        .filter_map(|r| r.decl.as_ref())
        .map(|d| d.file.clone())
        .collect();
    let deferred: Vec<i64> = symbols
        .records
        .values()
        .filter(|s| s.bucket == Bucket::Deferred)
        .map(|s| s.id)
        .collect();
    let mut revived = 0usize;
    for id in deferred {
        let keep = {
            let sym = &symbols.records[&id];
            let class_reachable = sym
                .class
                .map(|c| reachable.contains(&canon(types, c)))
                .unwrap_or(false);
            let file_reachable = sym
                .decl
                .as_ref()
                .is_some_and(|d| reachable_files.contains(&d.file));
            class_reachable || file_reachable
        };
        if keep {
            let sym = symbols.records.get_mut(&id).expect("deferred id");
            sym.bucket = Bucket::Keep;
            let mut roots = symbol_roots(sym);
            stack.append(&mut roots);
            revived += 1;
        } else {
            symbols.records.remove(&id);
        }
    }
    walk(types, &mut reachable, &mut stack);
    debug!(revived, "re-examined deferred symbols");

    // step 3: optional widening to every nameable type
    if opts.all_types {
        let extra: Vec<TypeId> = types
            .records
            .values()
            .filter(|r| !r.local && (!r.anon || r.kind == TypeKind::Enum))
            .filter(|r| !types.folded.contains_key(&r.id))
            .filter(|r| canon(types, r.id) == r.id)
            .map(|r| r.id)
            .collect();
        stack.extend(extra);
        walk(types, &mut reachable, &mut stack);
    }

    // steps 4–5: drop merged, folded, local and unreached records
    let dropped: Vec<TypeId> = types
        .records
        .keys()
        .copied()
        .filter(|&id| {
            types.folded.contains_key(&id) || canon(types, id) != id || !reachable.contains(&id)
        })
        .collect();
    for id in &dropped {
        types.records.remove(id);
    }
    info!(
        types = types.records.len(),
        dropped = dropped.len(),
        symbols = symbols.records.len(),
        "pruned ABI graph"
    );

    audit(types, symbols, opts.loud);
}

/// The type IDs a symbol references directly.
fn symbol_roots(sym: &crate::symbols::SymbolRecord) -> Vec<TypeId> {
    let mut roots = Vec::new();
    if let Some(ret) = sym.ret {
        roots.push(ret);
    }
    if let Some(class) = sym.class {
        roots.push(class);
    }
    roots.extend(sym.params.iter().map(|p| p.tid));
    roots
}

/// Transitive type registration: bases, members, the base of pointers,
/// arrays and qualifiers, method/field-pointer classes and parameters,
/// and the types named by template arguments.
fn walk(types: &TypeTable, reachable: &mut BTreeSet<TypeId>, stack: &mut Vec<TypeId>) {
    while let Some(id) = stack.pop() {
        let id = canon(types, id);
        if !reachable.insert(id) {
            continue;
        }
        let Some(rec) = types.get(id) else {
            continue;
        };
        if let Some(base) = rec.base {
            stack.push(base);
        }
        if let Some(ret) = rec.ret {
            stack.push(ret);
        }
        if let Some(class) = rec.class {
            stack.push(class);
        }
        stack.extend(rec.params.iter().copied());
        stack.extend(rec.members.iter().map(|m| m.tid));
        stack.extend(rec.bases.iter().map(|b| b.tid));
        for tparam in &rec.tparams {
            if let Some(named) = lookup_named(types, tparam) {
                stack.push(named);
            }
        }
    }
}

/// Find the type a template-argument name refers to, trying every
/// kind-family and the keyword-prefixed spellings.
fn lookup_named(types: &TypeTable, name: &str) -> Option<TypeId> {
    let candidates = [
        name.to_owned(),
        format!("struct {name}"),
        format!("union {name}"),
        format!("enum {name}"),
    ];
    for family in [
        NameFamily::Aggregate,
        NameFamily::Enum,
        NameFamily::Union,
        NameFamily::Typedef,
        NameFamily::Other,
    ] {
        for candidate in &candidates {
            if let Some(id) = types.by_name(family, candidate) {
                return Some(id);
            }
        }
    }
    None
}

fn rewrite_references(types: &mut TypeTable, symbols: &mut SymbolInfo) {
    let ids: Vec<TypeId> = types.records.keys().copied().collect();
    for id in ids {
        let rec = &types.records[&id];
        let base = rec.base.map(|b| canon(types, b));
        let ret = rec.ret.map(|r| canon(types, r));
        let class = rec.class.map(|c| canon(types, c));
        let params: Vec<TypeId> = rec.params.iter().map(|&p| canon(types, p)).collect();
        let member_tids: Vec<TypeId> = rec.members.iter().map(|m| canon(types, m.tid)).collect();
        let base_tids: Vec<TypeId> = rec.bases.iter().map(|b| canon(types, b.tid)).collect();

        let rec = types.records.get_mut(&id).expect("listed id");
        rec.base = base;
        rec.ret = ret;
        rec.class = class;
        rec.params = params;
        for (m, tid) in rec.members.iter_mut().zip(member_tids) {
            m.tid = tid;
        }
        for (b, tid) in rec.bases.iter_mut().zip(base_tids) {
            b.tid = tid;
        }
    }

    let sym_ids: Vec<i64> = symbols.records.keys().copied().collect();
    for id in sym_ids {
        let sym = &symbols.records[&id];
        let ret = sym.ret.map(|r| canon(types, r));
        let class = sym.class.map(|c| canon(types, c));
        let param_tids: Vec<TypeId> = sym.params.iter().map(|p| canon(types, p.tid)).collect();
        let sym = symbols.records.get_mut(&id).expect("listed id");
        sym.ret = ret;
        sym.class = class;
        for (p, tid) in sym.params.iter_mut().zip(param_tids) {
            p.tid = tid;
        }
    }
}

/// Completeness audit: every referenced ID must exist and carry a name.
/// Nothing here is fatal; the dump is still emitted.
fn audit(types: &TypeTable, symbols: &SymbolInfo, loud: bool) {
    let mut missing = 0usize;
    let mut dangling = 0usize;
    let mut check = |id: TypeId, what: &str, owner: &str| match types.get(id) {
        None => {
            dangling += 1;
            if loud {
                warn!(id, what, owner, "dangling type reference");
            } else {
                debug!(id, what, owner, "dangling type reference");
            }
        }
        Some(rec) if rec.name.is_empty() => {
            missing += 1;
            warn!(id, what, owner, "referenced type has no name");
        }
        Some(_) => {}
    };

    for rec in types.records.values() {
        for m in &rec.members {
            check(m.tid, "member", &rec.name);
        }
        for b in &rec.bases {
            check(b.tid, "base", &rec.name);
        }
        if let Some(base) = rec.base {
            check(base, "base type", &rec.name);
        }
        if let Some(ret) = rec.ret {
            check(ret, "return", &rec.name);
        }
        for &p in &rec.params {
            check(p, "param", &rec.name);
        }
    }
    for sym in symbols.records.values() {
        if let Some(ret) = sym.ret {
            check(ret, "return", &sym.mangled);
        }
        if let Some(class) = sym.class {
            check(class, "class", &sym.mangled);
        }
        for p in &sym.params {
            check(p.tid, "param", &sym.mangled);
        }
    }
    if missing + dangling > 0 {
        warn!(missing, dangling, "completeness audit found holes");
    }
}
