use std::collections::{BTreeMap, HashMap};

use tracing::{debug, instrument, trace, warn};

use crate::consts::SKIP_CXX_PREFIXES;
use crate::die::{AttrValue, Die, DieTag, Offset};
use crate::symtab::ElfSymbols;
use crate::types::{SourceSite, TypeId, TypeResolver, VOID_ID};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamLoc {
    /// Frame offset of a stack-passed parameter.
    Stack(i64),
    /// Register name of a register-passed parameter.
    Reg(String),
}

#[derive(Debug, Clone)]
pub struct ParamRec {
    pub name: String,
    pub tid: TypeId,
    pub loc: Option<ParamLoc>,
}

/// Where a symbol landed during selection. Deferred symbols (the "2"
/// bucket) wait for pruning to decide their fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Keep,
    Deferred,
}

#[derive(Debug)]
pub struct SymbolRecord {
    pub id: i64,
    pub short_name: String,
    pub mangled: String,
    /// Versioned export the mangled name aliases (`foo` → `foo@@LIB_2`).
    pub alias: Option<String>,
    pub ctor: bool,
    pub dtor: bool,
    pub virt: bool,
    pub pure_virt: bool,
    pub in_line: bool,
    pub artificial: bool,
    pub is_static: bool,
    pub data: bool,
    pub is_const: bool,
    pub is_volatile: bool,
    pub class: Option<TypeId>,
    pub namespace: Option<String>,
    pub ret: Option<TypeId>,
    pub params: Vec<ParamRec>,
    pub vtable_slot: Option<u64>,
    pub decl: Option<SourceSite>,
    pub bucket: Bucket,
}

/// Resolved symbols, deduplicated by mangled name.
#[derive(Default)]
pub struct SymbolInfo {
    pub records: BTreeMap<i64, SymbolRecord>,
    by_mangled: HashMap<String, i64>,
    next_id: i64,
}

impl SymbolInfo {
    pub fn by_mangled(&self, mangled: &str) -> Option<&SymbolRecord> {
        self.by_mangled.get(mangled).and_then(|id| self.records.get(id))
    }
}

#[derive(Debug, Default, Clone)]
pub struct SymbolOptions {
    pub all_symbols: bool,
    pub bin_only: bool,
    pub skip_cxx: bool,
}

pub struct SymbolResolver<'a, 'r> {
    pub tr: &'r mut TypeResolver<'a>,
    pub elf: &'a ElfSymbols,
    pub loc_lists: &'a HashMap<u64, AttrValue>,
    pub regs: Option<&'static phf::Map<u16, &'static str>>,
    pub opts: SymbolOptions,
    pub symbols: &'r mut SymbolInfo,
}

impl<'a> SymbolResolver<'a, '_> {
    #[instrument(skip(self))]
    pub fn resolve_all(&mut self) {
        let offsets: Vec<Offset> = self
            .tr
            .store
            .iter()
            .filter(|d| matches!(d.tag, DieTag::Subprogram | DieTag::Variable))
            .map(|d| d.offset)
            .collect();
        for off in offsets {
            self.resolve_symbol(off);
        }
        debug!(symbols = self.symbols.records.len(), "resolved symbol table");
    }

    fn resolve_symbol(&mut self, off: Offset) {
        let store = self.tr.store;
        let Some(die) = store.get(off) else {
            return;
        };

        // locals live inside another function's body
        if store
            .parent(off)
            .is_some_and(|p| matches!(p.tag, DieTag::Subprogram | DieTag::LexicalBlock))
        {
            return;
        }

        let Some(mut mangled) = self.mangled_name(die) else {
            trace!(offset = off, "no usable linker name");
            return;
        };
        if let Some(at) = mangled.find('@') {
            mangled.truncate(at);
        }
        // compiler-generated `.part` / `.isra` clones and stubs whose name
        // never demangles
        if mangled.contains('.')
            || !mangled.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return;
        }
        if self.opts.skip_cxx && SKIP_CXX_PREFIXES.iter().any(|p| mangled.starts_with(p)) {
            return;
        }

        // declaration/definition split: the definition points back through
        // abstract_origin (constructor clones) and specification (in-class
        // declarations); those DIEs hold identity, the definition holds code
        let origin = die
            .ref_attr("abstract_origin")
            .and_then(|o| store.get(o));
        let spec = die
            .ref_attr("specification")
            .and_then(|s| store.get(s))
            .or_else(|| {
                origin
                    .and_then(|o| o.ref_attr("specification"))
                    .and_then(|s| store.get(s))
            });
        let identity = spec.or(origin).unwrap_or(die);

        let short_name = identity
            .name()
            .or_else(|| die.name())
            .unwrap_or(&mangled)
            .to_owned();

        let ctor = ["C1E", "C2E"].iter().any(|m| mangled.contains(m));
        let dtor = ["D0E", "D1E", "D2E"].iter().any(|m| mangled.contains(m));
        let (is_const, is_volatile) = constness_from_mangling(&mangled);

        let class = store
            .ancestors(identity.offset)
            .find(|a| a.tag.is_aggregate())
            .map(|a| a.offset)
            .and_then(|agg| self.tr.resolve(agg));
        // an explicit constructor proves the class is not trivially copyable
        if ctor {
            if let Some(class) = class {
                let canonical = self.tr.types.get_first(class);
                for id in [class, canonical] {
                    if let Some(rec) = self.tr.types.records.get_mut(&id) {
                        rec.copied = false;
                    }
                }
            }
        }

        let virtuality = identity
            .keyword("virtuality")
            .or_else(|| die.keyword("virtuality"));
        let pure_virt = virtuality == Some("pure_virtual");
        let virt = pure_virt || virtuality == Some("virtual");
        let vtable_slot = identity
            .int_attr("vtable_elem_location")
            .or_else(|| die.int_attr("vtable_elem_location"))
            .map(|n| n as u64);

        let in_line = matches!(
            die.keyword("inline").or_else(|| identity.keyword("inline")),
            Some("inlined") | Some("declared_inlined")
        );
        let artificial = die.flag("artificial") || identity.flag("artificial");
        let external = die.flag("external") || identity.flag("external");
        let data = die.tag == DieTag::Variable;

        let ret = if data {
            die.ref_attr("type")
                .or_else(|| identity.ref_attr("type"))
                .and_then(|t| self.tr.resolve(t))
        } else {
            match die.ref_attr("type").or_else(|| identity.ref_attr("type")) {
                Some(t) => self.tr.resolve(t),
                None => Some(VOID_ID),
            }
        };

        let (params, saw_this) = if data {
            (Vec::new(), false)
        } else {
            self.materialize_params(off)
        };
        let is_static = !data && class.is_some() && !saw_this;

        let decl = self
            .tr
            .decl_site(identity)
            .or_else(|| self.tr.decl_site(die));
        if let Some(site) = &decl {
            self.tr.registry.note_site(site);
        }
        let namespace = store
            .namespace_scope(identity.offset)
            .filter(|s| s.tag == DieTag::Namespace)
            .and_then(Die::name)
            .map(str::to_owned);

        let has_code = die.attr("low_pc").is_some();
        let exported = self.elf.is_exported(&mangled);
        let bucket = if exported {
            Bucket::Keep
        } else if has_code {
            if self.opts.all_symbols && external {
                Bucket::Keep
            } else {
                return;
            }
        } else if data || in_line || pure_virt {
            if self.opts.bin_only {
                return;
            }
            match &decl {
                Some(site) if site.header => Bucket::Deferred,
                _ => return,
            }
        } else {
            return;
        };

        let alias = self.elf.aliases.get(&mangled).cloned();

        // duplicates collapse into the earlier record; an out-of-line
        // definition after a pure-virtual declaration demotes it
        if let Some(&prev_id) = self.symbols.by_mangled.get(&mangled) {
            let prev = self
                .symbols
                .records
                .get_mut(&prev_id)
                .expect("deduplicated id");
            if prev.pure_virt && !pure_virt {
                prev.pure_virt = false;
                prev.virt = true;
            }
            if prev.params.is_empty() {
                prev.params = params;
            }
            if prev.class.is_none() {
                prev.class = class;
            }
            if prev.ret.is_none() {
                prev.ret = ret;
            }
            if prev.decl.is_none() {
                prev.decl = decl;
            }
            if prev.vtable_slot.is_none() {
                prev.vtable_slot = vtable_slot;
            }
            if bucket == Bucket::Keep {
                prev.bucket = Bucket::Keep;
            }
            prev.ctor |= ctor;
            prev.dtor |= dtor;
            prev.virt |= virt;
            return;
        }

        self.symbols.next_id += 1;
        let id = self.symbols.next_id;
        self.symbols.by_mangled.insert(mangled.clone(), id);
        self.symbols.records.insert(
            id,
            SymbolRecord {
                id,
                short_name,
                mangled,
                alias,
                ctor,
                dtor,
                virt,
                pure_virt,
                in_line,
                artificial,
                is_static,
                data,
                is_const,
                is_volatile,
                class,
                namespace,
                ret,
                params,
                vtable_slot,
                decl,
                bucket,
            },
        );
    }

    /// Linker-level name of the DIE: the `<symbol>` token the disassembler
    /// attached to its address, the explicit linkage name, the
    /// specification's linkage name, or the plain short name. A short name
    /// carrying `<` is a template declaration with no instance and is
    /// skipped.
    fn mangled_name(&self, die: &Die) -> Option<String> {
        if let Some(sym) = die.addr_sym("low_pc").or_else(|| die.addr_sym("location")) {
            return Some(sym.to_owned());
        }
        if let Some(name) = die
            .str_attr("linkage_name")
            .or_else(|| die.str_attr("MIPS_linkage_name"))
        {
            return Some(name.to_owned());
        }
        if let Some(spec) = die.ref_attr("specification").and_then(|s| self.tr.store.get(s)) {
            if let Some(name) = spec
                .str_attr("linkage_name")
                .or_else(|| spec.str_attr("MIPS_linkage_name"))
                .or_else(|| spec.addr_sym("low_pc"))
            {
                return Some(name.to_owned());
            }
        }
        // a declaration or abstract instance can borrow the linker name of
        // the definition that points back at it
        for def in [
            self.tr.store.specification_of(die.offset),
            self.tr.store.abstract_origin_of(die.offset),
        ]
        .into_iter()
        .flatten()
        {
            if let Some(name) = def
                .addr_sym("low_pc")
                .or_else(|| def.str_attr("linkage_name"))
            {
                return Some(name.to_owned());
            }
        }
        let short = die.name().or_else(|| {
            die.ref_attr("specification")
                .and_then(|s| self.tr.store.get(s))
                .and_then(Die::name)
        })?;
        if short.contains('<') {
            return None;
        }
        Some(short.to_owned())
    }

    /// Parameter list of a subprogram definition, with frame offsets and
    /// register names. Dropping the artificial `this` marks the method
    /// non-static.
    fn materialize_params(&mut self, off: Offset) -> (Vec<ParamRec>, bool) {
        let store = self.tr.store;
        let param_offs: Vec<Offset> = store.params(off).iter().map(|p| p.offset).collect();
        let mut out = Vec::new();
        let mut saw_this = false;
        for (idx, poff) in param_offs.into_iter().enumerate() {
            let p = store.get(poff).expect("param offset");
            if p.tag == DieTag::UnspecifiedParameters {
                out.push(ParamRec {
                    name: "...".to_owned(),
                    tid: crate::types::ELLIPSIS_ID,
                    loc: None,
                });
                continue;
            }
            if p.flag("artificial") {
                saw_this = true;
                continue;
            }
            let origin = p.ref_attr("abstract_origin").and_then(|o| store.get(o));
            let name = p
                .name()
                .or_else(|| origin.and_then(Die::name))
                .map_or_else(|| format!("p{}", idx + 1), str::to_owned);
            let type_off = p
                .ref_attr("type")
                .or_else(|| origin.and_then(|o| o.ref_attr("type")));
            let Some(tid) = type_off.and_then(|t| self.tr.resolve(t)) else {
                warn!(param = name, offset = poff, "parameter type did not resolve");
                continue;
            };
            let loc = self.param_location(p);
            out.push(ParamRec { name, tid, loc });
        }
        (out, saw_this)
    }

    fn param_location(&self, p: &Die) -> Option<ParamLoc> {
        let value = match p.attr("location")? {
            AttrValue::LocList(off) => self.loc_lists.get(off)?,
            other => other,
        };
        match value {
            AttrValue::FrameOffset(off) => Some(ParamLoc::Stack(*off)),
            AttrValue::Register(reg) => Some(ParamLoc::Reg(self.reg_name(*reg))),
            _ => None,
        }
    }

    fn reg_name(&self, reg: u16) -> String {
        self.regs
            .and_then(|t| t.get(&reg))
            .map_or_else(|| format!("reg{reg}"), |n| (*n).to_owned())
    }
}

/// Const/volatile methods are only visible through their mangling:
/// `_ZNK` marks const, `_ZNV` volatile, `_ZNVK` both.
fn constness_from_mangling(mangled: &str) -> (bool, bool) {
    if mangled.starts_with("_ZNVK") {
        (true, true)
    } else if mangled.starts_with("_ZNK") {
        (true, false)
    } else if mangled.starts_with("_ZNV") {
        (false, true)
    } else {
        (false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::Names;
    use crate::scan::{scan_die_dump, scan_line_dump, LineTables};
    use crate::types::{SourceRegistry, TypeKind, TypeTable};

    struct Fixture {
        types: TypeTable,
        symbols: SymbolInfo,
    }

    fn run(die_dump: &str, line_dump: &str, elf: ElfSymbols, opts: SymbolOptions) -> Fixture {
        let scan = scan_die_dump(die_dump.as_bytes()).unwrap();
        let lines = if line_dump.is_empty() {
            LineTables::default()
        } else {
            scan_line_dump(line_dump.as_bytes()).unwrap()
        };
        let mut names = Names::default();
        let mut types = TypeTable::new();
        let mut registry = SourceRegistry::default();
        let mut tr = TypeResolver::new(
            &scan.store,
            &scan.units,
            &lines,
            &mut names,
            &mut types,
            &mut registry,
            8,
        );
        tr.resolve_all();
        let mut symbols = SymbolInfo::default();
        let loc_lists = HashMap::new();
        let mut sr = SymbolResolver {
            tr: &mut tr,
            elf: &elf,
            loc_lists: &loc_lists,
            regs: crate::consts::registers_for("x86_64"),
            opts,
            symbols: &mut symbols,
        };
        sr.resolve_all();
        Fixture { types, symbols }
    }

    fn exports(names: &[(&str, i64)]) -> ElfSymbols {
        let mut elf = ElfSymbols::default();
        for (name, size) in names {
            elf.exports.insert((*name).to_owned(), *size);
        }
        elf
    }

    const METHOD_DUMP: &str = "\
 [     b]  compile_unit         abbrev: 1
 [    2d]    class_type           abbrev: 2
             name                 (string) \"C\"
             byte_size            (data1) 1
 [    3a]      subprogram           abbrev: 3
               external             (flag_present) yes
               name                 (string) \"f\"
               low_pc               (addr) 0x0000000000001139 <_ZN1C1fEv>
               object_pointer       (ref4) [    50]
 [    50]        formal_parameter     abbrev: 4
                 type                 (ref4) [    60]
                 artificial           (flag_present) yes
 [    60]    pointer_type         abbrev: 5
             byte_size            (data1) 8
             type                 (ref4) [    2d]
";

    #[test]
    fn method_symbol_has_class_and_void_return() {
        let fx = run(METHOD_DUMP, "", exports(&[("_ZN1C1fEv", 11)]), SymbolOptions::default());
        let sym = fx.symbols.by_mangled("_ZN1C1fEv").unwrap();
        assert_eq!(sym.short_name, "f");
        assert_eq!(sym.ret, Some(VOID_ID));
        assert!(!sym.is_static, "this was dropped, so the method is not static");
        let class = fx.types.get(sym.class.unwrap()).unwrap();
        assert_eq!(class.name, "C");
        assert_eq!(class.kind, TypeKind::Class);
        assert_eq!(sym.bucket, Bucket::Keep);
    }

    #[test]
    fn destructor_flags_from_mangling() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    2d]    class_type           abbrev: 2
             name                 (string) \"V\"
             byte_size            (data1) 8
 [    3a]      subprogram           abbrev: 3
               name                 (string) \"~V\"
               virtuality           (data1) virtual (1)
               vtable_elem_location (exprloc) [ 0] constu 2
               declaration          (flag_present) yes
 [    70]    subprogram           abbrev: 4
             specification        (ref4) [    3a]
             low_pc               (addr) 0x0000000000001139 <_ZN1VD1Ev>
";
        let fx = run(dump, "", exports(&[("_ZN1VD1Ev", 20)]), SymbolOptions::default());
        let sym = fx.symbols.by_mangled("_ZN1VD1Ev").unwrap();
        assert!(sym.dtor);
        assert!(!sym.ctor);
        assert!(sym.virt);
        assert_eq!(sym.vtable_slot, Some(2));
        assert_eq!(sym.short_name, "~V");
        let class = fx.types.get(sym.class.unwrap()).unwrap();
        assert_eq!(class.name, "V");
    }

    #[test]
    fn constructor_clears_the_copied_marker() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    2d]    class_type           abbrev: 2
             name                 (string) \"V\"
             byte_size            (data1) 8
 [    3a]      subprogram           abbrev: 3
               name                 (string) \"V\"
               declaration          (flag_present) yes
 [    70]    subprogram           abbrev: 4
             specification        (ref4) [    3a]
             low_pc               (addr) 0x0000000000001139 <_ZN1VC1Ev>
";
        let fx = run(dump, "", exports(&[("_ZN1VC1Ev", 20)]), SymbolOptions::default());
        let sym = fx.symbols.by_mangled("_ZN1VC1Ev").unwrap();
        assert!(sym.ctor);
        let class = fx.types.get(sym.class.unwrap()).unwrap();
        assert!(!class.copied);
    }

    #[test]
    fn const_method_from_mangling_prefix() {
        assert_eq!(constness_from_mangling("_ZNK1C3getEv"), (true, false));
        assert_eq!(constness_from_mangling("_ZNV1C3setEi"), (false, true));
        assert_eq!(constness_from_mangling("_ZNVK1C3getEv"), (true, true));
        assert_eq!(constness_from_mangling("_ZN1C3setEi"), (false, false));
    }

    #[test]
    fn parameter_stack_and_register_locations() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    subprogram           abbrev: 2
             external             (flag_present) yes
             name                 (string) \"calc\"
             low_pc               (addr) 0x0000000000001139 <calc>
 [    20]      formal_parameter     abbrev: 3
               name                 (string) \"a\"
               type                 (ref4) [    60]
               location             (exprloc) [ 0] fbreg -24
 [    30]      formal_parameter     abbrev: 3
               name                 (string) \"b\"
               type                 (ref4) [    60]
               location             (exprloc) [ 0] reg5
 [    60]    base_type            abbrev: 4
             name                 (string) \"int\"
             byte_size            (data1) 4
";
        let fx = run(dump, "", exports(&[("calc", 30)]), SymbolOptions::default());
        let sym = fx.symbols.by_mangled("calc").unwrap();
        assert_eq!(sym.params.len(), 2);
        assert_eq!(sym.params[0].loc, Some(ParamLoc::Stack(-24)));
        assert_eq!(sym.params[1].loc, Some(ParamLoc::Reg("rdi".to_owned())));
    }

    #[test]
    fn pure_virtual_demotes_on_out_of_line_definition() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    2d]    class_type           abbrev: 2
             name                 (string) \"A\"
             byte_size            (data1) 8
 [    3a]      subprogram           abbrev: 3
               name                 (string) \"run\"
               linkage_name         (strp) \"_ZN1A3runEv\"
               virtuality           (data1) pure_virtual (2)
               decl_file            (data1) 1
               decl_line            (data1) 4
 [    90]  compile_unit         abbrev: 1
           stmt_list            (sec_offset) 0x0
 [    a0]    subprogram           abbrev: 4
             low_pc               (addr) 0x0000000000001139 <_ZN1A3runEv>
";
        let line_dump = "\
Table at offset 0:
 File name table:
  Entry Dir Time Size Name
  1     0   0    0    a.h
";
        // both DIEs carry the same mangled name; the out-of-line definition
        // collapses into the declaration's record and demotes it
        let fx = run(dump, line_dump, exports(&[("_ZN1A3runEv", 9)]), SymbolOptions::default());
        let sym = fx.symbols.by_mangled("_ZN1A3runEv").unwrap();
        assert!(sym.virt);
        assert!(!sym.pure_virt);
        assert_eq!(sym.bucket, Bucket::Keep);
    }

    #[test]
    fn template_declarations_are_skipped() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    subprogram           abbrev: 2
             name                 (string) \"max<int>\"
             external             (flag_present) yes
";
        let fx = run(dump, "", exports(&[]), SymbolOptions::default());
        assert!(fx.symbols.records.is_empty());
    }

    #[test]
    fn dotted_and_operator_stub_names_are_rejected() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    subprogram           abbrev: 2
             name                 (string) \"helper\"
             low_pc               (addr) 0x0000000000001139 <helper.part.0>
 [    20]    subprogram           abbrev: 2
             name                 (string) \"operator==\"
             external             (flag_present) yes
";
        let fx = run(dump, "", exports(&[("helper.part.0", 5)]), SymbolOptions::default());
        assert!(fx.symbols.records.is_empty());
    }

    #[test]
    fn data_symbol_points_at_its_type() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    variable             abbrev: 2
             name                 (string) \"g\"
             type                 (ref4) [    60]
             location             (exprloc) [ 0] addr 0x2004 <g>
 [    60]    base_type            abbrev: 3
             name                 (string) \"int\"
             byte_size            (data1) 4
";
        let fx = run(dump, "", exports(&[("g", -4)]), SymbolOptions::default());
        let sym = fx.symbols.by_mangled("g").unwrap();
        assert!(sym.data);
        let ret = fx.types.get(sym.ret.unwrap()).unwrap();
        assert_eq!(ret.name, "int");
    }

    #[test]
    fn unexported_header_inline_goes_to_bucket_two() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
           stmt_list            (sec_offset) 0x0
 [    10]    subprogram           abbrev: 2
             name                 (string) \"helper\"
             linkage_name         (strp) \"_Z6helperv\"
             inline               (data1) inlined (1)
             decl_file            (data1) 1
             decl_line            (data1) 7
";
        let line_dump = "\
Table at offset 0:
 File name table:
  Entry Dir Time Size Name
  1     0   0    0    util.h
";
        let fx = run(dump, line_dump, exports(&[]), SymbolOptions::default());
        let sym = fx.symbols.by_mangled("_Z6helperv").unwrap();
        assert_eq!(sym.bucket, Bucket::Deferred);
        assert!(sym.in_line);

        let fx = run(
            dump,
            line_dump,
            exports(&[]),
            SymbolOptions {
                bin_only: true,
                ..Default::default()
            },
        );
        assert!(fx.symbols.records.is_empty());
    }

    #[test]
    fn skip_cxx_filters_libstdcxx_symbols() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    subprogram           abbrev: 2
             name                 (string) \"assign\"
             low_pc               (addr) 0x0000000000001139 <_ZNSs6assignEPKc>
";
        let elf = exports(&[("_ZNSs6assignEPKc", 40)]);
        let fx = run(dump, "", elf, SymbolOptions { skip_cxx: true, ..Default::default() });
        assert!(fx.symbols.records.is_empty());
    }

    #[test]
    fn version_suffix_is_stripped_and_aliased() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    subprogram           abbrev: 2
             name                 (string) \"foo\"
             low_pc               (addr) 0x0000000000001139 <foo@@LIB_2>
";
        let mut elf = exports(&[("foo@@LIB_2", 11)]);
        elf.aliases.insert("foo".to_owned(), "foo@@LIB_2".to_owned());
        let fx = run(dump, "", elf, SymbolOptions::default());
        let sym = fx.symbols.by_mangled("foo").unwrap();
        assert_eq!(sym.alias.as_deref(), Some("foo@@LIB_2"));
        assert_eq!(sym.bucket, Bucket::Keep);
    }
}
