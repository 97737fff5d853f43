use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::{Report, Result};
use fallible_iterator::{FallibleIterator, IteratorExt};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use crate::die::AttrValue;
use crate::emit::Value;
use crate::error::Fatal;
use crate::names::Names;
use crate::prune::PruneOptions;
use crate::scan::{DieScan, LineTables};
use crate::symbols::{ParamLoc, SymbolInfo, SymbolOptions, SymbolRecord, SymbolResolver};
use crate::symtab::{ElfSymbols, FileHeader};
use crate::types::{
    attach_vtables, SourceRegistry, SourceSite, TypeKind, TypeRecord, TypeResolver, TypeTable,
};
use crate::vtables::VTableMap;

mod consts;
mod die;
mod emit;
mod error;
mod names;
mod prune;
mod scan;
mod symbols;
mod symtab;
mod tools;
mod types;
mod vtables;

const ABI_DUMP_VERSION: &str = "3.0";
const MIN_VTABLE_DUMPER: (u32, u32) = (1, 1);

#[derive(Parser)]
#[command(
    name = "abi-dump",
    about = "Dump the ABI of an ELF shared object or kernel module from its DWARF debug info",
    version,
    disable_version_flag = true
)]
struct Args {
    /// ELF shared objects or kernel-module debug files
    #[arg(required_unless_present = "dumpversion")]
    objects: Vec<PathBuf>,

    /// Output path for the ABI dump
    #[arg(short, long, default_value = "./ABI.dump")]
    output: PathBuf,

    /// Write the dump to standard output instead of a file
    #[arg(long)]
    stdout: bool,

    /// Canonically sort every map before emission
    #[arg(long)]
    sort: bool,

    /// Embed this library version string in the dump
    #[arg(short = 'l', long = "lver", value_name = "VERSION")]
    lver: Option<String>,

    /// Also persist the raw disassembler outputs for audit
    #[arg(long, value_name = "DIR")]
    extra_info: Option<PathBuf>,

    /// Exclude inline, pure-virtual and non-exported globals
    #[arg(long)]
    bin_only: bool,

    /// Retain types even when unreferenced
    #[arg(long)]
    all_types: bool,

    /// Retain non-exported externally-visible symbols
    #[arg(long)]
    all_symbols: bool,

    /// Drop libstdc++ internal symbols
    #[arg(long)]
    skip_cxx: bool,

    /// Equivalent to --all-types --all-symbols
    #[arg(long)]
    all: bool,

    /// Emit non-fatal warnings
    #[arg(long)]
    loud: bool,

    /// Print version information
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: (),

    /// Print the bare tool version and exit
    #[arg(long)]
    dumpversion: bool,
}

/// Everything the pipeline accumulates across input objects. One value,
/// passed through explicitly; the output tree is built from it alone.
#[derive(Default)]
struct Context {
    names: Names,
    types: TypeTable,
    symbols: SymbolInfo,
    elf: ElfSymbols,
    registry: SourceRegistry,
    header: Option<FileHeader>,
    language: Option<String>,
    producer: Option<String>,
    lib_name: String,
    lib_version: Option<String>,
}

impl Context {
    fn merge_elf(&mut self, other: ElfSymbols) {
        self.elf.exports.extend(other.exports);
        self.elf.undefined.extend(other.undefined);
        for (base, versioned) in other.aliases {
            self.elf.aliases.entry(base).or_insert(versioned);
        }
        self.elf.needed.extend(other.needed);
        if self.elf.soname.is_none() {
            self.elf.soname = other.soname;
        }
    }

    /// C++ wins over C; the first producer string is kept.
    fn note_unit_environment(&mut self, scan: &DieScan) {
        for unit in scan.units.values() {
            if let Some(lang) = unit.language.as_deref() {
                let mapped = if lang.contains("plus_plus") {
                    "C++"
                } else if lang.starts_with('C') {
                    "C"
                } else {
                    lang
                };
                if mapped == "C++" || self.language.is_none() {
                    self.language = Some(mapped.to_owned());
                }
            }
            if self.producer.is_none() {
                self.producer = unit.producer.clone();
            }
        }
    }

    fn is_cxx(&self) -> bool {
        self.language.as_deref() == Some("C++")
            || self
                .producer
                .as_deref()
                .is_some_and(|p| p.contains("C++"))
    }
}

/// Already-parsed textual inputs for one object.
struct ObjectInputs {
    scan: DieScan,
    lines: LineTables,
    loc_lists: HashMap<u64, AttrValue>,
    vtables: VTableMap,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        let code = err
            .downcast_ref::<Fatal>()
            .map_or(error::EXIT_GENERIC, Fatal::exit_code);
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.loud { "warn" } else { "error" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with(tracing_error::ErrorLayer::default())
        .init();

    color_eyre::install()?;

    if args.dumpversion {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let sym_opts = SymbolOptions {
        all_symbols: args.all_symbols || args.all,
        bin_only: args.bin_only,
        skip_cxx: args.skip_cxx,
    };
    let prune_opts = PruneOptions {
        all_types: args.all_types || args.all,
        loud: args.loud,
    };

    let mut ctx = Context::default();
    ctx.lib_name = args
        .objects
        .first()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    args.objects
        .iter()
        .into_fallible()
        .map_err(|e| match e {})
        .for_each(|path| process_object(&mut ctx, path, &args, &sym_opts))?;

    prune::prune(&mut ctx.types, &mut ctx.symbols, &prune_opts);

    ctx.lib_version = args.lver.clone().or_else(|| derive_lib_version(&ctx));

    let mut root = build_dump(&ctx);
    if args.sort {
        emit::sort_canonical(&mut root);
    }
    if args.stdout {
        emit::emit_to_stdout(&root)?;
    } else {
        emit::emit_to_file(&args.output, &root)?;
    }
    Ok(())
}

fn process_object(
    ctx: &mut Context,
    path: &Path,
    args: &Args,
    sym_opts: &SymbolOptions,
) -> Result<()> {
    fs::metadata(path)
        .map_err(|_| Report::new(Fatal::UnreadableInput(path.display().to_string())))?;
    let path_str = path.to_string_lossy().into_owned();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kernel_module = file_name.contains(".ko");
    info!(object = %path_str, kernel_module, "processing object");

    let save = |suffix: &str| -> Result<Option<PathBuf>> {
        match &args.extra_info {
            Some(dir) => Ok(Some(tools::extra_info_path(
                dir,
                &format!("{file_name}.{suffix}"),
            )?)),
            None => Ok(None),
        }
    };

    let (header, _) = tools::run_tool("eu-readelf", &["-h", path_str.as_str()], save("elf-info")?.as_deref())?
        .parse(|r| symtab::read_file_header(r))?;
    if ctx.header.is_none() {
        ctx.header = Some(header);
    }

    let (elf_syms, _) = tools::run_tool(
        "eu-readelf",
        &["-d", "--dyn-syms", "--syms", path_str.as_str()],
        save("symbols")?.as_deref(),
    )?
    .parse(|r| symtab::read_symbol_dump(r, kernel_module))?;
    ctx.merge_elf(elf_syms);

    let (scan, stderr) = tools::run_tool(
        "eu-readelf",
        &["-N", "--debug-dump=info", path_str.as_str()],
        save("debug_info")?.as_deref(),
    )?
    .parse(|r| scan::scan_die_dump(r))?;
    tools::check_debug_info(&stderr, path)?;
    if scan.store.len() == 0 {
        return Err(Report::new(Fatal::NoDebugInfo(path.display().to_string())));
    }
    ctx.note_unit_environment(&scan);

    let (lines, _) = tools::run_tool(
        "eu-readelf",
        &["--debug-dump=line", path_str.as_str()],
        save("debug_line")?.as_deref(),
    )?
    .parse(|r| scan::scan_line_dump(r))?;

    let (loc_lists, _) = tools::run_tool(
        "eu-readelf",
        &["--debug-dump=loc", path_str.as_str()],
        save("debug_loc")?.as_deref(),
    )?
    .parse(|r| scan::scan_loc_dump(r))?;

    let vtables = if ctx.is_cxx() {
        dump_vtables(&path_str, save("vtables")?.as_deref())
    } else {
        VTableMap::new()
    };

    reduce_object(
        ctx,
        ObjectInputs {
            scan,
            lines,
            loc_lists,
            vtables,
        },
        sym_opts,
    );
    Ok(())
}

/// The C++ vtable helper degrades instead of failing: too old or absent
/// means an empty vtable section and a warning.
fn dump_vtables(path: &str, save_as: Option<&Path>) -> VTableMap {
    let version_ok = tools::run_tool("vtable-dumper", &["-dumpversion"], None)
        .and_then(|run| run.parse(|r| {
            use std::io::BufRead as _;
            let mut line = String::new();
            r.read_line(&mut line)?;
            Ok(line.trim().to_owned())
        }))
        .map(|(v, _)| {
            let mut parts = v.split('.').filter_map(|p| p.parse::<u32>().ok());
            let got = (parts.next().unwrap_or(0), parts.next().unwrap_or(0));
            got >= MIN_VTABLE_DUMPER
        });
    match version_ok {
        Ok(true) => {}
        Ok(false) => {
            warn!("vtable-dumper is older than {}.{}; vtables will be empty", MIN_VTABLE_DUMPER.0, MIN_VTABLE_DUMPER.1);
            return VTableMap::new();
        }
        Err(err) => {
            warn!(%err, "vtable-dumper unavailable; vtables will be empty");
            return VTableMap::new();
        }
    }

    let dumped = tools::run_tool("vtable-dumper", &["-mangled", "-demangled", path], save_as)
        .and_then(|run| run.parse(|r| vtables::read_vtable_dump(r)));
    match dumped {
        Ok((map, _)) => map,
        Err(err) => {
            warn!(%err, "vtable dump failed; vtables will be empty");
            VTableMap::new()
        }
    }
}

/// Core of the reducer for one object: resolve types, resolve symbols,
/// attach vtables. Pure over already-parsed inputs.
fn reduce_object(ctx: &mut Context, inputs: ObjectInputs, sym_opts: &SymbolOptions) {
    let word_size = ctx.header.as_ref().map_or(8, |h| h.word_size);
    let arch = ctx
        .header
        .as_ref()
        .map(|h| h.arch.clone())
        .unwrap_or_default();

    let mut tr = TypeResolver::new(
        &inputs.scan.store,
        &inputs.scan.units,
        &inputs.lines,
        &mut ctx.names,
        &mut ctx.types,
        &mut ctx.registry,
        word_size,
    );
    tr.resolve_all();

    let mut sr = SymbolResolver {
        tr: &mut tr,
        elf: &ctx.elf,
        loc_lists: &inputs.loc_lists,
        regs: consts::registers_for(&arch),
        opts: sym_opts.clone(),
        symbols: &mut ctx.symbols,
    };
    sr.resolve_all();

    attach_vtables(&mut ctx.types, &mut ctx.names, &inputs.vtables);
    debug!("object reduced into context");
}

/// Without `-lver`, the version comes from the SONAME; the file-name
/// suffix after `.so.` is the last resort.
fn derive_lib_version(ctx: &Context) -> Option<String> {
    for candidate in [ctx.elf.soname.as_deref(), Some(ctx.lib_name.as_str())] {
        if let Some(name) = candidate {
            if let Some(pos) = name.find(".so.") {
                return Some(name[pos + 4..].to_owned());
            }
        }
    }
    None
}

fn site_into(value: &mut Value, site: &SourceSite) {
    if site.header {
        value.insert("Header", site.file.as_str());
        value.insert("Line", site.line);
    } else {
        value.insert("Source", site.file.as_str());
        value.insert("SourceLine", site.line);
    }
}

fn type_value(rec: &TypeRecord) -> Value {
    let mut v = Value::empty_map();
    v.insert("Name", rec.name.as_str());
    v.insert("Type", rec.kind.as_str());
    if let Some(size) = rec.size {
        v.insert("Size", size);
    }
    if let Some(ns) = &rec.namespace {
        v.insert("NameSpace", ns.as_str());
    }
    if let Some(site) = &rec.decl {
        site_into(&mut v, site);
    }
    if let Some(base) = rec.base {
        v.insert("BaseType", base);
    }
    if let Some(ret) = rec.ret {
        v.insert("Return", ret);
    }
    if let Some(class) = rec.class {
        v.insert("Class", class);
    }
    if !rec.members.is_empty() {
        let mut members = Value::empty_map();
        for (pos, m) in rec.members.iter().enumerate() {
            let mut mv = Value::empty_map();
            mv.insert("name", m.name.as_str());
            if let Some(value) = m.value {
                mv.insert("value", value);
            } else {
                mv.insert("type", m.tid);
                mv.insert("offset", m.offset);
                if let Some(bits) = m.bits {
                    mv.insert("bitfield", bits);
                }
                if let Some(access) = &m.access {
                    mv.insert("access", access.as_str());
                }
            }
            members.insert(pos as u64, mv);
        }
        v.insert("Memb", members);
    }
    if !rec.bases.is_empty() {
        let mut bases = Value::empty_map();
        for b in &rec.bases {
            let mut bv = Value::empty_map();
            bv.insert("pos", b.pos);
            if let Some(access) = &b.access {
                bv.insert("access", access.as_str());
            }
            if b.virt {
                bv.insert("virtual", 1i64);
            }
            bases.insert(b.tid, bv);
        }
        v.insert("Base", bases);
    }
    if !rec.vtable.is_empty() {
        let mut vt = Value::empty_map();
        for (slot, entry) in &rec.vtable {
            vt.insert(*slot, entry.as_str());
        }
        v.insert("VTable", vt);
    }
    if !rec.tparams.is_empty() {
        let mut tp = Value::empty_map();
        for (pos, name) in rec.tparams.iter().enumerate() {
            let mut pv = Value::empty_map();
            pv.insert("name", name.as_str());
            tp.insert(pos as u64, pv);
        }
        v.insert("TParam", tp);
    }
    if !rec.params.is_empty() {
        let mut params = Value::empty_map();
        for (pos, &tid) in rec.params.iter().enumerate() {
            let mut pv = Value::empty_map();
            pv.insert("type", tid);
            params.insert(pos as u64, pv);
        }
        v.insert("Param", params);
    }
    if rec.copied && matches!(rec.kind, TypeKind::Class | TypeKind::Struct) {
        v.insert("Copied", 1i64);
    }
    v
}

fn symbol_value(sym: &SymbolRecord) -> Value {
    let mut v = Value::empty_map();
    v.insert("ShortName", sym.short_name.as_str());
    if sym.mangled != sym.short_name {
        v.insert("MnglName", sym.mangled.as_str());
    }
    if let Some(alias) = &sym.alias {
        v.insert("Alias", alias.as_str());
    }
    if let Some(class) = sym.class {
        v.insert("Class", class);
    }
    if let Some(ns) = &sym.namespace {
        v.insert("NameSpace", ns.as_str());
    }
    if let Some(ret) = sym.ret {
        v.insert("Return", ret);
    }
    if !sym.params.is_empty() {
        let mut params = Value::empty_map();
        for (pos, p) in sym.params.iter().enumerate() {
            let mut pv = Value::empty_map();
            pv.insert("name", p.name.as_str());
            pv.insert("type", p.tid);
            match &p.loc {
                Some(ParamLoc::Stack(off)) => pv.insert("offset", *off),
                Some(ParamLoc::Reg(reg)) => pv.insert("reg", reg.as_str()),
                None => {}
            }
            params.insert(pos as u64, pv);
        }
        v.insert("Param", params);
    }
    for (flag, set) in [
        ("Constructor", sym.ctor),
        ("Destructor", sym.dtor),
        ("Virt", sym.virt && !sym.pure_virt),
        ("PureVirt", sym.pure_virt),
        ("InLine", sym.in_line),
        ("Artificial", sym.artificial),
        ("Static", sym.is_static),
        ("Data", sym.data),
        ("Const", sym.is_const),
        ("Volatile", sym.is_volatile),
    ] {
        if set {
            v.insert(flag, 1i64);
        }
    }
    if let Some(slot) = sym.vtable_slot {
        v.insert("VirtPos", slot);
    }
    if let Some(site) = &sym.decl {
        site_into(&mut v, site);
    }
    v
}

fn build_dump(ctx: &Context) -> Value {
    let mut root = Value::empty_map();
    root.insert("ABI_DUMP_VERSION", ABI_DUMP_VERSION);
    root.insert("ABI_DUMPER_VERSION", env!("CARGO_PKG_VERSION"));
    root.insert("LibraryName", ctx.lib_name.as_str());
    root.insert(
        "LibraryVersion",
        ctx.lib_version.as_deref().unwrap_or_default(),
    );
    root.insert("Language", ctx.language.as_deref().unwrap_or("C"));
    match gcc_version(ctx.producer.as_deref()) {
        Some(version) => root.insert("GccVersion", version),
        None => root.insert("Compiler", ctx.producer.as_deref().unwrap_or_default()),
    }
    root.insert("Target", "unix");
    let (arch, word_size) = ctx
        .header
        .as_ref()
        .map_or(("unknown", 8), |h| (h.arch.as_str(), h.word_size));
    root.insert("Arch", arch);
    root.insert("WordSize", word_size);

    let mut tinfo = Value::empty_map();
    for (id, rec) in &ctx.types.records {
        tinfo.insert(*id, type_value(rec));
    }
    root.insert("TypeInfo", tinfo);

    let mut sinfo = Value::empty_map();
    for (id, sym) in &ctx.symbols.records {
        sinfo.insert(*id, symbol_value(sym));
    }
    root.insert("SymbolInfo", sinfo);

    let mut exported = Value::empty_map();
    for (name, size) in &ctx.elf.exports {
        exported.insert(name.as_str(), *size);
    }
    root.insert("Symbols", exported);

    let mut undefined = Value::empty_map();
    for name in &ctx.elf.undefined {
        undefined.insert(name.as_str(), 0i64);
    }
    root.insert("UndefinedSymbols", undefined);

    let mut needed = Value::empty_map();
    for name in &ctx.elf.needed {
        needed.insert(name.as_str(), 1i64);
    }
    root.insert("Needed", needed);

    let mut versions = Value::empty_map();
    for (base, versioned) in &ctx.elf.aliases {
        versions.insert(base.as_str(), versioned.as_str());
    }
    root.insert("SymbolVersion", versions);

    root.insert("Headers", position_map(&ctx.registry.headers));
    root.insert("Sources", position_map(&ctx.registry.sources));

    let mut namespaces = Value::empty_map();
    for ns in &ctx.registry.namespaces {
        namespaces.insert(ns.as_str(), 1i64);
    }
    root.insert("NameSpaces", namespaces);

    root
}

fn position_map(files: &std::collections::BTreeSet<String>) -> Value {
    let mut map = Value::empty_map();
    for (pos, name) in files.iter().enumerate() {
        map.insert(name.as_str(), (pos + 1) as u64);
    }
    map
}

/// Picks `9.4.0` out of `GNU C++14 9.4.0 -mtune=generic`.
fn gcc_version(producer: Option<&str>) -> Option<String> {
    let producer = producer?;
    if !producer.starts_with("GNU ") {
        return None;
    }
    producer
        .split_whitespace()
        .find(|tok| {
            tok.chars().all(|c| c.is_ascii_digit() || c == '.') && tok.contains('.')
        })
        .map(str::to_owned)
}
