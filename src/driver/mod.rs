//! Compilation driver
//!
//! Runs the Lexer → Parser → Code Generator pipeline once per compilation
//! unit, with a content-addressed artifact cache in front of the generator
//! and atomic output placement behind it. A directory build compiles every
//! unit independently and keeps going past per-unit failures.

pub mod cache;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use log::{debug, info, warn};

use crate::backend::abi::CApi;
use crate::backend::codegen::CodeGenerator;
use crate::frontend::ast::{Module, Stmt};
use crate::frontend::{lexer, parser};
use crate::utils::{Error, Result};
use cache::Cache;

/// What the driver asks the toolchain to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Native object for linking into a shared artifact
    Shared,
    /// Standalone executable
    Exe,
    /// Portable bytecode module (wasm object)
    Bytecode,
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "shared" => Ok(TargetKind::Shared),
            "exe" => Ok(TargetKind::Exe),
            "bytecode" => Ok(TargetKind::Bytecode),
            other => Err(format!("unknown target '{other}' (shared, exe, bytecode)")),
        }
    }
}

/// Per-invocation build configuration
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub target: TargetKind,
    /// Bypass the artifact cache even on a fingerprint match
    pub force: bool,
    /// Write the lowered C translation unit instead of invoking a compiler
    pub emit_c: bool,
    pub output: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            target: TargetKind::Exe,
            force: false,
            emit_c: false,
            output: None,
            cache_dir: None,
        }
    }
}

/// Outcome of one successfully compiled unit
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub source: PathBuf,
    pub artifact: PathBuf,
    /// True when the cached artifact was reused and the code generator
    /// never ran
    pub from_cache: bool,
}

/// Outcome of a directory build
#[derive(Debug)]
pub struct BatchSummary {
    pub results: Vec<(PathBuf, Result<CompiledUnit>)>,
}

impl BatchSummary {
    pub fn ok_count(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.ok_count()
    }
}

/// Lex and parse a unit without generating code
pub fn check_file(path: &Path) -> Result<()> {
    let source = fs::read(path)?;
    let tokens = lexer::tokenize(&source)?;
    let _module = parser::parse(tokens)?;
    Ok(())
}

/// Compile one source file to an artifact
pub fn compile_file(path: &Path, opts: &BuildOptions) -> Result<CompiledUnit> {
    let source = fs::read(path)?;
    let fp = cache::fingerprint(&source);
    let out_path = output_path(path, opts);
    let unit_key = path.to_string_lossy().into_owned();

    let cache_dir = opts
        .cache_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("pyaot-cache"));
    let mut cache = Cache::open(&cache_dir)?;

    if !opts.force {
        if let Some(cached) = cache.lookup(&unit_key, &fp) {
            debug!("{}: cache hit ({})", path.display(), &fp[..12]);
            // Copy preserves permissions (the artifact may be executable);
            // the rename keeps placement atomic.
            let tmp = out_path.with_extension(format!("tmp{}", std::process::id()));
            fs::copy(&cached, &tmp)?;
            fs::rename(&tmp, &out_path)?;
            return Ok(CompiledUnit {
                source: path.to_path_buf(),
                artifact: out_path,
                from_cache: true,
            });
        }
    }

    info!("compiling {}", path.display());
    let tokens = lexer::tokenize(&source)?;
    let module = parser::parse(tokens)?;
    let imports = load_imports(&module, path)?;

    let abi = CApi;
    let mut generator = CodeGenerator::new(&abi);
    generator.set_export_wrappers(opts.target == TargetKind::Shared);
    let program = generator.generate(&module, &imports)?;
    debug!(
        "{}: lowered {} classes, {} functions",
        path.display(),
        program.classes.len(),
        program.functions.len()
    );

    if opts.emit_c {
        write_atomic(&out_path, program.source.as_bytes())?;
        cache.store(&unit_key, &fp, &out_path)?;
        return Ok(CompiledUnit {
            source: path.to_path_buf(),
            artifact: out_path,
            from_cache: false,
        });
    }

    // Hand the translation unit to the system C compiler, then move the
    // artifact into place in one rename.
    let c_path = out_path.with_extension("pyaot.c");
    write_atomic(&c_path, program.source.as_bytes())?;
    let tmp_out = out_path.with_extension("pyaot.tmp");
    let compile_result = run_cc(&c_path, &tmp_out, opts.target);
    let _ = fs::remove_file(&c_path);
    compile_result?;
    fs::rename(&tmp_out, &out_path)?;

    cache.store(&unit_key, &fp, &out_path)?;
    Ok(CompiledUnit {
        source: path.to_path_buf(),
        artifact: out_path,
        from_cache: false,
    })
}

/// Compile every `.py` file in a directory, continuing past failures
pub fn compile_dir(dir: &Path, opts: &BuildOptions) -> Result<BatchSummary> {
    let mut sources: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().map_or(false, |e| e == "py"))
        .collect();
    sources.sort();

    let mut results = Vec::new();
    for source in sources {
        // Each unit gets its own pipeline state; one failure must not
        // disturb its siblings.
        let unit_opts = BuildOptions {
            output: None,
            ..opts.clone()
        };
        let result = compile_file(&source, &unit_opts);
        if let Err(e) = &result {
            warn!("{}: {e}", source.display());
        }
        results.push((source, result));
    }

    let summary = BatchSummary { results };
    info!(
        "batch finished: {} ok, {} failed",
        summary.ok_count(),
        summary.failed_count()
    );
    Ok(summary)
}

/// Resolve `import` statements to sibling modules, recursively
fn load_imports(module: &Module, source_path: &Path) -> Result<Vec<(String, Module)>> {
    let search_dir = source_path.parent().unwrap_or(Path::new("."));
    let mut loaded: Vec<(String, Module)> = Vec::new();
    let mut queue = imported_names(module);

    while let Some(name) = queue.pop() {
        if loaded.iter().any(|(n, _)| *n == name) {
            continue;
        }
        let module_path = search_dir.join(format!("{name}.py"));
        if !module_path.exists() {
            return Err(Error::ModuleNotFound {
                name,
                searched: search_dir.display().to_string(),
            });
        }
        debug!("loading module {name} from {}", module_path.display());
        let bytes = fs::read(&module_path)?;
        let tokens = lexer::tokenize(&bytes)?;
        let imported = parser::parse(tokens)?;
        queue.extend(imported_names(&imported));
        loaded.push((name, imported));
    }
    Ok(loaded)
}

fn imported_names(module: &Module) -> Vec<String> {
    let mut names = Vec::new();
    for stmt in &module.body {
        match stmt {
            Stmt::Import { names: aliases, .. } => {
                names.extend(aliases.iter().map(|a| a.name.clone()));
            }
            Stmt::ImportFrom { module: name, .. } => names.push(name.clone()),
            _ => {}
        }
    }
    names
}

fn output_path(source: &Path, opts: &BuildOptions) -> PathBuf {
    if let Some(out) = &opts.output {
        return out.clone();
    }
    let stem = source.with_extension("");
    if opts.emit_c {
        return stem.with_extension("c");
    }
    match opts.target {
        TargetKind::Shared => stem.with_extension("o"),
        TargetKind::Exe => stem,
        TargetKind::Bytecode => stem.with_extension("wasm"),
    }
}

/// Write via a temporary sibling and rename, so no partial output is ever
/// visible under the final name.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension(format!("tmp{}", std::process::id()));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Invoke the system C compiler for the selected target kind
fn run_cc(c_path: &Path, out_path: &Path, target: TargetKind) -> Result<()> {
    let compilers: &[&str] = match target {
        TargetKind::Bytecode => &["clang"],
        _ => &["clang", "gcc", "cc"],
    };
    let mut last_error = String::new();

    for compiler in compilers {
        let mut cmd = Command::new(compiler);
        match target {
            TargetKind::Shared => {
                cmd.arg("-c");
            }
            TargetKind::Bytecode => {
                cmd.arg("--target=wasm32").arg("-c");
            }
            TargetKind::Exe => {}
        }
        let result = cmd.arg("-o").arg(out_path).arg(c_path).output();
        match result {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => {
                last_error = String::from_utf8_lossy(&output.stderr).into_owned();
            }
            Err(e) => {
                last_error = e.to_string();
            }
        }
    }
    Err(Error::ExternalCompiler(last_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

    fn scratch_dir(tag: &str) -> PathBuf {
        let seq = DIR_SEQ.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "pyaot-driver-test-{tag}-{}-{seq}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn emit_c_opts(dir: &Path) -> BuildOptions {
        BuildOptions {
            emit_c: true,
            cache_dir: Some(dir.join("cache")),
            ..BuildOptions::default()
        }
    }

    #[test]
    fn test_compile_file_emits_c() {
        let dir = scratch_dir("emit");
        let src = dir.join("app.py");
        fs::write(&src, "x = 1\nprint(x)\n").unwrap();

        let unit = compile_file(&src, &emit_c_opts(&dir)).unwrap();
        assert!(!unit.from_cache);
        let c = fs::read_to_string(&unit.artifact).unwrap();
        assert!(c.contains("int main(void)"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cache_idempotence_and_force() {
        let dir = scratch_dir("idem");
        let src = dir.join("app.py");
        fs::write(&src, "x = 41 + 1\n").unwrap();
        let opts = emit_c_opts(&dir);

        // First build runs the generator, second reuses the artifact
        let first = compile_file(&src, &opts).unwrap();
        assert!(!first.from_cache);
        let second = compile_file(&src, &opts).unwrap();
        assert!(second.from_cache);
        assert_eq!(
            fs::read(&first.artifact).unwrap(),
            fs::read(&second.artifact).unwrap()
        );

        // The force flag always regenerates
        let forced_opts = BuildOptions {
            force: true,
            ..opts.clone()
        };
        let forced = compile_file(&src, &forced_opts).unwrap();
        assert!(!forced.from_cache);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_fingerprint_change_recompiles() {
        let dir = scratch_dir("fp");
        let src = dir.join("app.py");
        let opts = emit_c_opts(&dir);

        fs::write(&src, "x = 1\n").unwrap();
        let first = compile_file(&src, &opts).unwrap();
        assert!(!first.from_cache);

        fs::write(&src, "x = 2\n").unwrap();
        let second = compile_file(&src, &opts).unwrap();
        assert!(!second.from_cache);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_batch_failure_isolation() {
        let dir = scratch_dir("batch");
        fs::write(dir.join("a.py"), "x = 1\n").unwrap();
        fs::write(dir.join("b.py"), "def broken(:\n").unwrap();
        fs::write(dir.join("c.py"), "y = 2\n").unwrap();

        let summary = compile_dir(&dir, &emit_c_opts(&dir)).unwrap();
        assert_eq!(summary.results.len(), 3);
        assert_eq!(summary.ok_count(), 2);
        assert_eq!(summary.failed_count(), 1);

        // The healthy units produced artifacts despite the failure
        assert!(dir.join("a.c").exists());
        assert!(dir.join("c.c").exists());
        assert!(!dir.join("b.c").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failed_unit_leaves_no_artifact() {
        let dir = scratch_dir("partial");
        let src = dir.join("bad.py");
        fs::write(&src, "if x\n    y = 1\n").unwrap();

        let result = compile_file(&src, &emit_c_opts(&dir));
        assert!(result.is_err());
        assert!(!dir.join("bad.c").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_module_import_is_lowered_into_unit() {
        let dir = scratch_dir("imports");
        fs::write(
            dir.join("mymath.py"),
            "def double(x: int) -> int:\n    return x * 2\n",
        )
        .unwrap();
        let src = dir.join("app.py");
        fs::write(&src, "import mymath\nprint(mymath.double(21))\n").unwrap();

        let unit = compile_file(&src, &emit_c_opts(&dir)).unwrap();
        let c = fs::read_to_string(&unit.artifact).unwrap();
        assert!(c.contains("mymath_double"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_module_is_a_driver_error() {
        let dir = scratch_dir("missing");
        let src = dir.join("app.py");
        fs::write(&src, "import nosuchmodule\n").unwrap();

        let err = compile_file(&src, &emit_c_opts(&dir)).unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound { .. }));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_check_file() {
        let dir = scratch_dir("check");
        let good = dir.join("good.py");
        fs::write(&good, "def f():\n    return 1\n").unwrap();
        assert!(check_file(&good).is_ok());

        let bad = dir.join("bad.py");
        fs::write(&bad, "def f(:\n").unwrap();
        assert!(check_file(&bad).is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
