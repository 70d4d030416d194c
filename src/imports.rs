use std::fs;
use std::path::{Path, PathBuf};

use crate::ast::ImportKind;
use crate::bytecode::Emitter;
use crate::context::{CompilationContext, CompileError, ModuleEntry};
use crate::language::{Msg, format_message};
use crate::lexer;
use crate::parser::{self, ParseError};

/// `importar nome` resolves to `bibliotecas/<nome>/<nome>.jp`; a wrapper
/// living at exactly that shape is a native library.
pub const LIBRARY_DIR: &str = "bibliotecas";
pub const SOURCE_EXT: &str = "jp";

/// Key under which a module lands in the module table: its alias when one
/// was given, otherwise its plain name or file stem.
pub fn module_key(kind: &ImportKind) -> String {
    match kind {
        ImportKind::Plain { name } => name.clone(),
        ImportKind::Alias { alias, .. } => alias.clone(),
        ImportKind::Selective { name, .. } => name.clone(),
        ImportKind::File { path } => Path::new(path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(path)
            .to_string(),
    }
}

fn candidates(kind: &ImportKind) -> Vec<String> {
    match kind {
        ImportKind::Plain { name }
        | ImportKind::Alias { name, .. }
        | ImportKind::Selective { name, .. } => vec![
            format!("{LIBRARY_DIR}/{name}/{name}.{SOURCE_EXT}"),
            format!("{name}.{SOURCE_EXT}"),
        ],
        ImportKind::File { path } => vec![path.clone()],
    }
}

/// Absolute, then base-dir-relative, then cwd-relative.
fn resolve(ctx: &CompilationContext, candidate: &str) -> Option<PathBuf> {
    let path = Path::new(candidate);
    if path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }
    let in_base = ctx.base_dir.join(path);
    if in_base.exists() {
        return Some(in_base);
    }
    path.exists().then(|| path.to_path_buf())
}

pub fn is_native_wrapper(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
        return false;
    };
    if path.extension().and_then(|ext| ext.to_str()) != Some(SOURCE_EXT) {
        return false;
    }
    let Some(parent) = path.parent() else {
        return false;
    };
    if parent.file_name().and_then(|name| name.to_str()) != Some(stem) {
        return false;
    }
    matches!(
        parent
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str()),
        Some(LIBRARY_DIR)
    )
}

/// Shared-library file sitting next to a native wrapper.
pub fn library_file(wrapper: &Path) -> PathBuf {
    let stem = wrapper
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    let file = format!("{stem}.{}", std::env::consts::DLL_EXTENSION);
    wrapper.with_file_name(file)
}

/// Invoked by the parser the moment an import statement is constructed:
/// resolves the module, recursively lexes and parses it (but does not lower
/// it), so its declarations are visible before the importer's next token.
/// The processed-paths set guarantees each file is parsed at most once,
/// which is also what breaks circular imports.
pub fn eager_load(
    ctx: &mut CompilationContext,
    kind: &ImportKind,
    line: usize,
) -> Result<(), ParseError> {
    let key = module_key(kind);
    if ctx.modules.contains_key(&key) {
        return Ok(());
    }

    let display = match kind {
        ImportKind::File { path } => path.clone(),
        _ => key.clone(),
    };
    let Some(resolved) = candidates(kind)
        .iter()
        .find_map(|candidate| resolve(ctx, candidate))
    else {
        return Err(ParseError {
            line,
            message: format_message(ctx.lang.msg(Msg::ModuleNotFound), &[&display]),
        });
    };

    let canonical = resolved.canonicalize().unwrap_or_else(|_| resolved.clone());
    let native = is_native_wrapper(&resolved);
    if ctx.processed.contains(&canonical) {
        ctx.register_module(&key, ModuleEntry {
            path: resolved,
            native,
            loaded: true,
            ast: None,
            imports: Vec::new(),
        });
        return Ok(());
    }
    ctx.processed.insert(canonical);
    // Native wrappers are parsed for their declarations but never lowered
    // inline, so they are born loaded.
    ctx.register_module(&key, ModuleEntry {
        path: resolved.clone(),
        native,
        loaded: native,
        ast: None,
        imports: Vec::new(),
    });

    let source = fs::read_to_string(&resolved).map_err(|_| ParseError {
        line,
        message: format_message(ctx.lang.msg(Msg::ModuleNotFound), &[&display]),
    })?;

    ctx.push_parsing(&key);
    let saved_library = ctx.current_library.take();
    if native {
        ctx.current_library = Some(library_file(&resolved));
    }
    let tokens = match lexer::tokenize(&source, &ctx.lang) {
        Ok(tokens) => tokens,
        Err(err) => {
            ctx.current_library = saved_library;
            ctx.pop_parsing();
            return Err(ParseError {
                line: err.line,
                message: err.message,
            });
        }
    };
    let parsed = parser::parse_tokens(tokens, ctx);
    ctx.current_library = saved_library;
    ctx.pop_parsing();

    let ast = parsed?;
    if !native && let Some(entry) = ctx.modules.get_mut(&key) {
        entry.ast = Some(ast);
    }
    Ok(())
}

/// Lowers every parsed-but-unloaded module, transitive imports first, and
/// appends the instructions to the growing stream. The main program's `Halt`
/// precedes this, so only the modules' declarations are reachable.
pub fn process_imports(ctx: &mut CompilationContext, em: &mut Emitter) -> Result<(), CompileError> {
    loop {
        let mut pending: Vec<String> = ctx
            .modules
            .iter()
            .filter(|(_, module)| !module.loaded)
            .map(|(key, _)| key.clone())
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        pending.sort();
        for key in pending {
            lower_module(ctx, em, &key)?;
        }
    }
}

fn lower_module(
    ctx: &mut CompilationContext,
    em: &mut Emitter,
    key: &str,
) -> Result<(), CompileError> {
    let Some(entry) = ctx.modules.get_mut(key) else {
        return Ok(());
    };
    if entry.loaded {
        return Ok(());
    }
    entry.loaded = true;
    let dependencies = entry.imports.clone();
    let ast = entry.ast.take();
    for dependency in dependencies {
        lower_module(ctx, em, &dependency)?;
    }
    if let Some(ast) = ast {
        ast.lower(ctx, em)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::LanguageTable;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("jplang-imports-{tag}-{nanos}"));
        fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    fn context_in(dir: &Path) -> CompilationContext {
        CompilationContext::new(LanguageTable::portuguese(), dir)
    }

    fn parse_main(ctx: &mut CompilationContext, source: &str) -> crate::ast::Block {
        let tokens = lexer::tokenize(source, &ctx.lang).expect("tokenize");
        parser::parse_tokens(tokens, ctx).expect("parse")
    }

    #[test]
    fn plain_import_loads_sibling_module_eagerly() {
        let dir = scratch_dir("sibling");
        fs::write(dir.join("util.jp"), "funcao ajuda(x):\n    retornar x\n").expect("write");
        let mut ctx = context_in(&dir);
        parse_main(&mut ctx, "importar util\ny = ajuda(1)\n");
        assert!(ctx.functions.contains_key("ajuda"));
        let module = &ctx.modules["util"];
        assert!(!module.native);
        assert!(!module.loaded);
        assert!(module.ast.is_some());
    }

    #[test]
    fn imported_declarations_visible_before_the_import_line() {
        // Parsing is sequential, but the import on line 1 registers the
        // class before line 2 is reached; the reference resolves statically.
        let dir = scratch_dir("forward");
        fs::write(
            dir.join("modelos.jp"),
            "classe Pessoa:\n    funcao criar(nome):\n        auto.nome = nome\n",
        )
        .expect("write");
        let mut ctx = context_in(&dir);
        let program = parse_main(&mut ctx, "importar modelos\np = Pessoa.criar(\"Ana\")\n");
        assert!(ctx.is_class("Pessoa"));
        let crate::ast::Statement::Assign { value, .. } = &program.0[1] else {
            panic!("expected assignment");
        };
        assert!(matches!(value, crate::ast::Expression::StaticCall { .. }));
    }

    #[test]
    fn native_wrapper_convention_registers_natives() {
        let dir = scratch_dir("native");
        let wrapper_dir = dir.join(LIBRARY_DIR).join("mat");
        fs::create_dir_all(&wrapper_dir).expect("create wrapper dir");
        fs::write(wrapper_dir.join("mat.jp"), "nativo raiz(1)\nnativo pot(2)\n")
            .expect("write wrapper");
        let mut ctx = context_in(&dir);
        parse_main(&mut ctx, "importar mat\n");
        let module = &ctx.modules["mat"];
        assert!(module.native);
        assert!(module.loaded, "native wrappers are never lowered inline");
        assert_eq!(ctx.natives["raiz"].arity, 1);
        assert_eq!(ctx.natives["pot"].arity, 2);
        assert_eq!(
            ctx.natives["raiz"].library,
            library_file(&module.path),
        );
    }

    #[test]
    fn alias_import_keys_the_module_by_alias() {
        let dir = scratch_dir("alias");
        fs::write(dir.join("util.jp"), "funcao ajuda():\n    retornar 1\n").expect("write");
        let mut ctx = context_in(&dir);
        parse_main(&mut ctx, "importar util como u\n");
        assert!(ctx.modules.contains_key("u"));
        assert!(!ctx.modules.contains_key("util"));
    }

    #[test]
    fn circular_imports_parse_each_module_once() {
        let dir = scratch_dir("cycle");
        fs::write(dir.join("a.jp"), "importar \"b.jp\"\nfuncao fa():\n    retornar 1\n")
            .expect("write a");
        fs::write(dir.join("b.jp"), "importar \"a.jp\"\nfuncao fb():\n    retornar 2\n")
            .expect("write b");
        let mut ctx = context_in(&dir);
        parse_main(&mut ctx, "importar \"a.jp\"\n");
        assert!(ctx.functions.contains_key("fa"));
        assert!(ctx.functions.contains_key("fb"));
    }

    #[test]
    fn repeated_import_is_a_no_op() {
        let dir = scratch_dir("repeat");
        fs::write(dir.join("util.jp"), "funcao ajuda():\n    retornar 1\n").expect("write");
        let mut ctx = context_in(&dir);
        parse_main(&mut ctx, "importar util\nimportar util\n");
        assert_eq!(ctx.modules.len(), 1);
    }

    #[test]
    fn missing_module_is_fatal_with_localized_message() {
        let dir = scratch_dir("missing");
        let mut ctx = context_in(&dir);
        let tokens = lexer::tokenize("importar fantasma\n", &ctx.lang).expect("tokenize");
        let err = parser::parse_tokens(tokens, &mut ctx).expect_err("import must fail");
        assert!(err.message.contains("fantasma"));
        assert!(err.message.contains("nao encontrado"));
    }

    #[test]
    fn process_imports_lowers_transitively_and_marks_loaded() {
        let dir = scratch_dir("lowering");
        fs::write(dir.join("fundo.jp"), "funcao base():\n    retornar 1\n").expect("write");
        fs::write(
            dir.join("meio.jp"),
            "importar \"fundo.jp\"\nfuncao meio():\n    retornar base()\n",
        )
        .expect("write");
        let mut ctx = context_in(&dir);
        let program = parse_main(&mut ctx, "importar \"meio.jp\"\nx = meio()\n");
        let mut em = Emitter::new();
        program.lower(&mut ctx, &mut em).expect("lower main");
        em.emit(crate::bytecode::Opcode::Halt);
        process_imports(&mut ctx, &mut em).expect("process imports");
        assert!(ctx.modules.values().all(|module| module.loaded));
        assert!(ctx.functions["base"].address.is_some());
        assert!(ctx.functions["meio"].address.is_some());
        assert_eq!(em.first_unpatched(), None);
    }

    #[test]
    fn native_wrapper_shape_is_exact() {
        assert!(is_native_wrapper(Path::new("bibliotecas/mat/mat.jp")));
        assert!(!is_native_wrapper(Path::new("bibliotecas/mat/outro.jp")));
        assert!(!is_native_wrapper(Path::new("outros/mat/mat.jp")));
        assert!(!is_native_wrapper(Path::new("mat.jp")));
    }
}
