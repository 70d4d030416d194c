use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::ast::Block;
use crate::language::{LanguageTable, Msg, format_message};

/// Fatal semantic or link error. Localized at construction, like the lexer
/// and parser errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub params: Vec<String>,
    /// Bytecode index of the body, unknown until the declaration is lowered.
    pub address: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub params: Vec<String>,
    pub address: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ClassEntry {
    /// Where the declaration came from, for duplicate warnings.
    pub source: String,
    pub methods: FxHashMap<String, MethodEntry>,
}

#[derive(Debug, Clone)]
pub struct NativeEntry {
    /// Shared-library file the wrapper declares against.
    pub library: PathBuf,
    pub arity: usize,
}

#[derive(Debug, Clone)]
pub struct ModuleEntry {
    pub path: PathBuf,
    pub native: bool,
    pub loaded: bool,
    pub ast: Option<Block>,
    /// Keys of modules this module imports, in source order.
    pub imports: Vec<String>,
}

/// All mutable state of one compilation run: the symbol tables the parser
/// populates eagerly and the code generator consumes. One instance per
/// compile invocation; `reset` restores a fresh run on reuse.
#[derive(Debug)]
pub struct CompilationContext {
    pub lang: LanguageTable,
    pub base_dir: PathBuf,
    pub functions: FxHashMap<String, FunctionEntry>,
    pub classes: FxHashMap<String, ClassEntry>,
    pub natives: FxHashMap<String, NativeEntry>,
    pub modules: FxHashMap<String, ModuleEntry>,
    /// Canonicalized paths already parsed; breaks circular imports.
    pub processed: FxHashSet<PathBuf>,
    /// Shared-library path while parsing a native wrapper file.
    pub current_library: Option<PathBuf>,
    /// Module keys currently being parsed, outermost first. Used to credit
    /// nested imports to the module that declares them.
    parsing_stack: Vec<String>,
    /// Display label for declarations in the entry file.
    pub root_label: String,
    temp_counter: usize,
}

impl CompilationContext {
    pub fn new(lang: LanguageTable, base_dir: &Path) -> Self {
        Self {
            lang,
            base_dir: base_dir.to_path_buf(),
            functions: FxHashMap::default(),
            classes: FxHashMap::default(),
            natives: FxHashMap::default(),
            modules: FxHashMap::default(),
            processed: FxHashSet::default(),
            current_library: None,
            parsing_stack: Vec::new(),
            root_label: "programa".to_string(),
            temp_counter: 0,
        }
    }

    pub fn reset(&mut self) {
        self.functions.clear();
        self.classes.clear();
        self.natives.clear();
        self.modules.clear();
        self.processed.clear();
        self.current_library = None;
        self.parsing_stack.clear();
        self.temp_counter = 0;
    }

    pub fn error(&self, key: Msg, args: &[&str]) -> CompileError {
        CompileError {
            message: format_message(self.lang.msg(key), args),
        }
    }

    pub fn warn(&self, key: Msg, args: &[&str]) {
        let message = format_message(self.lang.msg(key), args);
        eprintln!("\x1b[33m{message}\x1b[0m");
    }

    pub fn register_function(&mut self, name: &str, params: Vec<String>) {
        self.functions.insert(
            name.to_string(),
            FunctionEntry {
                params,
                address: None,
            },
        );
    }

    pub fn set_function_address(&mut self, name: &str, address: usize) {
        if let Some(entry) = self.functions.get_mut(name) {
            entry.address = Some(address);
        }
    }

    /// Eager class registration. A second registration from a different
    /// source wins wholesale (the original language accepted shadowing), but
    /// the collision is surfaced as a warning.
    pub fn register_class(&mut self, name: &str, source: &str) {
        if let Some(previous) = self.classes.get(name) {
            if previous.source != source {
                self.warn(Msg::DuplicateClass, &[name, source, &previous.source]);
            }
        }
        self.classes.insert(
            name.to_string(),
            ClassEntry {
                source: source.to_string(),
                methods: FxHashMap::default(),
            },
        );
    }

    pub fn register_method(&mut self, class: &str, method: &str, params: Vec<String>) {
        if let Some(entry) = self.classes.get_mut(class) {
            entry.methods.insert(
                method.to_string(),
                MethodEntry {
                    params,
                    address: None,
                },
            );
        }
    }

    pub fn set_method_address(&mut self, class: &str, method: &str, address: usize) {
        if let Some(entry) = self.classes.get_mut(class)
            && let Some(method) = entry.methods.get_mut(method)
        {
            method.address = Some(address);
        }
    }

    pub fn register_native(&mut self, name: &str, library: PathBuf, arity: usize) {
        self.natives
            .insert(name.to_string(), NativeEntry { library, arity });
    }

    pub fn register_module(&mut self, key: &str, entry: ModuleEntry) {
        if let Some(parent) = self.parsing_stack.last() {
            let parent = parent.clone();
            if let Some(parent_entry) = self.modules.get_mut(&parent) {
                parent_entry.imports.push(key.to_string());
            }
        }
        self.modules.insert(key.to_string(), entry);
    }

    pub fn push_parsing(&mut self, key: &str) {
        self.parsing_stack.push(key.to_string());
    }

    pub fn pop_parsing(&mut self) {
        self.parsing_stack.pop();
    }

    /// Label naming the module whose source is currently being parsed, used
    /// when reporting duplicate declarations.
    pub fn current_module_label(&self) -> String {
        self.parsing_stack
            .last()
            .cloned()
            .unwrap_or_else(|| self.root_label.clone())
    }

    pub fn is_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn is_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// True once any native library has been imported; unknown call names
    /// then defer to codegen-time linkage validation.
    pub fn has_native_modules(&self) -> bool {
        self.modules.values().any(|module| module.native)
    }

    /// Synthesized variable name for loop counters. `#` cannot start a user
    /// identifier, so these never collide.
    pub fn fresh_temp(&mut self) -> String {
        let name = format!("#tmp{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CompilationContext {
        CompilationContext::new(LanguageTable::portuguese(), Path::new("."))
    }

    #[test]
    fn function_registration_is_two_phase() {
        let mut ctx = context();
        ctx.register_function("dobro", vec!["n".to_string()]);
        assert_eq!(ctx.functions["dobro"].address, None);
        ctx.set_function_address("dobro", 7);
        assert_eq!(ctx.functions["dobro"].address, Some(7));
    }

    #[test]
    fn duplicate_class_registration_last_write_wins() {
        let mut ctx = context();
        ctx.register_class("Pessoa", "a.jp");
        ctx.register_method("Pessoa", "criar", vec!["nome".to_string()]);
        ctx.set_method_address("Pessoa", "criar", 3);

        ctx.register_class("Pessoa", "b.jp");
        ctx.register_method("Pessoa", "criar", vec!["nome".to_string()]);
        ctx.set_method_address("Pessoa", "criar", 11);

        assert_eq!(ctx.classes["Pessoa"].source, "b.jp");
        assert_eq!(ctx.classes["Pessoa"].methods["criar"].address, Some(11));
    }

    #[test]
    fn reset_clears_every_table() {
        let mut ctx = context();
        ctx.register_function("f", vec![]);
        ctx.register_class("C", "x.jp");
        ctx.register_native("n", PathBuf::from("lib.so"), 1);
        ctx.processed.insert(PathBuf::from("a.jp"));
        ctx.reset();
        assert!(ctx.functions.is_empty());
        assert!(ctx.classes.is_empty());
        assert!(ctx.natives.is_empty());
        assert!(ctx.processed.is_empty());
    }

    #[test]
    fn temp_names_are_unique_and_unspeakable() {
        let mut ctx = context();
        let a = ctx.fresh_temp();
        let b = ctx.fresh_temp();
        assert_ne!(a, b);
        assert!(a.starts_with('#'));
    }
}
