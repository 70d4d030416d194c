use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::bytecode::{Emitter, Instruction, Opcode, disassemble};
use crate::codegen;
use crate::context::CompilationContext;
use crate::imports;
use crate::language::{LanguageTable, Msg};
use crate::lexer;
use crate::parser;

/// Result of one compilation run: the finished instruction stream, the C
/// translation unit, and the symbol tables that produced them.
#[derive(Debug)]
pub struct CompiledUnit {
    pub bytecode: Vec<Instruction>,
    pub c_source: String,
    pub context: CompilationContext,
}

impl CompiledUnit {
    pub fn listing(&self) -> String {
        disassemble(&self.bytecode)
    }
}

pub struct Compiler {
    lang: LanguageTable,
}

impl Compiler {
    pub fn new(lang: LanguageTable) -> Self {
        Self { lang }
    }

    pub fn compile_file(&self, path: &Path) -> Result<CompiledUnit> {
        let source =
            fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        let base_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        let label = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "programa".to_string());
        let origin = path.canonicalize().ok();
        self.compile_with(&source, &base_dir, origin, &label)
    }

    pub fn compile_source(&self, source: &str, base_dir: &Path) -> Result<CompiledUnit> {
        self.compile_with(source, base_dir, None, "programa")
    }

    fn compile_with(
        &self,
        source: &str,
        base_dir: &Path,
        origin: Option<PathBuf>,
        label: &str,
    ) -> Result<CompiledUnit> {
        let mut ctx = CompilationContext::new(self.lang.clone(), base_dir);
        ctx.root_label = label.to_string();
        if let Some(origin) = origin {
            // The entry file itself counts as processed so a circular chain
            // of imports cannot re-parse it.
            ctx.processed.insert(origin);
        }

        let tokens = lexer::tokenize(source, &ctx.lang)?;
        let program = parser::parse_tokens(tokens, &mut ctx)?;

        let mut emitter = Emitter::new();
        program.lower(&mut ctx, &mut emitter)?;
        emitter.emit(Opcode::Halt);
        imports::process_imports(&mut ctx, &mut emitter)?;

        if let Some(index) = emitter.first_unpatched() {
            return Err(ctx.error(Msg::UnpatchedJump, &[&index.to_string()]).into());
        }

        let c_source = codegen::generate(&emitter.code, &ctx)?;
        Ok(CompiledUnit {
            bytecode: emitter.code,
            c_source,
            context: ctx,
        })
    }
}
