use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use jplang::codegen::c_runtime;
use jplang::compiler::Compiler;
use jplang::language::LanguageTable;

const USAGE: &str = "uso: jplang <run|build|debug> <arquivo.jp> [--lang pt|en] [-o pasta] [-w]";

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        bail!("{USAGE}");
    };

    let mut lang_name = "pt".to_string();
    let mut gui_mode = false;
    let mut out_dir: Option<String> = None;
    let mut input: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--lang" | "-l" => {
                lang_name = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Missing language after {arg}"))?;
            }
            "-o" => {
                out_dir = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("Missing directory after -o"))?,
                );
            }
            "-w" => gui_mode = true,
            _ => {
                if input.is_some() {
                    bail!("Only one input file is supported");
                }
                input = Some(arg);
            }
        }
    }

    let Some(input) = input else {
        bail!("{USAGE}");
    };
    let lang = match lang_name.as_str() {
        "pt" => LanguageTable::portuguese(),
        "en" => LanguageTable::english(),
        other => bail!("Unknown language '{other}'"),
    };

    let path = PathBuf::from(&input);
    let compiler = Compiler::new(lang);
    let extra_args: &[&str] = if gui_mode && cfg!(windows) {
        &["-mwindows"]
    } else {
        &[]
    };

    match command.as_str() {
        "run" => {
            let unit = compiler.compile_file(&path)?;
            let (_, binary) =
                c_runtime::compile_source(&unit.c_source, "", "C compilation failed")?;
            let output = c_runtime::run_compiled_binary(&binary, "Program failed")?;
            print!("{output}");
        }
        "debug" => {
            let unit = compiler.compile_file(&path)?;
            print!("{}", unit.listing());
            let (_, binary) =
                c_runtime::compile_source(&unit.c_source, "", "C compilation failed")?;
            let output = c_runtime::run_compiled_binary(&binary, "Program failed")?;
            print!("{output}");
        }
        "build" => {
            let unit = compiler.compile_file(&path)?;
            let out_dir = PathBuf::from(out_dir.unwrap_or_else(|| "build".to_string()));
            fs::create_dir_all(&out_dir)
                .with_context(|| format!("Creating {}", out_dir.display()))?;
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "programa".to_string());
            let c_path = out_dir.join(format!("{stem}.c"));
            let exe_suffix = if cfg!(windows) { ".exe" } else { "" };
            let exe_path = out_dir.join(format!("{stem}{exe_suffix}"));
            fs::write(&c_path, &unit.c_source)
                .with_context(|| format!("Writing {}", c_path.display()))?;
            c_runtime::compile_file(&c_path, &exe_path, extra_args, "C compilation failed")?;
            println!("{}", exe_path.display());
        }
        other => bail!("Unknown command '{other}'"),
    }

    Ok(())
}
