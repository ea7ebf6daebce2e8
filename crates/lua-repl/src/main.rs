use std::process::ExitCode;

use rustyline::{error::ReadlineError, DefaultEditor};
use thiserror::Error;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use lua_core::LuaError;
use lua_vm::{stdlib, Config, LuaState, LUA_MULTRET};

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot read '{path}': {source}")]
    Read { path: String, source: std::io::Error },

    #[error("cannot write '{path}': {source}")]
    Write { path: String, source: std::io::Error },

    #[error("readline: {0}")]
    Readline(#[from] ReadlineError),

    #[error(transparent)]
    Lua(#[from] LuaError),

    #[error("{0}")]
    Usage(String),
}

const USAGE: &str = "usage: lua [--max-depth N] [-c script.lua | -d script.lua [out.luac] | script]";

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read(path: &str) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Read {
        path: path.to_string(),
        source,
    })
}

fn read_source(path: &str) -> Result<String, CliError> {
    let raw = read(path)?;
    String::from_utf8(raw).map_err(|e| {
        CliError::Lua(LuaError::Syntax {
            line: 1,
            message: format!("'{path}' is not valid UTF-8: {e}"),
        })
    })
}

fn new_state(config: Config) -> Result<LuaState, CliError> {
    let mut ls = LuaState::with_config(config);
    stdlib::open_base(&mut ls)?;
    Ok(ls)
}

/// A parse failure that more input could fix.
fn is_incomplete(err: &LuaError) -> bool {
    match err {
        LuaError::Syntax { message, .. } => message.trim_end_matches('\'').ends_with("<eof>"),
        _ => false,
    }
}

// ── Listing & dump ────────────────────────────────────────────────────────────

fn compile_listing(path: &str) -> Result<(), CliError> {
    let src = read_source(path)?;
    let proto = lua_compiler::compile(&src, &format!("@{path}"))?;
    print!("{}", lua_compiler::disassemble(&proto));
    Ok(())
}

fn dump_bytecode(src_path: &str, out_path: Option<&str>) -> Result<(), CliError> {
    let src = read_source(src_path)?;
    let proto = lua_compiler::compile(&src, &format!("@{src_path}"))?;
    let bytes = lua_compiler::dump(&proto);

    let dest = match out_path {
        Some(p) => p.to_string(),
        // script.lua → script.luac
        None if src_path.ends_with(".lua") => format!("{src_path}c"),
        None => format!("{src_path}.luac"),
    };
    std::fs::write(&dest, &bytes).map_err(|source| CliError::Write {
        path: dest.clone(),
        source,
    })?;
    eprintln!("wrote {} bytes to '{dest}'", bytes.len());
    Ok(())
}

// ── Script runner ─────────────────────────────────────────────────────────────

fn run_file(path: &str, config: Config) -> Result<(), CliError> {
    let raw = read(path)?;
    let mut ls = new_state(config)?;
    ls.load(&raw, &format!("@{path}"), "bt")?;
    ls.call(0, 0)?;
    Ok(())
}

// ── Interactive REPL ──────────────────────────────────────────────────────────

/// `local function f` / `local x = …` become globals so the name survives
/// into later lines, each of which is a separate chunk.
///
/// Only a `local` that starts the line is rewritten: in
/// `local x = 1; local y = 2` the name `y` stays local to that line.
fn hoist_locals(src: &str) -> String {
    let s = src.trim_start();
    match s.strip_prefix("local ") {
        Some(rest) => rest.to_string(),
        None => src.to_string(),
    }
}

/// Compile `buf` as an expression to print, or failing that as statements.
fn load_line(ls: &mut LuaState, buf: &str) -> Result<(), LuaError> {
    if ls.load(format!("return {buf}").as_bytes(), "=stdin", "t").is_ok() {
        return Ok(());
    }
    let hoisted = hoist_locals(buf);
    if ls.load(hoisted.as_bytes(), "=stdin", "t").is_ok() {
        return Ok(());
    }
    ls.load(buf.as_bytes(), "=stdin", "t")
}

/// Run the function on top and print whatever it returns.
fn eval(ls: &mut LuaState) -> Result<(), LuaError> {
    ls.call(0, LUA_MULTRET)?;
    let n = ls.get_top();
    if n > 0 {
        stdlib::call_global(ls, "print", n)?;
    }
    Ok(())
}

fn repl(config: Config) -> Result<(), CliError> {
    println!("lua-rust 0.1.0  (type 'exit' or Ctrl-D to quit)");

    let mut rl = DefaultEditor::new()?;
    let mut ls = new_state(config)?;
    let mut buf = String::new();

    loop {
        let prompt = if buf.is_empty() { "> " } else { ">> " };

        match rl.readline(prompt) {
            Ok(line) => {
                if buf.is_empty() {
                    if line == "exit" || line == ".exit" {
                        break;
                    }
                    if !line.trim().is_empty() {
                        let _ = rl.add_history_entry(line.as_str());
                    }
                } else {
                    buf.push('\n');
                }
                buf.push_str(&line);

                match load_line(&mut ls, &buf) {
                    Ok(()) => {
                        buf.clear();
                        if let Err(e) = eval(&mut ls) {
                            eprintln!("{e}");
                        }
                    }
                    Err(e) if is_incomplete(&e) => continue,
                    Err(e) => {
                        eprintln!("{e}");
                        buf.clear();
                    }
                }
                // a failed call may leave its arguments behind
                ls.set_top(0);
            }

            // Ctrl-D
            Err(ReadlineError::Eof) => {
                if !buf.is_empty() {
                    eprintln!("<incomplete input>");
                }
                println!();
                break;
            }

            // Ctrl-C cancels the pending buffer
            Err(ReadlineError::Interrupted) => buf.clear(),

            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Pull `--max-depth N` out of `args`, returning the remaining arguments.
fn take_config(args: Vec<String>) -> Result<(Vec<String>, Config), CliError> {
    let mut config = Config::default();
    let mut rest = Vec::with_capacity(args.len());
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        if arg == "--max-depth" {
            let n = it.next().ok_or_else(|| CliError::Usage(USAGE.into()))?;
            config.max_call_depth = n
                .parse()
                .map_err(|_| CliError::Usage(format!("--max-depth expects a number, got '{n}'")))?;
        } else {
            rest.push(arg);
        }
    }
    Ok((rest, config))
}

fn run(args: Vec<String>) -> Result<(), CliError> {
    let (args, config) = take_config(args)?;
    debug!(?config, "starting");
    match args.as_slice() {
        [_] => repl(config),
        [_, flag, path] if flag == "--compile" || flag == "-c" => compile_listing(path),
        [_, flag, src, out] if flag == "--dump" || flag == "-d" => dump_bytecode(src, Some(out)),
        [_, flag, src] if flag == "--dump" || flag == "-d" => dump_bytecode(src, None),
        [_, path] => run_file(path, config),
        _ => Err(CliError::Usage(USAGE.into())),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match run(std::env::args().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn max_depth_is_extracted() {
        let (rest, config) = take_config(args(&["lua", "--max-depth", "50", "x.lua"])).unwrap();
        assert_eq!(rest, args(&["lua", "x.lua"]));
        assert_eq!(config.max_call_depth, 50);
        assert!(take_config(args(&["lua", "--max-depth"])).is_err());
        assert!(take_config(args(&["lua", "--max-depth", "many"])).is_err());
    }

    #[test]
    fn incomplete_input_is_detected() {
        let err = lua_compiler::compile("if x then", "=stdin").unwrap_err();
        assert!(is_incomplete(&err));
        let err = lua_compiler::compile("x = = 1", "=stdin").unwrap_err();
        assert!(!is_incomplete(&err));
    }

    #[test]
    fn lines_persist_through_globals() {
        let mut ls = new_state(Config::default()).unwrap();
        load_line(&mut ls, "local n = 20").unwrap();
        ls.call(0, 0).unwrap();
        load_line(&mut ls, "n + 1").unwrap();
        ls.call(0, LUA_MULTRET).unwrap();
        assert_eq!(ls.to_integer(-1), 21);
    }

    #[test]
    fn hoisting_only_touches_a_leading_local() {
        assert_eq!(hoist_locals("local function f() end"), "function f() end");
        assert_eq!(hoist_locals("x = 1"), "x = 1");
        assert_eq!(hoist_locals("local x = 1; local y = 2"), "x = 1; local y = 2");
    }
}
