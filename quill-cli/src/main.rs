use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use quill_core::span::LineMap;
use quill_core::{compile_source, compile_to_class, ScanConfig};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Source file or directory; stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    #[arg(short, long)]
    output: PathBuf,

    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "class",
        help = "Output format: tokens, ast, class"
    )]
    emit: String,

    #[arg(
        long,
        value_name = "SPACES",
        default_value_t = 4,
        help = "Spaces per indentation level"
    )]
    indent_unit: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    execute(cli)
}

fn execute(cli: Cli) -> Result<()> {
    let config = ScanConfig::new(cli.indent_unit);

    match &cli.input {
        Some(path) if path.is_dir() => compile_directory(path, &cli, &config),
        Some(path) => {
            let source = fs::read_to_string(path)
                .with_context(|| format!("failed to read input file {}", path.display()))?;
            compile_one(path, &source, &cli.output, &cli, &config)
        }
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            compile_one(Path::new("<stdin>"), &buffer, &cli.output, &cli, &config)
        }
    }
}

/// Compiles every `.ql` file under `root`, mirroring the directory
/// layout into the output directory.
fn compile_directory(root: &Path, cli: &Cli, config: &ScanConfig) -> Result<()> {
    let mut failures = 0usize;
    let mut seen = 0usize;
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("ql") {
            continue;
        }
        seen += 1;
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?;
        let relative = path.strip_prefix(root).unwrap_or(path);
        let output = cli
            .output
            .join(relative)
            .with_extension(output_extension(&cli.emit));
        if let Err(err) = compile_one(path, &source, &output, cli, config) {
            eprintln!("{}: {err:#}", path.display());
            failures += 1;
        }
    }
    if seen == 0 {
        bail!("no .ql files found under {}", root.display());
    }
    if failures > 0 {
        bail!("{failures} of {seen} file(s) failed to compile");
    }
    Ok(())
}

fn compile_one(
    path: &Path,
    source: &str,
    output: &Path,
    cli: &Cli,
    config: &ScanConfig,
) -> Result<()> {
    match cli.emit.as_str() {
        "tokens" => {
            let artifact = compile_source(source, config)
                .with_context(|| format!("failed to scan {}", path.display()))?;
            report_diagnostics(path, source, &artifact.diagnostics, config);
            write_output(output, artifact.tree.dump().as_bytes())?;
            if artifact.has_errors() {
                bail!("scanning/parsing reported errors");
            }
        }
        "ast" => {
            let artifact = compile_source(source, config)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            report_diagnostics(path, source, &artifact.diagnostics, config);
            let rendered = format!("{:#?}\n", artifact.statements);
            write_output(output, rendered.as_bytes())?;
            if artifact.has_errors() {
                bail!("scanning/parsing reported errors");
            }
        }
        "class" => {
            let class_name = class_name_for(path);
            // rerun the frontend only to surface spans when it fails
            match compile_to_class(&class_name, source, config) {
                Ok((classes, diagnostics)) => {
                    report_diagnostics(path, source, &diagnostics, config);
                    let mut classes = classes.into_iter();
                    let (_, bytes) = classes
                        .next()
                        .context("pipeline produced no class output")?;
                    write_output(output, &bytes)?;
                }
                Err(err) => {
                    if let Ok(artifact) = compile_source(source, config) {
                        report_diagnostics(path, source, &artifact.diagnostics, config);
                    }
                    return Err(err)
                        .with_context(|| format!("failed to compile {}", path.display()));
                }
            }
        }
        other => bail!("unsupported emit format: {other}"),
    }
    Ok(())
}

fn output_extension(emit: &str) -> &'static str {
    match emit {
        "tokens" => "tokens.txt",
        "ast" => "ast.txt",
        _ => "class",
    }
}

/// Internal class name derived from the file stem; characters the
/// format disallows are folded to underscores.
fn class_name_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("Main");
    let mut name = String::with_capacity(stem.len());
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            name.push(ch);
        } else {
            name.push('_');
        }
    }
    if name.is_empty() || name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn report_diagnostics(
    path: &Path,
    source: &str,
    diagnostics: &[quill_core::diagnostic::Diagnostic],
    config: &ScanConfig,
) {
    if diagnostics.is_empty() {
        return;
    }
    let lines = LineMap::new(source, config.line_base, config.column_base);
    for diagnostic in diagnostics {
        let at = lines.locate(diagnostic.span.start);
        let severity = match diagnostic.severity {
            quill_core::diagnostic::Severity::Error => "error",
            quill_core::diagnostic::Severity::Note => "note",
        };
        match diagnostic.code {
            Some(code) => eprintln!(
                "{}:{}:{}: {severity}[{code}]: {}",
                path.display(),
                at.line,
                at.column,
                diagnostic.message
            ),
            None => eprintln!(
                "{}:{}:{}: {severity}: {}",
                path.display(),
                at.line,
                at.column,
                diagnostic.message
            ),
        }
    }
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn compiles_arithmetic_to_a_class_file() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("calc.ql");
        fs::write(&input_path, "val x = 1 + 2\nreturn x\n").expect("write input");
        let output_path = dir.path().join("calc.class");

        Command::cargo_bin("quill-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .assert()
            .success();

        let bytes = fs::read(&output_path).expect("read class");
        assert_eq!(&bytes[0..4], &[0xca, 0xfe, 0xba, 0xbe]);
    }

    #[test]
    fn reads_from_stdin_when_no_input_is_given() {
        let dir = tempdir().expect("tempdir");
        let output_path = dir.path().join("out.class");

        Command::cargo_bin("quill-cli")
            .expect("binary exists")
            .arg("--output")
            .arg(&output_path)
            .write_stdin("val x = 7\nreturn x\n")
            .assert()
            .success();

        assert!(output_path.exists(), "class output was not created");
    }

    #[test]
    fn emits_the_token_tree() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("calc.ql");
        fs::write(&input_path, "val x = 1\n").expect("write input");
        let output_path = dir.path().join("calc.tokens.txt");

        Command::cargo_bin("quill-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .arg("--emit")
            .arg("tokens")
            .assert()
            .success();

        let dump = fs::read_to_string(&output_path).expect("read dump");
        assert!(!dump.is_empty());
    }

    #[test]
    fn emits_the_syntax_tree() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("calc.ql");
        fs::write(&input_path, "val x = 1 + 2\n").expect("write input");
        let output_path = dir.path().join("calc.ast.txt");

        Command::cargo_bin("quill-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .arg("--emit")
            .arg("ast")
            .assert()
            .success();

        let rendered = fs::read_to_string(&output_path).expect("read ast");
        assert!(rendered.contains("VarDef"));
    }

    #[test]
    fn compiles_every_ql_file_in_a_directory() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).expect("create dirs");
        fs::write(src.join("a.ql"), "val x = 1\nreturn x\n").expect("write a");
        fs::write(src.join("nested/b.ql"), "val y = 2\nreturn y\n").expect("write b");
        fs::write(src.join("ignored.txt"), "not a source file").expect("write other");
        let out = dir.path().join("out");

        Command::cargo_bin("quill-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&src)
            .arg("--output")
            .arg(&out)
            .assert()
            .success();

        assert!(out.join("a.class").exists());
        assert!(out.join("nested/b.class").exists());
        assert!(!out.join("ignored.class").exists());
    }

    #[test]
    fn reports_diagnostics_with_line_and_column() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("bad.ql");
        fs::write(&input_path, "val x = * 2\n").expect("write input");
        let output_path = dir.path().join("bad.class");

        Command::cargo_bin("quill-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("bad.ql:1:"))
            .stderr(predicate::str::contains("error"));
    }

    #[test]
    fn honors_a_custom_indent_unit() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("two.ql");
        fs::write(&input_path, "if 1\n  pass\n").expect("write input");
        let output_path = dir.path().join("two.ast.txt");

        Command::cargo_bin("quill-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .arg("--emit")
            .arg("ast")
            .arg("--indent-unit")
            .arg("2")
            .assert()
            .success();
    }

    #[test]
    fn rejects_an_unknown_emit_format() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("calc.ql");
        fs::write(&input_path, "val x = 1\n").expect("write input");

        Command::cargo_bin("quill-cli")
            .expect("binary exists")
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(dir.path().join("out.bin"))
            .arg("--emit")
            .arg("jar")
            .assert()
            .failure()
            .stderr(predicate::str::contains("unsupported emit format"));
    }

    #[test]
    fn class_names_fold_awkward_stems() {
        assert_eq!(class_name_for(Path::new("dir/my-file.ql")), "my_file");
        assert_eq!(class_name_for(Path::new("2fast.ql")), "_2fast");
        assert_eq!(class_name_for(Path::new("<stdin>")), "_stdin_");
    }
}
