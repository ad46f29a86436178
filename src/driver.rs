//! Output file handling and the external toolchain step.
//!
//! The compiler proper stops at assembly text; turning it into a runnable
//! binary is delegated to `gcc`, which assembles the `.s` file and links it
//! against the precompiled runtime providing `Lread` and `Lwrite`.

use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{CompileResult, IoSnafu, ToolchainSnafu};

/// Directory holding the precompiled runtime object, from `LAMA_RUNTIME`.
pub fn runtime_dir() -> PathBuf {
  std::env::var_os("LAMA_RUNTIME")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("../runtime"))
}

/// The output paths derived from a source file: the executable and the
/// assembly file next to it.
pub fn output_paths(source_path: &Path) -> (PathBuf, PathBuf) {
  let base = source_path.with_extension("");
  let asm = base.with_extension("s");
  (base, asm)
}

/// Write `<base>.s` and link it against the runtime into `<base>`.
/// Returns the exit code of the toolchain, which becomes ours.
pub fn build(source_path: &Path, asm: &str) -> CompileResult<i32> {
  let (base, asm_path) = output_paths(source_path);
  std::fs::write(&asm_path, asm).context(IoSnafu {
    path: asm_path.clone(),
  })?;

  let runtime = runtime_dir().join("runtime.o");
  log::debug!(
    "linking: gcc -g -m32 -o {} {} {}",
    base.display(),
    runtime.display(),
    asm_path.display()
  );
  let status = Command::new("gcc")
    .arg("-g")
    .arg("-m32")
    .arg("-o")
    .arg(&base)
    .arg(&runtime)
    .arg(&asm_path)
    .status()
    .context(ToolchainSnafu { tool: "gcc" })?;
  Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn output_paths_strip_the_source_extension() {
    let (base, asm) = output_paths(Path::new("tests/fact.expr"));
    assert_eq!(base, PathBuf::from("tests/fact"));
    assert_eq!(asm, PathBuf::from("tests/fact.s"));
  }

  #[test]
  fn runtime_dir_honours_the_environment() {
    std::env::set_var("LAMA_RUNTIME", "/opt/lama/runtime");
    assert_eq!(runtime_dir(), PathBuf::from("/opt/lama/runtime"));
    std::env::remove_var("LAMA_RUNTIME");
    assert_eq!(runtime_dir(), PathBuf::from("../runtime"));
  }
}
