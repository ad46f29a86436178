use std::env;
use std::io::Read;
use std::path::Path;
use std::process;

fn main() {
  let args: Vec<String> = env::args().collect();
  let (mode, file) = match args.len() {
    2 if !args[1].starts_with('-') => (None, args[1].as_str()),
    3 if args[1] == "-i" || args[1] == "-s" => (Some(args[1].as_str()), args[2].as_str()),
    _ => {
      let program = args.first().map(String::as_str).unwrap_or("lamac");
      eprintln!("usage: {program} [-i | -s] <file>");
      process::exit(1);
    }
  };

  match run(mode, file) {
    Ok(code) => process::exit(code),
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  }
}

fn run(mode: Option<&str>, file: &str) -> lamac::CompileResult<i32> {
  let source = std::fs::read_to_string(file).map_err(|source| lamac::CompileError::Io {
    path: file.into(),
    source,
  })?;

  match mode {
    Some("-i") => {
      let program = lamac::parse_program(&source)?;
      print_outputs(&lamac::interp::eval_program(&program, &read_numbers())?);
      Ok(0)
    }
    Some("-s") => {
      let program = lamac::compile_sm(&source)?;
      print_outputs(&lamac::interp::run_sm(&program, &read_numbers())?);
      Ok(0)
    }
    _ => {
      let asm = lamac::generate_assembly(&source)?;
      lamac::driver::build(Path::new(file), &asm)
    }
  }
}

/// Whitespace-separated numbers from stdin feed the interpreters' `read`.
fn read_numbers() -> Vec<i64> {
  let mut text = String::new();
  let _ = std::io::stdin().read_to_string(&mut text);
  text
    .split_whitespace()
    .filter_map(|word| word.parse().ok())
    .collect()
}

fn print_outputs(values: &[i64]) {
  for value in values {
    println!("{value}");
  }
}
