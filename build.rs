use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const FORBIDDEN_TOKENS: [&str; 5] = ["process::exit", "println!", "eprintln!", "print!(", "dbg!("];
const BINARY_ENTRYPOINT: &str = "src/main.rs";

fn main() {
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    let build_ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=CPUE_BUILD_TIMESTAMP={build_ts}");

    enforce_library_boundary();
}

fn rust_sources(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for path in entries.flatten().map(|e| e.path()) {
        if path.is_dir() {
            rust_sources(&path, out);
        } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

/// The part of a source line outside `//` comments (doc comments included).
/// Block comments are not tracked; the crate does not use them.
fn code_portion(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            _ if escaped => escaped = false,
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'/' if !in_string && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn enforce_library_boundary() {
    // Library modules report through Result and the log facade; only the
    // binary entrypoint may print or exit.
    let mut sources = Vec::new();
    rust_sources(Path::new("src"), &mut sources);

    let mut violations = Vec::new();
    for path in sources {
        let rel = path.to_string_lossy().replace('\\', "/");
        if rel == BINARY_ENTRYPOINT {
            continue;
        }
        let Ok(src) = fs::read_to_string(&path) else {
            continue;
        };
        for (line_no, line) in src.lines().enumerate() {
            let code = code_portion(line);
            for token in FORBIDDEN_TOKENS.iter().filter(|t| code.contains(**t)) {
                violations.push(format!("{rel}:{} calls '{token}'", line_no + 1));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nerror: cpue-index library modules must not print or exit:");
        for v in &violations {
            eprintln!("  - {v}");
        }
        panic!("{} library boundary violation(s)", violations.len());
    }
}
