use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

// Directories holding the crate's own Rust sources.
const SCANNED_ROOTS: [&str; 2] = ["src", "tests"];

// Which part of a matched line a lint cares about.
#[derive(Clone, Copy)]
enum Scope {
    Code,
    Comment,
    NonDocComment,
}

struct Lint {
    name: &'static str,
    pattern: &'static str,
    scope: Scope,
    advice: &'static str,
    accept: fn(&str) -> bool,
}

// Collects every offending line of one file for one lint.
struct LintCollector<'a> {
    lint: &'a Lint,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl<'a> LintCollector<'a> {
    fn new(lint: &'a Lint, file_path: &Path) -> Self {
        Self {
            lint,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.lint.name,
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.lint.advice));
        Some(error_msg)
    }
}

impl Sink for LintCollector<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        let trimmed = line_text.trim_start();
        let is_comment = trimmed.starts_with("//");
        let is_doc = trimmed.starts_with("///") || trimmed.starts_with("//!");

        let relevant = match self.lint.scope {
            Scope::Code => !is_comment,
            Scope::Comment => is_comment,
            Scope::NonDocComment => is_comment && !is_doc,
        };
        if relevant && (self.lint.accept)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_word_byte(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_')
}

fn contains_underscore_ident(text: &str) -> bool {
    let bytes = text.as_bytes();
    (0..bytes.len()).any(|i| {
        bytes[i] == b'_'
            && (i == 0 || !is_word_byte(bytes[i - 1]))
            && i + 1 < bytes.len()
            && is_word_byte(bytes[i + 1])
    })
}

// Only the code outside string literals counts.
fn has_underscore_ident_outside_strings(line_text: &str) -> bool {
    line_text
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 0 && contains_underscore_ident(part))
}

fn comment_text(line_text: &str) -> &str {
    let trimmed = line_text.trim_start();
    trimmed.trim_start_matches('/').trim_start_matches('!').trim()
}

fn is_dash_heavy(line_text: &str) -> bool {
    let chars: Vec<char> = comment_text(line_text)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if chars.is_empty() {
        return false;
    }
    let dashes = chars.iter().filter(|c| **c == '-').count();
    dashes as f64 / chars.len() as f64 > 0.8
}

fn is_shouting(line_text: &str) -> bool {
    let text = comment_text(line_text);
    let alpha_count = text.chars().filter(|c| c.is_alphabetic()).count();
    let non_whitespace_count = text.chars().filter(|c| !c.is_whitespace()).count();
    if alpha_count < 6 || (alpha_count as f64) < 0.6 * non_whitespace_count as f64 {
        return false;
    }
    // Single capitals such as variable names do not count.
    let uppercase_count: usize = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| word.chars().count() > 1)
        .map(|word| word.chars().filter(|c| c.is_uppercase()).count())
        .sum();
    uppercase_count as f64 / alpha_count as f64 > 0.8
}

fn always(_: &str) -> bool {
    true
}

fn lints() -> Vec<Lint> {
    vec![
        Lint {
            name: "underscore-prefixed bindings",
            pattern: r"\b_[A-Za-z0-9]",
            scope: Scope::Code,
            advice: "Use the binding (dropping the underscore) or remove it.",
            accept: has_underscore_ident_outside_strings,
        },
        Lint {
            name: "discarded `let _ =` bindings",
            pattern: r"let\s+_\s*=",
            scope: Scope::Code,
            advice: "Handle the value instead of discarding it.",
            accept: always,
        },
        Lint {
            name: "#[allow(dead_code)] attributes",
            pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
            scope: Scope::Code,
            advice: "Delete unused code instead of silencing the warning.",
            accept: always,
        },
        Lint {
            name: "ignored tests",
            pattern: r"#\s*\[\s*ignore",
            scope: Scope::Code,
            advice: "Fix or delete the test; ignored tests are not allowed.",
            accept: always,
        },
        Lint {
            name: "changelog-style comments",
            pattern: r"//.*(?:CRITICAL|FIXED|CORRECTED|FIX|NEW|CHANGED|CHANGE|MODIFIED|UPDATED|UPDATE)",
            scope: Scope::Comment,
            advice: "Comments describe the code as it is, not its history.",
            accept: always,
        },
        Lint {
            name: "emphasis markers in comments",
            pattern: r"//.*\*\*",
            scope: Scope::NonDocComment,
            advice: "Plain comments do not use ** emphasis.",
            accept: always,
        },
        Lint {
            name: "shouting comments",
            pattern: r"//.*",
            scope: Scope::Comment,
            advice: "Write comments in sentence case.",
            accept: is_shouting,
        },
        Lint {
            name: "dash-heavy comments",
            pattern: r"//.*-",
            scope: Scope::Comment,
            advice: "Comments composed mostly of dashes are not allowed.",
            accept: is_dash_heavy,
        },
    ]
}

fn warnings_enabled() -> bool {
    static ENABLE_WARNINGS: OnceLock<bool> = OnceLock::new();
    *ENABLE_WARNINGS.get_or_init(|| match std::env::var("BUILD_VERBOSE") {
        Ok(value) => {
            let normalized = value.trim();
            normalized.eq_ignore_ascii_case("true")
                || normalized.eq_ignore_ascii_case("yes")
                || normalized == "1"
        }
        Err(_) => false,
    })
}

fn emit_stage_detail(detail: &str) {
    if warnings_enabled() {
        println!("cargo:warning=elastic_sqp build detail: {detail}");
        if let Err(e) = io::stdout().flush() {
            eprintln!("failed to flush build output: {e}");
        }
    }
}

fn rust_sources() -> Vec<PathBuf> {
    SCANNED_ROOTS
        .iter()
        .flat_map(|root| {
            WalkDir::new(root)
                .into_iter()
                .filter_map(|e: Result<walkdir::DirEntry, walkdir::Error>| e.ok())
                .filter(|e: &walkdir::DirEntry| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e: walkdir::DirEntry| e.into_path())
        })
        .collect()
}

fn scan(lint: &Lint, sources: &[PathBuf]) -> Vec<String> {
    let matcher = match RegexMatcher::new_line_matcher(lint.pattern) {
        Ok(matcher) => matcher,
        Err(e) => return vec![format!("Error creating {} regex: {}", lint.name, e)],
    };
    let mut searcher = Searcher::new();
    let mut violations = Vec::new();
    for path in sources {
        let mut collector = LintCollector::new(lint, path);
        if searcher.search_path(&matcher, path, &mut collector).is_err() {
            continue;
        }
        if let Some(error_message) = collector.check_and_get_error_message() {
            violations.push(error_message);
        }
    }
    violations
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SCANNED_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    if std::env::var("ELASTIC_SQP_SKIP_LINT_CHECKS").is_ok() || std::env::var("DOCS_RS").is_ok()
    {
        emit_stage_detail("skipping lint checks");
        return;
    }

    let sources = rust_sources();
    let mut all_violations = Vec::new();
    for lint in lints() {
        let found = scan(&lint, &sources);
        emit_stage_detail(&format!(
            "{} scan identified {} violation groups",
            lint.name,
            found.len()
        ));
        all_violations.extend(found);
    }

    if !all_violations.is_empty() {
        eprintln!("\n❌ VALIDATION ERRORS");
        eprintln!("====================");
        let violation_count = all_violations.len();
        for violation in all_violations {
            eprintln!("{violation}");
            eprintln!("--------------------");
        }
        eprintln!(
            "\n⚠️ Found {} total code quality violations. Fix all issues before committing.",
            violation_count
        );
        std::process::exit(1);
    }
    emit_stage_detail("validation checks completed without errors");
}
