// Source hygiene checks for the crate's own Rust files.
use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Only the crate's own sources are checked; vendored or sibling trees are not.
const SOURCE_DIRS: [&str; 4] = ["density", "cli", "tests", "benches"];

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

/// Which rule a collector enforces.
#[derive(Clone, Copy, PartialEq)]
enum Rule {
    UnderscoreBinding,
    ForbiddenWord,
    StarsInComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> String {
        match self {
            Rule::UnderscoreBinding => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenWord => format!(r"(//|/\*|///).*(?:{})", FORBIDDEN_WORDS.join("|")),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::UppercaseComment => r"(//|/\*|///).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn explanation(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => {
                "Underscore-prefixed names are not allowed. Use the binding or remove it."
            }
            Rule::ForbiddenWord => {
                "Comments must not narrate edits (FIX, NEW, CHANGE, UPDATE and similar markers)."
            }
            Rule::StarsInComment => "The '**' pattern is only allowed in doc comments.",
            Rule::UppercaseComment => "Comments written entirely in uppercase are not allowed.",
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] is not allowed. Use the code or remove it."
            }
        }
    }
}

struct ViolationCollector {
    rule: Rule,
    violations: Vec<String>,
}

impl ViolationCollector {
    fn new(rule: Rule) -> Self {
        Self {
            rule,
            violations: Vec::new(),
        }
    }

    fn accepts(&self, line_text: &str) -> bool {
        let trimmed = line_text.trim_start();
        let is_doc_comment = trimmed.starts_with("///") || trimmed.starts_with("//!");
        match self.rule {
            Rule::UnderscoreBinding => {
                if trimmed.starts_with("//") || line_text.contains("/*") {
                    return false;
                }
                // Matches that only occur inside string literals are fine.
                !line_text
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'))
            }
            Rule::ForbiddenWord | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !is_doc_comment,
            Rule::UppercaseComment => {
                let Some(comment) = comment_text(line_text) else {
                    return false;
                };
                let letters: Vec<char> = comment.chars().filter(|c| c.is_alphabetic()).collect();
                !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
            }
        }
    }

    fn error_message(&self, path: &Path) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut message = format!(
            "\n❌ ERROR: Found {} source hygiene violations in {}:\n",
            self.violations.len(),
            path.display()
        );
        for violation in &self.violations {
            message.push_str(&format!("   {violation}\n"));
        }
        message.push_str(&format!("\n⚠️ {}\n", self.rule.explanation()));
        Some(message)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.accepts(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn comment_text(line_text: &str) -> Option<&str> {
    let trimmed = line_text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///").or_else(|| trimmed.strip_prefix("//!")) {
        return Some(rest.trim());
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(rest.trim());
    }
    let start = line_text.find("/*")? + 2;
    let body = &line_text[start..];
    Some(match body.find("*/") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    })
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .filter(|dir| Path::new(dir).is_dir())
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn scan(rule: Rule, sources: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();
    for path in sources {
        let mut collector = ViolationCollector::new(rule);
        searcher.search_path(&matcher, path, &mut collector)?;
        if let Some(message) = collector.error_message(path) {
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let sources = rust_sources();
    let rules = [
        Rule::UnderscoreBinding,
        Rule::ForbiddenWord,
        Rule::StarsInComment,
        Rule::UppercaseComment,
        Rule::AllowDeadCode,
    ];
    for rule in rules {
        if let Err(e) = scan(rule, &sources) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
