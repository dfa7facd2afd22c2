use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding this crate's Rust sources. Everything else under the
// root (build output, vendored reference material) is left alone.
const SOURCE_DIRS: [&str; 7] = [
    "inference",
    "cluster",
    "solver",
    "scenario",
    "src",
    "tests",
    "benches",
];

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

/// One code-policy check: a line regex plus a filter that decides whether a
/// matching line really violates the policy.
struct Rule {
    description: &'static str,
    pattern: String,
    violates: fn(&str) -> bool,
    advice: &'static str,
}

fn rules() -> Vec<Rule> {
    vec![
        Rule {
            description: "underscore-prefixed variables",
            pattern: r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            violates: underscore_outside_comment_or_string,
            advice: "Either use the variable (removing the underscore) or remove it completely.",
        },
        Rule {
            description: "forbidden comment words",
            pattern: format!(r"(//|/\*|///).*(?:{})", FORBIDDEN_WORDS.join("|")),
            violates: |_| true,
            advice: "Comments must describe the code as it is, not its history. Remove them completely.",
        },
        Rule {
            description: "'**' in plain comments",
            pattern: r"(//|/\*).*\*\*".to_string(),
            violates: |line| !line.trim_start().starts_with("///"),
            advice: "The '**' pattern is only allowed in doc comments.",
        },
        Rule {
            description: "all-uppercase comments",
            pattern: r"(//|/\*|///).*".to_string(),
            violates: comment_is_all_uppercase,
            advice: "Comments where all alphabetic characters are uppercase are not allowed.",
        },
        Rule {
            description: "#[allow(dead_code)] attributes",
            pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
            violates: |_| true,
            advice: "Either use the code (removing the attribute) or remove it completely.",
        },
    ]
}

fn underscore_outside_comment_or_string(line: &str) -> bool {
    let is_comment = line.trim_start().starts_with("//")
        || (line.contains("/*") && !line.contains("*/match") && !line.contains("*/let"));
    // Odd-numbered pieces of a split on quotes lie inside string literals.
    let in_string = line
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'));
    !is_comment && !in_string
}

fn comment_is_all_uppercase(line: &str) -> bool {
    let trimmed = line.trim_start();
    let comment = if let Some(rest) = trimmed.strip_prefix("///") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        rest
    } else if let Some(start) = line.find("/*") {
        let rest = &line[start + 2..];
        rest.find("*/").map_or(rest, |end| &rest[..end])
    } else {
        return false;
    };
    let mut letters = comment.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(char::is_uppercase)
}

// Collects the offending lines of one file for one rule.
struct RuleCollector<'r> {
    rule: &'r Rule,
    violations: Vec<String>,
}

impl Sink for RuleCollector<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.rule.violates)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

impl RuleCollector<'_> {
    fn error_message(&self, path: &Path) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut message = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.description,
            path.display()
        );
        for violation in &self.violations {
            message.push_str(&format!("   {violation}\n"));
        }
        message.push_str(&format!("\n⚠️ {}\n", self.rule.advice));
        Some(message)
    }
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| {
            WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e| e.into_path())
        })
        .collect()
}

fn enforce_code_policy() -> Result<(), Box<dyn Error>> {
    let sources = rust_sources();
    let mut searcher = Searcher::new();
    for rule in &rules() {
        let matcher = RegexMatcher::new_line_matcher(&rule.pattern)?;
        for path in &sources {
            let mut collector = RuleCollector {
                rule,
                violations: Vec::new(),
            };
            searcher.search_path(&matcher, path, &mut collector)?;
            if let Some(message) = collector.error_message(path) {
                return Err(message.into());
            }
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    // The message has to reach cargo's output before the build fails.
    if let Err(e) = enforce_code_policy() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
