//! Gradle build scripts, Groovy and Kotlin DSL.
//!
//! Scanning is line based. A small block tracker records which `{}` blocks
//! enclose each line so `constraints {}` entries and `ext {}` variables can be
//! told apart from ordinary declarations.

use regex::Regex;
use std::sync::OnceLock;

use super::{indent_unit, leading_whitespace, line_ending, static_regex};
use crate::model::ManifestFormat;
use crate::remediate::traits::{
    splice, ConstraintRequest, Declaration, DeclarationKind, ManifestMutator, MutationError,
    ParseError, ValidationReport,
};
use crate::version;

pub struct GradleMutator;

/// Words that look like configurations but never introduce a dependency.
const NON_CONFIGURATIONS: [&str; 7] = ["id", "version", "group", "apply", "from", "name", "url"];

const TOP_LEVEL_SECTIONS: [&str; 6] = [
    "dependencies",
    "plugins",
    "buildscript",
    "allprojects",
    "subprojects",
    "repositories",
];

static STRING_DEP: OnceLock<Regex> = OnceLock::new();
static MAP_DEP: OnceLock<Regex> = OnceLock::new();
static PLUGIN: OnceLock<Regex> = OnceLock::new();
static KOTLIN_PLUGIN: OnceLock<Regex> = OnceLock::new();
static VAR_ASSIGN: OnceLock<Regex> = OnceLock::new();
static VAR_SET: OnceLock<Regex> = OnceLock::new();
static VAR_EXTRA: OnceLock<Regex> = OnceLock::new();
static VAR_BY_EXTRA: OnceLock<Regex> = OnceLock::new();

fn string_dep() -> &'static Regex {
    static_regex(
        &STRING_DEP,
        r#"^\s*(?P<conf>[A-Za-z_]\w*)\s*(?:\(\s*)?(?:(?:platform|enforcedPlatform)\s*\(\s*)?(?P<lit>['"](?P<group>[^:'"\s]+):(?P<artifact>[^:'"\s]+)(?::(?P<version>[^:'"@\s]*))?(?:[:@][^'"]*)?['"])"#,
    )
}

fn map_dep() -> &'static Regex {
    static_regex(
        &MAP_DEP,
        r#"^\s*(?P<conf>[A-Za-z_]\w*)\s*\(?\s*group\s*[:=]\s*['"](?P<group>[^'"]+)['"]\s*,\s*name\s*[:=]\s*['"](?P<artifact>[^'"]+)['"](?:\s*,\s*version\s*[:=]\s*(?:(?P<vlit>['"](?P<version>[^'"]+)['"])|(?P<ident>[A-Za-z_][\w.]*)))?"#,
    )
}

fn plugin() -> &'static Regex {
    static_regex(
        &PLUGIN,
        r#"^\s*id\s*\(?\s*['"](?P<id>[^'"]+)['"]\s*\)?\s*version\s*\(?\s*(?:(?P<vlit>['"](?P<version>[^'"]+)['"])|(?P<ident>[A-Za-z_][\w.]*))"#,
    )
}

fn kotlin_plugin() -> &'static Regex {
    static_regex(
        &KOTLIN_PLUGIN,
        r#"^\s*kotlin\s*\(\s*"(?P<id>[^"]+)"\s*\)\s*version\s*(?P<vlit>"(?P<version>[^"]+)")"#,
    )
}

fn variable_patterns() -> [&'static Regex; 4] {
    [
        static_regex(
            &VAR_ASSIGN,
            r#"^\s*(?P<prefix>(?:(?:rootProject\.|project\.)?ext\.)|def\s+|val\s+|var\s+|(?:final\s+)?String\s+)?(?P<name>[A-Za-z_]\w*)(?:\s*:\s*String)?\s*=\s*(?P<lit>['"](?P<value>[^'"$]*)['"])\s*;?\s*$"#,
        ),
        static_regex(
            &VAR_SET,
            r#"^\s*(?P<prefix>(?:(?:rootProject\.|project\.)?(?:ext|extra)\.)?set)\s*\(\s*['"](?P<name>[^'"]+)['"]\s*,\s*(?P<lit>['"](?P<value>[^'"$]*)['"])\s*\)"#,
        ),
        static_regex(
            &VAR_EXTRA,
            r#"^\s*(?P<prefix>extra)\s*\[\s*"(?P<name>[^"]+)"\s*\]\s*=\s*(?P<lit>"(?P<value>[^"$]*)")"#,
        ),
        static_regex(
            &VAR_BY_EXTRA,
            r#"^\s*(?P<prefix>val)\s+(?P<name>[A-Za-z_]\w*)\s+by\s+extra\s*\(\s*(?P<lit>"(?P<value>[^"$]*)")\s*\)"#,
        ),
    ]
}

// ============================================================================
// Scanner
// ============================================================================

struct ScannedLine<'a> {
    /// Byte offset of the first character of the line
    offset: usize,
    /// Byte offset just past the line terminator
    end: usize,
    number: usize,
    text: &'a str,
    /// `text` with comments blanked out, same byte length
    code: String,
    /// Enclosing blocks at the start of the line, outermost first
    blocks: Vec<String>,
    /// Blocks opened on this line
    opened: Vec<String>,
}

impl ScannedLine<'_> {
    fn opens(&self, name: &str) -> bool {
        self.opened.iter().any(|opened| opened == name)
    }

    fn within(&self, name: &str) -> bool {
        self.blocks.iter().any(|block| block == name)
    }
}

fn scan(content: &str) -> Vec<ScannedLine<'_>> {
    let mut lines = Vec::new();
    let mut in_block_comment = false;
    let mut stack: Vec<String> = Vec::new();
    let mut offset = 0;
    for (idx, raw) in content.split_inclusive('\n').enumerate() {
        let text = raw.trim_end_matches('\n').trim_end_matches('\r');
        let code = mask_comments(text, &mut in_block_comment);
        let blocks = stack.clone();
        let opened = track_blocks(&code, &mut stack);
        lines.push(ScannedLine {
            offset,
            end: offset + raw.len(),
            number: idx + 1,
            text,
            code,
            blocks,
            opened,
        });
        offset += raw.len();
    }
    lines
}

fn blank(out: &mut String, c: char) {
    for _ in 0..c.len_utf8() {
        out.push(' ');
    }
}

fn mask_comments(text: &str, in_block_comment: &mut bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if *in_block_comment {
            if c == '*' && matches!(chars.peek(), Some((_, '/'))) {
                chars.next();
                out.push_str("  ");
                *in_block_comment = false;
            } else {
                blank(&mut out, c);
            }
            continue;
        }
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some((_, escaped)) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                for rest in text[idx..].chars() {
                    blank(&mut out, rest);
                }
                break;
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                out.push_str("  ");
                *in_block_comment = true;
            }
            _ => out.push(c),
        }
    }
    out
}

/// Updates `stack` with the braces on one line of comment-free code and
/// returns the names of the blocks it opened.
fn track_blocks(code: &str, stack: &mut Vec<String>) -> Vec<String> {
    let mut opened = Vec::new();
    let mut quote: Option<char> = None;
    let mut segment_start = 0;
    let mut escaped = false;
    for (idx, c) in code.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '{' => {
                let name: String = code[segment_start..idx]
                    .trim_start()
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                    .collect();
                opened.push(name.clone());
                stack.push(name);
                segment_start = idx + 1;
            }
            '}' => {
                stack.pop();
                segment_start = idx + 1;
            }
            ';' => segment_start = idx + 1,
            _ => {}
        }
    }
    opened
}

// ============================================================================
// Mutator
// ============================================================================

impl ManifestMutator for GradleMutator {
    fn format(&self) -> ManifestFormat {
        ManifestFormat::Gradle
    }

    fn parse(&self, _path: &str, content: &str) -> Result<Vec<Declaration>, ParseError> {
        let mut declarations = Vec::new();
        for line in scan(content) {
            if let Some(decl) = parse_plugin(&line) {
                declarations.push(decl);
            } else if let Some(decl) = parse_dependency(&line) {
                declarations.push(decl);
            } else if let Some(decl) = parse_variable(&line) {
                declarations.push(decl);
            }
        }
        Ok(declarations)
    }

    fn render_version(
        &self,
        declaration: &Declaration,
        version: &str,
    ) -> Result<String, MutationError> {
        // A bare identifier has no quotes of its own.
        if declaration.value_span.is_some() && declaration.value_span == declaration.literal_span {
            Ok(format!("\"{}\"", version))
        } else {
            Ok(version.to_string())
        }
    }

    fn substitute_variable(
        &self,
        _path: &str,
        content: &str,
        declaration: &Declaration,
        variable: &str,
    ) -> Result<String, MutationError> {
        if declaration.kind == DeclarationKind::Plugin {
            return Err(MutationError::Unsupported {
                format: ManifestFormat::Gradle,
                edit: "variable references in plugins blocks",
            });
        }
        let missing = || MutationError::MissingValue {
            name: declaration.name.clone(),
        };
        let literal = declaration.literal_span.clone().ok_or_else(missing)?;
        let value = declaration.value_span.clone().ok_or_else(missing)?;
        let literal_text = content
            .get(literal.clone())
            .ok_or_else(|| MutationError::AnchorNotFound(declaration.name.clone()))?;

        if literal_text.contains(':') {
            // String notation: requote so the reference interpolates.
            let before = &content[literal.start + 1..value.start];
            let after = &content[value.end..literal.end - 1];
            let rewritten = format!("\"{}${{{}}}{}\"", before, variable, after);
            splice(content, literal, &rewritten)
        } else {
            splice(content, literal, variable)
        }
    }

    fn add_constraint(
        &self,
        path: &str,
        content: &str,
        request: &ConstraintRequest,
    ) -> Result<String, MutationError> {
        if !request.name.contains(':') {
            return Err(MutationError::Unsupported {
                format: ManifestFormat::Gradle,
                edit: "constraints on non-coordinate names",
            });
        }
        let kotlin = path.ends_with(".kts");
        let nl = line_ending(content);
        let unit = indent_unit(content, "    ");
        let reason: String = request
            .reason
            .chars()
            .filter(|c| !matches!(c, '\'' | '"' | '\\' | '$'))
            .collect();
        let entry = |indent: &str| {
            if kotlin {
                format!(
                    "{i}implementation(\"{n}:{v}\") {{{nl}{i}{u}because(\"{r}\"){nl}{i}}}{nl}",
                    i = indent,
                    u = unit,
                    n = request.name,
                    v = request.version,
                    r = reason,
                    nl = nl
                )
            } else {
                format!(
                    "{i}implementation('{n}:{v}') {{{nl}{i}{u}because '{r}'{nl}{i}}}{nl}",
                    i = indent,
                    u = unit,
                    n = request.name,
                    v = request.version,
                    r = reason,
                    nl = nl
                )
            }
        };

        let lines = scan(content);
        let insert_after = |line: &ScannedLine<'_>, text: String| {
            let needs_newline = line.end == content.len() && !content.ends_with('\n');
            let text = if needs_newline {
                format!("{}{}", nl, text)
            } else {
                text
            };
            splice(content, line.end..line.end, &text)
        };

        if let Some(line) = lines.iter().find(|line| {
            line.opens("constraints")
                && line.blocks.last().map(String::as_str) == Some("dependencies")
                && !line.within("buildscript")
        }) {
            let indent = format!("{}{}", leading_whitespace(line.text), unit);
            return insert_after(line, entry(&indent));
        }

        if let Some(line) = lines
            .iter()
            .find(|line| line.opens("dependencies") && line.blocks.is_empty())
        {
            let indent = format!("{}{}", leading_whitespace(line.text), unit);
            let inner = format!("{}{}", indent, unit);
            let block = format!(
                "{i}constraints {{{nl}{e}{i}}}{nl}",
                i = indent,
                e = entry(&inner),
                nl = nl
            );
            return insert_after(line, block);
        }

        let mut out = content.to_string();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push_str(nl);
        }
        let inner = format!("{}{}", unit, unit);
        out.push_str(&format!(
            "{nl}dependencies {{{nl}{u}constraints {{{nl}{e}{u}}}{nl}}}{nl}",
            u = unit,
            e = entry(&inner),
            nl = nl
        ));
        Ok(out)
    }

    fn validate(&self, path: &str, content: &str) -> ValidationReport {
        let lines = scan(content);
        let mut messages = bracket_balance(&lines);
        let has_section = lines.iter().any(|line| {
            line.blocks.is_empty()
                && line
                    .opened
                    .iter()
                    .any(|name| TOP_LEVEL_SECTIONS.contains(&name.as_str()))
        });
        if !has_section {
            messages.push(format!(
                "missing top-level section (one of: {})",
                TOP_LEVEL_SECTIONS.join(", ")
            ));
        }
        ValidationReport::from_messages(path, messages)
    }
}

fn bracket_balance(lines: &[ScannedLine<'_>]) -> Vec<String> {
    let mut messages = Vec::new();
    let mut depth = [0i64; 3];
    const PAIRS: [(char, char); 3] = [('{', '}'), ('(', ')'), ('[', ']')];
    for line in lines {
        let mut quote: Option<char> = None;
        let mut escaped = false;
        for c in line.code.chars() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            if c == '\'' || c == '"' {
                quote = Some(c);
                continue;
            }
            for (idx, (open, close)) in PAIRS.iter().enumerate() {
                if c == *open {
                    depth[idx] += 1;
                } else if c == *close {
                    depth[idx] -= 1;
                    if depth[idx] < 0 {
                        messages.push(format!("unexpected '{}' on line {}", close, line.number));
                        depth[idx] = 0;
                    }
                }
            }
        }
    }
    for (idx, (open, _)) in PAIRS.iter().enumerate() {
        if depth[idx] > 0 {
            messages.push(format!("{} unclosed '{}'", depth[idx], open));
        }
    }
    messages
}

fn parse_plugin(line: &ScannedLine<'_>) -> Option<Declaration> {
    if let Some(caps) = plugin().captures(&line.code) {
        let id = caps.name("id")?.as_str().to_string();
        let (value, value_span, literal_span) = if let Some(version) = caps.name("version") {
            let literal = caps.name("vlit")?;
            (
                version.as_str().to_string(),
                line.offset + version.start()..line.offset + version.end(),
                line.offset + literal.start()..line.offset + literal.end(),
            )
        } else {
            let ident = caps.name("ident")?;
            let span = line.offset + ident.start()..line.offset + ident.end();
            (ident.as_str().to_string(), span.clone(), span)
        };
        return Some(Declaration {
            kind: DeclarationKind::Plugin,
            name: id,
            value: Some(value),
            line_number: line.number,
            line: line.text.to_string(),
            value_span: Some(value_span),
            literal_span: Some(literal_span),
        });
    }

    let caps = kotlin_plugin().captures(&line.code)?;
    let id = format!("org.jetbrains.kotlin.{}", caps.name("id")?.as_str());
    let version = caps.name("version")?;
    let literal = caps.name("vlit")?;
    Some(Declaration {
        kind: DeclarationKind::Plugin,
        name: id,
        value: Some(version.as_str().to_string()),
        line_number: line.number,
        line: line.text.to_string(),
        value_span: Some(line.offset + version.start()..line.offset + version.end()),
        literal_span: Some(line.offset + literal.start()..line.offset + literal.end()),
    })
}

fn parse_dependency(line: &ScannedLine<'_>) -> Option<Declaration> {
    let kind = if line.within("constraints") {
        DeclarationKind::Constraint
    } else {
        DeclarationKind::Dependency
    };

    if let Some(caps) = map_dep().captures(&line.code) {
        let conf = caps.name("conf")?.as_str();
        if !NON_CONFIGURATIONS.contains(&conf) {
            let name = format!("{}:{}", caps.name("group")?.as_str(), caps.name("artifact")?.as_str());
            let (value, value_span, literal_span) = match (caps.name("version"), caps.name("ident")) {
                (Some(version), _) => {
                    let literal = caps.name("vlit")?;
                    (
                        Some(version.as_str().to_string()),
                        Some(line.offset + version.start()..line.offset + version.end()),
                        Some(line.offset + literal.start()..line.offset + literal.end()),
                    )
                }
                (None, Some(ident)) => {
                    let span = line.offset + ident.start()..line.offset + ident.end();
                    (Some(ident.as_str().to_string()), Some(span.clone()), Some(span))
                }
                (None, None) => (None, None, None),
            };
            return Some(Declaration {
                kind,
                name,
                value,
                line_number: line.number,
                line: line.text.to_string(),
                value_span,
                literal_span,
            });
        }
    }

    let caps = string_dep().captures(&line.code)?;
    let conf = caps.name("conf")?.as_str();
    if NON_CONFIGURATIONS.contains(&conf) {
        return None;
    }
    let name = format!("{}:{}", caps.name("group")?.as_str(), caps.name("artifact")?.as_str());
    let literal = caps.name("lit")?;
    let version = caps.name("version").filter(|version| !version.as_str().is_empty());
    Some(Declaration {
        kind,
        name,
        value: version.map(|version| version.as_str().to_string()),
        line_number: line.number,
        line: line.text.to_string(),
        value_span: version.map(|version| line.offset + version.start()..line.offset + version.end()),
        literal_span: Some(line.offset + literal.start()..line.offset + literal.end()),
    })
}

fn parse_variable(line: &ScannedLine<'_>) -> Option<Declaration> {
    let in_ext = matches!(line.blocks.last().map(String::as_str), Some("ext") | Some("extra"));
    for pattern in variable_patterns() {
        let Some(caps) = pattern.captures(&line.code) else {
            continue;
        };
        if caps.name("prefix").is_none() && !in_ext {
            continue;
        }
        let value = caps.name("value")?;
        if !version::looks_like_version(value.as_str()) {
            continue;
        }
        let literal = caps.name("lit")?;
        return Some(Declaration {
            kind: DeclarationKind::Variable,
            name: caps.name("name")?.as_str().to_string(),
            value: Some(value.as_str().to_string()),
            line_number: line.number,
            line: line.text.to_string(),
            value_span: Some(line.offset + value.start()..line.offset + value.end()),
            literal_span: Some(line.offset + literal.start()..line.offset + literal.end()),
        });
    }
    None
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const BUILD: &str = r#"plugins {
    id 'org.springframework.boot' version '2.7.0'
    id("io.spring.dependency-management") version "1.0.11.RELEASE"
}

ext {
    springVersion = '5.3.20'
}
ext.nettyVersion = "4.1.77.Final"

dependencies {
    implementation 'com.example:lib:1.2.0' // pinned
    implementation "org.springframework:spring-core:${springVersion}"
    implementation group: 'io.netty', name: 'netty-handler', version: nettyVersion
    testImplementation('junit:junit:4.13.1')
    runtimeOnly 'org.postgresql:postgresql'
}
"#;

    fn parse(content: &str) -> Vec<Declaration> {
        GradleMutator.parse("build.gradle", content).unwrap()
    }

    fn find<'a>(decls: &'a [Declaration], name: &str) -> &'a Declaration {
        decls.iter().find(|d| d.name == name).unwrap()
    }

    #[test]
    fn test_parse_declarations() {
        let decls = parse(BUILD);

        let boot = find(&decls, "org.springframework.boot");
        assert_eq!(boot.kind, DeclarationKind::Plugin);
        assert_eq!(boot.value.as_deref(), Some("2.7.0"));

        let lib = find(&decls, "com.example:lib");
        assert_eq!(lib.kind, DeclarationKind::Dependency);
        assert_eq!(lib.version(), Some("1.2.0"));
        assert_eq!(lib.line_number, 12);

        let core = find(&decls, "org.springframework:spring-core");
        assert_eq!(core.variable_ref(), Some("springVersion"));

        let netty = find(&decls, "io.netty:netty-handler");
        assert_eq!(netty.variable_ref(), Some("nettyVersion"));

        assert_eq!(find(&decls, "springVersion").kind, DeclarationKind::Variable);
        assert_eq!(find(&decls, "nettyVersion").value.as_deref(), Some("4.1.77.Final"));
        assert_eq!(find(&decls, "junit:junit").version(), Some("4.13.1"));
        assert_eq!(find(&decls, "org.postgresql:postgresql").value, None);
    }

    #[test]
    fn test_commented_declarations_are_ignored() {
        let decls = parse("dependencies {\n    // implementation 'a:b:1.0'\n    /* implementation 'c:d:1.0' */\n}\n");
        assert!(decls.is_empty());
    }

    #[test]
    fn test_set_version_preserves_everything_else() {
        let decls = parse(BUILD);
        let lib = find(&decls, "com.example:lib");
        let updated = GradleMutator.set_version(BUILD, lib, "1.5.0").unwrap();

        assert!(updated.contains("implementation 'com.example:lib:1.5.0' // pinned"));
        let reparsed = parse(&updated);
        assert_eq!(find(&reparsed, "com.example:lib").version(), Some("1.5.0"));
        for (before, after) in decls.iter().zip(reparsed.iter()) {
            if before.name != "com.example:lib" {
                assert_eq!(before.value, after.value);
            }
        }
    }

    #[test]
    fn test_substitute_variable_requotes_string_notation() {
        let decls = parse(BUILD);
        let junit = find(&decls, "junit:junit");
        let updated = GradleMutator
            .substitute_variable("build.gradle", BUILD, junit, "junitVersion")
            .unwrap();
        assert!(updated.contains(r#"testImplementation("junit:junit:${junitVersion}")"#));
        let reparsed = parse(&updated);
        assert_eq!(find(&reparsed, "junit:junit").variable_ref(), Some("junitVersion"));
    }

    #[test]
    fn test_add_constraint_creates_block_inside_dependencies() {
        let request = ConstraintRequest {
            name: "org.yaml:snakeyaml".to_string(),
            version: "2.0".to_string(),
            reason: "CVE-2022-1471: pin transitive snakeyaml".to_string(),
        };
        let updated = GradleMutator.add_constraint("build.gradle", BUILD, &request).unwrap();
        assert!(updated.contains("    constraints {\n        implementation('org.yaml:snakeyaml:2.0') {\n            because 'CVE-2022-1471: pin transitive snakeyaml'\n        }\n    }\n"));

        let decls = parse(&updated);
        let pin = find(&decls, "org.yaml:snakeyaml");
        assert_eq!(pin.kind, DeclarationKind::Constraint);
        assert_eq!(pin.version(), Some("2.0"));
        assert!(GradleMutator.validate("build.gradle", &updated).valid);

        // A second pin goes into the existing block.
        let second = ConstraintRequest {
            name: "com.google.guava:guava".to_string(),
            version: "32.0.0-jre".to_string(),
            reason: "CVE-2023-2976".to_string(),
        };
        let updated = GradleMutator.add_constraint("build.gradle", &updated, &second).unwrap();
        assert_eq!(updated.matches("constraints {").count(), 1);
        let decls = parse(&updated);
        assert_eq!(find(&decls, "com.google.guava:guava").kind, DeclarationKind::Constraint);
    }

    #[test]
    fn test_add_constraint_kotlin_dsl() {
        let content = "dependencies {\n    implementation(\"com.example:lib:1.0.0\")\n}\n";
        let request = ConstraintRequest {
            name: "org.yaml:snakeyaml".to_string(),
            version: "2.0".to_string(),
            reason: "CVE-2022-1471".to_string(),
        };
        let updated = GradleMutator
            .add_constraint("build.gradle.kts", content, &request)
            .unwrap();
        assert!(updated.contains("implementation(\"org.yaml:snakeyaml:2.0\") {"));
        assert!(updated.contains("because(\"CVE-2022-1471\")"));
    }

    #[test]
    fn test_validate_detects_unbalanced_braces() {
        assert!(GradleMutator.validate("build.gradle", BUILD).valid);

        let broken = BUILD.replacen("dependencies {", "dependencies {{", 1);
        let report = GradleMutator.validate("build.gradle", &broken);
        assert!(!report.valid);

        let report = GradleMutator.validate("build.gradle", "version = '1.0'\n");
        assert!(!report.valid);
        assert!(report.messages[0].contains("missing top-level section"));
    }
}
