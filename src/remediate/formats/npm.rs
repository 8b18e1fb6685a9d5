//! npm `package.json` manifests.
//!
//! `serde_json` does not expose byte offsets, so parsing uses a small
//! scanner that records the span of every string value together with the
//! object keys leading to it.

use std::ops::Range;

use super::{indent_unit, line_at, line_ending};
use crate::model::ManifestFormat;
use crate::remediate::traits::{
    splice, ConstraintRequest, Declaration, DeclarationKind, ManifestMutator, MutationError,
    ParseError, ValidationReport,
};
use crate::version;

pub struct NpmMutator;

pub(crate) const DEPENDENCY_SECTIONS: [&str; 4] = [
    "dependencies",
    "devDependencies",
    "peerDependencies",
    "optionalDependencies",
];

const OVERRIDE_SECTIONS: [&str; 2] = ["overrides", "resolutions"];

/// Prefixes kept when a version is rewritten.
const RANGE_PREFIXES: [&str; 5] = [">=", "^", "~", "=", ">"];

#[derive(Debug, Clone)]
struct JsonEntry {
    /// Keys of the enclosing objects, outermost first
    path: Vec<String>,
    key: String,
    value_span: Range<usize>,
}

#[derive(Debug, Clone)]
struct JsonObject {
    /// Keys leading to this object; empty for the root
    path: Vec<String>,
    open: usize,
    close: usize,
    members: usize,
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    entries: Vec<JsonEntry>,
    objects: Vec<JsonObject>,
}

impl<'a> Scanner<'a> {
    fn run(src: &'a str) -> Result<Self, String> {
        let mut scanner = Scanner {
            src,
            pos: 0,
            entries: Vec::new(),
            objects: Vec::new(),
        };
        scanner.skip_ws();
        if scanner.peek() != Some(b'{') {
            return Err("root is not a JSON object".to_string());
        }
        scanner.value(&mut Vec::new())?;
        scanner.skip_ws();
        if scanner.pos < src.len() {
            return Err(scanner.error("trailing content after root object"));
        }
        Ok(scanner)
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn error(&self, message: &str) -> String {
        format!("{} on line {}", message, line_at(self.src, self.pos).0)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), String> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    /// Consumes a string literal and returns the span between the quotes.
    fn string(&mut self) -> Result<Range<usize>, String> {
        self.expect(b'"')?;
        let start = self.pos;
        loop {
            match self.peek() {
                Some(b'"') => {
                    let span = start..self.pos;
                    self.pos += 1;
                    return Ok(span);
                }
                Some(b'\\') => self.pos += 2,
                Some(b'\n') | None => return Err(self.error("unterminated string")),
                Some(_) => self.pos += 1,
            }
        }
    }

    fn value(&mut self, path: &mut Vec<String>) -> Result<(), String> {
        match self.peek() {
            Some(b'{') => self.object(path),
            Some(b'[') => self.array(path),
            Some(b'"') => self.string().map(|_| ()),
            Some(_) => {
                let start = self.pos;
                while !matches!(
                    self.peek(),
                    None | Some(b',' | b'}' | b']' | b' ' | b'\t' | b'\n' | b'\r')
                ) {
                    self.pos += 1;
                }
                if self.pos == start {
                    Err(self.error("expected a value"))
                } else {
                    Ok(())
                }
            }
            None => Err(self.error("unexpected end of document")),
        }
    }

    fn object(&mut self, path: &mut Vec<String>) -> Result<(), String> {
        let open = self.pos;
        self.expect(b'{')?;
        let mut members = 0;
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
        } else {
            loop {
                self.skip_ws();
                let key_span = self.string()?;
                let key = self.src[key_span].to_string();
                self.skip_ws();
                self.expect(b':')?;
                self.skip_ws();
                if self.peek() == Some(b'"') {
                    let value_span = self.string()?;
                    self.entries.push(JsonEntry {
                        path: path.clone(),
                        key,
                        value_span,
                    });
                } else {
                    path.push(key);
                    self.value(path)?;
                    path.pop();
                }
                members += 1;
                self.skip_ws();
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b'}') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or '}'")),
                }
            }
        }
        self.objects.push(JsonObject {
            path: path.clone(),
            open,
            close: self.pos - 1,
            members,
        });
        Ok(())
    }

    fn array(&mut self, path: &mut Vec<String>) -> Result<(), String> {
        self.expect(b'[')?;
        path.push("[]".to_string());
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            path.pop();
            return Ok(());
        }
        loop {
            self.skip_ws();
            self.value(path)?;
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
        path.pop();
        Ok(())
    }
}

fn declaration_kind(path: &[String]) -> Option<DeclarationKind> {
    match path {
        [section] if DEPENDENCY_SECTIONS.contains(&section.as_str()) => {
            Some(DeclarationKind::Dependency)
        }
        [section, ..] if OVERRIDE_SECTIONS.contains(&section.as_str()) => {
            Some(DeclarationKind::Constraint)
        }
        [pnpm, section, ..] if pnpm == "pnpm" && section == "overrides" => {
            Some(DeclarationKind::Constraint)
        }
        _ => None,
    }
}

/// Specifiers that do not name a registry version (git urls, local paths,
/// workspace links, aliases, tags).
fn is_version_specifier(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty()
        && !value.contains(':')
        && !value.contains('/')
        && !value.contains("||")
        && !value.contains(" - ")
        && version::looks_like_version(value)
}

impl ManifestMutator for NpmMutator {
    fn format(&self) -> ManifestFormat {
        ManifestFormat::Npm
    }

    fn parse(&self, path: &str, content: &str) -> Result<Vec<Declaration>, ParseError> {
        let scanner = Scanner::run(content).map_err(|message| ParseError::Malformed {
            path: path.to_string(),
            message,
        })?;
        let declarations = scanner
            .entries
            .into_iter()
            .filter_map(|entry| {
                let kind = declaration_kind(&entry.path)?;
                let name = if entry.key == "." {
                    entry.path.last()?.clone()
                } else {
                    entry.key.trim_start_matches("**/").to_string()
                };
                let (line_number, line) = line_at(content, entry.value_span.start);
                Some(Declaration {
                    kind,
                    name,
                    value: Some(content[entry.value_span.clone()].to_string()),
                    line_number,
                    line,
                    value_span: Some(entry.value_span.clone()),
                    literal_span: Some(entry.value_span.start - 1..entry.value_span.end + 1),
                })
            })
            .collect();
        Ok(declarations)
    }

    fn render_version(
        &self,
        declaration: &Declaration,
        version: &str,
    ) -> Result<String, MutationError> {
        let current = declaration.value.as_deref().unwrap_or("");
        if !current.is_empty() && !is_version_specifier(current) {
            return Err(MutationError::NonVersionSpecifier {
                name: declaration.name.clone(),
                value: current.to_string(),
            });
        }
        let prefix = RANGE_PREFIXES
            .iter()
            .find(|prefix| current.trim_start().starts_with(**prefix))
            .copied()
            .unwrap_or("");
        Ok(format!("{}{}", prefix, version::normalize(version)))
    }

    fn add_constraint(
        &self,
        _path: &str,
        content: &str,
        request: &ConstraintRequest,
    ) -> Result<String, MutationError> {
        let scanner = Scanner::run(content).map_err(MutationError::AnchorNotFound)?;
        let nl = line_ending(content);
        let unit = indent_unit(content, "  ");
        let pin = format!("\"{}\": \"{}\"", request.name, version::normalize(&request.version));

        if let Some(overrides) = scanner
            .objects
            .iter()
            .find(|object| object.path.len() == 1 && object.path[0] == "overrides")
        {
            if overrides.members == 0 {
                let block = format!("{{{nl}{u}{u}{pin}{nl}{u}}}", u = unit, pin = pin, nl = nl);
                return splice(content, overrides.open..overrides.close + 1, &block);
            }
            let insert_at = content[..overrides.close].trim_end().len();
            let text = format!(",{nl}{u}{u}{pin}", u = unit, pin = pin, nl = nl);
            return splice(content, insert_at..insert_at, &text);
        }

        let root = scanner
            .objects
            .iter()
            .find(|object| object.path.is_empty())
            .ok_or_else(|| MutationError::AnchorNotFound("no root object".to_string()))?;
        let section = format!(
            "{u}\"overrides\": {{{nl}{u}{u}{pin}{nl}{u}}}",
            u = unit,
            pin = pin,
            nl = nl
        );
        if root.members == 0 {
            let block = format!("{{{nl}{s}{nl}}}", s = section, nl = nl);
            return splice(content, root.open..root.close + 1, &block);
        }
        let insert_at = content[..root.close].trim_end().len();
        splice(content, insert_at..insert_at, &format!(",{}{}", nl, section))
    }

    fn validate(&self, path: &str, content: &str) -> ValidationReport {
        let value: serde_json::Value = match serde_json::from_str(content) {
            Ok(value) => value,
            Err(err) => return ValidationReport::invalid(path, vec![err.to_string()]),
        };
        let Some(root) = value.as_object() else {
            return ValidationReport::invalid(path, vec!["root is not a JSON object".to_string()]);
        };
        let mut messages = Vec::new();
        for section in DEPENDENCY_SECTIONS {
            match root.get(section) {
                None => {}
                Some(serde_json::Value::Object(entries)) => {
                    for (name, spec) in entries {
                        if !spec.is_string() {
                            messages.push(format!("{}.{} is not a string", section, name));
                        }
                    }
                }
                Some(_) => messages.push(format!("{} is not an object", section)),
            }
        }
        ValidationReport::from_messages(path, messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKAGE: &str = r#"{
  "name": "web-app",
  "version": "1.0.0",
  "scripts": {
    "test": "jest"
  },
  "dependencies": {
    "express": "^4.17.1",
    "lodash": "4.17.20",
    "local-lib": "file:../local-lib"
  },
  "devDependencies": {
    "jest": "~29.0.0"
  },
  "files": ["dist", "lib"]
}
"#;

    fn parse(content: &str) -> Vec<Declaration> {
        NpmMutator.parse("package.json", content).unwrap()
    }

    fn find<'a>(decls: &'a [Declaration], name: &str) -> &'a Declaration {
        decls.iter().find(|d| d.name == name).unwrap()
    }

    #[test]
    fn test_parse_dependency_sections() {
        let decls = parse(PACKAGE);
        assert_eq!(decls.len(), 4);

        let express = find(&decls, "express");
        assert_eq!(express.kind, DeclarationKind::Dependency);
        assert_eq!(express.version(), Some("4.17.1"));
        assert_eq!(express.line_number, 8);

        assert_eq!(find(&decls, "jest").version(), Some("29.0.0"));
        // Scripts and metadata are not dependencies.
        assert!(decls.iter().all(|d| d.name != "test" && d.name != "version"));
    }

    #[test]
    fn test_set_version_keeps_range_operator() {
        let decls = parse(PACKAGE);
        let updated = NpmMutator
            .set_version(PACKAGE, find(&decls, "express"), "4.19.2")
            .unwrap();
        assert!(updated.contains(r#""express": "^4.19.2""#));

        let decls = parse(&updated);
        let updated = NpmMutator
            .set_version(&updated, find(&decls, "jest"), "29.7.0")
            .unwrap();
        assert!(updated.contains(r#""jest": "~29.7.0""#));
        assert!(updated.contains(r#""lodash": "4.17.20""#));
    }

    #[test]
    fn test_non_version_specifiers_are_not_rewritten() {
        let decls = parse(PACKAGE);
        let err = NpmMutator
            .set_version(PACKAGE, find(&decls, "local-lib"), "2.0.0")
            .unwrap_err();
        assert_eq!(
            err,
            MutationError::NonVersionSpecifier {
                name: "local-lib".to_string(),
                value: "file:../local-lib".to_string(),
            }
        );
    }

    #[test]
    fn test_add_constraint_creates_overrides_section() {
        let request = ConstraintRequest {
            name: "minimist".to_string(),
            version: "1.2.6".to_string(),
            reason: "CVE-2021-44906".to_string(),
        };
        let updated = NpmMutator.add_constraint("package.json", PACKAGE, &request).unwrap();
        assert!(updated.contains(
            "  \"files\": [\"dist\", \"lib\"],\n  \"overrides\": {\n    \"minimist\": \"1.2.6\"\n  }\n}"
        ));
        assert!(NpmMutator.validate("package.json", &updated).valid);

        let pin = find(&parse(&updated), "minimist").clone();
        assert_eq!(pin.kind, DeclarationKind::Constraint);

        let second = ConstraintRequest {
            name: "qs".to_string(),
            version: "6.10.3".to_string(),
            reason: "CVE-2022-24999".to_string(),
        };
        let updated = NpmMutator.add_constraint("package.json", &updated, &second).unwrap();
        assert!(updated.contains("\"minimist\": \"1.2.6\",\n    \"qs\": \"6.10.3\"\n  }"));
        assert_eq!(updated.matches("\"overrides\"").count(), 1);
    }

    #[test]
    fn test_add_constraint_into_empty_overrides() {
        let content = "{\n  \"dependencies\": {},\n  \"overrides\": {}\n}\n";
        let request = ConstraintRequest {
            name: "semver".to_string(),
            version: "7.5.2".to_string(),
            reason: String::new(),
        };
        let updated = NpmMutator.add_constraint("package.json", content, &request).unwrap();
        assert_eq!(
            updated,
            "{\n  \"dependencies\": {},\n  \"overrides\": {\n    \"semver\": \"7.5.2\"\n  }\n}\n"
        );
    }

    #[test]
    fn test_validate_rejects_broken_json() {
        assert!(NpmMutator.validate("package.json", PACKAGE).valid);

        let report = NpmMutator.validate("package.json", "{\"dependencies\": {\"a\": 1}}");
        assert!(!report.valid);
        assert!(report.messages[0].contains("dependencies.a"));

        assert!(!NpmMutator.validate("package.json", "{\"a\": }").valid);
        assert!(NpmMutator.parse("package.json", "[1, 2]").is_err());
    }
}
