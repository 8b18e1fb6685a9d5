//! Maven `pom.xml` manifests.
//!
//! A minimal tag tokenizer turns the document into open/close events with
//! their ancestor path. Leaf elements carry the byte span of their trimmed
//! text, which is what gets rewritten.

use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

use super::{indent_unit, leading_whitespace, line_at, line_ending, line_start, static_regex};
use crate::model::ManifestFormat;
use crate::remediate::traits::{
    splice, ConstraintRequest, Declaration, DeclarationKind, ManifestMutator, MutationError,
    ParseError, ValidationReport,
};

pub struct MavenMutator;

const DEFAULT_PLUGIN_GROUP: &str = "org.apache.maven.plugins";

static TAG: OnceLock<Regex> = OnceLock::new();

fn tag() -> &'static Regex {
    static_regex(
        &TAG,
        r"<(?P<close>/)?(?P<name>[A-Za-z_][\w.\-:]*)(?P<attrs>[^>]*?)(?P<selfclose>/)?>",
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum XmlEvent {
    Open {
        name: String,
        /// Ancestors, outermost first
        path: Vec<String>,
        tag_span: Range<usize>,
    },
    Close {
        name: String,
        path: Vec<String>,
        tag_span: Range<usize>,
        /// Trimmed text span for elements without child elements
        leaf: Option<Range<usize>>,
    },
}

struct Frame {
    name: String,
    content_start: usize,
    has_children: bool,
}

/// Blanks out `<!-- -->` comments, keeping byte offsets and newlines.
fn mask_comments(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        let comment_end = rest[start..]
            .find("-->")
            .map(|idx| start + idx + 3)
            .unwrap_or(rest.len());
        for c in rest[start..comment_end].chars() {
            if c == '\n' || c == '\r' {
                out.push(c);
            } else {
                for _ in 0..c.len_utf8() {
                    out.push(' ');
                }
            }
        }
        rest = &rest[comment_end..];
    }
    out.push_str(rest);
    out
}

fn trimmed_span(content: &str, span: Range<usize>) -> Range<usize> {
    let text = &content[span.clone()];
    let start = span.start + (text.len() - text.trim_start().len());
    let end = span.end - (text.len() - text.trim_end().len());
    start..end.max(start)
}

fn tokenize(content: &str) -> Result<Vec<XmlEvent>, String> {
    let masked = mask_comments(content);
    let mut events = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let names = |stack: &[Frame]| stack.iter().map(|frame| frame.name.clone()).collect::<Vec<_>>();

    for caps in tag().captures_iter(&masked) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let Some(name) = caps.name("name").map(|m| m.as_str().to_string()) else {
            continue;
        };
        if caps.name("selfclose").is_some() {
            if let Some(top) = stack.last_mut() {
                top.has_children = true;
            }
            continue;
        }
        if caps.name("close").is_some() {
            let frame = stack.pop().ok_or_else(|| {
                format!(
                    "unexpected </{}> on line {}",
                    name,
                    line_at(content, whole.start()).0
                )
            })?;
            if frame.name != name {
                return Err(format!(
                    "mismatched </{}> for <{}> on line {}",
                    name,
                    frame.name,
                    line_at(content, whole.start()).0
                ));
            }
            let leaf = (!frame.has_children)
                .then(|| trimmed_span(content, frame.content_start..whole.start()));
            events.push(XmlEvent::Close {
                name,
                path: names(&stack),
                tag_span: whole.range(),
                leaf,
            });
        } else {
            if let Some(top) = stack.last_mut() {
                top.has_children = true;
            }
            events.push(XmlEvent::Open {
                name: name.clone(),
                path: names(&stack),
                tag_span: whole.range(),
            });
            stack.push(Frame {
                name,
                content_start: whole.end(),
                has_children: false,
            });
        }
    }

    if let Some(frame) = stack.last() {
        return Err(format!("unclosed <{}>", frame.name));
    }
    Ok(events)
}

#[derive(Default)]
struct PendingCoordinate {
    element: String,
    open_offset: usize,
    group: Option<String>,
    artifact: Option<String>,
    version: Option<Range<usize>>,
}

fn is_path(path: &[String], expected: &[&str]) -> bool {
    path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a == b)
}

impl ManifestMutator for MavenMutator {
    fn format(&self) -> ManifestFormat {
        ManifestFormat::Maven
    }

    fn parse(&self, path: &str, content: &str) -> Result<Vec<Declaration>, ParseError> {
        let events = tokenize(content).map_err(|message| ParseError::Malformed {
            path: path.to_string(),
            message,
        })?;

        let mut declarations = Vec::new();
        let mut pending: Vec<PendingCoordinate> = Vec::new();

        for event in events {
            match event {
                XmlEvent::Open { name, tag_span, .. }
                    if matches!(name.as_str(), "dependency" | "plugin" | "parent") =>
                {
                    pending.push(PendingCoordinate {
                        element: name,
                        open_offset: tag_span.start,
                        ..PendingCoordinate::default()
                    });
                }
                XmlEvent::Open { .. } => {}
                XmlEvent::Close {
                    name,
                    path: ancestors,
                    leaf: Some(span),
                    ..
                } if !matches!(name.as_str(), "dependency" | "plugin" | "parent") => {
                    if is_path(&ancestors, &["project", "properties"]) {
                        let (line_number, line) = line_at(content, span.start);
                        declarations.push(Declaration {
                            kind: DeclarationKind::Variable,
                            name,
                            value: Some(content[span.clone()].to_string()),
                            line_number,
                            line,
                            value_span: Some(span.clone()),
                            literal_span: Some(span),
                        });
                        continue;
                    }
                    let Some(current) = pending.last_mut() else {
                        continue;
                    };
                    if ancestors.last() != Some(&current.element) {
                        continue;
                    }
                    let text = content[span.clone()].to_string();
                    match name.as_str() {
                        "groupId" => current.group = Some(text),
                        "artifactId" => current.artifact = Some(text),
                        "version" => current.version = Some(span),
                        _ => {}
                    }
                }
                XmlEvent::Close {
                    name,
                    path: ancestors,
                    ..
                } if matches!(name.as_str(), "dependency" | "plugin" | "parent") => {
                    let Some(coordinate) = pending.pop() else {
                        continue;
                    };
                    let kind = match name.as_str() {
                        "dependency" if ancestors.iter().any(|a| a == "dependencyManagement") => {
                            DeclarationKind::Constraint
                        }
                        "dependency" => DeclarationKind::Dependency,
                        "plugin" => DeclarationKind::Plugin,
                        _ if is_path(&ancestors, &["project"]) => DeclarationKind::Parent,
                        _ => continue,
                    };
                    let group = match (coordinate.group, kind) {
                        (Some(group), _) => group,
                        (None, DeclarationKind::Plugin) => DEFAULT_PLUGIN_GROUP.to_string(),
                        (None, _) => continue,
                    };
                    let Some(artifact) = coordinate.artifact else {
                        continue;
                    };
                    let anchor = coordinate
                        .version
                        .as_ref()
                        .map(|span| span.start)
                        .unwrap_or(coordinate.open_offset);
                    let (line_number, line) = line_at(content, anchor);
                    declarations.push(Declaration {
                        kind,
                        name: format!("{}:{}", group, artifact),
                        value: coordinate
                            .version
                            .as_ref()
                            .map(|span| content[span.clone()].to_string()),
                        line_number,
                        line,
                        value_span: coordinate.version.clone(),
                        literal_span: coordinate.version,
                    });
                }
                XmlEvent::Close { .. } => {}
            }
        }
        Ok(declarations)
    }

    fn substitute_variable(
        &self,
        _path: &str,
        content: &str,
        declaration: &Declaration,
        variable: &str,
    ) -> Result<String, MutationError> {
        let span = declaration
            .value_span
            .clone()
            .ok_or_else(|| MutationError::MissingValue {
                name: declaration.name.clone(),
            })?;
        splice(content, span, &format!("${{{}}}", variable))
    }

    fn add_constraint(
        &self,
        _path: &str,
        content: &str,
        request: &ConstraintRequest,
    ) -> Result<String, MutationError> {
        let (group, artifact) =
            request
                .name
                .split_once(':')
                .ok_or(MutationError::Unsupported {
                    format: ManifestFormat::Maven,
                    edit: "constraints on non-coordinate names",
                })?;
        let events = tokenize(content).map_err(MutationError::AnchorNotFound)?;
        let nl = line_ending(content);
        let unit = indent_unit(content, "    ");
        let reason = request.reason.replace("--", "-");
        let dependency = |indent: &str| {
            format!(
                "{i}<!-- {r} -->{nl}{i}<dependency>{nl}{i}{u}<groupId>{g}</groupId>{nl}{i}{u}<artifactId>{a}</artifactId>{nl}{i}{u}<version>{v}</version>{nl}{i}</dependency>{nl}",
                i = indent,
                u = unit,
                r = reason,
                g = group,
                a = artifact,
                v = request.version,
                nl = nl
            )
        };
        let management = |indent: &str| {
            let inner = format!("{}{}{}", indent, unit, unit);
            format!(
                "{i}<dependencyManagement>{nl}{i}{u}<dependencies>{nl}{d}{i}{u}</dependencies>{nl}{i}</dependencyManagement>{nl}",
                i = indent,
                u = unit,
                d = dependency(&inner),
                nl = nl
            )
        };
        let anchored_line = |offset: usize| -> Result<(usize, String), MutationError> {
            let start = line_start(content, offset);
            if !content[start..offset].trim().is_empty() {
                return Err(MutationError::AnchorNotFound(
                    "closing tag does not start its line".to_string(),
                ));
            }
            Ok((start, leading_whitespace(&content[start..offset]).to_string()))
        };

        let managed_close = events.iter().find_map(|event| match event {
            XmlEvent::Close { name, path, tag_span, .. }
                if name == "dependencies" && is_path(path, &["project", "dependencyManagement"]) =>
            {
                Some(tag_span.start)
            }
            _ => None,
        });
        if let Some(offset) = managed_close {
            let (start, indent) = anchored_line(offset)?;
            let text = dependency(&format!("{}{}", indent, unit));
            return splice(content, start..start, &text);
        }

        let top_dependencies = events.iter().find_map(|event| match event {
            XmlEvent::Open { name, path, tag_span } if name == "dependencies" && is_path(path, &["project"]) => {
                Some(tag_span.start)
            }
            _ => None,
        });
        if let Some(offset) = top_dependencies {
            let (start, indent) = anchored_line(offset)?;
            return splice(content, start..start, &management(&indent));
        }

        let project_close = events.iter().find_map(|event| match event {
            XmlEvent::Close { name, path, tag_span, .. } if name == "project" && path.is_empty() => {
                Some(tag_span.start)
            }
            _ => None,
        });
        let offset = project_close
            .ok_or_else(|| MutationError::AnchorNotFound("no </project> element".to_string()))?;
        let (start, indent) = anchored_line(offset)?;
        splice(content, start..start, &management(&format!("{}{}", indent, unit)))
    }

    fn validate(&self, path: &str, content: &str) -> ValidationReport {
        let events = match tokenize(content) {
            Ok(events) => events,
            Err(message) => return ValidationReport::invalid(path, vec![message]),
        };
        let root = events.iter().find_map(|event| match event {
            XmlEvent::Open { name, .. } => Some(name.as_str()),
            XmlEvent::Close { .. } => None,
        });
        if root == Some("project") {
            ValidationReport::valid(path)
        } else {
            ValidationReport::invalid(path, vec!["missing <project> root element".to_string()])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
    <modelVersion>4.0.0</modelVersion>
    <parent>
        <groupId>org.springframework.boot</groupId>
        <artifactId>spring-boot-starter-parent</artifactId>
        <version>2.7.0</version>
    </parent>
    <properties>
        <java.version>11</java.version>
        <jackson.version>2.13.2</jackson.version>
    </properties>
    <dependencies>
        <!-- <dependency><groupId>x</groupId><artifactId>y</artifactId><version>1</version></dependency> -->
        <dependency>
            <groupId>com.example</groupId>
            <artifactId>lib</artifactId>
            <version>1.2.0</version>
            <exclusions>
                <exclusion>
                    <groupId>commons-logging</groupId>
                    <artifactId>commons-logging</artifactId>
                </exclusion>
            </exclusions>
        </dependency>
        <dependency>
            <groupId>com.fasterxml.jackson.core</groupId>
            <artifactId>jackson-databind</artifactId>
            <version>${jackson.version}</version>
        </dependency>
        <dependency>
            <groupId>org.springframework.boot</groupId>
            <artifactId>spring-boot-starter-web</artifactId>
        </dependency>
    </dependencies>
    <build>
        <plugins>
            <plugin>
                <artifactId>maven-compiler-plugin</artifactId>
                <version>3.8.1</version>
            </plugin>
        </plugins>
    </build>
</project>
"#;

    fn parse(content: &str) -> Vec<Declaration> {
        MavenMutator.parse("pom.xml", content).unwrap()
    }

    fn find<'a>(decls: &'a [Declaration], name: &str) -> &'a Declaration {
        decls.iter().find(|d| d.name == name).unwrap()
    }

    #[test]
    fn test_parse_pom_declarations() {
        let decls = parse(POM);

        let parent = find(&decls, "org.springframework.boot:spring-boot-starter-parent");
        assert_eq!(parent.kind, DeclarationKind::Parent);
        assert_eq!(parent.value.as_deref(), Some("2.7.0"));

        let lib = find(&decls, "com.example:lib");
        assert_eq!(lib.kind, DeclarationKind::Dependency);
        assert_eq!(lib.version(), Some("1.2.0"));
        assert_eq!(lib.line_number, 18);
        assert_eq!(lib.line.trim(), "<version>1.2.0</version>");

        let databind = find(&decls, "com.fasterxml.jackson.core:jackson-databind");
        assert_eq!(databind.variable_ref(), Some("jackson.version"));

        let web = find(&decls, "org.springframework.boot:spring-boot-starter-web");
        assert_eq!(web.value, None);

        let compiler = find(&decls, "org.apache.maven.plugins:maven-compiler-plugin");
        assert_eq!(compiler.kind, DeclarationKind::Plugin);

        assert_eq!(find(&decls, "jackson.version").kind, DeclarationKind::Variable);
        // Exclusions and commented-out blocks are not declarations.
        assert!(decls.iter().all(|d| d.name != "commons-logging:commons-logging"));
        assert!(decls.iter().all(|d| d.name != "x:y"));
    }

    #[test]
    fn test_set_version_and_substitution() {
        let decls = parse(POM);
        let lib = find(&decls, "com.example:lib");

        let updated = MavenMutator.set_version(POM, lib, "1.5.0").unwrap();
        assert_eq!(find(&parse(&updated), "com.example:lib").version(), Some("1.5.0"));
        assert_eq!(updated.len(), POM.len());

        let substituted = MavenMutator
            .substitute_variable("pom.xml", POM, lib, "lib.version")
            .unwrap();
        assert!(substituted.contains("<version>${lib.version}</version>"));
    }

    #[test]
    fn test_add_constraint_creates_dependency_management() {
        let request = ConstraintRequest {
            name: "org.yaml:snakeyaml".to_string(),
            version: "2.0".to_string(),
            reason: "CVE-2022-1471: pin transitive snakeyaml".to_string(),
        };
        let updated = MavenMutator.add_constraint("pom.xml", POM, &request).unwrap();
        assert!(updated.contains("    <dependencyManagement>\n        <dependencies>\n            <!-- CVE-2022-1471: pin transitive snakeyaml -->\n            <dependency>\n                <groupId>org.yaml</groupId>"));
        assert!(MavenMutator.validate("pom.xml", &updated).valid);

        let decls = parse(&updated);
        let pin = find(&decls, "org.yaml:snakeyaml");
        assert_eq!(pin.kind, DeclarationKind::Constraint);
        assert_eq!(pin.version(), Some("2.0"));

        // The next pin lands in the existing section.
        let second = ConstraintRequest {
            name: "io.netty:netty-codec".to_string(),
            version: "4.1.94.Final".to_string(),
            reason: "CVE-2023-34462".to_string(),
        };
        let updated = MavenMutator.add_constraint("pom.xml", &updated, &second).unwrap();
        assert_eq!(updated.matches("<dependencyManagement>").count(), 1);
        assert_eq!(
            find(&parse(&updated), "io.netty:netty-codec").kind,
            DeclarationKind::Constraint
        );
    }

    #[test]
    fn test_validate_reports_mismatched_tags() {
        assert!(MavenMutator.validate("pom.xml", POM).valid);

        let broken = POM.replacen("</parent>", "</parnt>", 1);
        let report = MavenMutator.validate("pom.xml", &broken);
        assert!(!report.valid);
        assert!(report.messages[0].contains("mismatched"));

        let report = MavenMutator.validate("pom.xml", "<settings></settings>");
        assert!(!report.valid);
    }

    #[test]
    fn test_malformed_pom_is_a_parse_error() {
        let result = MavenMutator.parse("pom.xml", "<project><dependencies></project>");
        assert!(matches!(result, Err(ParseError::Malformed { .. })));
    }
}
