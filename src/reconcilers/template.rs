//! A small subset of Go text/template, enough for the header and environment values of a WorkspaceKind.
//!
//! Supported actions are `{{ httpPathPrefix "<port-id>" }}`, string literals `{{ "text" }}` and comments
//! `{{/* ... */}}`, with the usual `{{-`/`-}}` whitespace trimming.

use std::collections::BTreeSet;

/// Rendered in place of a path prefix when a template is only being checked
pub const VALIDATION_PATH_PREFIX: &str = "DUMMY_HTTP_PATH_PREFIX";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to parse template {template:?}: {reason}")]
    Parse { template: String, reason: String },

    #[error("failed to execute template {template:?}: {reason}")]
    Exec { template: String, reason: String },
}

/// Values the template functions are evaluated against
pub trait TemplateContext {
    /// `/workspace/<namespace>/<name>/<port-id>/`, or None for an unknown port
    fn http_path_prefix(&self, port_id: &str) -> Option<String>;
}

/// The ports of one workspace
#[derive(Debug, Clone)]
pub struct WorkspacePorts<'a> {
    namespace: &'a str,
    name: &'a str,
    port_ids: BTreeSet<&'a str>,
}

impl<'a> WorkspacePorts<'a> {
    pub fn new(namespace: &'a str, name: &'a str, port_ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            namespace,
            name,
            port_ids: port_ids.into_iter().collect(),
        }
    }
}

impl TemplateContext for WorkspacePorts<'_> {
    fn http_path_prefix(&self, port_id: &str) -> Option<String> {
        self.port_ids
            .contains(port_id)
            .then(|| http_path_prefix(self.namespace, self.name, port_id))
    }
}

/// Accepts any port, for checking templates before any workspace exists
pub struct ValidationContext;

impl TemplateContext for ValidationContext {
    fn http_path_prefix(&self, _port_id: &str) -> Option<String> {
        Some(VALIDATION_PATH_PREFIX.to_owned())
    }
}

pub fn http_path_prefix(namespace: &str, name: &str, port_id: &str) -> String {
    format!("/workspace/{namespace}/{name}/{port_id}/")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Literal(String),
    PathPrefix(String),
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let nodes = parse_nodes(raw).map_err(|reason| TemplateError::Parse {
            template: raw.to_owned(),
            reason,
        })?;
        Ok(Self {
            raw: raw.to_owned(),
            nodes,
        })
    }

    pub fn execute(&self, ctx: &impl TemplateContext) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.raw.len());
        for node in &self.nodes {
            match node {
                Node::Text(text) | Node::Literal(text) => out.push_str(text),
                Node::PathPrefix(port_id) => match ctx.http_path_prefix(port_id) {
                    Some(prefix) => out.push_str(&prefix),
                    None => {
                        return Err(TemplateError::Exec {
                            template: self.raw.clone(),
                            reason: format!("error calling httpPathPrefix: port {port_id:?} is not defined"),
                        })
                    }
                },
            }
        }
        Ok(out)
    }
}

pub fn render(raw: &str, ctx: &impl TemplateContext) -> Result<String, TemplateError> {
    Template::parse(raw)?.execute(ctx)
}

/// Check that a template parses, executing it against [`ValidationContext`]
pub fn validate(raw: &str) -> Result<(), TemplateError> {
    render(raw, &ValidationContext).map(|_| ())
}

fn parse_nodes(raw: &str) -> Result<Vec<Node>, String> {
    let mut nodes = Vec::new();
    let mut rest = raw;

    while let Some(open) = rest.find("{{") {
        let mut text = &rest[..open];
        let mut action = &rest[open + 2..];

        if let Some(stripped) = strip_left_trim_marker(action) {
            text = text.trim_end();
            action = stripped;
        }

        let close = find_close(action).ok_or_else(|| "unclosed action".to_owned())?;
        let mut body = &action[..close];
        let mut after = &action[close + 2..];

        if let Some(stripped) = strip_right_trim_marker(body) {
            body = stripped;
            after = after.trim_start();
        }

        if !text.is_empty() {
            nodes.push(Node::Text(text.to_owned()));
        }
        if let Some(node) = parse_action(body.trim())? {
            nodes.push(node);
        }

        rest = after;
    }

    if !rest.is_empty() {
        nodes.push(Node::Text(rest.to_owned()));
    }

    Ok(nodes)
}

fn strip_left_trim_marker(action: &str) -> Option<&str> {
    let stripped = action.strip_prefix('-')?;
    stripped
        .starts_with(char::is_whitespace)
        .then_some(stripped)
}

fn strip_right_trim_marker(body: &str) -> Option<&str> {
    let stripped = body.strip_suffix('-')?;
    stripped.ends_with(char::is_whitespace).then_some(stripped)
}

// Index of the first `}}` that is not inside a string literal
fn find_close(action: &str) -> Option<usize> {
    let bytes = action.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }

    None
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
}

fn parse_action(body: &str) -> Result<Option<Node>, String> {
    if body.starts_with("/*") {
        return if body.ends_with("*/") && body.len() >= 4 {
            Ok(None)
        } else {
            Err("unclosed comment".to_owned())
        };
    }

    let mut tokens = tokenize(body)?.into_iter();
    let node = match tokens.next() {
        None => return Err("missing value for command".to_owned()),
        Some(Token::Str(s)) => Node::Literal(s),
        Some(Token::Ident(f)) if f == "httpPathPrefix" => match tokens.next() {
            Some(Token::Str(port_id)) => Node::PathPrefix(port_id),
            Some(Token::Ident(arg)) => {
                return Err(format!(
                    "httpPathPrefix expects a string argument, got {arg:?}"
                ))
            }
            None => return Err("wrong number of args for httpPathPrefix: want 1 got 0".to_owned()),
        },
        Some(Token::Ident(f)) => return Err(format!("function {f:?} not defined")),
    };

    if tokens.next().is_some() {
        return Err("too many arguments in command".to_owned());
    }

    Ok(Some(node))
}

fn tokenize(body: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            tokens.push(Token::Str(quoted_string(&mut chars)?));
        } else if c == '`' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some('`') => break,
                    Some(c) => s.push(c),
                    None => return Err("unterminated raw quoted string".to_owned()),
                }
            }
            tokens.push(Token::Str(s));
        } else if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' {
            let mut ident = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(ident));
        } else {
            return Err(format!("unexpected {c:?} in command"));
        }
    }

    Ok(tokens)
}

fn quoted_string(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String, String> {
    let mut s = String::new();
    loop {
        match chars.next() {
            Some('"') => return Ok(s),
            Some('\\') => match chars.next() {
                Some('"') => s.push('"'),
                Some('\\') => s.push('\\'),
                Some('n') => s.push('\n'),
                Some('t') => s.push('\t'),
                Some(c) => return Err(format!("unknown escape sequence \\{c}")),
                None => return Err("unterminated quoted string".to_owned()),
            },
            Some('\n') | None => return Err("unterminated quoted string".to_owned()),
            Some(c) => s.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> WorkspacePorts<'static> {
        WorkspacePorts::new("user-ns", "my-ws", ["jupyterlab", "vscode"])
    }

    #[test]
    fn test_render_path_prefix() {
        assert_eq!(
            render(r#"{{ httpPathPrefix "jupyterlab" }}"#, &ports()).unwrap(),
            "/workspace/user-ns/my-ws/jupyterlab/"
        );
        assert_eq!(
            render(r#"base_url={{httpPathPrefix "vscode"}}lab"#, &ports()).unwrap(),
            "base_url=/workspace/user-ns/my-ws/vscode/lab"
        );
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(render("X-Forwarded-Proto", &ports()).unwrap(), "X-Forwarded-Proto");
        assert_eq!(render("", &ports()).unwrap(), "");
        assert_eq!(render("a } b }}", &ports()).unwrap(), "a } b }}");
    }

    #[test]
    fn test_literals_comments_and_trimming() {
        assert_eq!(
            render(r#"a {{- "b" -}} c{{/* note */}}"#, &ports()).unwrap(),
            "abc"
        );
        assert_eq!(render(r#"{{ `raw "x"` }}"#, &ports()).unwrap(), r#"raw "x""#);
        assert_eq!(render(r#"{{ "}}" }}"#, &ports()).unwrap(), "}}");
    }

    #[test]
    fn test_parse_errors() {
        for raw in [
            r#"{{ httpPathPrefix "jupyterlab" "#,
            r#"{{ httpPathPrefix }}"#,
            r#"{{ httpPathPrefix jupyterlab }}"#,
            r#"{{ httpPathPrefix "a" "b" }}"#,
            r#"{{ unknownFunc "a" }}"#,
            r#"{{ }}"#,
            r#"{{ "unterminated }}"#,
            r#"{{ httpPathPrefix "a" | printf }}"#,
        ] {
            assert!(
                matches!(Template::parse(raw), Err(TemplateError::Parse { .. })),
                "{raw} should not parse"
            );
        }
    }

    #[test]
    fn test_exec_error_for_unknown_port() {
        let err = render(r#"{{ httpPathPrefix "rstudio" }}"#, &ports()).unwrap_err();
        assert!(matches!(err, TemplateError::Exec { .. }));
        assert!(err.to_string().contains("rstudio"));
    }

    #[test]
    fn test_validation_context_accepts_any_port() {
        assert!(validate(r#"{{ httpPathPrefix "anything" }}"#).is_ok());
        assert_eq!(
            render(r#"{{ httpPathPrefix "anything" }}x"#, &ValidationContext).unwrap(),
            "DUMMY_HTTP_PATH_PREFIXx"
        );
        assert!(matches!(
            validate(r#"{{ nope }}"#),
            Err(TemplateError::Parse { .. })
        ));
    }
}
