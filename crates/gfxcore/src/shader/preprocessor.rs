//! A small C-style preprocessor for shader chunks.
//!
//! Supported directives: `#define`, `#undef`, `#ifdef`, `#ifndef`, `#if`,
//! `#elif`, `#else`, `#endif`, `#include` and `#error`. Conditions accept
//! `defined(NAME)`, integer literals, defined names, `!`, `&&`, `||`,
//! parentheses and integer comparisons. Every other directive (`#version`,
//! `#extension`, …) is passed through untouched when its branch is active.
//!
//! After conditionals are resolved, array sizes written as `[NAME]` are
//! replaced by the integer value of `NAME` so uniform layouts can be derived
//! from the output.

use std::collections::BTreeMap;

use super::chunks::ChunkRegistry;

const MAX_INCLUDE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreprocessError {
    #[error("line {line}: #{directive} without a matching #if")]
    Unmatched { line: usize, directive: String },
    #[error("line {line}: #elif after #else")]
    ElifAfterElse { line: usize },
    #[error("line {line}: duplicate #else")]
    DuplicateElse { line: usize },
    #[error("#if opened on line {line} is never closed")]
    Unterminated { line: usize },
    #[error("line {line}: include '{name}' is not a known chunk")]
    MissingInclude { line: usize, name: String },
    #[error("line {line}: malformed include '{text}'")]
    MalformedInclude { line: usize, text: String },
    #[error("include nesting deeper than {MAX_INCLUDE_DEPTH} levels")]
    IncludeDepth,
    #[error("line {line}: invalid expression '{expression}': {reason}")]
    InvalidExpression {
        line: usize,
        expression: String,
        reason: String,
    },
    #[error("line {line}: #error {message}")]
    ErrorDirective { line: usize, message: String },
}

/// Runs the preprocessor over `source`, resolving includes from `includes`.
///
/// `defines` seeds the define table; `#define` lines inside the source are
/// kept in the output and also added to the table.
pub fn preprocess(
    source: &str,
    defines: &BTreeMap<String, String>,
    includes: &ChunkRegistry,
) -> Result<String, PreprocessError> {
    let mut state = State {
        includes,
        defines: defines.clone(),
        stack: Vec::new(),
        output: Vec::new(),
    };
    state.run(source, 0)?;
    if let Some(open) = state.stack.last() {
        return Err(PreprocessError::Unterminated { line: open.line });
    }

    let int_defines: Vec<(String, String)> = state
        .defines
        .iter()
        .filter(|(_, value)| !value.contains('.') && value.trim().parse::<i64>().is_ok())
        .map(|(name, value)| (format!("[{name}]"), format!("[{}]", value.trim())))
        .collect();

    let mut result = String::with_capacity(source.len());
    let mut previous_blank = true;
    for line in state.output {
        let mut line = if line.trim().is_empty() {
            String::new()
        } else {
            line
        };
        if line.is_empty() {
            if previous_blank {
                continue;
            }
            previous_blank = true;
        } else {
            previous_blank = false;
            if line.contains('[') {
                for (pattern, replacement) in &int_defines {
                    if line.contains(pattern.as_str()) {
                        line = line.replace(pattern.as_str(), replacement);
                    }
                }
            }
        }
        result.push_str(&line);
        result.push('\n');
    }
    Ok(result)
}

/// Evaluates a condition the way `#if` would against `defines`.
pub fn evaluate(expression: &str, defines: &BTreeMap<String, String>) -> Result<bool, String> {
    let tokens = tokenize(expression)?;
    let mut parser = ExprParser {
        tokens: &tokens,
        position: 0,
        defines,
    };
    let value = parser.or()?;
    if parser.position != tokens.len() {
        return Err(format!("unexpected token {:?}", tokens[parser.position]));
    }
    Ok(value != 0)
}

struct Branch {
    line: usize,
    parent_active: bool,
    active: bool,
    any_taken: bool,
    seen_else: bool,
}

struct State<'a> {
    includes: &'a ChunkRegistry,
    defines: BTreeMap<String, String>,
    stack: Vec<Branch>,
    output: Vec<String>,
}

impl State<'_> {
    fn active(&self) -> bool {
        self.stack.last().map(|branch| branch.active).unwrap_or(true)
    }

    fn run(&mut self, source: &str, depth: usize) -> Result<(), PreprocessError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(PreprocessError::IncludeDepth);
        }

        let stripped = strip_comments(source);
        for (index, raw) in stripped.lines().enumerate() {
            let line_number = index + 1;
            let line = raw.trim_end();
            let trimmed = line.trim_start();

            let Some(directive) = trimmed.strip_prefix('#') else {
                if self.active() {
                    self.output.push(line.to_string());
                }
                continue;
            };

            let directive = directive.trim_start();
            let (keyword, rest) = match directive.find(|c: char| c.is_whitespace()) {
                Some(split) => (&directive[..split], directive[split..].trim()),
                None => (directive, ""),
            };

            match keyword {
                "ifdef" | "ifndef" | "if" => {
                    let parent_active = self.active();
                    let mut taken = false;
                    if parent_active {
                        taken = match keyword {
                            "ifdef" => self.defines.contains_key(identifier(rest)),
                            "ifndef" => !self.defines.contains_key(identifier(rest)),
                            _ => self.condition(rest, line_number)?,
                        };
                    }
                    self.stack.push(Branch {
                        line: line_number,
                        parent_active,
                        active: parent_active && taken,
                        any_taken: taken,
                        seen_else: false,
                    });
                }
                "elif" => {
                    let evaluate_now = match self.stack.last() {
                        None => {
                            return Err(PreprocessError::Unmatched {
                                line: line_number,
                                directive: keyword.to_string(),
                            })
                        }
                        Some(branch) if branch.seen_else => {
                            return Err(PreprocessError::ElifAfterElse { line: line_number })
                        }
                        Some(branch) => branch.parent_active && !branch.any_taken,
                    };
                    let taken = if evaluate_now {
                        self.condition(rest, line_number)?
                    } else {
                        false
                    };
                    if let Some(branch) = self.stack.last_mut() {
                        branch.active = taken;
                        branch.any_taken |= taken;
                    }
                }
                "else" => {
                    let Some(branch) = self.stack.last_mut() else {
                        return Err(PreprocessError::Unmatched {
                            line: line_number,
                            directive: keyword.to_string(),
                        });
                    };
                    if branch.seen_else {
                        return Err(PreprocessError::DuplicateElse { line: line_number });
                    }
                    branch.active = branch.parent_active && !branch.any_taken;
                    branch.any_taken = true;
                    branch.seen_else = true;
                }
                "endif" => {
                    if self.stack.pop().is_none() {
                        return Err(PreprocessError::Unmatched {
                            line: line_number,
                            directive: keyword.to_string(),
                        });
                    }
                }
                _ if !self.active() => {}
                "define" => {
                    let name = identifier(rest);
                    let value = rest[name.len()..].trim();
                    self.defines.insert(name.to_string(), value.to_string());
                    self.output.push(line.to_string());
                }
                "undef" => {
                    self.defines.remove(identifier(rest));
                    self.output.push(line.to_string());
                }
                "include" => self.include(rest, line_number, depth)?,
                "error" => {
                    return Err(PreprocessError::ErrorDirective {
                        line: line_number,
                        message: rest.to_string(),
                    })
                }
                _ => self.output.push(line.to_string()),
            }
        }
        Ok(())
    }

    fn condition(&self, expression: &str, line: usize) -> Result<bool, PreprocessError> {
        evaluate(expression, &self.defines).map_err(|reason| PreprocessError::InvalidExpression {
            line,
            expression: expression.to_string(),
            reason,
        })
    }

    fn include(&mut self, rest: &str, line: usize, depth: usize) -> Result<(), PreprocessError> {
        let malformed = || PreprocessError::MalformedInclude {
            line,
            text: rest.to_string(),
        };
        let inner = rest
            .strip_prefix('"')
            .and_then(|tail| tail.strip_suffix('"'))
            .ok_or_else(malformed)?;

        let (name, count) = match inner.split_once(',') {
            Some((name, count)) => (name.trim(), Some(count.trim())),
            None => (inner.trim(), None),
        };

        let chunk = self
            .includes
            .get(name)
            .ok_or_else(|| PreprocessError::MissingInclude {
                line,
                name: name.to_string(),
            })?
            .to_string();

        let repeat = match count {
            None => None,
            Some(count) => Some(self.resolve_count(count).ok_or_else(malformed)?),
        };

        let open = self.stack.len();
        match repeat {
            None => self.run(&chunk, depth + 1)?,
            Some(repeat) => {
                for index in 0..repeat {
                    let expanded = chunk.replace("{i}", &index.to_string());
                    self.run(&expanded, depth + 1)?;
                }
            }
        }
        if self.stack.len() != open {
            let opened = self.stack.last().map(|branch| branch.line).unwrap_or(line);
            return Err(PreprocessError::Unterminated { line: opened });
        }
        Ok(())
    }

    fn resolve_count(&self, count: &str) -> Option<usize> {
        count.parse::<usize>().ok().or_else(|| {
            self.defines
                .get(count)
                .and_then(|value| value.trim().parse::<usize>().ok())
        })
    }
}

fn identifier(text: &str) -> &str {
    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    &text[..end]
}

/// Removes `/* */` and `//` comments.
fn strip_comments(source: &str) -> String {
    let mut output = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_block = false;
    while let Some(c) = chars.next() {
        if in_block {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block = false;
            }
            continue;
        }
        match (c, chars.peek()) {
            ('/', Some('*')) => {
                chars.next();
                in_block = true;
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        output.push('\n');
                        break;
                    }
                }
            }
            _ => output.push(c),
        }
    }
    output
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    Not,
    And,
    Or,
    Cmp(&'static str),
    Open,
    Close,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let bytes = expression.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        let next = bytes.get(i + 1).map(|b| *b as char);
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp("=="));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp("!="));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                if next == Some('=') {
                    tokens.push(Token::Cmp(if c == '<' { "<=" } else { ">=" }));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(if c == '<' { "<" } else { ">" }));
                    i += 1;
                }
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
                let value = expression[start..i]
                    .parse::<i64>()
                    .map_err(|err| err.to_string())?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(expression[start..i].to_string()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    Ok(tokens)
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    position: usize,
    defines: &'a BTreeMap<String, String>,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn or(&mut self) -> Result<i64, String> {
        let mut value = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            let rhs = self.and()?;
            value = i64::from(value != 0 || rhs != 0);
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<i64, String> {
        let mut value = self.comparison()?;
        while self.peek() == Some(&Token::And) {
            self.position += 1;
            let rhs = self.comparison()?;
            value = i64::from(value != 0 && rhs != 0);
        }
        Ok(value)
    }

    fn comparison(&mut self) -> Result<i64, String> {
        let lhs = self.unary()?;
        let Some(Token::Cmp(op)) = self.peek().cloned() else {
            return Ok(lhs);
        };
        self.position += 1;
        let rhs = self.unary()?;
        let result = match op {
            "==" => lhs == rhs,
            "!=" => lhs != rhs,
            "<" => lhs < rhs,
            ">" => lhs > rhs,
            "<=" => lhs <= rhs,
            _ => lhs >= rhs,
        };
        Ok(i64::from(result))
    }

    fn unary(&mut self) -> Result<i64, String> {
        if self.peek() == Some(&Token::Not) {
            self.position += 1;
            let value = self.unary()?;
            return Ok(i64::from(value == 0));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<i64, String> {
        match self.next() {
            Some(Token::Int(value)) => Ok(value),
            Some(Token::Open) => {
                let value = self.or()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err("missing ')'".into()),
                }
            }
            Some(Token::Ident(name)) if name == "defined" => {
                let parenthesised = self.peek() == Some(&Token::Open);
                if parenthesised {
                    self.position += 1;
                }
                let Some(Token::Ident(target)) = self.next() else {
                    return Err("defined() expects a name".into());
                };
                if parenthesised && self.next() != Some(Token::Close) {
                    return Err("missing ')' after defined".into());
                }
                Ok(i64::from(self.defines.contains_key(&target)))
            }
            Some(Token::Ident(name)) => Ok(self.value_of(&name)),
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn value_of(&self, name: &str) -> i64 {
        match self.defines.get(name).map(|value| value.trim()) {
            None | Some("false") => 0,
            Some("") | Some("true") => 1,
            Some(value) => value.parse::<i64>().unwrap_or(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defines(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn run(source: &str, pairs: &[(&str, &str)]) -> String {
        preprocess(source, &defines(pairs), &ChunkRegistry::empty()).unwrap()
    }

    #[test]
    fn ifdef_selects_branches() {
        let source = "#ifdef SKIN\nskinned();\n#else\nrigid();\n#endif\n";
        assert_eq!(run(source, &[("SKIN", "")]), "skinned();\n");
        assert_eq!(run(source, &[]), "rigid();\n");
    }

    #[test]
    fn elif_chain_takes_first_match_only() {
        let source = "#if defined(A)\na\n#elif defined(B)\nb\n#elif defined(C)\nc\n#else\nnone\n#endif\n";
        assert_eq!(run(source, &[("B", ""), ("C", "")]), "b\n");
        assert_eq!(run(source, &[("C", "")]), "c\n");
        assert_eq!(run(source, &[]), "none\n");
    }

    #[test]
    fn nested_blocks_inside_inactive_branch_stay_inactive() {
        let source = "#ifdef OUTER\n#ifndef INNER\nx\n#endif\n#else\ny\n#endif\n";
        assert_eq!(run(source, &[]), "y\n");
        assert_eq!(run(source, &[("OUTER", "")]), "x\n");
    }

    #[test]
    fn define_and_undef_affect_later_lines() {
        let source = "#define FAST\n#ifdef FAST\nfast\n#endif\n#undef FAST\n#ifdef FAST\nstill\n#endif\n";
        assert_eq!(run(source, &[]), "#define FAST\nfast\n#undef FAST\n");
    }

    #[test]
    fn integer_defines_size_arrays() {
        let source = "uniform vec4 matrix_pose[BONE_VECTORS];\n";
        assert_eq!(
            run(source, &[("BONE_VECTORS", "192")]),
            "uniform vec4 matrix_pose[192];\n"
        );
    }

    #[test]
    fn comments_are_stripped() {
        let source = "a; // trailing\n/* block\nspanning */ b;\n";
        assert_eq!(run(source, &[]), "a;\n b;\n");
    }

    #[test]
    fn includes_expand_and_repeat() {
        let mut chunks = ChunkRegistry::empty();
        chunks.set("light", "light{i}();\n");
        chunks.set("header", "#ifdef HEADER\nheader();\n#endif\n");

        let source = "#include \"header\"\n#include \"light, COUNT\"\n";
        let output = preprocess(source, &defines(&[("COUNT", "3"), ("HEADER", "")]), &chunks)
            .unwrap();
        assert_eq!(output, "header();\nlight0();\nlight1();\nlight2();\n");
    }

    #[test]
    fn missing_include_is_an_error() {
        let err = preprocess("#include \"nope\"\n", &BTreeMap::new(), &ChunkRegistry::empty())
            .unwrap_err();
        assert!(matches!(err, PreprocessError::MissingInclude { .. }));
    }

    #[test]
    fn unbalanced_directives_are_errors() {
        let err = preprocess("#ifdef A\nx\n", &BTreeMap::new(), &ChunkRegistry::empty())
            .unwrap_err();
        assert_eq!(err, PreprocessError::Unterminated { line: 1 });

        let err = preprocess("#endif\n", &BTreeMap::new(), &ChunkRegistry::empty()).unwrap_err();
        assert!(matches!(err, PreprocessError::Unmatched { .. }));
    }

    #[test]
    fn error_directive_fails_only_when_active() {
        let source = "#ifdef BAD\n#error unsupported combination\n#endif\nok\n";
        assert_eq!(run(source, &[]), "ok\n");
        let err = preprocess(source, &defines(&[("BAD", "")]), &ChunkRegistry::empty())
            .unwrap_err();
        assert!(matches!(err, PreprocessError::ErrorDirective { .. }));
    }

    #[test]
    fn expressions_support_logic_and_comparisons() {
        let table = defines(&[("COUNT", "3"), ("FLAG", "")]);
        assert!(evaluate("defined(FLAG) && COUNT > 2", &table).unwrap());
        assert!(evaluate("!defined(MISSING) || 0", &table).unwrap());
        assert!(!evaluate("COUNT == 4", &table).unwrap());
        assert!(evaluate("(COUNT >= 3) && FLAG", &table).unwrap());
        assert!(evaluate("defined FLAG", &table).unwrap());
        assert!(evaluate("COUNT +", &table).is_err());
    }
}
