//! # Route Pattern Compiler
//!
//! Compiles the route pattern mini-language into an anchored regex.
//!
//! ## Syntax
//!
//! - `users` - literal segment, compared case-insensitively
//! - `{id}` / `{int:id}` - one non-empty segment, typed by the specifier
//! - `(sub)?` - optional group
//! - `[sub]+` - group repeated one or more times
//! - `*` - the rest of the URL, zero or more segments
//!
//! Leading, trailing and repeated slashes are insignificant. A pattern must
//! cover the whole URL; only `*` can absorb a remainder.

use crate::error::{Error, Result};
use crate::types::{cast_param, parse_param_pattern, ParamDescriptor, ParamType, Params};
use regex::Regex;
use std::fmt;
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};

/// Name under which a `*` wildcard reports the matched remainder
pub const WILDCARD_PARAM: &str = "*";

/// One element of a parsed route pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Literal text, slashes included
    Literal(String),
    /// `{type:name}` capture
    Capture(ParamDescriptor),
    /// `(sub)?`
    OptionalGroup(Vec<Token>),
    /// `[sub]+`
    RepeatGroup(Vec<Token>),
    /// `*`
    Wildcard,
}

/// A compiled route pattern
///
/// Immutable once compiled. Cloning shares nothing mutable, so a pattern can
/// be copied into every router it is mounted under.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    source: String,
    tokens: Vec<Token>,
    params: Vec<ParamDescriptor>,
    matcher: Regex,
}

impl RoutePattern {
    /// Compile a pattern string
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for unbalanced `{`, `(` or `[`,
    /// a group without its quantifier, or an empty capture name.
    pub fn compile(source: &str) -> Result<Self> {
        let normalized = normalize_path(source);
        let tokens = if normalized.is_empty() {
            Vec::new()
        } else {
            let prefixed = format!("/{normalized}");
            let mut chars = prefixed.char_indices().peekable();
            parse_sequence(source, &mut chars, None)?
        };

        let mut params = Vec::new();
        let mut body = String::from("(?i)^");
        emit(&tokens, &mut body, &mut params, String::new());
        body.push('$');

        let matcher =
            Regex::new(&body).map_err(|e| Error::invalid_pattern(source, e.to_string()))?;

        Ok(Self {
            source: normalized,
            tokens,
            params,
            matcher,
        })
    }

    /// The normalized pattern text
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed tokens
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Capture descriptors in the order they appear in the pattern
    #[must_use]
    pub fn params(&self) -> &[ParamDescriptor] {
        &self.params
    }

    /// Check whether a resolved URL matches
    #[must_use]
    pub fn is_match(&self, resolved_url: &str) -> bool {
        self.matcher.is_match(&match_target(resolved_url))
    }

    /// Match a resolved URL and cast every capture
    ///
    /// A capture that did not take part in the match (a skipped optional
    /// group, a wildcard over zero segments) is cast from the empty string.
    #[must_use]
    pub fn captures(&self, resolved_url: &str) -> Option<Params> {
        let target = match_target(resolved_url);
        let caps = self.matcher.captures(&target)?;

        let mut params = Params::new();
        for (index, descriptor) in self.params.iter().enumerate() {
            let raw = caps.get(index + 1).map_or("", |m| m.as_str());
            params.push(descriptor.name.clone(), cast_param(raw, descriptor.param_type));
        }
        Some(params)
    }

    /// This pattern under a mount prefix
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the prefix itself is malformed.
    pub fn prefixed(&self, base: &str) -> Result<Self> {
        Self::compile(&join_paths(base, &self.source))
    }
}

impl FromStr for RoutePattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::compile(s)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Resolve a request path into the form patterns are matched against
///
/// Drops any query string, trims and collapses slashes, and lower-cases.
#[must_use]
pub fn resolve_url(path: &str) -> String {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    normalize_path(path).to_ascii_lowercase()
}

/// Join a mount prefix and a pattern with exactly one slash between them
#[must_use]
pub fn join_paths(base: &str, path: &str) -> String {
    let base = normalize_path(base);
    let path = normalize_path(path);
    match (base.is_empty(), path.is_empty()) {
        (true, _) => path,
        (_, true) => base,
        _ => format!("{base}/{path}"),
    }
}

fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn match_target(resolved_url: &str) -> String {
    if resolved_url.is_empty() {
        String::new()
    } else {
        format!("/{resolved_url}")
    }
}

fn parse_sequence(
    source: &str,
    chars: &mut Peekable<CharIndices<'_>>,
    close: Option<char>,
) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();

    while let Some((_, c)) = chars.next() {
        match c {
            '{' => tokens.push(Token::Capture(parse_capture(source, chars)?)),
            '(' => {
                let group = parse_group(source, chars, ')', '?')?;
                tokens.push(Token::OptionalGroup(group));
            }
            '[' => {
                let group = parse_group(source, chars, ']', '+')?;
                tokens.push(Token::RepeatGroup(group));
            }
            ')' | ']' if close == Some(c) => return Ok(tokens),
            ')' | ']' | '}' => {
                return Err(Error::invalid_pattern(source, format!("unexpected '{c}'")));
            }
            '*' => tokens.push(Token::Wildcard),
            _ => match tokens.last_mut() {
                Some(Token::Literal(text)) => text.push(c),
                _ => tokens.push(Token::Literal(c.to_string())),
            },
        }
    }

    match close {
        Some(c) => Err(Error::invalid_pattern(source, format!("missing closing '{c}'"))),
        None => Ok(tokens),
    }
}

fn parse_group(
    source: &str,
    chars: &mut Peekable<CharIndices<'_>>,
    close: char,
    quantifier: char,
) -> Result<Vec<Token>> {
    let group = parse_sequence(source, chars, Some(close))?;
    if group.is_empty() {
        return Err(Error::invalid_pattern(source, "empty group"));
    }
    match chars.next() {
        Some((_, q)) if q == quantifier => Ok(group),
        _ => Err(Error::invalid_pattern(
            source,
            format!("expected '{quantifier}' after '{close}'"),
        )),
    }
}

fn parse_capture(source: &str, chars: &mut Peekable<CharIndices<'_>>) -> Result<ParamDescriptor> {
    let mut inner = String::new();
    loop {
        match chars.next() {
            Some((_, '}')) => break,
            Some((_, c @ ('{' | '/'))) => {
                return Err(Error::invalid_pattern(
                    source,
                    format!("'{c}' inside a capture"),
                ));
            }
            Some((_, c)) => inner.push(c),
            None => return Err(Error::invalid_pattern(source, "missing closing '}'")),
        }
    }

    let descriptor = parse_param_pattern(&format!("{{{inner}}}"))
        .ok_or_else(|| Error::invalid_pattern(source, "malformed capture"))?;
    if descriptor.name.is_empty() {
        return Err(Error::invalid_pattern(source, "empty capture name"));
    }
    Ok(descriptor)
}

/// Append the regex for `tokens` to `out`
///
/// Every segment is emitted with its leading `/`. A group or wildcard at a
/// segment boundary takes that slash inside itself, so skipping it also
/// skips the separator; a boundary after a group is re-emitted once,
/// outside it. `pending` seeds the literal buffer. Returns whether the
/// sequence ended on a boundary, which is left for the caller to place.
fn emit(
    tokens: &[Token],
    out: &mut String,
    params: &mut Vec<ParamDescriptor>,
    mut pending: String,
) -> bool {
    for token in tokens {
        match token {
            Token::Literal(text) => push_literal(&mut pending, text),
            Token::Capture(descriptor) => {
                flush(&mut pending, out);
                out.push_str("([^/]+)");
                params.push(descriptor.clone());
            }
            Token::Wildcard => {
                let leading_slash = take_trailing_slash(&mut pending);
                flush(&mut pending, out);
                out.push_str(if leading_slash { "(?:/(.*))?" } else { "(.*)" });
                params.push(ParamDescriptor::new(WILDCARD_PARAM, ParamType::String));
            }
            Token::OptionalGroup(group) | Token::RepeatGroup(group) => {
                let (body, body_leads) = strip_leading_slash(group);
                let leading_slash = take_trailing_slash(&mut pending) || body_leads;
                flush(&mut pending, out);

                out.push_str("(?:");
                let seed = if leading_slash { "/" } else { "" };
                let trailing_slash = emit(&body, out, params, seed.to_string());
                out.push_str(if matches!(token, Token::OptionalGroup(_)) {
                    ")?"
                } else {
                    ")+"
                });

                if trailing_slash {
                    pending.push('/');
                }
            }
        }
    }

    let trailing_slash = take_trailing_slash(&mut pending);
    flush(&mut pending, out);
    trailing_slash
}

fn push_literal(pending: &mut String, text: &str) {
    if pending.ends_with('/') {
        pending.push_str(text.trim_start_matches('/'));
    } else {
        pending.push_str(text);
    }
}

fn strip_leading_slash(group: &[Token]) -> (Vec<Token>, bool) {
    let mut body = group.to_vec();
    let leads = match body.first_mut() {
        Some(Token::Literal(text)) if text.starts_with('/') => {
            *text = text.trim_start_matches('/').to_string();
            true
        }
        _ => false,
    };
    if matches!(body.first(), Some(Token::Literal(text)) if text.is_empty()) {
        body.remove(0);
    }
    (body, leads)
}

fn take_trailing_slash(pending: &mut String) -> bool {
    if pending.ends_with('/') {
        pending.pop();
        true
    } else {
        false
    }
}

fn flush(pending: &mut String, out: &mut String) {
    out.push_str(&regex::escape(pending));
    pending.clear();
}
