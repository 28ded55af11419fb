// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lexer for executable GraphQL documents
//!
//! Every parser in the `alt()` chain must either consume input or fail.
//! The tokenize loop rejects any step that returns the input unchanged, so a
//! parser that matches the empty string shows up as an error instead of a hang.
//! Insignificant characters (whitespace, commas, the BOM) and comments are
//! lexed as tokens and dropped by the loop.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{alpha1, alphanumeric1, char, digit1, one_of},
    combinator::{map, opt, recognize},
    error::{Error, ErrorKind},
    multi::many0,
    sequence::{pair, tuple},
    IResult,
};

/// Token types for GraphQL documents
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    IntValue(String),
    FloatValue(String),
    StringValue(String),

    Bang,
    Dollar,
    Amp,
    LeftParen,
    RightParen,
    Spread,
    Colon,
    Equals,
    At,
    LeftBracket,
    RightBracket,
    LeftBrace,
    Pipe,
    RightBrace,

    Ignored,
    Comment,
    Eof,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Name(name) => format!("Name \"{}\"", name),
            Token::IntValue(v) => format!("Int \"{}\"", v),
            Token::FloatValue(v) => format!("Float \"{}\"", v),
            Token::StringValue(v) => format!("String \"{}\"", v),
            Token::Bang => "\"!\"".to_string(),
            Token::Dollar => "\"$\"".to_string(),
            Token::Amp => "\"&\"".to_string(),
            Token::LeftParen => "\"(\"".to_string(),
            Token::RightParen => "\")\"".to_string(),
            Token::Spread => "\"...\"".to_string(),
            Token::Colon => "\":\"".to_string(),
            Token::Equals => "\"=\"".to_string(),
            Token::At => "\"@\"".to_string(),
            Token::LeftBracket => "\"[\"".to_string(),
            Token::RightBracket => "\"]\"".to_string(),
            Token::LeftBrace => "\"{\"".to_string(),
            Token::Pipe => "\"|\"".to_string(),
            Token::RightBrace => "\"}\"".to_string(),
            Token::Ignored | Token::Comment => "<ignored>".to_string(),
            Token::Eof => "<EOF>".to_string(),
        }
    }
}

fn ignored(input: &str) -> IResult<&str, Token> {
    map(
        take_while1(|c: char| c.is_whitespace() || c == ',' || c == '\u{feff}'),
        |_| Token::Ignored,
    )(input)
}

fn comment(input: &str) -> IResult<&str, Token> {
    map(
        pair(char('#'), take_while(|c: char| c != '\n' && c != '\r')),
        |_| Token::Comment,
    )(input)
}

fn punctuator(input: &str) -> IResult<&str, Token> {
    alt((
        map(tag("..."), |_| Token::Spread),
        map(char('!'), |_| Token::Bang),
        map(char('$'), |_| Token::Dollar),
        map(char('&'), |_| Token::Amp),
        map(char('('), |_| Token::LeftParen),
        map(char(')'), |_| Token::RightParen),
        map(char(':'), |_| Token::Colon),
        map(char('='), |_| Token::Equals),
        map(char('@'), |_| Token::At),
        map(char('['), |_| Token::LeftBracket),
        map(char(']'), |_| Token::RightBracket),
        map(char('{'), |_| Token::LeftBrace),
        map(char('|'), |_| Token::Pipe),
        map(char('}'), |_| Token::RightBrace),
    ))(input)
}

fn name(input: &str) -> IResult<&str, Token> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
        |s: &str| Token::Name(s.to_string()),
    )(input)
}

fn number(input: &str) -> IResult<&str, Token> {
    let parsed: IResult<&str, (Option<char>, &str, Option<&str>, Option<&str>)> = tuple((
        opt(char('-')),
        digit1,
        opt(recognize(pair(char('.'), digit1))),
        opt(recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))),
    ))(input);
    let (rest, (sign, int_part, fraction, exponent)) = parsed?;

    let mut literal = String::new();
    if sign.is_some() {
        literal.push('-');
    }
    literal.push_str(int_part);
    if fraction.is_none() && exponent.is_none() {
        return Ok((rest, Token::IntValue(literal)));
    }
    if let Some(fraction) = fraction {
        literal.push_str(fraction);
    }
    if let Some(exponent) = exponent {
        literal.push_str(exponent);
    }
    Ok((rest, Token::FloatValue(literal)))
}

fn block_string(input: &str) -> IResult<&str, Token> {
    let opened: IResult<&str, &str> = tag("\"\"\"")(input);
    let (body, _) = opened?;
    match body.find("\"\"\"") {
        Some(end) => {
            let raw = &body[..end];
            let value = dedent_block_string(&raw.replace("\\\"\"\"", "\"\"\""));
            Ok((&body[end + 3..], Token::StringValue(value)))
        }
        None => Err(nom::Err::Failure(Error::new(input, ErrorKind::TakeUntil))),
    }
}

fn dedent_block_string(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let indent = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out: Vec<&str> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| if i == 0 || l.len() < indent { *l } else { &l[indent..] })
        .collect();
    while out.first().map_or(false, |l| l.trim().is_empty()) {
        out.remove(0);
    }
    while out.last().map_or(false, |l| l.trim().is_empty()) {
        out.pop();
    }
    out.join("\n")
}

fn string(input: &str) -> IResult<&str, Token> {
    let opened: IResult<&str, char> = char('"')(input);
    let (body, _) = opened?;
    let mut value = String::new();
    let mut chars = body.char_indices();
    while let Some((offset, c)) = chars.next() {
        match c {
            '"' => return Ok((&body[offset + 1..], Token::StringValue(value))),
            '\n' | '\r' => break,
            '\\' => match chars.next() {
                Some((_, '"')) => value.push('"'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, '/')) => value.push('/'),
                Some((_, 'b')) => value.push('\u{0008}'),
                Some((_, 'f')) => value.push('\u{000c}'),
                Some((_, 'n')) => value.push('\n'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, 't')) => value.push('\t'),
                Some((start, 'u')) => {
                    let hex = body.get(start + 1..start + 5).unwrap_or("");
                    let decoded = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
                    match decoded {
                        Some(ch) if hex.len() == 4 => {
                            value.push(ch);
                            for _ in 0..4 {
                                chars.next();
                            }
                        }
                        _ => break,
                    }
                }
                _ => break,
            },
            other => value.push(other),
        }
    }
    Err(nom::Err::Failure(Error::new(input, ErrorKind::Char)))
}

/// Main token parser - specific patterns before general ones
fn token(input: &str) -> IResult<&str, Token> {
    alt((
        ignored,
        comment,
        block_string,
        string,
        number,
        name,
        punctuator,
    ))(input)
}

/// GraphQL lexer
pub struct Lexer<'a> {
    input: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input }
    }

    /// Tokenize the whole input, terminated by [`Token::Eof`]
    pub fn tokenize(&mut self) -> Result<Vec<Token>, String> {
        let mut remaining = self.input;
        let mut tokens = Vec::new();

        while !remaining.is_empty() {
            match token(remaining) {
                Ok((next_remaining, token)) => {
                    if next_remaining.len() == remaining.len() {
                        return Err(format!(
                            "Parser function not consuming input. Token: {:?}, Remaining: '{}'",
                            token, remaining
                        ));
                    }
                    if !matches!(token, Token::Ignored | Token::Comment) {
                        tokens.push(token);
                    }
                    remaining = next_remaining;
                }
                Err(_) => {
                    let offset = self.input.len() - remaining.len();
                    let snippet: String = remaining.chars().take(10).collect();
                    return Err(format!(
                        "Unexpected character at offset {}: '{}'",
                        offset, snippet
                    ));
                }
            }
        }

        tokens.push(Token::Eof);
        Ok(tokens)
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    Lexer::new(input).tokenize()
}
