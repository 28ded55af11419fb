// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Recursive-descent parser for executable GraphQL documents

use thiserror::Error;

use super::lexer::{tokenize, Token};
use super::*;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("Lexer error: {0}")]
    Lexer(String),

    #[error("Unexpected token: expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("Invalid number literal: {0}")]
    InvalidNumber(String),

    #[error("Document does not contain any operation")]
    NoOperation,
}

/// Parse a complete executable document
pub fn parse_document(input: &str) -> Result<Document, ParserError> {
    let tokens = tokenize(input).map_err(ParserError::Lexer)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        document: Document::new(),
    };
    parser.parse_definitions()?;
    if parser.document.operations.is_empty() {
        return Err(ParserError::NoOperation);
    }
    Ok(parser.document)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    document: Document,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn peek_is_name(&self, name: &str) -> bool {
        matches!(self.peek(), Token::Name(n) if n == name)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn expect_token(&mut self, expected: Token) -> Result<(), ParserError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&expected.describe()))
        }
    }

    fn skip_if(&mut self, token: Token) -> bool {
        if *self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParserError {
        ParserError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.peek().describe(),
        }
    }

    fn expect_name(&mut self) -> Result<String, ParserError> {
        match self.peek() {
            Token::Name(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("Name")),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParserError> {
        if self.peek_is_name(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("\"{}\"", keyword)))
        }
    }

    fn parse_definitions(&mut self) -> Result<(), ParserError> {
        while *self.peek() != Token::Eof {
            let keyword = match self.peek() {
                Token::LeftBrace => None,
                Token::Name(keyword) => Some(keyword.clone()),
                _ => return Err(self.unexpected("definition")),
            };
            match keyword.as_deref() {
                None => {
                    let selection_set = self.parse_selection_set()?;
                    self.document.operations.push(OperationDefinition {
                        operation_type: OperationType::Query,
                        name: None,
                        variable_definitions: Vec::new(),
                        directives: Vec::new(),
                        selection_set,
                    });
                }
                Some("query" | "mutation" | "subscription") => self.parse_operation()?,
                Some("fragment") => self.parse_fragment()?,
                Some(_) => return Err(self.unexpected("definition")),
            }
        }
        Ok(())
    }

    fn parse_operation(&mut self) -> Result<(), ParserError> {
        let operation_type = match self.expect_name()?.as_str() {
            "mutation" => OperationType::Mutation,
            "subscription" => OperationType::Subscription,
            _ => OperationType::Query,
        };
        let name = if matches!(self.peek(), Token::Name(_)) {
            Some(self.expect_name()?)
        } else {
            None
        };
        let variable_definitions = if *self.peek() == Token::LeftParen {
            self.parse_variable_definitions()?
        } else {
            Vec::new()
        };
        let directives = self.parse_directives()?;
        let selection_set = self.parse_selection_set()?;
        self.document.operations.push(OperationDefinition {
            operation_type,
            name,
            variable_definitions,
            directives,
            selection_set,
        });
        Ok(())
    }

    fn parse_fragment(&mut self) -> Result<(), ParserError> {
        self.expect_keyword("fragment")?;
        let name = self.expect_name()?;
        if name == "on" {
            return Err(ParserError::UnexpectedToken {
                expected: "fragment name".to_string(),
                found: "Name \"on\"".to_string(),
            });
        }
        self.expect_keyword("on")?;
        let type_condition = self.expect_name()?;
        let directives = self.parse_directives()?;
        let selection_set = self.parse_selection_set()?;
        self.document.fragments.push(FragmentDefinition {
            name,
            type_condition,
            directives,
            selection_set,
        });
        Ok(())
    }

    fn parse_variable_definitions(&mut self) -> Result<Vec<VariableDefinition>, ParserError> {
        self.expect_token(Token::LeftParen)?;
        let mut definitions = Vec::new();
        while !self.skip_if(Token::RightParen) {
            self.expect_token(Token::Dollar)?;
            let name = self.expect_name()?;
            self.expect_token(Token::Colon)?;
            let type_ref = self.parse_type()?;
            let default_value = if self.skip_if(Token::Equals) {
                Some(self.parse_value()?)
            } else {
                None
            };
            // Directives on variable definitions carry no execution meaning here
            self.parse_directives()?;
            definitions.push(VariableDefinition {
                name,
                type_ref,
                default_value,
            });
        }
        Ok(definitions)
    }

    fn parse_type(&mut self) -> Result<TypeRef, ParserError> {
        let base = if self.skip_if(Token::LeftBracket) {
            let inner = self.parse_type()?;
            self.expect_token(Token::RightBracket)?;
            TypeRef::list(inner)
        } else {
            TypeRef::named(self.expect_name()?)
        };
        if self.skip_if(Token::Bang) {
            Ok(TypeRef::non_null(base))
        } else {
            Ok(base)
        }
    }

    fn parse_directives(&mut self) -> Result<Vec<Directive>, ParserError> {
        let mut directives = Vec::new();
        while self.skip_if(Token::At) {
            let name = self.expect_name()?;
            let arguments = self.parse_arguments()?;
            directives.push(Directive { name, arguments });
        }
        Ok(directives)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Argument>, ParserError> {
        let mut arguments = Vec::new();
        if !self.skip_if(Token::LeftParen) {
            return Ok(arguments);
        }
        while !self.skip_if(Token::RightParen) {
            let name = self.expect_name()?;
            self.expect_token(Token::Colon)?;
            let value = self.parse_value()?;
            arguments.push(Argument { name, value });
        }
        Ok(arguments)
    }

    fn parse_value(&mut self) -> Result<Value, ParserError> {
        match self.advance() {
            Token::Dollar => Ok(Value::Variable(self.expect_name()?)),
            Token::IntValue(literal) => literal
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| ParserError::InvalidNumber(literal)),
            Token::FloatValue(literal) => literal
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| ParserError::InvalidNumber(literal)),
            Token::StringValue(s) => Ok(Value::String(s)),
            Token::Name(name) => Ok(match name.as_str() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                "null" => Value::Null,
                _ => Value::Enum(name),
            }),
            Token::LeftBracket => {
                let mut items = Vec::new();
                while !self.skip_if(Token::RightBracket) {
                    items.push(self.parse_value()?);
                }
                Ok(Value::List(items))
            }
            Token::LeftBrace => {
                let mut fields = Vec::new();
                while !self.skip_if(Token::RightBrace) {
                    let name = self.expect_name()?;
                    self.expect_token(Token::Colon)?;
                    fields.push((name, self.parse_value()?));
                }
                Ok(Value::Object(fields))
            }
            other => Err(ParserError::UnexpectedToken {
                expected: "value".to_string(),
                found: other.describe(),
            }),
        }
    }

    fn parse_selection_set(&mut self) -> Result<usize, ParserError> {
        self.expect_token(Token::LeftBrace)?;
        let mut selections = Vec::new();
        while !self.skip_if(Token::RightBrace) {
            if *self.peek() == Token::Eof {
                return Err(self.unexpected("\"}\""));
            }
            selections.push(self.parse_selection()?);
        }
        if selections.is_empty() {
            return Err(ParserError::UnexpectedToken {
                expected: "selection".to_string(),
                found: Token::RightBrace.describe(),
            });
        }
        Ok(self.document.add_selection_set(SelectionSet { selections }))
    }

    fn parse_selection(&mut self) -> Result<Selection, ParserError> {
        if self.skip_if(Token::Spread) {
            let is_spread = matches!(self.peek(), Token::Name(n) if n != "on");
            if is_spread {
                let name = self.expect_name()?;
                let directives = self.parse_directives()?;
                let spread = self
                    .document
                    .add_fragment_spread(FragmentSpread { name, directives });
                return Ok(Selection::FragmentSpread(spread));
            }
            let type_condition = if self.peek_is_name("on") {
                self.advance();
                Some(self.expect_name()?)
            } else {
                None
            };
            let directives = self.parse_directives()?;
            let selection_set = self.parse_selection_set()?;
            let fragment = self.document.add_inline_fragment(InlineFragment {
                type_condition,
                directives,
                selection_set,
            });
            return Ok(Selection::InlineFragment(fragment));
        }

        let first = self.expect_name()?;
        let (alias, name) = if self.skip_if(Token::Colon) {
            (Some(first), self.expect_name()?)
        } else {
            (None, first)
        };
        let arguments = self.parse_arguments()?;
        let directives = self.parse_directives()?;
        let selection_set = if *self.peek() == Token::LeftBrace {
            Some(self.parse_selection_set()?)
        } else {
            None
        };
        let field = self.document.add_field(Field {
            alias,
            name,
            arguments,
            directives,
            selection_set,
        });
        Ok(Selection::Field(field))
    }
}
