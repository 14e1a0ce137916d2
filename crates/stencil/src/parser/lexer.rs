use super::SyntaxError;
use chumsky::prelude::*;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'code> {
    BracketRoundOpen,
    BracketRoundClose,
    Pipe,
    Comma,
    Declare,
    Assign,
    Dot,
    // `.Name` or `.Name.Sub`
    Field(&'code str),
    // `$`, `$name`, `$.Name`, `$name.Sub`
    Variable(&'code str),
    Identifier(&'code str),
    Number(&'code str),
    // Double-quoted, escapes still in place.
    Text(&'code str),
    RawText(&'code str),
    If,
    Else,
    End,
    Range,
    With,
    Define,
    Template,
    Block,
    True,
    False,
    Nil,
}

impl<'code> Token<'code> {
    pub fn into_cow_str(self) -> Cow<'code, str> {
        match self {
            Self::BracketRoundOpen => "(".into(),
            Self::BracketRoundClose => ")".into(),
            Self::Pipe => "|".into(),
            Self::Comma => ",".into(),
            Self::Declare => ":=".into(),
            Self::Assign => "=".into(),
            Self::Dot => ".".into(),
            Self::Field(field) => field.into(),
            Self::Variable(variable) => variable.into(),
            Self::Identifier(identifier) => identifier.into(),
            Self::Number(number) => number.into(),
            Self::Text(text) => format!("\"{text}\"").into(),
            Self::RawText(text) => format!("`{text}`").into(),
            Self::If => "if".into(),
            Self::Else => "else".into(),
            Self::End => "end".into(),
            Self::Range => "range".into(),
            Self::With => "with".into(),
            Self::Define => "define".into(),
            Self::Template => "template".into(),
            Self::Block => "block".into(),
            Self::True => "true".into(),
            Self::False => "false".into(),
            Self::Nil => "nil".into(),
        }
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.into_cow_str())
    }
}

/// Lexes the body of one action, the text between `{{` and `}}` with trim
/// markers already removed. Spans are relative to the body.
pub fn lexer<'code>()
-> impl Parser<'code, &'code str, Vec<(Token<'code>, SimpleSpan)>, extra::Err<SyntaxError<'code, char>>> {
    let identifier = any()
        .filter(|character: &char| character.is_alphabetic() || *character == '_')
        .then(
            any()
                .filter(|character: &char| character.is_alphanumeric() || *character == '_')
                .repeated(),
        )
        .to_slice();

    let bracket = choice((
        just('(').to(Token::BracketRoundOpen),
        just(')').to(Token::BracketRoundClose),
    ));

    let punctuation = choice((
        just(":=").to(Token::Declare),
        just('=').to(Token::Assign),
        just('|').to(Token::Pipe),
        just(',').to(Token::Comma),
    ));

    let field = just('.')
        .then(identifier.clone())
        .repeated()
        .at_least(1)
        .to_slice()
        .map(Token::Field);

    let dot = just('.').to(Token::Dot);

    let variable = just('$')
        .then(identifier.clone().or_not())
        .then(just('.').then(identifier.clone()).repeated())
        .to_slice()
        .map(Token::Variable);

    let number = just('-')
        .or_not()
        .then(text::int(10))
        .then(just('.').then(text::digits(10)).or_not())
        .then(
            one_of("eE")
                .then(one_of("+-").or_not())
                .then(text::digits(10))
                .or_not(),
        )
        .to_slice()
        .map(Token::Number);

    let quoted = just('"')
        .ignore_then(
            just('\\')
                .then(any())
                .ignored()
                .or(none_of("\\\"").ignored())
                .repeated()
                .to_slice(),
        )
        .then_ignore(just('"'))
        .map(Token::Text);

    let raw_text = just('`')
        .ignore_then(none_of('`').repeated().to_slice())
        .then_ignore(just('`'))
        .map(Token::RawText);

    let keyword_or_identifier = identifier.map(|word: &'code str| match word {
        "if" => Token::If,
        "else" => Token::Else,
        "end" => Token::End,
        "range" => Token::Range,
        "with" => Token::With,
        "define" => Token::Define,
        "template" => Token::Template,
        "block" => Token::Block,
        "true" => Token::True,
        "false" => Token::False,
        "nil" => Token::Nil,
        _ => Token::Identifier(word),
    });

    let token = choice((
        variable,
        field,
        dot,
        number,
        quoted,
        raw_text,
        bracket,
        punctuation,
        keyword_or_identifier,
    ));

    token
        .map_with(|token, extra| (token, extra.span()))
        .padded()
        .repeated()
        .collect()
}
