use super::{BindingKind, Command, Declarations, Literal, Operand, Pipeline, SyntaxError, Token};
use crate::error::{ParseError, ParseErrorKind};
use chumsky::{input::ValueInput, prelude::*};

pub fn pipeline_parser<'code, I>()
-> impl Parser<'code, I, Pipeline, extra::Err<SyntaxError<'code, Token<'code>>>>
where
    I: ValueInput<'code, Token = Token<'code>, Span = SimpleSpan>,
{
    let commands = recursive(|commands| {
        let literal = choice((
            just(Token::True).to(Literal::Bool(true)),
            just(Token::False).to(Literal::Bool(false)),
            just(Token::Nil).to(Literal::Nil),
            select! { Token::Number(number) => number }.try_map(|number: &str, span| {
                parse_number(number).ok_or_else(|| Rich::custom(span, format!("invalid number `{number}`")))
            }),
            select! { Token::Text(text) => text }.try_map(|text: &str, span| {
                unescape(text)
                    .map(Literal::String)
                    .map_err(|message| Rich::custom(span, message))
            }),
            select! { Token::RawText(text) => Literal::String(text.to_owned()) },
        ));

        let operand = choice((
            just(Token::Dot).to(Operand::Dot),
            select! { Token::Field(field) => Operand::Field(split_path(field)) },
            select! { Token::Variable(variable) => variable_operand(variable) },
            literal.map(Operand::Literal),
            select! { Token::Identifier(name) => Operand::Function(name.to_owned()) },
            commands
                .delimited_by(just(Token::BracketRoundOpen), just(Token::BracketRoundClose))
                .map(|commands| {
                    Operand::Pipeline(Box::new(Pipeline {
                        declarations: None,
                        commands,
                    }))
                }),
        ));

        let call = select! { Token::Identifier(name) => name.to_owned() }
            .then(operand.clone().repeated().at_least(1).collect::<Vec<_>>())
            .map(|(function, arguments)| Command::Call { function, arguments });

        choice((call, operand.map(Command::Operand)))
            .separated_by(just(Token::Pipe))
            .at_least(1)
            .collect::<Vec<_>>()
    });

    let variable = select! {
        Token::Variable(variable) if variable.len() > 1 && !variable.contains('.') => variable[1..].to_owned()
    };

    let declarations = variable
        .separated_by(just(Token::Comma))
        .at_least(1)
        .at_most(2)
        .collect::<Vec<_>>()
        .then(choice((
            just(Token::Declare).to(BindingKind::Declare),
            just(Token::Assign).to(BindingKind::Assign),
        )))
        .map(|(variables, kind)| Declarations { kind, variables });

    declarations
        .or_not()
        .then(commands)
        .map(|(declarations, commands)| Pipeline {
            declarations,
            commands,
        })
}

/// Parses the tokens of one action into a pipeline. `offset` is the position
/// of the action body in the template source.
pub(super) fn parse_pipeline<'code>(
    tokens: &'code [(Token<'code>, SimpleSpan)],
    body_length: usize,
    offset: usize,
) -> Result<Pipeline, ParseError> {
    let input = tokens.map(SimpleSpan::from(body_length..body_length), |(token, span)| {
        (token, span)
    });
    pipeline_parser().parse(input).into_result().map_err(|errors| {
        let error = errors.into_iter().next();
        let (message, range) = match error {
            Some(error) => (error.to_string(), error.span().into_range()),
            None => ("invalid pipeline".to_owned(), 0..body_length),
        };
        ParseError::new(
            ParseErrorKind::Syntax(message),
            range.start + offset..range.end + offset,
        )
    })
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}

fn variable_operand(variable: &str) -> Operand {
    let body = &variable[1..];
    let (name, path) = body.split_once('.').unwrap_or((body, ""));
    Operand::Variable {
        name: name.to_owned(),
        path: split_path(path),
    }
}

fn parse_number(number: &str) -> Option<Literal> {
    if number.contains(['.', 'e', 'E']) {
        number.parse().ok().map(Literal::Float)
    } else {
        number.parse().ok().map(Literal::Int)
    }
}

/// Resolves the escapes of a double-quoted string body.
pub(super) fn unescape(text: &str) -> Result<String, String> {
    let mut output = String::with_capacity(text.len());
    let mut characters = text.chars();
    while let Some(character) = characters.next() {
        if character != '\\' {
            output.push(character);
            continue;
        }
        let escaped = match characters.next() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('a') => '\u{07}',
            Some('b') => '\u{08}',
            Some('f') => '\u{0C}',
            Some('v') => '\u{0B}',
            Some('0') => '\0',
            Some(quote @ ('\\' | '"' | '\'')) => quote,
            Some(prefix @ ('x' | 'u')) => {
                let width = if prefix == 'x' { 2 } else { 4 };
                let digits: String = characters.by_ref().take(width).collect();
                u32::from_str_radix(&digits, 16)
                    .ok()
                    .filter(|_| digits.len() == width)
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("invalid escape `\\{prefix}{digits}`"))?
            }
            Some(other) => return Err(format!("unknown escape sequence `\\{other}`")),
            None => return Err("unterminated escape sequence".to_owned()),
        };
        output.push(escaped);
    }
    Ok(output)
}
