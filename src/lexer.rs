use std::fmt;
use std::io::{self, Read};

/// Smallest lexical unit of a scry program.
///
/// `Char` covers everything that isn't a keyword, identifier, or number:
/// operators, parentheses, commas, semicolons. The lexer never fails -
/// any byte sequence produces some token.
#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Def,
    Extern,
    Ident(String),
    Number(f64),
    Char(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "<eof>"),
            Token::Def => write!(f, "def"),
            Token::Extern => write!(f, "extern"),
            Token::Ident(name) => write!(f, "{}", name),
            Token::Number(value) => write!(f, "{}", value),
            Token::Char(c) => write!(f, "'{}'", c),
        }
    }
}

/// Streaming tokenizer over a blocking character source.
///
/// Holds exactly one character of lookahead across calls, so tokens can be
/// pulled one at a time from an interactive stream without buffering whole
/// lines. `lookahead` of `None` means the source is exhausted.
pub struct Lexer<R: Read> {
    input: io::Bytes<R>,
    lookahead: Option<char>,
}

impl<R: Read> Lexer<R> {
    pub fn new(input: R) -> Self {
        Lexer {
            input: input.bytes(),
            lookahead: Some(' '),
        }
    }

    // A read error ends the stream the same way end-of-input does; the
    // session terminates cleanly either way.
    fn next_char(&mut self) -> Option<char> {
        self.input.next().and_then(|b| b.ok()).map(char::from)
    }

    pub fn next_token(&mut self) -> Token {
        let mut c = match self.lookahead {
            Some(c) => c,
            None => return Token::Eof,
        };

        while c.is_whitespace() {
            c = match self.next_char() {
                Some(next) => next,
                None => {
                    self.lookahead = None;
                    return Token::Eof;
                }
            };
        }

        if c.is_alphabetic() {
            let mut ident = c.to_string();
            loop {
                match self.next_char() {
                    Some(next) if next.is_alphanumeric() => ident.push(next),
                    other => {
                        self.lookahead = other;
                        break;
                    }
                }
            }
            return match ident.as_str() {
                "def" => Token::Def,
                "extern" => Token::Extern,
                _ => Token::Ident(ident),
            };
        }

        if c.is_ascii_digit() || c == '.' {
            let mut text = c.to_string();
            loop {
                match self.next_char() {
                    Some(next) if next.is_ascii_digit() || next == '.' => text.push(next),
                    other => {
                        self.lookahead = other;
                        break;
                    }
                }
            }
            return Token::Number(number_value(&text));
        }

        if c == '#' {
            loop {
                match self.next_char() {
                    Some('\n') | Some('\r') => {
                        self.lookahead = Some(' ');
                        return self.next_token();
                    }
                    Some(_) => {}
                    None => {
                        self.lookahead = None;
                        return Token::Eof;
                    }
                }
            }
        }

        self.lookahead = self.next_char();
        Token::Char(c)
    }
}

/// strtod-style permissive parse: the longest parseable prefix wins, and a
/// run that parses nowhere (e.g. a lone ".") is 0.0. This is how "1.2.3"
/// silently becomes 1.2 - preserved behavior, not a validated grammar.
fn number_value(text: &str) -> f64 {
    (1..=text.len())
        .rev()
        .find_map(|end| text[..end].parse().ok())
        .unwrap_or(0.0)
}
