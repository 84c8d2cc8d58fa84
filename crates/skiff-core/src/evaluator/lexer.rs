//! Tokenizer for the CommonJS-flavoured script subset.

use super::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    // keywords
    Var,
    Let,
    Const,
    Function,
    Return,
    If,
    Else,
    True,
    False,
    Null,
    Undefined,
    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    Arrow,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
    /// A line break occurred between the previous token and this one; used
    /// for statement termination without explicit semicolons.
    pub newline_before: bool,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line: u32 = 1;
    let mut newline_before = false;

    macro_rules! push {
        ($tok:expr) => {{
            tokens.push(Token {
                tok: $tok,
                line,
                newline_before,
            });
            newline_before = false;
        }};
    }

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                newline_before = true;
                i += 1;
            }
            ' ' | '\t' | '\r' => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                loop {
                    match (chars.get(i), chars.get(i + 1)) {
                        (Some('*'), Some('/')) => {
                            i += 2;
                            break;
                        }
                        (Some('\n'), _) => {
                            line += 1;
                            newline_before = true;
                            i += 1;
                        }
                        (Some(_), _) => i += 1,
                        (None, _) => {
                            return Err(EvalError::Parse {
                                message: "unterminated block comment".into(),
                                line,
                            });
                        }
                    }
                }
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut text = String::new();
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            i += 1;
                            let escaped = chars.get(i).copied().ok_or(EvalError::Parse {
                                message: "unterminated string".into(),
                                line,
                            })?;
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '0' => '\0',
                                other => other,
                            });
                            i += 1;
                        }
                        Some('\n') | None => {
                            return Err(EvalError::Parse {
                                message: "unterminated string".into(),
                                line,
                            });
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                push!(Tok::Str(text));
            }
            '0'..='9' => {
                let start = i;
                let mut saw_dot = false;
                while i < chars.len() {
                    match chars[i] {
                        '0'..='9' => i += 1,
                        '.' if !saw_dot && matches!(chars.get(i + 1), Some('0'..='9')) => {
                            saw_dot = true;
                            i += 1;
                        }
                        _ => break,
                    }
                }
                // Exponent suffix (JSON payloads carry these).
                if matches!(chars.get(i), Some('e' | 'E')) {
                    let mut j = i + 1;
                    if matches!(chars.get(j), Some('+' | '-')) {
                        j += 1;
                    }
                    if matches!(chars.get(j), Some('0'..='9')) {
                        i = j;
                        while matches!(chars.get(i), Some('0'..='9')) {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse::<f64>().map_err(|_| EvalError::Parse {
                    message: format!("invalid number literal '{text}'"),
                    line,
                })?;
                push!(Tok::Num(value));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                push!(match word.as_str() {
                    "var" => Tok::Var,
                    "let" => Tok::Let,
                    "const" => Tok::Const,
                    "function" => Tok::Function,
                    "return" => Tok::Return,
                    "if" => Tok::If,
                    "else" => Tok::Else,
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" => Tok::Null,
                    "undefined" => Tok::Undefined,
                    _ => Tok::Ident(word),
                });
            }
            _ => {
                let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let three: String = chars[i..chars.len().min(i + 3)].iter().collect();
                let (tok, width) = match (three.as_str(), two.as_str(), c) {
                    ("===", _, _) => (Tok::EqEqEq, 3),
                    ("!==", _, _) => (Tok::NotEqEq, 3),
                    (_, "==", _) => (Tok::EqEq, 2),
                    (_, "!=", _) => (Tok::NotEq, 2),
                    (_, "=>", _) => (Tok::Arrow, 2),
                    (_, "<=", _) => (Tok::Le, 2),
                    (_, ">=", _) => (Tok::Ge, 2),
                    (_, "&&", _) => (Tok::AndAnd, 2),
                    (_, "||", _) => (Tok::OrOr, 2),
                    (_, _, '=') => (Tok::Assign, 1),
                    (_, _, '!') => (Tok::Bang, 1),
                    (_, _, '<') => (Tok::Lt, 1),
                    (_, _, '>') => (Tok::Gt, 1),
                    (_, _, '+') => (Tok::Plus, 1),
                    (_, _, '-') => (Tok::Minus, 1),
                    (_, _, '*') => (Tok::Star, 1),
                    (_, _, '/') => (Tok::Slash, 1),
                    (_, _, '%') => (Tok::Percent, 1),
                    (_, _, '(') => (Tok::LParen, 1),
                    (_, _, ')') => (Tok::RParen, 1),
                    (_, _, '{') => (Tok::LBrace, 1),
                    (_, _, '}') => (Tok::RBrace, 1),
                    (_, _, '[') => (Tok::LBracket, 1),
                    (_, _, ']') => (Tok::RBracket, 1),
                    (_, _, ',') => (Tok::Comma, 1),
                    (_, _, ';') => (Tok::Semi, 1),
                    (_, _, ':') => (Tok::Colon, 1),
                    (_, _, '.') => (Tok::Dot, 1),
                    _ => {
                        return Err(EvalError::Parse {
                            message: format!("unexpected character '{c}'"),
                            line,
                        });
                    }
                };
                i += width;
                push!(tok);
            }
        }
    }

    tokens.push(Token {
        tok: Tok::Eof,
        line,
        newline_before,
    });
    Ok(tokens)
}
