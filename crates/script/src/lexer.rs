use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifiers and keywords; the parser tells them apart
    Word(String),
    /// Quoted string literal (content without quotes, escapes resolved)
    Str(String),
    Num(f64),
    // Punctuation
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Dot,
    Semi,
    Colon,
    Question,
    // Assignment
    Assign,
    PlusAssign,
    MinusAssign,
    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    // Comparison
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    Lt,
    Lte,
    Gt,
    Gte,
    // Logical
    Bang,
    AndAnd,
    OrOr,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
}

/// Three-, two- and one-character operators, longest first.
const OPERATORS: &[(&str, Token)] = &[
    ("===", Token::EqEqEq),
    ("!==", Token::NotEqEq),
    ("==", Token::EqEq),
    ("!=", Token::NotEq),
    ("<=", Token::Lte),
    (">=", Token::Gte),
    ("&&", Token::AndAnd),
    ("||", Token::OrOr),
    ("++", Token::PlusPlus),
    ("--", Token::MinusMinus),
    ("+=", Token::PlusAssign),
    ("-=", Token::MinusAssign),
    ("{", Token::LBrace),
    ("}", Token::RBrace),
    ("[", Token::LBracket),
    ("]", Token::RBracket),
    ("(", Token::LParen),
    (")", Token::RParen),
    (",", Token::Comma),
    (".", Token::Dot),
    (";", Token::Semi),
    (":", Token::Colon),
    ("?", Token::Question),
    ("=", Token::Assign),
    ("+", Token::Plus),
    ("-", Token::Minus),
    ("*", Token::Star),
    ("/", Token::Slash),
    ("%", Token::Percent),
    ("<", Token::Lt),
    (">", Token::Gt),
    ("!", Token::Bang),
];

pub fn lex(src: &str) -> Result<Vec<Spanned>, CompileError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0usize;
    let mut line: u32 = 1;

    while pos < chars.len() {
        let c = chars[pos];

        // Line comment
        if c == '/' && pos + 1 < chars.len() && chars[pos + 1] == '/' {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }

        // Block comment
        if c == '/' && pos + 1 < chars.len() && chars[pos + 1] == '*' {
            pos += 2;
            loop {
                if pos >= chars.len() {
                    return Err(CompileError::new(line, "unterminated block comment"));
                }
                if chars[pos] == '\n' {
                    line += 1;
                }
                if chars[pos] == '*' && pos + 1 < chars.len() && chars[pos + 1] == '/' {
                    pos += 2;
                    break;
                }
                pos += 1;
            }
            continue;
        }

        if c.is_whitespace() {
            if c == '\n' {
                line += 1;
            }
            pos += 1;
            continue;
        }

        let tok_line = line;

        // String literal, either quote style
        if c == '"' || c == '\'' {
            let quote = c;
            pos += 1;
            let mut s = String::new();
            loop {
                if pos >= chars.len() || chars[pos] == '\n' {
                    return Err(CompileError::new(tok_line, "unterminated string literal"));
                }
                let sc = chars[pos];
                if sc == quote {
                    pos += 1;
                    break;
                }
                if sc == '\\' {
                    pos += 1;
                    if pos >= chars.len() {
                        return Err(CompileError::new(tok_line, "unterminated escape in string"));
                    }
                    match chars[pos] {
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        'r' => s.push('\r'),
                        '0' => s.push('\0'),
                        'u' => {
                            let hex: String = chars.iter().skip(pos + 1).take(4).collect();
                            let code = u32::from_str_radix(&hex, 16)
                                .ok()
                                .filter(|_| hex.len() == 4)
                                .and_then(char::from_u32)
                                .ok_or_else(|| {
                                    CompileError::new(tok_line, "invalid \\u escape in string")
                                })?;
                            s.push(code);
                            pos += 4;
                        }
                        other => s.push(other),
                    }
                    pos += 1;
                    continue;
                }
                s.push(sc);
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Str(s),
                line: tok_line,
            });
            continue;
        }

        // Number
        if c.is_ascii_digit()
            || (c == '.' && pos + 1 < chars.len() && chars[pos + 1].is_ascii_digit())
        {
            let start = pos;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos < chars.len() && chars[pos] == '.' {
                pos += 1;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
                let mut look = pos + 1;
                if look < chars.len() && (chars[look] == '+' || chars[look] == '-') {
                    look += 1;
                }
                if look < chars.len() && chars[look].is_ascii_digit() {
                    pos = look;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
            }
            let s: String = chars[start..pos].iter().collect();
            let n: f64 = s
                .parse()
                .map_err(|_| CompileError::new(tok_line, format!("invalid number '{}'", s)))?;
            tokens.push(Spanned {
                token: Token::Num(n),
                line: tok_line,
            });
            continue;
        }

        // Identifier or keyword
        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = pos;
            while pos < chars.len()
                && (chars[pos].is_alphanumeric() || chars[pos] == '_' || chars[pos] == '$')
            {
                pos += 1;
            }
            let w: String = chars[start..pos].iter().collect();
            tokens.push(Spanned {
                token: Token::Word(w),
                line: tok_line,
            });
            continue;
        }

        let rest = &chars[pos..];
        let op = OPERATORS.iter().find(|(text, _)| {
            let n = text.chars().count();
            rest.len() >= n && text.chars().zip(rest.iter()).all(|(a, b)| a == *b)
        });
        match op {
            Some((text, token)) => {
                tokens.push(Spanned {
                    token: token.clone(),
                    line: tok_line,
                });
                pos += text.chars().count();
            }
            None => {
                return Err(CompileError::new(
                    tok_line,
                    format!("unexpected character '{}'", c),
                ));
            }
        }
    }

    tokens.push(Spanned {
        token: Token::Eof,
        line,
    });
    Ok(tokens)
}
