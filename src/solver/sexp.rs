//! Minimal s-expressions for SMT-LIB 2 scripts and solver responses.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

impl Sexp {
    pub fn atom<S: Into<String>>(s: S) -> Sexp {
        Sexp::Atom(s.into())
    }

    pub fn list(items: Vec<Sexp>) -> Sexp {
        Sexp::List(items)
    }

    /// `(head arg0 arg1 …)`
    pub fn app(head: &str, args: Vec<Sexp>) -> Sexp {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(Sexp::atom(head));
        items.extend(args);
        Sexp::List(items)
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Sexp::Atom(s) => Some(s),
            Sexp::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexp]> {
        match self {
            Sexp::List(items) => Some(items),
            Sexp::Atom(_) => None,
        }
    }

    /// Parses one complete s-expression, ignoring surrounding whitespace.
    pub fn parse(input: &str) -> Result<Sexp, String> {
        let tokens = tokenize(input)?;
        let mut pos = 0;
        let sexp = parse_tokens(&tokens, &mut pos)?;
        if pos != tokens.len() {
            return Err(format!("trailing tokens after s-expression: {}", input));
        }
        Ok(sexp)
    }
}

fn tokenize(input: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '(' | ')' => {
                tokens.push(c.to_string());
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' => {
                // quoted symbol, delimiters included
                let mut atom = String::new();
                atom.push(chars.next().unwrap());
                loop {
                    match chars.next() {
                        Some('|') => {
                            atom.push('|');
                            break;
                        }
                        Some(c) => atom.push(c),
                        None => return Err("unterminated quoted symbol".into()),
                    }
                }
                tokens.push(atom);
            }
            '"' => {
                let mut atom = String::new();
                atom.push(chars.next().unwrap());
                loop {
                    match chars.next() {
                        Some('"') => {
                            atom.push('"');
                            break;
                        }
                        Some(c) => atom.push(c),
                        None => return Err("unterminated string literal".into()),
                    }
                }
                tokens.push(atom);
            }
            _ => {
                let mut atom = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' {
                        break;
                    }
                    atom.push(c);
                    chars.next();
                }
                tokens.push(atom);
            }
        }
    }
    Ok(tokens)
}

fn parse_tokens(tokens: &[String], pos: &mut usize) -> Result<Sexp, String> {
    match tokens.get(*pos) {
        None => Err("unexpected end of input".into()),
        Some(t) if t == "(" => {
            *pos += 1;
            let mut items = Vec::new();
            loop {
                match tokens.get(*pos) {
                    None => return Err("unbalanced parenthesis".into()),
                    Some(t) if t == ")" => {
                        *pos += 1;
                        return Ok(Sexp::List(items));
                    }
                    Some(_) => items.push(parse_tokens(tokens, pos)?),
                }
            }
        }
        Some(t) if t == ")" => Err("unexpected closing parenthesis".into()),
        Some(t) => {
            *pos += 1;
            Ok(Sexp::Atom(t.clone()))
        }
    }
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sexp::Atom(s) => write!(f, "{}", s),
            Sexp::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_lists() {
        let text = "((|x| #x0a) (fp #b0 #b11111111 #b010))";
        let sexp = Sexp::parse(text).unwrap();
        assert_eq!(sexp.to_string(), text);
    }

    #[test]
    fn parses_atoms_and_rejects_garbage() {
        assert_eq!(Sexp::parse(" sat\n").unwrap(), Sexp::atom("sat"));
        assert!(Sexp::parse("(a (b)").is_err());
        assert!(Sexp::parse("a b").is_err());
    }
}
