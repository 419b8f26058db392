//! Reading of the lisp-like syntax of PDDL into S-expressions.
//!
//! All atoms are lower-cased, and every atom and list keeps track of its origin in the source for diagnostics.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::errors::*;
use crate::pddl::input::Input;
use crate::sym::Sym;
use crate::utils::disp_iter;

pub type SAtom = Sym;

#[derive(Clone)]
pub struct SList {
    list: Vec<SExpr>,
    span: Span,
}

impl SList {
    pub fn iter(&self) -> ListIter<'_> {
        ListIter {
            elems: self.list.as_slice(),
            span: &self.span,
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

#[derive(Clone)]
pub enum SExpr {
    Atom(SAtom),
    List(SList),
}

impl SExpr {
    /// Returns true if this is an atom with the given (canonical) value.
    pub fn is_atom(&self, expected: &str) -> bool {
        self.as_atom().is_some_and(|a| a.canonical_str() == expected)
    }

    pub fn as_atom(&self) -> Option<&SAtom> {
        match self {
            SExpr::Atom(a) => Some(a),
            SExpr::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&SList> {
        match self {
            SExpr::Atom(_) => None,
            SExpr::List(l) => Some(l),
        }
    }

    pub fn as_list_iter(&self) -> Option<ListIter<'_>> {
        self.as_list().map(|l| l.iter())
    }

    /// If the expression is a list whose first element is the atom `head`, returns the remaining elements.
    /// `(and a b c).as_application("and")` returns `Some([a, b, c])`.
    pub fn as_application(&self, head: &str) -> Option<&[SExpr]> {
        match self {
            SExpr::List(l) => match l.list.first() {
                Some(SExpr::Atom(h)) if h.canonical_str() == head => Some(&l.list[1..]),
                _ => None,
            },
            SExpr::Atom(_) => None,
        }
    }

    pub fn is_empty_list(&self) -> bool {
        self.as_list().is_some_and(|l| l.is_empty())
    }
}

impl Spanned for SList {
    fn span(&self) -> Option<&Span> {
        Some(&self.span)
    }
}

impl Spanned for SExpr {
    fn span(&self) -> Option<&Span> {
        match self {
            SExpr::Atom(a) => a.span.as_ref(),
            SExpr::List(l) => Some(&l.span),
        }
    }
}

impl Display for SList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        disp_iter(f, self.list.iter(), " ")?;
        write!(f, ")")
    }
}

impl Display for SExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SExpr::Atom(a) => write!(f, "{a}"),
            SExpr::List(l) => write!(f, "{l}"),
        }
    }
}

impl std::fmt::Debug for SExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// Iterator over the elements of a list, with helpers to consume the expected ones.
#[derive(Clone)]
pub struct ListIter<'a> {
    elems: &'a [SExpr],
    span: &'a Span,
}

impl<'a> ListIter<'a> {
    pub fn peek(&self) -> Option<&'a SExpr> {
        self.elems.first()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Span of the entire list being iterated on.
    pub fn loc(&self) -> Span {
        self.span.clone()
    }

    /// Elements that have not been consumed yet
    pub fn rest(&self) -> &'a [SExpr] {
        self.elems
    }

    pub fn pop(&mut self) -> Res<&'a SExpr> {
        match self.elems.split_first() {
            Some((head, tail)) => {
                self.elems = tail;
                Ok(head)
            }
            None => Err(self.span.clone().end().invalid("Unexpected end of list")),
        }
    }

    pub fn pop_atom(&mut self) -> Res<&'a SAtom> {
        match self.pop()? {
            SExpr::Atom(a) => Ok(a),
            e => Err(e.invalid("Expected an atom")),
        }
    }

    pub fn pop_list(&mut self) -> Res<&'a SList> {
        match self.pop()? {
            SExpr::List(l) => Ok(l),
            e => Err(e.invalid("Expected a list")),
        }
    }

    pub fn pop_known_atom(&mut self, expected: &str) -> Res<()> {
        let backup = self.clone();
        match self.pop()? {
            SExpr::Atom(a) if a.canonical_str() == expected => Ok(()),
            e => {
                *self = backup;
                Err(e.invalid(format!("Expected the atom `{expected}`")))
            }
        }
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a SExpr;

    fn next(&mut self) -> Option<Self::Item> {
        self.pop().ok()
    }
}

#[derive(Debug, PartialEq)]
enum TokenKind {
    Sym(String),
    LParen,
    RParen,
}

struct Token {
    kind: TokenKind,
    /// index of the first byte
    first: usize,
    /// index of the last byte
    last: usize,
}

fn tokenize(input: &Arc<Input>) -> Res<Vec<Token>> {
    let text = input.text.as_str();
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    // start of the current symbol, if any
    let mut start: Option<usize> = None;

    let flush = |start: &mut Option<usize>, end: usize, tokens: &mut Vec<Token>| {
        if let Some(first) = start.take() {
            tokens.push(Token {
                kind: TokenKind::Sym(text[first..end].to_lowercase()),
                first,
                last: end - 1,
            });
        }
    };

    while let Some((i, c)) = chars.next() {
        if c == ';' {
            flush(&mut start, i, &mut tokens);
            // skip until the end of line
            while chars.next_if(|&(_, c)| c != '\n').is_some() {}
        } else if c.is_whitespace() {
            flush(&mut start, i, &mut tokens);
        } else if c == '(' || c == ')' {
            flush(&mut start, i, &mut tokens);
            let kind = if c == '(' { TokenKind::LParen } else { TokenKind::RParen };
            tokens.push(Token { kind, first: i, last: i });
        } else if c == '?' {
            flush(&mut start, i, &mut tokens);
            match chars.peek() {
                Some(&(_, next)) if !next.is_whitespace() && next != '(' && next != ')' && next != ';' => {
                    start = Some(i);
                }
                _ => {
                    return Err(Span::new(input.clone(), i, i).invalid("Expected a variable name after `?`"));
                }
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    flush(&mut start, text.len(), &mut tokens);
    Ok(tokens)
}

/// Parses the input as a single S-expression, that must be a list.
pub fn parse(input: Arc<Input>) -> Res<SExpr> {
    let tokens = tokenize(&input)?;
    let mut tokens = tokens.into_iter();

    let first = match tokens.next() {
        Some(tok) if tok.kind == TokenKind::LParen => tok,
        Some(tok) => return Err(Span::new(input.clone(), tok.first, tok.last).invalid("Expected `(`")),
        None => return Err(Message::error("Empty input, expected `(`")),
    };

    // lists that are opened but not yet closed, with the index of their opening parenthesis
    let mut parents: Vec<(usize, Vec<SExpr>)> = Vec::new();
    let mut current: (usize, Vec<SExpr>) = (first.first, Vec::new());
    let mut result = None;

    for tok in tokens.by_ref() {
        match tok.kind {
            TokenKind::LParen => {
                let opened = std::mem::replace(&mut current, (tok.first, Vec::new()));
                parents.push(opened);
            }
            TokenKind::Sym(s) => {
                let span = Span::new(input.clone(), tok.first, tok.last);
                current.1.push(SExpr::Atom(Sym::with_source(s, span)));
            }
            TokenKind::RParen => {
                let (start, list) = std::mem::take(&mut current);
                let list = SExpr::List(SList {
                    list,
                    span: Span::new(input.clone(), start, tok.last),
                });
                match parents.pop() {
                    Some(parent) => {
                        current = parent;
                        current.1.push(list);
                    }
                    None => {
                        result = Some(list);
                        break;
                    }
                }
            }
        }
    }

    let Some(result) = result else {
        let (unclosed, _) = current;
        return Err(Span::new(input.clone(), unclosed, unclosed).invalid("Unexpected end of input, unclosed list"));
    };
    if let Some(trailing) = tokens.next() {
        return Err(Span::new(input.clone(), trailing.first, trailing.last).invalid("Unexpected tokens after the end of the list"));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(s: &str) -> Res<SExpr> {
        parse(Arc::new(Input::from_string(s)))
    }

    #[test]
    fn lower_cases_and_skips_comments() -> Res<()> {
        let e = parse_str("(Define (DOMAIN Foo) ; a comment (ignored\n (:predicates (At ?X)))")?;
        assert_eq!(e.to_string(), "(define (domain foo) (:predicates (at ?x)))");
        let mut l = e.as_list_iter().title("expected list")?;
        l.pop_known_atom("define")?;
        let mut name = l.pop_list()?.iter();
        name.pop_known_atom("domain")?;
        assert_eq!(name.pop_atom()?.canonical_str(), "foo");
        assert!(name.is_empty());
        Ok(())
    }

    #[test]
    fn question_mark_starts_a_new_token() -> Res<()> {
        let e = parse_str("(p a?b)")?;
        assert_eq!(e.to_string(), "(p a ?b)");
        Ok(())
    }

    #[test]
    fn as_application() -> Res<()> {
        let e = parse_str("(and (p ?x) (q))")?;
        let args = e.as_application("and").title("not an application")?;
        assert_eq!(args.len(), 2);
        assert!(e.as_application("or").is_none());
        assert!(args[1].as_application("q").is_some_and(|a| a.is_empty()));
        Ok(())
    }

    #[test]
    fn malformed_inputs() {
        assert!(parse_str("(p ? x)").is_err());
        assert!(parse_str("(p ?)").is_err());
        assert!(parse_str("atom").is_err());
        assert!(parse_str(")").is_err());
        assert!(parse_str("(p (q)").is_err());
        assert!(parse_str("(p) (q)").is_err());
        assert!(parse_str("").is_err());
        assert!(parse_str("; only a comment").is_err());
    }

    #[test]
    fn pop_known_atom_does_not_consume_on_failure() -> Res<()> {
        let e = parse_str("(:action move)")?;
        let mut l = e.as_list_iter().title("expected list")?;
        assert!(l.pop_known_atom(":predicates").is_err());
        l.pop_known_atom(":action")?;
        assert!(l.pop_list().is_err());
        Ok(())
    }

    #[test]
    fn deep_nesting() -> Res<()> {
        let depth = 1000;
        let text = format!("{}{}", "(".repeat(depth), ")".repeat(depth));
        let mut e = &parse_str(&text)?;
        let mut seen = 1;
        while let Some(inner) = e.as_list().and_then(|l| l.iter().peek()) {
            e = inner;
            seen += 1;
        }
        assert_eq!(seen, depth);
        Ok(())
    }

    #[test]
    fn spans_point_to_source() -> Res<()> {
        let e = parse_str("(define  (domain Dom))")?;
        let args = e.as_application("define").title("expected define")?;
        assert_eq!(args[0].loc().str(), "(domain Dom)");
        Ok(())
    }
}
