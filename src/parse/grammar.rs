use std::cell::{Cell, RefCell};

use winnow::ascii::till_line_ending;
use winnow::combinator::{alt, opt, repeat};
use winnow::error::{ErrMode, ModalResult};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_till, take_while};

use crate::ast::pretty::{INFIX_PRECEDENCE, KEYWORDS};
use crate::ast::{
    CompareOp, DATA_ROOT, Expr, ExprKind, Head, INPUT_ROOT, Import, Location, MAX_DEPTH, Module,
    Rule, Term, TermKind,
};
use crate::types::Number;

use super::error::ParseError;
use super::parser::SourceMap;

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    let _: () = repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_ascii_whitespace()).void(),
            ('#', till_line_ending).void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

/// Whitespace that does not end a line.
fn inline_ws(input: &mut &str) -> ModalResult<()> {
    take_while(0.., [' ', '\t', '\r']).void().parse_next(input)
}

// -- Identifiers & keywords -------------------------------------------------

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (take_while(1.., is_ident_start), take_while(0.., is_ident_char))
        .take()
        .parse_next(input)
}

/// `a.b.c`, as used by call operators like `http.send`.
fn dotted_name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (ident, repeat::<_, _, (), _, _>(0.., ('.', ident)))
        .take()
        .parse_next(input)
}

/// Consume `word` if it is present as a whole word.
fn keyword<'s>(input: &mut &'s str, word: &str) -> bool {
    let text: &'s str = *input;
    match text.strip_prefix(word) {
        Some(rest) if !rest.starts_with(is_ident_char) => {
            *input = rest;
            true
        }
        _ => false,
    }
}

fn at_keyword(input: &str, word: &str) -> bool {
    let mut lookahead = input;
    keyword(&mut lookahead, word)
}

fn at_dot_ident(input: &str) -> bool {
    input
        .strip_prefix('.')
        .is_some_and(|rest| rest.starts_with(is_ident_start))
}

fn eat(input: &mut &str, token: &str) -> ModalResult<bool> {
    Ok(opt(token).parse_next(input)?.is_some())
}

fn eat_char(input: &mut &str, token: char) -> ModalResult<bool> {
    Ok(opt(token).parse_next(input)?.is_some())
}

// -- Literals ---------------------------------------------------------------

fn number(input: &mut &str) -> ModalResult<Number> {
    let text = (
        opt('-'),
        take_while(1.., |c: char| c.is_ascii_digit()),
        opt(('.', take_while(1.., |c: char| c.is_ascii_digit()))),
        opt((
            one_of(['e', 'E']),
            opt(one_of(['+', '-'])),
            take_while(1.., |c: char| c.is_ascii_digit()),
        )),
    )
        .take()
        .parse_next(input)?;
    if !text.contains(['.', 'e', 'E'])
        && let Ok(v) = text.parse::<i64>()
    {
        return Ok(Number::Int(v));
    }
    text.parse::<f64>()
        .map(Number::Float)
        .map_err(|_| ErrMode::from_input(input).cut())
}

#[derive(Debug, Clone, Copy)]
enum Relation {
    Assign,
    Unify,
    Compare(CompareOp),
}

fn relation(input: &mut &str) -> ModalResult<Relation> {
    alt((
        ":=".value(Relation::Assign),
        "==".value(Relation::Compare(CompareOp::Eq)),
        "!=".value(Relation::Compare(CompareOp::Neq)),
        ">=".value(Relation::Compare(CompareOp::Gte)),
        ">".value(Relation::Compare(CompareOp::Gt)),
        "<=".value(Relation::Compare(CompareOp::Lte)),
        "<".value(Relation::Compare(CompareOp::Lt)),
        "=".value(Relation::Unify),
    ))
    .parse_next(input)
}

pub(crate) fn too_deep() -> String {
    format!("nesting deeper than {MAX_DEPTH} levels")
}

// -- Grammar ----------------------------------------------------------------

/// Recursive-descent grammar over one source text.
///
/// Failures are cut errors; the furthest failure's message is kept so the
/// caller can report it with a location. `depth` counts open nesting levels
/// and stops the descent at [`MAX_DEPTH`].
pub(crate) struct Grammar<'s> {
    map: SourceMap<'s>,
    failure: RefCell<Option<(usize, String)>>,
    depth: Cell<usize>,
}

impl<'s> Grammar<'s> {
    pub(crate) fn new(file: &'s str, source: &'s str) -> Self {
        Self {
            map: SourceMap::new(file, source),
            failure: RefCell::new(None),
            depth: Cell::new(0),
        }
    }

    fn descend(&self, input: &&'s str) -> ModalResult<()> {
        let depth = self.depth.get() + 1;
        if depth > MAX_DEPTH {
            return self.fail(input, too_deep());
        }
        self.depth.set(depth);
        Ok(())
    }

    /// Run `parse` and restore the nesting depth it started at.
    fn nested<T>(&self, parse: impl FnOnce() -> ModalResult<T>) -> ModalResult<T> {
        let entry = self.depth.get();
        let result = parse();
        self.depth.set(entry);
        result
    }

    fn location(&self, input: &str) -> Option<Location> {
        Some(self.map.location(self.map.offset(input)))
    }

    fn fail<T>(&self, input: &&'s str, message: impl Into<String>) -> ModalResult<T> {
        let offset = self.map.offset(input);
        let mut failure = self.failure.borrow_mut();
        if failure.as_ref().is_none_or(|(at, _)| offset >= *at) {
            *failure = Some((offset, message.into()));
        }
        Err(ErrMode::from_input(input).cut())
    }

    /// The error to report after a failed parse that stopped at `rest`.
    pub(crate) fn error(&self, rest: &str) -> ParseError {
        match self.failure.borrow_mut().take() {
            Some((offset, message)) => ParseError::new(message, Some(self.map.location(offset))),
            None => ParseError::new(
                "unexpected input",
                Some(self.map.location(self.map.offset(rest))),
            ),
        }
    }

    fn expect(&self, input: &mut &'s str, token: char) -> ModalResult<()> {
        ws(input)?;
        if eat_char(input, token)? {
            Ok(())
        } else {
            self.fail(input, format!("expected `{token}`"))
        }
    }

    fn identifier(&self, input: &mut &'s str, what: &str) -> ModalResult<&'s str> {
        match opt(ident).parse_next(input)? {
            Some(name) if !KEYWORDS.contains(&name) => Ok(name),
            Some(name) => self.fail(input, format!("unexpected keyword `{name}`")),
            None => self.fail(input, format!("expected {what}")),
        }
    }

    fn dotted_path(&self, input: &mut &'s str) -> ModalResult<Vec<String>> {
        let mut path = vec![self.identifier(input, "identifier")?.to_owned()];
        while at_dot_ident(input) {
            '.'.parse_next(input)?;
            path.push(self.identifier(input, "identifier")?.to_owned());
        }
        Ok(path)
    }

    // -- Modules ------------------------------------------------------------

    pub(crate) fn module(&self, input: &mut &'s str) -> ModalResult<Module> {
        ws(input)?;
        let location = self.location(input);
        if !keyword(input, "package") {
            return self.fail(input, "expected `package` declaration");
        }
        inline_ws(input)?;
        let mut module = Module::new(self.dotted_path(input)?);
        module.package.location = location;

        loop {
            ws(input)?;
            if input.is_empty() {
                break;
            }
            if at_keyword(input, "import") {
                let import = self.import(input)?;
                module.imports.push(import);
                continue;
            }
            for rule in self.rules(input)? {
                module.push_rule(rule);
            }
        }
        Ok(module)
    }

    fn import(&self, input: &mut &'s str) -> ModalResult<Import> {
        let location = self.location(input);
        keyword(input, "import");
        inline_ws(input)?;
        let path_start = *input;
        let path = self.dotted_path(input)?;
        if !matches!(path.first().map(String::as_str), Some(DATA_ROOT | INPUT_ROOT)) {
            return self.fail(&path_start, "import path must start with `data` or `input`");
        }

        let mut lookahead = *input;
        inline_ws(&mut lookahead)?;
        let alias = if keyword(&mut lookahead, "as") {
            *input = lookahead;
            inline_ws(input)?;
            Some(self.identifier(input, "import alias")?.to_owned())
        } else {
            None
        };
        Ok(Import {
            path,
            alias,
            location,
        })
    }

    /// One rule definition. A head followed by several bodies yields one
    /// rule per body.
    fn rules(&self, input: &mut &'s str) -> ModalResult<Vec<Rule>> {
        let location = self.location(input);
        let default = keyword(input, "default");
        if default {
            inline_ws(input)?;
        }
        let name = self.identifier(input, "rule name")?;

        let key = if eat_char(input, '[')? {
            ws(input)?;
            let key = self.term(input)?;
            self.expect(input, ']')?;
            Some(key)
        } else {
            None
        };

        inline_ws(input)?;
        let (value, assign) = if eat(input, ":=")? {
            ws(input)?;
            (Some(self.term(input)?), true)
        } else if !input.starts_with("==") && eat_char(input, '=')? {
            ws(input)?;
            (Some(self.term(input)?), false)
        } else {
            (None, false)
        };

        let head = Head {
            name: name.to_owned(),
            key,
            value,
            assign,
        };
        let rule = |body| Rule {
            default,
            head: head.clone(),
            body,
            location: location.clone(),
            module: None,
        };

        if default {
            if head.key.is_some() || head.value.is_none() {
                return self.fail(input, "default rule must have a value and no key");
            }
            return Ok(vec![rule(Vec::new())]);
        }

        let mut bodies = Vec::new();
        loop {
            let mut lookahead = *input;
            ws(&mut lookahead)?;
            if !lookahead.starts_with('{') {
                break;
            }
            *input = lookahead;
            '{'.parse_next(input)?;
            bodies.push(self.exprs(input, Some('}'))?);
        }
        if bodies.is_empty() {
            return Ok(vec![rule(Vec::new())]);
        }
        Ok(bodies.into_iter().map(rule).collect())
    }

    // -- Expressions --------------------------------------------------------

    /// Expressions separated by `;` or line breaks, up to `close` (or the end
    /// of input when `close` is `None`).
    pub(crate) fn exprs(&self, input: &mut &'s str, close: Option<char>) -> ModalResult<Vec<Expr>> {
        let mut body = Vec::new();
        loop {
            ws(input)?;
            match close {
                Some(c) if eat_char(input, c)? => break,
                Some(c) if input.is_empty() => return self.fail(input, format!("expected `{c}`")),
                None if input.is_empty() => break,
                _ => {}
            }
            body.push(self.expr(input)?);
            inline_ws(input)?;
            if eat_char(input, ';')? {
                continue;
            }
            let separated = input.is_empty()
                || input.starts_with(['\n', '#'])
                || close.is_some_and(|c| input.starts_with(c));
            if !separated {
                return self.fail(input, "expected `;` or a line break between expressions");
            }
        }
        if body.is_empty() {
            return self.fail(input, "body must contain at least one expression");
        }
        Ok(body)
    }

    fn expr(&self, input: &mut &'s str) -> ModalResult<Expr> {
        let location = self.location(input);

        if keyword(input, "some") {
            inline_ws(input)?;
            let mut vars = vec![self.identifier(input, "variable after `some`")?.to_owned()];
            loop {
                let mut lookahead = *input;
                inline_ws(&mut lookahead)?;
                if !eat_char(&mut lookahead, ',')? {
                    break;
                }
                ws(&mut lookahead)?;
                *input = lookahead;
                vars.push(self.identifier(input, "variable")?.to_owned());
            }
            return Ok(Expr {
                kind: ExprKind::Some(vars),
                location,
            });
        }

        if keyword(input, "not") {
            inline_ws(input)?;
            let inner = self.nested(|| {
                self.descend(input)?;
                self.expr(input)
            })?;
            return Ok(Expr {
                kind: ExprKind::Not(Box::new(inner)),
                location,
            });
        }

        let lhs = self.term(input)?;
        let checkpoint = input.checkpoint();
        inline_ws(input)?;
        let kind = match opt(relation).parse_next(input)? {
            Some(rel) => {
                ws(input)?;
                let rhs = self.term(input)?;
                match rel {
                    Relation::Assign => ExprKind::Assign(lhs, rhs),
                    Relation::Unify => ExprKind::Unify(lhs, rhs),
                    Relation::Compare(op) => ExprKind::Compare { op, lhs, rhs },
                }
            }
            None => {
                input.reset(&checkpoint);
                ExprKind::Term(lhs)
            }
        };
        Ok(Expr { kind, location })
    }

    // -- Terms (precedence: & < + - < * / % < postfix) ----------------------

    pub(crate) fn term(&self, input: &mut &'s str) -> ModalResult<Term> {
        self.nested(|| {
            self.descend(input)?;
            self.infix(input, 0)
        })
    }

    /// Each operator applied wraps the left operand one level deeper.
    fn infix(&self, input: &mut &'s str, level: usize) -> ModalResult<Term> {
        let Some(operators) = INFIX_PRECEDENCE.get(level) else {
            return self.postfix(input);
        };
        self.nested(|| self.infix_chain(input, level, operators))
    }

    fn infix_chain(
        &self,
        input: &mut &'s str,
        level: usize,
        operators: &[(&str, &str)],
    ) -> ModalResult<Term> {
        let location = self.location(input);
        let mut lhs = self.infix(input, level + 1)?;
        loop {
            let checkpoint = input.checkpoint();
            inline_ws(input)?;
            let mut matched = None;
            for (symbol, builtin) in operators {
                if eat(input, symbol)? {
                    matched = Some(*builtin);
                    break;
                }
            }
            let Some(builtin) = matched else {
                input.reset(&checkpoint);
                break;
            };
            self.descend(input)?;
            ws(input)?;
            let rhs = self.infix(input, level + 1)?;
            lhs = Term {
                kind: TermKind::Call {
                    operator: builtin.to_owned(),
                    args: vec![lhs, rhs],
                },
                location: location.clone(),
            };
        }
        Ok(lhs)
    }

    /// A primary term followed by `.field` / `[key]` segments. Segments must
    /// follow without whitespace.
    fn postfix(&self, input: &mut &'s str) -> ModalResult<Term> {
        let location = self.location(input);
        let head = self.primary(input)?;
        let mut segments = Vec::new();
        loop {
            if at_dot_ident(input) {
                '.'.parse_next(input)?;
                let at = self.location(input);
                let name = ident.parse_next(input)?;
                segments.push(Term::string(name).with_location(at));
            } else if eat_char(input, '[')? {
                ws(input)?;
                segments.push(self.term(input)?);
                self.expect(input, ']')?;
            } else {
                break;
            }
        }
        if segments.is_empty() {
            return Ok(head);
        }
        segments.insert(0, head);
        Ok(Term {
            kind: TermKind::Ref(segments),
            location,
        })
    }

    fn primary(&self, input: &mut &'s str) -> ModalResult<Term> {
        let location = self.location(input);
        let kind = match input.chars().next() {
            Some('(') => {
                '('.parse_next(input)?;
                ws(input)?;
                let inner = self.term(input)?;
                self.expect(input, ')')?;
                return Ok(inner);
            }
            Some('[') => self.array(input)?,
            Some('{') => self.object_or_set(input)?,
            Some('"') => TermKind::String(self.string(input)?),
            Some('`') => TermKind::String(self.raw_string(input)?),
            Some(c) if c.is_ascii_digit() || (c == '-' && input[1..].starts_with(|d: char| d.is_ascii_digit())) => {
                TermKind::Number(number(input)?)
            }
            Some(c) if is_ident_start(c) => self.name(input)?,
            _ => return self.fail(input, "expected a term"),
        };
        Ok(Term { kind, location })
    }

    /// Variables, literal keywords, `set()` and calls.
    fn name(&self, input: &mut &'s str) -> ModalResult<TermKind> {
        let checkpoint = input.checkpoint();
        let operator = dotted_name(input)?;
        if operator == "set" && eat(input, "()")? {
            return Ok(TermKind::Set(Vec::new()));
        }
        if input.starts_with('(') {
            return self.call(input, operator);
        }
        input.reset(&checkpoint);

        let name = ident(input)?;
        Ok(match name {
            "null" => TermKind::Null,
            "true" => TermKind::Boolean(true),
            "false" => TermKind::Boolean(false),
            _ if KEYWORDS.contains(&name) && name != "set" => {
                return self.fail(input, format!("unexpected keyword `{name}`"));
            }
            _ => TermKind::Var(name.to_owned()),
        })
    }

    fn call(&self, input: &mut &'s str, operator: &str) -> ModalResult<TermKind> {
        '('.parse_next(input)?;
        ws(input)?;
        let args = if eat_char(input, ')')? {
            Vec::new()
        } else {
            let first = self.term(input)?;
            self.elements(input, first, ')')?
        };
        Ok(TermKind::Call {
            operator: operator.to_owned(),
            args,
        })
    }

    /// Comma-separated terms after `first`, through `close`. A trailing comma
    /// is allowed.
    fn elements(&self, input: &mut &'s str, first: Term, close: char) -> ModalResult<Vec<Term>> {
        let mut items = vec![first];
        loop {
            ws(input)?;
            if eat_char(input, close)? {
                return Ok(items);
            }
            if !eat_char(input, ',')? {
                return self.fail(input, format!("expected `,` or `{close}`"));
            }
            ws(input)?;
            if eat_char(input, close)? {
                return Ok(items);
            }
            items.push(self.term(input)?);
        }
    }

    fn array(&self, input: &mut &'s str) -> ModalResult<TermKind> {
        '['.parse_next(input)?;
        ws(input)?;
        if eat_char(input, ']')? {
            return Ok(TermKind::Array(Vec::new()));
        }
        let first = self.term(input)?;
        ws(input)?;
        if eat_char(input, '|')? {
            let body = self.exprs(input, Some(']'))?;
            return Ok(TermKind::ArrayComprehension {
                term: Box::new(first),
                body,
            });
        }
        Ok(TermKind::Array(self.elements(input, first, ']')?))
    }

    fn object_or_set(&self, input: &mut &'s str) -> ModalResult<TermKind> {
        '{'.parse_next(input)?;
        ws(input)?;
        if eat_char(input, '}')? {
            return Ok(TermKind::Object(Vec::new()));
        }
        let first = self.term(input)?;
        ws(input)?;

        if eat_char(input, '|')? {
            let body = self.exprs(input, Some('}'))?;
            return Ok(TermKind::SetComprehension {
                term: Box::new(first),
                body,
            });
        }
        if !eat_char(input, ':')? {
            return Ok(TermKind::Set(self.elements(input, first, '}')?));
        }

        ws(input)?;
        let value = self.term(input)?;
        ws(input)?;
        if eat_char(input, '|')? {
            let body = self.exprs(input, Some('}'))?;
            return Ok(TermKind::ObjectComprehension {
                key: Box::new(first),
                value: Box::new(value),
                body,
            });
        }

        let mut pairs = vec![(first, value)];
        loop {
            ws(input)?;
            if eat_char(input, '}')? {
                return Ok(TermKind::Object(pairs));
            }
            if !eat_char(input, ',')? {
                return self.fail(input, "expected `,` or `}`");
            }
            ws(input)?;
            if eat_char(input, '}')? {
                return Ok(TermKind::Object(pairs));
            }
            let key = self.term(input)?;
            self.expect(input, ':')?;
            ws(input)?;
            pairs.push((key, self.term(input)?));
        }
    }

    /// Double-quoted string with JSON escapes.
    fn string(&self, input: &mut &'s str) -> ModalResult<String> {
        let start = *input;
        '"'.parse_next(input)?;
        loop {
            match opt(any).parse_next(input)? {
                None | Some('\n') => return self.fail(&start, "unterminated string"),
                Some('"') => break,
                Some('\\') => {
                    let _ = opt(any).parse_next(input)?;
                }
                Some(_) => {}
            }
        }
        let Some(raw) = start.get(..start.len() - input.len()) else {
            return self.fail(&start, "invalid string literal");
        };
        match serde_json::from_str(raw) {
            Ok(s) => Ok(s),
            Err(_) => self.fail(&start, "invalid escape in string literal"),
        }
    }

    fn raw_string(&self, input: &mut &'s str) -> ModalResult<String> {
        let start = *input;
        '`'.parse_next(input)?;
        let text = take_till(0.., '`').parse_next(input)?;
        if !eat_char(input, '`')? {
            return self.fail(&start, "unterminated raw string");
        }
        Ok(text.to_owned())
    }
}
