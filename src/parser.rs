//! Front end for the surface syntax.
//!
//! A small recursive-descent grammar written with `nom`. It produces the same [`Node`] tree a
//! host could assemble by hand with the constructors in [`crate::ast`]; nothing downstream
//! depends on concrete syntax.
//!
//! ```text
//! let mut x: i32 = 5;           const LIMIT: i32 = 10;
//! fn f(mut a: i32, r: &mut i32) -> bool { *r = a; return a < LIMIT; }
//! if f(x, &mut x) { display(String::from("yes")); } else if x > 0 { x = 0; }
//! while x < 3 { x = x + 1; }    // line comments are skipped
//! ```

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace1, satisfy},
    combinator::{not, opt, recognize, value},
    error::ErrorKind,
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
};

use crate::ast::{
    BinaryOp, LogicalOp, Node, Param, Type, UnaryOp, app, assign, binop, blk, cond, const_decl,
    deref_assign, fun, let_decl, lit, log, nam, reference, ret, seq, undefined, unop,
    while_loop,
};
use crate::{Error, MAX_PARSE_DEPTH, ParseError};

const KEYWORDS: [&str; 10] = [
    "let", "mut", "const", "fn", "if", "else", "while", "return", "true", "false",
];

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn error(input: &str, kind: ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

fn failure(input: &str, kind: ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Failure(nom::error::Error::new(input, kind))
}

/// Character offset of `rest` within `source`, where `rest` is a suffix of `source`
fn offset_of(source: &str, rest: &str) -> usize {
    let consumed = source.len().saturating_sub(rest.len());
    source
        .get(..consumed)
        .map_or(0, |prefix| prefix.chars().count())
}

/// Convert nom parsing errors to user-friendly messages
fn parse_error(source: &str, error: nom::Err<nom::error::Error<&str>>) -> Error {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let message = match e.code {
                ErrorKind::TooLarge => {
                    format!("program too deeply nested (max depth: {MAX_PARSE_DEPTH})")
                }
                ErrorKind::Digit => "integer literal out of range for i32".into(),
                ErrorKind::Verify => "unknown type".into(),
                ErrorKind::Char => "malformed string literal".into(),
                _ if e.input.trim().is_empty() => "unexpected end of input".into(),
                _ => "unexpected token".into(),
            };
            Error::Parse(ParseError::with_context(
                message,
                source,
                offset_of(source, e.input),
            ))
        }
        nom::Err::Incomplete(_) => Error::Parse(ParseError::new("incomplete input")),
    }
}

/// Whitespace and `//` comments
fn ws(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            multispace1,
            recognize(pair(tag("//"), take_while(|c| c != '\n'))),
        ))),
    )
    .parse(input)
}

fn symbol<'a>(token: &'static str, input: &'a str) -> IResult<&'a str, &'a str> {
    preceded(ws, tag(token)).parse(input)
}

fn keyword<'a>(word: &'static str, input: &'a str) -> IResult<&'a str, &'a str> {
    preceded(ws, terminated(tag(word), not(satisfy(is_identifier_char)))).parse(input)
}

/// A single `=`, not the start of `==`
fn assign_operator(input: &str) -> IResult<&str, &str> {
    preceded(ws, terminated(tag("="), not(char('=')))).parse(input)
}

fn identifier(input: &str) -> IResult<&str, String> {
    let (rest, name) = preceded(
        ws,
        recognize(pair(
            satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
            take_while(is_identifier_char),
        )),
    )
    .parse(input)?;

    if KEYWORDS.contains(&name) {
        return Err(error(input, ErrorKind::Tag));
    }
    Ok((rest, name.to_owned()))
}

/// `;` ends a statement; it may be left out before `}` or at the end of the program
fn statement_end(input: &str) -> IResult<&str, ()> {
    let (rest, _) = ws(input)?;
    if let Some(rest) = rest.strip_prefix(';') {
        return Ok((rest, ()));
    }
    if rest.is_empty() || rest.starts_with('}') {
        return Ok((rest, ()));
    }
    Err(error(rest, ErrorKind::Tag))
}

fn check_depth(input: &str, depth: usize) -> Result<(), nom::Err<nom::error::Error<&str>>> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(failure(input, ErrorKind::TooLarge));
    }
    Ok(())
}

/// `i32`, `bool`, `String`, `& T` or `&mut T`
fn type_annotation(input: &str) -> IResult<&str, Type> {
    let (input, borrowed) = opt(|i| symbol("&", i)).parse(input)?;
    let (input, mutable) = match borrowed {
        Some(_) => opt(|i| keyword("mut", i)).parse(input)?,
        None => (input, None),
    };
    let (input, _) = ws(input)?;
    let (rest, name) = identifier(input)?;
    let ty = Type::from_name(&name).ok_or_else(|| failure(input, ErrorKind::Verify))?;

    Ok((
        rest,
        match borrowed {
            Some(_) => Type::reference(mutable.is_some(), ty),
            None => ty,
        },
    ))
}

fn integer(input: &str) -> IResult<&str, Node> {
    let (input, _) = ws(input)?;
    let (rest, digits) = digit1.parse(input)?;
    let n: i32 = digits
        .parse()
        .map_err(|_| failure(input, ErrorKind::Digit))?;
    Ok((rest, lit(n)))
}

/// The body of a string literal after its opening quote, with escapes resolved
fn string_contents(input: &str) -> IResult<&str, String> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut chars = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), chars)),
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => chars.push('\n'),
                    Some('t') => chars.push('\t'),
                    Some('r') => chars.push('\r'),
                    Some('\\') => chars.push('\\'),
                    Some('"') => chars.push('"'),
                    _ => return Err(failure(remaining, ErrorKind::Char)),
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                chars.push(ch);
                remaining = char_iter.as_str();
            }
            None => return Err(failure(input, ErrorKind::Char)),
        }
    }
}

/// `String::from("...")`
fn string_literal(input: &str) -> IResult<&str, Node> {
    let (input, _) = symbol("String::from", input)?;
    let (input, _) = symbol("(", input)?;
    let (input, _) = ws(input)?;
    let (input, contents) = string_contents(input)?;
    let (input, _) = symbol(")", input)?;
    Ok((input, lit(contents)))
}

fn call_or_name(input: &str, depth: usize) -> IResult<&str, Node> {
    let (input, sym) = identifier(input)?;
    let (input, args) = opt(delimited(
        |i| symbol("(", i),
        separated_list0(|i| symbol(",", i), |i| expression(i, depth + 1)),
        |i| symbol(")", i),
    ))
    .parse(input)?;

    Ok((
        input,
        match args {
            Some(args) => app(nam(&sym), args),
            None => nam(&sym),
        },
    ))
}

fn primary(input: &str, depth: usize) -> IResult<&str, Node> {
    alt((
        integer,
        value(lit(true), |i| keyword("true", i)),
        value(lit(false), |i| keyword("false", i)),
        string_literal,
        |i| call_or_name(i, depth),
        delimited(
            |i| symbol("(", i),
            |i| expression(i, depth + 1),
            |i| symbol(")", i),
        ),
        |i| block(i, depth + 1),
    ))
    .parse(input)
}

/// `&x` or `&mut x`
fn borrow(input: &str) -> IResult<&str, Node> {
    let (input, _) = symbol("&", input)?;
    let (input, mutable) = opt(|i| keyword("mut", i)).parse(input)?;
    let (input, sym) = identifier(input)?;
    Ok((input, reference(sym, mutable.is_some())))
}

fn prefixed<'a>(
    input: &'a str,
    depth: usize,
    token: &'static str,
    op: UnaryOp,
) -> IResult<&'a str, Node> {
    let (input, _) = symbol(token, input)?;
    let (input, operand) = unary(input, depth + 1)?;
    Ok((input, unop(op, operand)))
}

fn unary(input: &str, depth: usize) -> IResult<&str, Node> {
    check_depth(input, depth)?;
    alt((
        |i| prefixed(i, depth, "-", UnaryOp::Neg),
        |i| prefixed(i, depth, "!", UnaryOp::Not),
        |i| prefixed(i, depth, "*", UnaryOp::Deref),
        borrow,
        |i| primary(i, depth),
    ))
    .parse(input)
}

/// One left-associative level of binary operators
fn binary_level<'a>(
    input: &'a str,
    depth: usize,
    operators: &[(&'static str, BinaryOp)],
    operand: fn(&'a str, usize) -> IResult<&'a str, Node>,
) -> IResult<&'a str, Node> {
    let (mut input, mut left) = operand(input, depth)?;
    loop {
        let next = operators.iter().find_map(|&(token, op)| {
            symbol(token, input).ok().map(|(rest, _)| (rest, op))
        });
        let Some((rest, op)) = next else {
            return Ok((input, left));
        };
        let (rest, right) = operand(rest, depth)?;
        left = binop(op, left, right);
        input = rest;
    }
}

fn multiplicative(input: &str, depth: usize) -> IResult<&str, Node> {
    binary_level(
        input,
        depth,
        &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
        unary,
    )
}

fn additive(input: &str, depth: usize) -> IResult<&str, Node> {
    binary_level(
        input,
        depth,
        &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
        multiplicative,
    )
}

/// Comparisons do not chain: `a < b < c` is rejected
fn comparison(input: &str, depth: usize) -> IResult<&str, Node> {
    const OPERATORS: [(&str, BinaryOp); 6] = [
        ("==", BinaryOp::Eq),
        ("!=", BinaryOp::Ne),
        ("<=", BinaryOp::Le),
        (">=", BinaryOp::Ge),
        ("<", BinaryOp::Lt),
        (">", BinaryOp::Gt),
    ];
    let (input, left) = additive(input, depth)?;
    let next = OPERATORS
        .iter()
        .find_map(|&(token, op)| symbol(token, input).ok().map(|(rest, _)| (rest, op)));
    match next {
        Some((rest, op)) => {
            let (rest, right) = additive(rest, depth)?;
            Ok((rest, binop(op, left, right)))
        }
        None => Ok((input, left)),
    }
}

fn logical_level<'a>(
    input: &'a str,
    depth: usize,
    token: &'static str,
    op: LogicalOp,
    operand: fn(&'a str, usize) -> IResult<&'a str, Node>,
) -> IResult<&'a str, Node> {
    let (mut input, mut left) = operand(input, depth)?;
    while let Ok((rest, _)) = symbol(token, input) {
        let (rest, right) = operand(rest, depth)?;
        left = log(op, left, right);
        input = rest;
    }
    Ok((input, left))
}

fn conjunction(input: &str, depth: usize) -> IResult<&str, Node> {
    logical_level(input, depth, "&&", LogicalOp::And, comparison)
}

fn expression(input: &str, depth: usize) -> IResult<&str, Node> {
    check_depth(input, depth)?;
    logical_level(input, depth, "||", LogicalOp::Or, conjunction)
}

fn block(input: &str, depth: usize) -> IResult<&str, Node> {
    check_depth(input, depth)?;
    let (input, _) = symbol("{", input)?;
    let (input, stmts) = many0(|i| statement(i, depth + 1)).parse(input)?;
    let (input, _) = symbol("}", input)?;
    Ok((input, blk(seq(stmts))))
}

fn let_statement(input: &str, depth: usize) -> IResult<&str, Node> {
    let (input, _) = keyword("let", input)?;
    let (input, mutable) = opt(|i| keyword("mut", i)).parse(input)?;
    let (input, sym) = identifier(input)?;
    let (input, annotation) = opt(preceded(|i| symbol(":", i), type_annotation)).parse(input)?;
    let (input, _) = assign_operator(input)?;
    let (input, expr) = expression(input, depth + 1)?;
    let (input, _) = statement_end(input)?;
    Ok((input, let_decl(sym, mutable.is_some(), annotation, expr)))
}

fn const_statement(input: &str, depth: usize) -> IResult<&str, Node> {
    let (input, _) = keyword("const", input)?;
    let (input, sym) = identifier(input)?;
    let (input, _) = symbol(":", input)?;
    let (input, ty) = type_annotation(input)?;
    let (input, _) = assign_operator(input)?;
    let (input, expr) = expression(input, depth + 1)?;
    let (input, _) = statement_end(input)?;
    Ok((input, const_decl(sym, Some(ty), expr)))
}

fn parameter(input: &str) -> IResult<&str, Param> {
    let (input, mutable) = opt(|i| keyword("mut", i)).parse(input)?;
    let (input, sym) = identifier(input)?;
    let (input, _) = symbol(":", input)?;
    let (input, ty) = type_annotation(input)?;
    Ok((
        input,
        Param {
            sym,
            mutable: mutable.is_some(),
            ty,
        },
    ))
}

fn function(input: &str, depth: usize) -> IResult<&str, Node> {
    let (input, _) = keyword("fn", input)?;
    let (input, sym) = identifier(input)?;
    let (input, prms) = delimited(
        |i| symbol("(", i),
        separated_list0(|i| symbol(",", i), parameter),
        |i| symbol(")", i),
    )
    .parse(input)?;
    let (input, return_type) = opt(preceded(|i| symbol("->", i), type_annotation)).parse(input)?;
    let (input, body) = block(input, depth + 1)?;
    Ok((input, fun(sym, prms, return_type.unwrap_or(Type::Void), body)))
}

/// `if` with an optional `else` block or `else if` chain; a missing `else` does nothing
fn if_statement(input: &str, depth: usize) -> IResult<&str, Node> {
    check_depth(input, depth)?;
    let (input, _) = keyword("if", input)?;
    let (input, pred) = expression(input, depth + 1)?;
    let (input, consequent) = block(input, depth + 1)?;
    let (input, alternative) = opt(preceded(
        |i| keyword("else", i),
        alt((|i| block(i, depth + 1), |i| if_statement(i, depth + 1))),
    ))
    .parse(input)?;
    Ok((
        input,
        cond(pred, consequent, alternative.unwrap_or_else(|| seq(vec![]))),
    ))
}

fn while_statement(input: &str, depth: usize) -> IResult<&str, Node> {
    let (input, _) = keyword("while", input)?;
    let (input, pred) = expression(input, depth + 1)?;
    let (input, body) = block(input, depth + 1)?;
    Ok((input, while_loop(pred, body)))
}

fn return_statement(input: &str, depth: usize) -> IResult<&str, Node> {
    let (input, _) = keyword("return", input)?;
    let (input, expr) = opt(|i| expression(i, depth + 1)).parse(input)?;
    let (input, _) = statement_end(input)?;
    Ok((input, ret(expr.unwrap_or_else(undefined))))
}

fn block_statement(input: &str, depth: usize) -> IResult<&str, Node> {
    let (input, body) = block(input, depth)?;
    let (input, _) = opt(|i| symbol(";", i)).parse(input)?;
    Ok((input, body))
}

/// `*r = expr;`
fn deref_assignment(input: &str, depth: usize) -> IResult<&str, Node> {
    let (input, _) = symbol("*", input)?;
    let (input, sym) = identifier(input)?;
    let (input, _) = assign_operator(input)?;
    let (input, expr) = expression(input, depth + 1)?;
    let (input, _) = statement_end(input)?;
    Ok((input, deref_assign(sym, expr)))
}

fn assignment(input: &str, depth: usize) -> IResult<&str, Node> {
    let (input, sym) = identifier(input)?;
    let (input, _) = assign_operator(input)?;
    let (input, expr) = expression(input, depth + 1)?;
    let (input, _) = statement_end(input)?;
    Ok((input, assign(sym, expr)))
}

fn expression_statement(input: &str, depth: usize) -> IResult<&str, Node> {
    let (input, expr) = expression(input, depth)?;
    let (input, _) = statement_end(input)?;
    Ok((input, expr))
}

fn statement(input: &str, depth: usize) -> IResult<&str, Node> {
    alt((
        |i| let_statement(i, depth),
        |i| const_statement(i, depth),
        |i| function(i, depth),
        |i| if_statement(i, depth),
        |i| while_statement(i, depth),
        |i| return_statement(i, depth),
        |i| block_statement(i, depth),
        |i| deref_assignment(i, depth),
        |i| assignment(i, depth),
        |i| expression_statement(i, depth),
    ))
    .parse(input)
}

/// Parse a whole program into its root `blk(seq(...))` node.
pub fn parse_program(source: &str) -> Result<Node, Error> {
    let (rest, stmts) = many0(|i| statement(i, 0))
        .parse(source)
        .map_err(|e| parse_error(source, e))?;
    let (rest, _) = ws(rest).map_err(|e| parse_error(source, e))?;

    if !rest.is_empty() {
        return Err(Error::Parse(ParseError::with_context(
            "unexpected token",
            source,
            offset_of(source, rest),
        )));
    }
    Ok(blk(seq(stmts)))
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    /// Test result variants for parsing tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(Vec<Node>), // Parsing should succeed with these top-level statements
        SpecificError(&'static str), // Parsing should fail with exactly this message
        Error,                       // Parsing should fail (any error)
    }
    use ParseTestResult::*;

    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        for (i, (input, expected)) in test_cases.into_iter().enumerate() {
            let test_id = format!("Parse test #{}", i + 1);
            match (parse_program(input), expected) {
                (Ok(actual), Success(stmts)) => {
                    assert_eq!(actual, blk(seq(stmts)), "{test_id}: tree mismatch for {input}");
                }
                (Err(err), SpecificError(message)) => {
                    assert_eq!(err.to_string(), message, "{test_id}: wrong error for {input}");
                }
                (Err(_), Error) => {}
                (Ok(actual), _) => panic!("{test_id}: expected failure for {input}, got {actual:?}"),
                (Err(err), Success(_)) => panic!("{test_id}: failed to parse {input}: {err}"),
            }
        }
    }

    #[test]
    fn test_expressions() {
        run_parse_tests(vec![
            ("", Success(vec![])),
            ("42;", Success(vec![lit(42)])),
            (
                "1 + 2 * 3;",
                Success(vec![binop(
                    BinaryOp::Add,
                    lit(1),
                    binop(BinaryOp::Mul, lit(2), lit(3)),
                )]),
            ),
            (
                "(1 + 2) * 3;",
                Success(vec![binop(
                    BinaryOp::Mul,
                    binop(BinaryOp::Add, lit(1), lit(2)),
                    lit(3),
                )]),
            ),
            (
                "10 - 4 - 3;",
                Success(vec![binop(
                    BinaryOp::Sub,
                    binop(BinaryOp::Sub, lit(10), lit(4)),
                    lit(3),
                )]),
            ),
            (
                "a < b && !c || d == e;",
                Success(vec![log(
                    LogicalOp::Or,
                    log(
                        LogicalOp::And,
                        binop(BinaryOp::Lt, nam("a"), nam("b")),
                        unop(UnaryOp::Not, nam("c")),
                    ),
                    binop(BinaryOp::Eq, nam("d"), nam("e")),
                )]),
            ),
            (
                "-x * *r;",
                Success(vec![binop(
                    BinaryOp::Mul,
                    unop(UnaryOp::Neg, nam("x")),
                    unop(UnaryOp::Deref, nam("r")),
                )]),
            ),
            (
                "f(1, g(), &x, &mut y);",
                Success(vec![app(
                    nam("f"),
                    vec![
                        lit(1),
                        app(nam("g"), vec![]),
                        reference("x", false),
                        reference("y", true),
                    ],
                )]),
            ),
            (
                "String::from(\"a \\\"b\\\"\\n\");",
                Success(vec![lit("a \"b\"\n")]),
            ),
            ("true; false", Success(vec![lit(true), lit(false)])),
            ("letter; iffy;", Success(vec![nam("letter"), nam("iffy")])),
            (
                "let t = { let u = s; u };",
                Success(vec![let_decl(
                    "t",
                    false,
                    None,
                    blk(seq(vec![let_decl("u", false, None, nam("s")), nam("u")])),
                )]),
            ),
        ]);
    }

    #[test]
    fn test_statements() {
        run_parse_tests(vec![
            (
                "let mut x: i32 = 5; x = x + 1;",
                Success(vec![
                    let_decl("x", true, Some(Type::I32), lit(5)),
                    assign("x", binop(BinaryOp::Add, nam("x"), lit(1))),
                ]),
            ),
            (
                "const N: i32 = 3; *r = N;",
                Success(vec![
                    const_decl("N", Some(Type::I32), lit(3)),
                    deref_assign("r", nam("N")),
                ]),
            ),
            (
                "fn f(mut a: i32, r: &mut i32, s: & String) -> bool { return a == 1; }",
                Success(vec![fun(
                    "f",
                    vec![
                        Param {
                            sym: "a".into(),
                            mutable: true,
                            ty: Type::I32,
                        },
                        Param {
                            sym: "r".into(),
                            mutable: false,
                            ty: Type::reference(true, Type::I32),
                        },
                        Param {
                            sym: "s".into(),
                            mutable: false,
                            ty: Type::reference(false, Type::String),
                        },
                    ],
                    Type::Bool,
                    blk(seq(vec![ret(binop(BinaryOp::Eq, nam("a"), lit(1)))])),
                )]),
            ),
            (
                "fn g() { return; }",
                Success(vec![fun(
                    "g",
                    vec![],
                    Type::Void,
                    blk(seq(vec![ret(undefined())])),
                )]),
            ),
            (
                "if a { 1; } else if b { 2 } else { 3; }",
                Success(vec![cond(
                    nam("a"),
                    blk(seq(vec![lit(1)])),
                    cond(nam("b"), blk(seq(vec![lit(2)])), blk(seq(vec![lit(3)]))),
                )]),
            ),
            (
                "if a { 1; } x;",
                Success(vec![
                    cond(nam("a"), blk(seq(vec![lit(1)])), seq(vec![])),
                    nam("x"),
                ]),
            ),
            (
                "while i < 3 { i = i + 1; } { 4; };",
                Success(vec![
                    while_loop(
                        binop(BinaryOp::Lt, nam("i"), lit(3)),
                        blk(seq(vec![assign(
                            "i",
                            binop(BinaryOp::Add, nam("i"), lit(1)),
                        )])),
                    ),
                    blk(seq(vec![lit(4)])),
                ]),
            ),
            (
                "// comment\nlet x = 1; // trailing\n x == 1;",
                Success(vec![
                    let_decl("x", false, None, lit(1)),
                    binop(BinaryOp::Eq, nam("x"), lit(1)),
                ]),
            ),
        ]);
    }

    #[test]
    fn test_errors() {
        run_parse_tests(vec![
            ("let x = 5 let y = 6;", SpecificError("parse error: unexpected token near 'let x = 5 let y = 6;'")),
            ("1 +;", Error),
            ("let = 5;", Error),
            ("a < b < c;", Error),
            ("{ 1;", Error),
            (
                "let x: float = 1;",
                SpecificError("parse error: unknown type near 'float = 1;'"),
            ),
            (
                "3000000000;",
                SpecificError("parse error: integer literal out of range for i32 near '3000000000;'"),
            ),
            (
                "String::from(\"abc);",
                SpecificError("parse error: malformed string literal near '\"abc);'"),
            ),
            ("let mut = 1;", Error),
            ("fn () {}", Error),
        ]);
    }

    #[test]
    fn test_nesting_limit() {
        let shallow = format!("{}1{};", "(".repeat(10), ")".repeat(10));
        assert!(parse_program(&shallow).is_ok());

        let deep = format!("{}1{};", "(".repeat(MAX_PARSE_DEPTH), ")".repeat(MAX_PARSE_DEPTH));
        let err = parse_program(&deep).unwrap_err().to_string();
        assert!(err.contains("too deeply nested"), "unexpected error: {err}");

        let blocks = format!("{}{}", "{".repeat(MAX_PARSE_DEPTH), "}".repeat(MAX_PARSE_DEPTH));
        assert!(parse_program(&blocks).is_err());
    }
}
