use winnow::ascii::{dec_int, digit1, till_line_ending};
use winnow::combinator::{
    alt, cut_err, delimited, not, opt, preceded, repeat, separated, terminated,
};
use winnow::error::{ContextError, ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::types::{BusinessRule, CompareOp, Condition, Expr, FieldType, RuleAction, RuleTarget, Value};

use super::parser::ParsedRuleSet;

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

fn expected(what: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(what))
}

// -- Identifiers ------------------------------------------------------------

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// A literal word that is not the prefix of a longer identifier.
fn keyword<'i>(
    word: &'static str,
) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    terminated(word, not(one_of(is_ident_char)))
}

/// Dotted path such as `form.address.country`.
fn path<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .parse_next(input)
}

/// Rule and schema identifiers additionally allow `-`.
fn identifier<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
        take_while(0.., |c: char| is_ident_char(c) || c == '-'),
    )
        .take()
        .parse_next(input)
}

// -- Values -----------------------------------------------------------------

fn string_literal(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = any.parse_next(input)?;
        match ch {
            '"' => return Ok(s),
            '\\' => {
                let esc = any.parse_next(input)?;
                match esc {
                    '"' => s.push('"'),
                    '\\' => s.push('\\'),
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            c => s.push(c),
        }
    }
}

fn number(input: &mut &str) -> ModalResult<Value> {
    let text = (
        opt('-'),
        digit1,
        opt(('.', digit1)),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)),
    )
        .take()
        .parse_next(input)?;
    if text.contains(['.', 'e', 'E']) {
        let f: f64 = text
            .parse()
            .map_err(|_| ErrMode::from_input(input).cut())?;
        Ok(Value::Float(f))
    } else {
        let i: i64 = text
            .parse()
            .map_err(|_| ErrMode::from_input(input).cut())?;
        Ok(Value::Int(i))
    }
}

fn list_literal(input: &mut &str) -> ModalResult<Vec<Value>> {
    delimited(
        ('[', ws),
        separated(0.., value, (ws, ',')),
        (ws, cut_err(']')),
    )
    .parse_next(input)
}

fn value(input: &mut &str) -> ModalResult<Value> {
    ws.parse_next(input)?;
    alt((
        string_literal.map(Value::String),
        keyword("true").value(Value::Bool(true)),
        keyword("false").value(Value::Bool(false)),
        keyword("null").value(Value::Null),
        number,
        list_literal.map(Value::List),
    ))
    .context(expected("value"))
    .parse_next(input)
}

// -- Comparison operators ---------------------------------------------------

fn compare_op(input: &mut &str) -> ModalResult<CompareOp> {
    ws.parse_next(input)?;
    alt((
        ">=".value(CompareOp::Gte),
        ">".value(CompareOp::Gt),
        "<=".value(CompareOp::Lte),
        "<".value(CompareOp::Lt),
        "==".value(CompareOp::Eq),
        "!=".value(CompareOp::Neq),
    ))
    .parse_next(input)
}

// -- Expressions (precedence: OR < AND < NOT < primary) ---------------------

fn call_argument<'i, O>(
    name: &'static str,
    arg: impl Parser<&'i str, O, ErrMode<ContextError>>,
) -> impl Parser<&'i str, O, ErrMode<ContextError>> {
    preceded(
        (name, ws, '('),
        cut_err(delimited(ws, arg, (ws, ')'))),
    )
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    alt((
        delimited('(', expr, (ws, cut_err(')'))),
        keyword("true").value(Expr::Literal(true)),
        keyword("false").value(Expr::Literal(false)),
        call_argument("has_permission", string_literal).map(Expr::HasPermission),
        call_argument("has_role", string_literal).map(Expr::HasRole),
        call_argument("exists", path).map(|p: &str| Expr::Exists(p.to_owned())),
        path_predicate,
    ))
    .context(expected("expression"))
    .parse_next(input)
}

fn path_predicate(input: &mut &str) -> ModalResult<Expr> {
    let name = path.parse_next(input)?;
    let checkpoint = input.checkpoint();
    if let Ok(op) = compare_op.parse_next(input) {
        let val = cut_err(value).parse_next(input)?;
        return Ok(Expr::Compare {
            path: name.to_owned(),
            op,
            value: val,
        });
    }
    input.reset(&checkpoint);
    ws.parse_next(input)?;
    if opt(keyword("in")).parse_next(input)?.is_some() {
        ws.parse_next(input)?;
        let values = cut_err(list_literal)
            .context(expected("value list"))
            .parse_next(input)?;
        return Ok(Expr::In {
            path: name.to_owned(),
            values,
        });
    }
    input.reset(&checkpoint);
    Ok(Expr::Compare {
        path: name.to_owned(),
        op: CompareOp::Eq,
        value: Value::Bool(true),
    })
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    if opt(alt((keyword("NOT"), keyword("not"))))
        .parse_next(input)?
        .is_some()
    {
        let inner = cut_err(unary).parse_next(input)?;
        Ok(Expr::Not(Box::new(inner)))
    } else {
        primary(input)
    }
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = unary(input)?;
    let rest: Vec<Expr> = repeat(
        0..,
        preceded((ws, alt((keyword("AND"), keyword("and")))), cut_err(unary)),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| Expr::And(Box::new(acc), Box::new(r))))
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = and_expr(input)?;
    let rest: Vec<Expr> = repeat(
        0..,
        preceded((ws, alt((keyword("OR"), keyword("or")))), cut_err(and_expr)),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| Expr::Or(Box::new(acc), Box::new(r))))
}

fn expr(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    or_expr(input)
}

/// A complete condition with nothing but whitespace or comments after it.
pub fn parse_condition(input: &mut &str) -> ModalResult<Expr> {
    terminated(expr, ws).parse_next(input)
}

// -- Rule definitions -------------------------------------------------------

fn priority_annotation(input: &mut &str) -> ModalResult<i32> {
    delimited(
        (ws, '(', ws, keyword("priority"), ws),
        cut_err(dec_int::<_, i32, _>),
        (ws, cut_err(')')),
    )
    .parse_next(input)
}

fn schema_scope<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    preceded(
        (ws, keyword("schema"), ws),
        cut_err(identifier).context(expected("schema id")),
    )
    .parse_next(input)
}

fn field_type(input: &mut &str) -> ModalResult<FieldType> {
    take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_')
        .verify_map(FieldType::from_name)
        .context(expected("field type"))
        .parse_next(input)
}

fn target(input: &mut &str) -> ModalResult<RuleTarget> {
    alt((
        '*'.value(RuleTarget::All),
        preceded("type:", cut_err(field_type)).map(RuleTarget::FieldType),
        separated(1.., path.map(str::to_owned), (ws, ',', ws)).map(RuleTarget::Fields),
    ))
    .context(expected("rule target"))
    .parse_next(input)
}

fn action(input: &mut &str) -> ModalResult<RuleAction> {
    take_while(1.., |c: char| c.is_ascii_alphabetic())
        .verify_map(RuleAction::from_keyword)
        .context(expected("rule action"))
        .parse_next(input)
}

fn rule_def(input: &mut &str) -> ModalResult<BusinessRule> {
    ws.parse_next(input)?;
    keyword("rule").parse_next(input)?;
    ws.parse_next(input)?;

    let id = cut_err(identifier)
        .context(expected("rule id"))
        .parse_next(input)?;

    let priority = opt(priority_annotation).parse_next(input)?;
    let schema = opt(schema_scope).parse_next(input)?;

    ws.parse_next(input)?;
    cut_err(keyword("on")).context(expected("on")).parse_next(input)?;
    ws.parse_next(input)?;
    let target = cut_err(target).parse_next(input)?;
    ws.parse_next(input)?;
    cut_err(':').parse_next(input)?;

    let condition = cut_err(expr)
        .context(expected("rule condition"))
        .parse_next(input)?;

    ws.parse_next(input)?;
    cut_err("=>").context(expected("=>")).parse_next(input)?;
    ws.parse_next(input)?;
    let action = cut_err(action).parse_next(input)?;
    let message = opt(preceded(ws, string_literal)).parse_next(input)?;

    Ok(BusinessRule {
        id: id.to_owned(),
        schema: schema.map(str::to_owned),
        target,
        condition: Some(Condition::Expr(condition)),
        priority: priority.unwrap_or(0),
        action: Some(action),
        message,
    })
}

// -- Top-level parser -------------------------------------------------------

pub fn parse_ruleset(input: &mut &str) -> ModalResult<ParsedRuleSet> {
    let rules: Vec<BusinessRule> = repeat(0.., rule_def).parse_next(input)?;
    ws.parse_next(input)?;
    Ok(ParsedRuleSet { rules })
}
