//! PEST-based parser for the activity language
//!
//! Produces the executor AST with span information for error reporting. Binary
//! operators other than `&&`/`||` are desugared into stdlib calls here, so the
//! interpreter only knows about short-circuit operators.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

use crate::executor::types::ast::{
    ActivityDecl, BinaryOp, EveryMode, Expr, Import, Module, PreemptMode, Span, Stmt, Strength,
    TrailDecl, VarRef,
};

pub mod semantic_validator;


/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "parser/synchro.pest"]
struct SynchroParser;

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The grammar rejected the input
    Syntax(String, Option<Span>),
    /// The input parsed but could not be turned into an AST
    Build(String, Option<Span>),
}

impl ParseError {
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::Syntax(_, span) | ParseError::Build(_, span) => *span,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ParseError::Syntax(msg, _) | ParseError::Build(msg, _) => msg,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Syntax(msg, _) => write!(f, "{}", msg),
            ParseError::Build(msg, Some(span)) => {
                write!(f, "line {}: {}", span.start_line + 1, msg)
            }
            ParseError::Build(msg, None) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let span = match err.line_col {
            pest::error::LineColLocation::Pos((line, col)) => Some(Span {
                start: 0,
                end: 0,
                start_line: line.saturating_sub(1),
                start_col: col.saturating_sub(1),
                end_line: line.saturating_sub(1),
                end_col: col,
            }),
            pest::error::LineColLocation::Span((start_line, start_col), (end_line, end_col)) => {
                Some(Span {
                    start: 0,
                    end: 0,
                    start_line: start_line.saturating_sub(1),
                    start_col: start_col.saturating_sub(1),
                    end_line: end_line.saturating_sub(1),
                    end_col: end_col.saturating_sub(1),
                })
            }
        };
        ParseError::Syntax(err.to_string(), span)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/* ===================== Span Helpers ===================== */

/// Convert a PEST pair's span to our Span type (0-indexed lines and columns)
fn pair_to_span(pair: &Pair<Rule>) -> Span {
    let pest_span = pair.as_span();
    let (start_line, start_col) = pest_span.start_pos().line_col();
    let (end_line, end_col) = pest_span.end_pos().line_col();
    Span::new(
        pest_span.start(),
        pest_span.end(),
        start_line - 1,
        start_col - 1,
        end_line - 1,
        end_col - 1,
    )
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_module
            | Rule::kw_import
            | Rule::kw_activity
            | Rule::kw_out
            | Rule::kw_var
            | Rule::kw_exec
            | Rule::kw_run
            | Rule::kw_await
            | Rule::kw_halt
            | Rule::kw_repeat
            | Rule::kw_until
            | Rule::kw_while
            | Rule::kw_every
            | Rule::kw_now_and_every
            | Rule::kw_always
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_cobegin
            | Rule::kw_strong
            | Rule::kw_weak
            | Rule::kw_when
            | Rule::kw_abort
            | Rule::kw_reset
            | Rule::kw_defer
            | Rule::kw_return
            | Rule::kw_exit
    )
}

/// Next child that is not a keyword token
fn next_pair<'i>(inner: &mut Pairs<'i, Rule>, parent: Span, what: &str) -> ParseResult<Pair<'i, Rule>> {
    inner
        .find(|p| !is_keyword(p.as_rule()))
        .ok_or_else(|| ParseError::Build(format!("Expected {}", what), Some(parent)))
}

fn unexpected(pair: &Pair<Rule>, context: &str) -> ParseError {
    ParseError::Build(
        format!("Unexpected {} content: {:?}", context, pair.as_rule()),
        Some(pair_to_span(pair)),
    )
}

/* ===================== Public API ===================== */

/// Parse one module file
///
/// `default_name` is used when the file has no `module` header.
pub fn parse_module(source: &str, default_name: &str) -> ParseResult<Module> {
    let mut pairs = SynchroParser::parse(Rule::program, source)?;
    let program = pairs
        .next()
        .ok_or_else(|| ParseError::Build("Empty parse result".to_string(), None))?;

    let mut docs = Vec::new();
    let mut name = None;
    let mut imports = Vec::new();
    let mut activities = Vec::new();

    for pair in program.into_inner() {
        match pair.as_rule() {
            Rule::doc_line => {
                let text = pair.into_inner().next().map_or("", |t| t.as_str());
                docs.push(text.strip_prefix(' ').unwrap_or(text).trim_end().to_string());
            }
            Rule::module_decl => {
                let span = pair_to_span(&pair);
                let ident = next_pair(&mut pair.into_inner(), span, "module name")?;
                name = Some(ident.as_str().to_string());
            }
            Rule::import_decl => {
                let span = pair_to_span(&pair);
                let ident = next_pair(&mut pair.into_inner(), span, "module name")?;
                imports.push(Import {
                    module: ident.as_str().to_string(),
                    span,
                });
            }
            Rule::activity_decl => activities.push(build_activity(pair)?),
            Rule::EOI => {}
            _ => return Err(unexpected(&pair, "program")),
        }
    }

    Ok(Module {
        name: name.unwrap_or_else(|| default_name.to_string()),
        doc: (!docs.is_empty()).then(|| docs.join("\n")),
        imports,
        activities,
    })
}

/* ===================== AST Builder ===================== */

fn build_activity(pair: Pair<Rule>) -> ParseResult<ActivityDecl> {
    let span = pair_to_span(&pair);
    let mut name = String::new();
    let mut params = Vec::new();
    let mut outs = Vec::new();
    let mut body = None;

    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::identifier => name = p.as_str().to_string(),
            Rule::param_list => params = identifiers(p),
            Rule::out_params => outs = identifiers(p),
            Rule::block => body = Some(build_block(p)?),
            r if is_keyword(r) => {}
            _ => return Err(unexpected(&p, "activity")),
        }
    }

    let body = body.ok_or_else(|| ParseError::Build("Activity has no body".to_string(), Some(span)))?;
    Ok(ActivityDecl {
        name,
        params,
        outs,
        body,
        span,
    })
}

fn identifiers(pair: Pair<Rule>) -> Vec<String> {
    pair.into_inner().map(|p| p.as_str().to_string()).collect()
}

fn var_refs(pair: Pair<Rule>) -> Vec<VarRef> {
    pair.into_inner().map(|p| var_ref(&p)).collect()
}

fn var_ref(pair: &Pair<Rule>) -> VarRef {
    VarRef {
        name: pair.as_str().to_string(),
        slot: None,
        span: pair_to_span(pair),
    }
}

fn block_statements(pair: Pair<Rule>) -> ParseResult<Vec<Stmt>> {
    pair.into_inner().map(build_statement).collect()
}

fn build_block(pair: Pair<Rule>) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair);
    Ok(Stmt::Block {
        body: block_statements(pair)?,
        span,
    })
}

fn build_statement(pair: Pair<Rule>) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair);

    match pair.as_rule() {
        Rule::statement => {
            let inner = next_pair(&mut pair.into_inner(), span, "statement")?;
            build_statement(inner)
        }
        Rule::block => build_block(pair),
        Rule::assign_stmt => build_assign_stmt(pair),
        Rule::run_stmt => build_run_stmt(pair),
        Rule::var_stmt => {
            let mut inner = pair.into_inner();
            let name = next_pair(&mut inner, span, "variable name")?;
            let init = match inner.next() {
                Some(e) => Some(build_expression(e)?),
                None => None,
            };
            Ok(Stmt::Var {
                name: name.as_str().to_string(),
                slot: None,
                init,
                span,
            })
        }
        Rule::exec_stmt => {
            let block = next_pair(&mut pair.into_inner(), span, "exec block")?;
            Ok(Stmt::Exec {
                body: block_statements(block)?,
                span,
            })
        }
        Rule::await_stmt => {
            let test = next_pair(&mut pair.into_inner(), span, "await condition")?;
            Ok(Stmt::Await {
                test: build_expression(test)?,
                span,
            })
        }
        Rule::halt_stmt => Ok(Stmt::Halt { span }),
        Rule::repeat_stmt => {
            let mut inner = pair.into_inner();
            let body = build_block(next_pair(&mut inner, span, "repeat body")?)?;
            let until = match inner.find(|p| p.as_rule() == Rule::expression) {
                Some(e) => Some(build_expression(e)?),
                None => None,
            };
            Ok(Stmt::Repeat {
                body: Box::new(body),
                until,
                span,
            })
        }
        Rule::while_stmt => {
            let mut inner = pair.into_inner();
            let test = build_expression(next_pair(&mut inner, span, "while condition")?)?;
            let body = build_block(next_pair(&mut inner, span, "while body")?)?;
            Ok(Stmt::While {
                test,
                body: Box::new(body),
                span,
            })
        }
        Rule::every_stmt => build_every_stmt(pair),
        Rule::if_stmt => build_if_stmt(pair),
        Rule::cobegin_stmt => {
            let trails = pair
                .into_inner()
                .filter(|p| p.as_rule() == Rule::trail_decl)
                .map(build_trail)
                .collect::<ParseResult<Vec<_>>>()?;
            Ok(Stmt::Cobegin { trails, span })
        }
        Rule::when_stmt => {
            let mut inner = pair.into_inner();
            let test = build_expression(next_pair(&mut inner, span, "when condition")?)?;
            let mode = match inner.next().map(|p| p.as_rule()) {
                Some(Rule::kw_abort) => PreemptMode::Abort,
                Some(Rule::kw_reset) => PreemptMode::Reset,
                _ => {
                    return Err(ParseError::Build(
                        "Expected 'abort' or 'reset'".to_string(),
                        Some(span),
                    ))
                }
            };
            let body = build_block(next_pair(&mut inner, span, "when body")?)?;
            Ok(Stmt::When {
                mode,
                test,
                body: Box::new(body),
                span,
            })
        }
        Rule::defer_stmt => {
            let block = next_pair(&mut pair.into_inner(), span, "defer block")?;
            Ok(Stmt::Defer {
                body: Box::new(build_block(block)?),
                span,
            })
        }
        Rule::return_stmt => {
            let value = match pair.into_inner().find(|p| !is_keyword(p.as_rule())) {
                Some(e) => Some(build_expression(e)?),
                None => None,
            };
            Ok(Stmt::Return { value, span })
        }
        Rule::expr_stmt => {
            let expr = next_pair(&mut pair.into_inner(), span, "expression")?;
            Ok(Stmt::Expr {
                expr: build_expression(expr)?,
                span,
            })
        }
        _ => Err(unexpected(&pair, "statement")),
    }
}

fn build_assign_stmt(pair: Pair<Rule>) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair);
    let mut inner = pair.into_inner();

    let target = next_pair(&mut inner, span, "assignment target")?;
    let var = var_ref(&target);
    let op = next_pair(&mut inner, span, "assignment operator")?;
    let value = build_expression(next_pair(&mut inner, span, "assigned value")?)?;

    // `x += e` is `x = add(x, e)`
    let value = match op.as_str() {
        "+=" | "-=" => {
            let func = if op.as_str() == "+=" { "add" } else { "sub" };
            let current = Expr::Ident {
                name: var.name.clone(),
                slot: None,
                span: var.span,
            };
            call(func, vec![current, value], span)
        }
        _ => value,
    };

    Ok(Stmt::Assign { var, value, span })
}

fn build_run_stmt(pair: Pair<Rule>) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair);
    let mut bind = None;
    let mut activity = None;
    let mut args = Vec::new();
    let mut outs = Vec::new();

    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::run_bind => {
                let ident = next_pair(&mut p.into_inner(), span, "bound variable")?;
                bind = Some(var_ref(&ident));
            }
            Rule::identifier => activity = Some(p.as_str().to_string()),
            Rule::arg_list => args = build_arg_list(p)?,
            Rule::out_args => outs = var_refs(p),
            r if is_keyword(r) => {}
            _ => return Err(unexpected(&p, "run")),
        }
    }

    let activity =
        activity.ok_or_else(|| ParseError::Build("Expected activity name".to_string(), Some(span)))?;
    Ok(Stmt::Run {
        activity,
        args,
        outs,
        bind,
        target: None,
        span,
    })
}

fn build_every_stmt(pair: Pair<Rule>) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair);
    let mut mode = EveryMode::Next;
    let mut test = None;
    let mut body = None;

    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::kw_every => mode = EveryMode::Next,
            Rule::kw_now_and_every => mode = EveryMode::Now,
            Rule::kw_always => {
                mode = EveryMode::Now;
                test = Some(Expr::LitBool {
                    v: true,
                    span: pair_to_span(&p),
                });
            }
            Rule::expression => test = Some(build_expression(p)?),
            Rule::block => body = Some(build_block(p)?),
            _ => return Err(unexpected(&p, "every")),
        }
    }

    let (Some(test), Some(body)) = (test, body) else {
        return Err(ParseError::Build(
            "Incomplete every statement".to_string(),
            Some(span),
        ));
    };
    Ok(Stmt::Every {
        mode,
        test,
        body: Box::new(body),
        span,
    })
}

fn build_if_stmt(pair: Pair<Rule>) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair);
    let mut inner = pair.into_inner();

    let test = build_expression(next_pair(&mut inner, span, "if condition")?)?;
    let then_s = build_block(next_pair(&mut inner, span, "if body")?)?;

    let else_s = match inner.next() {
        Some(else_clause) => {
            let branch = next_pair(&mut else_clause.into_inner(), span, "else branch")?;
            let stmt = match branch.as_rule() {
                Rule::if_stmt => build_if_stmt(branch)?,
                _ => build_block(branch)?,
            };
            Some(Box::new(stmt))
        }
        None => None,
    };

    Ok(Stmt::If {
        test,
        then_s: Box::new(then_s),
        else_s,
        span,
    })
}

fn build_trail(pair: Pair<Rule>) -> ParseResult<TrailDecl> {
    let span = pair_to_span(&pair);
    let mut inner = pair.into_inner();
    let strength = match inner.next().map(|p| p.as_rule()) {
        Some(Rule::kw_strong) => Strength::Strong,
        Some(Rule::kw_weak) => Strength::Weak,
        _ => {
            return Err(ParseError::Build(
                "Expected 'strong' or 'weak'".to_string(),
                Some(span),
            ))
        }
    };
    let body = build_block(next_pair(&mut inner, span, "trail body")?)?;
    Ok(TrailDecl {
        strength,
        body,
        span,
    })
}

/* ===================== Expressions ===================== */

fn call(func: &str, args: Vec<Expr>, span: Span) -> Expr {
    Expr::Call {
        callee: Box::new(Expr::Ident {
            name: func.to_string(),
            slot: None,
            span,
        }),
        args,
        span,
    }
}

fn build_binary_expr(pair: Pair<Rule>) -> ParseResult<Expr> {
    let span = pair_to_span(&pair);
    let inner_pairs: Vec<_> = pair.into_inner().collect();

    let Some(first) = inner_pairs.first() else {
        return Err(ParseError::Build(
            "Empty binary expression".to_string(),
            Some(span),
        ));
    };
    let mut left = build_expression(first.clone())?;

    for chunk in inner_pairs[1..].chunks(2) {
        let [op, right] = chunk else {
            return Err(ParseError::Build(
                "Missing right operand after operator".to_string(),
                Some(span),
            ));
        };
        let right = build_expression(right.clone())?;
        let new_span = left.span().merge(&right.span());

        left = match op.as_rule() {
            Rule::op_and => Expr::BinaryOp {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span: new_span,
            },
            Rule::op_or => Expr::BinaryOp {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span: new_span,
            },
            rule => {
                let func_name = match rule {
                    Rule::op_eq => "eq",
                    Rule::op_ne => "ne",
                    Rule::op_lt => "lt",
                    Rule::op_lte => "lte",
                    Rule::op_gt => "gt",
                    Rule::op_gte => "gte",
                    Rule::op_add => "add",
                    Rule::op_sub => "sub",
                    Rule::op_mul => "mul",
                    Rule::op_div => "div",
                    Rule::op_mod => "mod",
                    _ => return Err(unexpected(op, "operator")),
                };
                call(func_name, vec![left, right], new_span)
            }
        };
    }

    Ok(left)
}

fn build_expression(pair: Pair<Rule>) -> ParseResult<Expr> {
    let span = pair_to_span(&pair);

    match pair.as_rule() {
        Rule::expression | Rule::primary | Rule::literal => {
            let inner = next_pair(&mut pair.into_inner(), span, "expression")?;
            build_expression(inner)
        }
        Rule::logical_or_expr
        | Rule::logical_and_expr
        | Rule::equality_expr
        | Rule::comparison_expr
        | Rule::additive_expr
        | Rule::multiplicative_expr => build_binary_expr(pair),
        Rule::unary_expr => {
            let mut inner = pair.into_inner();
            let first = next_pair(&mut inner, span, "operand")?;
            let func = match first.as_rule() {
                Rule::op_not => "not",
                Rule::op_neg => "neg",
                _ => return build_expression(first),
            };
            let operand = build_expression(next_pair(&mut inner, span, "operand")?)?;
            Ok(call(func, vec![operand], span))
        }
        Rule::call_expr => {
            let mut inner = pair.into_inner();
            let mut expr = build_expression(next_pair(&mut inner, span, "primary expression")?)?;

            for postfix in inner {
                let postfix_span = pair_to_span(&postfix);
                let suffix = next_pair(&mut postfix.into_inner(), postfix_span, "postfix")?;
                let new_span = expr.span().merge(&postfix_span);
                expr = match suffix.as_rule() {
                    Rule::call_suffix => Expr::Call {
                        callee: Box::new(expr),
                        args: match suffix.into_inner().next() {
                            Some(list) => build_arg_list(list)?,
                            None => vec![],
                        },
                        span: new_span,
                    },
                    Rule::member_access => {
                        let prop = next_pair(&mut suffix.into_inner(), postfix_span, "property")?;
                        Expr::Member {
                            object: Box::new(expr),
                            property: prop.as_str().to_string(),
                            span: new_span,
                        }
                    }
                    _ => return Err(unexpected(&suffix, "postfix")),
                };
            }

            Ok(expr)
        }
        Rule::identifier => Ok(Expr::Ident {
            name: pair.as_str().to_string(),
            slot: None,
            span,
        }),
        Rule::number => {
            let num_str = pair.as_str();
            let value = num_str.parse::<f64>().map_err(|e| {
                ParseError::Build(
                    format!("Failed to parse number '{}': {}", num_str, e),
                    Some(span),
                )
            })?;
            Ok(Expr::LitNum { v: value, span })
        }
        Rule::boolean => Ok(Expr::LitBool {
            v: pair.as_str() == "true",
            span,
        }),
        Rule::string => {
            let raw = pair.into_inner().next().map_or("", |p| p.as_str());
            Ok(Expr::LitStr {
                v: unescape(raw),
                span,
            })
        }
        Rule::null_lit => Ok(Expr::LitNull { span }),
        Rule::array_lit => {
            let elements = match pair.into_inner().next() {
                Some(list) => build_arg_list(list)?,
                None => vec![],
            };
            Ok(Expr::LitList { elements, span })
        }
        _ => Err(unexpected(&pair, "expression")),
    }
}

fn build_arg_list(pair: Pair<Rule>) -> ParseResult<Vec<Expr>> {
    pair.into_inner().map(build_expression).collect()
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
