
use std::sync::Arc;

use nom::{
    Parser,
    branch::alt,
    error::context,
    combinator::{opt, recognize, peek, not, eof},
    sequence::{tuple, pair},
    multi::{separated_list1, many0, many0_count, many1_count},
    character::complete::{multispace0, alpha1, alphanumeric1, line_ending},
    bytes::complete::{is_not, take_while}
};
use nom_locate::LocatedSpan;
use nom_supreme::{
    error::{ErrorTree, BaseErrorKind, Expectation},
    tag::complete::tag,
    parser_ext::ParserExt,
    final_parser::final_parser
};
use thiserror::Error;
use miette::{SourceSpan, Diagnostic};

use stilt_core::utility::*;
use crate::syntax::*;

type In<'a> = LocatedSpan<&'a str>;
type IResult<I, O> = Result<(I, O), nom::Err<ErrorTree<I>>>;

#[derive(Debug, Error, Diagnostic)]
#[error("Parse error")]
#[diagnostic()]
pub struct ParseError {
    #[source_code]
    pub src: Arc<String>,
    #[label("{message}")]
    pub span: SourceSpan,
    pub message: String,
}

pub fn parse_file(src: Arc<String>) -> Result<Vec<Command>, ParseError> {
    let input = LocatedSpan::new(src.as_str());
    let mut parser = final_parser(parse_command_sequence);
    let result: Result<Vec<Command>, ErrorTree<In>> = parser(input);
    result.map_err(|tree| {
        let offset = error_offset(&tree).min(src.len().saturating_sub(1));
        ParseError {
            src: src.clone(),
            span: (offset, 1).into(),
            message: "expected a declaration or term here".to_string()
        }
    })
}

fn error_offset(tree: &ErrorTree<In>) -> usize {
    match tree {
        ErrorTree::Base { location, .. } => location.location_offset(),
        ErrorTree::Stack { base, .. } => error_offset(base),
        ErrorTree::Alt(siblings) => {
            siblings.iter().map(error_offset).max().unwrap_or(0)
        }
    }
}

fn parse_command_sequence(mut input: In) -> IResult<In, Vec<Command>> {
    let mut result = Vec::with_capacity(8);

    let (rest, _) = many0_count(empty_line)(input)?;
    input = rest;

    while input.len() > 0 {
        let (rest, command) = parse_command(input)?;
        result.push(command);

        let (rest, _) = alt((
            eof.preceded_by(multispace0).map(|_| ()),
            many1_count(empty_line).map(|_| ()),
        ))(rest)?;

        input = rest;
    }

    Ok((input, result))
}

pub fn parse_command(input: In) -> IResult<In, Command> {
    alt((parse_assume, parse_define))(input)
}

fn parse_assume(input: In) -> IResult<In, Command> {
    let (rest, (start, _, (name, _), tag_kind, _, anno))
    = context("assume", tuple((
        tag("assume").preceded_by(bspace0(2)),
        bspace1(2),
        parse_symbol,
        opt(parse_tag.preceded_by(bspace0(2))),
        tag(":").preceded_by(bspace0(2)),
        parse_term
    )))(input)?;

    let span = (start.location_offset(), anno.span().1);
    let decl = Declaration {
        span,
        name,
        tag: tag_kind,
        anno: anno.boxed()
    };
    Ok((rest, Command::Assume(decl)))
}

fn parse_define(input: In) -> IResult<In, Command> {
    let (rest, ((name, name_span), tag_kind, anno, _, body))
    = context("definition", tuple((
        parse_symbol.preceded_by(bspace0(2)),
        opt(parse_tag.preceded_by(bspace0(2))),
        opt(pair(
            tag(":").preceded_by(bspace0(2)),
            parse_term
        )),
        tag("=").preceded_by(bspace0(2)),
        parse_term
    )))(input)?;

    let span = (name_span.0, body.span().1);
    let def = Definition {
        span,
        name,
        tag: tag_kind,
        anno: anno.map(|(_, t)| t.boxed()),
        body: body.boxed()
    };
    Ok((rest, Command::Define(def)))
}

fn parse_tag(input: In) -> IResult<In, Tag> {
    let (rest, (_, kind, _))
    = context("tag", tuple((
        tag("["),
        alt((tag("elaborate"), tag("normalize"))),
        tag("]")
    )))(input)?;

    let tag_kind = match *kind.fragment() {
        "elaborate" => Tag::Elaborate,
        "normalize" => Tag::Normalize,
        _ => unreachable!()
    };
    Ok((rest, tag_kind))
}

pub fn parse_term(input: In) -> IResult<In, Term> {
    let inner = alt((
        parse_term_let,
        parse_term_lambda,
        parse_term_binder,
        parse_term_arrow,
        parse_term_application
    ));

    inner.preceded_by(bspace0(2)).parse(input)
}

fn parse_term_let(input: In) -> IResult<In, Term> {
    let (rest, (start, _, (name, _), anno, _, def, _, body))
    = context("let", tuple((
        tag("let").preceded_by(bspace0(2)),
        bspace1(2),
        parse_symbol,
        opt(pair(
            tag(":").preceded_by(bspace0(2)),
            parse_term
        )),
        tag("=").preceded_by(bspace0(2)),
        parse_term,
        tag(";").preceded_by(bspace0(2)),
        parse_term
    )))(input)?;

    let term = Term::Let {
        span: (start.location_offset(), body.span().1),
        name,
        anno: anno.map(|(_, t)| t.boxed()),
        def: def.boxed(),
        body: body.boxed()
    };
    Ok((rest, term))
}

fn parse_term_lambda(input: In) -> IResult<In, Term> {
    let (rest, (start, vars, _, body))
    = context("lambda", tuple((
        alt((tag("λ"), tag("\\"))).preceded_by(bspace0(2)),
        separated_list1(bspace1(2), parse_lambda_var).preceded_by(bspace0(2)),
        tag(".").preceded_by(bspace0(2)),
        parse_term
    )))(input)?;

    let term = Term::Lambda {
        span: (start.location_offset(), body.span().1),
        vars,
        body: body.boxed()
    };
    Ok((rest, term))
}

fn parse_lambda_var(input: In) -> IResult<In, LambdaVar> {
    let implicit_anno = context("implicit lambda binder", tuple((
        tag("{").preceded_by(bspace0(2)),
        parse_symbol.preceded_by(bspace0(2)),
        tag(":").preceded_by(bspace0(2)),
        parse_term,
        tag("}").preceded_by(bspace0(2))
    ))).map(|(_, (name, _), _, anno, _)| {
        LambdaVar { icit: Icit::Implicit, var: Some(name), anno: Some(anno) }
    });

    let implicit = context("implicit lambda binder", tuple((
        tag("{").preceded_by(bspace0(2)),
        parse_symbol.preceded_by(bspace0(2)),
        tag("}").preceded_by(bspace0(2))
    ))).map(|(_, (name, _), _)| {
        LambdaVar { icit: Icit::Implicit, var: Some(name), anno: None }
    });

    let explicit_anno = context("annotated lambda binder", tuple((
        tag("(").preceded_by(bspace0(2)),
        parse_symbol.preceded_by(bspace0(2)),
        tag(":").preceded_by(bspace0(2)),
        parse_term,
        tag(")").preceded_by(bspace0(2))
    ))).map(|(_, (name, _), _, anno, _)| {
        LambdaVar { icit: Icit::Explicit, var: Some(name), anno: Some(anno) }
    });

    let explicit = parse_symbol.map(|(name, _)| {
        LambdaVar { icit: Icit::Explicit, var: Some(name), anno: None }
    });

    alt((implicit_anno, implicit, explicit_anno, explicit))(input)
}

// (x y : A) → B   {x y : A} → B   {x y} → B
fn parse_term_binder(input: In) -> IResult<In, Term> {
    let (rest, (groups, _, body))
    = context("binder", tuple((
        parse_binder_groups,
        alt((tag("→"), tag("->"))).preceded_by(bspace0(2)),
        parse_term
    )))(input)?;

    let end = body.span().1;
    let mut term = body;
    for (icit, name, name_span, anno) in groups.into_iter().rev() {
        let domain = match anno {
            Some(anno) => anno,
            None => Term::Hole { span: name_span }
        };
        term = Term::Pi {
            span: (name_span.0, end),
            icit,
            var: Some(name),
            domain: domain.boxed(),
            body: term.boxed()
        };
    }
    Ok((rest, term))
}

type Binder = (Icit, Symbol, Span, Option<Term>);

fn parse_binder_groups(input: In) -> IResult<In, Vec<Binder>> {
    let (rest, groups) = separated_list1(bspace0(2), parse_binder_group)(input)?;
    Ok((rest, groups.into_iter().flatten().collect()))
}

fn parse_binder_group(input: In) -> IResult<In, Vec<Binder>> {
    let explicit = context("explicit binder group", tuple((
        tag("(").preceded_by(bspace0(2)),
        separated_list1(bspace1(2), parse_symbol).preceded_by(bspace0(2)),
        tag(":").preceded_by(bspace0(2)),
        parse_term,
        tag(")").preceded_by(bspace0(2))
    ))).map(|(_, names, _, anno, _)| {
        names.into_iter()
            .map(|(name, span)| (Icit::Explicit, name, span, Some(anno.clone())))
            .collect::<Vec<_>>()
    });

    let implicit = context("implicit binder group", tuple((
        tag("{").preceded_by(bspace0(2)),
        separated_list1(bspace1(2), parse_symbol).preceded_by(bspace0(2)),
        opt(pair(
            tag(":").preceded_by(bspace0(2)),
            parse_term
        )),
        tag("}").preceded_by(bspace0(2))
    ))).map(|(_, names, anno, _)| {
        let anno = anno.map(|(_, t)| t);
        names.into_iter()
            .map(|(name, span)| (Icit::Implicit, name, span, anno.clone()))
            .collect::<Vec<_>>()
    });

    alt((explicit, implicit))(input)
}

// A → B  with no named binder on the left
fn parse_term_arrow(input: In) -> IResult<In, Term> {
    let (rest, (domain, _, body))
    = context("arrow", tuple((
        parse_term_application,
        alt((tag("→"), tag("->"))).preceded_by(bspace0(2)),
        parse_term
    )))(input)?;

    let term = Term::Pi {
        span: (domain.span().0, body.span().1),
        icit: Icit::Explicit,
        var: None,
        domain: domain.boxed(),
        body: body.boxed()
    };
    Ok((rest, term))
}

fn parse_term_application(input: In) -> IResult<In, Term> {
    let (rest, (head, args)) = context("application", tuple((
        parse_term_atom,
        many0(parse_arg.preceded_by(bspace1(2)))
    )))(input)?;

    let start = head.span().0;
    let mut term = args.into_iter()
        .fold(head, |acc, (style, arg)| {
            Term::Apply {
                span: (start, arg.span().1),
                style,
                fun: acc.boxed(),
                arg: arg.boxed()
            }
        });

    let (rest, bang) = opt(tag("!").preceded_by(bspace0(2)))(rest)?;
    if let Some(bang) = bang {
        term = Term::Suppress {
            span: (start, bang.location_offset() + 1),
            body: term.boxed()
        };
    }
    Ok((rest, term))
}

fn parse_arg(input: In) -> IResult<In, (ArgStyle, Term)> {
    let named = context("named implicit argument", tuple((
        tag("{").preceded_by(bspace0(2)),
        parse_symbol.preceded_by(bspace0(2)),
        tag("=").preceded_by(bspace0(2)),
        parse_term,
        tag("}").preceded_by(bspace0(2))
    ))).map(|(_, (name, _), _, term, _)| (ArgStyle::Named(name), term));

    let implicit = context("implicit argument", tuple((
        tag("{").preceded_by(bspace0(2)),
        parse_term,
        tag("}").preceded_by(bspace0(2))
    ))).map(|(_, term, _)| (ArgStyle::Given(Icit::Implicit), term));

    let explicit = parse_term_atom.map(|t| (ArgStyle::Given(Icit::Explicit), t));

    alt((named, implicit, explicit))(input)
}

fn parse_term_atom(input: In) -> IResult<In, Term> {
    alt((
        parse_term_paren,
        parse_term_hole,
        parse_term_varlike
    )).preceded_by(bspace0(2)).parse(input)
}

fn parse_term_paren(input: In) -> IResult<In, Term> {
    let (rest, (_, term, _))
    = context("paren", tuple((
        tag("(").preceded_by(bspace0(2)),
        parse_term,
        tag(")").preceded_by(bspace0(2))
    )))(input)?;

    Ok((rest, term))
}

fn parse_term_hole(input: In) -> IResult<In, Term> {
    let (rest, (hole, _)) = pair(
        tag("_"),
        peek(not(alt((alphanumeric1, tag("_"), tag("'")))))
    )(input)?;
    let span = (hole.location_offset(), hole.location_offset() + 1);
    Ok((rest, Term::Hole { span }))
}

fn parse_term_varlike(input: In) -> IResult<In, Term> {
    let (rest, (name, span)) = parse_symbol(input)?;
    let term = if name.as_str() == "U" {
        Term::Star { span }
    } else {
        Term::Variable { span, name }
    };
    Ok((rest, term))
}

fn parse_symbol(input: In) -> IResult<In, (Symbol, Span)> {
    let (rest, symbol)
    = context("symbol", recognize(pair(
        alpha1,
        many0_count(alt((alphanumeric1, tag("_"), tag("'"))))
    )))(input)?;

    // reserved words never parse as names
    match *symbol.fragment() {
        "let" | "assume" => {
            let kind = BaseErrorKind::Expected(Expectation::Something);
            let error = ErrorTree::Base { location: input, kind };
            Err(nom::Err::Error(error))
        }
        _ => {
            let span = (symbol.location_offset(), symbol.location_offset() + symbol.fragment().len());
            let sym: Symbol = (*symbol.fragment()).into();
            Ok((rest, (sym, span)))
        }
    }
}

fn bspace0<'a>(margin: usize) -> impl FnMut(In<'a>) -> IResult<In<'a>, usize> {
    many0_count(alt((
        tag(" ").map(|_| ()),
        tuple((
            opt(tuple((
                tag("--"),
                is_not("\n\r")
            ))),
            line_ending,
            take_while(|c| c == ' ')
                .verify(move |s: &In| s.len() >= margin),
            not(alt((line_ending, tag(" "))))
        )).map(|_| ())
    )))
}

fn bspace1<'a>(margin: usize) -> impl FnMut(In<'a>) -> IResult<In<'a>, usize> {
    many1_count(alt((
        tag(" ").map(|_| ()),
        tuple((
            opt(tuple((
                tag("--"),
                is_not("\n\r")
            ))),
            line_ending,
            take_while(|c| c == ' ')
                .verify(move |s: &In| s.len() >= margin),
            not(alt((line_ending, tag(" "))))
        )).map(|_| ())
    )))
}

fn empty_line(input: In) -> IResult<In, ()> {
    let (rest, _) = tuple((
        many0_count(tag(" ")),
        opt(tuple((
            tag("--"),
            is_not("\n\r")
        ))),
        line_ending,
    ))(input)?;
    Ok((rest, ()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Vec<Command> {
        parse_file(Arc::new(input.to_string())).unwrap()
    }

    #[test]
    fn basic_definitions() {
        let commands = parse_ok(concat!(
            "id : (A : U) → A → A = λ A x. x\n",
            "idU = id U\n"
        ));
        assert_eq!(commands.len(), 2);
        match &commands[0] {
            Command::Define(def) => {
                assert_eq!(def.name, Symbol::from("id"));
                assert!(def.anno.is_some());
            }
            _ => panic!("expected a definition")
        }
    }

    #[test]
    fn assume_and_tags() {
        let commands = parse_ok(concat!(
            "assume Nat' : U\n",
            "two [normalize] : U = U\n"
        ));
        assert!(matches!(&commands[0], Command::Assume(_)));
        match &commands[1] {
            Command::Define(def) => assert_eq!(def.tag, Some(Tag::Normalize)),
            _ => panic!("expected a definition")
        }
    }

    #[test]
    fn implicit_binders_and_arguments() {
        let commands = parse_ok(concat!(
            "const : {A B : U} → A → B → A = \\ {A} {B} x y. x\n",
            "c2 = const {U} {U → U}\n",
            "c3 = const {B = U}\n",
            "c4 = const !\n"
        ));
        assert_eq!(commands.len(), 4);
    }

    #[test]
    fn multiline_continuation() {
        let commands = parse_ok(concat!(
            "comp : {A B C : U} → (B → C) → (A → B) → A → C\n",
            "  = λ f g x. f (g x)\n",
            "\n",
            "-- a comment line\n",
            "four : U\n",
            "  = U\n"
        ));
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn ascii_and_unicode_arrows_agree() {
        let unicode = parse_ok("f : (A : U) → A → A = λ A x. x\n");
        let ascii = parse_ok("f : (A : U) -> A -> A = \\ A x. x\n");
        assert_eq!(unicode.len(), ascii.len());
    }

    #[test]
    fn let_and_holes() {
        let commands = parse_ok("g : U = let h : U = U; h\nk = _\n");
        assert_eq!(commands.len(), 2);
    }
}
