
use std::sync::Arc;
use std::time;

use colored::Colorize;
use thiserror::Error;
use miette::{Diagnostic, SourceSpan};

use stilt_core::prelude::*;
use crate::syntax::{self, ArgStyle};
use crate::error::StiltError;

type Span = (usize, usize);

#[derive(Debug, Error, Diagnostic)]
pub enum ElabError {
    #[error("Inconvertible types")]
    #[diagnostic()]
    Inconvertible {
        #[source_code]
        src: Arc<String>,
        #[label("expected {expected}, found {inferred}")]
        span: SourceSpan,
        expected: String,
        inferred: String,
        #[help]
        reason: Option<String>
    },
    #[error("Name not in scope")]
    #[diagnostic()]
    ScopeError {
        #[source_code]
        src: Arc<String>,
        #[label("{name} is not bound here")]
        span: SourceSpan,
        name: String
    },
    #[error("Unknown named implicit")]
    #[diagnostic()]
    NamedImplicit {
        #[source_code]
        src: Arc<String>,
        #[label("the expected type has no implicit argument named {name}")]
        span: SourceSpan,
        name: String
    },
    #[error("Icitness mismatch")]
    #[diagnostic()]
    IcitMismatch {
        #[source_code]
        src: Arc<String>,
        #[label("expected an {expected} argument, found an {provided} one")]
        span: SourceSpan,
        expected: Icit,
        provided: Icit
    },
    #[error("Unsolved metavariables")]
    #[diagnostic(help("{details}"))]
    UnsolvedMetas {
        #[source_code]
        src: Arc<String>,
        #[label("this declaration leaves metavariables unsolved")]
        span: SourceSpan,
        details: String
    },
    #[error("Definition collision")]
    #[diagnostic()]
    Collision {
        #[source_code]
        src: Arc<String>,
        #[label("this name is already declared")]
        span: SourceSpan
    },
}

fn source_span(span: Span) -> SourceSpan {
    let (start, end) = span;
    (start, end.saturating_sub(start).max(1)).into()
}

/// Whether a context entry came from the program text or was invented by
/// the elaborator. Variable lookup only sees source names, so inserted
/// binders never capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameOrigin {
    Source,
    Inserted
}

/// The local context: the evaluation environment, the types and names of
/// everything in scope, and the bound/defined mask used when a fresh meta
/// is applied to its scope. The length doubles as the index/level pivot.
#[derive(Debug, Clone)]
pub struct Context {
    src: Arc<String>,
    env: Env,
    types: imbl::Vector<(Symbol, NameOrigin, Value)>,
    mask: Vec<EnvBound>,
}

impl Context {
    pub fn new(src: Arc<String>) -> Context {
        Context {
            src,
            env: Env::new(),
            types: imbl::Vector::new(),
            mask: Vec::new()
        }
    }

    fn bind_with(&self, name: Symbol, origin: NameOrigin, ty: Value) -> Context {
        let mut result = self.clone();
        let value = LazyValueData::computed(ValueData::variable(self.env_lvl()));
        log::trace!("{} {} : {}", "bind".bright_blue(), name, ty);
        result.env.push_back(EnvEntry::new(name, value));
        result.types.push_back((name, origin, ty));
        result.mask.push(EnvBound::Bound);
        result
    }

    fn bind(&self, name: Symbol, ty: Value) -> Context {
        self.bind_with(name, NameOrigin::Source, ty)
    }

    fn bind_inserted(&self, name: Symbol, ty: Value) -> Context {
        self.bind_with(name, NameOrigin::Inserted, ty)
    }

    fn define(&self, name: Symbol, value: LazyValue, ty: Value) -> Context {
        let mut result = self.clone();
        log::trace!("{} {} : {}", "define".bright_blue(), name, ty);
        result.env.push_back(EnvEntry::new(name, value));
        result.types.push_back((name, NameOrigin::Source, ty));
        result.mask.push(EnvBound::Defined);
        result
    }

    fn env(&self) -> Env { self.env.clone() }

    fn env_lvl(&self) -> Level { self.env.len().into() }

    fn names(&self) -> imbl::Vector<Symbol> {
        self.types.iter().map(|(name, _, _)| *name).collect()
    }
}

fn fresh_meta(db: &mut Database, ctx: &Context, ty: Value, span: Span) -> Term {
    let meta = db.fresh_meta(ty, span);
    TermData::InsertedMeta { meta, mask: ctx.mask.clone() }.rced()
}

// a hole in inferring position: the type is itself a fresh meta
fn fresh_meta_pair(db: &mut Database, ctx: &Context, span: Span) -> (Term, Value) {
    let ty_term = fresh_meta(db, ctx, ValueData::star(), span);
    let ty = eval(db, ctx.env(), ty_term);
    let term = fresh_meta(db, ctx, ty.clone(), span);
    (term, ty)
}

fn unify_types(db: &mut Database, ctx: &Context, span: Span, expected: Value, inferred: Value)
    -> Result<(), ElabError>
{
    unify(db, ctx.env_lvl(), inferred.clone(), expected.clone()).map_err(|error| {
        let expected = quote(db, expected, ctx.env_lvl(), false)
            .to_string_with_context(ctx.names());
        let inferred = quote(db, inferred, ctx.env_lvl(), false)
            .to_string_with_context(ctx.names());
        let reason = match error {
            UnifyError::Occurs =>
                Some("a metavariable would occur in its own solution".to_string()),
            UnifyError::Escape =>
                Some("a candidate solution mentions a variable outside the meta spine".to_string()),
            UnifyError::NonPattern =>
                Some("a metavariable is applied to something other than distinct bound variables".to_string()),
            UnifyError::Mismatch => None
        };
        ElabError::Inconvertible {
            src: ctx.src.clone(),
            span: source_span(span),
            expected,
            inferred,
            reason
        }
    })
}

/// Apply `term` to fresh metas while its type begins with implicit
/// binders.
fn insert_implicits(db: &mut Database, ctx: &Context, term: Term, ty: Value, span: Span)
    -> (Term, Value)
{
    let mut term = term;
    let mut ty = ty;
    loop {
        // only the forced view can tell whether insertion continues, but
        // the returned type stays folded so gluedness is not lost
        let forced = unfold_to_head(db, ty.clone());
        let (name, domain, closure) = match forced.as_ref() {
            ValueData::Pi { icit: Icit::Implicit, name, domain, closure } =>
                (*name, domain.clone(), closure.clone()),
            _ => return (term, ty)
        };
        let arg = fresh_meta(db, ctx, domain, span);
        let arg_value = LazyValueData::lazy(ctx.env(), arg.clone());
        term = TermData::Apply { icit: Icit::Implicit, fun: term, arg }.rced();
        ty = closure.eval(db, EnvEntry::new(name, arg_value));
    }
}

/// Insert metas for leading implicits whose names differ from `target`,
/// stopping at the matching binder.
fn insert_until_name(
    db: &mut Database,
    ctx: &Context,
    target: Symbol,
    term: Term,
    ty: Value,
    span: Span)
    -> Result<(Term, Value), ElabError>
{
    let mut term = term;
    let mut ty = ty;
    loop {
        let forced = unfold_to_head(db, ty);
        match forced.as_ref() {
            ValueData::Pi { icit: Icit::Implicit, name, domain, closure } => {
                if *name == target {
                    return Ok((term, forced.clone()))
                }
                let arg = fresh_meta(db, ctx, domain.clone(), span);
                let arg_value = LazyValueData::lazy(ctx.env(), arg.clone());
                term = TermData::Apply { icit: Icit::Implicit, fun: term, arg }.rced();
                ty = closure.eval(db, EnvEntry::new(*name, arg_value));
            }
            _ => return Err(ElabError::NamedImplicit {
                src: ctx.src.clone(),
                span: source_span(span),
                name: target.to_string()
            })
        }
    }
}

/// Infer, then insert implicit applications, except when the term is an
/// implicit lambda or carries the `!` marker.
fn infer_and_insert(db: &mut Database, ctx: &Context, term: &syntax::Term)
    -> Result<(Term, Value), ElabError>
{
    let (result, ty) = infer(db, ctx, term)?;
    let skip = match term {
        syntax::Term::Suppress { .. } => true,
        syntax::Term::Lambda { vars, .. } =>
            vars.first().map(|v| v.icit == Icit::Implicit).unwrap_or(false),
        _ => false
    };
    if skip { Ok((result, ty)) }
    else { Ok(insert_implicits(db, ctx, result, ty, term.span())) }
}

fn check_lambda(
    db: &mut Database,
    ctx: &Context,
    index: usize,
    vars: &[syntax::LambdaVar],
    body: &syntax::Term,
    ty: Value,
    span: Span)
    -> Result<Term, ElabError>
{
    let Some(var) = vars.get(index) else {
        return check(db, ctx, body, ty)
    };
    let forced = unfold_to_head(db, ty);
    match forced.as_ref() {
        ValueData::Pi { icit, name, domain, closure } if var.icit == *icit => {
            if let Some(anno) = &var.anno {
                let anno_term = check(db, ctx, anno, ValueData::star())?;
                let anno_value = eval(db, ctx.env(), anno_term);
                unify_types(db, ctx, anno.span(), domain.clone(), anno_value)?;
            }
            let var_name = var.var.unwrap_or_default();
            let arg = LazyValueData::computed(ValueData::variable(ctx.env_lvl()));
            let body_ty = closure.eval(db, EnvEntry::new(*name, arg));
            let inner_ctx = ctx.bind(var_name, domain.clone());
            let body_term = check_lambda(db, &inner_ctx, index + 1, vars, body, body_ty, span)?;
            Ok(TermData::Lambda { icit: *icit, name: var_name, body: body_term }.rced())
        }
        ValueData::Pi { icit: Icit::Implicit, name, domain, closure } => {
            // explicit lambda against an implicit function type: insert
            // an implicit lambda and keep going underneath it
            let arg = LazyValueData::computed(ValueData::variable(ctx.env_lvl()));
            let body_ty = closure.eval(db, EnvEntry::new(*name, arg));
            let inner_ctx = ctx.bind_inserted(*name, domain.clone());
            let body_term = check_lambda(db, &inner_ctx, index, vars, body, body_ty, span)?;
            Ok(TermData::Lambda { icit: Icit::Implicit, name: *name, body: body_term }.rced())
        }
        ValueData::Pi { icit, .. } => {
            Err(ElabError::IcitMismatch {
                src: ctx.src.clone(),
                span: source_span(span),
                expected: *icit,
                provided: var.icit
            })
        }
        _ => {
            // the expected type is not (yet) a function type; infer the
            // remaining lambda and let unification refine it
            let rest = syntax::Term::Lambda {
                span,
                vars: vars[index..].to_vec(),
                body: body.clone().boxed()
            };
            let (term, inferred) = infer_and_insert(db, ctx, &rest)?;
            unify_types(db, ctx, span, forced.clone(), inferred)?;
            Ok(term)
        }
    }
}

fn check(db: &mut Database, ctx: &Context, term: &syntax::Term, ty: Value)
    -> Result<Term, ElabError>
{
    log::trace!("{} {} : {}", "check".bright_blue(), term.as_str(ctx.src.as_ref()), ty);
    let forced = unfold_to_head(db, ty.clone());
    match (term, forced.as_ref()) {
        (syntax::Term::Lambda { span, vars, body }, _) => {
            check_lambda(db, ctx, 0, vars, body, forced.clone(), *span)
        }
        (syntax::Term::Let { name, anno, def, body, .. }, _) => {
            let (anno_term, anno_value, def_term) = elaborate_let_binding(db, ctx, anno, def)?;
            let def_value = LazyValueData::lazy(ctx.env(), def_term.clone());
            let inner_ctx = ctx.define(*name, def_value, anno_value);
            let body_term = check(db, &inner_ctx, body, ty)?;
            Ok(TermData::Let {
                name: *name,
                anno: anno_term,
                def: def_term,
                body: body_term
            }.rced())
        }
        (syntax::Term::Hole { span }, _) => {
            Ok(fresh_meta(db, ctx, ty, *span))
        }
        (_, ValueData::Pi { icit: Icit::Implicit, name, domain, closure }) => {
            // the expected type starts with an implicit binder the term
            // does not bind: insert an implicit lambda over the term
            let arg = LazyValueData::computed(ValueData::variable(ctx.env_lvl()));
            let body_ty = closure.eval(db, EnvEntry::new(*name, arg));
            let inner_ctx = ctx.bind_inserted(*name, domain.clone());
            let body_term = check(db, &inner_ctx, term, body_ty)?;
            Ok(TermData::Lambda { icit: Icit::Implicit, name: *name, body: body_term }.rced())
        }
        _ => {
            let (term_out, inferred) = infer_and_insert(db, ctx, term)?;
            unify_types(db, ctx, term.span(), forced.clone(), inferred)?;
            Ok(term_out)
        }
    }
}

fn elaborate_let_binding(
    db: &mut Database,
    ctx: &Context,
    anno: &Option<Box<syntax::Term>>,
    def: &syntax::Term)
    -> Result<(Term, Value, Term), ElabError>
{
    match anno {
        Some(anno) => {
            let anno_term = check(db, ctx, anno, ValueData::star())?;
            let anno_value = eval(db, ctx.env(), anno_term.clone());
            let def_term = check(db, ctx, def, anno_value.clone())?;
            Ok((anno_term, anno_value, def_term))
        }
        None => {
            let (def_term, def_ty) = infer_and_insert(db, ctx, def)?;
            let anno_term = quote(db, def_ty.clone(), ctx.env_lvl(), false);
            Ok((anno_term, def_ty, def_term))
        }
    }
}

fn infer_lambda(
    db: &mut Database,
    ctx: &Context,
    index: usize,
    vars: &[syntax::LambdaVar],
    body: &syntax::Term,
    span: Span)
    -> Result<(Term, Value), ElabError>
{
    let Some(var) = vars.get(index) else {
        return infer_and_insert(db, ctx, body)
    };
    let domain = match &var.anno {
        Some(anno) => {
            let anno_term = check(db, ctx, anno, ValueData::star())?;
            eval(db, ctx.env(), anno_term)
        }
        None => {
            let meta = fresh_meta(db, ctx, ValueData::star(), span);
            eval(db, ctx.env(), meta)
        }
    };
    let name = var.var.unwrap_or_default();
    let inner_ctx = ctx.bind(name, domain.clone());
    let (body_term, body_ty) = infer_lambda(db, &inner_ctx, index + 1, vars, body, span)?;
    let body_ty_term = quote(db, body_ty, inner_ctx.env_lvl(), false);
    let closure = Closure::new(ctx.env(), body_ty_term);
    let ty = ValueData::pi(var.icit, name, domain, closure);
    Ok((TermData::Lambda { icit: var.icit, name, body: body_term }.rced(), ty))
}

fn infer(db: &mut Database, ctx: &Context, term: &syntax::Term)
    -> Result<(Term, Value), ElabError>
{
    match term {
        syntax::Term::Variable { span, name } => {
            for (i, (bound, origin, ty)) in ctx.types.iter().enumerate().rev() {
                if bound == name && *origin == NameOrigin::Source {
                    let index = Level::from(i).to_index(*ctx.env_lvl());
                    return Ok((TermData::Bound { index }.rced(), ty.clone()))
                }
            }
            match db.lookup_top(*name) {
                Some(id) => {
                    let ty = db.top(id).ty.clone();
                    Ok((TermData::Top { id, name: *name }.rced(), ty))
                }
                None => Err(ElabError::ScopeError {
                    src: ctx.src.clone(),
                    span: source_span(*span),
                    name: name.to_string()
                })
            }
        }

        syntax::Term::Star { .. } => Ok((TermData::Star.rced(), ValueData::star())),

        syntax::Term::Hole { span } => Ok(fresh_meta_pair(db, ctx, *span)),

        syntax::Term::Suppress { body, .. } => infer(db, ctx, body),

        syntax::Term::Pi { icit, var, domain, body, .. } => {
            let domain_term = check(db, ctx, domain, ValueData::star())?;
            let domain_value = eval(db, ctx.env(), domain_term.clone());
            let name = var.unwrap_or_default();
            let inner_ctx = ctx.bind(name, domain_value);
            let body_term = check(db, &inner_ctx, body, ValueData::star())?;
            let result = TermData::Pi {
                icit: *icit,
                name,
                domain: domain_term,
                body: body_term
            }.rced();
            Ok((result, ValueData::star()))
        }

        syntax::Term::Lambda { span, vars, body } => {
            infer_lambda(db, ctx, 0, vars, body, *span)
        }

        syntax::Term::Let { name, anno, def, body, .. } => {
            let (anno_term, anno_value, def_term) = elaborate_let_binding(db, ctx, anno, def)?;
            let def_value = LazyValueData::lazy(ctx.env(), def_term.clone());
            let inner_ctx = ctx.define(*name, def_value, anno_value);
            let (body_term, body_ty) = infer(db, &inner_ctx, body)?;
            let result = TermData::Let {
                name: *name,
                anno: anno_term,
                def: def_term,
                body: body_term
            }.rced();
            Ok((result, body_ty))
        }

        syntax::Term::Apply { span, style, fun, arg } => {
            let (icit, fun_term, fun_ty) = match style {
                ArgStyle::Named(target) => {
                    let (fun_term, fun_ty) = infer(db, ctx, fun)?;
                    let (fun_term, fun_ty) =
                        insert_until_name(db, ctx, *target, fun_term, fun_ty, *span)?;
                    (Icit::Implicit, fun_term, fun_ty)
                }
                ArgStyle::Given(Icit::Implicit) => {
                    let (fun_term, fun_ty) = infer(db, ctx, fun)?;
                    (Icit::Implicit, fun_term, fun_ty)
                }
                ArgStyle::Given(Icit::Explicit) => {
                    let (fun_term, fun_ty) = infer_and_insert(db, ctx, fun)?;
                    (Icit::Explicit, fun_term, fun_ty)
                }
            };
            let forced = unfold_to_head(db, fun_ty);
            let (domain, binder, closure) = match forced.as_ref() {
                ValueData::Pi { icit: expected, name, domain, closure } => {
                    if *expected != icit {
                        return Err(ElabError::IcitMismatch {
                            src: ctx.src.clone(),
                            span: source_span(*span),
                            expected: *expected,
                            provided: icit
                        })
                    }
                    (domain.clone(), *name, closure.clone())
                }
                _ => {
                    // not yet a function type: refine it against a fresh
                    // meta-built one
                    let domain_term = fresh_meta(db, ctx, ValueData::star(), *span);
                    let domain = eval(db, ctx.env(), domain_term);
                    let binder = Symbol::default();
                    let inner_ctx = ctx.bind_inserted(binder, domain.clone());
                    let codomain_term = fresh_meta(db, &inner_ctx, ValueData::star(), *span);
                    let closure = Closure::new(ctx.env(), codomain_term);
                    let pi = ValueData::pi(icit, binder, domain.clone(), closure.clone());
                    unify_types(db, ctx, fun.span(), pi, forced.clone())?;
                    (domain, binder, closure)
                }
            };
            let arg_term = check(db, ctx, arg, domain)?;
            let arg_value = LazyValueData::lazy(ctx.env(), arg_term.clone());
            let result_ty = closure.eval(db, EnvEntry::new(binder, arg_value));
            let result = TermData::Apply { icit, fun: fun_term, arg: arg_term }.rced();
            Ok((result, result_ty))
        }
    }
}

fn check_all_solved(db: &Database, ctx: &Context, meta_start: usize, span: Span)
    -> Result<(), ElabError>
{
    let unsolved = db.unsolved_metas_since(meta_start);
    if unsolved.is_empty() { return Ok(()) }
    let mut details = String::new();
    for (meta, (start, _)) in unsolved {
        details.push_str(&format!("{} created at offset {}\n", meta, start));
    }
    Err(ElabError::UnsolvedMetas {
        src: ctx.src.clone(),
        span: source_span(span),
        details
    })
}

fn elaborate_define(db: &mut Database, src: Arc<String>, def: &syntax::Definition)
    -> Result<(), ElabError>
{
    let now = time::Instant::now();
    let meta_start = db.meta_count();
    let ctx = Context::new(src.clone());

    let (ty_term, body_term) = match &def.anno {
        Some(anno) => {
            let anno_term = check(db, &ctx, anno, ValueData::star())?;
            let anno_value = eval(db, ctx.env(), anno_term.clone());
            let body_term = check(db, &ctx, &def.body, anno_value)?;
            (anno_term, body_term)
        }
        None => {
            let (body_term, inferred) = infer(db, &ctx, &def.body)?;
            let ty_term = quote(db, inferred, 0.into(), false);
            (ty_term, body_term)
        }
    };
    check_all_solved(db, &ctx, meta_start, def.span)?;

    // re-quote the type so solved metas disappear from the stored entry
    let ty_value = eval(db, Env::new(), ty_term);
    let ty_term = quote(db, ty_value.clone(), 0.into(), false);

    let unfolding = LazyValueData::lazy(Env::new(), body_term.clone());
    db.insert_top(def.name, def.span, ty_value, ty_term, Some((unfolding, body_term.clone())))
        .map_err(|_| ElabError::Collision {
            src: src.clone(),
            span: source_span(def.span)
        })?;

    let elaboration = now.elapsed().as_millis();
    log::info!("{} {} in {}ms", "elaborated".green(), def.name, elaboration);
    match def.tag {
        Some(syntax::Tag::Elaborate) => {
            println!("{} elaborated in {} ms", def.name, elaboration);
        }
        Some(syntax::Tag::Normalize) => {
            let now = time::Instant::now();
            let value = eval(db, Env::new(), body_term);
            let normal = quote(db, value, 0.into(), true);
            println!("{}", normal);
            log::info!("{} {} in {}ms", "normalized".green(), def.name, now.elapsed().as_millis());
        }
        None => { }
    }
    Ok(())
}

fn elaborate_assume(db: &mut Database, src: Arc<String>, decl: &syntax::Declaration)
    -> Result<(), ElabError>
{
    let meta_start = db.meta_count();
    let ctx = Context::new(src.clone());
    let anno_term = check(db, &ctx, &decl.anno, ValueData::star())?;
    check_all_solved(db, &ctx, meta_start, decl.span)?;
    let ty_value = eval(db, Env::new(), anno_term.clone());
    db.insert_top(decl.name, decl.span, ty_value, anno_term, None)
        .map_err(|_| ElabError::Collision {
            src: src.clone(),
            span: source_span(decl.span)
        })?;
    log::info!("{} {}", "assumed".green(), decl.name);
    Ok(())
}

/// Elaborate a file's declarations in order. A failing declaration is
/// reported and skipped; the rest of the file still runs so further
/// errors surface in one pass.
pub fn elaborate(db: &mut Database, src: Arc<String>, commands: &[syntax::Command])
    -> Result<(), StiltError>
{
    let mut errors: Vec<StiltError> = Vec::new();
    for command in commands {
        let result = match command {
            syntax::Command::Define(def) => elaborate_define(db, src.clone(), def),
            syntax::Command::Assume(decl) => elaborate_assume(db, src.clone(), decl),
        };
        if let Err(error) = result {
            errors.push(error.into());
        }
    }
    if errors.is_empty() { Ok(()) }
    else { Err(StiltError::Collection(errors)) }
}
