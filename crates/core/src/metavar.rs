
use std::collections::HashMap;

use colored::Colorize;

use crate::utility::*;
use crate::term::*;
use crate::value::*;
use crate::eval::*;
use crate::unify::UnifyError;
use crate::database::Database;

/// One slot of the metacontext. Solutions are recorded both as a value
/// (for evaluation) and as a core term (for quoting and display); once a
/// slot is solved it never changes again.
#[derive(Debug, Clone)]
pub enum MetaEntry {
    Unsolved { ty: Value, span: Span },
    Solved { value: Value, term: Term },
}

/// Maps the levels appearing in a candidate solution back to the De
/// Bruijn indices they must have under the solution's binders. A missing
/// key during the quoting walk is a scope escape.
struct PartialRenaming {
    domain: Level,
    codomain: Level,
    renaming: HashMap<Level, Level>
}

fn lift(renaming: &PartialRenaming) -> PartialRenaming {
    let PartialRenaming { domain, codomain, renaming } = renaming;
    let mut renaming = renaming.clone();
    renaming.insert(*codomain, *domain);
    PartialRenaming {
        domain: *domain + 1,
        codomain: *codomain + 1,
        renaming
    }
}

/// A meta spine admits solving only when every entry forces to a bare
/// bound variable. Repeated variables do not fail; the insertion below
/// overwrites, so the innermost occurrence wins.
fn invert(db: &Database, level: Level, spine: &Spine) -> Result<(PartialRenaming, Vec<Icit>), UnifyError> {
    let mut renaming = HashMap::new();
    let mut domain = Level::from(0);
    let mut icits = Vec::with_capacity(spine.len());
    for entry in spine.iter() {
        icits.push(entry.icit);
        let value = unfold_meta_to_head(db, entry.value.force(db));
        match value.as_ref() {
            ValueData::Variable { level, spine } if spine.is_empty() => {
                renaming.insert(*level, domain);
                domain = domain + 1;
            }
            _ => return Err(UnifyError::NonPattern)
        }
    }
    Ok((PartialRenaming { domain, codomain: level, renaming }, icits))
}

fn rename_spine(
    db: &Database,
    meta: MetaVar,
    renaming: &PartialRenaming,
    unfold: bool,
    head: Term,
    spine: &Spine)
    -> Result<Term, UnifyError>
{
    let mut result = head;
    for entry in spine.iter() {
        let arg = rename(db, meta, renaming, unfold, entry.value.force(db))?;
        result = TermData::Apply { icit: entry.icit, fun: result, arg }.rced();
    }
    Ok(result)
}

/// Quote a value through the renaming, checking occurrence of the meta
/// under solution and scope membership of every free level as we go.
/// With `unfold` unset, solved metas and glued references are kept folded
/// so solutions stay small.
fn rename(
    db: &Database,
    meta: MetaVar,
    renaming: &PartialRenaming,
    unfold: bool,
    value: Value)
    -> Result<Term, UnifyError>
{
    let value =
        if unfold { unfold_to_head(db, value) }
        else { value };
    match value.as_ref() {
        ValueData::Variable { level, spine } => {
            match renaming.renaming.get(level) {
                Some(renamed) => {
                    let head = TermData::Bound {
                        index: renamed.to_index(*renaming.domain)
                    }.rced();
                    rename_spine(db, meta, renaming, unfold, head, spine)
                }
                None => Err(UnifyError::Escape)
            }
        }
        ValueData::MetaVariable { meta: m, spine } => {
            if *m == meta { return Err(UnifyError::Occurs) }
            let head = TermData::Meta { meta: *m }.rced();
            rename_spine(db, meta, renaming, unfold, head, spine)
        }
        ValueData::Reference { id, name, spine, .. } => {
            let head = TermData::Top { id: *id, name: *name }.rced();
            rename_spine(db, meta, renaming, unfold, head, spine)
        }
        ValueData::Lambda { icit, name, closure } => {
            let input = LazyValueData::computed(ValueData::variable(renaming.codomain));
            let body = closure.eval(db, EnvEntry::new(*name, input));
            let body = rename(db, meta, &lift(renaming), unfold, body)?;
            Ok(TermData::Lambda { icit: *icit, name: *name, body }.rced())
        }
        ValueData::Pi { icit, name, domain, closure } => {
            let domain = rename(db, meta, renaming, unfold, domain.clone())?;
            let input = LazyValueData::computed(ValueData::variable(renaming.codomain));
            let body = closure.eval(db, EnvEntry::new(*name, input));
            let body = rename(db, meta, &lift(renaming), unfold, body)?;
            Ok(TermData::Pi { icit: *icit, name: *name, domain, body }.rced())
        }
        ValueData::Star => Ok(TermData::Star.rced())
    }
}

/// Attempt `meta spine := rhs`. On success the metacontext gains the
/// solution; on failure it is untouched. The shallow renaming pass is
/// retried once with full unfolding, since unfolding can erase an
/// offending occurrence or out-of-scope variable.
pub fn solve(
    db: &mut Database,
    level: Level,
    meta: MetaVar,
    spine: &Spine,
    rhs: Value)
    -> Result<(), UnifyError>
{
    let (renaming, icits) = invert(db, level, spine)?;
    let body = rename(db, meta, &renaming, false, rhs.clone())
        .or_else(|_| rename(db, meta, &renaming, true, rhs))?;
    let mut term = body;
    for (i, icit) in icits.iter().enumerate().rev() {
        let name = Symbol::from(format!("x{}", i).as_str());
        term = TermData::Lambda { icit: *icit, name, body: term }.rced();
    }
    let value = eval(db, Env::new(), term.clone());
    log::trace!("{} {} {}", meta, "solved to".bright_blue(), term);
    db.solve_meta(meta, value, term);
    Ok(())
}
