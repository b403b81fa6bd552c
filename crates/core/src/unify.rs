
use std::fmt;

use crate::utility::*;
use crate::value::*;
use crate::eval::*;
use crate::conversion::{self, ConvError};
use crate::metavar;
use crate::database::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnifyError {
    Mismatch,
    NonPattern,
    Occurs,
    Escape
}

impl fmt::Display for UnifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnifyError::Mismatch => write!(f, "values do not unify"),
            UnifyError::NonPattern => write!(f, "meta spine is not a pattern"),
            UnifyError::Occurs => write!(f, "meta occurs in its own candidate solution"),
            UnifyError::Escape => write!(f, "candidate solution mentions a variable outside the meta spine"),
        }
    }
}

fn appliable(value: &Value) -> bool {
    matches!(value.as_ref(),
        ValueData::Variable { .. }
        | ValueData::MetaVariable { .. }
        | ValueData::Reference { .. })
}

/// Unify every spine entry but the last and hand the last pair back, so
/// the caller can keep descending without growing the stack. `None`
/// means both spines were empty.
fn unify_spine(db: &mut Database, level: Level, left: &Spine, right: &Spine)
    -> Result<Option<(Value, Value)>, UnifyError>
{
    if left.len() != right.len() { return Err(UnifyError::Mismatch) }
    let Some(last) = left.len().checked_sub(1) else { return Ok(None) };
    for (l, r) in left.iter().zip(right.iter()).take(last) {
        if l.icit != r.icit { return Err(UnifyError::Mismatch) }
        let lv = l.value.force(db);
        let rv = r.value.force(db);
        unify(db, level, lv, rv)?;
    }
    let (l, r) = (&left[last], &right[last]);
    if l.icit != r.icit { return Err(UnifyError::Mismatch) }
    Ok(Some((l.value.force(db), r.value.force(db))))
}

/// Solve the equation `left = right`, possibly extending the metacontext
/// with new solutions. Equations that cannot be decided now fail rather
/// than being postponed. Glued heads go through the approximate
/// conversion check before anything is unfolded. Spine tails, closure
/// bodies and unfolding chains are followed iteratively, so the walk
/// stays in constant stack space even when the compared normal forms are
/// millions of constructors deep.
pub fn unify(db: &mut Database, level: Level, left: Value, right: Value) -> Result<(), UnifyError> {
    let mut level = level;
    let mut left = unfold_meta_to_head(db, left);
    let mut right = unfold_meta_to_head(db, right);
    loop {
        log::trace!("{} =? {}", left, right);
        if let (ValueData::Reference { .. }, ValueData::Reference { .. })
            = (left.as_ref(), right.as_ref())
        {
            match conversion::approx(db, level, &left, &right) {
                Ok(()) => return Ok(()),
                Err(ConvError::Mismatch) => return Err(UnifyError::Mismatch),
                Err(ConvError::Undecided) => { }
            }
        }
        let (next_left, next_right) = match (left.as_ref(), right.as_ref()) {
            (ValueData::Star, ValueData::Star) => return Ok(()),
            (ValueData::Pi { icit: i1, name: n1, domain: d1, closure: c1 },
                ValueData::Pi { icit: i2, name: n2, domain: d2, closure: c2 }) =>
            {
                if i1 != i2 { return Err(UnifyError::Mismatch) }
                unify(db, level, d1.clone(), d2.clone())?;
                let input = LazyValueData::computed(ValueData::variable(level));
                let c1 = c1.eval(db, EnvEntry::new(*n1, input.clone()));
                let c2 = c2.eval(db, EnvEntry::new(*n2, input));
                level = level + 1;
                (c1, c2)
            }
            (ValueData::Lambda { name: n1, closure: c1, .. },
                ValueData::Lambda { name: n2, closure: c2, .. }) =>
            {
                let input = LazyValueData::computed(ValueData::variable(level));
                let c1 = c1.eval(db, EnvEntry::new(*n1, input.clone()));
                let c2 = c2.eval(db, EnvEntry::new(*n2, input));
                level = level + 1;
                (c1, c2)
            }
            (ValueData::Lambda { icit, name, closure }, _) if appliable(&right) => {
                let input = LazyValueData::computed(ValueData::variable(level));
                let body = closure.eval(db, EnvEntry::new(*name, input.clone()));
                let expanded = right.apply(db, SpineEntry::new(*icit, input));
                level = level + 1;
                (body, expanded)
            }
            (_, ValueData::Lambda { icit, name, closure }) if appliable(&left) => {
                let input = LazyValueData::computed(ValueData::variable(level));
                let body = closure.eval(db, EnvEntry::new(*name, input.clone()));
                let expanded = left.apply(db, SpineEntry::new(*icit, input));
                level = level + 1;
                (expanded, body)
            }
            (ValueData::Variable { level: l1, spine: s1 },
                ValueData::Variable { level: l2, spine: s2 }) =>
            {
                if l1 != l2 { return Err(UnifyError::Mismatch) }
                match unify_spine(db, level, s1, s2)? {
                    Some(pair) => pair,
                    None => return Ok(())
                }
            }
            (ValueData::MetaVariable { meta: m1, spine: s1 },
                ValueData::MetaVariable { meta: m2, spine: s2 }) =>
            {
                if m1 == m2 {
                    match unify_spine(db, level, s1, s2)? {
                        Some(pair) => pair,
                        None => return Ok(())
                    }
                } else {
                    // distinct flexible heads: solve one side now, the
                    // other on failure; nothing is ever postponed
                    return metavar::solve(db, level, *m1, s1, right.clone())
                        .or_else(|_| metavar::solve(db, level, *m2, s2, left.clone()))
                }
            }
            (ValueData::MetaVariable { meta, spine }, _) => {
                return metavar::solve(db, level, *meta, spine, right.clone())
            }
            (_, ValueData::MetaVariable { meta, spine }) => {
                return metavar::solve(db, level, *meta, spine, left.clone())
            }
            (ValueData::Reference { id: i1, spine: s1, unfolded: u1, .. },
                ValueData::Reference { id: i2, spine: s2, unfolded: u2, .. }) =>
            {
                match (u1, u2) {
                    (Some(u1), Some(u2)) => {
                        let lv = u1.force(db).perform_spine(db, s1);
                        let rv = u2.force(db).perform_spine(db, s2);
                        (lv, rv)
                    }
                    (Some(u1), None) => {
                        let lv = u1.force(db).perform_spine(db, s1);
                        (lv, right.clone())
                    }
                    (None, Some(u2)) => {
                        let rv = u2.force(db).perform_spine(db, s2);
                        (left.clone(), rv)
                    }
                    (None, None) => {
                        if i1 != i2 { return Err(UnifyError::Mismatch) }
                        match unify_spine(db, level, s1, s2)? {
                            Some(pair) => pair,
                            None => return Ok(())
                        }
                    }
                }
            }
            (ValueData::Reference { spine, unfolded: Some(unfolded), .. }, _) => {
                let lv = unfolded.force(db).perform_spine(db, spine);
                (lv, right.clone())
            }
            (_, ValueData::Reference { spine, unfolded: Some(unfolded), .. }) => {
                let rv = unfolded.force(db).perform_spine(db, spine);
                (left.clone(), rv)
            }
            _ => return Err(UnifyError::Mismatch)
        };
        left = unfold_meta_to_head(db, next_left);
        right = unfold_meta_to_head(db, next_right);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::*;
    use crate::metavar::MetaEntry;

    fn fresh_meta_value(db: &mut Database, spine: Spine) -> (MetaVar, Value) {
        let meta = db.fresh_meta(ValueData::star(), (0, 0));
        (meta, ValueData::meta(meta, spine))
    }

    fn var_entry(level: usize) -> SpineEntry {
        SpineEntry::new(Icit::Explicit, LazyValueData::computed(ValueData::variable(level)))
    }

    fn solution_term(db: &Database, meta: MetaVar) -> Term {
        match db.lookup_meta(meta) {
            MetaEntry::Solved { term, .. } => term.clone(),
            MetaEntry::Unsolved { .. } => panic!("meta is unsolved")
        }
    }

    fn lam(name: &str, body: Term) -> Term {
        TermData::Lambda { icit: Icit::Explicit, name: Symbol::from(name), body }.rced()
    }

    #[test]
    fn pattern_solution_projects_variable() {
        let mut db = Database::new();
        // ?0 x y = y  at a context of two variables
        let spine: Spine = [var_entry(0), var_entry(1)].into_iter().collect();
        let (meta, lhs) = fresh_meta_value(&mut db, spine);
        let rhs = ValueData::variable(1);
        unify(&mut db, 2.into(), lhs, rhs).unwrap();
        let expected = lam("x0", lam("x1", TermData::Bound { index: 0.into() }.rced()));
        assert_eq!(solution_term(&db, meta), expected);
    }

    #[test]
    fn nonlinear_spine_binds_innermost() {
        let mut db = Database::new();
        // ?0 x x = x  solves to λ x0 x1. x1
        let spine: Spine = [var_entry(0), var_entry(0)].into_iter().collect();
        let (meta, lhs) = fresh_meta_value(&mut db, spine);
        let rhs = ValueData::variable(0);
        unify(&mut db, 1.into(), lhs, rhs).unwrap();
        let expected = lam("x0", lam("x1", TermData::Bound { index: 0.into() }.rced()));
        assert_eq!(solution_term(&db, meta), expected);
    }

    #[test]
    fn scope_escape_is_rejected() {
        let mut db = Database::new();
        // ?0 x = y  where y is not in the spine
        let spine: Spine = [var_entry(0)].into_iter().collect();
        let (meta, lhs) = fresh_meta_value(&mut db, spine);
        let rhs = ValueData::variable(1);
        let result = unify(&mut db, 2.into(), lhs, rhs);
        assert_eq!(result, Err(UnifyError::Escape));
        assert!(matches!(db.lookup_meta(meta), MetaEntry::Unsolved { .. }));
    }

    #[test]
    fn occurs_check_rejects_cyclic_solution() {
        let mut db = Database::new();
        // ?0 = (_ : ?0) → U
        let (meta, lhs) = fresh_meta_value(&mut db, Spine::new());
        let rhs = ValueData::pi(
            Icit::Explicit,
            Symbol::default(),
            lhs.clone(),
            Closure::new(Env::new(), TermData::Star.rced())
        );
        let result = unify(&mut db, 0.into(), lhs, rhs);
        assert_eq!(result, Err(UnifyError::Occurs));
        let _ = meta;
    }

    #[test]
    fn non_pattern_spine_is_rejected() {
        let mut db = Database::new();
        // ?0 U = U
        let spine: Spine = [SpineEntry::new(
            Icit::Explicit,
            LazyValueData::computed(ValueData::star())
        )].into_iter().collect();
        let (_, lhs) = fresh_meta_value(&mut db, spine);
        let result = unify(&mut db, 0.into(), lhs, ValueData::star());
        assert_eq!(result, Err(UnifyError::NonPattern));
    }

    #[test]
    fn solution_is_monotone_and_visible() {
        let mut db = Database::new();
        let (meta, lhs) = fresh_meta_value(&mut db, Spine::new());
        unify(&mut db, 0.into(), lhs.clone(), ValueData::star()).unwrap();
        // solved head now forces to the solution
        let forced = unfold_meta_to_head(&db, lhs.clone());
        assert!(matches!(forced.as_ref(), ValueData::Star));
        assert!(matches!(db.lookup_meta(meta), MetaEntry::Solved { .. }));
        // solved-against-itself keeps succeeding
        unify(&mut db, 0.into(), lhs, ValueData::star()).unwrap();
    }

    #[test]
    fn flexible_pair_solves_one_side() {
        let mut db = Database::new();
        // ?0 x =? ?1 U : the right spine is not a pattern, so the left
        // meta absorbs the equation
        let (m0, lhs) = fresh_meta_value(&mut db, [var_entry(0)].into_iter().collect());
        let spine: Spine = [SpineEntry::new(
            Icit::Explicit,
            LazyValueData::computed(ValueData::star())
        )].into_iter().collect();
        let (_, rhs) = fresh_meta_value(&mut db, spine);
        unify(&mut db, 1.into(), lhs, rhs).unwrap();
        assert!(matches!(db.lookup_meta(m0), MetaEntry::Solved { .. }));
    }

    #[test]
    fn flexible_pair_with_no_pattern_fails() {
        let mut db = Database::new();
        // ?0 U =? ?1 U : neither spine is a pattern, no postponing
        let star_spine = || -> Spine {
            [SpineEntry::new(
                Icit::Explicit,
                LazyValueData::computed(ValueData::star())
            )].into_iter().collect()
        };
        let (_, lhs) = fresh_meta_value(&mut db, star_spine());
        let (_, rhs) = fresh_meta_value(&mut db, star_spine());
        assert_eq!(unify(&mut db, 0.into(), lhs, rhs), Err(UnifyError::NonPattern));
    }

    #[test]
    fn deep_rigid_chains_unify_iteratively() {
        let mut db = Database::new();
        // s (s (... x)) against itself, far deeper than any call stack
        let depth = 200_000;
        let chain = |db: &Database| {
            let mut value = ValueData::variable(1);
            for _ in 0..depth {
                let entry = SpineEntry::new(
                    Icit::Explicit,
                    LazyValueData::computed(value)
                );
                value = ValueData::variable(0).apply(db, entry);
            }
            value
        };
        let left = chain(&db);
        let right = chain(&db);
        unify(&mut db, 2.into(), left, right).unwrap();
    }
}
