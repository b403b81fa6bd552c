
use crate::utility::*;
use crate::value::*;
use crate::eval::*;
use crate::database::Database;

/// Verdict of the approximate check. `Mismatch` is definitive (rigid
/// evidence only); `Undecided` means the full path has to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConvError {
    Mismatch,
    Undecided
}

fn appliable(value: &Value) -> bool {
    matches!(value.as_ref(),
        ValueData::Variable { .. }
        | ValueData::MetaVariable { .. }
        | ValueData::Reference { .. })
}

fn eta_expand(db: &Database, level: Level, icit: Icit, closure: &Closure, name: Symbol, other: &Value)
    -> (Value, Value)
{
    let input = LazyValueData::computed(ValueData::variable(level));
    let body = closure.eval(db, EnvEntry::new(name, input.clone()));
    let expanded = other.apply(db, SpineEntry::new(icit, input));
    (body, expanded)
}

fn approx_spine(db: &Database, level: Level, left: &Spine, right: &Spine) -> Result<(), ConvError> {
    for (l, r) in left.iter().zip(right.iter()) {
        if l.icit != r.icit { return Err(ConvError::Mismatch) }
        let l = l.value.force(db);
        let r = r.value.force(db);
        approx(db, level, &l, &r)?;
    }
    Ok(())
}

/// The approximate mode: compare by rigid structure alone. Known meta
/// solutions are followed, but top-level definitions are never unfolded
/// and no metas are solved, so a positive answer costs time proportional
/// to the written size of the terms no matter how large their normal
/// forms are.
pub(crate) fn approx(db: &Database, level: Level, left: &Value, right: &Value) -> Result<(), ConvError> {
    let left = unfold_meta_to_head(db, left.clone());
    let right = unfold_meta_to_head(db, right.clone());
    match (left.as_ref(), right.as_ref()) {
        (ValueData::Star, ValueData::Star) => Ok(()),
        (ValueData::Pi { icit: i1, name: n1, domain: d1, closure: c1 },
            ValueData::Pi { icit: i2, name: n2, domain: d2, closure: c2 }) =>
        {
            if i1 != i2 { return Err(ConvError::Mismatch) }
            approx(db, level, d1, d2)?;
            let input = LazyValueData::computed(ValueData::variable(level));
            let c1 = c1.eval(db, EnvEntry::new(*n1, input.clone()));
            let c2 = c2.eval(db, EnvEntry::new(*n2, input));
            approx(db, level + 1, &c1, &c2)
        }
        (ValueData::Lambda { name: n1, closure: c1, .. },
            ValueData::Lambda { name: n2, closure: c2, .. }) =>
        {
            let input = LazyValueData::computed(ValueData::variable(level));
            let c1 = c1.eval(db, EnvEntry::new(*n1, input.clone()));
            let c2 = c2.eval(db, EnvEntry::new(*n2, input));
            approx(db, level + 1, &c1, &c2)
        }
        (ValueData::Lambda { icit, name, closure }, _) if appliable(&right) => {
            let (body, expanded) = eta_expand(db, level, *icit, closure, *name, &right);
            approx(db, level + 1, &body, &expanded)
        }
        (_, ValueData::Lambda { icit, name, closure }) if appliable(&left) => {
            let (body, expanded) = eta_expand(db, level, *icit, closure, *name, &left);
            approx(db, level + 1, &expanded, &body)
        }
        (ValueData::Variable { level: l1, spine: s1 },
            ValueData::Variable { level: l2, spine: s2 }) =>
        {
            if l1 != l2 || s1.len() != s2.len() { return Err(ConvError::Mismatch) }
            approx_spine(db, level, s1, s2)
        }
        (ValueData::MetaVariable { meta: m1, spine: s1 },
            ValueData::MetaVariable { meta: m2, spine: s2 })
            if m1 == m2 && s1.len() == s2.len() =>
        {
            // A spine disagreement under a flexible head is never rigid
            // evidence: the eventual solution may ignore the argument.
            approx_spine(db, level, s1, s2).map_err(|_| ConvError::Undecided)
        }
        (ValueData::MetaVariable { .. }, _)
        | (_, ValueData::MetaVariable { .. }) => Err(ConvError::Undecided),
        (ValueData::Reference { id: i1, spine: s1, unfolded: None, .. },
            ValueData::Reference { id: i2, spine: s2, unfolded: None, .. }) =>
        {
            // Postulates are permanent rigid heads.
            if i1 != i2 || s1.len() != s2.len() { return Err(ConvError::Mismatch) }
            approx_spine(db, level, s1, s2)
        }
        (ValueData::Reference { id: i1, spine: s1, .. },
            ValueData::Reference { id: i2, spine: s2, .. })
            if i1 == i2 && s1.len() == s2.len() =>
        {
            approx_spine(db, level, s1, s2).map_err(|_| ConvError::Undecided)
        }
        (ValueData::Reference { unfolded: None, .. },
            ValueData::Star | ValueData::Pi { .. } | ValueData::Variable { .. })
        | (ValueData::Star | ValueData::Pi { .. } | ValueData::Variable { .. },
            ValueData::Reference { unfolded: None, .. }) => Err(ConvError::Mismatch),
        (ValueData::Reference { .. }, _)
        | (_, ValueData::Reference { .. }) => Err(ConvError::Undecided),
        _ => Err(ConvError::Mismatch)
    }
}

fn full_spine(db: &Database, level: Level, left: &Spine, right: &Spine) -> bool {
    left.len() == right.len()
    && left.iter().zip(right.iter()).all(|(l, r)| {
        let lv = l.value.force(db);
        let rv = r.value.force(db);
        l.icit == r.icit && full(db, level, &lv, &rv)
    })
}

/// The full mode: unfold everything, compare structurally. Complete up to
/// the remaining flexible heads, which are equal only on identical meta
/// and convertible spines here; solving belongs to the unifier.
fn full(db: &Database, level: Level, left: &Value, right: &Value) -> bool {
    let left = unfold_to_head(db, left.clone());
    let right = unfold_to_head(db, right.clone());
    match (left.as_ref(), right.as_ref()) {
        (ValueData::Star, ValueData::Star) => true,
        (ValueData::Pi { icit: i1, name: n1, domain: d1, closure: c1 },
            ValueData::Pi { icit: i2, name: n2, domain: d2, closure: c2 }) =>
        {
            let input = LazyValueData::computed(ValueData::variable(level));
            let c1 = c1.eval(db, EnvEntry::new(*n1, input.clone()));
            let c2 = c2.eval(db, EnvEntry::new(*n2, input));
            i1 == i2
            && full(db, level, d1, d2)
            && full(db, level + 1, &c1, &c2)
        }
        (ValueData::Lambda { name: n1, closure: c1, .. },
            ValueData::Lambda { name: n2, closure: c2, .. }) =>
        {
            let input = LazyValueData::computed(ValueData::variable(level));
            let c1 = c1.eval(db, EnvEntry::new(*n1, input.clone()));
            let c2 = c2.eval(db, EnvEntry::new(*n2, input));
            full(db, level + 1, &c1, &c2)
        }
        (ValueData::Lambda { icit, name, closure }, _) if appliable(&right) => {
            let (body, expanded) = eta_expand(db, level, *icit, closure, *name, &right);
            full(db, level + 1, &body, &expanded)
        }
        (_, ValueData::Lambda { icit, name, closure }) if appliable(&left) => {
            let (body, expanded) = eta_expand(db, level, *icit, closure, *name, &left);
            full(db, level + 1, &expanded, &body)
        }
        (ValueData::Variable { level: l1, spine: s1 },
            ValueData::Variable { level: l2, spine: s2 }) =>
        {
            l1 == l2 && full_spine(db, level, s1, s2)
        }
        (ValueData::MetaVariable { meta: m1, spine: s1 },
            ValueData::MetaVariable { meta: m2, spine: s2 }) =>
        {
            m1 == m2 && full_spine(db, level, s1, s2)
        }
        (ValueData::Reference { id: i1, spine: s1, .. },
            ValueData::Reference { id: i2, spine: s2, .. }) =>
        {
            // only postulates survive full unfolding
            i1 == i2 && full_spine(db, level, s1, s2)
        }
        _ => false
    }
}

/// Decide definitional equality: approximate first, full as the fallback.
/// Never solves metas; the unifier wraps this with solving.
pub fn convertible(db: &Database, level: Level, left: &Value, right: &Value) -> bool {
    match approx(db, level, left, right) {
        Ok(()) => true,
        Err(ConvError::Mismatch) => false,
        Err(ConvError::Undecided) => full(db, level, left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::*;

    fn star() -> Value { ValueData::star() }

    fn neutral(level: usize) -> Value { ValueData::variable(level) }

    // λ x. f x   where f is the given neutral value
    fn eta_wrapper(f: Value) -> Value {
        let mut env = Env::new();
        env.push_back(EnvEntry::new(Symbol::from("f"), LazyValueData::computed(f)));
        let code = TermData::Apply {
            icit: Icit::Explicit,
            fun: TermData::Bound { index: 1.into() }.rced(),
            arg: TermData::Bound { index: 0.into() }.rced()
        }.rced();
        ValueData::lambda(Icit::Explicit, Symbol::from("x"), Closure::new(env, code))
    }

    #[test]
    fn reflexivity_and_symmetry() {
        let db = Database::new();
        let samples = vec![star(), neutral(0)];
        for v in &samples {
            assert!(convertible(&db, 1.into(), v, v));
        }
        let (a, b) = (neutral(0), neutral(1));
        assert_eq!(
            convertible(&db, 2.into(), &a, &b),
            convertible(&db, 2.into(), &b, &a)
        );
    }

    #[test]
    fn rigid_heads_disagree() {
        let db = Database::new();
        assert!(!convertible(&db, 2.into(), &neutral(0), &neutral(1)));
        assert!(!convertible(&db, 1.into(), &neutral(0), &star()));
    }

    #[test]
    fn eta_law() {
        let db = Database::new();
        let f = neutral(0);
        let wrapped = eta_wrapper(f.clone());
        assert!(convertible(&db, 1.into(), &f, &wrapped));
        assert!(convertible(&db, 1.into(), &wrapped, &f));
    }

    #[test]
    fn approximate_success_implies_full_success() {
        let mut db = Database::new();
        let name = Symbol::from("c");
        let body = TermData::Star.rced();
        let unfolded = LazyValueData::lazy(Env::new(), body.clone());
        let id = db.insert_top(
            name, (0, 0),
            star(), TermData::Star.rced(),
            Some((unfolded, body))
        ).unwrap();
        let refv = ValueData::reference(id, name, Spine::new(), db.lookup_def(id));
        let samples = vec![star(), neutral(0), refv];
        for l in &samples {
            for r in &samples {
                if approx(&db, 1.into(), l, r).is_ok() {
                    assert!(full(&db, 1.into(), l, r));
                }
            }
        }
    }

    #[test]
    fn glued_heads_fall_back_to_unfolding() {
        let mut db = Database::new();
        // a : U = U and b : U = U have different ids but equal unfoldings
        let mk = |db: &mut Database, name: &str| {
            let name = Symbol::from(name);
            let body = TermData::Star.rced();
            let unfolded = LazyValueData::lazy(Env::new(), body.clone());
            let id = db.insert_top(
                name, (0, 0),
                star(), TermData::Star.rced(),
                Some((unfolded, body))
            ).unwrap();
            ValueData::reference(id, name, Spine::new(), db.lookup_def(id))
        };
        let a = mk(&mut db, "a");
        let b = mk(&mut db, "b");
        assert_eq!(approx(&db, 0.into(), &a, &b), Err(ConvError::Undecided));
        assert!(convertible(&db, 0.into(), &a, &b));
    }
}
