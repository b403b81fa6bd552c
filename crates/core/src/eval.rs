
use crate::utility::*;
use crate::term::*;
use crate::value::*;
use crate::metavar::MetaEntry;
use crate::database::Database;

pub trait ForceValue {
    fn force(&self, db: &Database) -> Value;
}

impl ForceValue for LazyValueData {
    fn force(&self, db: &Database) -> Value {
        match self.value.get() {
            Some(value) => value.clone(),
            None => {
                let (env, code) = self.take_code()
                    .expect("Impossible, a lazy value is either computed or suspended.");
                let result = eval(db, env, code);
                self.value.set(result.clone()).ok();
                result
            }
        }
    }
}

impl Closure {
    pub fn eval(&self, db: &Database, arg: EnvEntry) -> Value {
        let Closure { env, code } = self;
        let mut env = env.clone();
        env.push_back(arg);
        eval(db, env, code.clone())
    }
}

pub trait ValueEx {
    fn apply(&self, db: &Database, arg: SpineEntry) -> Value;
    fn perform_spine(&self, db: &Database, spine: &Spine) -> Value;
    fn quote(&self, db: &Database, level: Level) -> Term;
}

impl ValueEx for Value {
    fn apply(&self, db: &Database, arg: SpineEntry) -> Value {
        match self.as_ref() {
            ValueData::Variable { level, spine } => {
                let mut spine = spine.clone();
                spine.push_back(arg);
                ValueData::variable_with_spine(*level, spine)
            }
            ValueData::MetaVariable { meta, spine } => {
                let mut spine = spine.clone();
                spine.push_back(arg);
                ValueData::meta(*meta, spine)
            }
            ValueData::Reference { id, name, spine, unfolded } => {
                let mut spine = spine.clone();
                spine.push_back(arg);
                ValueData::reference(*id, *name, spine, unfolded.clone())
            }
            ValueData::Lambda { name, closure, .. } => {
                closure.eval(db, EnvEntry::new(*name, arg.value))
            }
            ValueData::Pi { .. } | ValueData::Star =>
                unreachable!("applied a non-function value")
        }
    }

    fn perform_spine(&self, db: &Database, spine: &Spine) -> Value {
        spine.iter().fold(self.clone(), |acc, entry| acc.apply(db, entry.clone()))
    }

    fn quote(&self, db: &Database, level: Level) -> Term {
        quote(db, self.clone(), level, false)
    }
}

fn eval_meta(db: &Database, meta: MetaVar) -> Value {
    match db.lookup_meta(meta) {
        MetaEntry::Unsolved { .. } => ValueData::meta(meta, Spine::new()),
        MetaEntry::Solved { value, .. } => value.clone()
    }
}

/// Evaluate a core term to weak head normal form. Top-level references
/// come back glued; binder bodies come back as closures; `let` bindings
/// and application arguments are suspended lazily.
pub fn eval(db: &Database, mut env: Env, term: Term) -> Value {
    match term.as_ref() {
        TermData::Lambda { icit, name, body } => {
            let closure = Closure::new(env, body.clone());
            ValueData::lambda(*icit, *name, closure)
        }
        TermData::Pi { icit, name, domain, body } => {
            let domain = eval(db, env.clone(), domain.clone());
            let closure = Closure::new(env, body.clone());
            ValueData::pi(*icit, *name, domain, closure)
        }
        TermData::Let { name, def, body, .. } => {
            let def = LazyValueData::lazy(env.clone(), def.clone());
            env.push_back(EnvEntry::new(*name, def));
            eval(db, env, body.clone())
        }
        TermData::Apply { icit, fun, arg } => {
            let arg = LazyValueData::lazy(env.clone(), arg.clone());
            let fun = eval(db, env, fun.clone());
            fun.apply(db, SpineEntry::new(*icit, arg))
        }
        TermData::Bound { index } => {
            env[index.to_level(env.len())].value.force(db)
        }
        TermData::Top { id, name } => {
            ValueData::reference(*id, *name, Spine::new(), db.lookup_def(*id))
        }
        TermData::Meta { meta } => eval_meta(db, *meta),
        TermData::InsertedMeta { meta, mask } => {
            let mut result = eval_meta(db, *meta);
            for (level, bound) in mask.iter().enumerate() {
                if *bound == EnvBound::Bound {
                    let arg = &env[Level::from(level)];
                    let arg = SpineEntry::new(Icit::Explicit, arg.value.clone());
                    result = result.apply(db, arg);
                }
            }
            result
        }
        TermData::Star => ValueData::star()
    }
}

/// Chase solutions of the head metavariable. Must be re-applied after any
/// meta is solved; never unfolds glued top-level references.
pub fn unfold_meta_to_head(db: &Database, value: Value) -> Value {
    let mut result = value;
    loop {
        let next = match result.as_ref() {
            ValueData::MetaVariable { meta, spine } => {
                match db.lookup_meta(*meta) {
                    MetaEntry::Solved { value, .. } =>
                        value.clone().perform_spine(db, spine),
                    MetaEntry::Unsolved { .. } => break
                }
            }
            _ => break
        };
        result = next;
    }
    result
}

/// Like `unfold_meta_to_head`, but also forces the unfolding thunks of
/// glued references. Only the full conversion path should call this.
pub fn unfold_to_head(db: &Database, value: Value) -> Value {
    let mut result = value;
    loop {
        let next = match result.as_ref() {
            ValueData::Reference { spine, unfolded: Some(unfolded), .. } => {
                unfolded.force(db).perform_spine(db, spine)
            }
            ValueData::MetaVariable { meta, spine } => {
                match db.lookup_meta(*meta) {
                    MetaEntry::Solved { value, .. } =>
                        value.clone().perform_spine(db, spine),
                    MetaEntry::Unsolved { .. } => break
                }
            }
            _ => break
        };
        result = next;
    }
    result
}

fn quote_spine(db: &Database, head: Term, spine: &Spine, level: Level, unfold: bool) -> Term {
    spine.iter().fold(head, |acc, entry| {
        let arg = quote(db, entry.value.force(db), level, unfold);
        TermData::Apply { icit: entry.icit, fun: acc, arg }.rced()
    })
}

/// Read a value back into core syntax. With `unfold` set, glued references
/// are reduced away and the result is the full normal form; otherwise the
/// folded names are kept and solutions of metas are still followed.
pub fn quote(db: &Database, value: Value, level: Level, unfold: bool) -> Term {
    let value =
        if unfold { unfold_to_head(db, value) }
        else { unfold_meta_to_head(db, value) };
    match value.as_ref() {
        ValueData::Variable { level: vlvl, spine } => {
            let head = TermData::Bound { index: vlvl.to_index(*level) }.rced();
            quote_spine(db, head, spine, level, unfold)
        }
        ValueData::MetaVariable { meta, spine } => {
            let head = TermData::Meta { meta: *meta }.rced();
            quote_spine(db, head, spine, level, unfold)
        }
        ValueData::Reference { id, name, spine, .. } => {
            let head = TermData::Top { id: *id, name: *name }.rced();
            quote_spine(db, head, spine, level, unfold)
        }
        ValueData::Lambda { icit, name, closure } => {
            let input = EnvEntry::new(*name, LazyValueData::computed(ValueData::variable(level)));
            let body = quote(db, closure.eval(db, input), level + 1, unfold);
            TermData::Lambda { icit: *icit, name: *name, body }.rced()
        }
        ValueData::Pi { icit, name, domain, closure } => {
            let domain = quote(db, domain.clone(), level, unfold);
            let input = EnvEntry::new(*name, LazyValueData::computed(ValueData::variable(level)));
            let body = quote(db, closure.eval(db, input), level + 1, unfold);
            TermData::Pi { icit: *icit, name: *name, domain, body }.rced()
        }
        ValueData::Star => TermData::Star.rced()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_e(fun: Term, arg: Term) -> Term {
        TermData::Apply { icit: Icit::Explicit, fun, arg }.rced()
    }

    fn lam(name: &str, body: Term) -> Term {
        TermData::Lambda { icit: Icit::Explicit, name: Symbol::from(name), body }.rced()
    }

    fn var(index: usize) -> Term {
        TermData::Bound { index: index.into() }.rced()
    }

    // λ x. x
    fn id_term() -> Term {
        lam("x", var(0))
    }

    #[test]
    fn beta_reduction() {
        let db = Database::new();
        let term = apply_e(id_term(), TermData::Star.rced());
        let value = eval(&db, Env::new(), term);
        assert!(matches!(value.as_ref(), ValueData::Star));
    }

    #[test]
    fn let_binds_lazily() {
        let db = Database::new();
        // let y : U = U; y
        let term = TermData::Let {
            name: Symbol::from("y"),
            anno: TermData::Star.rced(),
            def: TermData::Star.rced(),
            body: var(0)
        }.rced();
        let value = eval(&db, Env::new(), term);
        assert!(matches!(value.as_ref(), ValueData::Star));
    }

    #[test]
    fn quote_eval_is_stable() {
        let db = Database::new();
        // (λ x. λ y. x) U
        let term = apply_e(lam("x", lam("y", var(1))), TermData::Star.rced());
        let once = quote(&db, eval(&db, Env::new(), term), 0.into(), true);
        let twice = quote(&db, eval(&db, Env::new(), once.clone()), 0.into(), true);
        assert_eq!(once, twice);
        // λ y. U
        let expected = lam("y", TermData::Star.rced());
        assert_eq!(once, expected);
    }

    #[test]
    fn glued_reference_folds_and_unfolds() {
        let mut db = Database::new();
        let name = Symbol::from("two");
        // two : U = U (contrived body, enough to observe the gluing)
        let body = TermData::Star.rced();
        let unfolded = LazyValueData::lazy(Env::new(), body.clone());
        let id = db.insert_top(
            name, (0, 0),
            ValueData::star(), TermData::Star.rced(),
            Some((unfolded, body))
        ).unwrap();
        let term = TermData::Top { id, name }.rced();
        let value = eval(&db, Env::new(), term.clone());
        // shallow quote keeps the name, full quote reduces it away
        assert_eq!(quote(&db, value.clone(), 0.into(), false), term);
        assert_eq!(quote(&db, value, 0.into(), true), TermData::Star.rced());
    }

    #[test]
    fn unfolding_is_memoized() {
        let mut db = Database::new();
        let name = Symbol::from("d");
        let body = TermData::Star.rced();
        let unfolded = LazyValueData::lazy(Env::new(), body.clone());
        let id = db.insert_top(
            name, (0, 0),
            ValueData::star(), TermData::Star.rced(),
            Some((unfolded.clone(), body))
        ).unwrap();
        let term = TermData::Top { id, name }.rced();
        let v1 = eval(&db, Env::new(), term.clone());
        let v2 = eval(&db, Env::new(), term);
        let u1 = unfold_to_head(&db, v1);
        let u2 = unfold_to_head(&db, v2);
        assert!(matches!(u1.as_ref(), ValueData::Star));
        // both evaluations share the same memoized cell
        assert!(std::rc::Rc::ptr_eq(&u1, &u2));
    }
}
